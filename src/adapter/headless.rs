//! Recording host that implements every native API without a GPU.
//!
//! Used for tests and dry runs. All calls land in a shared [`HeadlessState`]
//! that a [`HeadlessProbe`] can inspect after the host has been handed over.

use super::native::{
    CommandApi, GuiBatch, LegacyFramebuffer, LegacyGlApi, LegacyProgramSource, NativeCommand, NativeHost, NativeId,
    RenderTargetApi, TextureDesc,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// One recorded fullscreen draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub target: u64,
    pub program: u64,
    pub uniforms: Vec<u8>,
    pub channels: [u64; 4],
}

/// Program as the host received it.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramRecord {
    Glsl { fragment: String, samplers: [Option<String>; 4] },
    Wgsl(String),
    SpirV { words: usize },
}

#[derive(Debug, Clone)]
struct TextureRecord {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct HeadlessState {
    size: (u32, u32),
    next_id: u64,
    textures: HashMap<u64, TextureRecord>,
    targets: HashMap<u64, (u32, u32)>,
    programs: HashMap<u64, ProgramRecord>,
    surface_allocations: usize,
    texture_uploads: usize,
    texture_writes: usize,
    draws: Vec<DrawRecord>,
    clears: usize,
    composites: Vec<f32>,
    gui_batches: usize,
    frames_begun: usize,
    frames_presented: usize,
    fail_surfaces: bool,
    fail_programs: Option<String>,
    panic_next_draw: bool,
}

impl HeadlessState {
    fn issue_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn store_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> u64 {
        let id = self.issue_id();
        self.texture_uploads += 1;
        self.textures.insert(
            id,
            TextureRecord {
                width,
                height,
                pixels: rgba.to_vec(),
            },
        );
        id
    }

    fn write_region(&mut self, id: u64, origin: [u32; 2], width: u32, height: u32, rgba: &[u8]) {
        self.texture_writes += 1;
        let Some(record) = self.textures.get_mut(&id) else {
            return;
        };
        let stride = record.width as usize * 4;
        for row in 0..height as usize {
            let dst = (origin[1] as usize + row) * stride + origin[0] as usize * 4;
            let src = row * width as usize * 4;
            let len = width as usize * 4;
            if dst + len <= record.pixels.len() && src + len <= rgba.len() {
                record.pixels[dst..dst + len].copy_from_slice(&rgba[src..src + len]);
            }
        }
    }

    fn store_target(&mut self, width: u32, height: u32) -> Result<u64, String> {
        if self.fail_surfaces {
            return Err("render target allocation refused".to_string());
        }
        let id = self.issue_id();
        self.surface_allocations += 1;
        self.targets.insert(id, (width, height));
        Ok(id)
    }

    fn store_program(&mut self, record: ProgramRecord) -> Result<u64, String> {
        if let Some(log) = self.fail_programs.take() {
            return Err(log);
        }
        let id = self.issue_id();
        self.programs.insert(id, record);
        Ok(id)
    }

    fn push_draw(&mut self, record: DrawRecord) {
        if std::mem::take(&mut self.panic_next_draw) {
            panic!("headless host: injected draw panic");
        }
        self.draws.push(record);
    }

    fn release(&mut self, id: u64) {
        self.textures.remove(&id);
        self.targets.remove(&id);
        self.programs.remove(&id);
    }
}

/// Native host backed by in-memory records.
#[derive(Clone)]
pub struct HeadlessHost {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessHost {
    fn with_size(width: u32, height: u32) -> (Self, HeadlessProbe) {
        let state = Rc::new(RefCell::new(HeadlessState {
            size: (width, height),
            ..Default::default()
        }));
        (
            Self { state: state.clone() },
            HeadlessProbe { state },
        )
    }

    /// A host speaking the legacy GL-style binding.
    pub fn legacy(width: u32, height: u32) -> (NativeHost, HeadlessProbe) {
        let (host, probe) = Self::with_size(width, height);
        (NativeHost::LegacyGl(Box::new(host)), probe)
    }

    /// A host speaking the render-target binding.
    pub fn render_targets(width: u32, height: u32) -> (NativeHost, HeadlessProbe) {
        let (host, probe) = Self::with_size(width, height);
        (NativeHost::RenderTargets(Box::new(host)), probe)
    }

    /// A host speaking the command-encoder binding.
    pub fn command_encoder(width: u32, height: u32) -> (NativeHost, HeadlessProbe) {
        let (host, probe) = Self::with_size(width, height);
        (NativeHost::CommandEncoder(Box::new(host)), probe)
    }

    /// Host matching the given release family.
    pub fn for_release(release: super::HostRelease, width: u32, height: u32) -> (NativeHost, HeadlessProbe) {
        match release {
            super::HostRelease::V1_21 => Self::legacy(width, height),
            super::HostRelease::V1_21_4 => Self::render_targets(width, height),
            super::HostRelease::V1_21_10 => Self::command_encoder(width, height),
        }
    }
}

/// Read access to what a [`HeadlessHost`] recorded.
#[derive(Clone)]
pub struct HeadlessProbe {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessProbe {
    pub fn set_size(&self, width: u32, height: u32) {
        self.state.borrow_mut().size = (width, height);
    }

    /// Makes every following render-target allocation fail.
    pub fn fail_surface_allocation(&self, fail: bool) {
        self.state.borrow_mut().fail_surfaces = fail;
    }

    /// Makes the next program creation fail with `log`.
    pub fn fail_next_program(&self, log: &str) {
        self.state.borrow_mut().fail_programs = Some(log.to_string());
    }

    /// Makes the next fullscreen draw panic inside the host.
    pub fn panic_on_next_draw(&self) {
        self.state.borrow_mut().panic_next_draw = true;
    }

    pub fn live_textures(&self) -> usize {
        self.state.borrow().textures.len()
    }

    pub fn live_targets(&self) -> usize {
        self.state.borrow().targets.len()
    }

    pub fn live_programs(&self) -> usize {
        self.state.borrow().programs.len()
    }

    pub fn surface_allocations(&self) -> usize {
        self.state.borrow().surface_allocations
    }

    pub fn texture_uploads(&self) -> usize {
        self.state.borrow().texture_uploads
    }

    pub fn texture_writes(&self) -> usize {
        self.state.borrow().texture_writes
    }

    pub fn target_size(&self, id: u64) -> Option<(u32, u32)> {
        self.state.borrow().targets.get(&id).copied()
    }

    pub fn texture_pixels(&self, id: u64) -> Option<Vec<u8>> {
        self.state.borrow().textures.get(&id).map(|t| t.pixels.clone())
    }

    pub fn program(&self, id: u64) -> Option<ProgramRecord> {
        self.state.borrow().programs.get(&id).cloned()
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state.borrow().draws.clone()
    }

    pub fn last_draw(&self) -> Option<DrawRecord> {
        self.state.borrow().draws.last().cloned()
    }

    pub fn clears(&self) -> usize {
        self.state.borrow().clears
    }

    /// Alpha of every composite, in order.
    pub fn composites(&self) -> Vec<f32> {
        self.state.borrow().composites.clone()
    }

    pub fn gui_batches(&self) -> usize {
        self.state.borrow().gui_batches
    }

    /// Frames opened through the render-target API.
    pub fn frames_begun(&self) -> usize {
        self.state.borrow().frames_begun
    }

    pub fn frames_presented(&self) -> usize {
        self.state.borrow().frames_presented
    }
}

impl LegacyGlApi for HeadlessHost {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.state.borrow().size
    }

    fn gen_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<u32, String> {
        Ok(self.state.borrow_mut().store_texture(width, height, rgba) as u32)
    }

    fn tex_sub_image(&mut self, texture: u32, x: u32, y: u32, width: u32, height: u32, rgba: &[u8]) {
        self.state
            .borrow_mut()
            .write_region(u64::from(texture), [x, y], width, height, rgba);
    }

    fn delete_texture(&mut self, texture: u32) {
        self.state.borrow_mut().release(u64::from(texture));
    }

    fn gen_framebuffer(&mut self, width: u32, height: u32) -> Result<LegacyFramebuffer, String> {
        let mut state = self.state.borrow_mut();
        let fbo = state.store_target(width, height)?;
        let color = state.issue_id();
        Ok(LegacyFramebuffer {
            fbo: fbo as u32,
            color_texture: color as u32,
        })
    }

    fn delete_framebuffer(&mut self, framebuffer: LegacyFramebuffer) {
        self.state.borrow_mut().release(u64::from(framebuffer.fbo));
    }

    fn link_program(&mut self, source: &LegacyProgramSource<'_>) -> Result<u32, String> {
        let record = ProgramRecord::Glsl {
            fragment: source.fragment.to_string(),
            samplers: source.samplers.clone(),
        };
        self.state.borrow_mut().store_program(record).map(|id| id as u32)
    }

    fn delete_program(&mut self, program: u32) {
        self.state.borrow_mut().release(u64::from(program));
    }

    fn clear_framebuffer(&mut self, _fbo: u32, _color: [f32; 4]) {
        self.state.borrow_mut().clears += 1;
    }

    fn draw_fullscreen(&mut self, fbo: u32, _viewport: (u32, u32), program: u32, uniform_block: &[u8], textures: &[u32; 4]) {
        self.state.borrow_mut().push_draw(DrawRecord {
            target: u64::from(fbo),
            program: u64::from(program),
            uniforms: uniform_block.to_vec(),
            channels: textures.map(u64::from),
        });
    }

    fn blit_to_main(&mut self, _color_texture: u32, alpha: f32) {
        self.state.borrow_mut().composites.push(alpha);
    }

    fn draw_gui(&mut self, _batch: &GuiBatch<'_>) {
        self.state.borrow_mut().gui_batches += 1;
    }
}

impl RenderTargetApi for HeadlessHost {
    fn window_size(&self) -> (u32, u32) {
        self.state.borrow().size
    }

    fn create_texture(&mut self, _label: &str, width: u32, height: u32, rgba: &[u8]) -> Result<NativeId, String> {
        Ok(self.state.borrow_mut().store_texture(width, height, rgba))
    }

    fn write_texture(&mut self, texture: NativeId, origin: [u32; 2], width: u32, height: u32, rgba: &[u8]) {
        self.state
            .borrow_mut()
            .write_region(texture, origin, width, height, rgba);
    }

    fn create_render_target(&mut self, _label: &str, width: u32, height: u32) -> Result<NativeId, String> {
        self.state.borrow_mut().store_target(width, height)
    }

    fn create_pipeline(&mut self, _label: &str, fragment_wgsl: &str, _uniform_size: u64) -> Result<NativeId, String> {
        self.state
            .borrow_mut()
            .store_program(ProgramRecord::Wgsl(fragment_wgsl.to_string()))
    }

    fn destroy(&mut self, resource: NativeId) {
        self.state.borrow_mut().release(resource);
    }

    fn begin_frame(&mut self) {
        self.state.borrow_mut().frames_begun += 1;
    }

    fn clear_target(&mut self, _target: NativeId, _color: [f32; 4]) {
        self.state.borrow_mut().clears += 1;
    }

    fn render_to_target(&mut self, target: NativeId, pipeline: NativeId, uniforms: &[u8], channels: &[NativeId; 4]) {
        self.state.borrow_mut().push_draw(DrawRecord {
            target,
            program: pipeline,
            uniforms: uniforms.to_vec(),
            channels: *channels,
        });
    }

    fn composite_target(&mut self, _target: NativeId, alpha: f32) {
        self.state.borrow_mut().composites.push(alpha);
    }

    fn submit_gui(&mut self, batches: &[GuiBatch<'_>]) {
        self.state.borrow_mut().gui_batches += batches.len();
    }

    fn end_frame(&mut self) {
        self.state.borrow_mut().frames_presented += 1;
    }
}

impl CommandApi for HeadlessHost {
    fn surface_extent(&self) -> (u32, u32) {
        self.state.borrow().size
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<NativeId, String> {
        let mut state = self.state.borrow_mut();
        if desc.render_target {
            state.store_target(desc.width, desc.height)
        } else {
            let blank = vec![0; desc.width as usize * desc.height as usize * 4];
            let id = state.store_texture(desc.width, desc.height, &blank);
            // The upload that follows counts, not the allocation.
            state.texture_uploads -= 1;
            Ok(id)
        }
    }

    fn upload(&mut self, texture: NativeId, origin: [u32; 2], width: u32, height: u32, rgba: &[u8]) {
        let mut state = self.state.borrow_mut();
        let whole = state
            .textures
            .get(&texture)
            .is_some_and(|t| origin == [0, 0] && t.width == width && t.height == height);
        if whole {
            state.texture_uploads += 1;
            if let Some(t) = state.textures.get_mut(&texture) {
                t.pixels = rgba.to_vec();
            }
        } else {
            state.write_region(texture, origin, width, height, rgba);
        }
    }

    fn create_shader_pipeline(&mut self, _label: &str, spirv: &[u32], _uniform_size: u64) -> Result<NativeId, String> {
        self.state
            .borrow_mut()
            .store_program(ProgramRecord::SpirV { words: spirv.len() })
    }

    fn release(&mut self, resource: NativeId) {
        self.state.borrow_mut().release(resource);
    }

    fn submit(&mut self, commands: &[NativeCommand<'_>]) {
        let mut state = self.state.borrow_mut();
        let mut target = 0;
        let mut program = 0;
        let mut uniforms: &[u8] = &[];
        let mut channels = [0u64; 4];
        for command in commands {
            match *command {
                NativeCommand::BeginPass { target: t, clear } => {
                    target = t;
                    if clear.is_some() {
                        state.clears += 1;
                    }
                }
                NativeCommand::SetPipeline(p) => program = p,
                NativeCommand::SetUniforms(bytes) => uniforms = bytes,
                NativeCommand::BindTexture { slot, texture } => {
                    if let Some(c) = channels.get_mut(slot as usize) {
                        *c = texture;
                    }
                }
                NativeCommand::DrawFullscreen => state.push_draw(DrawRecord {
                    target,
                    program,
                    uniforms: uniforms.to_vec(),
                    channels,
                }),
                NativeCommand::EndPass => {}
                NativeCommand::BlitToSurface { alpha, .. } => state.composites.push(alpha),
                NativeCommand::DrawGui(_) => state.gui_batches += 1,
            }
        }
    }

    fn present(&mut self) {
        self.state.borrow_mut().frames_presented += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_list_is_replayed_into_draw_records() {
        let (_, probe) = HeadlessHost::command_encoder(4, 4);
        let mut host = HeadlessHost { state: probe.state.clone() };
        let uniforms = [1u8, 2, 3, 4];
        host.submit(&[
            NativeCommand::BeginPass { target: 7, clear: Some([0.0; 4]) },
            NativeCommand::SetPipeline(9),
            NativeCommand::SetUniforms(&uniforms),
            NativeCommand::BindTexture { slot: 2, texture: 11 },
            NativeCommand::DrawFullscreen,
            NativeCommand::EndPass,
            NativeCommand::BlitToSurface { texture: 7, alpha: 0.5 },
        ]);
        let draw = probe.last_draw().unwrap();
        assert_eq!(draw.target, 7);
        assert_eq!(draw.program, 9);
        assert_eq!(draw.uniforms, vec![1, 2, 3, 4]);
        assert_eq!(draw.channels, [0, 0, 11, 0]);
        assert_eq!(probe.clears(), 1);
        assert_eq!(probe.composites(), vec![0.5]);
    }

    #[test]
    fn test_region_writes_patch_stored_pixels() {
        let (_, probe) = HeadlessHost::render_targets(4, 4);
        let mut host = HeadlessHost { state: probe.state.clone() };
        let id = RenderTargetApi::create_texture(&mut host, "t", 2, 2, &[0; 16]).unwrap();
        RenderTargetApi::write_texture(&mut host, id, [1, 1], 1, 1, &[9, 9, 9, 9]);
        let pixels = probe.texture_pixels(id).unwrap();
        assert_eq!(&pixels[12..16], &[9, 9, 9, 9]);
        assert_eq!(&pixels[0..4], &[0, 0, 0, 0]);
        assert_eq!(probe.texture_writes(), 1);
    }
}
