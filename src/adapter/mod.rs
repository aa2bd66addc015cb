//! Version adapter: the single seam between the canvas core and the host.
//!
//! One [`VersionAdapter`] variant exists per supported host release family.
//! The variant is selected once from the host version string and never
//! changes during a session. No other module calls native host APIs.

mod commands;
pub mod headless;
mod legacy;
pub mod native;
mod targets;

pub use commands::CommandAdapter;
pub use legacy::LegacyAdapter;
pub use native::{GuiVertex, NativeHost};
pub use targets::TargetAdapter;

use crate::error::{AdapterSelectionError, HostError, SurfaceAllocationError};
use crate::shader::{CompiledShader, ShaderTarget};
use crate::surface::CanvasSurface;
use std::fmt;
use tracing::info;

/// Supported host release families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostRelease {
    /// 1.21 to 1.21.1
    V1_21,
    /// 1.21.2 to 1.21.5
    V1_21_4,
    /// 1.21.6 to 1.21.10
    V1_21_10,
}

impl HostRelease {
    /// Parses a host version string such as `1.21.4`, `1.21` or `1.21.10-rc1`.
    pub fn detect(version: &str) -> Result<Self, AdapterSelectionError> {
        let trimmed = version.trim();
        let numeric: String = trimmed
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let parts: Vec<&str> = numeric.split('.').filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(AdapterSelectionError::Unparseable(version.to_string()));
        }
        let mut nums = [0u32; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| AdapterSelectionError::Unparseable(version.to_string()))?;
        }

        match nums {
            [1, 21, 0..=1] => Ok(HostRelease::V1_21),
            [1, 21, 2..=5] => Ok(HostRelease::V1_21_4),
            [1, 21, 6..=10] => Ok(HostRelease::V1_21_10),
            _ => Err(AdapterSelectionError::UnsupportedVersion(trimmed.to_string())),
        }
    }

    /// Native binding this release family is driven through.
    pub fn binding_name(&self) -> &'static str {
        match self {
            HostRelease::V1_21 => native::LEGACY_GL,
            HostRelease::V1_21_4 => native::RENDER_TARGETS,
            HostRelease::V1_21_10 => native::COMMAND_ENCODER,
        }
    }
}

impl fmt::Display for HostRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HostRelease::V1_21 => "1.21",
            HostRelease::V1_21_4 => "1.21.4",
            HostRelease::V1_21_10 => "1.21.10",
        })
    }
}

/// Texture owned by the host, with its pixel extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    id: u64,
    width: u32,
    height: u32,
}

impl TextureHandle {
    pub(crate) fn new(id: u64, width: u32, height: u32) -> Self {
        Self { id, width, height }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

impl ProgramHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Render target plus the texture it can be sampled as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle {
    pub(crate) target: u64,
    pub(crate) texture: TextureHandle,
}

impl SurfaceHandle {
    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }
}

/// Full-surface draw with one program.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawPass {
    pub target: SurfaceHandle,
    pub program: ProgramHandle,
    /// std140 uniform block bytes.
    pub uniforms: Vec<u8>,
    pub channels: [TextureHandle; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Clear { target: SurfaceHandle, color: [f32; 4] },
    Shade(DrawPass),
}

/// Per-frame draw recording handed between pipeline, surface and adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawContext {
    frame_size: (u32, u32),
    ops: Vec<DrawOp>,
}

impl DrawContext {
    pub fn new(frame_size: (u32, u32)) -> Self {
        Self {
            frame_size,
            ops: Vec::new(),
        }
    }

    /// Size of the host frame this context composites into.
    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    pub fn push(&mut self, op: DrawOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    /// Drops recorded work so a failed tick leaves the surface untouched.
    pub fn discard(&mut self) {
        self.ops.clear();
    }
}

/// Clip rectangle in logical pixels with a top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayMesh {
    pub texture: TextureHandle,
    pub clip: ClipRect,
    pub vertices: Vec<GuiVertex>,
    pub indices: Vec<u32>,
}

/// Draw commands produced by the editor overlay for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayCommands {
    pub meshes: Vec<OverlayMesh>,
}

impl OverlayCommands {
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

/// Host facade, one variant per release family.
pub enum VersionAdapter {
    Legacy(LegacyAdapter),
    Targets(TargetAdapter),
    Commands(CommandAdapter),
}

macro_rules! dispatch {
    ($self:expr, $a:ident => $body:expr) => {
        match $self {
            VersionAdapter::Legacy($a) => $body,
            VersionAdapter::Targets($a) => $body,
            VersionAdapter::Commands($a) => $body,
        }
    };
}

impl VersionAdapter {
    /// Selects the adapter variant for `version` and binds it to `host`.
    pub fn select(version: &str, host: NativeHost) -> Result<Self, AdapterSelectionError> {
        let release = HostRelease::detect(version)?;
        let mismatch = |actual: &'static str| AdapterSelectionError::BindingMismatch {
            release: release.to_string(),
            expected: release.binding_name(),
            actual,
        };

        let adapter = match (release, host) {
            (HostRelease::V1_21, NativeHost::LegacyGl(api)) => VersionAdapter::Legacy(LegacyAdapter::new(api)),
            (HostRelease::V1_21_4, NativeHost::RenderTargets(api)) => VersionAdapter::Targets(TargetAdapter::new(api)),
            (HostRelease::V1_21_10, NativeHost::CommandEncoder(api)) => VersionAdapter::Commands(CommandAdapter::new(api)),
            (_, other) => return Err(mismatch(other.binding_name())),
        };
        info!("Selected {} adapter for host version {}", release.binding_name(), version.trim());
        Ok(adapter)
    }

    pub fn release(&self) -> HostRelease {
        match self {
            VersionAdapter::Legacy(_) => HostRelease::V1_21,
            VersionAdapter::Targets(_) => HostRelease::V1_21_4,
            VersionAdapter::Commands(_) => HostRelease::V1_21_10,
        }
    }

    /// Language and coordinate convention programs must be compiled for.
    pub fn shader_target(&self) -> ShaderTarget {
        dispatch!(self, a => a.shader_target())
    }

    /// Current host frame size in pixels.
    pub fn frame_size(&self) -> (u32, u32) {
        dispatch!(self, a => a.frame_size())
    }

    /// Starts a host frame and returns the context draws are recorded into.
    pub fn acquire_draw_context(&mut self) -> DrawContext {
        let size = dispatch!(self, a => a.begin_frame());
        DrawContext::new(size)
    }

    /// Uploads RGBA rows in memory order.
    pub fn upload_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<TextureHandle, HostError> {
        check_pixels("upload_texture", pixels, width, height)?;
        let id = dispatch!(self, a => a.upload_texture(pixels, width, height))?;
        Ok(TextureHandle::new(id, width, height))
    }

    /// Overwrites a region of an existing texture.
    pub fn write_texture(
        &mut self,
        texture: TextureHandle,
        origin: [u32; 2],
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), HostError> {
        check_pixels("write_texture", pixels, width, height)?;
        let exceeds = |start: u32, len: u32, limit: u32| start.checked_add(len).map_or(true, |end| end > limit);
        if exceeds(origin[0], width, texture.width) || exceeds(origin[1], height, texture.height) {
            return Err(HostError {
                call: "write_texture",
                reason: format!(
                    "region {}x{} at {:?} exceeds {}x{} texture",
                    width, height, origin, texture.width, texture.height
                ),
            });
        }
        dispatch!(self, a => a.write_texture(texture, origin, width, height, pixels));
        Ok(())
    }

    pub fn release_texture(&mut self, texture: TextureHandle) {
        dispatch!(self, a => a.release_texture(texture))
    }

    pub fn create_surface(&mut self, width: u32, height: u32) -> Result<SurfaceHandle, SurfaceAllocationError> {
        dispatch!(self, a => a.create_surface(width, height)).map_err(|reason| SurfaceAllocationError {
            width,
            height,
            reason,
        })
    }

    pub fn release_surface(&mut self, surface: SurfaceHandle) {
        dispatch!(self, a => a.release_surface(surface))
    }

    /// Hands a compiled program to the host. The error is the host's log.
    pub fn create_program(&mut self, shader: &CompiledShader) -> Result<ProgramHandle, String> {
        dispatch!(self, a => a.create_program(shader)).map(ProgramHandle)
    }

    pub fn release_program(&mut self, program: ProgramHandle) {
        dispatch!(self, a => a.release_program(program))
    }

    /// Executes recorded draws and composites the surface into the host frame.
    pub fn submit_draw(&mut self, surface: &CanvasSurface, ctx: &DrawContext) -> Result<(), HostError> {
        let Some(handle) = surface.handle() else {
            return Err(HostError {
                call: "submit_draw",
                reason: "surface is not allocated".to_string(),
            });
        };
        dispatch!(self, a => a.submit_draw(handle, surface.alpha(), ctx));
        Ok(())
    }

    /// Draws overlay meshes on top of the composited canvas.
    pub fn composite_overlay(&mut self, overlay: &OverlayCommands, ctx: &DrawContext) {
        if overlay.is_empty() {
            return;
        }
        dispatch!(self, a => a.composite_overlay(overlay, ctx))
    }

    /// Ends the host frame started by [`Self::acquire_draw_context`].
    pub fn finish_frame(&mut self, ctx: DrawContext) {
        dispatch!(self, a => a.end_frame(ctx))
    }
}

fn check_pixels(call: &'static str, pixels: &[u8], width: u32, height: u32) -> Result<(), HostError> {
    let expected = width as usize * height as usize * 4;
    if width == 0 || height == 0 || pixels.len() != expected {
        return Err(HostError {
            call,
            reason: format!("{} bytes do not describe a {}x{} RGBA image", pixels.len(), width, height),
        });
    }
    Ok(())
}

/// Converts a top-left clip rectangle to a scissor within `frame`.
pub(crate) fn clamp_clip(clip: ClipRect, frame: (u32, u32)) -> Option<[u32; 4]> {
    let x0 = clip.x.min(frame.0);
    let y0 = clip.y.min(frame.1);
    let x1 = (clip.x + clip.width).min(frame.0);
    let y1 = (clip.y + clip.height).min(frame.1);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some([x0, y0, x1 - x0, y1 - y0])
}

#[cfg(test)]
mod tests {
    use super::headless::HeadlessHost;
    use super::*;

    #[test]
    fn test_detects_release_families() {
        assert_eq!(HostRelease::detect("1.21").unwrap(), HostRelease::V1_21);
        assert_eq!(HostRelease::detect("1.21.1").unwrap(), HostRelease::V1_21);
        assert_eq!(HostRelease::detect("1.21.4").unwrap(), HostRelease::V1_21_4);
        assert_eq!(HostRelease::detect(" 1.21.5-pre2 ").unwrap(), HostRelease::V1_21_4);
        assert_eq!(HostRelease::detect("1.21.10").unwrap(), HostRelease::V1_21_10);
        assert_eq!(HostRelease::detect("1.21.8+build.7").unwrap(), HostRelease::V1_21_10);
    }

    #[test]
    fn test_rejects_unsupported_versions() {
        assert!(matches!(
            HostRelease::detect("1.20.6"),
            Err(AdapterSelectionError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            HostRelease::detect("1.21.11"),
            Err(AdapterSelectionError::UnsupportedVersion(_))
        ));
        assert!(matches!(HostRelease::detect("snapshot"), Err(AdapterSelectionError::Unparseable(_))));
        assert!(matches!(HostRelease::detect("1"), Err(AdapterSelectionError::Unparseable(_))));
    }

    #[test]
    fn test_select_requires_matching_binding() {
        let (host, _probe) = HeadlessHost::legacy(64, 64);
        let err = VersionAdapter::select("1.21.4", host).err().unwrap();
        assert!(matches!(err, AdapterSelectionError::BindingMismatch { actual: "legacy-gl", .. }));

        let (host, _probe) = HeadlessHost::render_targets(64, 64);
        let adapter = VersionAdapter::select("1.21.4", host).unwrap();
        assert_eq!(adapter.release(), HostRelease::V1_21_4);
    }

    #[test]
    fn test_shader_targets_differ_per_release() {
        let (host, _) = HeadlessHost::legacy(8, 8);
        let legacy = VersionAdapter::select("1.21", host).unwrap();
        let (host, _) = HeadlessHost::command_encoder(8, 8);
        let commands = VersionAdapter::select("1.21.10", host).unwrap();
        assert!(!legacy.shader_target().flip_frag_coord);
        assert!(commands.shader_target().flip_frag_coord);
        assert_ne!(legacy.shader_target().language, commands.shader_target().language);
    }

    #[test]
    fn test_upload_rejects_mismatched_pixels() {
        let (host, probe) = HeadlessHost::render_targets(8, 8);
        let mut adapter = VersionAdapter::select("1.21.4", host).unwrap();
        assert!(adapter.upload_texture(&[0; 12], 2, 2).is_err());
        let tex = adapter.upload_texture(&[0; 16], 2, 2).unwrap();
        assert_eq!((tex.width(), tex.height()), (2, 2));
        assert_eq!(probe.live_textures(), 1);
        assert!(adapter.write_texture(tex, [1, 1], 2, 2, &[0; 16]).is_err());
        assert!(adapter.write_texture(tex, [u32::MAX, 0], 1, 1, &[0; 4]).is_err());
        assert!(adapter.write_texture(tex, [0, u32::MAX], 1, 1, &[0; 4]).is_err());
        adapter.release_texture(tex);
        assert_eq!(probe.live_textures(), 0);
    }

    #[test]
    fn test_clamp_clip() {
        let clip = ClipRect { x: 10, y: 10, width: 100, height: 100 };
        assert_eq!(clamp_clip(clip, (50, 40)), Some([10, 10, 40, 30]));
        let outside = ClipRect { x: 60, y: 0, width: 5, height: 5 };
        assert_eq!(clamp_clip(outside, (50, 40)), None);
    }
}
