//! Native host API surfaces, one trait per host API family.
//!
//! These are the only calls that reach the host. Implementations live in the
//! host application (or in [`super::headless`] and the preview binary).

use bytemuck::{Pod, Zeroable};

/// Opaque resource id issued by render-target and command-encoder hosts.
pub type NativeId = u64;

/// Vertex of an overlay mesh, in logical screen pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GuiVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    /// Premultiplied sRGB color.
    pub color: [u8; 4],
}

/// One textured, clipped triangle list for the overlay.
#[derive(Debug, Clone, Copy)]
pub struct GuiBatch<'a> {
    pub texture: NativeId,
    /// Scissor rectangle `[x, y, width, height]` in the host's origin convention.
    pub scissor: [u32; 4],
    pub vertices: &'a [GuiVertex],
    pub indices: &'a [u32],
}

/// GL-style framebuffer object with its color attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyFramebuffer {
    pub fbo: u32,
    pub color_texture: u32,
}

/// Program text handed to a legacy host for linking.
#[derive(Debug, Clone)]
pub struct LegacyProgramSource<'a> {
    pub vertex: &'a str,
    pub fragment: &'a str,
    /// Name of the uniform block holding the canvas parameters.
    pub uniform_block: Option<&'a str>,
    /// Sampler uniform name per channel unit.
    pub samplers: &'a [Option<String>; 4],
}

/// Host releases 1.21 to 1.21.1: GL-style integer object names, programs
/// linked from GLSL 330 text, bottom-left framebuffer origin.
pub trait LegacyGlApi {
    fn framebuffer_size(&self) -> (u32, u32);
    /// Uploads rows in memory order.
    fn gen_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<u32, String>;
    fn tex_sub_image(&mut self, texture: u32, x: u32, y: u32, width: u32, height: u32, rgba: &[u8]);
    fn delete_texture(&mut self, texture: u32);
    fn gen_framebuffer(&mut self, width: u32, height: u32) -> Result<LegacyFramebuffer, String>;
    fn delete_framebuffer(&mut self, framebuffer: LegacyFramebuffer);
    /// Returns the program name or the link info log.
    fn link_program(&mut self, source: &LegacyProgramSource<'_>) -> Result<u32, String>;
    fn delete_program(&mut self, program: u32);
    fn clear_framebuffer(&mut self, fbo: u32, color: [f32; 4]);
    fn draw_fullscreen(&mut self, fbo: u32, viewport: (u32, u32), program: u32, uniform_block: &[u8], textures: &[u32; 4]);
    fn blit_to_main(&mut self, color_texture: u32, alpha: f32);
    fn draw_gui(&mut self, batch: &GuiBatch<'_>);
}

/// Host releases 1.21.2 to 1.21.5: opaque resource ids, WGSL fragment programs,
/// explicit frame begin/end.
pub trait RenderTargetApi {
    fn window_size(&self) -> (u32, u32);
    fn create_texture(&mut self, label: &str, width: u32, height: u32, rgba: &[u8]) -> Result<NativeId, String>;
    fn write_texture(&mut self, texture: NativeId, origin: [u32; 2], width: u32, height: u32, rgba: &[u8]);
    /// A render target is also sampleable under the same id.
    fn create_render_target(&mut self, label: &str, width: u32, height: u32) -> Result<NativeId, String>;
    fn create_pipeline(&mut self, label: &str, fragment_wgsl: &str, uniform_size: u64) -> Result<NativeId, String>;
    fn destroy(&mut self, resource: NativeId);
    fn begin_frame(&mut self);
    fn clear_target(&mut self, target: NativeId, color: [f32; 4]);
    fn render_to_target(&mut self, target: NativeId, pipeline: NativeId, uniforms: &[u8], channels: &[NativeId; 4]);
    fn composite_target(&mut self, target: NativeId, alpha: f32);
    fn submit_gui(&mut self, batches: &[GuiBatch<'_>]);
    fn end_frame(&mut self);
}

/// Texture creation parameters for command-encoder hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub render_target: bool,
}

/// Recorded command for command-encoder hosts.
#[derive(Debug, Clone, Copy)]
pub enum NativeCommand<'a> {
    BeginPass { target: NativeId, clear: Option<[f32; 4]> },
    SetPipeline(NativeId),
    SetUniforms(&'a [u8]),
    BindTexture { slot: u32, texture: NativeId },
    DrawFullscreen,
    EndPass,
    BlitToSurface { texture: NativeId, alpha: f32 },
    DrawGui(GuiBatch<'a>),
}

/// Host releases 1.21.6 to 1.21.10: SPIR-V programs and recorded command lists.
pub trait CommandApi {
    fn surface_extent(&self) -> (u32, u32);
    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<NativeId, String>;
    fn upload(&mut self, texture: NativeId, origin: [u32; 2], width: u32, height: u32, rgba: &[u8]);
    fn create_shader_pipeline(&mut self, label: &str, spirv: &[u32], uniform_size: u64) -> Result<NativeId, String>;
    fn release(&mut self, resource: NativeId);
    fn submit(&mut self, commands: &[NativeCommand<'_>]);
    fn present(&mut self);
}

/// The native binding the host hands over at startup.
pub enum NativeHost {
    LegacyGl(Box<dyn LegacyGlApi>),
    RenderTargets(Box<dyn RenderTargetApi>),
    CommandEncoder(Box<dyn CommandApi>),
}

impl NativeHost {
    pub fn binding_name(&self) -> &'static str {
        match self {
            NativeHost::LegacyGl(_) => LEGACY_GL,
            NativeHost::RenderTargets(_) => RENDER_TARGETS,
            NativeHost::CommandEncoder(_) => COMMAND_ENCODER,
        }
    }
}

impl std::fmt::Debug for NativeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeHost({})", self.binding_name())
    }
}

pub const LEGACY_GL: &str = "legacy-gl";
pub const RENDER_TARGETS: &str = "render-targets";
pub const COMMAND_ENCODER: &str = "command-encoder";
