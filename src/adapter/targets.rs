//! Adapter for host releases 1.21.2 to 1.21.5 (render-target API).

use super::native::{GuiBatch, RenderTargetApi};
use super::{clamp_clip, DrawContext, DrawOp, OverlayCommands, ProgramHandle, SurfaceHandle, TextureHandle};
use crate::error::HostError;
use crate::shader::{CompiledShader, ShaderCode, ShaderLanguage, ShaderTarget};

pub struct TargetAdapter {
    api: Box<dyn RenderTargetApi>,
    next_label: u64,
}

impl TargetAdapter {
    pub(super) fn new(api: Box<dyn RenderTargetApi>) -> Self {
        Self { api, next_label: 0 }
    }

    fn label(&mut self, kind: &str) -> String {
        self.next_label += 1;
        format!("canvas_glsl:{}_{}", kind, self.next_label)
    }

    pub(super) fn shader_target(&self) -> ShaderTarget {
        ShaderTarget {
            language: ShaderLanguage::Wgsl,
            flip_frag_coord: true,
        }
    }

    pub(super) fn frame_size(&self) -> (u32, u32) {
        self.api.window_size()
    }

    pub(super) fn begin_frame(&mut self) -> (u32, u32) {
        self.api.begin_frame();
        self.api.window_size()
    }

    pub(super) fn upload_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<u64, HostError> {
        let label = self.label("texture");
        self.api
            .create_texture(&label, width, height, pixels)
            .map_err(|reason| HostError { call: "create_texture", reason })
    }

    pub(super) fn write_texture(&mut self, texture: TextureHandle, origin: [u32; 2], width: u32, height: u32, pixels: &[u8]) {
        self.api.write_texture(texture.id(), origin, width, height, pixels);
    }

    pub(super) fn release_texture(&mut self, texture: TextureHandle) {
        self.api.destroy(texture.id());
    }

    pub(super) fn create_surface(&mut self, width: u32, height: u32) -> Result<SurfaceHandle, String> {
        let label = self.label("canvas");
        let id = self.api.create_render_target(&label, width, height)?;
        Ok(SurfaceHandle {
            target: id,
            texture: TextureHandle::new(id, width, height),
        })
    }

    pub(super) fn release_surface(&mut self, surface: SurfaceHandle) {
        self.api.destroy(surface.target);
    }

    pub(super) fn create_program(&mut self, shader: &CompiledShader) -> Result<u64, String> {
        let ShaderCode::Wgsl(wgsl) = &shader.code else {
            return Err(format!("{} program cannot be used by a render-target host", shader.code.language_name()));
        };
        let label = self.label("program");
        self.api.create_pipeline(&label, wgsl, shader.uniform_size())
    }

    pub(super) fn release_program(&mut self, program: ProgramHandle) {
        self.api.destroy(program.0);
    }

    pub(super) fn submit_draw(&mut self, surface: SurfaceHandle, alpha: f32, ctx: &DrawContext) {
        for op in ctx.ops() {
            match op {
                DrawOp::Clear { target, color } => self.api.clear_target(target.target, *color),
                DrawOp::Shade(pass) => {
                    let channels = pass.channels.map(|t| t.id());
                    self.api
                        .render_to_target(pass.target.target, pass.program.0, &pass.uniforms, &channels);
                }
            }
        }
        self.api.composite_target(surface.target, alpha);
    }

    pub(super) fn composite_overlay(&mut self, overlay: &OverlayCommands, ctx: &DrawContext) {
        let batches: Vec<GuiBatch<'_>> = overlay
            .meshes
            .iter()
            .filter_map(|mesh| {
                let scissor = clamp_clip(mesh.clip, ctx.frame_size())?;
                Some(GuiBatch {
                    texture: mesh.texture.id(),
                    scissor,
                    vertices: &mesh.vertices,
                    indices: &mesh.indices,
                })
            })
            .collect();
        self.api.submit_gui(&batches);
    }

    pub(super) fn end_frame(&mut self, _ctx: DrawContext) {
        self.api.end_frame();
    }
}
