//! Adapter for host releases 1.21 to 1.21.1 (GL-style API).

use super::native::{GuiBatch, LegacyFramebuffer, LegacyGlApi, LegacyProgramSource};
use super::{clamp_clip, DrawContext, DrawOp, OverlayCommands, ProgramHandle, SurfaceHandle, TextureHandle};
use crate::error::HostError;
use crate::shader::{CompiledShader, ShaderCode, ShaderLanguage, ShaderTarget};

/// Fullscreen triangle generated from `gl_VertexID`.
const VERTEX_GLSL: &str = r#"#version 330 core
const vec2 POSITIONS[3] = vec2[3](vec2(-1.0, -1.0), vec2(3.0, -1.0), vec2(-1.0, 3.0));
void main() {
    gl_Position = vec4(POSITIONS[gl_VertexID], 0.0, 1.0);
}
"#;

pub struct LegacyAdapter {
    api: Box<dyn LegacyGlApi>,
}

impl LegacyAdapter {
    pub(super) fn new(api: Box<dyn LegacyGlApi>) -> Self {
        Self { api }
    }

    pub(super) fn shader_target(&self) -> ShaderTarget {
        // GL framebuffers already have a bottom-left origin.
        ShaderTarget {
            language: ShaderLanguage::Glsl330,
            flip_frag_coord: false,
        }
    }

    pub(super) fn frame_size(&self) -> (u32, u32) {
        self.api.framebuffer_size()
    }

    pub(super) fn begin_frame(&mut self) -> (u32, u32) {
        self.api.framebuffer_size()
    }

    pub(super) fn upload_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<u64, HostError> {
        self.api
            .gen_texture(width, height, pixels)
            .map(u64::from)
            .map_err(|reason| HostError { call: "glTexImage2D", reason })
    }

    pub(super) fn write_texture(&mut self, texture: TextureHandle, origin: [u32; 2], width: u32, height: u32, pixels: &[u8]) {
        self.api
            .tex_sub_image(texture.id() as u32, origin[0], origin[1], width, height, pixels);
    }

    pub(super) fn release_texture(&mut self, texture: TextureHandle) {
        self.api.delete_texture(texture.id() as u32);
    }

    pub(super) fn create_surface(&mut self, width: u32, height: u32) -> Result<SurfaceHandle, String> {
        let fb = self.api.gen_framebuffer(width, height)?;
        Ok(SurfaceHandle {
            target: u64::from(fb.fbo),
            texture: TextureHandle::new(u64::from(fb.color_texture), width, height),
        })
    }

    pub(super) fn release_surface(&mut self, surface: SurfaceHandle) {
        self.api.delete_framebuffer(LegacyFramebuffer {
            fbo: surface.target as u32,
            color_texture: surface.texture.id() as u32,
        });
    }

    pub(super) fn create_program(&mut self, shader: &CompiledShader) -> Result<u64, String> {
        let ShaderCode::Glsl {
            fragment,
            uniform_block,
            samplers,
        } = &shader.code
        else {
            return Err(format!("{} program cannot be linked by a GL host", shader.code.language_name()));
        };
        let source = LegacyProgramSource {
            vertex: VERTEX_GLSL,
            fragment,
            uniform_block: uniform_block.as_deref(),
            samplers,
        };
        self.api.link_program(&source).map(u64::from)
    }

    pub(super) fn release_program(&mut self, program: ProgramHandle) {
        self.api.delete_program(program.0 as u32);
    }

    pub(super) fn submit_draw(&mut self, surface: SurfaceHandle, alpha: f32, ctx: &DrawContext) {
        for op in ctx.ops() {
            match op {
                DrawOp::Clear { target, color } => self.api.clear_framebuffer(target.target as u32, *color),
                DrawOp::Shade(pass) => {
                    let textures = pass.channels.map(|t| t.id() as u32);
                    let viewport = (pass.target.texture.width(), pass.target.texture.height());
                    self.api.draw_fullscreen(
                        pass.target.target as u32,
                        viewport,
                        pass.program.0 as u32,
                        &pass.uniforms,
                        &textures,
                    );
                }
            }
        }
        self.api.blit_to_main(surface.texture.id() as u32, alpha);
    }

    pub(super) fn composite_overlay(&mut self, overlay: &OverlayCommands, ctx: &DrawContext) {
        let (_, frame_height) = ctx.frame_size();
        for mesh in &overlay.meshes {
            let Some([x, y, w, h]) = clamp_clip(mesh.clip, ctx.frame_size()) else {
                continue;
            };
            // glScissor counts rows from the bottom.
            let scissor = [x, frame_height - (y + h), w, h];
            self.api.draw_gui(&GuiBatch {
                texture: mesh.texture.id(),
                scissor,
                vertices: &mesh.vertices,
                indices: &mesh.indices,
            });
        }
    }

    pub(super) fn end_frame(&mut self, _ctx: DrawContext) {}
}
