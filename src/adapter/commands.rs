//! Adapter for host releases 1.21.6 to 1.21.10 (command-encoder API).

use super::native::{CommandApi, GuiBatch, NativeCommand, TextureDesc};
use super::{clamp_clip, DrawContext, DrawOp, OverlayCommands, ProgramHandle, SurfaceHandle, TextureHandle};
use crate::error::HostError;
use crate::shader::{CompiledShader, ShaderCode, ShaderLanguage, ShaderTarget};

pub struct CommandAdapter {
    api: Box<dyn CommandApi>,
}

impl CommandAdapter {
    pub(super) fn new(api: Box<dyn CommandApi>) -> Self {
        Self { api }
    }

    pub(super) fn shader_target(&self) -> ShaderTarget {
        ShaderTarget {
            language: ShaderLanguage::SpirV,
            flip_frag_coord: true,
        }
    }

    pub(super) fn frame_size(&self) -> (u32, u32) {
        self.api.surface_extent()
    }

    pub(super) fn begin_frame(&mut self) -> (u32, u32) {
        self.api.surface_extent()
    }

    pub(super) fn upload_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<u64, HostError> {
        let desc = TextureDesc {
            label: "canvas_glsl:texture",
            width,
            height,
            render_target: false,
        };
        let id = self
            .api
            .create_texture(&desc)
            .map_err(|reason| HostError { call: "create_texture", reason })?;
        self.api.upload(id, [0, 0], width, height, pixels);
        Ok(id)
    }

    pub(super) fn write_texture(&mut self, texture: TextureHandle, origin: [u32; 2], width: u32, height: u32, pixels: &[u8]) {
        self.api.upload(texture.id(), origin, width, height, pixels);
    }

    pub(super) fn release_texture(&mut self, texture: TextureHandle) {
        self.api.release(texture.id());
    }

    pub(super) fn create_surface(&mut self, width: u32, height: u32) -> Result<SurfaceHandle, String> {
        let id = self.api.create_texture(&TextureDesc {
            label: "canvas_glsl:canvas",
            width,
            height,
            render_target: true,
        })?;
        Ok(SurfaceHandle {
            target: id,
            texture: TextureHandle::new(id, width, height),
        })
    }

    pub(super) fn release_surface(&mut self, surface: SurfaceHandle) {
        self.api.release(surface.target);
    }

    pub(super) fn create_program(&mut self, shader: &CompiledShader) -> Result<u64, String> {
        let ShaderCode::SpirV(words) = &shader.code else {
            return Err(format!("{} program cannot be used by a command-encoder host", shader.code.language_name()));
        };
        self.api
            .create_shader_pipeline("canvas_glsl:program", words, shader.uniform_size())
    }

    pub(super) fn release_program(&mut self, program: ProgramHandle) {
        self.api.release(program.0);
    }

    pub(super) fn submit_draw(&mut self, surface: SurfaceHandle, alpha: f32, ctx: &DrawContext) {
        let mut commands = Vec::with_capacity(ctx.ops().len() * 8 + 1);
        for op in ctx.ops() {
            match op {
                DrawOp::Clear { target, color } => {
                    commands.push(NativeCommand::BeginPass {
                        target: target.target,
                        clear: Some(*color),
                    });
                    commands.push(NativeCommand::EndPass);
                }
                DrawOp::Shade(pass) => {
                    commands.push(NativeCommand::BeginPass {
                        target: pass.target.target,
                        clear: None,
                    });
                    commands.push(NativeCommand::SetPipeline(pass.program.0));
                    commands.push(NativeCommand::SetUniforms(&pass.uniforms));
                    for (slot, texture) in pass.channels.iter().enumerate() {
                        commands.push(NativeCommand::BindTexture {
                            slot: slot as u32,
                            texture: texture.id(),
                        });
                    }
                    commands.push(NativeCommand::DrawFullscreen);
                    commands.push(NativeCommand::EndPass);
                }
            }
        }
        commands.push(NativeCommand::BlitToSurface {
            texture: surface.texture.id(),
            alpha,
        });
        self.api.submit(&commands);
    }

    pub(super) fn composite_overlay(&mut self, overlay: &OverlayCommands, ctx: &DrawContext) {
        let commands: Vec<NativeCommand<'_>> = overlay
            .meshes
            .iter()
            .filter_map(|mesh| {
                let scissor = clamp_clip(mesh.clip, ctx.frame_size())?;
                Some(NativeCommand::DrawGui(GuiBatch {
                    texture: mesh.texture.id(),
                    scissor,
                    vertices: &mesh.vertices,
                    indices: &mesh.indices,
                }))
            })
            .collect();
        self.api.submit(&commands);
    }

    pub(super) fn end_frame(&mut self, _ctx: DrawContext) {
        self.api.present();
    }
}
