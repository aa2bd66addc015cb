//! Hot-reloading shader pipeline.
//!
//! Source edits are only recorded by [`ShaderPipeline::set_source`]; the
//! compile happens on the next [`ShaderPipeline::tick`]. A new program
//! replaces the current one only after it has been fully built, so a broken
//! edit never interrupts rendering of the last good shader.

use super::channels::procedural_texture;
use super::compile::{compile, CompiledShader, ShaderTarget};
use super::uniforms::{
    channel_index, channel_name, is_builtin, BlockWriter, ChannelSource, FrameInputs, UniformKind, UniformLayout,
    UniformSlot, UniformValue,
};
use crate::adapter::{DrawContext, DrawOp, DrawPass, ProgramHandle, TextureHandle, VersionAdapter};
use crate::error::{CanvasError, CompileDiagnostic, HostError, ShaderCompileError, UniformError};
use crate::surface::CanvasSurface;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Samples channel 0 unchanged. Drawn until a user shader compiles.
const PASSTHROUGH: &str = r#"void mainImage(out vec4 fragColor, in vec2 fragCoord) {
    fragColor = texture(iChannel0, fragCoord / iResolution.xy);
}
"#;

/// Result of one [`ShaderPipeline::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileOutcome {
    /// Nothing to compile.
    Idle,
    /// A new program was swapped in.
    Compiled,
    /// The candidate failed; the previous program is still active.
    Failed,
}

/// A program the host accepted, plus what it was built from.
#[derive(Debug)]
struct ShaderProgram {
    handle: ProgramHandle,
    layout: UniformLayout,
    source: String,
}

pub struct ShaderPipeline {
    target: ShaderTarget,
    program: Option<ShaderProgram>,
    passthrough: ShaderProgram,
    candidate: String,
    dirty: bool,
    diagnostic: Option<CompileDiagnostic>,
    values: BTreeMap<String, UniformValue>,
    /// Names the user has written; these survive recompiles.
    explicit: BTreeSet<String>,
    /// Writes made before the first successful compile.
    pending: Vec<(String, UniformValue)>,
    procedural: HashMap<ChannelSource, TextureHandle>,
}

impl ShaderPipeline {
    /// Builds the pass-through program and the procedural channel textures.
    pub fn new(adapter: &mut VersionAdapter) -> Result<Self, CanvasError> {
        let target = adapter.shader_target();
        let shader = compile(PASSTHROUGH, target).map_err(|d| CanvasError::Placeholder(ShaderCompileError::from(d)))?;
        let handle = adapter.create_program(&shader).map_err(|reason| HostError {
            call: "create_program",
            reason,
        })?;
        let passthrough = ShaderProgram {
            handle,
            layout: shader.layout,
            source: PASSTHROUGH.to_string(),
        };

        let mut procedural = HashMap::new();
        for source in ChannelSource::ALL {
            let Some(frame) = procedural_texture(source) else {
                continue;
            };
            match adapter.upload_texture(&frame.data, frame.width, frame.height) {
                Ok(texture) => {
                    procedural.insert(source, texture);
                }
                Err(err) => {
                    for texture in procedural.into_values() {
                        adapter.release_texture(texture);
                    }
                    adapter.release_program(passthrough.handle);
                    return Err(err.into());
                }
            }
        }

        Ok(Self {
            target,
            program: None,
            passthrough,
            candidate: String::new(),
            dirty: false,
            diagnostic: None,
            values: BTreeMap::new(),
            explicit: BTreeSet::new(),
            pending: Vec::new(),
            procedural,
        })
    }

    /// Queues `text` for compilation on the next tick.
    pub fn set_source(&mut self, text: impl Into<String>) {
        self.candidate = text.into();
        self.dirty = true;
    }

    /// The editor buffer, compiled or not.
    pub fn source(&self) -> &str {
        &self.candidate
    }

    /// Source of the active program, if one ever compiled.
    pub fn active_source(&self) -> Option<&str> {
        self.program.as_ref().map(|p| p.source.as_str())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn has_program(&self) -> bool {
        self.program.is_some()
    }

    pub fn diagnostic(&self) -> Option<&CompileDiagnostic> {
        self.diagnostic.as_ref()
    }

    /// Compiles the candidate source if it changed since the last tick.
    pub fn tick(&mut self, adapter: &mut VersionAdapter) -> CompileOutcome {
        if !self.dirty {
            return CompileOutcome::Idle;
        }
        self.dirty = false;

        let shader = match compile(&self.candidate, self.target) {
            Ok(shader) => shader,
            Err(diagnostic) => {
                warn!("Shader compile failed: {}", diagnostic);
                self.diagnostic = Some(diagnostic);
                return CompileOutcome::Failed;
            }
        };
        let handle = match adapter.create_program(&shader) {
            Ok(handle) => handle,
            Err(log) => {
                let diagnostic = CompileDiagnostic::new(format!("host rejected program: {}", log));
                warn!("{}", diagnostic);
                self.diagnostic = Some(diagnostic);
                return CompileOutcome::Failed;
            }
        };

        self.rebuild_values(&shader);
        let program = ShaderProgram {
            handle,
            layout: shader.layout,
            source: self.candidate.clone(),
        };
        if let Some(previous) = self.program.replace(program) {
            adapter.release_program(previous.handle);
        }
        self.diagnostic = None;
        info!("Shader compiled ({} uniforms)", self.values.len());
        CompileOutcome::Compiled
    }

    /// New uniform table for `shader`: explicit writes carry over, everything
    /// else starts from the source default.
    fn rebuild_values(&mut self, shader: &CompiledShader) {
        let mut values = BTreeMap::new();
        for slot in shader.layout.user_slots() {
            let carried = self
                .explicit
                .contains(&slot.name)
                .then(|| self.values.get(&slot.name))
                .flatten()
                .and_then(|v| v.coerce(slot.kind));
            let value = carried.unwrap_or_else(|| default_value(shader, slot));
            values.insert(slot.name.clone(), value);
        }

        for (name, value) in std::mem::take(&mut self.pending) {
            match shader.layout.get(&name).and_then(|slot| value.coerce(slot.kind)) {
                Some(value) => {
                    values.insert(name.clone(), value);
                    self.explicit.insert(name);
                }
                None => warn!("Dropping buffered uniform {:?}: not declared by the shader", name),
            }
        }
        self.explicit.retain(|name| values.contains_key(name));
        self.values = values;
    }

    /// Writes a uniform. Before the first successful compile writes are
    /// buffered and applied once a program exists.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> Result<(), UniformError> {
        let value = value.into();
        if is_builtin(name) {
            return Err(UniformError::Builtin(name.to_string()));
        }
        let Some(program) = &self.program else {
            self.pending.retain(|(n, _)| n != name);
            self.pending.push((name.to_string(), value));
            debug!("Buffered uniform {} until the first compile", name);
            return Ok(());
        };
        let Some(slot) = program.layout.get(name) else {
            return Err(UniformError::Unknown(name.to_string()));
        };
        let Some(value) = value.coerce(slot.kind) else {
            return Err(UniformError::TypeMismatch {
                name: name.to_string(),
                expected: slot.kind.name(),
                actual: value.kind().name(),
            });
        };
        self.values.insert(name.to_string(), value);
        self.explicit.insert(name.to_string());
        Ok(())
    }

    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.values.get(name).copied()
    }

    /// Editable uniforms of the active program with their current values.
    pub fn uniforms(&self) -> Vec<(UniformSlot, UniformValue)> {
        let Some(program) = &self.program else {
            return Vec::new();
        };
        program
            .layout
            .user_slots()
            .filter_map(|slot| Some((slot.clone(), *self.values.get(&slot.name)?)))
            .collect()
    }

    /// Source feeding each channel.
    pub fn channel_sources(&self) -> [ChannelSource; 4] {
        std::array::from_fn(|channel| match self.values.get(&channel_name(channel)) {
            Some(UniformValue::Channel(source)) => *source,
            _ => ChannelSource::default_for(channel),
        })
    }

    /// Records a full-surface draw with the active program, or the
    /// pass-through program if nothing has compiled yet.
    pub fn render(
        &self,
        ctx: &mut DrawContext,
        surface: &CanvasSurface,
        stream_frame: TextureHandle,
        inputs: &FrameInputs,
    ) -> Result<(), HostError> {
        let Some(target) = surface.handle() else {
            return Err(HostError {
                call: "render",
                reason: "canvas surface is not allocated".to_string(),
            });
        };
        let program = self.program.as_ref().unwrap_or(&self.passthrough);
        let sources = if self.program.is_some() {
            self.channel_sources()
        } else {
            [ChannelSource::Stream; 4]
        };

        let channels: [TextureHandle; 4] = std::array::from_fn(|channel| match sources[channel] {
            ChannelSource::Stream => stream_frame,
            source => self.procedural.get(&source).copied().unwrap_or(stream_frame),
        });
        let resolutions = channels.map(|t| [t.width() as f32, t.height() as f32, 1.0]);
        let channel_time = std::array::from_fn(|channel| match sources[channel] {
            ChannelSource::Stream => inputs.stream_time,
            _ => inputs.time,
        });

        let mut writer = BlockWriter::new(program.layout.block_size().max(16));
        writer.write_builtins(&program.layout, inputs, &resolutions, channel_time);
        if self.program.is_some() {
            for slot in program.layout.user_slots() {
                if let Some(value) = self.values.get(&slot.name) {
                    writer.write(slot, 0, value);
                }
            }
        }

        ctx.push(DrawOp::Shade(DrawPass {
            target,
            program: program.handle,
            uniforms: writer.finish(),
            channels,
        }));
        Ok(())
    }

    /// Releases every host handle the pipeline owns.
    pub fn release(&mut self, adapter: &mut VersionAdapter) {
        if let Some(program) = self.program.take() {
            adapter.release_program(program.handle);
        }
        adapter.release_program(self.passthrough.handle);
        for (_, texture) in self.procedural.drain() {
            adapter.release_texture(texture);
        }
    }
}

fn default_value(shader: &CompiledShader, slot: &UniformSlot) -> UniformValue {
    if slot.kind == UniformKind::Channel {
        let channel = channel_index(&slot.name).unwrap_or(0);
        return UniformValue::Channel(ChannelSource::default_for(channel));
    }
    shader
        .defaults
        .iter()
        .find(|(name, _)| *name == slot.name)
        .and_then(|(_, v)| v.coerce(slot.kind))
        .unwrap_or_else(|| UniformValue::zero(slot.kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::headless::{HeadlessHost, HeadlessProbe, ProgramRecord};

    const RED: &str = "void main(){gl_FragColor=vec4(1,0,0,1);}";
    const BROKEN: &str = "void main(){gl_FragColor=vec4(0,1,0,1);";

    struct Fixture {
        adapter: VersionAdapter,
        probe: HeadlessProbe,
        surface: CanvasSurface,
        frame: TextureHandle,
    }

    fn fixture(version: &str) -> Fixture {
        let release = crate::adapter::HostRelease::detect(version).unwrap();
        let (host, probe) = HeadlessHost::for_release(release, 64, 64);
        let mut adapter = VersionAdapter::select(version, host).unwrap();
        let mut surface = CanvasSurface::new(1.0, 1.0);
        surface.resize(&mut adapter, 64, 64).unwrap();
        let frame = adapter.upload_texture(&[255; 4], 1, 1).unwrap();
        Fixture {
            adapter,
            probe,
            surface,
            frame,
        }
    }

    fn render(f: &mut Fixture, pipeline: &ShaderPipeline) -> DrawPass {
        let mut ctx = f.adapter.acquire_draw_context();
        pipeline
            .render(&mut ctx, &f.surface, f.frame, &FrameInputs::default())
            .unwrap();
        let pass = match ctx.ops().last() {
            Some(DrawOp::Shade(pass)) => pass.clone(),
            other => panic!("expected a shade pass, got {:?}", other),
        };
        f.adapter.submit_draw(&f.surface, &ctx).unwrap();
        f.adapter.finish_frame(ctx);
        pass
    }

    #[test]
    fn test_set_source_defers_compilation() {
        let mut f = fixture("1.21.4");
        let mut pipeline = ShaderPipeline::new(&mut f.adapter).unwrap();
        let programs_before = f.probe.live_programs();
        pipeline.set_source(RED);
        assert!(pipeline.is_dirty());
        assert_eq!(f.probe.live_programs(), programs_before);
        assert_eq!(pipeline.tick(&mut f.adapter), CompileOutcome::Compiled);
        assert_eq!(pipeline.tick(&mut f.adapter), CompileOutcome::Idle);
        assert_eq!(pipeline.active_source(), Some(RED));
    }

    #[test]
    fn test_broken_edit_keeps_rendering_red() {
        let mut f = fixture("1.21.4");
        let mut pipeline = ShaderPipeline::new(&mut f.adapter).unwrap();
        pipeline.set_source(RED);
        assert_eq!(pipeline.tick(&mut f.adapter), CompileOutcome::Compiled);
        let red = render(&mut f, &pipeline).program;

        pipeline.set_source(BROKEN);
        assert_eq!(pipeline.tick(&mut f.adapter), CompileOutcome::Failed);
        let diagnostic = pipeline.diagnostic().unwrap();
        assert!(!diagnostic.message.is_empty());
        assert_eq!(render(&mut f, &pipeline).program, red);
        assert_eq!(pipeline.active_source(), Some(RED));
        assert_eq!(pipeline.source(), BROKEN);
        match f.probe.program(red.id()) {
            Some(ProgramRecord::Wgsl(wgsl)) => assert!(wgsl.contains("@fragment")),
            other => panic!("unexpected program {:?}", other),
        }
    }

    #[test]
    fn test_success_clears_diagnostic_and_releases_old_program() {
        let mut f = fixture("1.21.10");
        let mut pipeline = ShaderPipeline::new(&mut f.adapter).unwrap();
        pipeline.set_source(BROKEN);
        pipeline.tick(&mut f.adapter);
        assert!(pipeline.diagnostic().is_some());
        pipeline.set_source(RED);
        pipeline.tick(&mut f.adapter);
        let live = f.probe.live_programs();
        pipeline.set_source(RED.replace("1,0,0", "0,0,1"));
        assert_eq!(pipeline.tick(&mut f.adapter), CompileOutcome::Compiled);
        assert!(pipeline.diagnostic().is_none());
        assert_eq!(f.probe.live_programs(), live);
    }

    #[test]
    fn test_host_rejection_is_a_diagnostic() {
        let mut f = fixture("1.21");
        let mut pipeline = ShaderPipeline::new(&mut f.adapter).unwrap();
        f.probe.fail_next_program("0:1: link error");
        pipeline.set_source(RED);
        assert_eq!(pipeline.tick(&mut f.adapter), CompileOutcome::Failed);
        assert!(pipeline.diagnostic().unwrap().message.contains("link error"));
        assert!(!pipeline.has_program());
    }

    #[test]
    fn test_passthrough_before_first_compile() {
        let mut f = fixture("1.21");
        let pipeline = ShaderPipeline::new(&mut f.adapter).unwrap();
        let pass = render(&mut f, &pipeline);
        assert_eq!(pass.channels, [f.frame; 4]);
        assert_eq!(f.probe.draws().len(), 1);
        assert_eq!(f.probe.composites(), vec![1.0]);
    }

    #[test]
    fn test_unknown_uniform_leaves_table_unchanged() {
        let mut f = fixture("1.21.4");
        let mut pipeline = ShaderPipeline::new(&mut f.adapter).unwrap();
        pipeline.set_source("uniform float gain = 0.5;\nvoid main(){ gl_FragColor = vec4(gain); }");
        pipeline.tick(&mut f.adapter);
        let before = pipeline.uniforms();
        assert_eq!(
            pipeline.set_uniform("undeclaredName", 1.0),
            Err(UniformError::Unknown("undeclaredName".to_string()))
        );
        assert_eq!(pipeline.uniforms(), before);
    }

    #[test]
    fn test_uniform_type_checks() {
        let mut f = fixture("1.21.4");
        let mut pipeline = ShaderPipeline::new(&mut f.adapter).unwrap();
        pipeline.set_source("uniform int steps;\nuniform vec2 offset;\nvoid main(){ gl_FragColor = vec4(offset, float(steps), 1.0); }");
        pipeline.tick(&mut f.adapter);
        assert!(pipeline.set_uniform("steps", 4.0).is_ok());
        assert_eq!(pipeline.uniform("steps"), Some(UniformValue::Int(4)));
        assert!(matches!(
            pipeline.set_uniform("offset", 1.0),
            Err(UniformError::TypeMismatch { expected: "vec2", .. })
        ));
        assert!(matches!(pipeline.set_uniform("iTime", 1.0), Err(UniformError::Builtin(_))));
    }

    #[test]
    fn test_buffered_uniforms_apply_after_first_compile() {
        let mut f = fixture("1.21.4");
        let mut pipeline = ShaderPipeline::new(&mut f.adapter).unwrap();
        assert!(pipeline.set_uniform("gain", 0.75).is_ok());
        assert!(pipeline.set_uniform("unused", 1.0).is_ok());
        pipeline.set_source("uniform float gain = 0.5;\nvoid main(){ gl_FragColor = vec4(gain); }");
        pipeline.tick(&mut f.adapter);
        assert_eq!(pipeline.uniform("gain"), Some(UniformValue::Float(0.75)));
        assert_eq!(pipeline.uniform("unused"), None);

        let pass = render(&mut f, &pipeline);
        let uniforms = pipeline.uniforms();
        let (gain, _) = uniforms.iter().find(|(slot, _)| slot.name == "gain").unwrap();
        let offset = gain.offset as usize;
        let bytes = &pass.uniforms[offset..offset + 4];
        assert_eq!(f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 0.75);
    }

    #[test]
    fn test_explicit_values_survive_recompile_defaults_do_not() {
        let mut f = fixture("1.21.4");
        let mut pipeline = ShaderPipeline::new(&mut f.adapter).unwrap();
        let src = |gain: &str, bias: &str| {
            format!(
                "uniform float gain = {};\nuniform float bias = {};\nvoid main(){{ gl_FragColor = vec4(gain + bias); }}",
                gain, bias
            )
        };
        pipeline.set_source(src("0.5", "0.1"));
        pipeline.tick(&mut f.adapter);
        pipeline.set_uniform("gain", 2.0).unwrap();
        pipeline.set_source(src("0.6", "0.2"));
        pipeline.tick(&mut f.adapter);
        assert_eq!(pipeline.uniform("gain"), Some(UniformValue::Float(2.0)));
        assert_eq!(pipeline.uniform("bias"), Some(UniformValue::Float(0.2)));
    }

    #[test]
    fn test_channel_sources_select_textures() {
        let mut f = fixture("1.21.4");
        let mut pipeline = ShaderPipeline::new(&mut f.adapter).unwrap();
        pipeline.set_source(
            "void main(){ gl_FragColor = texture(iChannel0, vec2(0.5)) + texture(iChannel1, vec2(0.5)); }",
        );
        pipeline.tick(&mut f.adapter);
        assert_eq!(
            pipeline.channel_sources(),
            [ChannelSource::Stream, ChannelSource::Noise, ChannelSource::Gradient, ChannelSource::Stripes]
        );
        pipeline.set_uniform("iChannel0", ChannelSource::Checker).unwrap();
        let pass = render(&mut f, &pipeline);
        assert_ne!(pass.channels[0], f.frame);
        assert_eq!(pass.channels[0].width(), 256);
    }

    #[test]
    fn test_release_frees_every_handle() {
        let mut f = fixture("1.21.10");
        let textures_before = f.probe.live_textures();
        let mut pipeline = ShaderPipeline::new(&mut f.adapter).unwrap();
        pipeline.set_source(RED);
        pipeline.tick(&mut f.adapter);
        pipeline.release(&mut f.adapter);
        assert_eq!(f.probe.live_programs(), 0);
        assert_eq!(f.probe.live_textures(), textures_before);
    }
}
