//! GLSL to host-program compilation through naga.
//!
//! The user's GLSL is patched, parsed and validated once, then emitted in the
//! language the selected host release consumes. Uniforms are reflected from
//! the validated module so the pipeline never guesses offsets.

use super::patch::{patch, PatchedSource, MEMBER_PREFIX};
use super::uniforms::{channel_name, UniformKind, UniformLayout, UniformSlot, UniformValue};
use crate::error::CompileDiagnostic;
use naga::back::{glsl, spv, wgsl};
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use naga::{AddressSpace, ArraySize, Module, ScalarKind, ShaderStage, TypeInner, VectorSize};
use std::error::Error as _;
use tracing::debug;

/// Program language a host release consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderLanguage {
    /// GLSL 330 core for the legacy GL binding.
    Glsl330,
    Wgsl,
    SpirV,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderTarget {
    pub language: ShaderLanguage,
    /// Present `gl_FragCoord` with a bottom-left origin on top-left targets.
    pub flip_frag_coord: bool,
}

/// Host-ready program code.
#[derive(Debug, Clone, PartialEq)]
pub enum ShaderCode {
    Glsl {
        fragment: String,
        /// Name of the uniform block the host binds the canvas parameters to.
        uniform_block: Option<String>,
        /// Combined sampler uniform name per channel.
        samplers: [Option<String>; 4],
    },
    Wgsl(String),
    SpirV(Vec<u32>),
}

impl ShaderCode {
    pub fn language_name(&self) -> &'static str {
        match self {
            ShaderCode::Glsl { .. } => "GLSL",
            ShaderCode::Wgsl(_) => "WGSL",
            ShaderCode::SpirV(_) => "SPIR-V",
        }
    }
}

/// Output of a successful compile.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledShader {
    pub code: ShaderCode,
    pub layout: UniformLayout,
    /// Initial values declared in the source, e.g. `uniform float gain = 0.5;`.
    pub defaults: Vec<(String, UniformValue)>,
}

impl CompiledShader {
    /// Size in bytes of the uniform block, at least 16.
    pub fn uniform_size(&self) -> u64 {
        u64::from(self.layout.block_size()).max(16)
    }
}

/// Compiles `source` for `target`.
pub fn compile(source: &str, target: ShaderTarget) -> Result<CompiledShader, CompileDiagnostic> {
    if source.trim().is_empty() {
        return Err(CompileDiagnostic::new("shader source is empty"));
    }
    let patched = patch(source, target.flip_frag_coord);

    let mut frontend = Frontend::default();
    let module = frontend
        .parse(&Options::from(ShaderStage::Fragment), &patched.text)
        .map_err(|errors| parse_diagnostic(&errors, &patched))?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|err| {
            let mut message = err.as_inner().to_string();
            let mut cause = err.as_inner().source();
            while let Some(inner) = cause {
                message.push_str(": ");
                message.push_str(&inner.to_string());
                cause = inner.source();
            }
            locate(CompileDiagnostic::new(message), err.location(&patched.text), &patched)
        })?;

    let layout = reflect(&module);
    let defaults = patched
        .uniforms
        .iter()
        .filter_map(|u| Some((u.name.clone(), u.default?)))
        .collect();
    let code = emit(&module, &info, target.language)?;
    debug!(
        "Compiled {} program with {} uniform slots ({} bytes)",
        code.language_name(),
        layout.slots().len(),
        layout.block_size()
    );

    Ok(CompiledShader { code, layout, defaults })
}

fn parse_diagnostic(errors: &naga::front::glsl::ParseErrors, patched: &PatchedSource) -> CompileDiagnostic {
    let message = errors
        .errors
        .iter()
        .map(|e| e.kind.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    let message = if message.is_empty() {
        "shader failed to parse".to_string()
    } else {
        message
    };
    let location = errors
        .errors
        .iter()
        .find(|e| e.meta.is_defined())
        .map(|e| e.meta.location(&patched.text));
    locate(CompileDiagnostic::new(message), location, patched)
}

fn locate(
    diagnostic: CompileDiagnostic,
    location: Option<naga::SourceLocation>,
    patched: &PatchedSource,
) -> CompileDiagnostic {
    match location {
        Some(loc) => CompileDiagnostic::at(diagnostic.message, patched.user_line(loc.line_number), loc.line_position),
        None => diagnostic,
    }
}

fn emit(module: &Module, info: &ModuleInfo, language: ShaderLanguage) -> Result<ShaderCode, CompileDiagnostic> {
    match language {
        ShaderLanguage::Wgsl => wgsl::write_string(module, info, wgsl::WriterFlags::empty())
            .map(ShaderCode::Wgsl)
            .map_err(|e| CompileDiagnostic::new(format!("WGSL output failed: {}", e))),
        ShaderLanguage::SpirV => {
            let pipeline = spv::PipelineOptions {
                shader_stage: ShaderStage::Fragment,
                entry_point: "main".to_string(),
            };
            spv::write_vec(module, info, &spv::Options::default(), Some(&pipeline))
                .map(ShaderCode::SpirV)
                .map_err(|e| CompileDiagnostic::new(format!("SPIR-V output failed: {}", e)))
        }
        ShaderLanguage::Glsl330 => emit_glsl(module, info),
    }
}

fn emit_glsl(module: &Module, info: &ModuleInfo) -> Result<ShaderCode, CompileDiagnostic> {
    let options = glsl::Options {
        version: glsl::Version::Desktop(330),
        ..Default::default()
    };
    let pipeline = glsl::PipelineOptions {
        shader_stage: ShaderStage::Fragment,
        entry_point: "main".to_string(),
        multiview: None,
    };
    let mut fragment = String::new();
    let reflection = glsl::Writer::new(
        &mut fragment,
        module,
        info,
        &options,
        &pipeline,
        naga::proc::BoundsCheckPolicies::default(),
    )
    .and_then(|mut writer| writer.write())
    .map_err(|e| CompileDiagnostic::new(format!("GLSL output failed: {}", e)))?;

    let uniform_block = module
        .global_variables
        .iter()
        .find(|(_, var)| is_param_block(var))
        .and_then(|(handle, _)| reflection.uniforms.get(&handle).cloned());

    let mut samplers: [Option<String>; 4] = Default::default();
    for (name, mapping) in &reflection.texture_mapping {
        let binding = module.global_variables[mapping.texture].binding.as_ref();
        if let Some(channel) = binding.and_then(|b| channel_of(b.group, b.binding)) {
            samplers[channel] = Some(name.clone());
        }
    }

    Ok(ShaderCode::Glsl {
        fragment,
        uniform_block,
        samplers,
    })
}

fn is_param_block(var: &naga::GlobalVariable) -> bool {
    matches!(var.space, AddressSpace::Uniform)
        && var.binding.as_ref().is_some_and(|b| b.group == 0 && b.binding == 0)
}

fn channel_of(group: u32, binding: u32) -> Option<usize> {
    (group == 1 && binding % 2 == 0 && binding < 8).then_some(binding as usize / 2)
}

/// Reads block members and channel bindings from the validated module.
fn reflect(module: &Module) -> UniformLayout {
    let mut slots = Vec::new();
    let mut block_size = 0;

    for (_, var) in module.global_variables.iter() {
        if is_param_block(var) {
            let TypeInner::Struct { members, span } = &module.types[var.ty].inner else {
                continue;
            };
            block_size = *span;
            for member in members {
                let Some(name) = member.name.as_deref() else {
                    continue;
                };
                let name = name.strip_prefix(MEMBER_PREFIX).unwrap_or(name);
                let (kind, count, stride) = match &module.types[member.ty].inner {
                    TypeInner::Array {
                        base,
                        size: ArraySize::Constant(len),
                        stride,
                    } => match kind_of(&module.types[*base].inner) {
                        Some(kind) => (kind, len.get(), *stride),
                        None => continue,
                    },
                    other => match kind_of(other) {
                        Some(kind) => (kind, 1, 0),
                        None => continue,
                    },
                };
                slots.push(UniformSlot {
                    name: name.to_string(),
                    kind,
                    offset: member.offset,
                    count,
                    stride,
                });
            }
        } else if matches!(var.space, AddressSpace::Handle) {
            let is_image = matches!(module.types[var.ty].inner, TypeInner::Image { .. });
            let channel = var.binding.as_ref().and_then(|b| channel_of(b.group, b.binding));
            if let (true, Some(channel)) = (is_image, channel) {
                slots.push(UniformSlot {
                    name: channel_name(channel),
                    kind: UniformKind::Channel,
                    offset: channel as u32,
                    count: 1,
                    stride: 0,
                });
            }
        }
    }

    UniformLayout::new(slots, block_size)
}

fn kind_of(inner: &TypeInner) -> Option<UniformKind> {
    match inner {
        TypeInner::Scalar(scalar) => match scalar.kind {
            ScalarKind::Float => Some(UniformKind::Float),
            ScalarKind::Sint => Some(UniformKind::Int),
            _ => None,
        },
        TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => match size {
            VectorSize::Bi => Some(UniformKind::Vec2),
            VectorSize::Tri => Some(UniformKind::Vec3),
            VectorSize::Quad => Some(UniformKind::Vec4),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: &str = "void main(){gl_FragColor=vec4(1,0,0,1);}";

    fn target(language: ShaderLanguage, flip: bool) -> ShaderTarget {
        ShaderTarget {
            language,
            flip_frag_coord: flip,
        }
    }

    #[test]
    fn test_red_shader_compiles_for_every_language() {
        let wgsl = compile(RED, target(ShaderLanguage::Wgsl, true)).unwrap();
        assert!(matches!(&wgsl.code, ShaderCode::Wgsl(text) if text.contains("@fragment")));

        let spirv = compile(RED, target(ShaderLanguage::SpirV, true)).unwrap();
        assert!(matches!(&spirv.code, ShaderCode::SpirV(words) if words.first() == Some(&0x0723_0203)));

        let glsl = compile(RED, target(ShaderLanguage::Glsl330, false)).unwrap();
        match &glsl.code {
            ShaderCode::Glsl { fragment, uniform_block, .. } => {
                assert!(fragment.starts_with("#version 330"));
                // naga drops the block when nothing reads it.
                assert!(uniform_block.is_none());
            }
            other => panic!("unexpected code {:?}", other.language_name()),
        }
    }

    #[test]
    fn test_glsl330_keeps_uniform_block_that_is_read() {
        let pulse = "void main(){gl_FragColor=vec4(fract(iTime),0,0,1);}";
        let glsl = compile(pulse, target(ShaderLanguage::Glsl330, false)).unwrap();
        match &glsl.code {
            ShaderCode::Glsl { uniform_block, .. } => assert!(uniform_block.is_some()),
            other => panic!("unexpected code {:?}", other.language_name()),
        }
    }

    #[test]
    fn test_unbalanced_braces_report_a_diagnostic() {
        let err = compile("void main(){gl_FragColor=vec4(1,0,0,1);", target(ShaderLanguage::Wgsl, true)).unwrap_err();
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_blank_source_is_rejected() {
        let err = compile("  \n\t", target(ShaderLanguage::Wgsl, true)).unwrap_err();
        assert_eq!(err.message, "shader source is empty");
    }

    #[test]
    fn test_diagnostic_line_points_into_user_source() {
        let src = "void main() {\n    float x = 1.0;\n    gl_FragColor = vec4(x, y, 0.0, 1.0);\n}\n";
        let err = compile(src, target(ShaderLanguage::Wgsl, false)).unwrap_err();
        assert_eq!(err.line, Some(3), "{}", err);
    }

    #[test]
    fn test_reflects_builtins_user_uniforms_and_channels() {
        let src = "uniform float gain = 0.5;\nuniform vec3 tint;\nvoid main(){ gl_FragColor = vec4(tint * gain, 1.0) + texture(iChannel1, vec2(0.5)); }\n";
        let shader = compile(src, target(ShaderLanguage::Wgsl, true)).unwrap();
        let layout = &shader.layout;
        assert_eq!(layout.get("iResolution").unwrap().offset, 0);
        assert_eq!(layout.get("iTime").unwrap().offset, 12);
        let res = layout.get("iChannelResolution").unwrap();
        assert_eq!((res.count, res.stride), (4, 16));
        assert_eq!(layout.get("gain").unwrap().kind, UniformKind::Float);
        assert_eq!(layout.get("tint").unwrap().kind, UniformKind::Vec3);
        assert_eq!(layout.get("iChannel1").unwrap().kind, UniformKind::Channel);
        assert!(shader.uniform_size() >= u64::from(layout.get("tint").unwrap().offset) + 12);
        assert_eq!(shader.defaults, vec![("gain".to_string(), UniformValue::Float(0.5))]);
        let user: Vec<&str> = layout.user_slots().map(|s| s.name.as_str()).collect();
        assert!(user.contains(&"gain"));
        assert!(!user.contains(&"iTime"));
    }

    #[test]
    fn test_glsl_output_names_channel_samplers() {
        let src = "void main(){ gl_FragColor = texture(iChannel0, vec2(0.5)); }";
        let shader = compile(src, target(ShaderLanguage::Glsl330, false)).unwrap();
        let ShaderCode::Glsl { samplers, .. } = &shader.code else {
            panic!("expected GLSL output");
        };
        assert!(samplers[0].is_some());
    }

    #[test]
    fn test_main_image_sources_compile() {
        let src = "void mainImage(out vec4 fragColor, in vec2 fragCoord) {\n    vec2 uv = fragCoord / iResolution.xy;\n    fragColor = vec4(uv, 0.5 + 0.5 * sin(iTime), 1.0);\n}\n";
        assert!(compile(src, target(ShaderLanguage::Wgsl, true)).is_ok());
        assert!(compile(src, target(ShaderLanguage::Glsl330, false)).is_ok());
    }
}
