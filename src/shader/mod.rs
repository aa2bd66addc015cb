//! Shader compilation, uniforms and the hot-reload pipeline.

mod channels;
mod compile;
mod patch;
mod pipeline;
pub mod presets;
mod uniforms;

pub use channels::{procedural_texture, CHANNEL_SIZE};
pub use compile::{compile, CompiledShader, ShaderCode, ShaderLanguage, ShaderTarget};
pub use patch::{patch, DeclaredUniform, PatchedSource};
pub use pipeline::{CompileOutcome, ShaderPipeline};
pub use presets::{default_preset, find_preset, Preset, PRESETS};
pub use uniforms::{
    channel_index, channel_name, is_builtin, ChannelSource, FrameInputs, UniformKind, UniformLayout, UniformSlot,
    UniformValue, BUILTIN_NAMES, SAMPLE_RATE,
};
