//! Error taxonomy for the canvas core.
//!
//! Only [`AdapterSelectionError`] and an initial [`SurfaceAllocationError`] are
//! fatal. Everything else is recovered by the component that detected it.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// No adapter variant matches the detected host version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterSelectionError {
    #[error("host version {0:?} could not be parsed")]
    Unparseable(String),
    #[error("host version {0} is not supported")]
    UnsupportedVersion(String),
    #[error("host release {release} requires the {expected} native binding, got {actual}")]
    BindingMismatch {
        release: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// The host refused to allocate a render target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to allocate {width}x{height} canvas surface: {reason}")]
pub struct SurfaceAllocationError {
    pub width: u32,
    pub height: u32,
    pub reason: String,
}

/// A native call failed during steady-state rendering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("host call {call} failed: {reason}")]
pub struct HostError {
    pub call: &'static str,
    pub reason: String,
}

/// Compile diagnostic shown in the overlay. Line and column are 1-based and
/// refer to the user's source, not the patched text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileDiagnostic {
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl CompileDiagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl fmt::Display for CompileDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(col)) => write!(f, "{}:{}: {}", line, col, self.message),
            (Some(line), None) => write!(f, "{}: {}", line, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("shader compilation failed: {diagnostic}")]
pub struct ShaderCompileError {
    pub diagnostic: CompileDiagnostic,
}

impl From<CompileDiagnostic> for ShaderCompileError {
    fn from(diagnostic: CompileDiagnostic) -> Self {
        Self { diagnostic }
    }
}

/// Rejected uniform write. The uniform table is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UniformError {
    #[error("unknown uniform {0:?}")]
    Unknown(String),
    #[error("uniform {0:?} is driven by the canvas")]
    Builtin(String),
    #[error("uniform {name:?} expects {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum MediaDecodeError {
    #[error("failed to read media: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("unsupported media: {0}")]
    Unsupported(String),
    #[error("{tool} failed: {message}")]
    Subprocess { tool: String, message: String },
    #[error("media contains no frames")]
    Empty,
    #[error("decode cancelled")]
    Cancelled,
}

/// Workspace file errors.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("path {0:?} escapes the workspace root")]
    OutsideRoot(PathBuf),
    #[error("{0:?} is not a shader file")]
    NotAShader(PathBuf),
    #[error("no shader file is open")]
    NoShaderFile,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Startup failures that prevent the controller from reaching `Ready`.
#[derive(Debug, Error)]
pub enum CanvasError {
    #[error(transparent)]
    AdapterSelection(#[from] AdapterSelectionError),
    #[error(transparent)]
    SurfaceAllocation(#[from] SurfaceAllocationError),
    #[error("placeholder program could not be created: {0}")]
    Placeholder(ShaderCompileError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("controller is {0}")]
    InvalidState(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display_includes_location() {
        let d = CompileDiagnostic::at("expected '}'", 3, 14);
        assert_eq!(d.to_string(), "3:14: expected '}'");
        assert_eq!(CompileDiagnostic::new("empty").to_string(), "empty");
    }
}
