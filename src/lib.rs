//! canvas-glsl: a live-editable GLSL canvas for 3D host applications.
//!
//! The canvas compiles Shadertoy-style fragment shaders, feeds them images,
//! GIFs and video frames, and composites the result plus an egui editor
//! overlay into whatever rendering interface the host release exposes.

pub mod adapter;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod host;
pub mod media;
pub mod overlay;
pub mod shader;
pub mod surface;
pub mod utils;
pub mod watch;
pub mod workspace;

pub use config::CanvasConfig;
pub use controller::{CanvasController, ControllerState, FrameReport, HostFrame};
pub use error::CanvasError;
