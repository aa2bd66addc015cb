//! Canvas configuration, loaded from YAML.

use crate::media::{DecodeSettings, MediaKind};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Media to stream into channel 0 at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConfig {
    pub path: PathBuf,
    /// Inferred from the file contents when absent.
    #[serde(default)]
    pub kind: Option<MediaKind>,
}

/// Configuration for one canvas session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Initial shader file. The default preset is used when absent.
    pub shader: Option<PathBuf>,
    pub media: Option<MediaConfig>,
    pub looping: bool,
    pub playing: bool,
    /// Fraction of the host size the canvas renders at.
    pub render_scale: f32,
    /// Composite opacity
    pub alpha: f32,
    /// Compile on every edit instead of on the Compile button.
    pub auto_compile: bool,
    pub overlay_visible: bool,
    /// Log FPS and resolution once per second.
    pub diagnostics: bool,
    /// Directory listed by the overlay file panel.
    pub workspace: Option<PathBuf>,
    pub decode: DecodeSettings,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            shader: None,
            media: None,
            looping: true,
            playing: true,
            render_scale: 1.0,
            alpha: 1.0,
            auto_compile: true,
            overlay_visible: true,
            diagnostics: false,
            workspace: None,
            decode: DecodeSettings::default(),
        }
    }
}

impl CanvasConfig {
    /// Reads a YAML config file. Relative paths inside it resolve against the
    /// file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read config {:?}", path))?;
        let mut config = Self::from_yaml(&content).with_context(|| format!("Failed to parse config {:?}", path))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config.normalized())
    }

    /// Clamps numeric fields into their valid ranges.
    pub fn normalized(mut self) -> Self {
        self.render_scale = if self.render_scale.is_finite() {
            self.render_scale.clamp(0.05, 1.0)
        } else {
            1.0
        };
        self.alpha = if self.alpha.is_finite() { self.alpha.clamp(0.0, 1.0) } else { 1.0 };
        self.decode.default_video_fps = self.decode.video_fps();
        self
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(shader) = self.shader.as_mut() {
            join(shader);
        }
        if let Some(media) = self.media.as_mut() {
            join(&mut media.path);
        }
        if let Some(workspace) = self.workspace.as_mut() {
            join(workspace);
        }
    }
}
