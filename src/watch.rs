//! File watching for the shader source, used by the preview binary.

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use tracing::{error, info, warn};

/// Watches one shader file and hands back its text after each change.
pub struct ShaderWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    last: Option<String>,
}

impl ShaderWatcher {
    /// Returns `None` when the platform watcher cannot be set up.
    pub fn new(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let (tx, rx) = channel();

        let mut watcher = match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!("Failed to create shader watcher: {}", e);
                return None;
            }
        };
        // Editors often replace the file, so watch the directory.
        let target = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        if let Err(e) = watcher.watch(target, RecursiveMode::NonRecursive) {
            warn!("Failed to watch {:?}: {}", target, e);
            return None;
        }
        info!("Watching shader file {:?} for changes", path);

        let last = fs::read_to_string(&path).ok();
        Some(Self {
            path,
            _watcher: watcher,
            rx,
            last,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drains pending events and returns the new text if the file changed.
    pub fn poll(&mut self) -> Option<String> {
        let mut touched = false;
        while let Ok(res) = self.rx.try_recv() {
            match res {
                Ok(event) => {
                    let relevant = matches!(event.kind, notify::EventKind::Modify(_) | notify::EventKind::Create(_))
                        && event.paths.iter().any(|p| p.file_name() == self.path.file_name());
                    touched |= relevant;
                }
                Err(e) => warn!("Shader watcher error: {}", e),
            }
        }
        if !touched {
            return None;
        }

        match fs::read_to_string(&self.path) {
            Ok(text) if self.last.as_deref() == Some(text.as_str()) => None,
            Ok(text) => {
                info!("Shader file {:?} changed", self.path);
                self.last = Some(text.clone());
                Some(text)
            }
            Err(e) => {
                error!("Failed to read shader file {:?}: {}", self.path, e);
                None
            }
        }
    }

    /// Records text written by the canvas itself so it is not reported back.
    pub fn note_saved(&mut self, text: &str) {
        self.last = Some(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_reports_changed_text() {
        let dir = std::env::temp_dir().join(format!("canvas-glsl-watch-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("live.frag");
        fs::write(&file, "// one").unwrap();

        let Some(mut watcher) = ShaderWatcher::new(&file) else {
            fs::remove_dir_all(&dir).unwrap();
            return;
        };
        assert_eq!(watcher.poll(), None);

        fs::write(&file, "// two").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = None;
        while Instant::now() < deadline && seen.is_none() {
            std::thread::sleep(Duration::from_millis(50));
            seen = watcher.poll();
        }
        assert_eq!(seen.as_deref(), Some("// two"));
        fs::remove_dir_all(&dir).unwrap();
    }
}
