//! A directory of shader files the overlay can open and save.

use crate::error::WorkspaceError;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Extensions recognized as shader source.
pub const SHADER_EXTENSIONS: [&str; 6] = ["glsl", "frag", "fs", "fsh", "shader", "txt"];

pub fn is_shader_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SHADER_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(e)))
}

#[derive(Debug, Clone)]
pub struct ShaderWorkspace {
    root: PathBuf,
}

impl ShaderWorkspace {
    /// Opens `root`, creating it if missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        info!("Shader workspace at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a workspace-relative path to a file path under the root.
    /// `..` may not climb above the root and absolute paths must lie inside it.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, WorkspaceError> {
        let path = path.as_ref();
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root)
                .map_err(|_| WorkspaceError::OutsideRoot(path.to_path_buf()))?
        } else {
            path
        };

        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(WorkspaceError::OutsideRoot(path.to_path_buf()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(WorkspaceError::OutsideRoot(path.to_path_buf()));
                }
            }
        }
        if parts.is_empty() {
            return Err(WorkspaceError::NotAShader(path.to_path_buf()));
        }
        Ok(parts.iter().fold(self.root.clone(), |acc, part| acc.join(part)))
    }

    /// Shader files below the root, relative to it, sorted.
    pub fn list(&self) -> Result<Vec<PathBuf>, WorkspaceError> {
        let mut files = Vec::new();
        let mut dirs = vec![self.root.clone()];
        while let Some(dir) = dirs.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    dirs.push(path);
                } else if is_shader_file(&path) {
                    if let Ok(relative) = path.strip_prefix(&self.root) {
                        files.push(relative.to_path_buf());
                    }
                }
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn read(&self, path: impl AsRef<Path>) -> Result<String, WorkspaceError> {
        let file = self.shader_path(path.as_ref())?;
        debug!("Reading shader {:?}", file);
        Ok(std::fs::read_to_string(file)?)
    }

    /// Writes `text`, creating parent directories as needed.
    pub fn write(&self, path: impl AsRef<Path>, text: &str) -> Result<PathBuf, WorkspaceError> {
        let file = self.shader_path(path.as_ref())?;
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&file, text)?;
        info!("Saved shader {:?}", file);
        Ok(file)
    }

    fn shader_path(&self, path: &Path) -> Result<PathBuf, WorkspaceError> {
        let file = self.resolve(path)?;
        if !is_shader_file(&file) {
            return Err(WorkspaceError::NotAShader(path.to_path_buf()));
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_workspace(name: &str) -> ShaderWorkspace {
        let dir = std::env::temp_dir().join(format!("canvas-glsl-ws-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        ShaderWorkspace::open(dir).unwrap()
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let ws = temp_workspace("resolve");
        assert!(matches!(ws.resolve("../x.glsl"), Err(WorkspaceError::OutsideRoot(_))));
        assert!(matches!(ws.resolve("a/../../x.glsl"), Err(WorkspaceError::OutsideRoot(_))));
        assert!(matches!(ws.resolve("/etc/passwd"), Err(WorkspaceError::OutsideRoot(_))));
        assert_eq!(ws.resolve("a/./b/../c.frag").unwrap(), ws.root().join("a").join("c.frag"));
        assert_eq!(ws.resolve(ws.root().join("d.glsl")).unwrap(), ws.root().join("d.glsl"));
        std::fs::remove_dir_all(ws.root()).unwrap();
    }

    #[test]
    fn test_write_list_read() {
        let ws = temp_workspace("rw");
        ws.write("b.frag", "void main() {}").unwrap();
        ws.write("nested/a.glsl", "// a").unwrap();
        std::fs::write(ws.root().join("notes.md"), "x").unwrap();

        let files = ws.list().unwrap();
        assert_eq!(files, vec![PathBuf::from("b.frag"), PathBuf::from("nested/a.glsl")]);
        assert_eq!(ws.read("nested/a.glsl").unwrap(), "// a");
        std::fs::remove_dir_all(ws.root()).unwrap();
    }

    #[test]
    fn test_rejects_non_shader_extensions() {
        let ws = temp_workspace("ext");
        assert!(matches!(ws.write("run.sh", "x"), Err(WorkspaceError::NotAShader(_))));
        assert!(is_shader_file(Path::new("x.FSH")));
        assert!(!is_shader_file(Path::new("x")));
        std::fs::remove_dir_all(ws.root()).unwrap();
    }
}
