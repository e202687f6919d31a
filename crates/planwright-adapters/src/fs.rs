//! Workspace filesystem backed by `tokio::fs`.

use async_trait::async_trait;
use planwright_core::{CollabResult, CollaboratorError, FileStat, WorkspaceFs};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Files under one project root. Paths that would leave the root are refused.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, relative: &Path) -> CollabResult<PathBuf> {
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(CollaboratorError::other(format!(
                        "path escapes the workspace: {}",
                        relative.display()
                    )))
                }
            }
        }
        Ok(resolved)
    }
}

fn map_io(path: &Path, err: std::io::Error) -> CollaboratorError {
    if err.kind() == ErrorKind::NotFound {
        CollaboratorError::NotFound(path.display().to_string())
    } else {
        CollaboratorError::other(format!("{}: {}", path.display(), err))
    }
}

#[async_trait]
impl WorkspaceFs for LocalWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn stat(&self, path: &Path) -> CollabResult<FileStat> {
        let full = self.resolve(path)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|e| map_io(path, e))?;
        Ok(FileStat {
            is_dir: meta.is_dir(),
            len: meta.len(),
        })
    }

    async fn read_to_string(&self, path: &Path) -> CollabResult<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn write(&self, path: &Path, content: &str) -> CollabResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(path, e))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn create_dir_all(&self, path: &Path) -> CollabResult<()> {
        let full = self.resolve(path)?;
        tokio::fs::create_dir_all(&full)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn remove_file(&self, path: &Path) -> CollabResult<()> {
        let full = self.resolve(path)?;
        tokio::fs::remove_file(&full)
            .await
            .map_err(|e| map_io(path, e))
    }
}
