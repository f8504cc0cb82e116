//! JSON file backing store
//!
//! Writes go to a sibling temporary file that is then renamed over the
//! target, so readers in other processes see either the old or the new
//! document and never a truncated one.

use super::DocumentStore;
use crate::error::{CommsError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Document persisted as a JSON file on disk
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    key: String,
}

impl FileStore {
    /// Create a store for `path`; nothing is touched on disk until first use
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key = format!("file:{}", absolute_path(&path).display());
        Self { path, key }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "communications.json".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    fn key(&self) -> &str {
        &self.key
    }

    async fn load(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CommsError::storage(&self.path, e)),
        }
    }

    async fn save(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CommsError::storage(parent, e))?;
        }

        let temp = self.temp_path();
        if let Err(e) = tokio::fs::write(&temp, bytes).await {
            return Err(CommsError::storage(&temp, e));
        }

        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(CommsError::storage(&self.path, e));
        }

        debug!("Wrote {} bytes to {}", bytes.len(), self.path.display());
        Ok(())
    }
}

/// Best-effort absolute form of `path` used for queue identity
fn absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    // Resolve symlinks in the directory part when it already exists
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}
