//! Local-directory blob store
//!
//! Containers map to subdirectories of the root. Writes go to a temporary
//! sibling file which is renamed over the target, so readers never observe a
//! partially written report.

use super::BlobStore;
use crate::error::StageFailure;
use crate::types::BlobLocation;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a blob location to a file path under the root
    fn resolve(&self, location: &BlobLocation) -> Result<PathBuf, StageFailure> {
        let relative = Path::new(&location.container).join(&location.path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));

        if location.container.is_empty() || location.path.is_empty() || escapes {
            return Err(StageFailure::failed(
                "InvalidBlobPath",
                format!("Invalid blob location: {}", location),
            ));
        }

        Ok(self.root.join(relative))
    }
}

fn io_failure(action: &str, path: &Path, err: std::io::Error) -> StageFailure {
    let code = match err.kind() {
        ErrorKind::PermissionDenied => "AuthorizationFailure",
        ErrorKind::TimedOut => return StageFailure::timed_out(err.to_string()),
        _ => "IoError",
    };
    StageFailure::failed(code, format!("Failed to {} {}: {}", action, path.display(), err))
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn put(&self, location: &BlobLocation, payload: Vec<u8>) -> Result<(), StageFailure> {
        let target = self.resolve(location)?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("create directory", parent, e))?;
        }

        let temp = target.with_file_name(format!(
            ".{}.{}.tmp",
            target
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            Uuid::new_v4()
        ));

        if let Err(e) = fs::write(&temp, &payload).await {
            let _ = fs::remove_file(&temp).await;
            return Err(io_failure("write", &temp, e));
        }

        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(io_failure("replace", &target, e));
        }

        Ok(())
    }

    async fn get(&self, location: &BlobLocation) -> Result<Option<Vec<u8>>, StageFailure> {
        let target = self.resolve(location)?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_failure("read", &target, e)),
        }
    }
}
