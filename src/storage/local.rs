//! Local filesystem backend.

use super::{PlacedLocation, ProgressFn, StorageBackend, TransferError};
use crate::recording::DestinationSpec;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn destination_path(&self, dest: &DestinationSpec) -> PathBuf {
        let mut path = self.root.clone();
        for segment in dest.folder.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path.push(&dest.filename);
        path
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn place(
        &self,
        staged: &Path,
        dest: &DestinationSpec,
        progress: Option<ProgressFn>,
    ) -> Result<PlacedLocation, TransferError> {
        let target = self.destination_path(dest);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // copy (not rename): staging may live on another filesystem, and
        // an overwrite of an existing destination must truncate cleanly
        let copied = tokio::fs::copy(staged, &target).await?;
        if dest.size > 0 && copied != dest.size {
            tokio::fs::remove_file(&target).await.ok();
            return Err(TransferError::Verification {
                expected: dest.size,
                actual: copied,
            });
        }
        if let Some(report) = &progress {
            report(copied, copied.max(dest.size));
        }

        debug!("Placed {} bytes at {}", copied, target.display());
        Ok(PlacedLocation {
            uri: format!("file://{}", target.display()),
        })
    }
}
