//! Storage backend capability.
//!
//! A backend places one staged file at a templated destination. The
//! variant is selected at configuration time; the pipeline only ever sees
//! the trait. Every implementation is idempotent per resolved destination
//! path: re-placing after a prior success overwrites in place and never
//! duplicates.

use crate::recording::DestinationSpec;
use crate::retry::RetryClass;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub mod drive;
pub mod local;
pub mod object_store;

pub use drive::DriveBackend;
pub use local::LocalBackend;
pub use object_store::ObjectStoreBackend;

/// Byte-progress observer: (bytes_so_far, total_bytes). Observability
/// only; transfers never depend on it.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Where a placed file ended up, as an operator-meaningful URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedLocation {
    pub uri: String,
}

/// Errors from placing a file at its destination.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend rejected request ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("placed size mismatch: expected {expected}, got {actual}")]
    Verification { expected: u64, actual: u64 },
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
}

impl RetryClass for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            // a fresh credential or an operator fix is needed; retrying
            // the same request cannot help
            Self::Auth(_) | Self::InvalidDestination(_) => false,
            Self::Api { status, .. } => !matches!(*status, 401 | 403 | 404),
            Self::Http(_) | Self::Io(_) | Self::Verification { .. } => true,
        }
    }
}

/// A transfer destination: local filesystem, a Drive-like service, or an
/// S3-compatible object store.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short human-readable identity for logs, e.g. `local:/backups`.
    fn describe(&self) -> String;

    /// Durably place the staged file at `dest`. Must be idempotent per
    /// resolved destination path.
    async fn place(
        &self,
        staged: &Path,
        dest: &DestinationSpec,
        progress: Option<ProgressFn>,
    ) -> Result<PlacedLocation, TransferError>;
}
