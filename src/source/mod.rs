//! Recording source abstraction.
//!
//! The sync core talks to the meeting platform exclusively through
//! [`RecordingSource`]; the HTTP implementation lives in [`http`]. Tests
//! substitute in-memory sources.

use crate::recording::RecordingDescriptor;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::Path;

pub mod http;

pub use http::HttpSource;

pub use crate::storage::ProgressFn;

/// One user/account on the platform that may own recordings.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub active: bool,
}

/// Errors from the recording source.
///
/// Listing errors abort the current run's enumeration; download errors are
/// retried per file by the pipeline's retry policy.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("local write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("downloaded size mismatch for {file_id}: expected {expected}, got {actual}")]
    SizeMismatch {
        file_id: String,
        expected: u64,
        actual: u64,
    },
}

impl SourceError {
    /// Disk exhaustion while staging is fatal for the whole run, not just
    /// the current task.
    pub fn is_disk_full(&self) -> bool {
        const ENOSPC: i32 = 28;
        matches!(self, Self::Io(err) if err.raw_os_error() == Some(ENOSPC))
    }
}

impl crate::retry::RetryClass for SourceError {
    fn is_retryable(&self) -> bool {
        // auth failures will not heal on a blind retry, and a full
        // staging disk must surface immediately rather than delay the
        // run-level abort
        !matches!(self, Self::Auth(_)) && !self.is_disk_full()
    }
}

/// Capabilities the sync pipeline needs from the meeting platform.
#[async_trait]
pub trait RecordingSource: Send + Sync {
    /// All accounts that may own recordings, optionally including
    /// deactivated ones.
    async fn list_users(&self, include_inactive: bool) -> Result<Vec<UserAccount>, SourceError>;

    /// Recordings owned by one account with a start time inside the
    /// inclusive date window. Implementations page transparently.
    async fn list_recordings(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RecordingDescriptor>, SourceError>;

    /// Stream one file's bytes to `dest`, verifying the size when known.
    async fn download_file(
        &self,
        locator: &str,
        expected_size: u64,
        file_id: &str,
        dest: &Path,
        progress: Option<ProgressFn>,
    ) -> Result<(), SourceError>;

    /// Remove the recording from the source. "Already gone" counts as
    /// success.
    async fn delete_recording(&self, recording_id: &str) -> Result<(), SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryClass;

    #[test]
    fn test_auth_errors_are_not_retryable() {
        assert!(!SourceError::Auth("bad credentials".into()).is_retryable());
        assert!(SourceError::Api {
            status: 503,
            body: "unavailable".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_enospc_detection_and_no_retry() {
        let err = SourceError::Io(std::io::Error::from_raw_os_error(28));
        assert!(err.is_disk_full());
        assert!(!err.is_retryable());

        let err = SourceError::Io(std::io::Error::from_raw_os_error(13));
        assert!(!err.is_disk_full());
        assert!(err.is_retryable());
    }
}
