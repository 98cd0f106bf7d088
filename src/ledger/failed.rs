//! Append-only log of permanently failed file transfers.
//!
//! One tab-separated line per failure: timestamp, recording id, file id,
//! error text. Entries are never deduplicated against the completion
//! ledger; a recording listed here may succeed on a later run.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct FailedTransferLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl FailedTransferLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for append", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Record one file's permanent failure. Flushed before returning.
    pub fn append(&self, recording_id: &str, file_id: &str, error: &str) -> Result<()> {
        let timestamp = Utc::now().to_rfc3339();
        // keep the line structure parseable
        let error = error.replace(['\t', '\n', '\r'], " ");

        let mut file = self.file.lock().expect("failed-log lock poisoned");
        writeln!(file, "{timestamp}\t{recording_id}\t{file_id}\t{error}")
            .context("Failed to append to failed-transfer log")?;
        file.flush().context("Failed to flush failed-transfer log")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
