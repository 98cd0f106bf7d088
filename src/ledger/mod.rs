//! Completion ledger: the durable record of fully transferred recordings.
//!
//! One recording id per line, append-only. An id is committed only after
//! every file of the recording has been placed at the destination; the
//! ledger is the single source of truth for "do not redo this work".
//! Operators may truncate the file by hand to force reprocessing.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

pub mod failed;

pub use failed::FailedTransferLog;

pub struct CompletionLedger {
    // None when the ledger is disabled: contains() is always false and
    // commit() is a no-op, forcing full reprocessing.
    inner: Option<Mutex<Inner>>,
}

struct Inner {
    ids: HashSet<String>,
    file: File,
}

impl CompletionLedger {
    /// Load (or create) the ledger file. With `enabled = false` no file is
    /// touched and every membership test answers "not seen".
    pub fn open(path: &Path, enabled: bool) -> Result<Self> {
        if !enabled {
            info!("Completion ledger disabled; all recordings will be processed");
            return Ok(Self { inner: None });
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut ids = HashSet::new();
        if path.exists() {
            let reader = BufReader::new(
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
            );
            for line in reader.lines() {
                let line = line?;
                let id = line.trim();
                if !id.is_empty() {
                    ids.insert(id.to_string());
                }
            }
            info!("Loaded {} completed recording id(s) from ledger", ids.len());
        } else {
            debug!("No ledger at {}, starting empty", path.display());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for append", path.display()))?;

        Ok(Self {
            inner: Some(Mutex::new(Inner { ids, file })),
        })
    }

    /// Ledger that never skips and never records. Used when the operator
    /// disables dedup, and by tests.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn contains(&self, recording_id: &str) -> bool {
        match &self.inner {
            Some(inner) => inner
                .lock()
                .expect("ledger lock poisoned")
                .ids
                .contains(recording_id),
            None => false,
        }
    }

    /// Durably record a recording as fully transferred. The entry is
    /// flushed and synced before this returns; duplicate commits are
    /// harmless no-ops.
    pub fn commit(&self, recording_id: &str) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        let mut guard = inner.lock().expect("ledger lock poisoned");
        if guard.ids.contains(recording_id) {
            return Ok(());
        }

        writeln!(guard.file, "{recording_id}").context("Failed to append to ledger")?;
        guard.file.flush().context("Failed to flush ledger")?;
        guard.file.sync_data().context("Failed to sync ledger")?;
        guard.ids.insert(recording_id.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        match &self.inner {
            Some(inner) => inner.lock().expect("ledger lock poisoned").ids.len(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
