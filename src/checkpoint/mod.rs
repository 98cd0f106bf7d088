//! Incremental sync state: the enumeration checkpoint and window math.
//!
//! The checkpoint file holds a single timestamp, the end of the last
//! window that was enumerated to completion. It is only advanced after a
//! run finishes enumeration without a fatal error; per-recording transfer
//! failures never block it, because those are re-driven by the completion
//! ledger and failed-transfer log rather than by the date range.

use crate::enumerate::DateWindow;
use anyhow::{Context, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct SyncCheckpoint {
    path: PathBuf,
}

impl SyncCheckpoint {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// The previously recorded instant, if any. A missing file is a normal
    /// first run; an unreadable value is an error the operator must see.
    pub fn load(&self) -> Result<Option<DateTime<Utc>>> {
        if !self.path.exists() {
            debug!("No checkpoint at {}", self.path.display());
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }

        if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Some(instant.with_timezone(&Utc)));
        }
        // tolerate an operator-edited plain date
        let date: NaiveDate = raw
            .parse()
            .with_context(|| format!("Unreadable checkpoint value {raw:?}"))?;
        Ok(Some(
            date.and_hms_opt(0, 0, 0)
                .expect("midnight always exists")
                .and_utc(),
        ))
    }

    /// Persist `window_end` as the new checkpoint, atomically.
    pub fn record(&self, window_end: NaiveDate) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let instant = window_end
            .and_hms_opt(0, 0, 0)
            .expect("midnight always exists")
            .and_utc();

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, instant.to_rfc3339()).context("Failed to write checkpoint")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace checkpoint")?;

        info!("Checkpoint advanced to {window_end}");
        Ok(())
    }
}

/// Compute the date window for the next run.
///
/// With incremental sync disabled the manual window applies, defaulting
/// the end to today and the start to `lookback_days` before today. With
/// it enabled, the previous checkpoint (when present) overrides the
/// start, so repeated runs only consider new work.
pub fn next_window(
    previous: Option<DateTime<Utc>>,
    manual_start: Option<NaiveDate>,
    manual_end: Option<NaiveDate>,
    incremental: bool,
    lookback_days: u32,
    today: NaiveDate,
) -> DateWindow {
    let default_start = today
        .checked_sub_days(Days::new(lookback_days as u64))
        .unwrap_or(today);

    let start = if incremental {
        match previous {
            Some(checkpoint) => checkpoint.date_naive(),
            None => manual_start.unwrap_or(default_start),
        }
    } else {
        manual_start.unwrap_or(default_start)
    };

    let end = if incremental {
        today
    } else {
        manual_end.unwrap_or(today)
    };

    DateWindow::new(start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_record_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = SyncCheckpoint::new(&dir.path().join("checkpoint"));

        assert!(checkpoint.load().unwrap().is_none());

        checkpoint.record(date(2024, 1, 31)).unwrap();
        let loaded = checkpoint.load().unwrap().unwrap();
        assert_eq!(loaded.date_naive(), date(2024, 1, 31));
    }

    #[test]
    fn test_load_accepts_plain_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint");
        std::fs::write(&path, "2024-03-05\n").unwrap();

        let checkpoint = SyncCheckpoint::new(&path);
        let loaded = checkpoint.load().unwrap().unwrap();
        assert_eq!(loaded.date_naive(), date(2024, 3, 5));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint");
        std::fs::write(&path, "not a time").unwrap();

        assert!(SyncCheckpoint::new(&path).load().is_err());
    }

    #[test]
    fn test_manual_window_when_not_incremental() {
        let window = next_window(
            None,
            Some(date(2024, 1, 1)),
            Some(date(2024, 1, 31)),
            false,
            30,
            date(2024, 6, 15),
        );
        assert_eq!(window, DateWindow::new(date(2024, 1, 1), date(2024, 1, 31)));
    }

    #[test]
    fn test_defaults_when_nothing_configured() {
        let window = next_window(None, None, None, false, 30, date(2024, 6, 15));
        assert_eq!(window, DateWindow::new(date(2024, 5, 16), date(2024, 6, 15)));
    }

    #[test]
    fn test_incremental_first_run_uses_lookback() {
        let window = next_window(None, None, None, true, 30, date(2024, 6, 15));
        assert_eq!(window.start, date(2024, 5, 16));
        assert_eq!(window.end, date(2024, 6, 15));
    }

    #[test]
    fn test_incremental_first_run_prefers_manual_start() {
        let window = next_window(None, Some(date(2024, 1, 1)), None, true, 30, date(2024, 6, 15));
        assert_eq!(window.start, date(2024, 1, 1));
    }

    #[test]
    fn test_incremental_resumes_from_checkpoint() {
        let checkpoint = date(2024, 5, 1).and_hms_opt(0, 0, 0).unwrap().and_utc();
        let window = next_window(
            Some(checkpoint),
            Some(date(2024, 1, 1)),
            None,
            true,
            30,
            date(2024, 6, 15),
        );
        // the checkpoint wins over the manual start
        assert_eq!(window.start, date(2024, 5, 1));
        assert_eq!(window.end, date(2024, 6, 15));
    }

    #[test]
    fn test_window_start_never_precedes_previous_end() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = SyncCheckpoint::new(&dir.path().join("checkpoint"));

        let first = next_window(None, None, None, true, 30, date(2024, 1, 31));
        checkpoint.record(first.end).unwrap();

        let second = next_window(
            checkpoint.load().unwrap(),
            None,
            None,
            true,
            30,
            date(2024, 2, 20),
        );
        assert!(second.start >= first.end);
    }
}
