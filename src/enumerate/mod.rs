//! Recording enumeration over a date window.
//!
//! The source API caps a single listing call at roughly one month, so the
//! requested window is split into 30-day slices per account. A listing
//! failure anywhere aborts the whole enumeration; callers treat that as
//! fatal for the run.

use crate::recording::RecordingDescriptor;
use crate::source::{RecordingSource, SourceError, UserAccount};
use chrono::{Days, NaiveDate};
use tracing::{debug, info};

/// An inclusive date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Split into inclusive slices of at most `days` days each.
    pub fn chunks(&self, days: u64) -> Vec<DateWindow> {
        assert!(days >= 1);
        let mut slices = Vec::new();
        let mut cursor = self.start;
        while cursor <= self.end {
            let slice_end = cursor
                .checked_add_days(Days::new(days - 1))
                .unwrap_or(self.end)
                .min(self.end);
            slices.push(DateWindow::new(cursor, slice_end));
            cursor = match slice_end.checked_add_days(Days::new(1)) {
                Some(next) => next,
                None => break,
            };
        }
        slices
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

const LISTING_SLICE_DAYS: u64 = 30;

pub struct Enumerator<'a> {
    source: &'a dyn RecordingSource,
}

impl<'a> Enumerator<'a> {
    pub fn new(source: &'a dyn RecordingSource) -> Self {
        Self { source }
    }

    /// All recordings owned by `accounts` starting inside `window`,
    /// ordered by account, then start time ascending.
    pub async fn enumerate(
        &self,
        accounts: &[UserAccount],
        window: DateWindow,
    ) -> Result<Vec<RecordingDescriptor>, SourceError> {
        let mut all = Vec::new();

        for account in accounts {
            let mut for_account = Vec::new();
            for slice in window.chunks(LISTING_SLICE_DAYS) {
                debug!("Listing recordings for {} over {slice}", account.email);
                let mut recordings = self
                    .source
                    .list_recordings(&account.id, slice.start, slice.end)
                    .await?;
                for_account.append(&mut recordings);
            }

            for_account.sort_by(|a, b| a.start_time.cmp(&b.start_time));
            if !for_account.is_empty() {
                info!(
                    "Found {} recording(s) for {}",
                    for_account.len(),
                    account.email
                );
            }
            all.append(&mut for_account);
        }

        Ok(all)
    }
}
