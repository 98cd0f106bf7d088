//! Run orchestration: wires the window state, enumerator, worker pool and
//! checkpoint together for one sync invocation.

use crate::checkpoint::{next_window, SyncCheckpoint};
use crate::config::{BackendKind, Config};
use crate::enumerate::{DateWindow, Enumerator};
use crate::ledger::{CompletionLedger, FailedTransferLog};
use crate::pipeline::{PipelineConfig, RunSummary, SyncPipeline};
use crate::recording::NameTemplates;
use crate::retry::RetryPolicy;
use crate::source::RecordingSource;
use crate::storage::{DriveBackend, LocalBackend, ObjectStoreBackend, StorageBackend};
use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use fs2::FileExt;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Overrides from the command line, applied on top of the config file.
#[derive(Debug, Default)]
pub struct SyncOptions {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub workers: Option<usize>,
    pub backend: Option<BackendKind>,
    pub show_progress: bool,
}

/// Construct the configured storage backend.
pub fn build_backend(config: &Config, kind: BackendKind) -> Result<Arc<dyn StorageBackend>> {
    Ok(match kind {
        BackendKind::Local => Arc::new(LocalBackend::new(config.storage.local_root.clone())),
        BackendKind::Drive => {
            if config.drive.refresh_token.is_empty() {
                bail!("Drive backend selected but [drive] refresh_token is not configured");
            }
            Arc::new(DriveBackend::new(&config.drive))
        }
        BackendKind::ObjectStore => {
            if config.object_store.bucket.is_empty() {
                bail!("Object store backend selected but [object_store] bucket is not configured");
            }
            Arc::new(ObjectStoreBackend::new(&config.object_store))
        }
    })
}

/// Execute one full sync run against the given collaborators.
///
/// Fatal conditions (enumeration failure, staging disk exhaustion, state
/// file corruption, a second concurrent run) surface as `Err`; per-task
/// transfer failures are aggregated into the returned summary.
pub async fn run_sync(
    config: &Config,
    options: &SyncOptions,
    source: Arc<dyn RecordingSource>,
    backend: Arc<dyn StorageBackend>,
) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    info!("Starting sync run {run_id}");

    // one run at a time: every run mutates the same ledger and checkpoint
    let lock_path = config.lock_path()?;
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let lock_file = File::create(&lock_path)
        .with_context(|| format!("Failed to create lock file {}", lock_path.display()))?;
    if lock_file.try_lock_exclusive().is_err() {
        bail!("Another sync run holds {}", lock_path.display());
    }

    let checkpoint = SyncCheckpoint::new(&config.checkpoint_path()?);
    let window = resolve_window(config, options, &checkpoint)?;
    info!("Sync window: {window}");

    let ledger = Arc::new(CompletionLedger::open(
        &config.ledger_path()?,
        config.storage.use_completion_ledger,
    )?);
    let failed_log = Arc::new(FailedTransferLog::open(&config.failed_log_path()?)?);
    let templates = Arc::new(NameTemplates::from_config(&config.recordings)?);

    let accounts = source
        .list_users(config.source.include_inactive_users)
        .await
        .context("Failed to list user accounts")?;
    if accounts.is_empty() {
        bail!("No user accounts found");
    }

    let recordings = Enumerator::new(&*source)
        .enumerate(&accounts, window)
        .await
        .context("Enumeration failed; checkpoint not advanced")?;
    info!("Enumerated {} recording(s) in window", recordings.len());

    let pipeline = SyncPipeline::new(
        source,
        backend,
        ledger,
        failed_log,
        templates,
        PipelineConfig {
            retry: RetryPolicy::new(
                config.processing.max_attempts,
                Duration::from_secs(config.processing.retry_delay_secs),
            ),
            staging_root: config.staging_path()?,
            delete_after_sync: config.source.delete_after_sync,
            show_progress: options.show_progress,
        },
    );

    // let the operator interrupt without losing committed state
    let cancel = pipeline.cancellation_token();
    let signal_watch = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing in-flight work");
                cancel.cancel();
            }
        }
    });

    let workers = options.workers.unwrap_or(config.processing.workers);
    let result = pipeline.run(recordings, workers).await;
    signal_watch.abort();
    let summary = result?;

    if cancel.is_cancelled() {
        warn!("Run cancelled; checkpoint not advanced ({summary})");
    } else {
        // enumeration covered the full window, so future incremental runs
        // may start after it; failed transfers are re-driven by the
        // ledger, not the window
        checkpoint.record(window.end)?;
        info!("Sync run {run_id} complete: {summary}");
    }

    Ok(summary)
}

fn resolve_window(
    config: &Config,
    options: &SyncOptions,
    checkpoint: &SyncCheckpoint,
) -> Result<DateWindow> {
    let manual_start = match &options.from {
        Some(date) => Some(*date),
        None => parse_config_date(&config.recordings.start_date, "recordings.start_date")?,
    };
    let manual_end = match &options.to {
        Some(date) => Some(*date),
        None => parse_config_date(&config.recordings.end_date, "recordings.end_date")?,
    };

    // an explicit --from pins the window for this run; the checkpoint
    // only drives the start when the operator left it open
    let incremental = config.recordings.incremental && options.from.is_none();

    let window = next_window(
        checkpoint.load()?,
        manual_start,
        manual_end,
        incremental,
        config.recordings.lookback_days,
        Utc::now().date_naive(),
    );
    if window.start > window.end {
        bail!("Sync window is empty: {window}");
    }
    Ok(window)
}

fn parse_config_date(raw: &str, key: &str) -> Result<Option<NaiveDate>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid {key} {raw:?}, expected YYYY-MM-DD"))?;
    Ok(Some(date))
}
