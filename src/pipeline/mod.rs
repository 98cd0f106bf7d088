//! The sync pipeline: bounded-concurrency transfer of recordings.
//!
//! Recordings surviving the ledger check become transfer tasks on a shared
//! queue drained by a fixed pool of workers. Each task downloads all of
//! its recording's files into a per-recording staging directory, places
//! them through the storage backend under the retry policy, then commits
//! the recording id to the completion ledger. One recording's permanent
//! failure never blocks or aborts its siblings; disk exhaustion while
//! staging aborts the whole run, since every worker competes for the same
//! disk.

use crate::ledger::{CompletionLedger, FailedTransferLog};
use crate::recording::{staging_name, FileDescriptor, NameTemplates, RecordingDescriptor};
use crate::retry::RetryPolicy;
use crate::source::RecordingSource;
use crate::storage::{ProgressFn, StorageBackend};
use anyhow::{anyhow, Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Aggregated outcome of one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Tasks handed to the worker pool.
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Recordings skipped at submission time via the completion ledger.
    pub skipped: usize,
    /// Tasks left undone by a run-level cancellation.
    pub cancelled: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped, {} cancelled",
            self.succeeded, self.failed, self.skipped, self.cancelled
        )
    }
}

/// One recording's transfer, owned exclusively by the worker running it.
struct TransferTask {
    recording: RecordingDescriptor,
    /// Placement attempts consumed so far, across the task's files.
    attempts: u32,
}

enum TaskOutcome {
    Succeeded,
    FailedPermanently,
    Cancelled,
}

/// Tuning knobs for a pipeline instance.
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    pub staging_root: PathBuf,
    pub delete_after_sync: bool,
    pub show_progress: bool,
}

#[derive(Clone)]
pub struct SyncPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    source: Arc<dyn RecordingSource>,
    backend: Arc<dyn StorageBackend>,
    ledger: Arc<CompletionLedger>,
    failed_log: Arc<FailedTransferLog>,
    templates: Arc<NameTemplates>,
    retry: RetryPolicy,
    staging_root: PathBuf,
    delete_after_sync: bool,
    cancel: CancellationToken,
    progress: Option<MultiProgress>,
}

#[derive(Default)]
struct WorkerStats {
    succeeded: usize,
    failed: usize,
}

impl SyncPipeline {
    pub fn new(
        source: Arc<dyn RecordingSource>,
        backend: Arc<dyn StorageBackend>,
        ledger: Arc<CompletionLedger>,
        failed_log: Arc<FailedTransferLog>,
        templates: Arc<NameTemplates>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                source,
                backend,
                ledger,
                failed_log,
                templates,
                retry: config.retry,
                staging_root: config.staging_root,
                delete_after_sync: config.delete_after_sync,
                cancel: CancellationToken::new(),
                progress: config.show_progress.then(MultiProgress::new),
            }),
        }
    }

    /// Token that stops the run: no new tasks start, in-flight tasks
    /// abort at their next phase boundary without committing.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Transfer `recordings` with at most `concurrency` in flight.
    ///
    /// Returns the run summary, or an error when the run aborted fatally
    /// (state already written — ledger entries, failed-log lines — is
    /// preserved).
    pub async fn run(
        &self,
        recordings: Vec<RecordingDescriptor>,
        concurrency: usize,
    ) -> Result<RunSummary> {
        let concurrency = concurrency.max(1);

        let (tx, rx) = mpsc::channel(recordings.len().max(1));
        let mut submitted = 0;
        let mut skipped = 0;
        for recording in recordings {
            if self.inner.ledger.contains(&recording.id) {
                debug!("Skipping {} (already in completion ledger)", recording.id);
                skipped += 1;
                continue;
            }
            submitted += 1;
            tx.send(TransferTask {
                recording,
                attempts: 0,
            })
            .await
            .expect("queue sized to hold every submission");
        }
        drop(tx);

        info!(
            "Transferring {submitted} recording(s) with {concurrency} worker(s) to {}",
            self.inner.backend.describe()
        );

        let queue = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(concurrency);
        for worker_id in 0..concurrency {
            let inner = self.inner.clone();
            let queue = queue.clone();
            workers.push(tokio::spawn(worker_loop(inner, queue, worker_id)));
        }

        let mut stats = WorkerStats::default();
        let mut fatal: Option<anyhow::Error> = None;
        for handle in workers {
            match handle.await {
                Ok(Ok(worker_stats)) => {
                    stats.succeeded += worker_stats.succeeded;
                    stats.failed += worker_stats.failed;
                }
                Ok(Err(err)) => {
                    fatal.get_or_insert(err);
                }
                Err(join_err) => {
                    fatal.get_or_insert(anyhow!("worker panicked: {join_err}"));
                }
            }
        }

        if let Some(err) = fatal {
            return Err(err.context("sync run aborted"));
        }

        Ok(RunSummary {
            submitted,
            succeeded: stats.succeeded,
            failed: stats.failed,
            skipped,
            cancelled: submitted - stats.succeeded - stats.failed,
        })
    }
}

async fn worker_loop(
    inner: Arc<PipelineInner>,
    queue: Arc<Mutex<mpsc::Receiver<TransferTask>>>,
    worker_id: usize,
) -> Result<WorkerStats> {
    let mut stats = WorkerStats::default();
    loop {
        let task = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(mut task) = task else {
            break;
        };
        if inner.cancel.is_cancelled() {
            continue; // drain without processing; counted as cancelled
        }

        debug!(
            "[worker {worker_id}] Processing recording {} ({})",
            task.recording.id, task.recording.topic
        );
        match process_task(&inner, &mut task).await {
            Ok(TaskOutcome::Succeeded) => stats.succeeded += 1,
            Ok(TaskOutcome::FailedPermanently) => stats.failed += 1,
            Ok(TaskOutcome::Cancelled) => {}
            Err(err) => {
                // fatal for the whole run; stop the other workers too
                inner.cancel.cancel();
                return Err(err);
            }
        }
    }
    Ok(stats)
}

/// Drive one recording end to end. `Err` means the run must abort;
/// per-task failures come back as `TaskOutcome::FailedPermanently`.
async fn process_task(inner: &PipelineInner, task: &mut TransferTask) -> Result<TaskOutcome> {
    let TransferTask {
        recording,
        attempts,
    } = task;
    let recording = &*recording;
    let staging = inner.staging_root.join(staging_name(&recording.id));
    tokio::fs::create_dir_all(&staging)
        .await
        .with_context(|| format!("Failed to create staging dir {}", staging.display()))?;

    // Phase 1: every file fully staged before any upload begins.
    for file in &recording.files {
        if inner.cancel.is_cancelled() {
            cleanup_staging(&staging).await;
            return Ok(TaskOutcome::Cancelled);
        }

        let staged = staging.join(staged_filename(file));
        let bar = file_progress(inner, &format!("↓ {}", recording.topic), file.size);
        let result = inner
            .retry
            .run(|_| {
                let source = inner.source.clone();
                let locator = file.locator.clone();
                let file_id = file.file_id.clone();
                let size = file.size;
                let staged = staged.clone();
                let progress = bar.as_ref().map(|(_, report)| report.clone());
                async move {
                    source
                        .download_file(&locator, size, &file_id, &staged, progress)
                        .await
                }
            })
            .await;
        if let Some((pb, _)) = &bar {
            pb.finish_and_clear();
        }

        if let Err(err) = result {
            cleanup_staging(&staging).await;
            if err.is_disk_full() {
                return Err(anyhow!(
                    "staging disk exhausted while downloading {}: {err}",
                    file.file_id
                ));
            }
            inner
                .failed_log
                .append(&recording.id, &file.file_id, &format!("download: {err}"))?;
            warn!(
                "Recording {} failed permanently: could not stage {}",
                recording.id, file.file_id
            );
            return Ok(TaskOutcome::FailedPermanently);
        }
    }

    if inner.cancel.is_cancelled() {
        cleanup_staging(&staging).await;
        return Ok(TaskOutcome::Cancelled);
    }

    // Phase 2: place every staged file; one file's exhaustion does not
    // stop the others, but it does withhold the ledger commit.
    let mut any_failed = false;
    for file in &recording.files {
        if inner.cancel.is_cancelled() {
            cleanup_staging(&staging).await;
            return Ok(TaskOutcome::Cancelled);
        }

        let dest = inner.templates.destination(recording, file);
        let staged = staging.join(staged_filename(file));
        let bar = file_progress(inner, &format!("↑ {}", dest.filename), file.size);
        let placed = inner
            .retry
            .run(|attempt| {
                *attempts = attempt;
                let backend = inner.backend.clone();
                let staged = staged.clone();
                let dest = dest.clone();
                let progress = bar.as_ref().map(|(_, report)| report.clone());
                async move { backend.place(&staged, &dest, progress).await }
            })
            .await;
        if let Some((pb, _)) = &bar {
            pb.finish_and_clear();
        }

        match placed {
            Ok(location) => {
                debug!("Placed {} at {}", dest.filename, location.uri);
            }
            Err(err) => {
                inner
                    .failed_log
                    .append(&recording.id, &file.file_id, &err.to_string())?;
                any_failed = true;
            }
        }
    }

    if any_failed {
        cleanup_staging(&staging).await;
        warn!(
            "Recording {} failed permanently after {} placement attempt(s); \
             it will be retried on the next run",
            recording.id, *attempts
        );
        return Ok(TaskOutcome::FailedPermanently);
    }

    // All files durably placed: commit, then best-effort source cleanup.
    inner
        .ledger
        .commit(&recording.id)
        .context("Failed to commit to completion ledger")?;

    if inner.delete_after_sync {
        match inner.source.delete_recording(&recording.id).await {
            Ok(()) => info!("Deleted recording {} from source", recording.id),
            Err(err) => warn!(
                "Backup of {} committed but source deletion failed: {err}",
                recording.id
            ),
        }
    }

    cleanup_staging(&staging).await;
    Ok(TaskOutcome::Succeeded)
}

fn staged_filename(file: &FileDescriptor) -> String {
    if file.extension.is_empty() {
        file.file_id.clone()
    } else {
        format!("{}.{}", file.file_id, file.extension)
    }
}

async fn cleanup_staging(staging: &std::path::Path) {
    if let Err(err) = tokio::fs::remove_dir_all(staging).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to clean staging dir {}: {err}", staging.display());
        }
    }
}

fn file_progress(
    inner: &PipelineInner,
    label: &str,
    total: u64,
) -> Option<(ProgressBar, ProgressFn)> {
    let multi = inner.progress.as_ref()?;
    let bar = multi.add(ProgressBar::new(total.max(1)));
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes}")
            .unwrap()
            .progress_chars("━╸━"),
    );
    bar.set_message(label.to_string());

    let reporter = bar.clone();
    let report: ProgressFn = Arc::new(move |done, total| {
        if total > 0 {
            reporter.set_length(total);
        }
        reporter.set_position(done);
    });
    Some((bar, report))
}
