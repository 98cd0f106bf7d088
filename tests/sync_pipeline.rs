//! End-to-end pipeline tests against in-memory collaborators.
//!
//! These drive the public pipeline and orchestration APIs with a mock
//! recording source and storage backend, covering dedup, retry bounds,
//! failure isolation, checkpoint advancement and idempotent re-runs.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use recvault::app::{self, SyncOptions};
use recvault::checkpoint::SyncCheckpoint;
use recvault::config::Config;
use recvault::ledger::{CompletionLedger, FailedTransferLog};
use recvault::pipeline::{PipelineConfig, SyncPipeline};
use recvault::recording::{DestinationSpec, FileDescriptor, NameTemplates, RecordingDescriptor};
use recvault::retry::RetryPolicy;
use recvault::source::{ProgressFn, RecordingSource, SourceError, UserAccount};
use recvault::storage::{PlacedLocation, StorageBackend, TransferError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

struct MockSource {
    users: Vec<UserAccount>,
    recordings: Vec<RecordingDescriptor>,
    fail_listing: bool,
    deleted: Mutex<Vec<String>>,
}

impl MockSource {
    fn new(recordings: Vec<RecordingDescriptor>) -> Self {
        Self {
            users: vec![UserAccount {
                id: "user-1".to_string(),
                email: "user-1@example.com".to_string(),
                active: true,
            }],
            recordings,
            fail_listing: false,
            deleted: Mutex::new(Vec::new()),
        }
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordingSource for MockSource {
    async fn list_users(&self, _include_inactive: bool) -> Result<Vec<UserAccount>, SourceError> {
        Ok(self.users.clone())
    }

    async fn list_recordings(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RecordingDescriptor>, SourceError> {
        if self.fail_listing {
            return Err(SourceError::Api {
                status: 500,
                body: "listing exploded".to_string(),
            });
        }
        Ok(self
            .recordings
            .iter()
            .filter(|rec| {
                rec.account == user_id
                    && rec.start_time.date() >= start
                    && rec.start_time.date() <= end
            })
            .cloned()
            .collect())
    }

    async fn download_file(
        &self,
        _locator: &str,
        expected_size: u64,
        _file_id: &str,
        dest: &Path,
        _progress: Option<ProgressFn>,
    ) -> Result<(), SourceError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = if expected_size > 0 {
            vec![b'x'; expected_size as usize]
        } else {
            b"metadata".to_vec()
        };
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }

    async fn delete_recording(&self, recording_id: &str) -> Result<(), SourceError> {
        self.deleted.lock().unwrap().push(recording_id.to_string());
        Ok(())
    }
}

/// Backend that fails each file's first N placement attempts, keyed by
/// the staged file's stem (the file id).
struct MockBackend {
    fail_first: HashMap<String, u32>,
    attempts: Mutex<HashMap<String, u32>>,
    placed: Mutex<HashMap<String, u64>>,
}

impl MockBackend {
    fn new() -> Self {
        Self {
            fail_first: HashMap::new(),
            attempts: Mutex::new(HashMap::new()),
            placed: Mutex::new(HashMap::new()),
        }
    }

    fn failing(file_id: &str, first_attempts: u32) -> Self {
        let mut backend = Self::new();
        backend
            .fail_first
            .insert(file_id.to_string(), first_attempts);
        backend
    }

    fn attempts_for(&self, file_id: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(file_id)
            .copied()
            .unwrap_or(0)
    }

    fn placed_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.placed.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn describe(&self) -> String {
        "mock".to_string()
    }

    async fn place(
        &self,
        staged: &Path,
        dest: &DestinationSpec,
        _progress: Option<ProgressFn>,
    ) -> Result<PlacedLocation, TransferError> {
        let file_id = staged
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let counter = attempts.entry(file_id.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        if attempt <= self.fail_first.get(&file_id).copied().unwrap_or(0) {
            return Err(TransferError::Api {
                status: 503,
                body: format!("induced failure on attempt {attempt}"),
            });
        }

        let size = tokio::fs::metadata(staged).await?.len();
        // overwrite-in-place: re-placing the same path never duplicates
        self.placed
            .lock()
            .unwrap()
            .insert(dest.relative_path(), size);
        Ok(PlacedLocation {
            uri: format!("mock://{}", dest.relative_path()),
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn datetime(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

fn file(file_id: &str, size: u64) -> FileDescriptor {
    FileDescriptor {
        file_id: file_id.to_string(),
        extension: "mp4".to_string(),
        size,
        locator: format!("https://source.example.com/dl/{file_id}"),
        recording_type: "shared_screen_with_speaker".to_string(),
    }
}

fn recording(id: &str, day: u32, files: Vec<FileDescriptor>) -> RecordingDescriptor {
    RecordingDescriptor {
        id: id.to_string(),
        account: "user-1".to_string(),
        topic: format!("Meeting {id}"),
        start_time: datetime(2024, 1, day),
        files,
    }
}

fn january_recordings() -> Vec<RecordingDescriptor> {
    vec![
        recording("R1", 10, vec![file("r1-video", 64), file("r1-audio", 16)]),
        recording("R2", 20, vec![file("r2-video", 32)]),
    ]
}

struct Harness {
    dir: TempDir,
    templates: Arc<NameTemplates>,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            templates: Arc::new(
                NameTemplates::new(
                    "{topic}",
                    "{rec_type} - {recording_id}.{file_extension}",
                    "%Y.%m.%d",
                )
                .unwrap(),
            ),
        }
    }

    fn ledger(&self) -> Arc<CompletionLedger> {
        Arc::new(CompletionLedger::open(&self.dir.path().join("ledger.log"), true).unwrap())
    }

    fn failed_log(&self) -> Arc<FailedTransferLog> {
        Arc::new(FailedTransferLog::open(&self.dir.path().join("failed.log")).unwrap())
    }

    fn failed_log_lines(&self) -> Vec<String> {
        match std::fs::read_to_string(self.dir.path().join("failed.log")) {
            Ok(content) => content.lines().map(String::from).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn pipeline(
        &self,
        source: Arc<MockSource>,
        backend: Arc<MockBackend>,
        ledger: Arc<CompletionLedger>,
        delete_after_sync: bool,
    ) -> SyncPipeline {
        SyncPipeline::new(
            source,
            backend,
            ledger,
            self.failed_log(),
            self.templates.clone(),
            PipelineConfig {
                retry: RetryPolicy::new(3, Duration::from_millis(1)),
                staging_root: self.dir.path().join("staging"),
                delete_after_sync,
                show_progress: false,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Pipeline behavior
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failure_recovers_within_retry_limit() {
    // R2's only file fails on attempts 1-2 and succeeds on attempt 3;
    // R1 succeeds immediately.
    let harness = Harness::new();
    let source = Arc::new(MockSource::new(january_recordings()));
    let backend = Arc::new(MockBackend::failing("r2-video", 2));
    let ledger = harness.ledger();

    let pipeline = harness.pipeline(source, backend.clone(), ledger.clone(), false);
    let summary = pipeline.run(january_recordings(), 2).await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert!(ledger.contains("R1"));
    assert!(ledger.contains("R2"));
    assert_eq!(backend.attempts_for("r2-video"), 3);
    assert_eq!(backend.attempts_for("r1-video"), 1);
    assert!(harness.failed_log_lines().is_empty());
}

#[tokio::test]
async fn permanent_failure_is_isolated_and_logged_once() {
    // R2's file always fails: R1 still commits, R2 is withheld from the
    // ledger and lands in the failed log exactly once.
    let harness = Harness::new();
    let source = Arc::new(MockSource::new(january_recordings()));
    let backend = Arc::new(MockBackend::failing("r2-video", u32::MAX));
    let ledger = harness.ledger();

    let pipeline = harness.pipeline(source, backend.clone(), ledger.clone(), false);
    let summary = pipeline.run(january_recordings(), 2).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert!(ledger.contains("R1"));
    assert!(!ledger.contains("R2"));
    // exactly max_attempts placement attempts, one failed-log line
    assert_eq!(backend.attempts_for("r2-video"), 3);
    let lines = harness.failed_log_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("R2"));
    assert!(lines[0].contains("r2-video"));
}

#[tokio::test]
async fn ledger_members_are_skipped_at_submission() {
    let harness = Harness::new();
    let source = Arc::new(MockSource::new(january_recordings()));
    let backend = Arc::new(MockBackend::new());
    let ledger = harness.ledger();
    ledger.commit("R1").unwrap();

    let pipeline = harness.pipeline(source, backend.clone(), ledger.clone(), false);
    let summary = pipeline.run(january_recordings(), 2).await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 1);
    // no transfer task was created for R1
    assert_eq!(backend.attempts_for("r1-video"), 0);
    assert_eq!(backend.attempts_for("r1-audio"), 0);
    assert_eq!(backend.attempts_for("r2-video"), 1);
}

#[tokio::test]
async fn second_run_over_same_window_transfers_nothing() {
    let harness = Harness::new();
    let source = Arc::new(MockSource::new(january_recordings()));
    let backend = Arc::new(MockBackend::new());

    let first_ledger = harness.ledger();
    let pipeline = harness.pipeline(source.clone(), backend.clone(), first_ledger, false);
    pipeline.run(january_recordings(), 2).await.unwrap();

    // fresh ledger instance reloads the same file, as a new process would
    let second_ledger = harness.ledger();
    let pipeline = harness.pipeline(source, backend.clone(), second_ledger.clone(), false);
    let summary = pipeline.run(january_recordings(), 2).await.unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(second_ledger.len(), 2);
    // destination saw each file exactly once across both runs
    assert_eq!(backend.attempts_for("r1-video"), 1);
    assert_eq!(backend.attempts_for("r2-video"), 1);
    assert_eq!(backend.placed_paths().len(), 3);
}

#[tokio::test]
async fn disabled_ledger_reprocesses_without_duplicates() {
    let harness = Harness::new();
    let source = Arc::new(MockSource::new(january_recordings()));
    let backend = Arc::new(MockBackend::new());

    for _ in 0..2 {
        let pipeline = harness.pipeline(
            source.clone(),
            backend.clone(),
            Arc::new(CompletionLedger::disabled()),
            false,
        );
        let summary = pipeline.run(january_recordings(), 2).await.unwrap();
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.succeeded, 2);
    }

    // both runs attempted the transfer, destination stayed non-duplicated
    assert_eq!(backend.attempts_for("r1-video"), 2);
    assert_eq!(backend.attempts_for("r2-video"), 2);
    assert_eq!(backend.placed_paths().len(), 3);
}

#[tokio::test]
async fn deletion_runs_only_for_committed_recordings() {
    let harness = Harness::new();
    let source = Arc::new(MockSource::new(january_recordings()));
    let backend = Arc::new(MockBackend::failing("r2-video", u32::MAX));
    let ledger = harness.ledger();

    let pipeline = harness.pipeline(source.clone(), backend, ledger, true);
    pipeline.run(january_recordings(), 2).await.unwrap();

    assert_eq!(source.deleted(), vec!["R1".to_string()]);
}

#[tokio::test]
async fn cancelled_run_commits_and_deletes_nothing() {
    let harness = Harness::new();
    let source = Arc::new(MockSource::new(january_recordings()));
    let backend = Arc::new(MockBackend::new());
    let ledger = harness.ledger();

    let pipeline = harness.pipeline(source.clone(), backend.clone(), ledger.clone(), true);
    pipeline.cancellation_token().cancel();
    let summary = pipeline.run(january_recordings(), 2).await.unwrap();

    assert_eq!(summary.cancelled, 2);
    assert_eq!(summary.succeeded, 0);
    assert!(ledger.is_empty());
    assert!(backend.placed_paths().is_empty());
    assert!(source.deleted().is_empty());
}

#[tokio::test]
async fn staging_is_cleaned_up_after_both_outcomes() {
    let harness = Harness::new();
    let source = Arc::new(MockSource::new(january_recordings()));
    let backend = Arc::new(MockBackend::failing("r2-video", u32::MAX));

    let pipeline = harness.pipeline(source, backend, harness.ledger(), false);
    pipeline.run(january_recordings(), 2).await.unwrap();

    let staging = harness.dir.path().join("staging");
    let leftovers = match std::fs::read_dir(&staging) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    };
    assert_eq!(leftovers, 0);
}

// ---------------------------------------------------------------------------
// Orchestration: window, checkpoint, fatal paths
// ---------------------------------------------------------------------------

fn harness_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.recordings.start_date = "2024-01-01".to_string();
    config.recordings.end_date = "2024-01-31".to_string();
    config.recordings.folder_template = "{topic}".to_string();
    config.storage.staging_dir = Some(dir.path().join("staging"));
    config.storage.ledger_path = Some(dir.path().join("ledger.log"));
    config.storage.failed_log_path = Some(dir.path().join("failed.log"));
    config.storage.checkpoint_path = Some(dir.path().join("checkpoint"));
    config.storage.lock_path = Some(dir.path().join("sync.lock"));
    config.processing.workers = 2;
    config.processing.max_attempts = 3;
    config.processing.retry_delay_secs = 0;
    config
}

fn quiet_options() -> SyncOptions {
    SyncOptions {
        show_progress: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn checkpoint_advances_despite_permanent_transfer_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = harness_config(&dir);
    let source = Arc::new(MockSource::new(january_recordings()));
    let backend = Arc::new(MockBackend::failing("r2-video", u32::MAX));

    let summary = app::run_sync(&config, &quiet_options(), source, backend)
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);

    // enumeration finished, so the checkpoint still advances to the
    // window end even though a transfer failed
    let checkpoint = SyncCheckpoint::new(&dir.path().join("checkpoint"));
    let recorded = checkpoint.load().unwrap().unwrap();
    assert_eq!(recorded.date_naive(), NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
}

#[tokio::test]
async fn happy_path_commits_everything_and_advances_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = harness_config(&dir);
    let source = Arc::new(MockSource::new(january_recordings()));
    let backend = Arc::new(MockBackend::failing("r2-video", 2));

    let summary = app::run_sync(&config, &quiet_options(), source, backend)
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);

    let ledger = CompletionLedger::open(&dir.path().join("ledger.log"), true).unwrap();
    assert!(ledger.contains("R1"));
    assert!(ledger.contains("R2"));
    assert!(std::fs::read_to_string(dir.path().join("failed.log"))
        .map(|content| content.is_empty())
        .unwrap_or(true));

    let checkpoint = SyncCheckpoint::new(&dir.path().join("checkpoint"));
    let recorded = checkpoint.load().unwrap().unwrap();
    assert_eq!(recorded.date_naive(), NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
}

#[tokio::test]
async fn enumeration_failure_is_fatal_and_freezes_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = harness_config(&dir);
    let mut source = MockSource::new(january_recordings());
    source.fail_listing = true;
    let backend = Arc::new(MockBackend::new());

    let result = app::run_sync(&config, &quiet_options(), Arc::new(source), backend.clone()).await;

    assert!(result.is_err());
    assert!(backend.placed_paths().is_empty());
    let checkpoint = SyncCheckpoint::new(&dir.path().join("checkpoint"));
    assert!(checkpoint.load().unwrap().is_none());
}
