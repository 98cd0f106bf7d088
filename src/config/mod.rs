use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub recordings: RecordingsConfig,
    pub storage: StorageConfig,
    pub processing: ProcessingConfig,
    pub drive: DriveConfig,
    pub object_store: ObjectStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the meeting platform's REST API.
    pub api_base_url: String,
    /// Base URL of the platform's OAuth token endpoint.
    pub auth_base_url: String,
    pub account_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Also enumerate recordings owned by deactivated accounts.
    pub include_inactive_users: bool,
    /// Delete a recording from the source after its backup is committed.
    pub delete_after_sync: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.example.com/v2".to_string(),
            auth_base_url: "https://auth.example.com/oauth".to_string(),
            account_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            include_inactive_users: false,
            delete_after_sync: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingsConfig {
    /// Manual window start (YYYY-MM-DD). Empty means "lookback_days ago".
    pub start_date: String,
    /// Manual window end (YYYY-MM-DD). Empty means today.
    pub end_date: String,
    /// Derive the window start from the previous run's checkpoint.
    pub incremental: bool,
    /// First-run lookback when no start date or checkpoint exists.
    pub lookback_days: u32,
    /// strftime format applied to each recording's start time in templates.
    pub timestamp_format: String,
    /// Destination folder template. Fields: {topic} {meeting_time} {year}
    /// {month} {day} {rec_type} {recording_id} {file_extension}
    pub folder_template: String,
    /// Destination filename template. Same fields as folder_template.
    pub filename_template: String,
}

impl Default for RecordingsConfig {
    fn default() -> Self {
        Self {
            start_date: String::new(),
            end_date: String::new(),
            incremental: false,
            lookback_days: 30,
            timestamp_format: "%Y.%m.%d - %H.%M UTC".to_string(),
            folder_template: "{topic} - {meeting_time}".to_string(),
            filename_template: "{meeting_time} - {topic} - {rec_type} - {recording_id}.{file_extension}"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Drive,
    ObjectStore,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Drive => write!(f, "drive"),
            Self::ObjectStore => write!(f, "object_store"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Root directory for the local backend.
    pub local_root: PathBuf,
    /// Override for the download staging directory.
    pub staging_dir: Option<PathBuf>,
    /// Skip recordings already present in the completion ledger.
    pub use_completion_ledger: bool,
    pub ledger_path: Option<PathBuf>,
    pub failed_log_path: Option<PathBuf>,
    pub checkpoint_path: Option<PathBuf>,
    pub lock_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            local_root: PathBuf::from("recordings"),
            staging_dir: None,
            use_completion_ledger: true,
            ledger_path: None,
            failed_log_path: None,
            checkpoint_path: None,
            lock_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of recordings transferred in parallel.
    pub workers: usize,
    /// Total attempts per file placement, including the first.
    pub max_attempts: u32,
    /// Constant delay between attempts, in seconds.
    pub retry_delay_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            max_attempts: 3,
            retry_delay_secs: 5,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub root_folder: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Token endpoint; overridable for testing.
    pub token_url: String,
    /// API endpoint; overridable for testing.
    pub api_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    /// S3-compatible endpoint, e.g. "https://nyc3.digitaloceanspaces.com".
    pub endpoint_url: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Key prefix all placed objects live under.
    pub root_prefix: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            region: "us-east-1".to_string(),
            bucket: String::new(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            root_prefix: "recvault".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path()?)
    }

    pub fn load_from(config_path: PathBuf) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &std::path::Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }

    pub fn ledger_path(&self) -> Result<PathBuf> {
        match &self.storage.ledger_path {
            Some(path) => Ok(path.clone()),
            None => global::ledger_file(),
        }
    }

    pub fn failed_log_path(&self) -> Result<PathBuf> {
        match &self.storage.failed_log_path {
            Some(path) => Ok(path.clone()),
            None => global::failed_log_file(),
        }
    }

    pub fn checkpoint_path(&self) -> Result<PathBuf> {
        match &self.storage.checkpoint_path {
            Some(path) => Ok(path.clone()),
            None => global::checkpoint_file(),
        }
    }

    pub fn staging_path(&self) -> Result<PathBuf> {
        match &self.storage.staging_dir {
            Some(path) => Ok(path.clone()),
            None => global::staging_dir(),
        }
    }

    pub fn lock_path(&self) -> Result<PathBuf> {
        match &self.storage.lock_path {
            Some(path) => Ok(path.clone()),
            None => global::run_lock_file(),
        }
    }
}
