use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

const APP_DIR: &str = "recvault";

pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .context("Unable to determine config directory")
}

pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_DIR));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".local").join("share").join(APP_DIR));
    }
    Err(anyhow!("Unable to determine data directory"))
}

pub fn staging_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("staging"))
}

pub fn ledger_file() -> Result<PathBuf> {
    Ok(data_dir()?.join("completed-recordings.log"))
}

pub fn failed_log_file() -> Result<PathBuf> {
    Ok(data_dir()?.join("failed-transfers.log"))
}

pub fn checkpoint_file() -> Result<PathBuf> {
    Ok(data_dir()?.join("last-run.checkpoint"))
}

pub fn run_lock_file() -> Result<PathBuf> {
    Ok(data_dir()?.join("sync.lock"))
}
