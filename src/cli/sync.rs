//! CLI handler for the sync command.
//!
//! Loads the configuration, builds the HTTP source and the configured
//! storage backend, then hands off to the orchestration in `app`.

use crate::app::{self, SyncOptions};
use crate::cli::args::SyncCliArgs;
use crate::config::{BackendKind, Config};
use crate::source::HttpSource;
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;

pub async fn handle_sync_command(args: SyncCliArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if config.source.account_id.is_empty() || config.source.client_id.is_empty() {
        bail!(
            "Source credentials are not configured. Run `recvault config init` \
             or edit the config file first."
        );
    }

    let options = SyncOptions {
        from: parse_date(args.from.as_deref(), "--from")?,
        to: parse_date(args.to.as_deref(), "--to")?,
        workers: args.workers,
        backend: args.backend.as_deref().map(parse_backend).transpose()?,
        show_progress: !args.no_progress,
    };

    let backend_kind = options.backend.unwrap_or(config.storage.backend);
    let backend = app::build_backend(&config, backend_kind)?;

    let source = Arc::new(
        HttpSource::connect(&config.source)
            .await
            .context("Failed to authenticate with the recording source")?,
    );

    let summary = app::run_sync(&config, &options, source, backend).await?;

    println!("Sync summary:");
    println!("  succeeded: {}", summary.succeeded);
    println!("  failed:    {}", summary.failed);
    println!("  skipped:   {}", summary.skipped);
    if summary.cancelled > 0 {
        println!("  cancelled: {}", summary.cancelled);
    }

    Ok(())
}

fn parse_date(raw: Option<&str>, flag: &str) -> Result<Option<NaiveDate>> {
    match raw {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .with_context(|| format!("Invalid {flag} date {raw:?}, expected YYYY-MM-DD")),
    }
}

fn parse_backend(raw: &str) -> Result<BackendKind> {
    match raw {
        "local" => Ok(BackendKind::Local),
        "drive" => Ok(BackendKind::Drive),
        "object_store" | "s3" => Ok(BackendKind::ObjectStore),
        other => bail!("Unknown backend {other:?}; expected local, drive or object_store"),
    }
}
