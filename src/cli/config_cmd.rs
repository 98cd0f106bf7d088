//! CLI handler for configuration inspection and first-time setup.
//!
//! This module handles terminal presentation and user interaction; the
//! configuration model itself lives in the `config` module.

use crate::cli::args::{ConfigCliArgs, ConfigCommand};
use crate::config::{BackendKind, Config};
use crate::global;
use anyhow::{Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password, Select};
use std::io::{self, IsTerminal};
use std::path::PathBuf;

pub fn handle_config_command(args: ConfigCliArgs, config_path: Option<PathBuf>) -> Result<()> {
    match args.command {
        Some(ConfigCommand::Show) | None => handle_show(config_path),
        Some(ConfigCommand::Init) => handle_init(config_path),
    }
}

fn resolve_path(config_path: Option<PathBuf>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path),
        None => global::config_file(),
    }
}

fn handle_show(config_path: Option<PathBuf>) -> Result<()> {
    let path = resolve_path(config_path)?;
    let config = Config::load_from(path.clone())?;

    println!();
    println!("Recvault Configuration");
    println!("======================");
    println!();
    println!("Source API:    {}", config.source.api_base_url);
    println!("Account:       {}", display_value(&config.source.account_id));
    println!("Client id:     {}", display_value(&config.source.client_id));
    println!("Client secret: {}", mask_secret(&config.source.client_secret));
    println!();
    println!("Backend:       {}", config.storage.backend);
    println!("Local root:    {}", config.storage.local_root.display());
    println!("Use ledger:    {}", config.storage.use_completion_ledger);
    println!("Incremental:   {}", config.recordings.incremental);
    println!("Workers:       {}", config.processing.workers);
    println!(
        "Retry:         {} attempts, {}s delay",
        config.processing.max_attempts, config.processing.retry_delay_secs
    );
    println!();
    println!("Config file:   {}", path.display());

    Ok(())
}

/// Interactive first-time setup. Asks only for what the chosen backend
/// actually needs and writes the rest as defaults.
fn handle_init(config_path: Option<PathBuf>) -> Result<()> {
    if !io::stdin().is_terminal() {
        anyhow::bail!("`recvault config init` needs an interactive terminal; edit the config file instead");
    }

    let theme = ColorfulTheme::default();
    let path = resolve_path(config_path)?;
    let mut config = if path.exists() {
        Config::load_from(path.clone())?
    } else {
        Config::default()
    };

    println!();
    println!("Recvault Setup");
    println!("==============");
    println!();

    config.source.api_base_url = Input::with_theme(&theme)
        .with_prompt("Recording source API base URL")
        .default(config.source.api_base_url.clone())
        .interact_text()?;
    config.source.account_id = Input::with_theme(&theme)
        .with_prompt("Account id")
        .default(config.source.account_id.clone())
        .interact_text()?;
    config.source.client_id = Input::with_theme(&theme)
        .with_prompt("OAuth client id")
        .default(config.source.client_id.clone())
        .interact_text()?;
    config.source.client_secret = Password::with_theme(&theme)
        .with_prompt("OAuth client secret")
        .interact()?;

    let backends = ["Local disk", "Drive", "S3-compatible object store"];
    let selection = Select::with_theme(&theme)
        .with_prompt("Where should recordings be stored?")
        .items(&backends)
        .default(0)
        .interact()?;

    config.storage.backend = match selection {
        0 => {
            let root: String = Input::with_theme(&theme)
                .with_prompt("Local destination directory")
                .default(config.storage.local_root.display().to_string())
                .interact_text()?;
            config.storage.local_root = PathBuf::from(root);
            BackendKind::Local
        }
        1 => {
            config.drive.root_folder = Input::with_theme(&theme)
                .with_prompt("Drive root folder name")
                .default(if config.drive.root_folder.is_empty() {
                    "recvault".to_string()
                } else {
                    config.drive.root_folder.clone()
                })
                .interact_text()?;
            config.drive.client_id = Input::with_theme(&theme)
                .with_prompt("Drive OAuth client id")
                .default(config.drive.client_id.clone())
                .interact_text()?;
            config.drive.client_secret = Password::with_theme(&theme)
                .with_prompt("Drive OAuth client secret")
                .interact()?;
            config.drive.refresh_token = Password::with_theme(&theme)
                .with_prompt("Drive OAuth refresh token")
                .interact()?;
            BackendKind::Drive
        }
        _ => {
            config.object_store.endpoint_url = Input::with_theme(&theme)
                .with_prompt("Object store endpoint URL")
                .default(config.object_store.endpoint_url.clone())
                .interact_text()?;
            config.object_store.region = Input::with_theme(&theme)
                .with_prompt("Region")
                .default(config.object_store.region.clone())
                .interact_text()?;
            config.object_store.bucket = Input::with_theme(&theme)
                .with_prompt("Bucket")
                .default(config.object_store.bucket.clone())
                .interact_text()?;
            config.object_store.access_key_id = Input::with_theme(&theme)
                .with_prompt("Access key id")
                .default(config.object_store.access_key_id.clone())
                .interact_text()?;
            config.object_store.secret_access_key = Password::with_theme(&theme)
                .with_prompt("Secret access key")
                .interact()?;
            BackendKind::ObjectStore
        }
    };

    config.recordings.incremental = Confirm::with_theme(&theme)
        .with_prompt("Enable incremental sync (start each run from the last checkpoint)?")
        .default(true)
        .interact()?;
    config.source.delete_after_sync = Confirm::with_theme(&theme)
        .with_prompt("Delete recordings from the source after a committed backup?")
        .default(false)
        .interact()?;

    config
        .save_to(&path)
        .context("Failed to write configuration")?;
    println!();
    println!("Configuration written to {}", path.display());
    println!("Run `recvault sync` to start the first sync.");

    Ok(())
}

fn display_value(value: &str) -> &str {
    if value.is_empty() {
        "<not set>"
    } else {
        value
    }
}

fn mask_secret(value: &str) -> String {
    if value.is_empty() {
        "<not set>".to_string()
    } else {
        format!("{}…", &value[..value.len().min(4)])
    }
}
