use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "recvault")]
#[command(about = "Sync cloud meeting recordings to durable storage", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file (default: platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run one sync pass over the configured date window (the default)
    Sync(SyncCliArgs),
    /// Show or interactively create the configuration
    Config(ConfigCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug, Default)]
pub struct SyncCliArgs {
    /// Window start (YYYY-MM-DD), overriding config and checkpoint
    #[arg(long)]
    pub from: Option<String>,
    /// Window end (YYYY-MM-DD), overriding config
    #[arg(long)]
    pub to: Option<String>,
    /// Number of parallel transfers, overriding config
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// Storage backend: local, drive or object_store
    #[arg(short, long)]
    pub backend: Option<String>,
    /// Disable per-file progress bars
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ConfigCliArgs {
    #[command(subcommand)]
    pub command: Option<ConfigCommand>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the active configuration and its location
    Show,
    /// Interactive first-time setup wizard
    Init,
}
