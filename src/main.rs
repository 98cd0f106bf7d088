use anyhow::Result;
use clap::Parser;
use recvault::cli::{handle_config_command, handle_sync_command, Cli, CliCommand, SyncCliArgs};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("recvault {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(CliCommand::Config(args)) => handle_config_command(args, cli.config),
        Some(CliCommand::Sync(args)) => handle_sync_command(args, cli.config).await,
        None => handle_sync_command(SyncCliArgs::default(), cli.config).await,
    }
}
