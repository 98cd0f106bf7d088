pub mod args;
pub mod config_cmd;
pub mod sync;

pub use args::{Cli, CliCommand, ConfigCliArgs, ConfigCommand, SyncCliArgs};
pub use config_cmd::handle_config_command;
pub use sync::handle_sync_command;
