use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kpub_config::DEFAULT_CONFIG_PATH;

#[derive(Debug, Parser)]
#[command(
    name = "kpub",
    about = "Forward e-books sent to Telegram chats to a Kobo reader through Dropbox",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "KPUB_CONFIG",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Path to the YAML configuration file"
    )]
    pub(crate) config: PathBuf,

    #[command(subcommand)]
    pub(crate) command: Option<CliCommand>,
}

#[derive(Debug, Clone, Subcommand, PartialEq, Eq)]
pub(crate) enum CliCommand {
    /// Connect to Telegram and process incoming files (default).
    Run,
    /// Validate the configuration and credential files, then exit.
    CheckConfig,
    /// Inspect or edit the monitored chats.
    #[command(subcommand)]
    Chat(ChatCommand),
}

#[derive(Debug, Clone, Subcommand, PartialEq, Eq)]
pub(crate) enum ChatCommand {
    /// Print the configured chats with their resolved settings.
    List,
    /// Remove a chat and rewrite the configuration file.
    Remove {
        #[arg(help = "Chat handle, including the leading @")]
        handle: String,
        #[arg(long, help = "Confirm the removal")]
        yes: bool,
    },
}

impl Cli {
    pub(crate) fn command(&self) -> CliCommand {
        self.command.clone().unwrap_or(CliCommand::Run)
    }
}
