mod bootstrap;
mod chat_commands;
mod cli_args;
mod service;

use anyhow::Result;
use clap::Parser;
use kpub_config::load_config;

use crate::bootstrap::{init_tracing, preflight};
use crate::chat_commands::{list_chats, remove_chat_from_file};
use crate::cli_args::{ChatCommand, Cli, CliCommand};
use crate::service::run_service;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command() {
        CliCommand::Run => run_service(&cli.config).await,
        CliCommand::CheckConfig => {
            let report = preflight(&cli.config)?;
            println!("{}", report.summary());
            Ok(())
        }
        CliCommand::Chat(ChatCommand::List) => {
            let config = load_config(&cli.config)?;
            list_chats(&config, &mut std::io::stdout().lock())
        }
        CliCommand::Chat(ChatCommand::Remove { handle, yes }) => {
            remove_chat_from_file(&cli.config, &handle, yes)
        }
    }
}
