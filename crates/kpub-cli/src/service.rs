use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use kpub_core::CancellationToken;
use kpub_monitor::{EbookConvert, GrammersChatClient, MtprotoSettings, TerminalAuthenticator};
use kpub_supervisor::{ChatSupervisor, SupervisorDeps};

use crate::bootstrap::{preflight, spawn_shutdown_listener, Preflight};

pub(crate) async fn run_service(config_path: &Path) -> Result<()> {
    let preflight = preflight(config_path)?;
    let deps = supervisor_deps(&preflight);
    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    ChatSupervisor::new(config_path, preflight.config, deps)
        .run(shutdown)
        .await?;
    tracing::info!("kpub stopped");
    Ok(())
}

fn supervisor_deps(preflight: &Preflight) -> SupervisorDeps {
    let config = &preflight.config;
    SupervisorDeps {
        client: Arc::new(GrammersChatClient::new(MtprotoSettings {
            app_id: config.telegram.app_id,
            app_hash: config.telegram.app_hash.clone(),
            session_file: config.paths.session_file.clone(),
        })),
        authenticator: Arc::new(TerminalAuthenticator::terminal()),
        converter: Arc::new(EbookConvert::new(
            config.pipeline.converter_program.clone(),
        )),
        uploaders: Arc::clone(&preflight.uploaders),
    }
}
