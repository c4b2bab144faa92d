use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use kpub_config::{load_config, KpubConfig};
use kpub_core::CancellationToken;
use kpub_storage::UploaderCache;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Validated configuration plus one uploader per distinct credential file.
pub(crate) struct Preflight {
    pub(crate) config: KpubConfig,
    pub(crate) uploaders: Arc<UploaderCache>,
}

impl Preflight {
    pub(crate) fn summary(&self) -> String {
        format!(
            "config ok: chats={} credential_files={}",
            self.config.chats.len(),
            self.uploaders.len()
        )
    }
}

/// Loads the configuration and opens every credential file it references.
/// Any failure here is fatal at startup.
pub(crate) fn preflight(config_path: &Path) -> Result<Preflight> {
    let config = load_config(config_path)?;
    let uploaders = Arc::new(UploaderCache::dropbox());
    for chat in config.resolved_chats() {
        uploaders
            .get_or_create(&chat.storage)
            .with_context(|| format!("failed to open credentials for chat '{}'", chat.handle))?;
    }
    tracing::info!(
        path = %config_path.display(),
        chats = config.chats.len(),
        credential_files = uploaders.len(),
        "configuration loaded"
    );
    Ok(Preflight { config, uploaders })
}

/// Cancels `shutdown` on Ctrl-C, or SIGTERM on unix.
pub(crate) fn spawn_shutdown_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(error) => {
            tracing::warn!(error = %error, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
