use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use kpub_config::KpubConfig;
use kpub_core::CancellationToken;
use kpub_monitor::{Authenticator, ChatClient, Converter, MonitorSettings, SessionMonitor};
use kpub_storage::UploaderCache;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::chat_reconciler::ChatReconciler;
use crate::config_watcher::ConfigWatcher;
use crate::debounce::Debouncer;

/// Collaborators the supervisor hands to the monitor it builds.
pub struct SupervisorDeps {
    pub client: Arc<dyn ChatClient>,
    pub authenticator: Arc<dyn Authenticator>,
    pub converter: Arc<dyn Converter>,
    pub uploaders: Arc<UploaderCache>,
}

/// Owns the session monitor and keeps its chat registry in step with the
/// configuration file.
pub struct ChatSupervisor {
    config_path: PathBuf,
    config: KpubConfig,
    monitor: Arc<SessionMonitor>,
    uploaders: Arc<UploaderCache>,
    reloads: watch::Sender<u64>,
}

impl ChatSupervisor {
    pub fn new(config_path: &Path, config: KpubConfig, deps: SupervisorDeps) -> Self {
        let monitor = Arc::new(SessionMonitor::new(
            deps.client,
            deps.authenticator,
            deps.converter,
            MonitorSettings::from_config(&config),
        ));
        let (reloads, _) = watch::channel(0);
        Self {
            config_path: config_path.to_path_buf(),
            config,
            monitor,
            uploaders: deps.uploaders,
            reloads,
        }
    }

    pub fn monitor(&self) -> Arc<SessionMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Counts reload passes, successful or not.
    pub fn subscribe_reloads(&self) -> watch::Receiver<u64> {
        self.reloads.subscribe()
    }

    /// Runs until `shutdown` fires or the monitor exits on its own. The
    /// monitor is always drained before this returns.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let monitor_shutdown = CancellationToken::new();
        let mut monitor_task: JoinHandle<Result<()>> = {
            let monitor = Arc::clone(&self.monitor);
            let token = monitor_shutdown.clone();
            tokio::spawn(async move { monitor.run(token).await })
        };

        let mut state = self.monitor.subscribe_state();
        tokio::select! {
            ready = async { state.wait_for(|state| state.accepts_chats()).await.is_ok() } => {
                if !ready {
                    monitor_shutdown.cancel();
                    return join_monitor(monitor_task).await;
                }
            }
            joined = &mut monitor_task => return Err(exit_error(joined, "during startup")),
            _ = shutdown.cancelled() => {
                monitor_shutdown.cancel();
                return join_monitor(monitor_task).await;
            }
        }

        let mut reconciler = ChatReconciler::new(
            self.monitor.clone(),
            Arc::clone(&self.uploaders),
            self.config.clone(),
        );
        let summary = reconciler.register_all().await;
        tracing::info!(
            chats = summary.added,
            failed = summary.failed.len(),
            "initial chats registered"
        );

        let (watcher, mut events) = match ConfigWatcher::start(&self.config_path) {
            Ok(started) => started,
            Err(error) => {
                monitor_shutdown.cancel();
                if let Err(drain_error) = join_monitor(monitor_task).await {
                    tracing::error!(
                        error = %format!("{drain_error:#}"),
                        "monitor failed while draining after watcher startup failure"
                    );
                }
                return Err(error);
            }
        };
        let debouncer = Debouncer::new(Duration::from_millis(
            self.config.pipeline.reload_debounce_ms,
        ));
        tracing::info!(path = %watcher.path().display(), "watching config file for changes");

        let outcome = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("shutdown requested, stopping monitor");
                    break Ok(());
                }
                joined = &mut monitor_task => {
                    return if shutdown.is_cancelled() {
                        flatten(joined)
                    } else {
                        Err(exit_error(joined, "unexpectedly"))
                    };
                }
                batch = debouncer.next_batch(&mut events) => {
                    let Some(notifications) = batch else {
                        break Err(anyhow!("config watcher stopped"));
                    };
                    tracing::info!(notifications, "config file changed, reloading");
                    if let Err(error) = reconciler.reload(&self.config_path).await {
                        tracing::error!(
                            error = %format!("{error:#}"),
                            "failed to reload config, keeping previous chats"
                        );
                    }
                    self.reloads.send_modify(|count| *count += 1);
                }
            }
        };

        drop(watcher);
        monitor_shutdown.cancel();
        let drained = join_monitor(monitor_task).await;
        outcome.and(drained)
    }
}

async fn join_monitor(task: JoinHandle<Result<()>>) -> Result<()> {
    flatten(task.await)
}

fn flatten(joined: Result<Result<()>, JoinError>) -> Result<()> {
    joined.map_err(|error| anyhow!("monitor task failed: {error}"))?
}

fn exit_error(joined: Result<Result<()>, JoinError>, when: &str) -> anyhow::Error {
    match joined {
        Ok(Ok(())) => anyhow!("monitor exited {when}"),
        Ok(Err(error)) => error.context(format!("monitor exited {when}")),
        Err(error) => anyhow!("monitor task failed: {error}"),
    }
}
