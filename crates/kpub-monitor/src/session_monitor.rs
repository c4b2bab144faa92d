//! Session monitor: one chat connection, a registry of monitored chats, and
//! detached per-file pipelines that shutdown drains before stopping.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use kpub_config::{AcceptedFormats, KpubConfig};
use kpub_core::CancellationToken;
use kpub_storage::Uploader;
use tokio::sync::watch;

use crate::authenticator::{authenticate, Authenticator};
use crate::chat_client::{ChatClient, InboundMessage, InboundUpdate, MessageMedia};
use crate::converter::Converter;
use crate::in_flight::InFlightFiles;
use crate::peer_identity::PeerIdentity;
use crate::pipeline::{run_file_pipeline, FileJob, PipelineContext};

/// Connection lifecycle. `Authenticating` only occurs without a stored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Disconnected,
    Authenticating,
    Ready,
    Listening,
    Draining,
    Stopped,
}

impl MonitorState {
    pub fn accepts_chats(&self) -> bool {
        matches!(self, Self::Ready | Self::Listening)
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Listening => "listening",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub download_dir: PathBuf,
    pub converted_dir: PathBuf,
    pub stage_timeout: Option<Duration>,
}

impl MonitorSettings {
    pub fn from_config(config: &KpubConfig) -> Self {
        Self {
            download_dir: config.paths.download_dir.clone(),
            converted_dir: config.paths.converted_dir.clone(),
            stage_timeout: config
                .pipeline
                .stage_timeout_secs
                .map(Duration::from_secs),
        }
    }

    pub fn with_dirs(download_dir: &Path, converted_dir: &Path) -> Self {
        Self {
            download_dir: download_dir.to_path_buf(),
            converted_dir: converted_dir.to_path_buf(),
            stage_timeout: None,
        }
    }
}

/// Live registry value. Replaced wholesale, never mutated in place.
pub struct MonitoredChatEntry {
    pub handle: String,
    pub accepted_formats: AcceptedFormats,
    pub uploader: Arc<dyn Uploader>,
}

/// Registry operations the chat supervisor drives.
#[async_trait]
pub trait ChatRegistry: Send + Sync {
    /// Resolves `handle` and inserts or replaces its entry.
    async fn register_chat(
        &self,
        handle: &str,
        accepted_formats: AcceptedFormats,
        uploader: Arc<dyn Uploader>,
    ) -> Result<PeerIdentity>;

    /// Removes the entry for `handle`; returns false when none existed.
    fn unregister_chat(&self, handle: &str) -> bool;
}

pub struct SessionMonitor {
    client: Arc<dyn ChatClient>,
    authenticator: Arc<dyn Authenticator>,
    pipeline: Arc<PipelineContext>,
    registry: RwLock<HashMap<PeerIdentity, Arc<MonitoredChatEntry>>>,
    state: watch::Sender<MonitorState>,
    in_flight: InFlightFiles,
}

impl SessionMonitor {
    pub fn new(
        client: Arc<dyn ChatClient>,
        authenticator: Arc<dyn Authenticator>,
        converter: Arc<dyn Converter>,
        settings: MonitorSettings,
    ) -> Self {
        let pipeline = Arc::new(PipelineContext {
            client: Arc::clone(&client),
            converter,
            download_dir: settings.download_dir,
            converted_dir: settings.converted_dir,
            stage_timeout: settings.stage_timeout,
        });
        let (state, _) = watch::channel(MonitorState::Disconnected);
        Self {
            client,
            authenticator,
            pipeline,
            registry: RwLock::new(HashMap::new()),
            state,
            in_flight: InFlightFiles::new(),
        }
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    pub fn in_flight_files(&self) -> usize {
        self.in_flight.count()
    }

    /// Snapshot of `(peer, handle)` pairs, sorted by peer.
    pub fn monitored_chats(&self) -> Vec<(PeerIdentity, String)> {
        let mut chats = self
            .read_registry()
            .iter()
            .map(|(peer, entry)| (*peer, entry.handle.clone()))
            .collect::<Vec<_>>();
        chats.sort();
        chats
    }

    /// Connects, logs in when needed, then listens until `shutdown` fires or
    /// the connection fails. Always drains in-flight files before returning.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let outcome = self.listen(&shutdown).await;
        self.set_state(MonitorState::Draining);
        tracing::info!(
            in_flight = self.in_flight.count(),
            "shutting down, waiting for in-flight files to complete"
        );
        self.in_flight.wait_idle().await;
        self.set_state(MonitorState::Stopped);
        tracing::info!("all in-flight files completed, monitor stopped");
        outcome
    }

    async fn listen(&self, shutdown: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            established = self.establish_session() => established?,
        }

        self.set_state(MonitorState::Ready);
        tracing::info!("connected and ready to monitor chats");
        self.set_state(MonitorState::Listening);

        loop {
            let update = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                update = self.client.next_update() => update.context("failed to receive chat updates")?,
            };
            match update {
                Some(update) => self.dispatch(update),
                None => bail!("chat connection closed"),
            }
        }
    }

    async fn establish_session(&self) -> Result<()> {
        self.client
            .connect()
            .await
            .context("failed to connect to chat network")?;
        let authorized = self
            .client
            .is_authorized()
            .await
            .context("failed to query authorization status")?;
        if !authorized {
            self.set_state(MonitorState::Authenticating);
            tracing::info!("not authorized, starting interactive login");
            authenticate(self.client.as_ref(), self.authenticator.as_ref())
                .await
                .context("user authentication failed")?;
            tracing::info!("authentication successful");
        }
        Ok(())
    }

    /// Routes one update without suspending. Direct and basic-group peers
    /// come from message updates; channels from channel-message updates.
    pub fn dispatch(&self, update: InboundUpdate) {
        match update {
            InboundUpdate::NewMessage(message) if !message.peer.is_broadcast() => {
                self.on_message(message)
            }
            InboundUpdate::NewChannelMessage(message) if message.peer.is_broadcast() => {
                self.on_message(message)
            }
            _ => {}
        }
    }

    fn on_message(&self, message: InboundMessage) {
        if message.outgoing {
            return;
        }
        let Some(entry) = self.lookup(&message.peer) else {
            return;
        };
        let Some(MessageMedia::Document(document)) = message.media else {
            return;
        };
        let Some(file_name) = document.file_name().map(str::to_string) else {
            tracing::warn!(chat = %entry.handle, "received a document with no filename attribute");
            return;
        };

        let extension = file_extension(&file_name);
        if !entry.accepted_formats.contains(&extension) {
            tracing::info!(
                chat = %entry.handle,
                file = %file_name,
                extension = %extension,
                "rejected file with unsupported format"
            );
            return;
        }

        let guard = self.in_flight.begin();
        let context = Arc::clone(&self.pipeline);
        let job = FileJob {
            chat_handle: entry.handle.clone(),
            file_name,
            document,
            uploader: Arc::clone(&entry.uploader),
        };
        // Detached from the update loop: shutdown drains it instead of cancelling it.
        tokio::spawn(async move {
            let _guard = guard;
            run_file_pipeline(&context, job).await;
        });
    }

    fn lookup(&self, peer: &PeerIdentity) -> Option<Arc<MonitoredChatEntry>> {
        self.read_registry().get(peer).cloned()
    }

    fn set_state(&self, next: MonitorState) {
        self.state.send_replace(next);
        tracing::debug!(state = %next, "monitor state changed");
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, HashMap<PeerIdentity, Arc<MonitoredChatEntry>>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<PeerIdentity, Arc<MonitoredChatEntry>>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_accepting_chats(&self, handle: &str) -> Result<()> {
        let state = self.state();
        if !state.accepts_chats() {
            bail!("cannot register chat '{handle}' while monitor is {state}");
        }
        Ok(())
    }
}

#[async_trait]
impl ChatRegistry for SessionMonitor {
    async fn register_chat(
        &self,
        handle: &str,
        accepted_formats: AcceptedFormats,
        uploader: Arc<dyn Uploader>,
    ) -> Result<PeerIdentity> {
        self.ensure_accepting_chats(handle)?;
        let username = handle.trim().trim_start_matches('@');
        let peer = self
            .client
            .resolve_handle(username)
            .await
            .with_context(|| format!("failed to resolve handle '{handle}'"))?;
        self.ensure_accepting_chats(handle)?;

        let entry = Arc::new(MonitoredChatEntry {
            handle: handle.to_string(),
            accepted_formats,
            uploader,
        });
        {
            let mut registry = self.write_registry();
            registry.retain(|key, existing| existing.handle != handle || *key == peer);
            registry.insert(peer, entry);
        }
        tracing::info!(handle, peer = %peer, "now monitoring chat");
        Ok(peer)
    }

    fn unregister_chat(&self, handle: &str) -> bool {
        let removed = {
            let mut registry = self.write_registry();
            let before = registry.len();
            registry.retain(|_, entry| entry.handle != handle);
            before - registry.len()
        };
        if removed > 0 {
            tracing::info!(handle, "stopped monitoring chat");
        }
        removed > 0
    }
}

/// Lower-cased suffix from the last `.` of the final path element, dot
/// included; empty when there is none. A bare `.epub` counts as `.epub`.
pub fn file_extension(file_name: &str) -> String {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    base.rfind('.')
        .map(|dot| base[dot..].to_ascii_lowercase())
        .unwrap_or_default()
}
