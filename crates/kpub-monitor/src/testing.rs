//! Scripted collaborators for exercising the monitor without a network.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use kpub_config::StorageConfig;
use kpub_storage::{StorageAccount, UploadError, Uploader};
use tokio::sync::{mpsc, watch};

use crate::authenticator::Authenticator;
use crate::chat_client::{
    ChatClient, DocumentAttribute, DocumentMedia, InboundMessage, InboundUpdate, MessageMedia,
    RemoteHandle, SignInOutcome,
};
use crate::converter::Converter;
use crate::peer_identity::PeerIdentity;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn document_media(file_name: &str) -> DocumentMedia {
    DocumentMedia {
        attributes: vec![DocumentAttribute::Filename(file_name.to_string())],
        remote: RemoteHandle::new(file_name.to_string()),
    }
}

pub fn document_message(peer: PeerIdentity, file_name: &str) -> InboundMessage {
    InboundMessage {
        peer,
        outgoing: false,
        media: Some(MessageMedia::Document(document_media(file_name))),
    }
}

/// In-memory chat session driven by the test.
pub struct ScriptedChatClient {
    authorized: AtomicBool,
    password_hint: Mutex<Option<Option<String>>>,
    login_steps: Mutex<Vec<String>>,
    peers: Mutex<HashMap<String, PeerIdentity>>,
    resolve_calls: AtomicUsize,
    update_sender: Mutex<Option<mpsc::UnboundedSender<InboundUpdate>>>,
    update_receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundUpdate>>,
    failing_downloads: Mutex<HashSet<String>>,
    download_gate: watch::Sender<bool>,
    downloads_started: AtomicUsize,
    sent: Mutex<Vec<String>>,
}

impl Default for ScriptedChatClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedChatClient {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (download_gate, _) = watch::channel(false);
        Self {
            authorized: AtomicBool::new(true),
            password_hint: Mutex::new(None),
            login_steps: Mutex::new(Vec::new()),
            peers: Mutex::new(HashMap::new()),
            resolve_calls: AtomicUsize::new(0),
            update_sender: Mutex::new(Some(sender)),
            update_receiver: tokio::sync::Mutex::new(receiver),
            failing_downloads: Mutex::new(HashSet::new()),
            download_gate,
            downloads_started: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    pub fn require_password(&self, hint: Option<&str>) {
        *lock(&self.password_hint) = Some(hint.map(str::to_string));
    }

    pub fn login_steps(&self) -> Vec<String> {
        lock(&self.login_steps).clone()
    }

    /// Makes `username` (without `@`) resolvable to `peer`.
    pub fn add_peer(&self, username: &str, peer: PeerIdentity) {
        lock(&self.peers).insert(username.to_string(), peer);
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn push_update(&self, update: InboundUpdate) {
        if let Some(sender) = lock(&self.update_sender).as_ref() {
            let _ = sender.send(update);
        }
    }

    /// Ends the update stream once queued updates are consumed.
    pub fn close_updates(&self) {
        lock(&self.update_sender).take();
    }

    pub fn fail_download(&self, file_name: &str) {
        lock(&self.failing_downloads).insert(file_name.to_string());
    }

    /// Blocks every download until [`Self::release_downloads`].
    pub fn hold_downloads(&self) {
        self.download_gate.send_replace(true);
    }

    pub fn release_downloads(&self) {
        self.download_gate.send_replace(false);
    }

    pub fn downloads_started(&self) -> usize {
        self.downloads_started.load(Ordering::SeqCst)
    }

    pub async fn wait_for_downloads(&self, count: usize, within: Duration) -> usize {
        let deadline = Instant::now() + within;
        while self.downloads_started() < count && Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        self.downloads_started()
    }

    pub fn sent_messages(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    /// Waits until at least `count` status messages were sent, or `within` elapses.
    pub async fn wait_for_sent(&self, count: usize, within: Duration) -> Vec<String> {
        let deadline = Instant::now() + within;
        loop {
            let sent = self.sent_messages();
            if sent.len() >= count || Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool> {
        Ok(self.authorized.load(Ordering::SeqCst))
    }

    async fn request_login_code(&self, phone: &str) -> Result<()> {
        lock(&self.login_steps).push(format!("code:{phone}"));
        Ok(())
    }

    async fn sign_in(&self, code: &str) -> Result<SignInOutcome> {
        lock(&self.login_steps).push(format!("sign_in:{code}"));
        let password_hint = lock(&self.password_hint).clone();
        if let Some(hint) = password_hint {
            return Ok(SignInOutcome::PasswordRequired { hint });
        }
        self.set_authorized(true);
        Ok(SignInOutcome::Authorized)
    }

    async fn check_password(&self, password: &str) -> Result<()> {
        lock(&self.login_steps).push(format!("password:{password}"));
        self.set_authorized(true);
        Ok(())
    }

    async fn resolve_handle(&self, username: &str) -> Result<PeerIdentity> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let peer = lock(&self.peers).get(username).copied();
        match peer {
            Some(peer) => Ok(peer),
            None => bail!("username '{username}' not found"),
        }
    }

    async fn next_update(&self) -> Result<Option<InboundUpdate>> {
        let mut receiver = self.update_receiver.lock().await;
        Ok(receiver.recv().await)
    }

    async fn download_document(
        &self,
        document: &DocumentMedia,
        destination: &Path,
    ) -> Result<()> {
        self.downloads_started.fetch_add(1, Ordering::SeqCst);
        let file_name = document.file_name().unwrap_or_default().to_string();
        let mut gate = self.download_gate.subscribe();
        let _ = gate.wait_for(|held| !*held).await;
        let failing = lock(&self.failing_downloads).contains(&file_name);
        if failing {
            bail!("scripted download failure for {file_name}");
        }
        tokio::fs::write(destination, format!("contents of {file_name}"))
            .await
            .with_context(|| format!("failed to write {}", destination.display()))
    }

    async fn send_to_self(&self, text: &str) -> Result<()> {
        lock(&self.sent).push(text.to_string());
        Ok(())
    }
}

/// Answers login prompts from a fixed queue; an exhausted queue is an error.
pub struct QueuedAuthenticator {
    answers: Mutex<VecDeque<String>>,
}

impl QueuedAuthenticator {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
        }
    }

    fn next(&self, what: &str) -> Result<String> {
        match lock(&self.answers).pop_front() {
            Some(answer) => Ok(answer),
            None => bail!("failed to read {what}: no scripted answer"),
        }
    }
}

#[async_trait]
impl Authenticator for QueuedAuthenticator {
    async fn phone_number(&self) -> Result<String> {
        self.next("phone number")
    }

    async fn login_code(&self) -> Result<String> {
        self.next("verification code")
    }

    async fn password(&self, _hint: Option<&str>) -> Result<String> {
        self.next("password")
    }
}

/// Writes `<stem>.kepub.epub` unless the input name was marked as failing,
/// in which case it leaves a partial output behind and errors.
#[derive(Default)]
pub struct ScriptedConverter {
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl ScriptedConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_conversion(&self, file_name: &str) {
        lock(&self.failing).insert(file_name.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Converter for ScriptedConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = input
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        let source = tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("failed to read {}", input.display()))?;
        let failing = lock(&self.failing).contains(&name);
        if failing {
            tokio::fs::write(output, "partial").await?;
            bail!("scripted conversion failure for {name}");
        }
        tokio::fs::write(output, format!("kepub({source})"))
            .await
            .with_context(|| format!("failed to write {}", output.display()))
    }
}

/// Records uploaded remote names; optionally fails every upload.
#[derive(Default)]
pub struct RecordingUploader {
    uploads: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn uploaded_names(&self) -> Vec<String> {
        lock(&self.uploads).clone()
    }

    pub fn upload_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Uploader for RecordingUploader {
    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<(), UploadError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Err(source) = tokio::fs::metadata(local_path).await {
            return Err(UploadError::Io {
                path: local_path.to_path_buf(),
                source,
            });
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(UploadError::Status {
                status: 500,
                body: "scripted upload failure".to_string(),
            });
        }
        lock(&self.uploads).push(remote_name.to_string());
        Ok(())
    }
}

/// Every chat bound to a recording account shares its upload log.
impl StorageAccount for RecordingUploader {
    fn bind(self: Arc<Self>, _storage: &StorageConfig) -> Arc<dyn Uploader> {
        self
    }
}
