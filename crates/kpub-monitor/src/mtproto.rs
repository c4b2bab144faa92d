//! MTProto user-session adapter over `grammers-client`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use grammers_client::types::{
    Chat, Downloadable, LoginToken, Media, PackedChat, PasswordToken,
};
use grammers_client::{Client, Config, InitParams, SignInError, Update};
use grammers_session::Session;

use crate::chat_client::{
    ChatClient, DocumentAttribute, DocumentMedia, InboundMessage, InboundUpdate, MessageMedia,
    RemoteHandle, SignInOutcome,
};
use crate::peer_identity::PeerIdentity;

#[derive(Debug, Clone)]
pub struct MtprotoSettings {
    pub app_id: i32,
    pub app_hash: String,
    pub session_file: PathBuf,
}

pub struct GrammersChatClient {
    settings: MtprotoSettings,
    client: OnceLock<Client>,
    saved_messages: OnceLock<PackedChat>,
    login_token: Mutex<Option<LoginToken>>,
    password_token: Mutex<Option<PasswordToken>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GrammersChatClient {
    pub fn new(settings: MtprotoSettings) -> Self {
        Self {
            settings,
            client: OnceLock::new(),
            saved_messages: OnceLock::new(),
            login_token: Mutex::new(None),
            password_token: Mutex::new(None),
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .get()
            .ok_or_else(|| anyhow!("chat client is not connected"))
    }

    fn save_session(&self) -> Result<()> {
        let path = &self.settings.session_file;
        self.client()?
            .session()
            .save_to_file(path)
            .with_context(|| format!("failed to save session to {}", path.display()))
    }

    async fn saved_messages(&self) -> Result<PackedChat> {
        if let Some(packed) = self.saved_messages.get() {
            return Ok(*packed);
        }
        let me = self
            .client()?
            .get_me()
            .await
            .context("failed to fetch own account")?;
        let packed = me.pack();
        let _ = self.saved_messages.set(packed);
        Ok(packed)
    }
}

fn identity_of(chat: &Chat) -> PeerIdentity {
    match chat {
        Chat::User(user) => PeerIdentity::User(user.id()),
        Chat::Group(group) => PeerIdentity::Group(group.id()),
        Chat::Channel(channel) => PeerIdentity::Channel(channel.id()),
    }
}

fn convert_media(media: Media) -> MessageMedia {
    match media {
        Media::Document(ref document) => {
            let name = document.name().to_string();
            MessageMedia::Document(DocumentMedia {
                attributes: vec![if name.is_empty() {
                    DocumentAttribute::Other
                } else {
                    DocumentAttribute::Filename(name)
                }],
                remote: RemoteHandle::new(media),
            })
        }
        Media::Photo(_) => MessageMedia::Photo,
        _ => MessageMedia::Other,
    }
}

#[async_trait]
impl ChatClient for GrammersChatClient {
    async fn connect(&self) -> Result<()> {
        if self.client.get().is_some() {
            return Ok(());
        }
        let session_file = &self.settings.session_file;
        if let Some(parent) = session_file.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let session = Session::load_file_or_create(session_file)
            .with_context(|| format!("failed to load session {}", session_file.display()))?;
        let client = Client::connect(Config {
            session,
            api_id: self.settings.app_id,
            api_hash: self.settings.app_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .context("failed to connect to telegram")?;
        let _ = self.client.set(client);
        tracing::info!(session = %session_file.display(), "connected to telegram");
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool> {
        Ok(self.client()?.is_authorized().await?)
    }

    async fn request_login_code(&self, phone: &str) -> Result<()> {
        let token = self.client()?.request_login_code(phone).await?;
        *lock(&self.login_token) = Some(token);
        Ok(())
    }

    async fn sign_in(&self, code: &str) -> Result<SignInOutcome> {
        let token = lock(&self.login_token)
            .take()
            .ok_or_else(|| anyhow!("sign-in attempted before requesting a login code"))?;
        match self.client()?.sign_in(&token, code).await {
            Ok(_) => {
                self.save_session()?;
                Ok(SignInOutcome::Authorized)
            }
            Err(SignInError::PasswordRequired(password_token)) => {
                let hint = password_token.hint().map(str::to_string);
                *lock(&self.password_token) = Some(password_token);
                Ok(SignInOutcome::PasswordRequired { hint })
            }
            Err(SignInError::SignUpRequired { .. }) => {
                bail!("sign-up is not supported; register the account with an official client")
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn check_password(&self, password: &str) -> Result<()> {
        let token = lock(&self.password_token)
            .take()
            .ok_or_else(|| anyhow!("no two-factor challenge is pending"))?;
        self.client()?.check_password(token, password).await?;
        self.save_session()
    }

    async fn resolve_handle(&self, username: &str) -> Result<PeerIdentity> {
        let chat = self
            .client()?
            .resolve_username(username)
            .await?
            .ok_or_else(|| anyhow!("username '{username}' not found"))?;
        Ok(identity_of(&chat))
    }

    async fn next_update(&self) -> Result<Option<InboundUpdate>> {
        let update = self.client()?.next_update().await?;
        let Update::NewMessage(message) = update else {
            return Ok(Some(InboundUpdate::Other));
        };
        let peer = identity_of(&message.chat());
        let inbound = InboundMessage {
            peer,
            outgoing: message.outgoing(),
            media: message.media().map(convert_media),
        };
        Ok(Some(if peer.is_broadcast() {
            InboundUpdate::NewChannelMessage(inbound)
        } else {
            InboundUpdate::NewMessage(inbound)
        }))
    }

    async fn download_document(&self, document: &DocumentMedia, destination: &Path) -> Result<()> {
        let media = document
            .remote
            .downcast_ref::<Media>()
            .cloned()
            .ok_or_else(|| anyhow!("document was not produced by this client"))?;
        self.client()?
            .download_media(&Downloadable::Media(media), destination)
            .await
            .with_context(|| format!("failed to download to {}", destination.display()))
    }

    async fn send_to_self(&self, text: &str) -> Result<()> {
        let chat = self.saved_messages().await?;
        self.client()?.send_message(chat, text).await?;
        Ok(())
    }
}
