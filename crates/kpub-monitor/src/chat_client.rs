//! Seam between the monitor and the chat-protocol library.
//!
//! The monitor only needs a handful of session operations. Inbound updates
//! and media are modelled as tagged variants with explicit "other" arms so
//! unknown shapes fall through to ignore.

use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::peer_identity::PeerIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    Authorized,
    PasswordRequired { hint: Option<String> },
}

/// One persistent user session against the chat network.
///
/// `next_update` must be cancel-safe: the monitor races it against shutdown.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn is_authorized(&self) -> Result<bool>;
    async fn request_login_code(&self, phone: &str) -> Result<()>;
    async fn sign_in(&self, code: &str) -> Result<SignInOutcome>;
    async fn check_password(&self, password: &str) -> Result<()>;
    /// Resolves a public username (without `@`) to a peer.
    async fn resolve_handle(&self, username: &str) -> Result<PeerIdentity>;
    /// Returns `None` once the connection has closed for good.
    async fn next_update(&self) -> Result<Option<InboundUpdate>>;
    async fn download_document(&self, document: &DocumentMedia, destination: &Path)
        -> Result<()>;
    /// Sends a text message to the account's own saved-messages peer.
    async fn send_to_self(&self, text: &str) -> Result<()>;
}

/// Update kinds delivered by the session.
#[derive(Debug, Clone)]
pub enum InboundUpdate {
    /// Direct or basic-group message.
    NewMessage(InboundMessage),
    /// Broadcast channel or supergroup message.
    NewChannelMessage(InboundMessage),
    Other,
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub peer: PeerIdentity,
    pub outgoing: bool,
    pub media: Option<MessageMedia>,
}

#[derive(Debug, Clone)]
pub enum MessageMedia {
    Document(DocumentMedia),
    Photo,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentAttribute {
    Filename(String),
    Other,
}

#[derive(Debug, Clone)]
pub struct DocumentMedia {
    pub attributes: Vec<DocumentAttribute>,
    /// Adapter-specific download location.
    pub remote: RemoteHandle,
}

impl DocumentMedia {
    /// First non-empty filename attribute, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.attributes.iter().find_map(|attribute| match attribute {
            DocumentAttribute::Filename(name) if !name.trim().is_empty() => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Opaque, cheaply cloned payload an adapter attaches to a document so it can
/// download it later.
#[derive(Clone)]
pub struct RemoteHandle(Option<Arc<dyn Any + Send + Sync>>);

impl RemoteHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    pub fn empty() -> Self {
        Self(None)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|value| value.downcast_ref::<T>())
    }
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("RemoteHandle(..)"),
            None => f.write_str("RemoteHandle(empty)"),
        }
    }
}
