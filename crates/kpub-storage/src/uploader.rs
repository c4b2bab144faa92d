use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use kpub_config::StorageConfig;

use crate::upload_error::UploadError;

/// Delivers one local file to one remote storage account.
///
/// Chats bound to the same account upload through the same credential state,
/// so `upload` must tolerate concurrent calls.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<(), UploadError>;
}

/// Credential state shared by every chat that points at one credential file.
pub trait StorageAccount: Send + Sync {
    /// Uploader that applies one chat's storage settings over this account.
    fn bind(self: Arc<Self>, storage: &StorageConfig) -> Arc<dyn Uploader>;
}
