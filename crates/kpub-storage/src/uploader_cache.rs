use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use kpub_config::StorageConfig;

use crate::dropbox_uploader::{DropboxAccount, DropboxEndpoints};
use crate::upload_error::UploadError;
use crate::uploader::{StorageAccount, Uploader};

/// Opens storage accounts for resolved storage settings.
pub trait UploaderFactory: Send + Sync {
    fn open_account(&self, storage: &StorageConfig)
        -> Result<Arc<dyn StorageAccount>, UploadError>;
}

#[derive(Debug, Clone, Default)]
pub struct DropboxUploaderFactory {
    endpoints: DropboxEndpoints,
}

impl DropboxUploaderFactory {
    pub fn new(endpoints: DropboxEndpoints) -> Self {
        Self { endpoints }
    }
}

impl UploaderFactory for DropboxUploaderFactory {
    fn open_account(
        &self,
        storage: &StorageConfig,
    ) -> Result<Arc<dyn StorageAccount>, UploadError> {
        match storage.kind.as_str() {
            "dropbox" => Ok(Arc::new(DropboxAccount::open(
                Path::new(&storage.dropbox.token_file),
                self.endpoints.clone(),
            )?)),
            other => Err(UploadError::UnsupportedStorage(other.to_string())),
        }
    }
}

/// Accounts deduplicated by credential file, so chats sharing an account
/// share one credential state and one refresh guard. Each chat still gets an
/// uploader bound to its own upload root and app credentials.
pub struct UploaderCache {
    factory: Arc<dyn UploaderFactory>,
    accounts: Mutex<HashMap<PathBuf, Arc<dyn StorageAccount>>>,
}

impl UploaderCache {
    pub fn new(factory: Arc<dyn UploaderFactory>) -> Self {
        Self {
            factory,
            accounts: Mutex::new(HashMap::new()),
        }
    }

    pub fn dropbox() -> Self {
        Self::new(Arc::new(DropboxUploaderFactory::default()))
    }

    /// Uploader for `storage` over the cached account for its credential
    /// file, opening the account once.
    pub fn get_or_create(&self, storage: &StorageConfig) -> Result<Arc<dyn Uploader>, UploadError> {
        let key = credential_key(storage);
        let account = {
            let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
            match accounts.get(&key) {
                Some(existing) => Arc::clone(existing),
                None => {
                    let account = self.factory.open_account(storage)?;
                    tracing::debug!(token_file = %key.display(), "opened storage account");
                    accounts.insert(key, Arc::clone(&account));
                    account
                }
            }
        };
        Ok(account.bind(storage))
    }

    /// Number of distinct credential files opened so far.
    pub fn len(&self) -> usize {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical credential-file path; falls back to the configured path when it
/// cannot be resolved.
pub fn credential_key(storage: &StorageConfig) -> PathBuf {
    let configured = Path::new(&storage.dropbox.token_file);
    std::fs::canonicalize(configured).unwrap_or_else(|_| configured.to_path_buf())
}
