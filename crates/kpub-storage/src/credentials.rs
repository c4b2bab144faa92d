use std::path::Path;

use kpub_core::write_json_atomic;
use serde::{Deserialize, Serialize};

use crate::upload_error::UploadError;

/// Access/refresh token pair for one storage account, mirrored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialState {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialState {
    /// Loads and validates the credential file. Both tokens must be present.
    pub fn load(path: &Path) -> Result<Self, UploadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let state = serde_json::from_str::<CredentialState>(&raw).map_err(|error| {
            UploadError::Credentials(format!(
                "failed to parse credential file {}: {error}",
                path.display()
            ))
        })?;
        if state.access_token.trim().is_empty() || state.refresh_token.trim().is_empty() {
            return Err(UploadError::Credentials(format!(
                "'access_token' or 'refresh_token' is missing from {}",
                path.display()
            )));
        }
        Ok(state)
    }

    pub fn persist(&self, path: &Path) -> Result<(), UploadError> {
        write_json_atomic(path, self).map_err(|error| {
            UploadError::Refresh(format!(
                "failed to persist refreshed credentials to {}: {error:#}",
                path.display()
            ))
        })
    }
}
