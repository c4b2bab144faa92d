use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by storage uploaders.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("storage provider rejected the access token (401): {body}")]
    Unauthorized { body: String },
    #[error("storage provider returned non-success status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("invalid credentials: {0}")]
    Credentials(String),
    #[error("unsupported storage type '{0}'")]
    UnsupportedStorage(String),
}

impl UploadError {
    /// True for the authorization failure that warrants one refresh-and-retry.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}
