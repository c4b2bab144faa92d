//! Dropbox content upload with refresh-once-on-401 semantics.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use kpub_config::{DropboxConfig, StorageConfig};
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialState;
use crate::upload_error::UploadError;
use crate::uploader::{StorageAccount, Uploader};

const UPLOAD_PATH: &str = "/2/files/upload";
const TOKEN_PATH: &str = "/oauth2/token";
const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Base URLs for the two Dropbox API hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropboxEndpoints {
    pub content_base: String,
    pub api_base: String,
}

impl Default for DropboxEndpoints {
    fn default() -> Self {
        Self {
            content_base: "https://content.dropboxapi.com".to_string(),
            api_base: "https://api.dropboxapi.com".to_string(),
        }
    }
}

impl DropboxEndpoints {
    /// Points both hosts at one base URL (mock servers, proxies).
    pub fn single_host(base: &str) -> Self {
        Self {
            content_base: base.to_string(),
            api_base: base.to_string(),
        }
    }

    fn upload_url(&self) -> String {
        format!("{}{UPLOAD_PATH}", self.content_base.trim_end_matches('/'))
    }

    fn token_url(&self) -> String {
        format!("{}{TOKEN_PATH}", self.api_base.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct DropboxApiArg<'a> {
    path: &'a str,
    mode: &'a str,
}

#[derive(Deserialize)]
struct TokenRefreshResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// Credential state for one Dropbox token file.
///
/// The credential mutex guards only field reads and writes. The refresh gate
/// is an async mutex held across the token exchange so that concurrent 401s
/// on the same token produce a single refresh, whichever chat hit them.
pub struct DropboxAccount {
    http: reqwest::Client,
    endpoints: DropboxEndpoints,
    token_file: PathBuf,
    credentials: Mutex<CredentialState>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl DropboxAccount {
    pub fn open(token_file: &Path, endpoints: DropboxEndpoints) -> Result<Self, UploadError> {
        let credentials = CredentialState::load(token_file)?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("kpub/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoints,
            token_file: token_file.to_path_buf(),
            credentials: Mutex::new(credentials),
            refresh_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Snapshot of the in-memory credential pair.
    pub fn credentials(&self) -> CredentialState {
        self.lock_credentials().clone()
    }

    fn lock_credentials(&self) -> MutexGuard<'_, CredentialState> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn access_token(&self) -> String {
        self.lock_credentials().access_token.clone()
    }

    /// Refreshes unless another caller already replaced `rejected_token`.
    async fn refresh_if_stale(
        &self,
        app: &AppCredentials,
        rejected_token: &str,
    ) -> Result<(), UploadError> {
        let _gate = self.refresh_gate.lock().await;
        if self.access_token() != rejected_token {
            tracing::debug!(
                token_file = %self.token_file.display(),
                "access token already refreshed by a concurrent upload"
            );
            return Ok(());
        }
        self.exchange_refresh_token(app).await
    }

    async fn refresh(&self, app: &AppCredentials) -> Result<(), UploadError> {
        let _gate = self.refresh_gate.lock().await;
        self.exchange_refresh_token(app).await
    }

    async fn exchange_refresh_token(&self, app: &AppCredentials) -> Result<(), UploadError> {
        tracing::info!(
            token_file = %self.token_file.display(),
            "dropbox access token expired, refreshing"
        );
        let current = self.credentials();
        let response = self
            .http
            .post(self.endpoints.token_url())
            .basic_auth(&app.key, Some(&app.secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", current.refresh_token.as_str()),
            ])
            .timeout(REFRESH_TIMEOUT)
            .send()
            .await
            .map_err(|error| UploadError::Refresh(format!("token request failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Refresh(format!(
                "token endpoint returned {status}: {body}"
            )));
        }
        let payload = response
            .json::<TokenRefreshResponse>()
            .await
            .map_err(|error| UploadError::Refresh(format!("invalid token response: {error}")))?;
        let access_token = payload
            .access_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                UploadError::Refresh("token response did not include access_token".to_string())
            })?;

        let next = CredentialState {
            access_token,
            refresh_token: payload
                .refresh_token
                .filter(|token| !token.trim().is_empty())
                .unwrap_or(current.refresh_token),
        };
        // Disk first: memory only ever holds a pair that was durably saved.
        next.persist(&self.token_file)?;
        *self.lock_credentials() = next;
        tracing::info!(
            token_file = %self.token_file.display(),
            "dropbox access token refreshed"
        );
        Ok(())
    }

    async fn attempt_upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        access_token: &str,
    ) -> Result<(), UploadError> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|source| UploadError::Io {
                path: local_path.to_path_buf(),
                source,
            })?;
        let api_arg = header_safe_json(&DropboxApiArg {
            path: remote_path,
            mode: "add",
        });

        let response = self
            .http
            .post(self.endpoints.upload_url())
            .bearer_auth(access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header("Dropbox-API-Arg", api_arg)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(UploadError::Unauthorized { body });
        }
        Err(UploadError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl StorageAccount for DropboxAccount {
    fn bind(self: Arc<Self>, storage: &StorageConfig) -> Arc<dyn Uploader> {
        Arc::new(DropboxUploader::bind(self, &storage.dropbox))
    }
}

struct AppCredentials {
    key: String,
    secret: String,
}

/// One chat's view of a Dropbox account: its own app credentials and upload
/// root over the account's shared token pair.
pub struct DropboxUploader {
    account: Arc<DropboxAccount>,
    app: AppCredentials,
    upload_root: String,
}

impl DropboxUploader {
    pub fn new(settings: &DropboxConfig) -> Result<Self, UploadError> {
        Self::with_endpoints(settings, DropboxEndpoints::default())
    }

    /// Opens a private account for `settings.token_file` and binds to it.
    pub fn with_endpoints(
        settings: &DropboxConfig,
        endpoints: DropboxEndpoints,
    ) -> Result<Self, UploadError> {
        let account = DropboxAccount::open(Path::new(&settings.token_file), endpoints)?;
        Ok(Self::bind(Arc::new(account), settings))
    }

    pub fn bind(account: Arc<DropboxAccount>, settings: &DropboxConfig) -> Self {
        Self {
            account,
            app: AppCredentials {
                key: settings.app_key.trim().to_string(),
                secret: settings.app_secret.trim().to_string(),
            },
            upload_root: settings.upload_path.clone(),
        }
    }

    pub fn credentials(&self) -> CredentialState {
        self.account.credentials()
    }

    /// `upload_root` and `remote_name` joined by exactly one `/`.
    pub fn remote_path(&self, remote_name: &str) -> String {
        format!(
            "{}/{}",
            self.upload_root.trim_end_matches('/'),
            remote_name.trim_start_matches('/')
        )
    }

    /// Exchanges the refresh token for a new access token unconditionally.
    pub async fn refresh(&self) -> Result<(), UploadError> {
        self.account.refresh(&self.app).await
    }
}

#[async_trait]
impl Uploader for DropboxUploader {
    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<(), UploadError> {
        let remote_path = self.remote_path(remote_name);
        let token = self.account.access_token();
        let outcome = match self
            .account
            .attempt_upload(local_path, &remote_path, &token)
            .await
        {
            Err(error) if error.is_unauthorized() => {
                tracing::warn!(
                    file = remote_name,
                    "dropbox upload unauthorized, retrying after refresh"
                );
                self.account.refresh_if_stale(&self.app, &token).await?;
                let retry_token = self.account.access_token();
                self.account
                    .attempt_upload(local_path, &remote_path, &retry_token)
                    .await
            }
            other => other,
        };
        if outcome.is_ok() {
            tracing::info!(
                file = remote_name,
                path = %remote_path,
                "uploaded file to dropbox"
            );
        }
        outcome
    }
}

/// JSON safe for an HTTP header: every non-ASCII or DEL character becomes `\uXXXX`.
pub fn header_safe_json<T: Serialize + ?Sized>(value: &T) -> String {
    let raw = serde_json::to_string(value).unwrap_or_default();
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii() && ch != '\u{7f}' {
            escaped.push(ch);
            continue;
        }
        let mut units = [0u16; 2];
        for unit in ch.encode_utf16(&mut units) {
            escaped.push_str(&format!("\\u{unit:04x}"));
        }
    }
    escaped
}
