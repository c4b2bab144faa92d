//! Remote storage uploaders for converted ebooks.
//!
//! [`DropboxAccount`] owns one token file's credential pair, refreshes it once
//! on a 401 and rewrites the file atomically. [`DropboxUploader`] binds a
//! chat's upload root and app credentials to a shared account, and
//! [`UploaderCache`] keeps one account per credential file.

mod credentials;
mod dropbox_uploader;
mod upload_error;
mod uploader;
mod uploader_cache;

pub use credentials::CredentialState;
pub use dropbox_uploader::{header_safe_json, DropboxAccount, DropboxEndpoints, DropboxUploader};
pub use upload_error::UploadError;
pub use uploader::{StorageAccount, Uploader};
pub use uploader_cache::{credential_key, DropboxUploaderFactory, UploaderCache, UploaderFactory};
