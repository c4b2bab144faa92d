//! Serde model for the kpub YAML configuration file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "/data/config.yaml";
pub const DEFAULT_ACCEPTED_FORMATS: [&str; 3] = [".epub", ".mobi", ".azw3"];
pub const DEFAULT_STORAGE_TYPE: &str = "dropbox";
pub const DEFAULT_TOKEN_FILE: &str = "/data/dropbox.json";
pub const DEFAULT_UPLOAD_PATH: &str = "/Apps/Rakuten Kobo/";
pub const DEFAULT_DOWNLOAD_DIR: &str = "/data/downloads";
pub const DEFAULT_CONVERTED_DIR: &str = "/data/converted";
pub const DEFAULT_SESSION_FILE: &str = "/data/session.session";
pub const DEFAULT_CONVERTER_PROGRAM: &str = "ebook-convert";
pub const DEFAULT_RELOAD_DEBOUNCE_MS: u64 = 500;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KpubConfig {
    pub telegram: TelegramConfig,
    pub defaults: DefaultsConfig,
    pub paths: PathsConfig,
    pub pipeline: PipelineConfig,
    pub chats: Vec<ChatConfig>,
}

/// Telegram application credentials used for the user session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub app_id: i32,
    pub app_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub accepted_formats: Vec<String>,
    pub storage: StorageConfig,
}

/// Storage backend selection. Also used as a per-chat override, where empty
/// fields mean "inherit the default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub dropbox: DropboxConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DropboxConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_secret: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token_file: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub upload_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub download_dir: PathBuf,
    pub converted_dir: PathBuf,
    pub session_file: PathBuf,
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub converter_program: String,
    /// Per-stage timeout for download, convert and upload. Unset means no timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_timeout_secs: Option<u64>,
    pub reload_debounce_ms: u64,
}

/// One monitored chat entry as written in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub handle: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub accepted_formats: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,
}

impl KpubConfig {
    pub fn chat(&self, handle: &str) -> Option<&ChatConfig> {
        self.chats.iter().find(|chat| chat.handle == handle)
    }
}
