use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use kpub_core::write_text_atomic;

use crate::config_model::{
    KpubConfig, DEFAULT_ACCEPTED_FORMATS, DEFAULT_CONVERTED_DIR, DEFAULT_CONVERTER_PROGRAM,
    DEFAULT_DOWNLOAD_DIR, DEFAULT_RELOAD_DEBOUNCE_MS, DEFAULT_SESSION_FILE, DEFAULT_STORAGE_TYPE,
    DEFAULT_TOKEN_FILE, DEFAULT_UPLOAD_PATH,
};

/// Reads, parses, defaults and validates the configuration at `path`.
pub fn load_config(path: &Path) -> Result<KpubConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("invalid config file {}", path.display()))
}

pub fn parse_config(raw: &str) -> Result<KpubConfig> {
    let mut config = if raw.trim().is_empty() {
        KpubConfig::default()
    } else {
        serde_yaml::from_str::<KpubConfig>(raw).context("failed to parse config yaml")?
    };
    apply_defaults(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn apply_defaults(config: &mut KpubConfig) {
    let defaults = &mut config.defaults;
    if defaults.accepted_formats.is_empty() {
        defaults.accepted_formats = DEFAULT_ACCEPTED_FORMATS
            .iter()
            .map(|format| format.to_string())
            .collect();
    }
    default_string(&mut defaults.storage.kind, DEFAULT_STORAGE_TYPE);
    default_string(&mut defaults.storage.dropbox.token_file, DEFAULT_TOKEN_FILE);
    default_string(&mut defaults.storage.dropbox.upload_path, DEFAULT_UPLOAD_PATH);

    default_path(&mut config.paths.download_dir, DEFAULT_DOWNLOAD_DIR);
    default_path(&mut config.paths.converted_dir, DEFAULT_CONVERTED_DIR);
    default_path(&mut config.paths.session_file, DEFAULT_SESSION_FILE);

    default_string(
        &mut config.pipeline.converter_program,
        DEFAULT_CONVERTER_PROGRAM,
    );
    if config.pipeline.reload_debounce_ms == 0 {
        config.pipeline.reload_debounce_ms = DEFAULT_RELOAD_DEBOUNCE_MS;
    }
}

fn default_string(target: &mut String, fallback: &str) {
    if target.trim().is_empty() {
        *target = fallback.to_string();
    }
}

fn default_path(target: &mut PathBuf, fallback: &str) {
    if target.as_os_str().is_empty() {
        *target = PathBuf::from(fallback);
    }
}

pub fn validate_config(config: &KpubConfig) -> Result<()> {
    if config.telegram.app_id == 0 {
        bail!("telegram.app_id is required");
    }
    if config.telegram.app_hash.trim().is_empty() {
        bail!("telegram.app_hash is required");
    }
    if config.chats.is_empty() {
        bail!("at least one chat must be configured");
    }
    if config.pipeline.stage_timeout_secs == Some(0) {
        bail!("pipeline.stage_timeout_secs must be greater than 0 when set");
    }

    let mut seen = HashSet::new();
    for (index, chat) in config.chats.iter().enumerate() {
        if chat.handle.trim().is_empty() {
            bail!("chats[{index}].handle is required");
        }
        if !chat.handle.starts_with('@') {
            bail!("chats[{index}].handle must start with @");
        }
        if !seen.insert(chat.handle.as_str()) {
            bail!("duplicate chat handle: '{}'", chat.handle);
        }
    }

    for resolved in config.resolved_chats() {
        if resolved.accepted_formats.is_empty() {
            bail!("chat '{}' accepts no file formats", resolved.handle);
        }
        if resolved.storage.kind != DEFAULT_STORAGE_TYPE {
            continue;
        }
        let dropbox = &resolved.storage.dropbox;
        if dropbox.app_key.trim().is_empty() {
            bail!(
                "dropbox app_key is required (chat '{}'); set defaults.storage.dropbox.app_key",
                resolved.handle
            );
        }
        if dropbox.app_secret.trim().is_empty() {
            bail!(
                "dropbox app_secret is required (chat '{}'); set defaults.storage.dropbox.app_secret",
                resolved.handle
            );
        }
    }
    Ok(())
}

/// Serializes `config` as YAML and replaces `path` atomically.
pub fn write_config(path: &Path, config: &KpubConfig) -> Result<()> {
    let payload = serde_yaml::to_string(config).context("failed to serialize config yaml")?;
    write_text_atomic(path, &payload)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    tracing::debug!(path = %path.display(), chats = config.chats.len(), "config written");
    Ok(())
}

/// Removes `handle` from the chat list, refusing to leave the list empty.
pub fn remove_chat(config: &mut KpubConfig, handle: &str) -> Result<()> {
    let Some(index) = config.chats.iter().position(|chat| chat.handle == handle) else {
        bail!("chat '{handle}' not found");
    };
    if config.chats.len() == 1 {
        bail!("cannot remove the only chat; at least one chat must be configured");
    }
    config.chats.remove(index);
    Ok(())
}
