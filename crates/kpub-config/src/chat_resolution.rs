//! Merges per-chat overrides onto global defaults.

use std::collections::BTreeSet;
use std::fmt;

use crate::config_model::{ChatConfig, DefaultsConfig, KpubConfig, StorageConfig};

/// Normalized set of accepted file extensions (lower-case, leading dot).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AcceptedFormats(BTreeSet<String>);

impl AcceptedFormats {
    pub fn contains(&self, extension: &str) -> bool {
        self.0.contains(&normalize_format(extension))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for AcceptedFormats {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|format| normalize_format(format.as_ref()))
                .filter(|format| format.len() > 1)
                .collect(),
        )
    }
}

impl fmt::Display for AcceptedFormats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.iter().collect::<Vec<_>>().join(",");
        f.write_str(&joined)
    }
}

/// `EPUB`, `epub` and `.epub` all normalize to `.epub`.
pub fn normalize_format(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    if lowered.is_empty() || lowered.starts_with('.') {
        lowered
    } else {
        format!(".{lowered}")
    }
}

/// Per-chat settings after merging overrides onto defaults. Equality is
/// structural, which drives the reload diff.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedChatConfig {
    pub handle: String,
    pub accepted_formats: AcceptedFormats,
    pub storage: StorageConfig,
}

pub fn resolve_chat(defaults: &DefaultsConfig, chat: &ChatConfig) -> ResolvedChatConfig {
    let formats = if chat.accepted_formats.is_empty() {
        &defaults.accepted_formats
    } else {
        &chat.accepted_formats
    };

    let mut storage = defaults.storage.clone();
    if let Some(overrides) = &chat.storage {
        overlay(&mut storage.kind, &overrides.kind);
        overlay(&mut storage.dropbox.app_key, &overrides.dropbox.app_key);
        overlay(&mut storage.dropbox.app_secret, &overrides.dropbox.app_secret);
        overlay(&mut storage.dropbox.token_file, &overrides.dropbox.token_file);
        overlay(&mut storage.dropbox.upload_path, &overrides.dropbox.upload_path);
    }

    ResolvedChatConfig {
        handle: chat.handle.clone(),
        accepted_formats: formats.iter().collect(),
        storage,
    }
}

fn overlay(target: &mut String, value: &str) {
    if !value.trim().is_empty() {
        *target = value.to_string();
    }
}

impl KpubConfig {
    /// Resolves every chat in file order.
    pub fn resolved_chats(&self) -> Vec<ResolvedChatConfig> {
        self.chats
            .iter()
            .map(|chat| resolve_chat(&self.defaults, chat))
            .collect()
    }
}
