//! Diffs resolved chat sets and applies the difference to a chat registry.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use kpub_config::{load_config, KpubConfig, ResolvedChatConfig};
use kpub_monitor::ChatRegistry;
use kpub_storage::UploaderCache;

/// Handle-keyed difference between two resolved chat sets. `added` and
/// `changed` keep the order of the newer set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChatSetDiff {
    pub removed: Vec<String>,
    pub added: Vec<ResolvedChatConfig>,
    pub changed: Vec<ResolvedChatConfig>,
}

impl ChatSetDiff {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.changed.is_empty()
    }
}

pub fn diff_chat_sets(previous: &[ResolvedChatConfig], next: &[ResolvedChatConfig]) -> ChatSetDiff {
    let before = previous
        .iter()
        .map(|chat| (chat.handle.as_str(), chat))
        .collect::<BTreeMap<_, _>>();
    let after = next
        .iter()
        .map(|chat| (chat.handle.as_str(), chat))
        .collect::<BTreeMap<_, _>>();

    let mut diff = ChatSetDiff {
        removed: before
            .keys()
            .filter(|handle| !after.contains_key(*handle))
            .map(|handle| handle.to_string())
            .collect(),
        ..ChatSetDiff::default()
    };
    for chat in next {
        match before.get(chat.handle.as_str()) {
            None => diff.added.push(chat.clone()),
            Some(existing) if *existing != chat => diff.changed.push(chat.clone()),
            Some(_) => {}
        }
    }
    diff
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadSummary {
    pub removed: usize,
    pub added: usize,
    pub changed: usize,
    /// Handles whose registration failed; they are retried on the next reload.
    pub failed: Vec<String>,
}

/// Owns the last applied chat snapshot. Only one reconciliation runs at a time.
pub struct ChatReconciler {
    registry: Arc<dyn ChatRegistry>,
    uploaders: Arc<UploaderCache>,
    config: KpubConfig,
    applied: Vec<ResolvedChatConfig>,
}

impl ChatReconciler {
    pub fn new(
        registry: Arc<dyn ChatRegistry>,
        uploaders: Arc<UploaderCache>,
        config: KpubConfig,
    ) -> Self {
        Self {
            registry,
            uploaders,
            config,
            applied: Vec::new(),
        }
    }

    pub fn config(&self) -> &KpubConfig {
        &self.config
    }

    /// Chats currently believed registered.
    pub fn applied_chats(&self) -> &[ResolvedChatConfig] {
        &self.applied
    }

    /// Gets or creates the uploader for the chat's credentials, then registers it.
    pub async fn add_chat(&self, chat: &ResolvedChatConfig) -> Result<()> {
        let uploader = self
            .uploaders
            .get_or_create(&chat.storage)
            .with_context(|| format!("failed to create uploader for chat '{}'", chat.handle))?;
        self.registry
            .register_chat(&chat.handle, chat.accepted_formats.clone(), uploader)
            .await?;
        Ok(())
    }

    /// Registers every chat of the current configuration. A failing chat is
    /// logged and skipped.
    pub async fn register_all(&mut self) -> ReloadSummary {
        let chats = self.config.resolved_chats();
        let mut summary = ReloadSummary::default();
        self.applied.clear();
        for chat in chats {
            match self.add_chat(&chat).await {
                Ok(()) => {
                    summary.added += 1;
                    self.applied.push(chat);
                }
                Err(error) => {
                    tracing::error!(handle = %chat.handle, error = %format!("{error:#}"), "failed to add chat");
                    summary.failed.push(chat.handle);
                }
            }
        }
        summary
    }

    /// Re-reads `path` and applies it. On load failure nothing changes.
    pub async fn reload(&mut self, path: &Path) -> Result<ReloadSummary> {
        let next = load_config(path)?;
        Ok(self.apply(next).await)
    }

    pub async fn apply(&mut self, next: KpubConfig) -> ReloadSummary {
        if next.telegram != self.config.telegram
            || next.paths != self.config.paths
            || next.pipeline != self.config.pipeline
        {
            tracing::warn!("connection or pipeline settings changed; restart kpub to apply them");
        }

        let next_chats = next.resolved_chats();
        let diff = diff_chat_sets(&self.applied, &next_chats);
        let mut summary = ReloadSummary {
            removed: diff.removed.len(),
            ..ReloadSummary::default()
        };

        for handle in &diff.removed {
            tracing::info!(handle = %handle, "removing chat");
            self.registry.unregister_chat(handle);
        }

        self.config = next;
        self.applied = next_chats;

        for chat in &diff.changed {
            tracing::info!(handle = %chat.handle, "chat settings changed, re-adding");
            self.registry.unregister_chat(&chat.handle);
            match self.add_chat(chat).await {
                Ok(()) => summary.changed += 1,
                Err(error) => self.forget_failed(chat, error, &mut summary),
            }
        }
        for chat in &diff.added {
            tracing::info!(handle = %chat.handle, "adding chat");
            match self.add_chat(chat).await {
                Ok(()) => summary.added += 1,
                Err(error) => self.forget_failed(chat, error, &mut summary),
            }
        }

        tracing::info!(
            removed = summary.removed,
            added = summary.added,
            changed = summary.changed,
            failed = summary.failed.len(),
            "config reload applied"
        );
        summary
    }

    fn forget_failed(
        &mut self,
        chat: &ResolvedChatConfig,
        error: anyhow::Error,
        summary: &mut ReloadSummary,
    ) {
        tracing::error!(handle = %chat.handle, error = %format!("{error:#}"), "failed to add chat");
        self.applied.retain(|applied| applied.handle != chat.handle);
        summary.failed.push(chat.handle.clone());
    }
}
