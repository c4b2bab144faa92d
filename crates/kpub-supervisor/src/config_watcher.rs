//! File-level change notifications for the configuration file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Keeps the platform watcher alive; dropping it stops notifications.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Watches the directory holding `path` so replace-by-rename writes are
    /// still seen, forwarding one `()` per relevant event.
    pub fn start(path: &Path) -> Result<(Self, mpsc::UnboundedReceiver<()>)> {
        let file_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| anyhow!("config path {} has no file name", path.display()))?;
        let directory = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if touches_file(&event, &file_name) {
                    let _ = event_tx.send(());
                }
            }
            Err(error) => tracing::warn!(error = %error, "config watcher error"),
        })
        .context("failed to create config file watcher")?;
        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", directory.display()))?;

        Ok((
            Self {
                path: path.to_path_buf(),
                _watcher: watcher,
            },
            event_rx,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn touches_file(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name.as_os_str()))
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::path::PathBuf;
    use std::time::Duration;

    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use notify::{Event, EventKind};

    use super::{touches_file, ConfigWatcher};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn unit_only_writes_to_the_config_file_count() {
        let name = OsString::from("config.yaml");
        assert!(touches_file(
            &event(EventKind::Modify(ModifyKind::Any), "/data/config.yaml"),
            &name
        ));
        assert!(touches_file(
            &event(EventKind::Create(CreateKind::File), "/data/config.yaml"),
            &name
        ));
        assert!(!touches_file(
            &event(EventKind::Modify(ModifyKind::Any), "/data/dropbox.json"),
            &name
        ));
        assert!(!touches_file(
            &event(EventKind::Access(AccessKind::Any), "/data/config.yaml"),
            &name
        ));
    }

    #[tokio::test]
    async fn integration_rewriting_the_file_emits_notifications() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("config.yaml");
        std::fs::write(&path, "chats: []\n").expect("seed");
        let (watcher, mut events) = ConfigWatcher::start(&path).expect("watch");
        assert_eq!(watcher.path(), path.as_path());

        std::fs::write(tempdir.path().join("unrelated.txt"), "x").expect("write");
        std::fs::write(&path, "chats: [{handle: '@a'}]\n").expect("rewrite");

        let received = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("notification in time");
        assert_eq!(received, Some(()));
    }
}
