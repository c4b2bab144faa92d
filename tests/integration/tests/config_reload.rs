use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kpub_config::{load_config, write_config, ChatConfig, KpubConfig, StorageConfig};
use kpub_core::CancellationToken;
use kpub_monitor::testing::{
    document_message, QueuedAuthenticator, RecordingUploader, ScriptedChatClient,
    ScriptedConverter,
};
use kpub_monitor::{InboundUpdate, PeerIdentity, SessionMonitor};
use kpub_storage::{StorageAccount, UploadError, UploaderCache, UploaderFactory};
use kpub_supervisor::{ChatSupervisor, SupervisorDeps};
use tokio::sync::watch;

const WAIT: Duration = Duration::from_secs(5);

struct SharedUploaderFactory(Arc<RecordingUploader>);

impl UploaderFactory for SharedUploaderFactory {
    fn open_account(&self, _storage: &StorageConfig) -> Result<Arc<dyn StorageAccount>, UploadError> {
        Ok(self.0.clone())
    }
}

fn write_chats(path: &Path, workdir: &Path, chats: &[(&str, &str)]) -> KpubConfig {
    let mut config = KpubConfig::default();
    config.telegram.app_id = 1;
    config.telegram.app_hash = "hash".to_string();
    config.defaults.storage.dropbox.app_key = "key".to_string();
    config.defaults.storage.dropbox.app_secret = "secret".to_string();
    config.paths.download_dir = workdir.join("downloads");
    config.paths.converted_dir = workdir.join("converted");
    config.pipeline.reload_debounce_ms = 200;
    config.chats = chats
        .iter()
        .map(|(handle, formats)| ChatConfig {
            handle: handle.to_string(),
            accepted_formats: formats
                .split(',')
                .filter(|format| !format.is_empty())
                .map(str::to_string)
                .collect(),
            storage: None,
        })
        .collect();
    write_config(path, &config).expect("write config");
    load_config(path).expect("load config")
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_reloads(reloads: &mut watch::Receiver<u64>, count: u64) {
    tokio::time::timeout(WAIT, reloads.wait_for(|seen| *seen >= count))
        .await
        .expect("reload in time")
        .expect("reload channel open");
}

fn handles(monitor: &SessionMonitor) -> Vec<String> {
    let mut handles = monitor
        .monitored_chats()
        .into_iter()
        .map(|(_, handle)| handle)
        .collect::<Vec<_>>();
    handles.sort();
    handles
}

#[tokio::test]
async fn config_edits_add_remove_and_reconfigure_chats_live() {
    let workdir = tempfile::tempdir().expect("tempdir");
    let path = workdir.path().join("config.yaml");
    let config = write_chats(&path, workdir.path(), &[("@alpha", ".epub")]);

    let client = Arc::new(ScriptedChatClient::new());
    client.add_peer("alpha", PeerIdentity::User(1));
    client.add_peer("beta", PeerIdentity::Channel(2));
    let uploader = Arc::new(RecordingUploader::new());
    let supervisor = ChatSupervisor::new(
        &path,
        config,
        SupervisorDeps {
            client: client.clone(),
            authenticator: Arc::new(QueuedAuthenticator::new(Vec::<String>::new())),
            converter: Arc::new(ScriptedConverter::new()),
            uploaders: Arc::new(UploaderCache::new(Arc::new(SharedUploaderFactory(
                uploader.clone(),
            )))),
        },
    );
    let monitor = supervisor.monitor();
    let mut reloads = supervisor.subscribe_reloads();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(supervisor.run(shutdown.clone()));

    wait_until(|| handles(&monitor) == vec!["@alpha".to_string()]).await;
    // Initial registration completes before the watcher is armed.
    tokio::time::sleep(Duration::from_millis(100)).await;

    write_chats(
        &path,
        workdir.path(),
        &[("@alpha", ".epub"), ("@beta", ".epub")],
    );
    wait_for_reloads(&mut reloads, 1).await;
    assert_eq!(handles(&monitor), vec!["@alpha", "@beta"]);

    client.push_update(InboundUpdate::NewChannelMessage(document_message(
        PeerIdentity::Channel(2),
        "fresh.epub",
    )));
    client.wait_for_sent(2, WAIT).await;
    assert_eq!(uploader.uploaded_names(), vec!["fresh.kepub.epub"]);

    let seen = *reloads.borrow();
    write_chats(&path, workdir.path(), &[("@beta", ".epub,.mobi")]);
    wait_for_reloads(&mut reloads, seen + 1).await;
    assert_eq!(handles(&monitor), vec!["@beta"]);

    client.push_update(InboundUpdate::NewMessage(document_message(
        PeerIdentity::User(1),
        "ignored.epub",
    )));
    client.push_update(InboundUpdate::NewChannelMessage(document_message(
        PeerIdentity::Channel(2),
        "comic.mobi",
    )));
    client.wait_for_sent(4, WAIT).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        uploader.uploaded_names(),
        vec!["fresh.kepub.epub", "comic.kepub.epub"]
    );
    assert_eq!(client.sent_messages().len(), 4);

    shutdown.cancel();
    tokio::time::timeout(WAIT, task)
        .await
        .expect("supervisor stops in time")
        .expect("join")
        .expect("clean shutdown");
}

#[tokio::test]
async fn broken_config_edit_keeps_running_chats() {
    let workdir = tempfile::tempdir().expect("tempdir");
    let path = workdir.path().join("config.yaml");
    let config = write_chats(&path, workdir.path(), &[("@alpha", "")]);

    let client = Arc::new(ScriptedChatClient::new());
    client.add_peer("alpha", PeerIdentity::User(1));
    let uploader = Arc::new(RecordingUploader::new());
    let supervisor = ChatSupervisor::new(
        &path,
        config,
        SupervisorDeps {
            client: client.clone(),
            authenticator: Arc::new(QueuedAuthenticator::new(Vec::<String>::new())),
            converter: Arc::new(ScriptedConverter::new()),
            uploaders: Arc::new(UploaderCache::new(Arc::new(SharedUploaderFactory(
                uploader.clone(),
            )))),
        },
    );
    let monitor = supervisor.monitor();
    let mut reloads = supervisor.subscribe_reloads();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(supervisor.run(shutdown.clone()));

    wait_until(|| handles(&monitor) == vec!["@alpha".to_string()]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    std::fs::write(&path, "telegram: [not, a, mapping\n").expect("corrupt config");
    wait_for_reloads(&mut reloads, 1).await;
    assert_eq!(handles(&monitor), vec!["@alpha"]);

    client.push_update(InboundUpdate::NewMessage(document_message(
        PeerIdentity::User(1),
        "still-works.epub",
    )));
    client.wait_for_sent(2, WAIT).await;
    assert_eq!(uploader.uploaded_names(), vec!["still-works.kepub.epub"]);

    shutdown.cancel();
    tokio::time::timeout(WAIT, task)
        .await
        .expect("supervisor stops in time")
        .expect("join")
        .expect("clean shutdown");
}
