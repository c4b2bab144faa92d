use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use kpub_config::{AcceptedFormats, DropboxConfig};
use kpub_core::CancellationToken;
use kpub_monitor::testing::{
    document_message, QueuedAuthenticator, RecordingUploader, ScriptedChatClient,
    ScriptedConverter,
};
use kpub_monitor::{
    ChatRegistry, InboundUpdate, MonitorSettings, MonitorState, PeerIdentity, SessionMonitor,
};
use kpub_storage::{CredentialState, DropboxEndpoints, DropboxUploader, Uploader};
use serde_json::json;
use tokio::task::JoinHandle;

const BOT: PeerIdentity = PeerIdentity::User(42);
const WAIT: Duration = Duration::from_secs(5);

struct Service {
    monitor: Arc<SessionMonitor>,
    client: Arc<ScriptedChatClient>,
    converter: Arc<ScriptedConverter>,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
    workdir: tempfile::TempDir,
}

impl Service {
    async fn start() -> Self {
        let workdir = tempfile::tempdir().expect("tempdir");
        let client = Arc::new(ScriptedChatClient::new());
        client.add_peer("ebook-bot", BOT);
        let converter = Arc::new(ScriptedConverter::new());
        let monitor = Arc::new(SessionMonitor::new(
            client.clone(),
            Arc::new(QueuedAuthenticator::new(Vec::<String>::new())),
            converter.clone(),
            MonitorSettings::with_dirs(
                &workdir.path().join("downloads"),
                &workdir.path().join("converted"),
            ),
        ));
        let shutdown = CancellationToken::new();
        let task = {
            let monitor = monitor.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { monitor.run(shutdown).await })
        };
        let mut state = monitor.subscribe_state();
        tokio::time::timeout(WAIT, state.wait_for(|state| state.accepts_chats()))
            .await
            .expect("monitor ready in time")
            .expect("state channel open");
        Self {
            monitor,
            client,
            converter,
            shutdown,
            task,
            workdir,
        }
    }

    async fn watch_bot(&self, formats: &[&str], uploader: Arc<dyn Uploader>) {
        let formats = formats.iter().copied().collect::<AcceptedFormats>();
        self.monitor
            .register_chat("@ebook-bot", formats, uploader)
            .await
            .expect("register @ebook-bot");
    }

    fn send_document(&self, file_name: &str) {
        self.client
            .push_update(InboundUpdate::NewMessage(document_message(BOT, file_name)));
    }

    fn leftover_files(&self) -> Vec<PathBuf> {
        ["downloads", "converted"]
            .iter()
            .flat_map(|dir| list_dir(&self.workdir.path().join(dir)))
            .collect()
    }

    async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("monitor stops in time")
            .expect("join")
            .expect("clean stop");
        assert_eq!(self.monitor.state(), MonitorState::Stopped);
    }
}

fn list_dir(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.flatten().map(|entry| entry.path()).collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn unsupported_format_is_ignored_without_messages() {
    let service = Service::start().await;
    let uploader = Arc::new(RecordingUploader::new());
    service.watch_bot(&[".epub"], uploader.clone()).await;

    service.send_document("book.mobi");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(service.client.downloads_started(), 0);
    assert!(service.client.sent_messages().is_empty());
    assert_eq!(uploader.upload_attempts(), 0);
    service.stop().await;
}

#[tokio::test]
async fn accepted_epub_is_converted_uploaded_and_reported() {
    let service = Service::start().await;
    let uploader = Arc::new(RecordingUploader::new());
    service.watch_bot(&[".epub"], uploader.clone()).await;

    service.send_document("novel.epub");
    let sent = service.client.wait_for_sent(2, WAIT).await;

    assert_eq!(
        sent,
        vec![
            "[kpub] Processing 'novel.epub' from @ebook-bot...".to_string(),
            "[kpub] Done! 'novel.kepub.epub' is ready on your Kobo.".to_string(),
        ]
    );
    assert_eq!(uploader.uploaded_names(), vec!["novel.kepub.epub"]);
    assert!(service.leftover_files().is_empty());
    service.stop().await;
}

#[tokio::test]
async fn conversion_failure_reports_once_and_cleans_up() {
    let service = Service::start().await;
    let uploader = Arc::new(RecordingUploader::new());
    service.watch_bot(&[".epub"], uploader.clone()).await;
    service.converter.fail_conversion("broken.epub");

    service.send_document("broken.epub");
    let sent = service.client.wait_for_sent(2, WAIT).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        service.client.sent_messages(),
        vec![
            "[kpub] Processing 'broken.epub' from @ebook-bot...".to_string(),
            "[kpub] Failed to process 'broken.epub'.".to_string(),
        ]
    );
    assert_eq!(sent.len(), 2);
    assert_eq!(uploader.upload_attempts(), 0);
    assert!(service.leftover_files().is_empty());
    service.stop().await;
}

#[tokio::test]
async fn shutdown_waits_for_every_in_flight_file() {
    let service = Service::start().await;
    let uploader = Arc::new(RecordingUploader::new());
    service.watch_bot(&[".epub"], uploader.clone()).await;
    service.client.hold_downloads();

    for name in ["one.epub", "two.epub", "three.epub"] {
        service.send_document(name);
    }
    assert_eq!(service.client.wait_for_downloads(3, WAIT).await, 3);

    service.shutdown.cancel();
    let mut state = service.monitor.subscribe_state();
    tokio::time::timeout(WAIT, state.wait_for(|state| *state == MonitorState::Draining))
        .await
        .expect("draining in time")
        .expect("state channel open");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(service.monitor.state(), MonitorState::Draining);
    assert_eq!(service.monitor.in_flight_files(), 3);

    service.client.release_downloads();
    let Service {
        monitor,
        client,
        task,
        ..
    } = service;
    tokio::time::timeout(WAIT, task)
        .await
        .expect("drained in time")
        .expect("join")
        .expect("clean stop");

    assert_eq!(monitor.state(), MonitorState::Stopped);
    assert_eq!(monitor.in_flight_files(), 0);
    let mut uploaded = uploader.uploaded_names();
    uploaded.sort();
    assert_eq!(
        uploaded,
        vec!["one.kepub.epub", "three.kepub.epub", "two.kepub.epub"]
    );
    assert_eq!(client.sent_messages().len(), 6);
}

#[tokio::test]
async fn expired_dropbox_token_is_refreshed_once_for_an_upload() {
    let server = MockServer::start();
    let rejected = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload")
            .header("authorization", "Bearer stale");
        then.status(401).body("expired_access_token");
    });
    let accepted = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload")
            .header("authorization", "Bearer fresh")
            .header_exists("dropbox-api-arg");
        then.status(200).json_body(json!({"name": "novel.kepub.epub"}));
    });
    let refresh = server.mock(|when, then| {
        when.method(POST)
            .path("/oauth2/token")
            .body_includes("refresh_token=long-lived");
        then.status(200).json_body(json!({"access_token": "fresh"}));
    });

    let service = Service::start().await;
    let token_file = service.workdir.path().join("dropbox.json");
    std::fs::write(
        &token_file,
        r#"{"access_token":"stale","refresh_token":"long-lived"}"#,
    )
    .expect("write token file");
    let uploader = DropboxUploader::with_endpoints(
        &DropboxConfig {
            app_key: "key".to_string(),
            app_secret: "secret".to_string(),
            token_file: token_file.display().to_string(),
            upload_path: "/Apps/Rakuten Kobo/".to_string(),
        },
        DropboxEndpoints::single_host(&server.base_url()),
    )
    .expect("uploader");
    service.watch_bot(&[".epub"], Arc::new(uploader)).await;

    service.send_document("novel.epub");
    let sent = service.client.wait_for_sent(2, WAIT).await;

    assert_eq!(
        sent.last().map(String::as_str),
        Some("[kpub] Done! 'novel.kepub.epub' is ready on your Kobo.")
    );
    rejected.assert_calls(1);
    refresh.assert_calls(1);
    accepted.assert_calls(1);
    let persisted = CredentialState::load(&token_file).expect("reload tokens");
    assert_eq!(persisted.access_token, "fresh");
    assert_eq!(persisted.refresh_token, "long-lived");
    service.stop().await;
}
