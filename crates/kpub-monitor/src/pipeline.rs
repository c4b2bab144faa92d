//! Per-file download, convert, upload and notify pipeline.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use kpub_storage::Uploader;

use crate::chat_client::{ChatClient, DocumentMedia};
use crate::converter::Converter;

/// Shared collaborators for every pipeline run.
pub struct PipelineContext {
    pub client: Arc<dyn ChatClient>,
    pub converter: Arc<dyn Converter>,
    pub download_dir: PathBuf,
    pub converted_dir: PathBuf,
    pub stage_timeout: Option<Duration>,
}

/// One accepted document bound to its chat's uploader.
pub struct FileJob {
    pub chat_handle: String,
    pub file_name: String,
    pub document: DocumentMedia,
    pub uploader: Arc<dyn Uploader>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Prepare,
    Download,
    Convert,
    Upload,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Prepare => "prepare",
            Self::Download => "download",
            Self::Convert => "convert",
            Self::Upload => "upload",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Uploaded { remote_name: String },
    Failed { stage: PipelineStage, reason: String },
}

pub fn started_message(file_name: &str, chat_handle: &str) -> String {
    format!("[kpub] Processing '{file_name}' from {chat_handle}...")
}

pub fn failed_message(file_name: &str) -> String {
    format!("[kpub] Failed to process '{file_name}'.")
}

pub fn success_message(remote_name: &str) -> String {
    format!("[kpub] Done! '{remote_name}' is ready on your Kobo.")
}

static JOB_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Private working directory for one run, removed with its contents when
/// dropped. Two chats sending the same filename never share a path.
struct WorkingDir {
    path: PathBuf,
}

impl WorkingDir {
    fn new(parent: &Path, job_id: u64) -> Self {
        Self {
            path: parent.join(format!("job-{job_id}")),
        }
    }

    fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)
            .with_context(|| format!("failed to create {}", self.path.display()))
    }
}

impl Drop for WorkingDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed working dir"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => tracing::warn!(
                path = %self.path.display(),
                error = %error,
                "failed to remove working dir"
            ),
        }
    }
}

/// Runs the pipeline for one file, reporting to saved messages. Stage
/// failures end this file only and produce exactly one failure message.
pub async fn run_file_pipeline(context: &PipelineContext, job: FileJob) -> PipelineOutcome {
    let outcome = execute(context, &job).await;
    match &outcome {
        PipelineOutcome::Uploaded { remote_name } => {
            tracing::info!(
                chat = %job.chat_handle,
                file = %job.file_name,
                remote = %remote_name,
                "pipeline complete"
            );
            notify(context, &success_message(remote_name)).await;
        }
        PipelineOutcome::Failed { stage, reason } => {
            tracing::error!(
                chat = %job.chat_handle,
                file = %job.file_name,
                stage = %stage,
                reason = %reason,
                "pipeline failed"
            );
            notify(context, &failed_message(&job.file_name)).await;
        }
    }
    outcome
}

async fn execute(context: &PipelineContext, job: &FileJob) -> PipelineOutcome {
    tracing::info!(chat = %job.chat_handle, file = %job.file_name, "file received, starting pipeline");
    let job_id = JOB_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let download_dir = WorkingDir::new(&context.download_dir, job_id);
    let converted_dir = WorkingDir::new(&context.converted_dir, job_id);
    if let Err(error) = download_dir.create().and_then(|()| converted_dir.create()) {
        return failed(PipelineStage::Prepare, error);
    }
    notify(context, &started_message(&job.file_name, &job.chat_handle)).await;

    let download_path = download_dir.path.join(local_file_name(&job.file_name));
    let download = context
        .client
        .download_document(&job.document, &download_path);
    if let Err(error) = run_stage(context.stage_timeout, download).await {
        return failed(PipelineStage::Download, error);
    }
    tracing::info!(file = %job.file_name, "download complete, converting");

    let converted_path = context
        .converter
        .output_path(&download_path, &converted_dir.path);
    let convert = context.converter.convert(&download_path, &converted_path);
    if let Err(error) = run_stage(context.stage_timeout, convert).await {
        return failed(PipelineStage::Convert, error);
    }

    let remote_name = match converted_path.file_name().and_then(|name| name.to_str()) {
        Some(name) => name.to_string(),
        None => {
            return failed(
                PipelineStage::Convert,
                anyhow!("converted path {} has no file name", converted_path.display()),
            )
        }
    };
    tracing::info!(file = %job.file_name, remote = %remote_name, "conversion complete, uploading");
    let upload = async {
        job.uploader
            .upload(&converted_path, &remote_name)
            .await
            .map_err(anyhow::Error::from)
    };
    if let Err(error) = run_stage(context.stage_timeout, upload).await {
        return failed(PipelineStage::Upload, error);
    }

    PipelineOutcome::Uploaded { remote_name }
}

async fn run_stage<F>(stage_timeout: Option<Duration>, stage: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match stage_timeout {
        Some(limit) => tokio::time::timeout(limit, stage)
            .await
            .map_err(|_| anyhow!("timed out after {}s", limit.as_secs_f64()))?,
        None => stage.await,
    }
}

fn failed(stage: PipelineStage, error: anyhow::Error) -> PipelineOutcome {
    PipelineOutcome::Failed {
        stage,
        reason: format!("{error:#}"),
    }
}

/// Status delivery is best-effort; a failed send never fails the file.
async fn notify(context: &PipelineContext, text: &str) {
    if let Err(error) = context.client.send_to_self(text).await {
        tracing::warn!(error = %format!("{error:#}"), "failed to send status message");
    }
}

/// Base name of a remote filename, so a crafted name cannot escape the download dir.
fn local_file_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("document")
        .to_string()
}
