use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

pub const KEPUB_SUFFIX: &str = ".kepub.epub";

/// Opaque ebook conversion step.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Where the converted file for `input` will be written.
    fn output_path(&self, input: &Path, output_dir: &Path) -> PathBuf {
        kepub_output_path(input, output_dir)
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<()>;
}

/// `<output_dir>/<input stem>.kepub.epub`
pub fn kepub_output_path(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("converted");
    output_dir.join(format!("{stem}{KEPUB_SUFFIX}"))
}

/// Runs `<program> <input> <output>` (calibre's `ebook-convert` by default).
#[derive(Debug, Clone)]
pub struct EbookConvert {
    program: String,
}

impl EbookConvert {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Converter for EbookConvert {
    async fn convert(&self, input: &Path, output: &Path) -> Result<()> {
        tracing::info!(
            program = %self.program,
            input = %input.display(),
            output = %output.display(),
            "starting conversion"
        );
        let result = Command::new(&self.program)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.program))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            bail!(
                "{} failed with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            );
        }
        if !output.is_file() {
            bail!(
                "{} exited successfully but did not produce {}",
                self.program,
                output.display()
            );
        }
        tracing::info!(output = %output.display(), "conversion completed");
        Ok(())
    }
}
