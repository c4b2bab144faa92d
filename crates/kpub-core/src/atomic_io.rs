use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use serde::Serialize;

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Writes text using a temp file + rename so readers never observe partial data.
///
/// The temp file lives next to the destination so the final rename stays on
/// one filesystem. It is flushed to disk before the rename and removed if any
/// step fails, leaving the previous destination content untouched.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.exists() && path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("kpub-state"),
        std::process::id(),
        TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    );
    let temp_path = parent_dir.join(temp_name);

    let written = write_and_sync(&temp_path, content.as_bytes()).and_then(|()| {
        std::fs::rename(&temp_path, path).with_context(|| {
            format!(
                "failed to rename temporary file {} to {}",
                temp_path.display(),
                path.display()
            )
        })
    });
    if written.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    written
}

/// Serializes `value` as pretty JSON (trailing newline) and writes it atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    payload.push('\n');
    write_text_atomic(path, &payload)
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("failed to create temporary file {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write temporary file {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync temporary file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use serde_json::json;

    use super::{write_json_atomic, write_text_atomic};

    #[test]
    fn unit_write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("sample.txt");
        write_text_atomic(&path, "hello world").expect("write");
        assert_eq!(read_to_string(&path).expect("read"), "hello world");
    }

    #[test]
    fn functional_write_text_atomic_replaces_and_leaves_no_temp_files() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("tokens.json");
        write_text_atomic(&path, "first").expect("first write");
        write_text_atomic(&path, "second").expect("second write");

        assert_eq!(read_to_string(&path).expect("read"), "second");
        let entries = std::fs::read_dir(tempdir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect::<Vec<_>>();
        assert_eq!(entries, vec![std::ffi::OsString::from("tokens.json")]);
    }

    #[test]
    fn functional_write_text_atomic_creates_missing_parent() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested/dir/config.yaml");
        write_text_atomic(&path, "chats: []\n").expect("write");
        assert!(path.exists());
    }

    #[test]
    fn regression_write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "x").expect_err("directory target");
        assert!(error.to_string().contains("is a directory"));
    }

    #[test]
    fn unit_write_json_atomic_appends_trailing_newline() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("state.json");
        write_json_atomic(&path, &json!({"access_token": "a"})).expect("write");
        let raw = read_to_string(&path).expect("read");
        assert!(raw.ends_with("}\n"));
        assert!(raw.contains("\"access_token\": \"a\""));
    }
}
