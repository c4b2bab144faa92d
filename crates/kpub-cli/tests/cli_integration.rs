use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn binary_command() -> Command {
    let mut command = Command::new(assert_cmd::cargo::cargo_bin!("kpub"));
    command.env_remove("KPUB_CONFIG").env("RUST_LOG", "warn");
    command
}

fn write_config(dir: &Path, chats: &[&str]) -> PathBuf {
    let token_file = dir.join("dropbox.json");
    fs::write(
        &token_file,
        r#"{"access_token":"access","refresh_token":"refresh"}"#,
    )
    .expect("write token file");
    let chats = chats
        .iter()
        .map(|handle| format!("  - handle: \"{handle}\"\n"))
        .collect::<String>();
    let path = dir.join("config.yaml");
    fs::write(
        &path,
        format!(
            "telegram: {{ app_id: 1, app_hash: \"hash\" }}\n\
             defaults:\n  storage:\n    dropbox: {{ app_key: key, app_secret: secret, token_file: \"{}\" }}\n\
             chats:\n{chats}",
            token_file.display()
        ),
    )
    .expect("write config");
    path
}

#[test]
fn check_config_reports_chats_and_credential_files() {
    let dir = tempdir().expect("tempdir");
    let config = write_config(dir.path(), &["@ebook-bot", "@library"]);

    binary_command()
        .arg("--config")
        .arg(&config)
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "config ok: chats=2 credential_files=1",
        ));
}

#[test]
fn regression_check_config_fails_for_missing_file() {
    let dir = tempdir().expect("tempdir");

    binary_command()
        .arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}

#[test]
fn chat_list_prints_configured_handles() {
    let dir = tempdir().expect("tempdir");
    let config = write_config(dir.path(), &["@ebook-bot", "@library"]);

    binary_command()
        .env("KPUB_CONFIG", &config)
        .args(["chat", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("@ebook-bot\tformats=.azw3,.epub,.mobi"))
        .stdout(predicate::str::contains("@library"));
}

#[test]
fn chat_remove_rewrites_config() {
    let dir = tempdir().expect("tempdir");
    let config = write_config(dir.path(), &["@ebook-bot", "@library"]);

    binary_command()
        .arg("--config")
        .arg(&config)
        .args(["chat", "remove", "@library", "--yes"])
        .assert()
        .success();

    let rewritten = fs::read_to_string(&config).expect("read config");
    assert!(rewritten.contains("@ebook-bot"));
    assert!(!rewritten.contains("@library"));
}

#[test]
fn regression_chat_remove_refuses_last_chat() {
    let dir = tempdir().expect("tempdir");
    let config = write_config(dir.path(), &["@ebook-bot"]);
    let before = fs::read_to_string(&config).expect("read config");

    binary_command()
        .arg("--config")
        .arg(&config)
        .args(["chat", "remove", "@ebook-bot", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot remove the only chat"));
    assert_eq!(fs::read_to_string(&config).expect("read config"), before);
}
