//! Integration tests for the `fluxsync` CLI binary.
//!
//! Argument parsing, config inspection, error exit codes and a batched
//! `get` against a mock retrieve endpoint.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `fluxsync` binary with env isolation.
fn fluxsync_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("fluxsync");
    cmd.env("HOME", "/tmp/fluxsync-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/fluxsync-cli-test-nonexistent")
        .env_remove("FLUXSYNC_PROFILE")
        .env_remove("FLUXSYNC_CONFIG")
        .env_remove("FLUXSYNC_STREAM_URL")
        .env_remove("FLUXSYNC_RETRIEVE_URL")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let file = dir.path().join("config.toml");
    std::fs::write(&file, body).unwrap();
    file
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = fluxsync_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    fluxsync_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("watch")
            .and(predicate::str::contains("get"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    fluxsync_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fluxsync"));
}

#[test]
fn test_completions_bash() {
    fluxsync_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_watch_requires_channels() {
    fluxsync_cmd().arg("watch").assert().failure().code(2);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    fluxsync_cmd()
        .args(["--config", "/tmp/elsewhere/fluxsync.toml", "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/elsewhere/fluxsync.toml"));
}

#[test]
fn test_config_show_redacts_headers() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_config(
        &dir,
        r#"
default_profile = "lab"

[profiles.lab]
stream_url = "ws://lab.local/stream"

[profiles.lab.headers]
cookie = "session=secret-token"
"#,
    );

    fluxsync_cmd()
        .arg("--config")
        .arg(&file)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("ws://lab.local/stream")
                .and(predicate::str::contains("********"))
                .and(predicate::str::contains("secret-token").not()),
        );
}

#[test]
fn test_unknown_profile_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_config(
        &dir,
        r#"
[profiles.lab]
stream_url = "ws://lab.local/stream"
"#,
    );

    fluxsync_cmd()
        .arg("--config")
        .arg(&file)
        .args(["--profile", "prod", "watch", "labels"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("prod").and(predicate::str::contains("lab")));
}

#[test]
fn test_bad_stream_url_is_a_usage_error() {
    fluxsync_cmd()
        .args(["--stream-url", "not a url", "watch", "labels"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("stream_url"));
}

// ── Get ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_get_batches_keys_into_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/labels/retrieve"))
        .and(body_json(json!({ "keys": [1, 2, 3] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "id": 3, "name": "gamma" },
                { "id": 1, "name": "alpha" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cmd = fluxsync_cmd();
    cmd.args(["--retrieve-url", &server.uri(), "-o", "json-compact"])
        .args(["get", "labels", "1", "2", "3"]);
    let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap();

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8(output.stdout).unwrap();
    let items: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(
        items,
        json!([
            { "id": 1, "name": "alpha" },
            { "id": 3, "name": "gamma" }
        ])
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_single_missing_key_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/labels/retrieve"))
        .and(body_json(json!({ "keys": ["ops"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;

    let mut cmd = fluxsync_cmd();
    cmd.args(["--retrieve-url", &server.uri()])
        .args(["get", "labels", "ops"]);
    let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap();

    assert_eq!(output.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&output.stderr).contains("ops"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_ignores_items_without_the_lookup_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/labels/retrieve"))
        .and(body_json(json!({ "keys": [0] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "name": "orphan" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cmd = fluxsync_cmd();
    cmd.args(["--retrieve-url", &server.uri()])
        .args(["get", "labels", "0"]);
    let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap();

    assert_eq!(output.status.code(), Some(4), "{output:?}");
    assert!(String::from_utf8_lossy(&output.stdout).trim().is_empty());
}
