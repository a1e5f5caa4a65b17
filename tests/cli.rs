use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{TempDir, tempdir};

/// Binary with HOME and the cache dir pointed into `home`.
fn pulsesync(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pulsesync"));
    cmd.env("HOME", home)
        .env("XDG_CACHE_HOME", home.join("cache"))
        .env_remove("PULSESYNC_CONFIG")
        .env_remove("PULSESYNC_API_URL")
        .env_remove("PULSESYNC_API_KEY")
        .env_remove("PULSESYNC_FORMAT")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path, api_url: &str) -> PathBuf {
    let path = dir.join("config.yaml");
    let contents = format!(
        "api_url: {api_url}\napi_key: anon-key\ntables: [clients, metrics]\nsync:\n  max_retries: 0\n  request_timeout_secs: 5\noffline:\n  origin: {api_url}\n  version: v1\n  precache: [\"/\"]\n"
    );
    fs::write(&path, contents).expect("failed to write config");
    path
}

fn home() -> TempDir {
    tempdir().expect("failed to create temp home")
}

#[test]
fn help_lists_commands() {
    let home = home();
    pulsesync(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("replay"))
        .stdout(predicate::str::contains("offline"));
}

#[test]
fn status_uses_custom_config_path() -> Result<(), Box<dyn std::error::Error>> {
    let home = home();
    let config_path = write_config(home.path(), "https://project.example.co");

    let assert = pulsesync(home.path())
        .arg("status")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(stdout.contains("Remote: https://project.example.co"));
    assert!(stdout.contains("Tables: clients, metrics"));
    assert!(stdout.contains(&config_path.to_string_lossy().to_string()));

    Ok(())
}

#[test]
fn status_without_config_is_not_an_error() {
    let home = home();
    pulsesync(home.path())
        .arg("status")
        .arg("--config")
        .arg(home.path().join("missing.yaml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration not found"));
}

#[test]
fn status_json_reports_env_override() -> Result<(), Box<dyn std::error::Error>> {
    let home = home();
    let config_path = write_config(home.path(), "https://project.example.co");

    let assert = pulsesync(home.path())
        .args(["--format", "json", "--no-cache", "status"])
        .arg("--config")
        .arg(&config_path)
        .env("PULSESYNC_API_URL", "https://override.example.co")
        .assert()
        .success();

    let value: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout)?;
    assert_eq!(value["api_url"], "https://override.example.co");
    assert_eq!(value["api_key_configured"], true);
    assert_eq!(value["session"], serde_json::Value::Null);

    Ok(())
}

#[test]
fn cache_path_follows_xdg_cache_home() {
    let home = home();
    pulsesync(home.path())
        .args(["cache", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pulsesync"));
}

#[test]
fn cache_status_and_clear_on_empty_cache() {
    let home = home();
    pulsesync(home.path())
        .args(["cache", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Valid entries:  0"));

    pulsesync(home.path())
        .args(["cache", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cache was already empty"));
}

#[test]
fn session_show_without_session() {
    let home = home();
    pulsesync(home.path())
        .args(["--format", "json", "session", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"active\": false"));
}

#[test]
fn watch_without_config_shows_helpful_error() {
    let home = home();
    let missing = home.path().join("does-not-exist.yaml");

    pulsesync(home.path())
        .args(["watch", "clients", "--once"])
        .arg("--config")
        .arg(&missing)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"))
        .stderr(predicate::str::contains("does-not-exist.yaml"));
}

#[test]
fn watch_rejects_unknown_table() {
    let home = home();
    pulsesync(home.path())
        .args(["watch", "invoices"])
        .assert()
        .failure();
}

#[test]
fn replay_requires_existing_event_file() {
    let home = home();
    let config_path = write_config(home.path(), "https://project.example.co");

    pulsesync(home.path())
        .args(["replay", "clients"])
        .arg(home.path().join("events.jsonl"))
        .arg("--config")
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[cfg_attr(not(feature = "http-tests"), ignore)]
#[test]
fn watch_once_prints_rows_and_opens_session() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = mockito::Server::new();
    let _clients = server
        .mock("GET", "/rest/v1/clients")
        .match_query(mockito::Matcher::Any)
        .match_header("apikey", "anon-key")
        .with_status(200)
        .with_body(r#"[{"id":"c-1","name":"Acme","status":"active","health_score":91}]"#)
        .create();

    let home = home();
    let config_path = write_config(home.path(), &server.url());

    let assert = pulsesync(home.path())
        .args(["--format", "json", "watch", "clients", "--once"])
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(stdout.contains("\"id\": \"c-1\""));
    assert!(stdout.contains("\"data_version\": 1"));

    pulsesync(home.path())
        .args(["session", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Session active"))
        .stdout(predicate::str::contains(server.url()));

    Ok(())
}

#[cfg_attr(not(feature = "http-tests"), ignore)]
#[test]
fn replay_applies_events_to_fetched_rows() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = mockito::Server::new();
    let _clients = server
        .mock("GET", "/rest/v1/clients")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(r#"[{"id":"c-1","name":"Acme"},{"id":"c-2","name":"Globex"}]"#)
        .create();

    let home = home();
    let config_path = write_config(home.path(), &server.url());
    let events = home.path().join("events.jsonl");
    fs::write(
        &events,
        concat!(
            r#"{"eventType":"INSERT","table":"clients","new":{"id":"c-3","name":"Initech"}}"#,
            "\n",
            r#"{"eventType":"DELETE","table":"clients","old":{"id":"c-2"}}"#,
            "\n",
            r#"{"eventType":"UPDATE","table":"clients","new":{"id":"c-1","status":"churned"}}"#,
            "\n",
        ),
    )?;

    let assert = pulsesync(home.path())
        .args(["--no-cache", "--format", "table", "replay", "clients"])
        .arg(&events)
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(stdout.contains("Applied 3 of 3 events"));
    assert!(stdout.contains("Initech"));
    assert!(stdout.contains("churned"));
    assert!(!stdout.contains("Globex"));

    Ok(())
}

#[cfg_attr(not(feature = "http-tests"), ignore)]
#[test]
fn offline_install_then_status() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = mockito::Server::new();
    let _root = server
        .mock("GET", "/")
        .with_status(200)
        .with_body("<html>dashboard</html>")
        .create();

    let home = home();
    let config_path = write_config(home.path(), &server.url());

    pulsesync(home.path())
        .args(["offline", "install"])
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("v1 active"));

    pulsesync(home.path())
        .args(["offline", "status"])
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("pulsesync-v1 (1 responses)"));

    Ok(())
}
