use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

use podium_core::config;
use podium_daemon::paths::socket_path;

fn podium_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("podium"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("PODIUM_PASSWORD");
    cmd
}

fn write_pdf(dir: &Path, file: &str, pages: usize) -> PathBuf {
    let mut out = b"%PDF-1.7\n1 0 obj << /Type /Pages >> endobj\n".to_vec();
    for i in 0..pages {
        out.extend_from_slice(format!("{} 0 obj << /Type /Page >> endobj\n", i + 2).as_bytes());
    }
    let path = dir.join(file);
    fs::write(&path, out).expect("write pdf");
    path
}

fn stdout_of(cmd: &mut Command) -> String {
    let assert = cmd.assert().success();
    String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8")
}

#[test]
fn init_adds_then_updates_presenter() {
    let home = TempDir::new().expect("home");

    podium_cmd(home.path())
        .args(["init", "--user", "alice", "--password", "hunter2"])
        .assert()
        .success()
        .stdout(contains("Added presenter 'alice'"));

    podium_cmd(home.path())
        .args(["init", "--user", "alice"])
        .env("PODIUM_PASSWORD", "correct horse")
        .assert()
        .success()
        .stdout(contains("Updated presenter 'alice'"));

    let loaded = config::load_at(home.path()).expect("config");
    assert_eq!(loaded.presenters.len(), 1);
    assert!(loaded.authenticate("alice", "correct horse"));
    assert!(!loaded.authenticate("alice", "hunter2"));
}

#[test]
fn init_rejects_empty_password() {
    let home = TempDir::new().expect("home");
    podium_cmd(home.path())
        .args(["init", "--user", "alice", "--password", ""])
        .assert()
        .failure()
        .stderr(contains("password must not be empty"));
}

#[test]
fn deck_add_list_and_remove() {
    let home = TempDir::new().expect("home");
    let files = TempDir::new().expect("files");
    let intro = write_pdf(files.path(), "intro.pdf", 3);

    podium_cmd(home.path())
        .args(["deck", "add", "intro"])
        .arg(&intro)
        .assert()
        .success()
        .stdout(contains("Stored deck 'intro' (3 pages"));

    let table = stdout_of(podium_cmd(home.path()).args(["deck", "list"]));
    assert!(table.contains("intro"), "table: {table}");

    let json = stdout_of(podium_cmd(home.path()).args(["deck", "list", "--json"]));
    let decks: Value = serde_json::from_str(&json).expect("deck json");
    assert_eq!(decks[0]["name"], "intro");
    assert_eq!(decks[0]["pages"], 3);
    assert_eq!(decks[0]["sha256"].as_str().map(str::len), Some(64));

    podium_cmd(home.path())
        .args(["deck", "remove", "intro"])
        .assert()
        .success()
        .stdout(contains("Removed deck 'intro'"));
    podium_cmd(home.path())
        .args(["deck", "list"])
        .assert()
        .success()
        .stdout(contains("No decks stored"));
    podium_cmd(home.path())
        .args(["deck", "remove", "intro"])
        .assert()
        .failure()
        .stderr(contains("deck 'intro' not found"));
}

#[test]
fn deck_add_rejects_non_pdf_and_bad_names() {
    let home = TempDir::new().expect("home");
    let files = TempDir::new().expect("files");
    let notes = files.path().join("notes.txt");
    fs::write(&notes, "just text").expect("write notes");
    let pdf = write_pdf(files.path(), "ok.pdf", 1);

    podium_cmd(home.path())
        .args(["deck", "add", "notes"])
        .arg(&notes)
        .assert()
        .failure()
        .stderr(contains("is not a PDF document"));

    podium_cmd(home.path())
        .args(["deck", "add", "../escape"])
        .arg(&pdf)
        .assert()
        .failure()
        .stderr(contains("invalid deck name"));

    let json = stdout_of(podium_cmd(home.path()).args(["deck", "list", "--json"]));
    assert_eq!(serde_json::from_str::<Value>(&json).expect("json"), Value::Array(vec![]));
}

#[test]
fn status_and_stop_without_relay() {
    let home = TempDir::new().expect("home");

    let json = stdout_of(podium_cmd(home.path()).args(["status", "--json"]));
    let status: Value = serde_json::from_str(&json).expect("status json");
    assert_eq!(status["running"], Value::Bool(false));

    podium_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("relay is not running"));
    podium_cmd(home.path())
        .arg("stop")
        .assert()
        .success()
        .stdout(contains("relay is not running"));
}

#[test]
fn serve_reports_status_and_stops() {
    let home = TempDir::new().expect("home");
    podium_cmd(home.path())
        .args(["init", "--user", "alice", "--password", "hunter2"])
        .assert()
        .success();

    let mut relay = podium_cmd(home.path())
        .arg("serve")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn relay");

    let socket = socket_path(home.path());
    let deadline = Instant::now() + Duration::from_secs(10);
    while !socket.exists() {
        assert!(Instant::now() < deadline, "relay socket never appeared");
        sleep(Duration::from_millis(20));
    }

    let json = stdout_of(podium_cmd(home.path()).args(["status", "--json"]));
    let status: Value = serde_json::from_str(&json).expect("status json");
    assert_eq!(status["running"], Value::Bool(true));
    assert_eq!(status["subscribers"], 0);
    assert_eq!(status["state"]["currentPageNumber"], serde_json::json!({}));

    podium_cmd(home.path())
        .arg("stop")
        .assert()
        .success()
        .stdout(contains("relay stop requested"));

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(exit) = relay.try_wait().expect("poll relay") {
            assert!(exit.success(), "relay exit: {exit:?}");
            break;
        }
        if Instant::now() > deadline {
            let _ = relay.kill();
            panic!("relay did not stop");
        }
        sleep(Duration::from_millis(20));
    }
    assert!(!socket.exists(), "socket is removed on shutdown");
}
