//! CLI integration tests for the Keeper command-line interface.
//!
//! Session files are produced through `keeper_session` in a temporary
//! directory, then examined through the binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use assert_cmd::Command;
use keeper_session::{SessionEngine, SessionId, SessionOptions};
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the keeper binary.
fn keeper() -> Command {
    let mut cmd = Command::cargo_bin("keeper").unwrap();
    cmd.env_remove("KEEPER_CONFIG").env_remove("RUST_LOG");
    cmd
}

/// Write one session through the engine and return its file path.
fn saved_session(dir: &Path) -> (SessionId, PathBuf) {
    let engine = SessionEngine::new(SessionOptions::new(dir, "SID").with_cache_limit(0)).unwrap();
    let session = engine.start(None);
    session.set_string("user/name", "ada");
    session.set_int("user/visits", 3);
    let id = session.id();
    engine.close(session);
    (id, engine.store().path_for(&id))
}

fn write_config(dir: &TempDir, sessions: &Path) -> PathBuf {
    let path = dir.path().join("keeper.toml");
    fs::write(
        &path,
        format!(
            "[session]\npath = {:?}\nname = \"SID\"\ntimeout = 60\nlifetime = 0\n",
            sessions.display().to_string()
        ),
    )
    .unwrap();
    path
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    keeper()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("sweep"))
        .stdout(predicate::str::contains("stats"))
        .stdout(predicate::str::contains("run"));
}

#[test]
fn test_version_displays() {
    keeper()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("keeper"));
}

#[test]
fn test_check_requires_files() {
    keeper().arg("check").assert().failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// File Commands
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_check_valid_file() {
    let dir = TempDir::new().unwrap();
    let (id, path) = saved_session(dir.path());

    keeper()
        .arg("check")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"))
        .stdout(predicate::str::contains(id.as_str()));
}

#[test]
fn test_check_corrupt_file_fails() {
    let dir = TempDir::new().unwrap();
    let (_, path) = saved_session(dir.path());
    let mut bytes = fs::read(&path).unwrap();
    bytes[0] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    keeper()
        .arg("check")
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("corrupt"))
        .stderr(predicate::str::contains("1 of 1 files failed validation"));
}

#[test]
fn test_check_json_output() {
    let dir = TempDir::new().unwrap();
    let (_, path) = saved_session(dir.path());

    let output = keeper()
        .args(["--json", "check"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());
    let results: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(results[0]["ok"], true);
}

#[test]
fn test_inspect_json_shows_values() {
    let dir = TempDir::new().unwrap();
    let (id, path) = saved_session(dir.path());

    let output = keeper()
        .args(["--json", "inspect"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(record["id"], id.as_str());
    assert_eq!(record["data"]["user"]["name"], "ada");
    assert_eq!(record["data"]["user"]["visits"], 3);
    assert!(record["client"].is_null());
}

#[test]
fn test_inspect_human_output() {
    let dir = TempDir::new().unwrap();
    let (id, path) = saved_session(dir.path());

    keeper()
        .arg("inspect")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()))
        .stdout(predicate::str::contains("unbound"))
        .stdout(predicate::str::contains("\"ada\""));
}

#[test]
fn test_inspect_missing_file() {
    keeper()
        .args(["inspect", "/nonexistent/session"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory Commands
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_missing_config_fails() {
    let dir = TempDir::new().unwrap();
    keeper()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}

#[test]
fn test_unusable_session_directory_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, &dir.path().join("missing"));

    keeper()
        .arg("--config")
        .arg(&config)
        .arg("sweep")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unusable"));
}

#[test]
fn test_sweep_removes_expired_files() {
    let dir = TempDir::new().unwrap();
    let sessions = dir.path().join("sessions");
    fs::create_dir(&sessions).unwrap();
    let (_, fresh) = saved_session(&sessions);
    let (_, stale) = saved_session(&sessions);
    fs::File::options()
        .write(true)
        .open(&stale)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(600))
        .unwrap();
    let config = write_config(&dir, &sessions);

    keeper()
        .arg("--config")
        .arg(&config)
        .args(["sweep", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Would delete 1 of 2"));
    assert!(stale.exists());

    keeper()
        .arg("--config")
        .arg(&config)
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted 1 of 2"));
    assert!(!stale.exists());
    assert!(fresh.exists());
}

#[test]
fn test_stats_json() {
    let dir = TempDir::new().unwrap();
    let sessions = dir.path().join("sessions");
    fs::create_dir(&sessions).unwrap();
    saved_session(&sessions);
    fs::write(sessions.join(SessionId::generate().as_str()), b"junk").unwrap();
    let config = write_config(&dir, &sessions);

    let output = keeper()
        .arg("--config")
        .arg(&config)
        .args(["--json", "stats", "--verify"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["files"], 2);
    assert_eq!(stats["corrupt"], 1);
    assert_eq!(stats["timeout"], 60);
}

#[test]
fn test_negative_cache_limit_is_clamped_to_zero() {
    let dir = TempDir::new().unwrap();
    let sessions = dir.path().join("sessions");
    fs::create_dir(&sessions).unwrap();
    let config = dir.path().join("keeper.toml");
    fs::write(
        &config,
        format!(
            "[session]\npath = {:?}\nname = \"SID\"\ncache_limit = -5\n",
            sessions.display().to_string()
        ),
    )
    .unwrap();

    let output = keeper()
        .arg("--config")
        .arg(&config)
        .args(["--json", "stats"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["cache_limit"], 0);
}

#[test]
fn test_run_until_quit() {
    let dir = TempDir::new().unwrap();
    let sessions = dir.path().join("sessions");
    fs::create_dir(&sessions).unwrap();
    let config = write_config(&dir, &sessions);

    keeper()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .write_stdin("stats\nsweep\nsave\nquit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"resident\":0"))
        .stdout(predicate::str::contains("Keeper stopped"));
}
