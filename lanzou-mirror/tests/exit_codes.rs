//! Spawns the real binary to check the exit-code contract: only configuration problems fail
//! the run, failing tasks do not.
//!
//! GitHub and LanZou are pointed at a closed local port so every task fails fast at CHECK.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const UNREACHABLE: &str = "http://127.0.0.1:9";

const TASKS: &str = r#"
tasks:
  - url: https://github.com/owner/tool/releases/latest
    folder_name: tool
  - url: https://github.com/owner/other/releases/latest
    folder_name: other
"#;

fn run(dir: &Path, args: &[&str], credentials: bool) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_lanzou-mirror"));
    cmd.current_dir(dir)
        .args(args)
        .env("NO_COLOR", "1")
        .env("MIRROR_GITHUB_API", UNREACHABLE)
        .env("MIRROR_LANZOU_BASE", UNREACHABLE)
        .env_remove("MIRROR_CONFIG")
        .env_remove("MIRROR_STATE")
        .env_remove("GITHUB_TOKEN")
        .env_remove("RUST_LOG");

    if credentials {
        cmd.env("LANZOU_USERNAME", "user")
            .env("LANZOU_PASSWORD", "secret")
            .env("LANZOU_UID", "1");
    } else {
        cmd.env_remove("LANZOU_USERNAME")
            .env_remove("LANZOU_PASSWORD")
            .env_remove("LANZOU_UID");
    }

    cmd.output().expect("failed to run lanzou-mirror")
}

#[test]
fn missing_task_file_is_fatal() {
    let tmp_dir = TempDir::new().unwrap();
    let output = run(tmp_dir.path(), &[], true);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("task"), "unexpected stderr:\n{stderr}");
}

#[test]
fn missing_credentials_are_fatal() {
    let tmp_dir = TempDir::new().unwrap();
    fs::write(tmp_dir.path().join("download_tasks.yaml"), TASKS).unwrap();

    let output = run(tmp_dir.path(), &[], false);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("LANZOU_"), "unexpected stderr:\n{stderr}");
}

#[test]
fn failing_tasks_still_exit_zero() {
    let tmp_dir = TempDir::new().unwrap();
    fs::write(tmp_dir.path().join("download_tasks.yaml"), TASKS).unwrap();

    let output = run(tmp_dir.path(), &[], true);

    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    // Nothing synced, so no marker was written, and the run lock is gone.
    assert!(!tmp_dir.path().join("sync_state.json").exists());
    assert!(!tmp_dir.path().join("sync_state.json.lock").exists());
}

#[test]
fn check_only_needs_no_credentials() {
    let tmp_dir = TempDir::new().unwrap();
    fs::write(tmp_dir.path().join("tasks.yaml"), TASKS).unwrap();

    let output = run(tmp_dir.path(), &["--check-only", "--config", "tasks.yaml"], false);

    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn held_lock_is_fatal() {
    let tmp_dir = TempDir::new().unwrap();
    fs::write(tmp_dir.path().join("download_tasks.yaml"), TASKS).unwrap();
    fs::write(tmp_dir.path().join("sync_state.json.lock"), "{}").unwrap();

    let output = run(tmp_dir.path(), &[], true);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Another run is in progress"), "unexpected stderr:\n{stderr}");
}
