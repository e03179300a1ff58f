//! CLI behavior of the server binary.

use std::fs;
use std::time::Duration;

use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn missing_static_dir_exits_nonzero() {
    let tmp = TempDir::new().expect("create temp dir");
    let missing = tmp.path().join("does-not-exist");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tandemd");
    cmd.args(["--port", "0", "--static-dir"])
        .arg(&missing)
        .timeout(Duration::from_secs(10));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("static dir"));
}

#[test]
fn unreadable_config_exits_nonzero() {
    let tmp = TempDir::new().expect("create temp dir");
    let config = tmp.path().join("config.json");
    fs::write(&config, "{not json").expect("write config");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tandemd");
    cmd.args(["--port", "0", "--config"])
        .arg(&config)
        .timeout(Duration::from_secs(10));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("config parse failed"));
}

#[test]
fn help_documents_the_listen_flags() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tandemd");
    cmd.arg("--help").timeout(Duration::from_secs(10));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--port"))
        .stdout(predicate::str::contains("--static-dir"));
}
