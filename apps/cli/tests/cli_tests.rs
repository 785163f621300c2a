//! CLI 端到端测试（模拟设备）

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(20);

/// 配置目录指向临时目录，避免读到用户配置
fn cli(config_home: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd: assert_cmd::Command = cargo_bin_cmd!("robomaster-cli");
    cmd.timeout(TIMEOUT)
        .env("XDG_CONFIG_HOME", config_home.path())
        .env("HOME", config_home.path())
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn keys_lists_builtin_catalog() {
    let home = tempfile::tempdir().unwrap();
    cli(&home)
        .args(["keys", "--filter", "airlink"])
        .assert()
        .success()
        .stdout(predicate::str::contains("AirLinkConnection"))
        .stdout(predicate::str::contains("117440513"));
}

#[test]
fn get_against_simulator() {
    let home = tempfile::tempdir().unwrap();
    cli(&home)
        .args(["--sim", "get", "AirLinkConnection"])
        .assert()
        .success()
        .stdout(predicate::str::contains("true"));
}

#[test]
fn set_then_read_is_reported() {
    let home = tempfile::tempdir().unwrap();
    cli(&home)
        .args(["--sim", "set", "GimbalWorkMode", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("GimbalWorkMode"));
}

#[test]
fn unknown_key_fails() {
    let home = tempfile::tempdir().unwrap();
    cli(&home)
        .args(["--sim", "get", "NoSuchKey"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NoSuchKey"));
}

#[test]
fn write_to_read_only_key_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    cli(&home)
        .args(["--sim", "set", "AirLinkConnection", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Access denied"));
}

#[test]
fn config_set_and_get() {
    let home = tempfile::tempdir().unwrap();
    cli(&home)
        .args(["config", "set", "--robot-ip", "10.1.2.3"])
        .assert()
        .success();
    cli(&home)
        .args(["config", "get", "robot_ip"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.1.2.3"));
}

#[test]
fn missing_host_command_is_explained() {
    let home = tempfile::tempdir().unwrap();
    cli(&home)
        .args(["get", "AirLinkConnection"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--host-cmd"));
}
