#![allow(clippy::unwrap_used, clippy::expect_used)]

//! CLI smoke tests for the meshkit-node binary.

use std::io::Write;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use tokio::time::timeout;

fn run_node(args: &[&str], envs: &[(&str, &str)]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_meshkit-node"))
        .args(args)
        .envs(envs.iter().copied())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("failed to execute meshkit-node")
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn help_lists_options_and_subcommands() {
    let output = run_node(&["--help"], &[]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("--config"));
    assert!(stdout.contains("--print-config"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("check"));
}

#[test]
fn version_names_the_binary() {
    let output = run_node(&["--version"], &[]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("meshkit-node"));
}

#[test]
fn missing_config_file_fails() {
    let output = run_node(&["--config", "/nonexistent/node.yaml", "check"], &[]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("does not exist"));
}

#[test]
fn check_accepts_valid_config() {
    let file = config_file("registry:\n  kind: noop\n");
    let output = run_node(&["--config", file.path().to_str().unwrap(), "check"], &[]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Configuration is valid"));
}

#[test]
fn check_rejects_unknown_keys() {
    let file = config_file("http:\n  adress: \":1\"\n");
    let output = run_node(&["--config", file.path().to_str().unwrap(), "check"], &[]);
    assert!(!output.status.success());
}

#[test]
fn print_config_merges_file_and_env() {
    let file = config_file("http:\n  name: edge\n  register_ttl: 45s\n");
    let output = run_node(
        &["--config", file.path().to_str().unwrap(), "--print-config"],
        &[("MESHKIT__RPC__NAME", "from-env")],
    );
    assert!(output.status.success());

    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["http"]["name"], "edge");
    assert_eq!(config["http"]["register_ttl"], "45s");
    assert_eq!(config["http"]["address"], ":8080");
    assert_eq!(config["rpc"]["name"], "from-env");
    assert_eq!(config["registry"]["kind"], "memory");
}

#[tokio::test]
async fn run_keeps_serving_until_killed() {
    let file = config_file(
        "registry:\n  kind: memory\nrpc:\n  address: 127.0.0.1:0\nhttp:\n  address: 127.0.0.1:0\n",
    );
    let child = tokio::process::Command::new(env!("CARGO_BIN_EXE_meshkit-node"))
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let res = timeout(Duration::from_secs(2), child.wait_with_output()).await;
    assert!(res.is_err(), "node exited early: {res:?}");
}
