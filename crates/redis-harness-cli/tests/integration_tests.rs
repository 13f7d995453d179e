//! Integration tests for the redis-harness binary.

use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

fn harness() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_redis-harness"));
    command
        .env_remove("REDIS_HARNESS_SERVER")
        .env_remove("REDIS_HARNESS_CONFIG")
        .env_remove("REDIS_HARNESS_SCRATCH_DIR");
    command
}

fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_render_prints_rendered_config() {
    let temp_dir = TempDir::new().unwrap();
    let output = harness()
        .args(["--scratch-dir"])
        .arg(temp_dir.path())
        .args(["render", "--port", "6391"])
        .output()
        .expect("Failed to run redis-harness");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let lines = stdout_lines(&output);
    assert!(lines.iter().any(|line| line == "port 6391"));
    assert!(lines.iter().any(|line| line == "databases 1"));
    assert!(lines.iter().any(|line| line == "dbfilename redis-6391.rdb"));
}

#[test]
fn test_render_with_template_from_env() {
    let temp_dir = TempDir::new().unwrap();
    let template = temp_dir.path().join("template.conf");
    fs::write(&template, "# custom\nport 6379\ndatabases 16\ndbfilename dump.rdb\ndir ./\n").unwrap();

    let output = harness()
        .env("REDIS_HARNESS_CONFIG", &template)
        .env("REDIS_HARNESS_SCRATCH_DIR", temp_dir.path())
        .args(["render", "--port", "7001", "--databases", "2"])
        .output()
        .expect("Failed to run redis-harness");

    assert!(output.status.success());
    let lines = stdout_lines(&output);
    assert_eq!(lines[0], "# custom");
    assert_eq!(lines[1], "port 7001");
    assert_eq!(lines[2], "databases 2");
}

#[test]
fn test_render_fails_on_incompatible_template() {
    let temp_dir = TempDir::new().unwrap();
    let template = temp_dir.path().join("template.conf");
    fs::write(&template, "port 6379\nport 6379\n").unwrap();

    let output = harness()
        .arg("--config")
        .arg(&template)
        .args(["render", "--port", "7002"])
        .output()
        .expect("Failed to run redis-harness");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_run_fails_without_server_binary() {
    let temp_dir = TempDir::new().unwrap();

    let output = harness()
        .arg("--server")
        .arg(temp_dir.path().join("missing-redis-server"))
        .arg("--scratch-dir")
        .arg(temp_dir.path())
        .args(["run", "--port", "7003"])
        .output()
        .expect("Failed to run redis-harness");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("7003"));
}
