//! Integration tests for the `pluma` binary.

#![allow(deprecated)]

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;
use std::fs;
use tempfile::tempdir;

fn pluma(cwd: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("pluma").expect("pluma bin");
    cmd.current_dir(cwd).env_remove("PLUMA_CONFIG").env_remove("RUST_LOG");
    cmd
}

fn artifact_name(name: &str) -> String {
    format!("{name}.{}", std::env::consts::DLL_EXTENSION)
}

#[test]
fn help_lists_commands() {
    let dir = tempdir().unwrap();
    pluma(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("run"))
        .stdout(contains("inspect"))
        .stdout(contains("scan"));
}

#[test]
fn scan_json_lists_watched_files_only() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join(artifact_name("note")), b"lib").unwrap();
    fs::write(dir.path().join("note.rs"), b"src").unwrap();
    fs::write(dir.path().join("chat.rs"), b"src").unwrap();
    fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
    fs::write(dir.path().join(".hidden.rs"), b"ignored").unwrap();
    fs::write(dir.path().join("note.rs.swp"), b"ignored").unwrap();

    let output = pluma(dir.path())
        .args(["scan", "-o", "json"])
        .arg(dir.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let entries: Value = serde_json::from_slice(&output).expect("valid json");
    let entries = entries.as_array().expect("array");
    let summary: Vec<(String, String)> = entries
        .iter()
        .map(|e| {
            (
                e["plugin"].as_str().unwrap().to_string(),
                e["kind"].as_str().unwrap().to_string(),
            )
        })
        .collect();

    assert_eq!(
        summary,
        vec![
            ("chat".to_string(), "source".to_string()),
            ("note".to_string(), "artifact".to_string()),
            ("note".to_string(), "source".to_string()),
        ]
    );
    assert_eq!(entries[1]["size"], 3);
}

#[test]
fn scan_text_reports_empty_directory() {
    let dir = tempdir().unwrap();
    pluma(dir.path())
        .arg("scan")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(contains("No plugin files found"));
}

#[test]
fn scan_missing_directory_fails() {
    let dir = tempdir().unwrap();
    pluma(dir.path())
        .arg("scan")
        .arg(dir.path().join("absent"))
        .assert()
        .failure()
        .stderr(contains("does not exist"));
}

#[test]
fn config_reads_file_and_fills_defaults() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("host.yaml");
    fs::write(&config, "plugin_dir: /srv/plugins\nhot_reload: false\n").unwrap();

    let output = pluma(dir.path())
        .args(["config", "-o", "json", "--config"])
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["plugin_dir"], "/srv/plugins");
    assert_eq!(json["hot_reload"], false);
    assert_eq!(json["debounce_ms"], 500);
    assert_eq!(json["auto_enable"], true);
}

#[test]
fn config_picks_up_default_file_in_working_directory() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("pluma.toml"), "scan_interval_secs = 30\n").unwrap();

    pluma(dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(contains("scan_interval_secs"))
        .stdout(contains("30"));
}

#[test]
fn config_with_unsupported_format_fails() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("host.ini");
    fs::write(&config, "plugin_dir=/srv\n").unwrap();

    pluma(dir.path())
        .arg("config")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("Unsupported format"));
}

#[test]
fn inspect_rejects_non_library() {
    let dir = tempdir().unwrap();
    let artifact = dir.path().join(artifact_name("note"));
    fs::write(&artifact, b"definitely not a shared object").unwrap();

    pluma(dir.path())
        .arg("inspect")
        .arg(&artifact)
        .assert()
        .failure()
        .stderr(contains("Failed to open plugin artifact"));
}

#[test]
fn inspect_missing_artifact_fails() {
    let dir = tempdir().unwrap();
    pluma(dir.path())
        .arg("inspect")
        .arg(dir.path().join(artifact_name("ghost")))
        .arg("--name")
        .arg("ghost")
        .assert()
        .failure()
        .stderr(contains("does not exist"));
}
