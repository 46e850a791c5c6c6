//! Integration tests for offline rendering of saved conversation files.

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::{TempDir, tempdir};

const EXPECTED: &str = include_str!("fixtures/conversation.expected.md");

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/conversation.json")
}

/// Creates a temp GPTMD_HOME directory for test isolation.
fn temp_gptmd_home() -> TempDir {
    TempDir::new().expect("create temp gptmd home")
}

#[test]
fn test_render_to_stdout_matches_expected_markdown() {
    let home = temp_gptmd_home();

    cargo_bin_cmd!("gptmd")
        .env("GPTMD_HOME", home.path())
        .env_remove("RUST_LOG")
        .args(["render", fixture().to_str().unwrap(), "--stdout", "--utc"])
        .assert()
        .success()
        .stdout(predicate::eq(EXPECTED));
}

#[test]
fn test_render_all_roles_includes_system() {
    let home = temp_gptmd_home();

    cargo_bin_cmd!("gptmd")
        .env("GPTMD_HOME", home.path())
        .args([
            "render",
            fixture().to_str().unwrap(),
            "--stdout",
            "--utc",
            "--all-roles",
            "--quote-other-roles",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "### (SYSTEM)\n> You are a helpful travel planner.",
        ));
}

#[test]
fn test_render_timestamps_flag() {
    let home = temp_gptmd_home();

    cargo_bin_cmd!("gptmd")
        .env("GPTMD_HOME", home.path())
        .args([
            "render",
            fixture().to_str().unwrap(),
            "--stdout",
            "--utc",
            "--timestamps",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "### USER\n(2024-04-05 19:34:40)\n\n```",
        ));
}

#[test]
fn test_render_writes_markdown_file() {
    let home = temp_gptmd_home();
    let out = tempdir().unwrap();

    cargo_bin_cmd!("gptmd")
        .env("GPTMD_HOME", home.path())
        .args([
            "render",
            fixture().to_str().unwrap(),
            "--utc",
            "--out",
            out.path().to_str().unwrap(),
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("with 0 image(s)"));

    let md = out.path().join("chatgpt_20240405193438_Paris trip.md");
    assert_eq!(fs::read_to_string(md).unwrap(), EXPECTED);
    // The offline render never produces image files.
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 1);
}

#[test]
fn test_render_uses_config_prefix_and_output_dir() {
    let home = temp_gptmd_home();
    let out = tempdir().unwrap();
    fs::write(
        home.path().join("config.toml"),
        format!(
            "filename_prefix = \"gpt\"\noutput_dir = {:?}\n[export]\ntimezone = \"utc\"\n",
            out.path().to_str().unwrap()
        ),
    )
    .unwrap();

    cargo_bin_cmd!("gptmd")
        .env("GPTMD_HOME", home.path())
        .args(["render", fixture().to_str().unwrap()])
        .assert()
        .success();

    assert!(out.path().join("gpt_20240405193438_Paris trip.md").exists());
}

#[test]
fn test_render_without_mapping_fails() {
    let home = temp_gptmd_home();
    let dir = tempdir().unwrap();
    let file = dir.path().join("empty.json");
    fs::write(&file, r#"{"title": "No mapping"}"#).unwrap();

    cargo_bin_cmd!("gptmd")
        .env("GPTMD_HOME", home.path())
        .args(["render", file.to_str().unwrap(), "--stdout"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no message mapping"));
}

#[test]
fn test_render_invalid_json_fails() {
    let home = temp_gptmd_home();
    let dir = tempdir().unwrap();
    let file = dir.path().join("broken.json");
    fs::write(&file, "{ not json").unwrap();

    cargo_bin_cmd!("gptmd")
        .env("GPTMD_HOME", home.path())
        .args(["render", file.to_str().unwrap(), "--stdout"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parse conversation"));
}
