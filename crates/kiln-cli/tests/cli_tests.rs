//! End-to-end tests for the `kiln` binary
//!
//! A shell script stands in for cargo (via `KILN_CARGO`) and writes artifacts
//! where cargo would, so exit codes and the publish directory can be checked
//! for every outcome.
#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

const ALPHA_BETA: &str = r#"
[build]
target = "x86_64-unknown-linux-gnu"

[[unit]]
name = "alpha"
artifact = "alpha.bin"

[[unit]]
name = "beta"
artifact = "beta.bin"
"#;

const BUILD_BOTH: &str = r#"
out="$CARGO_TARGET_DIR/x86_64-unknown-linux-gnu/release"
mkdir -p "$out"
printf 'alpha bytes' > "$out/alpha.bin"
printf 'beta bytes' > "$out/beta.bin"
echo "    Finished release" >&2
"#;

const BUILD_ALPHA_ONLY: &str = r#"
out="$CARGO_TARGET_DIR/x86_64-unknown-linux-gnu/release"
mkdir -p "$out"
printf 'alpha bytes' > "$out/alpha.bin"
"#;

const BUILD_FAILS: &str = r#"
echo 'error[E0308]: mismatched types' >&2
echo 'error: could not compile `beta`' >&2
exit 101
"#;

struct Workspace {
    dir: TempDir,
    cargo: PathBuf,
}

impl Workspace {
    fn new(kiln_toml: &str, script: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("kiln.toml"), kiln_toml).unwrap();
        let cargo = dir.path().join("fake-cargo");
        fs::write(&cargo, format!("#!/bin/sh\n{}\n", script)).unwrap();
        fs::set_permissions(&cargo, fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, cargo }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn res(&self) -> PathBuf {
        self.root().join("res")
    }

    fn kiln(&self) -> Command {
        let mut cmd = Command::cargo_bin("kiln").unwrap();
        cmd.current_dir(self.root())
            .env("KILN_CARGO", &self.cargo)
            .env("NO_COLOR", "1")
            .env_remove("CARGO_TARGET_DIR")
            .env_remove("KILN_TARGET")
            .env_remove("KILN_PROFILE")
            .env_remove("KILN_UNITS")
            .env_remove("KILN_PUBLISH_DIR")
            .env_remove("KILN_JSON")
            .env_remove("KILN_LOG");
        cmd
    }
}

fn read(path: PathBuf) -> String {
    fs::read_to_string(path).unwrap()
}

// ============================================================================
// Build outcomes
// ============================================================================

#[test]
fn test_build_stages_every_unit() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_BOTH);

    ws.kiln()
        .assert()
        .success()
        .stdout(predicate::str::contains("Staged"))
        .stdout(predicate::str::contains("alpha"));

    assert_eq!(read(ws.res().join("alpha.bin")), "alpha bytes");
    assert_eq!(read(ws.res().join("beta.bin")), "beta bytes");
}

#[test]
fn test_build_subcommand_matches_default() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_BOTH);

    ws.kiln().arg("build").arg("-q").assert().success().stdout("");

    assert!(ws.res().join("beta.bin").is_file());
}

#[test]
fn test_toolchain_failure_exits_1_and_keeps_publish_dir() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_FAILS);
    fs::create_dir_all(ws.res()).unwrap();
    fs::write(ws.res().join("alpha.bin"), "previous").unwrap();

    ws.kiln()
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error[E0308]: mismatched types"))
        .stderr(predicate::str::contains("could not compile `beta`"));

    assert_eq!(read(ws.res().join("alpha.bin")), "previous");
    assert!(!ws.res().join("beta.bin").exists());
}

#[test]
fn test_missing_artifact_exits_2_and_names_unit() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_ALPHA_ONLY);

    ws.kiln()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("'beta'"));

    assert!(!ws.res().join("alpha.bin").exists());
}

#[test]
fn test_toolchain_not_found_exits_1() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_BOTH);

    ws.kiln()
        .env("KILN_CARGO", ws.root().join("no-such-cargo"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Toolchain not found"));
}

#[test]
fn test_timeout_exits_1() {
    let ws = Workspace::new(ALPHA_BETA, "exec sleep 30");

    ws.kiln()
        .args(["--timeout", "1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("killed"));
}

// ============================================================================
// Flags and environment
// ============================================================================

#[test]
fn test_publish_dir_flag() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_BOTH);

    ws.kiln()
        .args(["--publish-dir", "modules"])
        .assert()
        .success();

    assert!(ws.root().join("modules/alpha.bin").is_file());
    assert!(!ws.res().exists());
}

#[test]
fn test_units_flag_selects_subset() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_ALPHA_ONLY);

    ws.kiln().args(["--units", "alpha"]).assert().success();

    assert_eq!(read(ws.res().join("alpha.bin")), "alpha bytes");
}

#[test]
fn test_cargo_target_dir_is_honoured() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_BOTH);
    let shared = TempDir::new().unwrap();

    ws.kiln()
        .env("CARGO_TARGET_DIR", shared.path())
        .assert()
        .success();

    assert!(shared
        .path()
        .join("x86_64-unknown-linux-gnu/release/alpha.bin")
        .is_file());
    assert!(!ws.root().join("target").exists());
}

#[test]
fn test_manifest_dir_flag() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_BOTH);
    let elsewhere = TempDir::new().unwrap();

    ws.kiln()
        .current_dir(elsewhere.path())
        .arg("--manifest-dir")
        .arg(ws.root())
        .assert()
        .success();

    assert!(ws.res().join("alpha.bin").is_file());
}

#[test]
fn test_json_success_report() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_BOTH);

    let output = ws.kiln().arg("--json").output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["success"], true);
    assert_eq!(report["target"], "x86_64-unknown-linux-gnu");
    assert_eq!(report["artifacts"][1]["unit"], "beta");
    assert_eq!(report["artifacts"][1]["size"], 10);
}

#[test]
fn test_json_failure_report() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_ALPHA_ONLY);

    let output = ws.kiln().env("KILN_JSON", "1").output().unwrap();
    assert_eq!(output.status.code(), Some(2));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["success"], false);
    assert_eq!(report["stage"], "staging");
    assert_eq!(report["unit"], "beta");
}

// ============================================================================
// Configuration errors
// ============================================================================

#[test]
fn test_no_units_exits_3() {
    let ws = Workspace::new("[build]\nprofile = \"release\"\n", BUILD_BOTH);

    ws.kiln()
        .assert()
        .code(3)
        .stderr(predicate::str::contains("no build units"));
}

#[test]
fn test_invalid_kiln_toml_exits_3() {
    let ws = Workspace::new("[build]\nunknown = true\n", BUILD_BOTH);

    ws.kiln()
        .assert()
        .code(3)
        .stderr(predicate::str::contains("kiln.toml"));
}

#[test]
fn test_usage_error_exits_3() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_BOTH);

    ws.kiln().arg("--no-such-flag").assert().code(3);
}

// ============================================================================
// Other commands
// ============================================================================

#[test]
fn test_units_lists_without_building() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_FAILS);

    ws.kiln()
        .arg("units")
        .assert()
        .success()
        .stdout(predicate::str::contains("alpha"))
        .stdout(predicate::str::contains("x86_64-unknown-linux-gnu/release/beta.bin"));

    assert!(!ws.res().exists());
}

#[test]
fn test_completions_bash() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_BOTH);

    ws.kiln()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("kiln"));
}

#[test]
fn test_help_lists_exit_codes() {
    let ws = Workspace::new(ALPHA_BETA, BUILD_BOTH);

    ws.kiln()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("EXIT CODES"))
        .stdout(predicate::str::contains("CARGO_TARGET_DIR"))
        .stdout(predicate::str::contains("KILN_NO_COLOR"));
}
