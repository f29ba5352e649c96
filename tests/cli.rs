// ABOUTME: Integration tests for the cnab-oci command line.
// ABOUTME: Validates --help output and fixup failures that happen before any registry traffic.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn cnab_oci_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cnab-oci"));
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

fn write_bundle(dir: &Path, json: &str) -> String {
    let path = dir.join("bundle.json");
    fs::write(&path, json).unwrap();
    path.display().to_string()
}

#[test]
fn help_shows_commands() {
    let dir = tempfile::tempdir().unwrap();
    cnab_oci_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("fixup"));
}

#[test]
fn fixup_help_lists_its_flags() {
    let dir = tempfile::tempdir().unwrap();
    cnab_oci_cmd(dir.path())
        .args(["fixup", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--target"))
        .stdout(predicate::str::contains("--insecure-registries"))
        .stdout(predicate::str::contains("--auto-update-bundle"));
}

#[test]
fn fixup_requires_a_target() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = write_bundle(dir.path(), r#"{"name":"app"}"#);
    cnab_oci_cmd(dir.path())
        .args(["fixup", &bundle])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--target"));
}

#[test]
fn invalid_target_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = write_bundle(dir.path(), r#"{"name":"app"}"#);
    cnab_oci_cmd(dir.path())
        .args(["fixup", &bundle, "--target", "Not A Ref"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid target reference"));
}

#[test]
fn missing_bundle_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    cnab_oci_cmd(dir.path())
        .args(["fixup", "missing.json", "--target", "localhost:5000/app"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.json"));
}

#[test]
fn invalid_platform_flag_fails() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = write_bundle(dir.path(), r#"{"name":"app"}"#);
    cnab_oci_cmd(dir.path())
        .args([
            "fixup",
            &bundle,
            "--target",
            "localhost:5000/app",
            "--invocation-platforms",
            "linux/amd64/v1/extra",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid platform"));
}

#[test]
fn two_invocation_images_fail_without_contacting_the_registry() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = write_bundle(
        dir.path(),
        r#"{
  "name": "app",
  "invocationImages": [
    {"image": "localhost:5000/app-installer:v1", "imageType": "docker"},
    {"image": "localhost:5000/app-installer:v2", "imageType": "docker"}
  ]
}"#,
    );
    let output = dir.path().join("fixed.json");
    cnab_oci_cmd(dir.path())
        .args([
            "fixup",
            &bundle,
            "--target",
            "localhost:5000/app:v1",
            "--output",
            &output.display().to_string(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("only one invocation image supported"));
    assert!(!output.exists());
}

#[test]
fn malformed_settings_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = write_bundle(dir.path(), r#"{"name":"app"}"#);
    fs::write(
        dir.path().join("cnab-oci.yml"),
        "concurrency:\n  max_concurrent_jobs: 0\n",
    )
    .unwrap();
    cnab_oci_cmd(dir.path())
        .args(["fixup", &bundle, "--target", "localhost:5000/app"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_concurrent_jobs"));
}

#[test]
fn json_output_mode_reports_errors_as_json() {
    let dir = tempfile::tempdir().unwrap();
    cnab_oci_cmd(dir.path())
        .args([
            "--output-mode",
            "json",
            "fixup",
            "missing.json",
            "--target",
            "localhost:5000/app",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"error\""));
}
