//! CLI surface: validation, dry runs, and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn decker_cmd() -> Command {
    Command::cargo_bin("decker").expect("decker binary not found")
}

const PRODUCTION_CONFIG: &str = r#"
name: shop
target: production
compute:
  provider: hetzner
  location: nbg1
  image: ubuntu-24.04
  server:
    type: cpx21
databases:
  postgres:
    username: app
    database: app
services:
  redis:
    image: redis:7
    port: 6379
"#;

const SANDBOX_CONFIG: &str = r#"
name: shop
target: sandbox
compute:
  provider: hetzner
  location: nbg1
  image: ubuntu-24.04
  server:
    type: cpx21
services:
  redis:
    image: redis:7
    port: 6379
"#;

#[test]
fn test_config_validate_accepts_valid_config() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("decker.yml"), PRODUCTION_CONFIG).unwrap();

    decker_cmd()
        .current_dir(dir.path())
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));
}

#[test]
fn test_config_validate_rejects_missing_file() {
    let dir = TempDir::new().unwrap();

    decker_cmd()
        .current_dir(dir.path())
        .args(["config", "validate"])
        .assert()
        .failure();
}

#[test]
fn test_config_validate_reports_semantic_error() {
    let dir = TempDir::new().unwrap();
    let broken = r#"
name: shop
compute:
  provider: hetzner
  location: nbg1
  image: ubuntu-24.04
  server:
    type: cpx21
app:
  processes:
    web:
      command: bin/server
      port: 3000
      subdomain: www
"#;
    fs::write(dir.path().join("decker.yml"), broken).unwrap();

    decker_cmd()
        .current_dir(dir.path())
        .args(["config", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cloudflare"));
}

#[test]
fn test_deploy_dry_run_renders_manifests() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("decker.yml"), PRODUCTION_CONFIG).unwrap();

    decker_cmd()
        .current_dir(dir.path())
        .args(["deploy", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("kind: StatefulSet"))
        .stdout(predicate::str::contains("shop-postgres"))
        .stdout(predicate::str::contains("shop-redis"));
}

#[test]
fn test_deploy_dry_run_sandbox_renders_compose() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("decker.yml"), SANDBOX_CONFIG).unwrap();

    decker_cmd()
        .current_dir(dir.path())
        .args(["deploy", "--dry-run", "--slug", "a1b2c3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("services:"))
        .stdout(predicate::str::contains("redis"));
}

#[test]
fn test_deploy_dry_run_rejects_bad_slug() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("decker.yml"), SANDBOX_CONFIG).unwrap();

    decker_cmd()
        .current_dir(dir.path())
        .args(["deploy", "--dry-run", "--slug", "NOT-A-SLUG"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("slug"));
}

#[test]
fn test_deploy_without_config_fails() {
    let dir = TempDir::new().unwrap();

    decker_cmd()
        .current_dir(dir.path())
        .args(["deploy", "--dry-run"])
        .assert()
        .failure();
}

#[test]
fn test_custom_file_flag() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("custom.yml"), PRODUCTION_CONFIG).unwrap();

    decker_cmd()
        .current_dir(dir.path())
        .args(["deploy", "--dry-run", "--file", "custom.yml"])
        .assert()
        .success();
}
