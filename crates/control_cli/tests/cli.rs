use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use std::path::PathBuf;

struct TempVault {
    dir: PathBuf,
}

impl TempVault {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("phi_cli_test_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        Self { dir }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("phi-control").unwrap();
        cmd.env("PHI_PASSPHRASE", "correct horse battery staple")
            .arg("--vault")
            .arg(self.dir.join("vault.sqlite3"))
            .arg("--audit-log")
            .arg(self.dir.join("vault.audit.jsonl"))
            .arg("--config")
            .arg(self.dir.join("phi-control.toml"));
        cmd
    }
}

impl Drop for TempVault {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

#[test]
fn unlock_reports_success() {
    let vault = TempVault::new("unlock");
    vault.cmd().arg("unlock").assert().success().stdout(contains("unlocked"));
}

#[test]
fn redact_strips_ssn_from_output() {
    let vault = TempVault::new("redact");
    vault
        .cmd()
        .arg("redact")
        .arg("--text")
        .arg("Patient John Smith, SSN 123-45-6789, was seen today.")
        .assert()
        .success()
        .stdout(contains("redacted"))
        .stdout(contains("123-45-6789").not());
}

#[test]
fn restore_without_passphrase_fails_with_usage_error() {
    let vault = TempVault::new("restore_no_pass");
    let mut cmd = Command::cargo_bin("phi-control").unwrap();
    cmd.arg("--vault")
        .arg(vault.dir.join("vault.sqlite3"))
        .arg("--audit-log")
        .arg(vault.dir.join("vault.audit.jsonl"))
        .arg("--config")
        .arg(vault.dir.join("phi-control.toml"))
        .arg("restore")
        .arg("--text")
        .arg("[NAME_1] called");
    cmd.assert().failure().code(2).stderr(contains("USAGE_ERROR"));
}

#[test]
fn verify_audit_is_valid_after_unlock_and_redact() {
    let vault = TempVault::new("verify_audit");
    vault.cmd().arg("unlock").assert().success();
    vault
        .cmd()
        .arg("redact")
        .arg("--text")
        .arg("Jane Doe's MRN is 123456.")
        .assert()
        .success();
    vault.cmd().arg("verify-audit").assert().success().stdout(contains("\"valid\":true"));
}

#[test]
fn list_tokens_is_empty_json_array_for_fresh_vault() {
    let vault = TempVault::new("list_tokens");
    vault.cmd().arg("unlock").assert().success();
    vault.cmd().arg("list-tokens").assert().success().stdout(contains("[]"));
}
