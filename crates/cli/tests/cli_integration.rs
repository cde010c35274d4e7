//! CLI integration tests for every subcommand.
//!
//! Uses `assert_cmd` to spawn the `campus` binary inside a temporary
//! directory holding a small school store, so the default store path,
//! job directory and snapshot directory all resolve under it.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const STORE: &str = r#"{
  "schemas": [
    {
      "entity_type": "school.classroom",
      "fields": [{"name": "name", "type": "text", "max_length": 50, "unique": true}]
    },
    {
      "entity_type": "school.student",
      "fields": [
        {"name": "name", "type": "text", "max_length": 100},
        {"name": "admission_number", "type": "text", "max_length": 20, "unique": true},
        {"name": "classroom", "type": "reference", "target": "school.classroom", "nullable": true}
      ]
    },
    {
      "entity_type": "auth.user",
      "fields": [{"name": "username", "type": "text", "unique": true}]
    }
  ],
  "rows": [
    {"model": "school.classroom", "pk": 1, "fields": {"name": "IX-A"}},
    {"model": "school.student", "pk": 1, "fields": {"name": "Asha", "admission_number": "S1", "classroom": 1}},
    {"model": "auth.user", "pk": 1, "fields": {"username": "admin"}}
  ]
}"#;

const S1_SCENARIO: &str = r#"[
  {"model": "school.student", "pk": 7, "fields": {"name": "A", "admission_number": "S7"}},
  {"model": "school.student", "pk": 8, "fields": {"name": "B", "admission_number": "S7"}}
]"#;

/// A temp dir seeded with `campus-store.json`.
fn workspace() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("campus-store.json"), STORE).unwrap();
    tmp
}

/// Helper: create a Command for the `campus` binary, rooted at `dir`.
fn campus(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("campus");
    cmd.current_dir(dir);
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

fn store_rows(dir: &Path, entity_type: &str) -> Vec<Value> {
    let text = fs::read_to_string(dir.join("campus-store.json")).unwrap();
    let store: Value = serde_json::from_str(&text).unwrap();
    store["rows"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["model"] == entity_type)
        .cloned()
        .collect()
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    let tmp = TempDir::new().unwrap();
    campus(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup and restore for campus data"));
}

#[test]
fn version_exits_0() {
    let tmp = TempDir::new().unwrap();
    campus(tmp.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("campus"));
}

#[test]
fn restore_requires_a_source() {
    let tmp = workspace();
    campus(tmp.path()).arg("restore").assert().failure();
}

// ──────────────────────────────────────────────
// 2. Validate
// ──────────────────────────────────────────────

#[test]
fn validate_well_formed_snapshot() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("snap.json"), S1_SCENARIO).unwrap();
    campus(tmp.path())
        .args(["validate", "snap.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid (2 records)"));
}

#[test]
fn validate_rejects_non_array() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("snap.json"), r#"{"model": "school.student"}"#).unwrap();
    campus(tmp.path())
        .args(["validate", "snap.json"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("does not look like a snapshot"));
}

#[test]
fn validate_reports_bad_record_as_json() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("snap.json"),
        r#"[{"model": "school.student", "pk": 1}]"#,
    )
    .unwrap();
    campus(tmp.path())
        .args(["--output", "json", "validate", "snap.json"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("\"error\""))
        .stderr(predicate::str::contains("missing 'fields'"));
}

#[test]
fn validate_quiet_prints_nothing() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("snap.json"), "[]").unwrap();
    campus(tmp.path())
        .args(["--quiet", "validate", "snap.json"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

// ──────────────────────────────────────────────
// 3. Backup
// ──────────────────────────────────────────────

#[test]
fn backup_writes_allow_listed_types() {
    let tmp = workspace();
    let output = campus(tmp.path())
        .args(["--output", "json", "backup", "--out", "backups/full.json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let job = stdout_json(&output);
    assert_eq!(job["status"], "success");
    assert_eq!(job["report"]["total_records"], 2);
    assert!(job["report"]["entity_types"].get("auth.user").is_none());

    let written: Value =
        serde_json::from_str(&fs::read_to_string(tmp.path().join("backups/full.json")).unwrap())
            .unwrap();
    assert_eq!(written.as_array().unwrap().len(), 2);
    assert_eq!(written[0]["model"], "school.classroom");
}

#[test]
fn backup_without_store_fails() {
    let tmp = TempDir::new().unwrap();
    campus(tmp.path())
        .args(["backup", "--out", "b.json"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error reading store"));
}

// ──────────────────────────────────────────────
// 4. Restore
// ──────────────────────────────────────────────

#[test]
fn restore_with_update_applies_last_record() {
    let tmp = workspace();
    fs::write(tmp.path().join("snap.json"), S1_SCENARIO).unwrap();
    let output = campus(tmp.path())
        .args(["--output", "json", "restore", "snap.json", "--duplicates", "update"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let job = stdout_json(&output);
    assert_eq!(job["report"]["total"]["inserted"], 1);
    assert_eq!(job["report"]["total"]["updated"], 1);

    let students = store_rows(tmp.path(), "school.student");
    let s7: Vec<&Value> = students
        .iter()
        .filter(|r| r["fields"]["admission_number"] == "S7")
        .collect();
    assert_eq!(s7.len(), 1);
    assert_eq!(s7[0]["fields"]["name"], "B");
}

#[test]
fn restore_text_summary_lists_counts() {
    let tmp = workspace();
    fs::write(tmp.path().join("snap.json"), S1_SCENARIO).unwrap();
    campus(tmp.path())
        .args(["restore", "snap.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("school.student"))
        .stdout(predicate::str::contains("total"));
    assert_eq!(store_rows(tmp.path(), "school.student").len(), 2);
}

#[test]
fn restore_dry_run_leaves_store_untouched() {
    let tmp = workspace();
    fs::write(tmp.path().join("snap.json"), S1_SCENARIO).unwrap();
    let before = fs::read_to_string(tmp.path().join("campus-store.json")).unwrap();
    let output = campus(tmp.path())
        .args(["--output", "json", "restore", "snap.json", "--dry-run"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let job = stdout_json(&output);
    assert_eq!(job["dry_run"], true);
    assert_eq!(job["report"]["preview"], true);
    assert_eq!(job["report"]["total"]["inserted"], 1);
    assert_eq!(job["report"]["total"]["skipped"], 1);
    let after = fs::read_to_string(tmp.path().join("campus-store.json")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn replace_keeps_protected_users() {
    let tmp = workspace();
    fs::write(tmp.path().join("snap.json"), S1_SCENARIO).unwrap();
    campus(tmp.path())
        .args(["restore", "snap.json", "--mode", "replace"])
        .assert()
        .success();
    assert_eq!(store_rows(tmp.path(), "auth.user").len(), 1);
    let students = store_rows(tmp.path(), "school.student");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["pk"], 7);
}

#[test]
fn restore_missing_file_fails_job() {
    let tmp = workspace();
    campus(tmp.path())
        .args(["restore", "nonexistent_snapshot.json"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed"));
}

#[test]
fn restore_from_backup_round_trips() {
    let tmp = workspace();
    let output = campus(tmp.path())
        .args(["--output", "json", "backup", "--out", "b.json"])
        .output()
        .unwrap();
    let backup_id = stdout_json(&output)["id"].as_str().unwrap().to_string();

    let output = campus(tmp.path())
        .args(["--output", "json", "restore", "--backup", &backup_id])
        .output()
        .unwrap();
    assert!(output.status.success());
    let job = stdout_json(&output);
    assert_eq!(job["report"]["total"]["inserted"], 0);
    assert_eq!(job["report"]["total"]["updated"], 2);
    assert_eq!(job["report"]["total"]["conflicts"], 0);
}

#[test]
fn restore_from_tampered_backup_fails() {
    let tmp = workspace();
    let output = campus(tmp.path())
        .args(["--output", "json", "backup", "--out", "b.json"])
        .output()
        .unwrap();
    let backup_id = stdout_json(&output)["id"].as_str().unwrap().to_string();
    fs::write(tmp.path().join("b.json"), "[]").unwrap();

    campus(tmp.path())
        .args(["restore", "--backup", &backup_id])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("checksum mismatch"));
}

// ──────────────────────────────────────────────
// 5. Jobs and cleanup
// ──────────────────────────────────────────────

#[test]
fn jobs_lists_and_shows_records() {
    let tmp = workspace();
    let output = campus(tmp.path())
        .args(["--output", "json", "backup", "--out", "b.json"])
        .output()
        .unwrap();
    let backup_id = stdout_json(&output)["id"].as_str().unwrap().to_string();

    campus(tmp.path())
        .arg("jobs")
        .assert()
        .success()
        .stdout(predicate::str::contains(backup_id.as_str()))
        .stdout(predicate::str::contains("backup"));

    let output = campus(tmp.path())
        .args(["--output", "json", "jobs", &backup_id])
        .output()
        .unwrap();
    let job = stdout_json(&output);
    assert_eq!(job["kind"], "backup");
    assert_eq!(job["id"], backup_id.as_str());
}

#[test]
fn jobs_unknown_id_fails() {
    let tmp = TempDir::new().unwrap();
    campus(tmp.path())
        .args(["jobs", "no-such-job"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn cleanup_keeps_recent_jobs() {
    let tmp = workspace();
    campus(tmp.path())
        .args(["backup", "--out", "b.json"])
        .assert()
        .success();
    let output = campus(tmp.path())
        .args(["--output", "json", "cleanup", "--older-than-days", "30"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let summary = stdout_json(&output);
    assert_eq!(summary["files_removed"], 0);
    assert_eq!(summary["records_removed"], 0);
    assert!(tmp.path().join("b.json").exists());
}

#[test]
fn cleanup_with_largest_age_removes_nothing() {
    let tmp = workspace();
    campus(tmp.path())
        .args(["backup", "--out", "b.json"])
        .assert()
        .success();
    let output = campus(tmp.path())
        .args(["--output", "json", "cleanup", "--older-than-days", "4294967295"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["records_removed"], 0);
    assert!(tmp.path().join("b.json").exists());
}

#[test]
fn cleanup_works_without_store() {
    let tmp = TempDir::new().unwrap();
    campus(tmp.path())
        .args(["cleanup", "--older-than-days", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 0 files and 0 job records"));
}
