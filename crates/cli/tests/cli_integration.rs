//! CLI integration tests for all subcommands.
//!
//! Uses `assert_cmd` to spawn the `blueprint` binary and verify
//! exit codes, stdout content, and stderr content.
//!
//! All tests set `current_dir` to the workspace root so that relative
//! paths to the blueprint fixtures resolve correctly.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const PURCHASE_ORDER: &str = "fixtures/purchase_order.json";
const SUPPORT_TICKET: &str = "fixtures/support_ticket.json";
const INVALID: &str = "fixtures/invalid.json";

/// Locate the workspace root by walking up from CARGO_MANIFEST_DIR.
fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    // crates/cli -> workspace root is two levels up
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

/// Helper: create a Command for the `blueprint` binary, rooted at workspace.
fn blueprint() -> Command {
    let mut cmd = cargo_bin_cmd!("blueprint");
    cmd.current_dir(workspace_root());
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write(dir: &TempDir, name: &str, contents: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "command failed: {:?}", output);
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    blueprint()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Blueprint workflow engine toolchain"));
}

#[test]
fn version_exits_0() {
    blueprint()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("blueprint"));
}

#[test]
fn run_requires_a_blueprint() {
    blueprint().arg("run").assert().failure().code(2);
}

// ──────────────────────────────────────────────
// 2. Check subcommand
// ──────────────────────────────────────────────

#[test]
fn check_clean_blueprint_exits_0() {
    blueprint()
        .args(["check", PURCHASE_ORDER])
        .assert()
        .success()
        .stdout(predicate::str::contains("Blueprint Analysis: Purchase order"))
        .stdout(predicate::str::contains("Reachability: all 4 states reachable"));
}

#[test]
fn check_warnings_exit_1() {
    blueprint()
        .args(["check", SUPPORT_TICKET])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("[s2/WARNING] [Merged]"))
        .stdout(predicate::str::contains("leaves terminal state 'Closed'"));
}

#[test]
fn check_json_output() {
    let output = blueprint()
        .args(["check", SUPPORT_TICKET, "--output", "json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["blueprint_id"], 2);
    assert_eq!(report["analyses_run"].as_array().unwrap().len(), 4);
    assert!(!report["findings"].as_array().unwrap().is_empty());
}

#[test]
fn check_selected_analysis() {
    let report = stdout_json(blueprint().args([
        "check",
        SUPPORT_TICKET,
        "--analysis",
        "s1",
        "--output",
        "json",
    ]));
    assert_eq!(report["analyses_run"], serde_json::json!(["s1"]));
    assert!(report["s2_reachability"].is_null());
}

#[test]
fn check_invalid_analysis_exits_1() {
    blueprint()
        .args(["check", PURCHASE_ORDER, "--analysis", "s9"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid analysis 's9'"));
}

#[test]
fn check_invalid_blueprint_exits_1() {
    blueprint()
        .args(["check", INVALID])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unknown state 9"));
}

#[test]
fn check_missing_file_exits_1() {
    blueprint()
        .args(["check", "fixtures/nope.json"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error reading file"));
}

#[test]
fn check_malformed_json_exits_1_json_error() {
    let tmp = TempDir::new().unwrap();
    let path = write(&tmp, "bad.json", "{ not json");
    blueprint()
        .args(["check", &path, "--output", "json"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("\"error\""));
}

#[test]
fn check_quiet_suppresses_output() {
    blueprint()
        .args(["check", INVALID, "--quiet"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_empty());
}

// ──────────────────────────────────────────────
// 3. Transitions subcommand
// ──────────────────────────────────────────────

#[test]
fn transitions_seeded_from_field_value() {
    let tmp = TempDir::new().unwrap();
    let data = write(&tmp, "record.json", r#"{"status": "submitted", "amount": 100}"#);
    let out = stdout_json(blueprint().args([
        "transitions",
        PURCHASE_ORDER,
        "--data",
        &data,
        "--output",
        "json",
    ]));
    assert_eq!(out["state_name"], "Submitted");
    let ids: Vec<i64> = out["transitions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 3, 4]);
    assert_eq!(out["transitions"][0]["requires_approval"], true);
}

#[test]
fn transitions_guard_filters() {
    let tmp = TempDir::new().unwrap();
    let zero = write(&tmp, "zero.json", r#"{"amount": 0}"#);
    let big = write(&tmp, "big.json", r#"{"amount": 250}"#);

    blueprint()
        .args(["transitions", PURCHASE_ORDER, "--state", "1", "--data", &zero])
        .assert()
        .success()
        .stdout(predicate::str::contains("No transitions available."));

    blueprint()
        .args(["transitions", PURCHASE_ORDER, "--state", "1", "--data", &big])
        .assert()
        .success()
        .stdout(predicate::str::contains("Submit -> Submitted  [2 requirement(s)]"));
}

#[test]
fn transitions_unknown_state_exits_1() {
    blueprint()
        .args(["transitions", PURCHASE_ORDER, "--state", "42"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("state 42 not found"));
}

#[test]
fn transitions_data_must_be_object() {
    let tmp = TempDir::new().unwrap();
    let data = write(&tmp, "list.json", "[1, 2]");
    blueprint()
        .args(["transitions", PURCHASE_ORDER, "--data", &data])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("must be a JSON object"));
}

// ──────────────────────────────────────────────
// 4. SLA subcommand
// ──────────────────────────────────────────────

#[test]
fn sla_business_hours_due_time() {
    // Monday 09:00 + 16 business hours = Tuesday 17:00.
    let out = stdout_json(blueprint().args([
        "sla",
        PURCHASE_ORDER,
        "--state",
        "2",
        "--entered-at",
        "2025-01-06T09:00:00Z",
        "--now",
        "2025-01-06T17:00:00Z",
        "--output",
        "json",
    ]));
    assert_eq!(out["due_at"], "2025-01-07T17:00:00Z");
    assert_eq!(out["elapsed_seconds"], 8 * 3600);
    assert_eq!(out["remaining_seconds"], 24 * 3600);
    assert_eq!(out["is_breached"], false);
    assert_eq!(out["escalations"][0]["triggered"], false);
}

#[test]
fn sla_approaching_text() {
    blueprint()
        .args([
            "sla",
            PURCHASE_ORDER,
            "--state",
            "2",
            "--entered-at",
            "2025-01-06T09:00:00Z",
            "--now",
            "2025-01-07T15:00:00Z",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Status:    approaching"))
        .stdout(predicate::str::contains("[x] approaching 75% -> notify_user"))
        .stdout(predicate::str::contains("[ ] breached -> send_email"));
}

#[test]
fn sla_breached_over_weekend() {
    // Friday 16:00 entry: 1h Friday, 8h Monday, 7h Tuesday.
    blueprint()
        .args([
            "sla",
            PURCHASE_ORDER,
            "--state",
            "2",
            "--entered-at",
            "2025-01-10T16:00:00Z",
            "--now",
            "2025-01-15T12:00:00Z",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Due:       2025-01-14T16:00:00Z"))
        .stdout(predicate::str::contains("Status:    BREACHED"));
}

#[test]
fn sla_config_shifts_calendar() {
    let tmp = TempDir::new().unwrap();
    let config = write(
        &tmp,
        "engine.toml",
        "[engine]\nbusiness_day_start = \"08:00\"\nbusiness_day_end = \"16:00\"\n",
    );
    let out = stdout_json(blueprint().args([
        "sla",
        PURCHASE_ORDER,
        "--state",
        "2",
        "--entered-at",
        "2025-01-06T08:00:00Z",
        "--now",
        "2025-01-06T08:00:00Z",
        "--config",
        &config,
        "--output",
        "json",
    ]));
    assert_eq!(out["due_at"], "2025-01-07T16:00:00Z");
}

#[test]
fn sla_state_without_sla_exits_1() {
    blueprint()
        .args([
            "sla",
            PURCHASE_ORDER,
            "--state",
            "1",
            "--entered-at",
            "2025-01-06T09:00:00Z",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("has no active SLA"));
}

#[test]
fn sla_bad_timestamp_exits_1() {
    blueprint()
        .args([
            "sla",
            PURCHASE_ORDER,
            "--state",
            "2",
            "--entered-at",
            "yesterday",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not RFC 3339"));
}

#[test]
fn sla_bad_config_exits_1() {
    let tmp = TempDir::new().unwrap();
    let config = write(&tmp, "engine.toml", "[engine]\nutc_offset = \"east\"\n");
    blueprint()
        .args([
            "sla",
            PURCHASE_ORDER,
            "--state",
            "2",
            "--entered-at",
            "2025-01-06T09:00:00Z",
            "--config",
            &config,
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("could not parse"));
}

// ──────────────────────────────────────────────
// 5. Run subcommand (startup failures only)
// ──────────────────────────────────────────────

#[test]
fn run_invalid_blueprint_exits_1() {
    blueprint()
        .args(["run", INVALID])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid blueprint"));
}

#[test]
fn run_zero_tick_interval_exits_1() {
    let tmp = TempDir::new().unwrap();
    let config = write(&tmp, "engine.toml", "[engine]\ntick_interval_secs = 0\n");
    blueprint()
        .args(["run", PURCHASE_ORDER, "--config", &config])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("tick_interval_secs"));
}

#[test]
fn run_record_for_unknown_blueprint_exits_1() {
    let tmp = TempDir::new().unwrap();
    let records = write(
        &tmp,
        "records.json",
        r#"[{"blueprint_id": 99, "record_id": 1, "data": {}}]"#,
    );
    blueprint()
        .args(["run", PURCHASE_ORDER, "--records", &records])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("record 1"));
}

#[test]
fn run_malformed_records_file_exits_1() {
    let tmp = TempDir::new().unwrap();
    let records = write(&tmp, "records.json", r#"[{"record_id": 1}]"#);
    blueprint()
        .args(["run", PURCHASE_ORDER, "--records", &records])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid records file"));
}
