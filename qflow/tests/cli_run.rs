//! CLI tests for `qflow check` and `qflow run`.
//!
//! Spawns the qflow binary with shell-script collaborators and verifies exit
//! codes and run logs.
#![cfg(unix)]

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use qflow::exit_codes;
use qflow::io::config::{CommandConfig, PipelineConfig, write_config};

const TWO_NODES: &str = r#"[
  {"index": 0, "source": "let t = KubeEvents | where Reason == 'BackOff';"},
  {"index": 1, "source": "t | summarize count() by Namespace", "depends_on": [0]}
]"#;

const ONE_NODE: &str = r#"[{"index": 0, "source": "KubeEvents | count"}]"#;

fn sh(script: &str) -> CommandConfig {
    CommandConfig::new(["sh", "-c", script])
}

fn write_setup(dir: &Path, validator: &str, nodes: &str) {
    let cfg = PipelineConfig {
        validation_max_iterations: 1,
        human_gate_max_iterations: 1,
        translator: sh("cat >/dev/null; echo 'count(kube_events_total)'"),
        validator: sh(validator),
        ..PipelineConfig::default()
    };
    write_config(&dir.join("qflow.toml"), &cfg).expect("write config");
    fs::write(dir.join("nodes.json"), nodes).expect("write nodes");
}

fn run_with_stdin(dir: &Path, stdin: &str) -> Option<i32> {
    let mut child = Command::new(env!("CARGO_BIN_EXE_qflow"))
        .current_dir(dir)
        .args(["run", "--nodes", "nodes.json", "--session", "s1"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn qflow run");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(stdin.as_bytes())
        .expect("write stdin");
    child.wait().expect("wait qflow run").code()
}

#[test]
fn check_rejects_forward_dependency() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("nodes.json"),
        r#"[{"index":0,"source":"A","depends_on":[1]},{"index":1,"source":"B"}]"#,
    )
    .expect("write nodes");

    let status = Command::new(env!("CARGO_BIN_EXE_qflow"))
        .current_dir(temp.path())
        .args(["check", "--nodes", "nodes.json"])
        .status()
        .expect("qflow check");

    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn validated_run_exits_ok_and_writes_logs() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_setup(temp.path(), "cat >/dev/null; echo 1 series", TWO_NODES);

    assert_eq!(run_with_stdin(temp.path(), ""), Some(exit_codes::OK));

    let summary: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(temp.path().join(".qflow/runs/s1/summary.json")).expect("summary"),
    )
    .expect("summary json");
    assert_eq!(summary["fully_verified"], true);
    assert_eq!(summary["nodes"][1]["resolution"], "validated");
    let events =
        fs::read_to_string(temp.path().join(".qflow/runs/s1/events.jsonl")).expect("events");
    assert_eq!(events.lines().count(), 8);
}

#[test]
fn confirmed_reply_on_stdin_completes_the_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_setup(
        temp.path(),
        "cat >/dev/null; echo 'unknown metric' >&2; exit 1",
        ONE_NODE,
    );

    assert_eq!(
        run_with_stdin(temp.path(), "#HITL confirmed\n"),
        Some(exit_codes::OK)
    );
}

#[test]
fn rejected_replacement_exits_unverified() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_setup(
        temp.path(),
        "cat >/dev/null; echo 'parse error' >&2; exit 1",
        ONE_NODE,
    );

    assert_eq!(
        run_with_stdin(temp.path(), "#HITL bad(\n"),
        Some(exit_codes::UNVERIFIED)
    );
}

#[test]
fn each_stdin_line_answers_one_review() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_setup(
        temp.path(),
        "cat >/dev/null; echo 'unknown metric' >&2; exit 1",
        TWO_NODES,
    );

    assert_eq!(
        run_with_stdin(temp.path(), "confirmed\nconfirmed\n"),
        Some(exit_codes::OK)
    );

    let summary: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(temp.path().join(".qflow/runs/s1/summary.json")).expect("summary"),
    )
    .expect("summary json");
    assert_eq!(summary["nodes"][0]["resolution"], "human_confirmed");
    assert_eq!(summary["nodes"][1]["resolution"], "human_confirmed");
}

#[test]
fn stdin_replies_reach_reviews_in_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_setup(
        temp.path(),
        "cat >/dev/null; echo 'parse error' >&2; exit 1",
        TWO_NODES,
    );

    assert_eq!(
        run_with_stdin(temp.path(), "#HITL bad(\n#HITL confirmed\n"),
        Some(exit_codes::UNVERIFIED)
    );

    let summary: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(temp.path().join(".qflow/runs/s1/summary.json")).expect("summary"),
    )
    .expect("summary json");
    assert_eq!(summary["nodes"][0]["resolution"], "unverified");
    assert_eq!(summary["nodes"][0]["translation"], "bad(");
    assert_eq!(summary["nodes"][1]["resolution"], "human_confirmed");
}
