//! End-to-end tests for the `reactor` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};

fn reactor() -> Command {
    Command::cargo_bin("reactor").expect("binary should build")
}

fn script(commands: &[Value]) -> String {
    commands
        .iter()
        .map(|c| format!("{c}\n"))
        .collect::<String>()
}

fn messages(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each stdout line is JSON"))
        .collect()
}

fn stdout_texts(messages: &[Value], cell: &str) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m["op"] == "stdout" && m["data"]["cell_id"] == cell)
        .filter_map(|m| m["data"]["text"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn test_help() {
    reactor()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Reactive notebook execution kernel"));
}

#[test]
fn test_rerun_dependent_cell() {
    let input = script(&[
        json!({"type": "run", "cell_id": "c1", "code": "x = 1"}),
        json!({"type": "run", "cell_id": "c2", "code": "print(x)"}),
        json!({"type": "run", "cell_id": "c1", "code": "x = 2"}),
        json!({"type": "shutdown"}),
    ]);

    let output = reactor().write_stdin(input).output().unwrap();
    assert!(output.status.success());

    let messages = messages(&output.stdout);
    assert_eq!(stdout_texts(&messages, "c2"), vec!["1\n", "2\n"]);
    let completed = messages.iter().filter(|m| m["op"] == "completed-run").count();
    assert_eq!(completed, 3);
}

#[test]
fn test_error_skips_dependents() {
    let input = script(&[
        json!({"type": "run_batch", "cells": [
            {"cell_id": "c1", "code": "x = 1\nraise(\"boom\")"},
            {"cell_id": "c2", "code": "print(x)"}
        ]}),
    ]);

    let output = reactor().write_stdin(input).output().unwrap();
    assert!(output.status.success());

    let messages = messages(&output.stdout);
    let error = messages
        .iter()
        .find(|m| m["op"] == "error")
        .expect("an error message");
    assert_eq!(error["data"]["cell_id"], "c1");
    assert_eq!(error["data"]["kind"], "runtime_error");
    assert_eq!(error["data"]["message"], "boom");

    let skipped = messages.iter().any(|m| {
        m["op"] == "cell-status"
            && m["data"]["cell_id"] == "c2"
            && m["data"]["status"] == "stale"
            && m["data"]["kind"] == "skipped_due_to_ancestor_failure"
    });
    assert!(skipped);
}

#[test]
fn test_malformed_lines_are_ignored() {
    let input = format!(
        "not json\n{}\n",
        json!({"type": "run", "cell_id": "a", "code": "print(\"alive\")"})
    );

    reactor()
        .write_stdin(input)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""text":"alive\n""#))
        .stderr(predicate::str::contains("malformed"));
}

#[test]
fn test_lazy_mode_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("kernel.json");
    std::fs::write(&config, r#"{"mode": "lazy"}"#).unwrap();

    let input = script(&[
        json!({"type": "run", "cell_id": "a", "code": "x = 1"}),
        json!({"type": "run", "cell_id": "b", "code": "print(x)"}),
        json!({"type": "run", "cell_id": "a", "code": "x = 2"}),
        json!({"type": "run_stale"}),
    ]);

    let output = reactor()
        .arg("--config")
        .arg(&config)
        .write_stdin(input)
        .output()
        .unwrap();
    assert!(output.status.success());

    let messages = messages(&output.stdout);
    let stale = messages.iter().any(|m| {
        m["op"] == "cell-status" && m["data"]["cell_id"] == "b" && m["data"]["status"] == "stale"
    });
    assert!(stale);
    assert_eq!(stdout_texts(&messages, "b"), vec!["1\n", "2\n"]);
}

#[test]
fn test_config_command_is_announced() {
    let input = script(&[json!({"type": "config", "mode": "lazy", "auto_rerun_stale": true})]);

    let output = reactor().write_stdin(input).output().unwrap();
    let messages = messages(&output.stdout);
    let changed = messages
        .iter()
        .find(|m| m["op"] == "config-changed")
        .expect("config-changed message");
    assert_eq!(changed["data"]["config"]["mode"], "lazy");
    assert_eq!(changed["data"]["config"]["auto_rerun_stale"], true);
}
