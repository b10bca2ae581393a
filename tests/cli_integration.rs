// CLI-level smoke tests for the dump command.
use std::process::Command;

use serde_json::{Value, json};
use uuid::Uuid;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_tabstat");
    Command::new(exe)
}

fn write_stats(dir: &std::path::Path, id: Uuid) {
    let doc = json!({
        "stats": {
            "minecraft:custom": {
                "minecraft:play_time": 2_400_000u64,
                "minecraft:deaths": 7
            }
        }
    });
    std::fs::write(dir.join(format!("{id}.json")), doc.to_string()).expect("write stats");
}

#[test]
fn dump_json_emits_parsed_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let id = Uuid::new_v4();
    write_stats(dir.path(), id);

    let output = cmd()
        .args(["dump", "--stats-dir", dir.path().to_str().unwrap(), "--json"])
        .output()
        .expect("run dump");
    assert!(output.status.success());

    let parsed: Value = serde_json::from_slice(&output.stdout).expect("json stdout");
    let record = parsed.get(id.to_string()).expect("entity present");
    assert_eq!(record["play_ticks"], json!(2_400_000u64));
    assert_eq!(record["deaths"], json!(7));
    assert_eq!(record["online"], json!(false));
}

#[test]
fn dump_table_formats_visible_stats() {
    let dir = tempfile::tempdir().expect("tempdir");
    let id = Uuid::new_v4();
    write_stats(dir.path(), id);

    let output = cmd()
        .args([
            "dump",
            "--stats-dir",
            dir.path().to_str().unwrap(),
            "--stats",
            "playtime,deaths,bogus",
        ])
        .output()
        .expect("run dump");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Play Time"));
    assert!(stdout.contains("1d 9h 20m"));
    assert!(stdout.contains(&id.to_string()));
    // Unknown keys are ignored, not errors.
    assert!(!stdout.contains("bogus"));
}

#[test]
fn dump_on_missing_directory_fails_cleanly() {
    let output = cmd()
        .args(["dump", "--stats-dir", "/nonexistent/tabstat-test"])
        .output()
        .expect("run dump");
    // An unreadable store keeps prior (empty) state; the command itself
    // still succeeds with an empty table.
    assert!(output.status.success());
}
