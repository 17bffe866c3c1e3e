// Smoke tests for the delimdex-bench binary.
use std::process::Command;

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_delimdex-bench");
    Command::new(exe)
}

#[test]
fn json_output_lists_every_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd()
        .args([
            "--work-dir",
            temp.path().to_str().expect("utf8 path"),
            "--size",
            "200K",
            "--workers",
            "1",
            "--workers",
            "4",
            "--format",
            "json",
        ])
        .output()
        .expect("run bench");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let value: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["name"], "delimdex");
    let results = value["results"].as_array().expect("results");
    assert_eq!(results.len(), 4);
    let rows: Vec<u64> = results
        .iter()
        .map(|item| item["rows"].as_u64().expect("rows"))
        .collect();
    assert!(rows.iter().all(|count| *count == rows[0] && *count > 0));
    assert!(results.iter().all(|item| item["malformed"] == 0));
}

#[test]
fn bad_size_exits_with_usage_code() {
    let output = cmd().args(["--size", "lots"]).output().expect("run bench");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid size"));
    assert!(stderr.contains("hint:"));
}
