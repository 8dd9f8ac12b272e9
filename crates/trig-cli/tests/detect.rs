use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::{error::Error, path::PathBuf};

#[test]
fn detect_digital_reads_samples_from_stdin() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("trig");
    cmd.args(["detect-digital", "--fs", "1"])
        .write_stdin("0\n0\n1\n1\n0\n0\n2\n2\n");
    let output = cmd.assert().success().get_output().stdout.clone();
    let events: Value = serde_json::from_slice(&output)?;
    let events = events.as_array().expect("event array");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["onset"], 2.0);
    assert_eq!(events[0]["condition"], "1");
    assert_eq!(events[1]["onset"], 6.0);
    assert_eq!(events[1]["condition"], "2");
    Ok(())
}

#[test]
fn detect_analog_reads_named_csv_column() -> Result<(), Box<dyn Error>> {
    let session = workspace_root().join("test_data/session.csv");
    let mut cmd = cargo_bin_cmd!("trig");
    cmd.args([
        "detect-analog",
        "--input",
        session.to_str().expect("utf8 path"),
        "--fs",
        "100",
        "--channel",
        "UADC016",
        "--name",
        "projector",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let events: Vec<Value> = serde_json::from_slice(&output)?;
    let onsets: Vec<f64> = events
        .iter()
        .map(|e| e["onset"].as_f64().expect("onset"))
        .collect();
    assert_eq!(onsets, vec![1.03, 4.02]);
    assert!(events
        .iter()
        .all(|e| e["condition"] == "projector" && e["channel"] == "UADC016"));
    Ok(())
}

#[test]
fn flat_analog_channel_fails() {
    let mut cmd = cargo_bin_cmd!("trig");
    cmd.args(["detect-analog", "--fs", "100"])
        .write_stdin("0.5\n0.5\n0.5\n0.5\n");
    let output = cmd.assert().failure().get_output().stderr.clone();
    assert!(String::from_utf8_lossy(&output).contains("zero dynamic range"));
}

#[test]
fn unknown_channel_is_reported() {
    let session = workspace_root().join("test_data/session.csv");
    let mut cmd = cargo_bin_cmd!("trig");
    cmd.args([
        "detect-digital",
        "--input",
        session.to_str().expect("utf8 path"),
        "--fs",
        "100",
        "--channel",
        "UPPT002",
    ]);
    let output = cmd.assert().failure().get_output().stderr.clone();
    assert!(String::from_utf8_lossy(&output).contains("UPPT002"));
}

fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .expect("crates dir")
        .parent()
        .expect("workspace root")
        .to_path_buf()
}
