mod common;

use std::process::Command;

use common::{fixture_path, housekeeping_body, packet, status_body, SECONDARY};

fn write_input(dir: &std::path::Path) -> std::path::PathBuf {
    let mut dat = packet(100, 0, Some(SECONDARY), &housekeeping_body(1, -5, &[2.0]));
    dat.extend(packet(200, 0, None, &status_body(7, 1234)));
    dat.extend(packet(200, 2, None, &status_body(8, 1235)));
    dat.extend(packet(300, 0, None, &[0]));
    let path = dir.join("input.dat");
    std::fs::write(&path, dat).unwrap();
    path
}

#[test]
fn decode_command() {
    let tmpdir = tempfile::tempdir().unwrap();
    let input = write_input(tmpdir.path());
    let output = tmpdir.path().join("out.json");

    let status = Command::new(env!("CARGO_BIN_EXE_tlmdecode"))
        .arg("decode")
        .arg("--schema")
        .arg(fixture_path("hk.json"))
        .arg("--output")
        .arg(&output)
        .arg(&input)
        .status()
        .unwrap();
    assert!(status.success());

    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
    assert_eq!(json["tables"]["100"]["columns"]["temp"], serde_json::json!([-5]));
    assert_eq!(json["tables"]["100"]["columns"]["volts"], serde_json::json!([[2.0]]));
    assert_eq!(
        json["tables"]["200"]["columns"]["counter"],
        serde_json::json!([1234, 1235])
    );
    assert_eq!(json["report"]["unmatched"], 1);
    assert_eq!(json["report"]["apids"]["200"]["missing"], 1);
}

#[test]
fn decode_command_unmatched_error() {
    let tmpdir = tempfile::tempdir().unwrap();
    let input = write_input(tmpdir.path());

    let out = Command::new(env!("CARGO_BIN_EXE_tlmdecode"))
        .args(["decode", "--unmatched", "error", "--schema"])
        .arg(fixture_path("hk.json"))
        .arg(&input)
        .output()
        .unwrap();
    assert!(out.status.success());

    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let error = json["report"]["stopped"]["error"].as_str().unwrap();
    assert!(error.starts_with("no schema for APID 300"), "{error}");
    assert_eq!(
        json["tables"]["200"]["columns"]["counter"],
        serde_json::json!([1234, 1235])
    );
    assert_eq!(json["report"]["unmatched"], 0);

    let status = Command::new(env!("CARGO_BIN_EXE_tlmdecode"))
        .args(["decode", "--unmatched", "ignore", "--schema"])
        .arg(fixture_path("hk.json"))
        .arg(&input)
        .output()
        .unwrap()
        .status;
    assert!(!status.success(), "unknown policy names are rejected");
}

#[test]
fn decode_command_refuses_to_clobber() {
    let tmpdir = tempfile::tempdir().unwrap();
    let input = write_input(tmpdir.path());
    let output = tmpdir.path().join("out.json");
    std::fs::write(&output, b"keep").unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_tlmdecode"))
        .args(["decode", "--parallel", "--schema"])
        .arg(fixture_path("hk.json"))
        .arg("--output")
        .arg(&output)
        .arg(&input)
        .status()
        .unwrap();
    assert!(!status.success());
    assert_eq!(std::fs::read(&output).unwrap(), b"keep");
}

#[test]
fn info_command() {
    let tmpdir = tempfile::tempdir().unwrap();
    let input = write_input(tmpdir.path());

    let out = Command::new(env!("CARGO_BIN_EXE_tlmdecode"))
        .args(["info", "--format", "json"])
        .arg(&input)
        .output()
        .unwrap();
    assert!(out.status.success());

    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["summary"]["total_packets"], 4);
    assert_eq!(json["summary"]["missing_packets"], 1);
    assert_eq!(json["apids"]["200"]["total_packets"], 2);
}
