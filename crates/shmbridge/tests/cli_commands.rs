#![cfg(all(unix, feature = "cli"))]

use std::process::Command;

fn shmbridge() -> Command {
    Command::new(env!("CARGO_BIN_EXE_shmbridge"))
}

#[test]
fn version_prints_package_version() {
    let output = shmbridge().arg("version").output().expect("version should run");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("shmbridge {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn doctor_reports_json() {
    let output = shmbridge()
        .args(["--format", "json", "doctor"])
        .output()
        .expect("doctor should run");

    assert!(output.status.success());
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("doctor should emit json");
    assert_eq!(report["overall"], "pass");
    let checks = report["checks"].as_array().expect("checks array");
    assert!(checks.iter().any(|c| c["name"] == "shared_memory" && c["status"] == "pass"));
}

#[test]
fn envinfo_reports_version() {
    let output = shmbridge()
        .args(["--format", "json", "envinfo"])
        .output()
        .expect("envinfo should run");

    assert!(output.status.success());
    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("envinfo should emit json");
    assert_eq!(
        payload.get("version").and_then(|v| v.as_str()),
        Some(env!("CARGO_PKG_VERSION"))
    );
    assert_eq!(payload["regions"]["video"], "/NeuralChromium_VisualCortex_V3");
}

#[test]
fn invalid_duration_is_usage_error() {
    let output = shmbridge()
        .args(["publish-test-frame", "--interval", "0s"])
        .output()
        .expect("publish should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn invalid_size_is_usage_error() {
    let output = shmbridge()
        .args(["inspect", "text", "--input-text-size", "huge"])
        .output()
        .expect("inspect should run");
    assert_eq!(output.status.code(), Some(64));
}
