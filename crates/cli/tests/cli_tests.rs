//! CLI integration tests

use std::process::{Command, Output};

fn ffc(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ffc"))
        .args(args)
        .env_remove("FFC_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = ffc(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Flood Forecast Engine"), "Should show app name");
    assert!(stdout.contains("forecast"), "Should show forecast command");
    assert!(stdout.contains("retrain"), "Should show retrain command");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("--format"), "Should show format option");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = ffc(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("ffc"), "Should show binary name");
}

#[test]
fn test_forecast_help_lists_subcommands() {
    let output = ffc(&["forecast", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("show"));
    assert!(stdout.contains("generate"));
    assert!(stdout.contains("predict"));
}

#[test]
fn test_forecast_generate_help() {
    let output = ffc(&["forecast", "generate", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--force-retrain"), "Should show force-retrain flag");
    assert!(stdout.contains("<ZONE>"), "Should show zone argument");
}

#[test]
fn test_retrain_requires_zone() {
    let output = ffc(&["retrain"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Missing zone should fail");
    assert!(stderr.contains("<ZONE>"));
}

#[test]
fn test_invalid_format_rejected() {
    let output = ffc(&["--format", "yaml", "status"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("invalid value"), "Should report invalid format");
}

#[test]
fn test_invalid_command() {
    let output = ffc(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");
}

#[test]
fn test_unreachable_service_fails_cleanly() {
    // Port 9 (discard) is not expected to run an HTTP server
    let output = ffc(&["--api-url", "http://127.0.0.1:9", "status"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("request failed"), "Should report transport error");
}
