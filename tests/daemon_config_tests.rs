//! Integration tests for tsringd config: file, env overrides, CLI flags, and precedence.

use std::process::Command;

/// Run tsringd in a subprocess with the given args and env. Returns (success, stdout, stderr).
fn run_tsringd(args: &[&str], env_extra: &[(&str, &str)]) -> (bool, String, String) {
    let exe = env!("CARGO_BIN_EXE_tsringd");
    let mut cmd = Command::new(exe);
    cmd.args(args);
    for (k, v) in env_extra {
        cmd.env(k, v);
    }
    let out = cmd.output().expect("run tsringd");
    let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
    (out.status.success(), stdout, stderr)
}

#[test]
fn validate_config_no_config_uses_defaults() {
    let (ok, stdout, stderr) = run_tsringd(&["--validate-config", "--no-config"], &[]);
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("storage=memory"), "stdout: {}", stdout);
    assert!(stdout.contains("granularity_secs=30"), "stdout: {}", stdout);
    assert!(stdout.contains("retention_secs=86400"), "stdout: {}", stdout);
    assert!(stdout.contains("sweep_interval_secs=7200"), "stdout: {}", stdout);
    assert!(stdout.contains("http_bind=127.0.0.1:8080"), "stdout: {}", stdout);
}

#[test]
fn validate_config_option_string_is_applied() {
    let (ok, stdout, stderr) = run_tsringd(
        &[
            "--validate-config",
            "--no-config",
            "--options",
            "granularity=10s&retention=1h",
        ],
        &[],
    );
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("granularity_secs=10"), "stdout: {}", stdout);
    assert!(stdout.contains("retention_secs=3600"), "stdout: {}", stdout);
}

#[test]
fn validate_config_env_retention_overridden_by_cli() {
    let (ok, stdout, _) = run_tsringd(
        &["--validate-config", "--no-config", "--retention", "2h"],
        &[("TSRING_RETENTION", "1h")],
    );
    assert!(ok);
    assert!(
        stdout.contains("retention_secs=7200"),
        "CLI should win: {}",
        stdout
    );
}

#[test]
fn validate_config_env_override_with_no_config() {
    let (ok, stdout, _) = run_tsringd(
        &["--validate-config", "--no-config"],
        &[
            ("TSRING_GRANULARITY", "1mn"),
            ("TSRING_SWEEP_INTERVAL_SECS", "60"),
        ],
    );
    assert!(ok);
    assert!(stdout.contains("granularity_secs=60"), "stdout: {}", stdout);
    assert!(stdout.contains("sweep_interval_secs=60"), "stdout: {}", stdout);
}

#[test]
fn retention_not_multiple_of_granularity_fails() {
    let (ok, _stdout, stderr) = run_tsringd(
        &[
            "--validate-config",
            "--no-config",
            "--granularity",
            "30s",
            "--retention",
            "45s",
        ],
        &[],
    );
    assert!(!ok, "retention must be a multiple of granularity");
    assert!(
        stderr.contains("config error") || stderr.contains("multiple of granularity"),
        "stderr: {}",
        stderr
    );
}

#[test]
fn unparsable_duration_in_config_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("bad.toml");
    std::fs::write(
        &config_path,
        r#"
storage = "memory"
granularity = "thirty seconds"
"#,
    )
    .expect("write config");
    let (ok, _stdout, stderr) = run_tsringd(
        &[
            "--validate-config",
            "--config",
            config_path.to_str().unwrap(),
        ],
        &[],
    );
    assert!(!ok, "invalid duration should fail");
    assert!(
        stderr.contains("Invalid duration") || stderr.contains("config error"),
        "stderr: {}",
        stderr
    );
}

#[test]
fn unknown_backend_fails() {
    let (ok, _stdout, stderr) = run_tsringd(
        &["--validate-config", "--no-config", "--storage", "cassandra"],
        &[],
    );
    assert!(!ok);
    assert!(
        stderr.contains("Unknown storage backend") || stderr.contains("config error"),
        "stderr: {}",
        stderr
    );
}

#[test]
fn explicit_config_missing_file_fails() {
    let (ok, _stdout, stderr) = run_tsringd(
        &["--validate-config", "--config", "/nonexistent/tsringd.toml"],
        &[],
    );
    assert!(
        !ok,
        "missing config file with explicit --config should fail"
    );
    assert!(
        stderr.contains("not found") || stderr.contains("config error"),
        "stderr: {}",
        stderr
    );
}

#[test]
fn valid_config_file_merges_with_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("tsringd.toml");
    std::fs::write(
        &config_path,
        r#"
storage = "example"
http_bind = "127.0.0.1:9191"
"#,
    )
    .expect("write config");
    let (ok, stdout, stderr) = run_tsringd(
        &[
            "--validate-config",
            "--config",
            config_path.to_str().unwrap(),
        ],
        &[],
    );
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("storage=example"));
    assert!(stdout.contains("http_bind=127.0.0.1:9191"));
    assert!(stdout.contains("granularity_secs=30"));
}

#[test]
fn options_help_prints_backend_help() {
    let (ok, stdout, stderr) = run_tsringd(&["--no-config", "--options", "help"], &[]);
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("granularity=<duration>"), "stdout: {}", stdout);
    assert!(stdout.contains("retention=<duration>"), "stdout: {}", stdout);
}
