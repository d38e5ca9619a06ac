use std::process::Command;

fn bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sandbox-session"));
    cmd.env_remove("SANDBOX_SESSION_CONTAINER")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_cli_help_lists_subcommands() {
    let out = bin().arg("--help").output().expect("failed to run --help");
    assert!(out.status.success());
    let s = String::from_utf8_lossy(&out.stdout);
    for sub in ["start", "poll", "wait", "kill", "list", "run", "bash", "doctor"] {
        assert!(s.contains(sub), "missing {sub} in help:\n{s}");
    }
}

#[test]
fn test_cli_doctor_without_docker_exits_127() {
    let out = bin()
        .arg("doctor")
        .env("SANDBOX_SESSION_SKIP_DOCKER", "1")
        .output()
        .expect("failed to run doctor");
    assert_eq!(out.status.code(), Some(127));
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("sandbox-session doctor"), "stderr:\n{err}");
    assert!(err.contains("docker: not found"), "stderr:\n{err}");
}

#[test]
fn test_cli_requires_container() {
    let out = bin()
        .args(["poll", "sbx_1"])
        .output()
        .expect("failed to run poll");
    assert_eq!(out.status.code(), Some(2));
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("--container"), "stderr:\n{err}");
}

#[test]
fn test_cli_reports_invalid_config() {
    let td = tempfile::tempdir().expect("tmpdir");
    let env_file = td.path().join("bad.env");
    std::fs::write(&env_file, "SANDBOX_SESSION_TIMEOUT=whenever\n").unwrap();
    let out = bin()
        .env_remove("SANDBOX_SESSION_TIMEOUT")
        .arg("--env-file")
        .arg(&env_file)
        .args(["--container", "dev", "list"])
        .output()
        .expect("failed to run list");
    assert_eq!(out.status.code(), Some(1));
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("SANDBOX_SESSION_TIMEOUT"), "stderr:\n{err}");
}

#[test]
fn test_cli_missing_docker_exits_127() {
    let out = bin()
        .env("SANDBOX_SESSION_SKIP_DOCKER", "1")
        .args(["--container", "dev", "list"])
        .output()
        .expect("failed to run list");
    assert_eq!(out.status.code(), Some(127));
}

#[test]
fn test_cli_start_input_error_exits_2() {
    let td = tempfile::tempdir().expect("tmpdir");
    // Never executed: the command is rejected before any docker call.
    let docker = td.path().join("docker");
    std::fs::write(&docker, "#!/bin/sh\nexit 99\n").unwrap();
    let out = bin()
        .env_remove("SANDBOX_SESSION_SKIP_DOCKER")
        .env("SANDBOX_SESSION_DOCKER", &docker)
        .args(["--container", "dev", "start", "--", "   "])
        .output()
        .expect("failed to run start");
    assert_eq!(out.status.code(), Some(2));
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("command is required"), "stderr:\n{err}");
}
