mod cli;

use std::process::{Command as ProcessCommand, ExitCode};

use clap::Parser;
use serde::Serialize;

use sandbox_session::{
    color_enabled_stderr, exit_code_for_io_error, exit_code_for_session_error, log_error_stderr,
    log_info_stderr, log_warn_stderr, set_color_mode, CommandResult, ContainerRef,
    DockerExecutor, RemoteExecutor, SandboxShell, SessionConfig, SessionStatus, StartResult,
};

use crate::cli::{Cli, Command};

/// Exit code for a wait that gave up, as used by coreutils `timeout`.
const EXIT_TIMEOUT: u8 = 124;

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) {
    if json {
        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("sandbox-session: failed to serialize result: {e}"),
        }
    } else {
        let t = text();
        if !t.is_empty() {
            print!("{t}");
            if !t.ends_with('\n') {
                println!();
            }
        }
    }
}

fn exit_for_command_result(json: bool, use_err: bool, res: &CommandResult) -> ExitCode {
    emit(json, res, || res.output.clone());
    if res.success {
        ExitCode::SUCCESS
    } else {
        if !json {
            log_error_stderr(use_err, &format!("sandbox-session: {}", res.error_text()));
        }
        ExitCode::from(1)
    }
}

/// Clamp a remote exit code into the process exit range; unknown codes count as failure.
fn process_exit_code(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

fn run_doctor(config: &SessionConfig, container: Option<&str>, verbose: bool) -> ExitCode {
    let use_err = color_enabled_stderr();
    eprintln!("sandbox-session doctor");
    eprintln!("  version: v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "  build: {} {} ({}, {})",
        env!("SANDBOX_SESSION_BUILD_TARGET"),
        env!("SANDBOX_SESSION_BUILD_PROFILE"),
        env!("SANDBOX_SESSION_BUILD_RUSTC"),
        env!("SANDBOX_SESSION_BUILD_DATE"),
    );
    eprintln!("  host: {} / {}", std::env::consts::OS, std::env::consts::ARCH);

    let runtime = match sandbox_session::container_runtime_path() {
        Ok(p) => {
            eprintln!("  docker: {}", p.display());
            if let Ok(out) = ProcessCommand::new(&p).arg("--version").output() {
                let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if !s.is_empty() {
                    eprintln!("  docker --version: {s}");
                }
            }
            p
        }
        Err(e) => {
            log_error_stderr(use_err, &format!("  docker: not found ({e})"));
            return ExitCode::from(exit_code_for_io_error(&e));
        }
    };

    if verbose {
        eprintln!("  gzip threshold: {}", config.gzip_threshold);
        eprintln!(
            "  wait: timeout {:?}, poll {:?} .. {:?} x{}",
            config.wait_timeout,
            config.poll_interval,
            config.max_poll_interval,
            config.backoff_factor
        );
        eprintln!("  sync timeout ceiling: {:?}", config.sync_timeout);
    }

    let Some(container) = container else {
        log_warn_stderr(use_err, "  tmux: skipped (no --container given)");
        return ExitCode::SUCCESS;
    };
    let executor = DockerExecutor::with_runtime(runtime);
    let target = ContainerRef::new(container);
    let probe = executor.exec_sync(
        &target,
        &[
            "sh".to_string(),
            "-c".to_string(),
            "command -v tmux && tmux -V".to_string(),
        ],
        Some(std::time::Duration::from_secs(10)),
    );
    let found = probe.success && !probe.output.trim().is_empty();
    if found {
        let line = probe.output.trim().replace('\n', " ");
        log_info_stderr(use_err, &format!("  tmux in {container}: {line}"));
        ExitCode::SUCCESS
    } else {
        let why = if probe.success {
            "not installed".to_string()
        } else {
            probe.error_text().to_string()
        };
        log_error_stderr(use_err, &format!("  tmux in {container}: {why}"));
        ExitCode::from(1)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Some(mode) = cli.color {
        set_color_mode(mode);
    }
    sandbox_session::telemetry::init_logging(cli.verbose);
    let use_err = color_enabled_stderr();

    let config = match SessionConfig::load(cli.env_file.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            log_error_stderr(use_err, &format!("sandbox-session: {e:#}"));
            return ExitCode::from(1);
        }
    };

    if let Command::Doctor = cli.command {
        return run_doctor(&config, cli.container.as_deref(), cli.verbose);
    }

    let Some(container) = cli.container.clone().filter(|c| !c.trim().is_empty()) else {
        log_error_stderr(
            use_err,
            "sandbox-session: --container (or SANDBOX_SESSION_CONTAINER) is required",
        );
        return ExitCode::from(2);
    };
    let executor = match DockerExecutor::new() {
        Ok(e) => e,
        Err(e) => {
            log_error_stderr(use_err, &format!("sandbox-session: {e}"));
            return ExitCode::from(exit_code_for_io_error(&e));
        }
    };
    if cli.verbose {
        log_info_stderr(
            use_err,
            &format!(
                "sandbox-session: docker: {} (container {container})",
                executor.runtime().display()
            ),
        );
    }
    let shell = SandboxShell::new(executor, ContainerRef::new(container), config);
    let json = cli.json;

    match cli.command {
        Command::Start {
            exec_dir,
            session_id,
            command,
        } => {
            let launched =
                shell.launch(&command.join(" "), exec_dir.as_deref(), session_id.as_deref());
            // Input errors exit 2, transport and protocol failures 1.
            let code = launched
                .as_ref()
                .err()
                .map_or(0, exit_code_for_session_error);
            let res = StartResult::from(launched);
            emit(json, &res, || res.session_id.clone().unwrap_or_default());
            if res.success {
                ExitCode::SUCCESS
            } else {
                if !json {
                    log_error_stderr(
                        use_err,
                        &format!(
                            "sandbox-session: {}",
                            res.error_message.as_deref().unwrap_or("start failed")
                        ),
                    );
                }
                ExitCode::from(code)
            }
        }
        Command::Poll {
            session_id,
            tail_lines,
        } => {
            let tail = tail_lines.unwrap_or(shell.config().tail_lines);
            let res = shell.poll_tail(&session_id, tail);
            emit(json, &res, || match res.exit_code {
                Some(code) => format!("status: {} (exit {code})\n{}", res.status.as_str(), res.output),
                None => format!("status: {}\n{}", res.status.as_str(), res.output),
            });
            if res.success {
                ExitCode::SUCCESS
            } else {
                if !json {
                    log_error_stderr(
                        use_err,
                        &format!(
                            "sandbox-session: {}",
                            res.error_message.as_deref().unwrap_or("poll failed")
                        ),
                    );
                }
                ExitCode::from(1)
            }
        }
        Command::Wait {
            session_id,
            timeout,
            poll_interval,
            max_poll_interval,
            no_cleanup,
        } => {
            let mut opts = shell.wait_options();
            if let Some(t) = timeout {
                opts.timeout = t;
            }
            if let Some(p) = poll_interval {
                opts.poll_interval = p;
            }
            if let Some(m) = max_poll_interval {
                opts.max_poll_interval = m;
            }
            opts.cleanup = !no_cleanup;
            let res = shell.wait_with(&session_id, &opts);
            emit(json, &res, || res.output.clone());
            if res.timed_out {
                if !json {
                    log_warn_stderr(
                        use_err,
                        &format!(
                            "sandbox-session: {}",
                            res.error_message.as_deref().unwrap_or("timed out")
                        ),
                    );
                }
                return ExitCode::from(EXIT_TIMEOUT);
            }
            match (res.status, res.exit_code) {
                (SessionStatus::Completed, Some(code)) => ExitCode::from(process_exit_code(code)),
                _ => {
                    if !json {
                        log_error_stderr(
                            use_err,
                            &format!(
                                "sandbox-session: {}",
                                res.error_message
                                    .as_deref()
                                    .unwrap_or(res.status.as_str())
                            ),
                        );
                    }
                    ExitCode::from(1)
                }
            }
        }
        Command::Kill { session_id } => {
            let res = shell.kill(&session_id);
            emit(json, &res, String::new);
            if res.success {
                ExitCode::SUCCESS
            } else {
                if !json {
                    log_error_stderr(
                        use_err,
                        &format!(
                            "sandbox-session: {}",
                            res.error_message.as_deref().unwrap_or("kill failed")
                        ),
                    );
                }
                ExitCode::from(1)
            }
        }
        Command::List => {
            let res = shell.list();
            emit(json, &res, || {
                res.sessions
                    .iter()
                    .map(|s| {
                        format!(
                            "{}\t{}\t{}\n",
                            s.session_id,
                            s.created,
                            if s.attached { "attached" } else { "detached" }
                        )
                    })
                    .collect()
            });
            if res.success {
                ExitCode::SUCCESS
            } else {
                if !json {
                    log_error_stderr(
                        use_err,
                        &format!(
                            "sandbox-session: {}",
                            res.error_message.as_deref().unwrap_or("list failed")
                        ),
                    );
                }
                ExitCode::from(1)
            }
        }
        Command::Run { timeout, argv } => {
            let res = shell.run_sync(&argv, timeout);
            exit_for_command_result(json, use_err, &res)
        }
        Command::Bash {
            exec_dir,
            sync,
            timeout,
            command,
        } => {
            let res = shell.bash(&command.join(" "), exec_dir.as_deref(), sync, timeout);
            exit_for_command_result(json, use_err, &res)
        }
        Command::Doctor => ExitCode::SUCCESS,
    }
}
