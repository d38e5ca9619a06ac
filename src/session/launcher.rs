use crate::encoding::CommandEncoder;
use crate::errors::SessionError;
use crate::executor::{ContainerRef, RemoteExecutor};
use crate::marker::{Marker, DEFAULT_MARKER_PREFIX};
use crate::util::id::{create_session_id, validate_session_id};
use crate::util::{reject_newlines, shell_escape, ShellScript};

use super::{
    build_script, existence_check_script, pane_target, parse_existence, run_script,
    session_target, StartResult,
    CONTROL_TIMEOUT, DEFAULT_HISTORY_LIMIT, DEFAULT_SESSION_PREFIX, LAUNCH_TIMEOUT,
};

/// Printed by the launch script when the requested id is already taken.
const TOKEN_SESSION_EXISTS: &str = "SESSION_EXISTS";

/// Per-launch options.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub exec_dir: Option<String>,
    pub session_id: Option<String>,
    pub session_prefix: String,
    pub marker_prefix: String,
    pub history_limit: usize,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            exec_dir: None,
            session_id: None,
            session_prefix: DEFAULT_SESSION_PREFIX.to_string(),
            marker_prefix: DEFAULT_MARKER_PREFIX.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Build the user command as the session will run it: optional `cd`, marker wrap, encoding.
pub fn session_payload(
    encoder: &CommandEncoder,
    command: &str,
    exec_dir: Option<&str>,
    marker: &Marker,
) -> Result<String, SessionError> {
    let inner = match exec_dir.filter(|d| !d.is_empty()) {
        Some(dir) => {
            reject_newlines(dir, "exec_dir").map_err(SessionError::Input)?;
            format!("cd {} && {}", shell_escape(dir), command)
        }
        None => command.to_string(),
    };
    Ok(encoder.encode(&marker.wrap(&inner))?.payload)
}

/// One-line launch script: refuse a taken id, then create the detached session and keep its
/// pane after exit so the output stays capturable.
///
/// The tmux commands are chained in a single client invocation so `remain-on-exit` is applied
/// before the pane's process can exit.
pub fn launch_script(
    session_id: &str,
    payload: &str,
    history_limit: usize,
) -> Result<String, SessionError> {
    let name = shell_escape(session_id);
    let exact = session_target(session_id);
    let pane = pane_target(session_id);
    let mut script = ShellScript::new();
    script
        .push(format!(
            "tmux has-session -t {exact} 2>/dev/null && echo '{TOKEN_SESSION_EXISTS}' && exit 0"
        ))
        .push(format!(
            "tmux start-server \\; set-option -g history-limit {history_limit} \\; new-session -d -s {name} {} \\; set-option -t {pane} remain-on-exit on",
            shell_escape(payload)
        ));
    build_script(&script)
}

/// Start `command` in a new detached tmux session and verify that it exists.
pub fn start(
    executor: &dyn RemoteExecutor,
    encoder: &CommandEncoder,
    target: &ContainerRef,
    command: &str,
    opts: &StartOptions,
) -> StartResult {
    launch(executor, encoder, target, command, opts).into()
}

/// Like [`start`], but keeps the error kind so callers can tell input errors from transport
/// and protocol failures.
pub fn launch(
    executor: &dyn RemoteExecutor,
    encoder: &CommandEncoder,
    target: &ContainerRef,
    command: &str,
    opts: &StartOptions,
) -> Result<String, SessionError> {
    target.validate()?;
    if command.trim().is_empty() {
        return Err(SessionError::input("command is required"));
    }
    let session_id = match opts.session_id.as_deref().filter(|s| !s.is_empty()) {
        Some(id) => id.to_string(),
        None => create_session_id(&opts.session_prefix),
    };
    validate_session_id(&session_id)?;

    let marker = Marker::for_session(&opts.marker_prefix, &session_id);
    let payload = session_payload(encoder, command, opts.exec_dir.as_deref(), &marker)?;
    let script = launch_script(&session_id, &payload, opts.history_limit)?;

    tracing::debug!(%target, session_id, "launch session");
    let launched = run_script(executor, encoder, target, &script, LAUNCH_TIMEOUT);
    if !launched.success {
        tracing::warn!(%target, session_id, error = launched.error_text(), "launch failed");
        return Err(SessionError::Transport(format!(
            "Failed to start tmux session: {}",
            launched.error_text()
        )));
    }
    if launched
        .output
        .lines()
        .any(|l| l.trim() == TOKEN_SESSION_EXISTS)
    {
        return Err(SessionError::input(format!(
            "session {session_id} already exists"
        )));
    }

    let verify = run_script(
        executor,
        encoder,
        target,
        &existence_check_script(&session_id),
        CONTROL_TIMEOUT,
    );
    if !verify.success || parse_existence(&verify.output) != Some(true) {
        tracing::warn!(
            %target,
            session_id,
            launch_output = %crate::util::preview(&launched.output, 200),
            "session missing after launch"
        );
        return Err(SessionError::Protocol(
            "Session created but verification failed".to_string(),
        ));
    }
    Ok(session_id)
}
