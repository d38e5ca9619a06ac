//! tmux-backed sessions: launch, poll, wait, kill and list.
//!
//! A session is addressed only by its id; every call re-reads state from the tmux server
//! inside the sandbox, nothing is cached locally.

pub mod launcher;
pub mod poller;
pub mod waiter;

use std::time::Duration;

use serde::Serialize;

use crate::encoding::CommandEncoder;
use crate::errors::SessionError;
use crate::executor::{bash_argv, CommandResult, ContainerRef, RemoteExecutor};
use crate::util::id::validate_session_id;
use crate::util::{shell_escape, ShellScript};

pub use launcher::{launch, start, StartOptions};
pub use poller::{classify_capture, poll};
pub use waiter::{wait, Backoff, WaitOptions};

/// Session id prefix for generated ids.
pub const DEFAULT_SESSION_PREFIX: &str = "sbx_";
/// Lines of pane history captured per poll.
pub const DEFAULT_TAIL_LINES: usize = 1000;
/// tmux scrollback kept per session.
pub const DEFAULT_HISTORY_LIMIT: usize = 50_000;

pub(crate) const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) const TOKEN_EXISTS: &str = "EXISTS";
pub(crate) const TOKEN_NOT_FOUND: &str = "NOT_FOUND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    NotFound,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::NotFound => "not_found",
            SessionStatus::Error => "error",
        }
    }
}

/// A point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollResult {
    pub success: bool,
    pub status: SessionStatus,
    /// Present only when `status` is `Completed`; `-1` if the marker's code did not parse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub output: String,
    pub output_truncated: bool,
    /// Set only by the waiter when it gave up; the command may still be running.
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PollResult {
    pub(crate) fn new(status: SessionStatus) -> Self {
        Self {
            success: true,
            status,
            exit_code: None,
            output: String::new(),
            output_truncated: false,
            timed_out: false,
            error_message: None,
        }
    }

    pub(crate) fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(msg.into()),
            ..Self::new(SessionStatus::Error)
        }
    }

    /// Whether waiting longer can change the outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Completed | SessionStatus::NotFound | SessionStatus::Error
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StartResult {
    pub(crate) fn started(session_id: String) -> Self {
        Self {
            success: true,
            session_id: Some(session_id),
            error_message: None,
        }
    }

    pub(crate) fn failed(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id: None,
            error_message: Some(msg.into()),
        }
    }
}

impl From<Result<String, SessionError>> for StartResult {
    fn from(r: Result<String, SessionError>) -> Self {
        match r {
            Ok(id) => StartResult::started(id),
            Err(e) => StartResult::failed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KillResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One line of `tmux list-sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    /// Creation time, unix seconds.
    pub created: u64,
    pub attached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListResult {
    pub success: bool,
    pub sessions: Vec<SessionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Encode a one-line control script and run it with `bash -lc`.
pub(crate) fn run_script(
    executor: &dyn RemoteExecutor,
    encoder: &CommandEncoder,
    target: &ContainerRef,
    script: &str,
    timeout: Duration,
) -> CommandResult {
    let encoded = match encoder.encode(script) {
        Ok(e) => e,
        Err(e) => return e.into(),
    };
    executor.exec_sync(target, &bash_argv(&encoded.payload), Some(timeout))
}

pub(crate) fn build_script(script: &ShellScript) -> Result<String, SessionError> {
    script
        .build()
        .map_err(|e| SessionError::Protocol(e.to_string()))
}

/// Exact-match session target. A bare name also resolves to any session it is a prefix of.
pub(crate) fn session_target(session_id: &str) -> String {
    shell_escape(&format!("={session_id}"))
}

/// Exact-match target for the session's current pane.
pub(crate) fn pane_target(session_id: &str) -> String {
    shell_escape(&format!("={session_id}:"))
}

/// `tmux has-session` printing `EXISTS` or `NOT_FOUND`.
pub(crate) fn existence_check_script(session_id: &str) -> String {
    format!(
        "tmux has-session -t {} 2>/dev/null && echo '{TOKEN_EXISTS}' || echo '{TOKEN_NOT_FOUND}'",
        session_target(session_id)
    )
}

/// Interpret the output of [`existence_check_script`].
pub(crate) fn parse_existence(output: &str) -> Option<bool> {
    output.lines().map(str::trim).find_map(|l| match l {
        TOKEN_EXISTS => Some(true),
        TOKEN_NOT_FOUND => Some(false),
        _ => None,
    })
}

/// Kill a session. Idempotent and best-effort: once inputs validate, it always reports success.
pub fn kill(
    executor: &dyn RemoteExecutor,
    encoder: &CommandEncoder,
    target: &ContainerRef,
    session_id: &str,
) -> KillResult {
    if let Err(e) = target
        .validate()
        .and_then(|_| validate_session_id(session_id))
    {
        return KillResult {
            success: false,
            error_message: Some(e.to_string()),
        };
    }
    let script = format!(
        "tmux kill-session -t {} 2>/dev/null || true",
        session_target(session_id)
    );
    tracing::debug!(%target, session_id, "kill session");
    let res = run_script(executor, encoder, target, &script, CONTROL_TIMEOUT);
    if !res.success {
        tracing::debug!(%target, session_id, error = res.error_text(), "kill failed; ignoring");
    }
    KillResult {
        success: true,
        error_message: None,
    }
}

/// List tmux sessions in the sandbox. No tmux server means an empty list.
pub fn list(
    executor: &dyn RemoteExecutor,
    encoder: &CommandEncoder,
    target: &ContainerRef,
) -> ListResult {
    if let Err(e) = target.validate() {
        return ListResult {
            success: false,
            sessions: Vec::new(),
            error_message: Some(e.to_string()),
        };
    }
    let script = "tmux list-sessions -F '#{session_name}:#{session_created}:#{session_attached}' 2>/dev/null || echo ''";
    tracing::debug!(%target, "list sessions");
    let res = run_script(executor, encoder, target, script, CONTROL_TIMEOUT);
    if !res.success {
        tracing::warn!(%target, error = res.error_text(), "list sessions failed");
        return ListResult {
            success: false,
            sessions: Vec::new(),
            error_message: Some(res.error_text().to_string()),
        };
    }
    ListResult {
        success: true,
        sessions: parse_session_list(&res.output),
        error_message: None,
    }
}

/// Parse `name:created:attached` lines; malformed lines are skipped.
pub fn parse_session_list(output: &str) -> Vec<SessionInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.trim().rsplitn(3, ':');
            let attached = parts.next()?;
            let created = parts.next()?.parse::<u64>().ok()?;
            let name = parts.next()?;
            if name.is_empty() {
                return None;
            }
            Some(SessionInfo {
                session_id: name.to_string(),
                created,
                attached: attached != "0",
            })
        })
        .collect()
}
