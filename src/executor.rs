//! The remote execution capability the session protocol is layered on.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::errors::SessionError;

/// Address of the sandbox (container) commands run in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ContainerRef {
    /// Sandbox or container group id as understood by the executor.
    pub sandbox_id: String,
    /// Container inside the sandbox, when the executor distinguishes them.
    pub container: Option<String>,
}

impl ContainerRef {
    pub fn new(sandbox_id: impl Into<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            container: None,
        }
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.sandbox_id.trim().is_empty() {
            return Err(SessionError::input("sandbox_id is required"));
        }
        if matches!(self.container.as_deref(), Some(c) if c.trim().is_empty()) {
            return Err(SessionError::input("container_name is required"));
        }
        Ok(())
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container {
            Some(c) => write!(f, "{}/{}", self.sandbox_id, c),
            None => f.write_str(&self.sandbox_id),
        }
    }
}

/// Reference to a live output channel returned by [`RemoteExecutor::exec_async`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum StreamHandle {
    /// A websocket carrying the command's output frames.
    WebSocket(String),
    /// A locally spawned process registered with the executor.
    Process(String),
}

/// Outcome of a single request/response exec call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_handle: Option<StreamHandle>,
}

impl CommandResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(msg.into()),
            ..Self::default()
        }
    }

    pub fn streaming(handle: StreamHandle) -> Self {
        Self {
            success: true,
            stream_handle: Some(handle),
            ..Self::default()
        }
    }

    /// Error text for logs and wrapped errors; falls back to the output when no message is set.
    pub fn error_text(&self) -> &str {
        self.error_message
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(self.output.as_str())
    }
}

impl From<SessionError> for CommandResult {
    fn from(e: SessionError) -> Self {
        CommandResult::failed(e.to_string())
    }
}

/// One discrete message read from an output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Message(StreamMessage),
    /// Nothing arrived within the requested wait.
    Idle,
    Closed,
}

/// A live, closable output channel.
pub trait OutputStream: Send {
    /// Wait up to `wait` for the next message.
    fn recv(&mut self, wait: Duration) -> Result<StreamEvent>;

    /// Release the channel; must be safe to call more than once.
    fn close(&mut self);
}

/// Executes commands inside a sandbox.
///
/// Implementations report transport failures through [`CommandResult::success`]; they never
/// panic on a failed remote call.
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` and return its captured output.
    fn exec_sync(
        &self,
        target: &ContainerRef,
        command: &[String],
        timeout: Option<Duration>,
    ) -> CommandResult;

    /// Start `command` and return a handle to its live output instead of waiting.
    fn exec_async(&self, target: &ContainerRef, command: &[String]) -> CommandResult;

    /// Start `command` without keeping a channel to it. The command must keep running after
    /// this call returns and after the executor is dropped.
    ///
    /// The default delegates to [`RemoteExecutor::exec_async`], for transports whose remote
    /// process does not depend on the returned handle being read.
    fn exec_detached(&self, target: &ContainerRef, command: &[String]) -> CommandResult {
        self.exec_async(target, command)
    }

    /// Open the output channel behind `handle`.
    fn open_stream(&self, handle: &StreamHandle) -> Result<Box<dyn OutputStream>> {
        match handle {
            StreamHandle::WebSocket(url) => Ok(Box::new(crate::ws::WsStream::connect(url)?)),
            StreamHandle::Process(id) => {
                bail!("executor cannot open process stream {id}")
            }
        }
    }
}

/// argv for running a shell payload: `bash -lc <payload>`.
pub fn bash_argv(payload: &str) -> Vec<String> {
    vec!["bash".to_string(), "-lc".to_string(), payload.to_string()]
}
