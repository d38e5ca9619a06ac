//! Synchronous execution by draining a live output channel.
//!
//! For short commands the caller wants request/response semantics without session
//! bookkeeping: start the command asynchronously, then read its output stream until it
//! closes or a bounded deadline passes.

use std::time::Duration;

use crate::errors::SessionError;
use crate::executor::{
    CommandResult, ContainerRef, OutputStream, RemoteExecutor, StreamEvent, StreamMessage,
};
use crate::util::clock::Clock;

/// Upper bound for a synchronous stream drain.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(600);

/// Largest single wait handed to the stream, so the deadline is re-checked regularly.
const RECV_SLICE: Duration = Duration::from_secs(1);

/// Highest leading byte treated as a channel/framing prefix on binary messages.
const MAX_FRAME_PREFIX: u8 = 4;

/// Normalize a caller timeout against `ceiling`.
///
/// `None`, zero and negative values fall back to the ceiling; larger values are clamped to it.
pub fn normalize_sync_timeout(timeout: Option<f64>, ceiling: Duration) -> Duration {
    match timeout {
        Some(secs) if secs.is_finite() && secs > 0.0 => {
            let requested = Duration::from_secs_f64(secs.min(ceiling.as_secs_f64()));
            requested.min(ceiling)
        }
        _ => ceiling,
    }
}

/// Decode one stream message into text.
///
/// Binary frames may start with a channel byte (stdin/stdout/stderr/...); it is dropped before
/// lossy UTF-8 decoding.
pub fn decode_message(msg: &StreamMessage) -> String {
    match msg {
        StreamMessage::Text(s) => s.clone(),
        StreamMessage::Binary(b) => {
            let payload = match b.first() {
                Some(&c) if c <= MAX_FRAME_PREFIX => &b[1..],
                _ => &b[..],
            };
            String::from_utf8_lossy(payload).into_owned()
        }
    }
}

/// Read from `stream` until it closes or `timeout` elapses; returns the accumulated text.
///
/// Reaching the deadline is not an error. A read error ends the drain early with what was
/// collected so far.
pub fn drain(stream: &mut dyn OutputStream, timeout: Duration, clock: &dyn Clock) -> String {
    let started = clock.now();
    let mut out = String::new();
    loop {
        let elapsed = clock.now().saturating_duration_since(started);
        if elapsed >= timeout {
            tracing::debug!(?timeout, "exec stream drain reached its deadline");
            break;
        }
        let wait = (timeout - elapsed).min(RECV_SLICE);
        match stream.recv(wait) {
            Ok(StreamEvent::Message(m)) => out.push_str(&decode_message(&m)),
            Ok(StreamEvent::Idle) => continue,
            Ok(StreamEvent::Closed) => break,
            Err(e) => {
                tracing::warn!(error = %e, "exec stream read failed; returning partial output");
                break;
            }
        }
    }
    stream.close();
    out
}

/// Run `command` (argv) and return its streamed output, waiting at most `timeout`.
pub fn run_sync(
    executor: &dyn RemoteExecutor,
    target: &ContainerRef,
    command: &[String],
    timeout: Duration,
    clock: &dyn Clock,
) -> CommandResult {
    if let Err(e) = target.validate() {
        return e.into();
    }
    if command.is_empty() || command.iter().all(|a| a.trim().is_empty()) {
        return SessionError::input("command is required").into();
    }

    tracing::debug!(%target, ?timeout, "exec (streamed)");
    let started = executor.exec_async(target, command);
    if !started.success {
        tracing::warn!(%target, error = started.error_text(), "async exec failed");
        return started;
    }
    let Some(handle) = started.stream_handle.clone() else {
        return CommandResult::failed("stream handle not returned for sync exec");
    };

    let mut stream = match executor.open_stream(&handle) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%target, error = %e, "failed to open exec stream");
            return CommandResult {
                stream_handle: Some(handle),
                ..CommandResult::failed(format!("Failed to open exec stream: {e:#}"))
            };
        }
    };
    let output = drain(stream.as_mut(), timeout, clock);
    CommandResult {
        success: true,
        output,
        error_message: None,
        stream_handle: Some(handle),
    }
}
