use crate::encoding::CommandEncoder;
use crate::executor::{ContainerRef, RemoteExecutor};
use crate::marker::Marker;
use crate::util::id::validate_session_id;
use super::{
    existence_check_script, pane_target, parse_existence, run_script, PollResult, SessionStatus,
    CAPTURE_TIMEOUT, CONTROL_TIMEOUT,
};

/// Script printing the last `tail_lines` lines of the session's full scrollback.
///
/// `-J` joins lines the pane wrapped, so a marker wider than the pane stays on one line.
fn capture_script(session_id: &str, tail_lines: usize) -> String {
    format!(
        "tmux capture-pane -t {} -p -J -S - 2>/dev/null | tail -n {}",
        pane_target(session_id),
        tail_lines.max(1)
    )
}

/// Classify captured pane text: `Completed` when the marker is present, else `Running`.
pub fn classify_capture(raw: &str, marker: &Marker, tail_lines: usize) -> PollResult {
    let truncated = raw.lines().count() >= tail_lines;
    match marker.scan(raw) {
        Some(done) => PollResult {
            exit_code: Some(done.exit_code.code()),
            output: done.output,
            output_truncated: truncated,
            ..PollResult::new(SessionStatus::Completed)
        },
        None => PollResult {
            output: raw.to_string(),
            output_truncated: truncated,
            ..PollResult::new(SessionStatus::Running)
        },
    }
}

/// Take one look at a session. Never fails: transport problems come back as `Error`.
pub fn poll(
    executor: &dyn RemoteExecutor,
    encoder: &CommandEncoder,
    target: &ContainerRef,
    session_id: &str,
    tail_lines: usize,
    marker_prefix: &str,
) -> PollResult {
    if let Err(e) = target
        .validate()
        .and_then(|_| validate_session_id(session_id))
    {
        return PollResult::error(e.to_string());
    }

    tracing::debug!(%target, session_id, "check session");
    let check = run_script(
        executor,
        encoder,
        target,
        &existence_check_script(session_id),
        CONTROL_TIMEOUT,
    );
    if !check.success {
        tracing::warn!(%target, session_id, error = check.error_text(), "session check failed");
        return PollResult::error(format!(
            "Failed to check session: {}",
            check.error_text()
        ));
    }
    match parse_existence(&check.output) {
        Some(true) => {}
        Some(false) => {
            return PollResult {
                error_message: Some("Session does not exist (may have been cleaned up)".into()),
                ..PollResult::new(SessionStatus::NotFound)
            };
        }
        None => {
            return PollResult::error(format!(
                "Unexpected session check output: {}",
                crate::util::preview(check.output.trim(), 200)
            ));
        }
    }

    tracing::debug!(%target, session_id, tail_lines, "capture session output");
    let capture = run_script(
        executor,
        encoder,
        target,
        &capture_script(session_id, tail_lines),
        CAPTURE_TIMEOUT,
    );
    if !capture.success {
        tracing::warn!(%target, session_id, error = capture.error_text(), "capture failed");
        return PollResult::error(format!(
            "Failed to capture output: {}",
            capture.error_text()
        ));
    }

    let marker = Marker::for_session(marker_prefix, session_id);
    classify_capture(&capture.output, &marker, tail_lines)
}
