use std::time::Duration;

use crate::encoding::CommandEncoder;
use crate::executor::{ContainerRef, RemoteExecutor};
use crate::marker::DEFAULT_MARKER_PREFIX;
use crate::util::clock::Clock;

use super::{kill, poll, PollResult, SessionStatus, DEFAULT_TAIL_LINES};

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub backoff_factor: f64,
    pub tail_lines: usize,
    /// Kill the session once it completed or the wait timed out.
    pub cleanup: bool,
    pub marker_prefix: String,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_interval: DEFAULT_MAX_POLL_INTERVAL,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            tail_lines: DEFAULT_TAIL_LINES,
            cleanup: true,
            marker_prefix: DEFAULT_MARKER_PREFIX.to_string(),
        }
    }
}

/// Exponential poll interval, capped at `max`.
///
/// Intervals never decrease: factors below 1 are treated as 1 and an initial interval above
/// the cap starts at the cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    factor: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor >= 1.0 {
            factor
        } else {
            1.0
        };
        Self {
            current: initial.min(max),
            max,
            factor,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return the interval to sleep now and step to the next one.
    pub fn advance(&mut self) -> Duration {
        let now = self.current;
        let next = self.current.as_secs_f64() * self.factor;
        self.current = Duration::try_from_secs_f64(next).map_or(self.max, |d| d.min(self.max));
        now
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.advance())
    }
}

/// Poll a session until it completes, disappears, errors, or `opts.timeout` passes.
///
/// On timeout a final poll supplies the last known output and the result is a failure with
/// status `Running` and `timed_out` set. Sleeps never run past the deadline.
pub fn wait(
    executor: &dyn RemoteExecutor,
    encoder: &CommandEncoder,
    target: &ContainerRef,
    session_id: &str,
    opts: &WaitOptions,
    clock: &dyn Clock,
) -> PollResult {
    let started = clock.now();
    let mut backoff = Backoff::new(
        opts.poll_interval,
        opts.max_poll_interval,
        opts.backoff_factor,
    );
    let poll_once = || {
        poll(
            executor,
            encoder,
            target,
            session_id,
            opts.tail_lines,
            &opts.marker_prefix,
        )
    };

    loop {
        let elapsed = clock.now().saturating_duration_since(started);
        if elapsed >= opts.timeout {
            let last = poll_once();
            if opts.cleanup {
                kill(executor, encoder, target, session_id);
            }
            tracing::debug!(%target, session_id, ?elapsed, "wait timed out");
            return PollResult {
                success: false,
                status: SessionStatus::Running,
                exit_code: None,
                output: last.output,
                output_truncated: last.output_truncated,
                timed_out: true,
                error_message: Some(format!("Timeout after {:.1}s", elapsed.as_secs_f64())),
            };
        }

        let res = poll_once();
        if res.status == SessionStatus::Completed && opts.cleanup {
            kill(executor, encoder, target, session_id);
        }
        if !res.success || res.is_terminal() {
            return res;
        }

        // Measured from `started` so an arbitrarily large timeout cannot overflow an Instant.
        let remaining = opts
            .timeout
            .saturating_sub(clock.now().saturating_duration_since(started));
        let pause = backoff.advance().min(remaining);
        tracing::trace!(session_id, ?pause, "session still running");
        if !pause.is_zero() {
            clock.sleep(pause);
        }
    }
}
