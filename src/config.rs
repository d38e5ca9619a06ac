//! Runtime configuration from `SANDBOX_SESSION_*` environment variables and an optional `.env`.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::encoding::{CommandEncoder, DEFAULT_GZIP_THRESHOLD};
use crate::marker::DEFAULT_MARKER_PREFIX;
use crate::session::waiter::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_POLL_INTERVAL, DEFAULT_POLL_INTERVAL,
    DEFAULT_WAIT_TIMEOUT,
};
use crate::session::{
    StartOptions, WaitOptions, DEFAULT_HISTORY_LIMIT, DEFAULT_SESSION_PREFIX, DEFAULT_TAIL_LINES,
};
use crate::stream::DEFAULT_SYNC_TIMEOUT;

pub const ENV_PREFIX: &str = "SANDBOX_SESSION_";

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub session_prefix: String,
    pub marker_prefix: String,
    pub gzip_threshold: usize,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub backoff_factor: f64,
    pub tail_lines: usize,
    pub history_limit: usize,
    /// Ceiling for synchronous stream drains.
    pub sync_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_prefix: DEFAULT_SESSION_PREFIX.to_string(),
            marker_prefix: DEFAULT_MARKER_PREFIX.to_string(),
            gzip_threshold: DEFAULT_GZIP_THRESHOLD,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_interval: DEFAULT_MAX_POLL_INTERVAL,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            tail_lines: DEFAULT_TAIL_LINES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }
}

/// Parse `10s`, `1m30s`, `250ms` or bare (possibly fractional) seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let s = raw.trim();
    if let Ok(secs) = s.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Duration::try_from_secs_f64(secs)
                .map_err(|_| anyhow!("duration of {secs} seconds is out of range"));
        }
        return Err(anyhow!("duration must be a non-negative number of seconds"));
    }
    humantime::parse_duration(s).map_err(|e| anyhow!(e))
}

fn parse_number<T>(raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(raw.trim().parse::<T>()?)
}

impl SessionConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read `env_file` (or `./.env` when `None` and present), with the process environment
    /// taking precedence over file entries.
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        let mut file_vars = HashMap::new();
        let path = match env_file {
            Some(p) => Some(p.to_path_buf()),
            None => Some(Path::new(".env").to_path_buf()).filter(|p| p.is_file()),
        };
        if let Some(path) = path {
            let iter = dotenvy::from_path_iter(&path)
                .with_context(|| format!("failed to read env file {}", path.display()))?;
            for item in iter {
                let (k, v) = item
                    .with_context(|| format!("failed to parse env file {}", path.display()))?;
                file_vars.insert(k, v);
            }
            tracing::debug!(path = %path.display(), entries = file_vars.len(), "loaded env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file_vars.get(key).cloned()))
    }

    /// Build a config from a variable lookup; unset or empty variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };
        let invalid = |name: &str, raw: &str| format!("invalid {ENV_PREFIX}{name}={raw:?}");

        let mut cfg = Self::default();
        if let Some(v) = get("PREFIX") {
            cfg.session_prefix = v.trim().to_string();
        }
        if let Some(v) = get("MARKER_PREFIX") {
            cfg.marker_prefix = v.trim().to_string();
        }
        macro_rules! field {
            ($name:literal, $field:ident, $parse:expr) => {
                if let Some(v) = get($name) {
                    cfg.$field = $parse(&v).with_context(|| invalid($name, &v))?;
                }
            };
        }
        field!("GZIP_THRESHOLD", gzip_threshold, parse_number::<usize>);
        field!("TIMEOUT", wait_timeout, parse_duration);
        field!("POLL_INTERVAL", poll_interval, parse_duration);
        field!("MAX_POLL_INTERVAL", max_poll_interval, parse_duration);
        field!("BACKOFF_FACTOR", backoff_factor, parse_number::<f64>);
        field!("TAIL_LINES", tail_lines, parse_number::<usize>);
        field!("HISTORY_LIMIT", history_limit, parse_number::<usize>);
        field!("SYNC_TIMEOUT", sync_timeout, parse_duration);

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let id_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
        if !self.session_prefix.chars().all(id_char) {
            return Err(anyhow!(
                "invalid {ENV_PREFIX}PREFIX={:?}: only [A-Za-z0-9_-] allowed",
                self.session_prefix
            ));
        }
        // The marker is echoed inside double quotes
        let unsafe_in_marker = |c: char| c.is_whitespace() || matches!(c, '"' | '$' | '`' | '\\');
        if self.marker_prefix.is_empty() || self.marker_prefix.chars().any(unsafe_in_marker) {
            return Err(anyhow!(
                "invalid {ENV_PREFIX}MARKER_PREFIX={:?}",
                self.marker_prefix
            ));
        }
        if !(self.backoff_factor.is_finite() && self.backoff_factor >= 1.0) {
            return Err(anyhow!(
                "invalid {ENV_PREFIX}BACKOFF_FACTOR={}: must be >= 1",
                self.backoff_factor
            ));
        }
        if self.tail_lines == 0 {
            return Err(anyhow!("invalid {ENV_PREFIX}TAIL_LINES=0"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("invalid {ENV_PREFIX}POLL_INTERVAL: must be positive"));
        }
        if self.sync_timeout.is_zero() {
            return Err(anyhow!("invalid {ENV_PREFIX}SYNC_TIMEOUT: must be positive"));
        }
        Ok(())
    }

    pub fn encoder(&self) -> CommandEncoder {
        CommandEncoder::new(self.gzip_threshold)
    }

    pub fn start_options(&self) -> StartOptions {
        StartOptions {
            session_prefix: self.session_prefix.clone(),
            marker_prefix: self.marker_prefix.clone(),
            history_limit: self.history_limit,
            ..StartOptions::default()
        }
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            timeout: self.wait_timeout,
            poll_interval: self.poll_interval,
            max_poll_interval: self.max_poll_interval,
            backoff_factor: self.backoff_factor,
            tail_lines: self.tail_lines,
            cleanup: true,
            marker_prefix: self.marker_prefix.clone(),
        }
    }
}
