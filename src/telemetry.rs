//! Diagnostic logging setup for the CLI.

use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;

/// Filter directive variable (EnvFilter syntax, e.g. `sandbox_session=debug`).
pub const LOG_ENV: &str = "SANDBOX_SESSION_LOG";

static INIT: OnceCell<()> = OnceCell::new();

/// Filter used when `SANDBOX_SESSION_LOG` is unset or empty.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "sandbox_session=debug,warn"
    } else {
        "warn"
    }
}

pub fn log_filter(verbose: bool) -> String {
    env::var(LOG_ENV)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_filter(verbose).to_string())
}

/// Install the stderr fmt subscriber. Returns false when already initialized here or elsewhere.
pub fn init_logging(verbose: bool) -> bool {
    if INIT.get().is_some() {
        return false;
    }
    let filter = log_filter(verbose);
    let env_filter = tracing_subscriber::EnvFilter::try_new(&filter).unwrap_or_else(|e| {
        eprintln!("sandbox-session: ignoring invalid {LOG_ENV}={filter:?}: {e}");
        tracing_subscriber::EnvFilter::new(default_filter(verbose))
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_err()
    {
        return false;
    }
    let _ = INIT.set(());
    true
}
