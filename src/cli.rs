use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    sandbox_session::config::parse_duration(s).map_err(|e| e.to_string())
}

/// Validate a session id flag value early, with the library's rules
fn validate_session_id(s: &str) -> Result<String, String> {
    sandbox_session::util::id::validate_session_id(s)
        .map(|_| s.to_string())
        .map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Start a command in a new detached tmux session and print its session id
    Start {
        /// Working directory inside the container
        #[arg(long = "exec-dir")]
        exec_dir: Option<String>,
        /// Use this session id instead of generating one
        #[arg(long = "session-id", value_parser = validate_session_id)]
        session_id: Option<String>,
        /// Shell command (joined with spaces)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Show a session's status and captured output once
    Poll {
        session_id: String,
        /// Lines of scrollback to capture (default from SANDBOX_SESSION_TAIL_LINES)
        #[arg(long = "tail-lines")]
        tail_lines: Option<usize>,
    },

    /// Wait for a session to finish, polling with exponential backoff
    Wait {
        session_id: String,
        /// Give up after this long, e.g. 90s or 5m (default from SANDBOX_SESSION_TIMEOUT)
        #[arg(long, value_parser = parse_duration_arg)]
        timeout: Option<Duration>,
        /// First poll interval
        #[arg(long = "poll-interval", value_parser = parse_duration_arg)]
        poll_interval: Option<Duration>,
        /// Upper bound for the poll interval
        #[arg(long = "max-poll-interval", value_parser = parse_duration_arg)]
        max_poll_interval: Option<Duration>,
        /// Leave the session alive after completion or timeout
        #[arg(long = "no-cleanup")]
        no_cleanup: bool,
    },

    /// Kill a session (succeeds when it is already gone)
    Kill { session_id: String },

    /// List tmux sessions in the container
    List,

    /// Run argv in the container and stream its output until it exits
    Run {
        /// Seconds to wait for output (capped by SANDBOX_SESSION_SYNC_TIMEOUT)
        #[arg(long)]
        timeout: Option<f64>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        argv: Vec<String>,
    },

    /// Run a shell command once through the encoded bash wrapper
    Bash {
        /// Working directory inside the container
        #[arg(long = "exec-dir")]
        exec_dir: Option<String>,
        /// Stream output back instead of returning immediately
        #[arg(long)]
        sync: bool,
        /// Seconds to wait for output with --sync
        #[arg(long)]
        timeout: Option<f64>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Check docker and tmux availability and print build info
    Doctor,
}

#[derive(Parser, Debug)]
#[command(
    name = "sandbox-session",
    version,
    about = "Run commands in a container as pollable tmux sessions or bounded output streams.",
    after_long_help = "Examples:\n  sandbox-session --container dev start -- make test\n  sandbox-session --container dev wait sbx_1a2b3c4d5e6f --timeout 10m\n  sandbox-session --container dev --json poll sbx_1a2b3c4d5e6f\n  sandbox-session --container dev run -- uname -a\n\n",
    after_help = "\n"
)]
pub(crate) struct Cli {
    /// Target container name
    #[arg(long, global = true, env = "SANDBOX_SESSION_CONTAINER")]
    pub(crate) container: Option<String>,

    /// Load SANDBOX_SESSION_* settings from this file (default: ./.env when present)
    #[arg(long = "env-file", global = true)]
    pub(crate) env_file: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub(crate) json: bool,

    /// Print detailed execution info
    #[arg(long, global = true)]
    pub(crate) verbose: bool,

    /// Colorize output: auto|always|never
    #[arg(long = "color", value_enum, global = true)]
    pub(crate) color: Option<sandbox_session::ColorMode>,

    #[command(subcommand)]
    pub(crate) command: Command,
}
