//! Non-blocking command execution inside remote sandboxes.
//!
//! Long-running commands are started in detached tmux sessions inside the sandbox, tagged with
//! a per-session completion marker, and observed later by polling or by a backoff waiter.
//! Short commands can instead be run synchronously by draining their live output stream.
//! Every operation is a shell payload sent through a [`RemoteExecutor`].

mod color;
pub mod client;
pub mod config;
pub mod docker;
pub mod encoding;
mod errors;
pub mod executor;
pub mod marker;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod util;
pub mod ws;

pub use client::SandboxShell;
pub use color::*;
pub use config::SessionConfig;
pub use docker::{container_runtime_path, DockerExecutor};
pub use encoding::{decode_payload, CommandEncoder, EncodedCommand};
pub use errors::*;
pub use executor::{
    bash_argv, CommandResult, ContainerRef, OutputStream, RemoteExecutor, StreamEvent,
    StreamHandle, StreamMessage,
};
pub use marker::{ExitCode, Marker};
pub use session::{
    KillResult, ListResult, PollResult, SessionInfo, SessionStatus, StartOptions, StartResult,
    WaitOptions,
};
pub use util::clock::{Clock, SystemClock};
