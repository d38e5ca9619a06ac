//! Error mapping guide:
//! - Input errors are rejected before any remote call and map to exit code 2.
//! - A missing runtime binary (io::ErrorKind::NotFound) maps to 127; everything else to 1.
//! - Session operations report expected failures as result values; `SessionError` is for
//!   validation and for the few environment failures that must abort a call.
use std::fmt;
use std::io;

/// Errors raised while validating or preparing a sandbox command.
#[derive(Debug)]
pub enum SessionError {
    /// Caller supplied a missing or malformed argument (empty command, bad session id, ...).
    Input(String),
    /// The remote exec call itself failed.
    Transport(String),
    /// The sandbox answered, but not in the shape the session protocol expects.
    Protocol(String),
    Io(io::Error),
}

impl SessionError {
    pub fn input(msg: impl Into<String>) -> Self {
        SessionError::Input(msg.into())
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Input(s) | SessionError::Transport(s) | SessionError::Protocol(s) => {
                f.write_str(s)
            }
            SessionError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Io(e)
    }
}

/// Map an io::Error to a process exit code:
/// - 127 for NotFound (runtime binary not found)
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        1
    }
}

/// Convert SessionError to a CLI exit code (parity with io::Error mapping).
pub fn exit_code_for_session_error(e: &SessionError) -> u8 {
    match e {
        SessionError::Io(ioe) => exit_code_for_io_error(ioe),
        SessionError::Input(_) => 2,
        SessionError::Transport(_) | SessionError::Protocol(_) => 1,
    }
}
