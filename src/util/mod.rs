#![allow(clippy::module_name_repetitions)]
//! Small utilities: shell escaping, id generation, clocks, local process execution.

pub mod clock;
pub mod exec;
pub mod id;
pub mod shell_script;

pub use shell_script::ShellScript;

/// Reject strings containing newline, carriage return, or NUL before embedding into a shell command.
///
/// Keep error text stable (tests/UX depend on it).
pub fn reject_newlines(s: &str, what: &str) -> Result<(), String> {
    if s.contains('\n') || s.contains('\r') || s.contains('\0') {
        Err(format!("refusing to use {what}: contains newline"))
    } else {
        Ok(())
    }
}

pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_escape(a))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:@".contains(c))
    {
        s.to_string()
    } else {
        let escaped = s.replace('\'', "'\"'\"'");
        format!("'{}'", escaped)
    }
}

/// Truncate a string for log lines without splitting a UTF-8 sequence.
pub fn preview(s: &str, max_chars: usize) -> String {
    let mut out: String = s.chars().take(max_chars).collect();
    if s.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
