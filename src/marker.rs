//! Completion marker protocol.
//!
//! A session's command is wrapped so that, after it finishes, the shell prints an empty line
//! followed by `<prefix><session_id>__<exit code>`. The poller detects completion by finding
//! that line in the captured pane output.

/// Default marker prefix; the session id and a trailing `__` are appended per session.
pub const DEFAULT_MARKER_PREFIX: &str = "__SBX_EXIT_CODE_";

/// Lines tmux prints into a pane whose process exited while `remain-on-exit` is on.
const PANE_DEAD_PREFIX: &str = "Pane is dead";

/// Exit status carried by a marker line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Exited(i32),
    /// The marker was present but its suffix did not parse; the command did finish.
    Unknown,
}

impl ExitCode {
    /// Numeric form used in results: `-1` for [`ExitCode::Unknown`].
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Exited(c) => c,
            ExitCode::Unknown => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    text: String,
}

impl Marker {
    pub fn for_session(prefix: &str, session_id: &str) -> Self {
        Self {
            text: format!("{prefix}{session_id}__"),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Wrap `command` so the marker and exit code are printed however the command ends.
    ///
    /// The subshell keeps an `exit` inside the command from terminating the wrapper.
    pub fn wrap(&self, command: &str) -> String {
        format!(
            "({command})\n__exit_code__=$?\necho \"\"\necho \"{}$__exit_code__\"",
            self.text
        )
    }

    /// Parse the exit code from a single line, if it carries this marker.
    pub fn parse_line(&self, line: &str) -> Option<ExitCode> {
        let idx = line.rfind(self.text.as_str())?;
        let suffix = line[idx + self.text.len()..].trim();
        Some(match suffix.parse::<i32>() {
            Ok(c) => ExitCode::Exited(c),
            Err(_) => ExitCode::Unknown,
        })
    }

    /// Scan captured pane text for the marker.
    ///
    /// Returns `None` when the marker is absent. Otherwise the marker line and any
    /// "Pane is dead" lines are removed, trailing blank lines are dropped, and the
    /// remaining text is returned with the exit code.
    pub fn scan(&self, captured: &str) -> Option<Completion> {
        let mut exit_code = None;
        let mut lines: Vec<&str> = Vec::new();
        for line in captured.split('\n') {
            if let Some(code) = self.parse_line(line) {
                if exit_code.is_none() {
                    exit_code = Some(code);
                }
            } else if !line.starts_with(PANE_DEAD_PREFIX) {
                lines.push(line);
            }
        }
        let exit_code = exit_code?;
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        Some(Completion {
            exit_code,
            output: lines.join("\n"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub exit_code: ExitCode,
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(id: &str) -> Marker {
        Marker::for_session(DEFAULT_MARKER_PREFIX, id)
    }

    #[test]
    fn wrap_runs_command_in_subshell_and_echoes_marker() {
        let w = marker("sbx_1").wrap("exit 7");
        assert_eq!(
            w,
            "(exit 7)\n__exit_code__=$?\necho \"\"\necho \"__SBX_EXIT_CODE_sbx_1__$__exit_code__\""
        );
    }

    #[test]
    fn scan_extracts_output_and_code() {
        let m = marker("abc");
        let captured = "hi\n\n__SBX_EXIT_CODE_abc__0\n\nPane is dead (status 0, Tue Jan  1 00:00:00 2030)\n";
        let c = m.scan(captured).unwrap();
        assert_eq!(c.exit_code, ExitCode::Exited(0));
        assert_eq!(c.output, "hi");
    }

    #[test]
    fn scan_without_marker_is_none() {
        assert!(marker("abc").scan("still going\n").is_none());
    }

    #[test]
    fn unparseable_code_is_unknown() {
        let m = marker("abc");
        let c = m.scan("out\n__SBX_EXIT_CODE_abc__oops\n").unwrap();
        assert_eq!(c.exit_code, ExitCode::Unknown);
        assert_eq!(c.exit_code.code(), -1);
        assert_eq!(c.output, "out");
    }

    #[test]
    fn negative_and_large_codes_parse() {
        let m = marker("x");
        assert_eq!(m.parse_line("__SBX_EXIT_CODE_x__255"), Some(ExitCode::Exited(255)));
        assert_eq!(m.parse_line("  __SBX_EXIT_CODE_x__-3  "), Some(ExitCode::Exited(-3)));
        assert_eq!(m.parse_line("unrelated"), None);
    }

    #[test]
    fn markers_of_distinct_sessions_do_not_match_each_other() {
        let a = marker("job-1");
        let b = marker("job-10");
        assert_ne!(a.as_str(), b.as_str());
        assert!(!b.as_str().contains(a.as_str()));
        assert!(a.scan("__SBX_EXIT_CODE_job-10__0").is_none());
        assert!(b.scan("__SBX_EXIT_CODE_job-1__0").is_none());
    }

    #[test]
    fn empty_output_after_exit() {
        let c = marker("s").scan("\n__SBX_EXIT_CODE_s__7\n").unwrap();
        assert_eq!(c.exit_code, ExitCode::Exited(7));
        assert_eq!(c.output, "");
    }
}
