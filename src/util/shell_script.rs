use std::io;

/// Builder for the one-line control scripts sent to the sandbox (`bash -lc <script>`).
///
/// Invariants:
/// - Fragments must not contain `\n` or `\r`; multi-line user commands travel base64-encoded instead.
/// - Fragments are joined with `; ` so each runs regardless of the previous exit status.
#[derive(Debug, Default)]
pub struct ShellScript {
    parts: Vec<String>,
}

impl ShellScript {
    pub fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// Push a raw fragment verbatim.
    pub fn push(&mut self, cmd: impl Into<String>) -> &mut Self {
        self.parts.push(cmd.into());
        self
    }

    pub fn build(&self) -> io::Result<String> {
        for (i, p) in self.parts.iter().enumerate() {
            if p.contains('\n') || p.contains('\r') {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("shell script fragment {i} contains a newline; use atomic fragments"),
                ));
            }
        }
        let out = self.parts.join("; ");
        debug_assert!(!out.contains('\n') && !out.contains('\r'));
        Ok(out)
    }
}
