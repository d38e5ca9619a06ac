use std::ffi::OsString;
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use wait_timeout::ChildExt;

/// Local process execution with timeouts, used to drive the container runtime.
#[derive(Debug, Clone)]
pub struct ExecService {
    default_timeout: Duration,
}

impl ExecService {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Run a process to completion, capturing stdout/stderr.
    ///
    /// A timeout is not an error: the child is killed and `timed_out` is set so callers can
    /// report it as a transport failure with whatever output was produced.
    pub fn run(&self, request: ExecRequest) -> Result<ExecOutput> {
        let mut child = self.spawn(&request)?;

        // Drain pipes on helper threads so a chatty child cannot block on a full pipe.
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();
        let (code, timed_out) = if timeout.is_zero() {
            let st = child.wait().context("failed to wait for process")?;
            (st.code(), false)
        } else {
            match child
                .wait_timeout(timeout)
                .context("failed to wait with timeout")?
            {
                Some(st) => (st.code(), false),
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    (None, true)
                }
            }
        };

        let duration = started.elapsed();
        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);

        Ok(ExecOutput {
            code,
            timed_out,
            duration,
            stdout,
            stderr,
        })
    }

    /// Spawn a process with piped stdout/stderr and return it without waiting.
    pub fn spawn(&self, request: &ExecRequest) -> Result<Child> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.spawn().with_context(|| {
            format!(
                "failed to spawn {:?} with args {:?}",
                request.program, request.args
            )
        })
    }
}

impl Default for ExecService {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut r: R) -> thread::JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        r.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_reader(h: Option<thread::JoinHandle<io::Result<Vec<u8>>>>) -> String {
    h.and_then(|h| h.join().ok())
        .and_then(|r| r.ok())
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Default, Clone)]
pub struct ExecRequest {
    program: OsString,
    args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl ExecRequest {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug)]
pub struct ExecOutput {
    /// Exit code; `None` when killed by a signal or by the timeout.
    pub code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
}
