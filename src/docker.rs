#![allow(clippy::module_name_repetitions)]
//! Docker-backed executor: runs commands in a local container with `docker exec`.

use std::collections::HashMap;
use std::env;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use which::which;

use crate::executor::{
    CommandResult, ContainerRef, OutputStream, RemoteExecutor, StreamEvent, StreamHandle,
    StreamMessage,
};
use crate::util::exec::{ExecOutput, ExecRequest, ExecService};
use crate::util::shell_join;

/// Exit codes `docker exec` uses for its own failures (daemon error, not executable, not found).
const DOCKER_FAILURE_CODES: std::ops::RangeInclusive<i32> = 125..=127;

/// `docker exec -d` returns once the process is started.
const DETACH_TIMEOUT: Duration = Duration::from_secs(30);

const DAEMON_ERROR_MARKERS: &[&str] = &[
    "Error response from daemon",
    "Cannot connect to the Docker daemon",
];

/// Locate the docker CLI, honouring `SANDBOX_SESSION_DOCKER` and `SANDBOX_SESSION_SKIP_DOCKER=1`.
pub fn container_runtime_path() -> io::Result<PathBuf> {
    // Explicitly disabled, e.g. for tests on machines that do have docker
    if env::var("SANDBOX_SESSION_SKIP_DOCKER").ok().as_deref() == Some("1") {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Docker disabled by environment override.",
        ));
    }
    if let Some(p) = env::var_os("SANDBOX_SESSION_DOCKER").filter(|v| !v.is_empty()) {
        let p = PathBuf::from(p);
        if p.is_file() {
            return Ok(p);
        }
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("SANDBOX_SESSION_DOCKER points to missing file {}", p.display()),
        ));
    }
    if let Ok(p) = which("docker") {
        return Ok(p);
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        "Docker is required but was not found in PATH.",
    ))
}

/// [`RemoteExecutor`] over `docker exec`.
///
/// The target's container name is used when present, otherwise its sandbox id names the
/// container.
pub struct DockerExecutor {
    runtime: PathBuf,
    exec: ExecService,
    processes: Mutex<HashMap<String, Child>>,
    next_id: AtomicU64,
}

impl DockerExecutor {
    pub fn new() -> io::Result<Self> {
        Ok(Self::with_runtime(container_runtime_path()?))
    }

    pub fn with_runtime(runtime: impl Into<PathBuf>) -> Self {
        Self {
            runtime: runtime.into(),
            exec: ExecService::default(),
            processes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn runtime(&self) -> &Path {
        &self.runtime
    }

    fn request(&self, target: &ContainerRef, command: &[String], detached: bool) -> ExecRequest {
        let container = target
            .container
            .as_deref()
            .unwrap_or(target.sandbox_id.as_str());
        tracing::trace!(
            detached,
            "docker exec {} {}",
            container,
            crate::util::preview(&shell_join(command), 200)
        );
        let req = ExecRequest::new(&self.runtime).arg("exec");
        let req = if detached { req.arg("-d") } else { req };
        req.arg(container).args(command)
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, Child>> {
        self.processes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of spawned processes whose stream has not been opened yet.
    pub fn pending_streams(&self) -> usize {
        self.registry().len()
    }
}

/// Map a finished `docker exec` run to a result.
///
/// The remote command's own exit status does not decide success; only failures of docker
/// itself do.
pub(crate) fn classify_exec(out: ExecOutput, timeout: Duration) -> CommandResult {
    if out.timed_out {
        return CommandResult {
            output: out.stdout,
            ..CommandResult::failed(format!(
                "docker exec timed out after {:.1}s",
                timeout.as_secs_f64()
            ))
        };
    }
    let docker_failed = out.code.is_some_and(|c| DOCKER_FAILURE_CODES.contains(&c))
        || DAEMON_ERROR_MARKERS.iter().any(|m| out.stderr.contains(m));
    if docker_failed {
        let detail = out.stderr.trim();
        let msg = if detail.is_empty() {
            format!("docker exec failed with exit code {}", out.code.unwrap_or(-1))
        } else {
            detail.to_string()
        };
        return CommandResult {
            output: out.stdout,
            ..CommandResult::failed(msg)
        };
    }
    CommandResult::ok(out.stdout)
}

impl RemoteExecutor for DockerExecutor {
    fn exec_sync(
        &self,
        target: &ContainerRef,
        command: &[String],
        timeout: Option<Duration>,
    ) -> CommandResult {
        if let Err(e) = target.validate() {
            return e.into();
        }
        let timeout = timeout.unwrap_or(Duration::from_secs(30));
        match self.exec.run(self.request(target, command, false).timeout(timeout)) {
            Ok(out) => {
                tracing::debug!(
                    %target,
                    code = ?out.code,
                    timed_out = out.timed_out,
                    duration = ?out.duration,
                    "docker exec finished"
                );
                classify_exec(out, timeout)
            }
            Err(e) => {
                tracing::warn!(%target, error = %e, "docker exec failed to run");
                CommandResult::failed(format!("{e:#}"))
            }
        }
    }

    /// The child is owned by this executor until its stream is opened; unopened children are
    /// killed when the executor drops.
    fn exec_async(&self, target: &ContainerRef, command: &[String]) -> CommandResult {
        if let Err(e) = target.validate() {
            return e.into();
        }
        let req = self.request(target, command, false);
        match self.exec.spawn(&req) {
            Ok(child) => {
                let id = format!("proc-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
                tracing::debug!(%target, handle = %id, pid = child.id(), "docker exec spawned");
                self.registry().insert(id.clone(), child);
                CommandResult::streaming(StreamHandle::Process(id))
            }
            Err(e) => {
                tracing::warn!(%target, error = %e, "docker exec failed to spawn");
                CommandResult::failed(format!("{e:#}"))
            }
        }
    }

    /// `docker exec -d`: the daemon owns the process, so nothing is registered or killed on drop.
    fn exec_detached(&self, target: &ContainerRef, command: &[String]) -> CommandResult {
        if let Err(e) = target.validate() {
            return e.into();
        }
        let req = self
            .request(target, command, true)
            .timeout(DETACH_TIMEOUT);
        match self.exec.run(req) {
            Ok(out) => {
                tracing::debug!(%target, code = ?out.code, "docker exec detached");
                classify_exec(out, DETACH_TIMEOUT)
            }
            Err(e) => {
                tracing::warn!(%target, error = %e, "docker exec -d failed to run");
                CommandResult::failed(format!("{e:#}"))
            }
        }
    }

    fn open_stream(&self, handle: &StreamHandle) -> Result<Box<dyn OutputStream>> {
        match handle {
            StreamHandle::Process(id) => {
                let Some(child) = self.registry().remove(id) else {
                    bail!("unknown or already opened process stream {id}");
                };
                Ok(Box::new(ProcessStream::new(child)))
            }
            StreamHandle::WebSocket(url) => Ok(Box::new(crate::ws::WsStream::connect(url)?)),
        }
    }
}

impl Drop for DockerExecutor {
    fn drop(&mut self) {
        for (_, mut child) in self.registry().drain() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

enum Chunk {
    Line(String),
    Eof,
}

/// Output of a spawned process, stdout and stderr interleaved line by line.
pub struct ProcessStream {
    rx: Receiver<Chunk>,
    child: Option<Child>,
    open_pipes: usize,
}

impl ProcessStream {
    pub fn new(mut child: Child) -> Self {
        let (tx, rx) = mpsc::channel();
        let mut open_pipes = 0;
        if let Some(out) = child.stdout.take() {
            pump(out, tx.clone());
            open_pipes += 1;
        }
        if let Some(err) = child.stderr.take() {
            pump(err, tx.clone());
            open_pipes += 1;
        }
        Self {
            rx,
            child: Some(child),
            open_pipes,
        }
    }

    fn reap(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}

fn pump<R: Read + Send + 'static>(r: R, tx: Sender<Chunk>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(r);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(Chunk::Line(line)).is_err() {
                        return;
                    }
                }
            }
        }
        let _ = tx.send(Chunk::Eof);
    });
}

impl OutputStream for ProcessStream {
    fn recv(&mut self, wait: Duration) -> Result<StreamEvent> {
        loop {
            if self.open_pipes == 0 {
                if let Some(mut child) = self.child.take() {
                    let _ = child.wait();
                }
                return Ok(StreamEvent::Closed);
            }
            match self.rx.recv_timeout(wait) {
                Ok(Chunk::Line(l)) => return Ok(StreamEvent::Message(StreamMessage::Text(l))),
                Ok(Chunk::Eof) => self.open_pipes -= 1,
                Err(RecvTimeoutError::Timeout) => return Ok(StreamEvent::Idle),
                Err(RecvTimeoutError::Disconnected) => self.open_pipes = 0,
            }
        }
    }

    fn close(&mut self) {
        self.open_pipes = 0;
        self.reap();
    }
}

impl Drop for ProcessStream {
    fn drop(&mut self) {
        self.reap();
    }
}
