/*!
Test support helpers shared across integration tests.

- FakeSandbox: an in-memory RemoteExecutor that decodes the `bash -lc` payloads it receives
  and emulates the tmux commands the session protocol sends (launch, has-session,
  capture-pane, kill-session, list-sessions). Targets resolve like tmux does (a bare name
  also matches as a unique prefix; `=name` matches exactly) and the pane is 80 columns
  wide, wrapping longer lines unless the capture joins them with `-J`.
- Program: scripted behaviour for a session's command (output, exit marker, polls until done).
- FakeClock: a clock whose sleep only advances virtual time and records the requested waits.
- have_docker(): true when a docker CLI is usable for e2e tests.
*/
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sandbox_session::{
    decode_payload, Clock, CommandResult, ContainerRef, OutputStream, RemoteExecutor,
    StreamEvent, StreamHandle, StreamMessage,
};

/// Virtual time: `sleep` advances `now` instantly and is recorded.
#[derive(Clone)]
pub struct FakeClock {
    start: Instant,
    inner: Arc<Mutex<ClockState>>,
}

#[derive(Default)]
struct ClockState {
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            inner: Arc::new(Mutex::new(ClockState::default())),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.lock().unwrap().offset
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().unwrap().sleeps.clone()
    }

    pub fn advance(&self, d: Duration) {
        self.inner.lock().unwrap().offset += d;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + self.inner.lock().unwrap().offset
    }

    fn sleep(&self, d: Duration) {
        let mut st = self.inner.lock().unwrap();
        st.offset += d;
        st.sleeps.push(d);
    }
}

/// Scripted behaviour of a session's command.
#[derive(Debug, Clone)]
pub struct Program {
    pub lines: Vec<String>,
    /// Text printed after the marker once finished; `None` runs forever.
    pub exit_suffix: Option<String>,
    /// Number of captures after which the command counts as finished.
    pub done_after_polls: usize,
}

impl Program {
    pub fn finished(output: &str, code: i32) -> Self {
        Self::after(0, output, code)
    }

    pub fn after(polls: usize, output: &str, code: i32) -> Self {
        Self {
            lines: split_lines(output),
            exit_suffix: Some(code.to_string()),
            done_after_polls: polls,
        }
    }

    pub fn running(output: &str) -> Self {
        Self {
            lines: split_lines(output),
            exit_suffix: None,
            done_after_polls: 0,
        }
    }

    pub fn with_exit_suffix(mut self, suffix: &str) -> Self {
        self.exit_suffix = Some(suffix.to_string());
        self
    }
}

fn split_lines(s: &str) -> Vec<String> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.lines().map(str::to_string).collect()
    }
}

/// Default behaviour for commands without a registered program.
fn default_program(command: &str) -> Program {
    let cmd = command.trim();
    if let Some(code) = cmd.strip_prefix("exit ") {
        if let Ok(c) = code.trim().parse::<i32>() {
            return Program::finished("", c);
        }
    }
    if let Some(text) = cmd.strip_prefix("echo ") {
        if !text.contains(';') && !text.contains('&') {
            return Program::finished(text.trim_matches(|c| c == '"' || c == '\''), 0);
        }
    }
    Program::running("")
}

#[derive(Debug, Clone)]
pub struct FakeSession {
    pub command: String,
    pub marker: String,
    pub history_limit: usize,
    pub created: u64,
    pub captures: usize,
    pub program: Program,
}

/// One exec_sync call as seen by the sandbox.
#[derive(Debug, Clone)]
pub struct ExecCall {
    pub target: ContainerRef,
    pub argv: Vec<String>,
    /// Decoded script, when the payload used the encoded bash wrapper.
    pub script: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Default)]
struct SandboxState {
    sessions: HashMap<String, FakeSession>,
    programs: HashMap<String, Program>,
    calls: Vec<ExecCall>,
    async_calls: Vec<Vec<String>>,
    detached_calls: usize,
    streams: VecDeque<Vec<StreamEvent>>,
    open: HashMap<String, Vec<StreamEvent>>,
    next_stream: u64,
    next_created: u64,
    /// Fail every exec_sync whose script contains this text.
    fail_matching: Option<String>,
    /// Accept launches without creating the session.
    swallow_launch: bool,
    omit_stream_handle: bool,
    /// Replaces the output of every existence check, e.g. a shell error.
    check_output: Option<String>,
    kills: Vec<String>,
}

pub struct FakeSandbox {
    state: Mutex<SandboxState>,
    clock: Option<FakeClock>,
}

impl FakeSandbox {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SandboxState {
                next_created: 1_700_000_000,
                ..SandboxState::default()
            }),
            clock: None,
        }
    }

    /// Idle stream events advance this clock by the requested wait.
    pub fn with_clock(mut self, clock: FakeClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn program(&self, command: &str, program: Program) {
        self.state
            .lock()
            .unwrap()
            .programs
            .insert(command.to_string(), program);
    }

    /// Make every exec whose decoded script contains `needle` fail at the transport level.
    pub fn fail_when(&self, needle: &str) {
        self.state.lock().unwrap().fail_matching = Some(needle.to_string());
    }

    pub fn fail_everything(&self) {
        self.fail_when("");
    }

    pub fn heal(&self) {
        self.state.lock().unwrap().fail_matching = None;
    }

    pub fn swallow_launches(&self) {
        self.state.lock().unwrap().swallow_launch = true;
    }

    /// Answer every `tmux has-session` check with `output` instead of EXISTS/NOT_FOUND.
    pub fn answer_checks_with(&self, output: &str) {
        self.state.lock().unwrap().check_output = Some(output.to_string());
    }

    pub fn omit_stream_handles(&self) {
        self.state.lock().unwrap().omit_stream_handle = true;
    }

    pub fn queue_stream(&self, events: Vec<StreamEvent>) {
        self.state.lock().unwrap().streams.push_back(events);
    }

    pub fn session(&self, id: &str) -> Option<FakeSession> {
        self.state.lock().unwrap().sessions.get(id).cloned()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .sessions
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Create a session directly, as if another client had started it.
    pub fn insert_session(&self, id: &str, marker_prefix: &str, program: Program) {
        let mut st = self.state.lock().unwrap();
        let created = st.next_created;
        st.next_created += 1;
        st.sessions.insert(
            id.to_string(),
            FakeSession {
                command: String::new(),
                marker: format!("{marker_prefix}{id}__"),
                history_limit: 0,
                created,
                captures: 0,
                program,
            },
        );
    }

    /// External cleanup (e.g. a reaper) removing a session.
    pub fn remove_session(&self, id: &str) {
        self.state.lock().unwrap().sessions.remove(id);
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.calls().into_iter().filter_map(|c| c.script).collect()
    }

    pub fn async_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().async_calls.clone()
    }

    /// Number of exec_detached calls (each also shows up in `async_calls`).
    pub fn detached_calls(&self) -> usize {
        self.state.lock().unwrap().detached_calls
    }

    pub fn kills(&self) -> Vec<String> {
        self.state.lock().unwrap().kills.clone()
    }

    pub fn capture_count(&self) -> usize {
        self.scripts()
            .iter()
            .filter(|s| s.starts_with("tmux capture-pane"))
            .count()
    }
}

fn word_after<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let start = s.find(prefix)? + prefix.len();
    s[start..].split_whitespace().next()
}

/// Split a marker-wrapped command back into the user command and the marker text.
fn unwrap_marker(wrapped: &str) -> Option<(String, String)> {
    let body = wrapped.strip_prefix('(')?;
    let end = body.rfind(")\n__exit_code__=$?")?;
    let command = body[..end].to_string();
    let last = wrapped.lines().last()?;
    let marker = last
        .strip_prefix("echo \"")?
        .strip_suffix("$__exit_code__\"")?
        .to_string();
    Some((command, marker))
}

/// Session id and single-quoted payload of the `new-session` command.
fn parse_launch(script: &str) -> Option<(String, String)> {
    let prefix = "new-session -d -s ";
    let rest = &script[script.find(prefix)? + prefix.len()..];
    let (id, rest) = rest.split_once(' ')?;
    let payload = rest.strip_prefix('\'')?.split('\'').next()?;
    Some((id.to_string(), payload.to_string()))
}

/// Width of the emulated tmux pane.
pub const PANE_WIDTH: usize = 80;

/// Split `line` into pane rows the way a terminal wraps it.
fn wrap_line(line: &str) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(PANE_WIDTH)
        .map(|c| c.iter().collect())
        .collect()
}

/// Name a `-t` target refers to, without tmux's exact-match `=` prefix or a trailing `:`.
fn target_name(target: &str) -> &str {
    let t = target.strip_prefix('=').unwrap_or(target);
    t.strip_suffix(':').unwrap_or(t)
}

fn render_capture(sess: &FakeSession, tail: usize, joined: bool) -> String {
    let mut lines = sess.program.lines.clone();
    let done = sess.captures >= sess.program.done_after_polls;
    if let (true, Some(suffix)) = (done, sess.program.exit_suffix.as_ref()) {
        lines.push(String::new());
        lines.push(format!("{}{}", sess.marker, suffix));
        lines.push(String::new());
        lines.push(format!(
            "Pane is dead (status {suffix}, Thu Jan  1 00:00:00 2026)"
        ));
    }
    if !joined {
        lines = lines.iter().flat_map(|l| wrap_line(l)).collect();
    }
    let skip = lines.len().saturating_sub(tail);
    let mut out = lines[skip..].join("\n");
    out.push('\n');
    out
}

impl SandboxState {
    /// Resolve a session target: `=name` matches exactly; a bare name matches exactly or, failing
    /// that, as the prefix of exactly one session.
    fn resolve(&self, target: &str) -> Option<String> {
        let name = target_name(target);
        if self.sessions.contains_key(name) {
            return Some(name.to_string());
        }
        if target.starts_with('=') {
            return None;
        }
        let mut hits = self.sessions.keys().filter(|k| k.starts_with(name));
        match (hits.next(), hits.next()) {
            (Some(only), None) => Some(only.clone()),
            _ => None,
        }
    }

    fn run_script(&mut self, script: &str) -> CommandResult {
        if script.contains("new-session -d -s ") {
            return self.launch(script);
        }
        if script.starts_with("tmux has-session -t ") {
            if let Some(out) = &self.check_output {
                return CommandResult::ok(out.clone());
            }
            let target = word_after(script, "has-session -t ").unwrap_or_default();
            let token = if self.resolve(target).is_some() {
                "EXISTS"
            } else {
                "NOT_FOUND"
            };
            return CommandResult::ok(format!("{token}\n"));
        }
        if script.starts_with("tmux capture-pane -t ") {
            let target = word_after(script, "capture-pane -t ").unwrap_or_default();
            let tail = word_after(script, "tail -n ")
                .and_then(|n| n.parse().ok())
                .unwrap_or(usize::MAX);
            let joined = script.contains(" -J ");
            return match self
                .resolve(target)
                .and_then(|id| self.sessions.get_mut(&id))
            {
                Some(sess) => {
                    sess.captures += 1;
                    CommandResult::ok(render_capture(sess, tail, joined))
                }
                None => CommandResult::ok(""),
            };
        }
        if script.starts_with("tmux kill-session -t ") {
            let target = word_after(script, "kill-session -t ").unwrap_or_default();
            if let Some(id) = self.resolve(target) {
                self.sessions.remove(&id);
            }
            self.kills.push(target_name(target).to_string());
            return CommandResult::ok("");
        }
        if script.starts_with("tmux list-sessions") {
            let mut rows: Vec<(u64, &String)> =
                self.sessions.iter().map(|(id, s)| (s.created, id)).collect();
            rows.sort();
            let mut out: String = rows
                .iter()
                .map(|(created, id)| format!("{id}:{created}:0\n"))
                .collect();
            if out.is_empty() {
                out.push('\n');
            }
            return CommandResult::ok(out);
        }
        CommandResult::ok("")
    }

    fn launch(&mut self, script: &str) -> CommandResult {
        let Some((id, payload)) = parse_launch(script) else {
            return CommandResult::failed(format!("fake sandbox: malformed launch {script:?}"));
        };
        let guard = word_after(script, "has-session -t ").unwrap_or_default();
        if self.resolve(guard).is_some() {
            return CommandResult::ok("SESSION_EXISTS\n");
        }
        if self.sessions.contains_key(&id) {
            return CommandResult::failed(format!("duplicate session: {id}"));
        }
        if self.swallow_launch {
            return CommandResult::ok("");
        }
        let history_limit = word_after(script, "history-limit ")
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let Some((command, marker)) = decode_payload(&payload)
            .ok()
            .and_then(|w| unwrap_marker(&w))
        else {
            return CommandResult::failed(format!(
                "fake sandbox: undecodable launch payload {payload:?}"
            ));
        };
        let program = self
            .programs
            .get(&command)
            .cloned()
            .unwrap_or_else(|| default_program(&command));
        let created = self.next_created;
        self.next_created += 1;
        self.sessions.insert(
            id,
            FakeSession {
                command,
                marker,
                history_limit,
                created,
                captures: 0,
                program,
            },
        );
        CommandResult::ok("")
    }
}

impl RemoteExecutor for FakeSandbox {
    fn exec_sync(
        &self,
        target: &ContainerRef,
        command: &[String],
        timeout: Option<Duration>,
    ) -> CommandResult {
        let mut st = self.state.lock().unwrap();
        let script = match command {
            [bash, flag, payload] if bash == "bash" && flag == "-lc" => decode_payload(payload).ok(),
            _ => None,
        };
        st.calls.push(ExecCall {
            target: target.clone(),
            argv: command.to_vec(),
            script: script.clone(),
            timeout,
        });
        let text = script.unwrap_or_default();
        if let Some(needle) = st.fail_matching.as_deref() {
            if text.contains(needle) {
                return CommandResult::failed("fake sandbox: connection reset by peer");
            }
        }
        st.run_script(&text)
    }

    fn exec_async(&self, _target: &ContainerRef, command: &[String]) -> CommandResult {
        let mut st = self.state.lock().unwrap();
        st.async_calls.push(command.to_vec());
        if st.omit_stream_handle {
            return CommandResult::ok("");
        }
        st.next_stream += 1;
        let id = format!("fake-{}", st.next_stream);
        let events = st.streams.pop_front().unwrap_or_default();
        st.open.insert(id.clone(), events);
        CommandResult::streaming(StreamHandle::Process(id))
    }

    fn exec_detached(&self, target: &ContainerRef, command: &[String]) -> CommandResult {
        self.state.lock().unwrap().detached_calls += 1;
        self.exec_async(target, command)
    }

    fn open_stream(&self, handle: &StreamHandle) -> anyhow::Result<Box<dyn OutputStream>> {
        let StreamHandle::Process(id) = handle else {
            anyhow::bail!("fake sandbox only serves process streams");
        };
        let events = self
            .state
            .lock()
            .unwrap()
            .open
            .remove(id)
            .ok_or_else(|| anyhow::anyhow!("no such stream {id}"))?;
        Ok(Box::new(FakeStream {
            events: events.into(),
            clock: self.clock.clone(),
        }))
    }
}

/// Replays events; Idle advances the fake clock by the full wait, and an exhausted script
/// behaves like a silent, still-open channel when a clock is attached (else it closes).
struct FakeStream {
    events: VecDeque<StreamEvent>,
    clock: Option<FakeClock>,
}

impl OutputStream for FakeStream {
    fn recv(&mut self, wait: Duration) -> anyhow::Result<StreamEvent> {
        match self.events.pop_front() {
            Some(StreamEvent::Idle) => {
                if let Some(c) = &self.clock {
                    c.sleep(wait);
                }
                Ok(StreamEvent::Idle)
            }
            Some(e) => Ok(e),
            None => match &self.clock {
                Some(c) => {
                    c.sleep(wait);
                    Ok(StreamEvent::Idle)
                }
                None => Ok(StreamEvent::Closed),
            },
        }
    }

    fn close(&mut self) {
        self.events.clear();
    }
}

pub fn text(s: &str) -> StreamEvent {
    StreamEvent::Message(StreamMessage::Text(s.to_string()))
}

pub fn binary(b: &[u8]) -> StreamEvent {
    StreamEvent::Message(StreamMessage::Binary(b.to_vec()))
}

/// Return true if a docker CLI is found and the daemon answers.
pub fn have_docker() -> bool {
    match sandbox_session::container_runtime_path() {
        Ok(p) => std::process::Command::new(p)
            .arg("info")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false),
        Err(_) => false,
    }
}
