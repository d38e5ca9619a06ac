//! `SandboxShell`: one sandbox, one executor, configuration defaults applied.

use crate::config::SessionConfig;
use crate::encoding::CommandEncoder;
use crate::errors::SessionError;
use crate::executor::{bash_argv, CommandResult, ContainerRef, RemoteExecutor};
use crate::session::{
    self, KillResult, ListResult, PollResult, StartOptions, StartResult, WaitOptions,
};
use crate::stream::{self, normalize_sync_timeout};
use crate::util::clock::{Clock, SystemClock};
use crate::util::{reject_newlines, shell_escape};

pub struct SandboxShell<E> {
    executor: E,
    target: ContainerRef,
    config: SessionConfig,
    encoder: CommandEncoder,
    clock: Box<dyn Clock>,
}

impl<E: RemoteExecutor> SandboxShell<E> {
    pub fn new(executor: E, target: ContainerRef, config: SessionConfig) -> Self {
        let encoder = config.encoder();
        Self {
            executor,
            target,
            config,
            encoder,
            clock: Box::new(SystemClock),
        }
    }

    /// Replace the clock used for waiting and stream deadlines.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn target(&self) -> &ContainerRef {
        &self.target
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run a shell command once.
    ///
    /// With `sync` the output is streamed back, waiting at most `timeout` seconds (bounded by
    /// the configured ceiling). Without it the command is started and the result carries the
    /// stream handle.
    pub fn bash(
        &self,
        command: &str,
        exec_dir: Option<&str>,
        sync: bool,
        timeout: Option<f64>,
    ) -> CommandResult {
        if command.trim().is_empty() {
            return SessionError::input("command is required").into();
        }
        let command = match exec_dir.filter(|d| !d.is_empty()) {
            Some(dir) => {
                if let Err(e) = reject_newlines(dir, "exec_dir") {
                    return SessionError::Input(e).into();
                }
                format!("cd {} && {}", shell_escape(dir), command)
            }
            None => command.to_string(),
        };
        let encoded = match self.encoder.encode(&command) {
            Ok(e) => e,
            Err(e) => return e.into(),
        };
        tracing::debug!(
            target = %self.target,
            compressed = encoded.compressed,
            sync,
            "bash"
        );
        self.exec_command(&bash_argv(&encoded.payload), sync, timeout)
    }

    /// Run `argv` as-is; without `sync` the command is started detached and not read.
    pub fn exec_command(&self, argv: &[String], sync: bool, timeout: Option<f64>) -> CommandResult {
        if let Err(e) = self.target.validate() {
            return e.into();
        }
        if argv.is_empty() || argv.iter().all(|a| a.is_empty()) {
            return SessionError::input("command is required").into();
        }
        if sync {
            return self.run_sync(argv, timeout);
        }
        let res = self.executor.exec_detached(&self.target, argv);
        if !res.success {
            return CommandResult {
                error_message: Some(format!("Failed to exec command: {}", res.error_text())),
                ..res
            };
        }
        res
    }

    pub fn run_sync(&self, argv: &[String], timeout: Option<f64>) -> CommandResult {
        let timeout = normalize_sync_timeout(timeout, self.config.sync_timeout);
        stream::run_sync(
            &self.executor,
            &self.target,
            argv,
            timeout,
            self.clock.as_ref(),
        )
    }

    /// Start `command` in a new session using configured prefixes and history limit.
    pub fn start(
        &self,
        command: &str,
        exec_dir: Option<&str>,
        session_id: Option<&str>,
    ) -> StartResult {
        self.launch(command, exec_dir, session_id).into()
    }

    pub fn start_with(&self, command: &str, opts: &StartOptions) -> StartResult {
        session::start(&self.executor, &self.encoder, &self.target, command, opts)
    }

    /// [`SandboxShell::start`] returning the typed error instead of a result record.
    pub fn launch(
        &self,
        command: &str,
        exec_dir: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<String, SessionError> {
        let opts = StartOptions {
            exec_dir: exec_dir.map(str::to_string),
            session_id: session_id.map(str::to_string),
            ..self.config.start_options()
        };
        session::launch(&self.executor, &self.encoder, &self.target, command, &opts)
    }

    pub fn poll(&self, session_id: &str) -> PollResult {
        self.poll_tail(session_id, self.config.tail_lines)
    }

    pub fn poll_tail(&self, session_id: &str, tail_lines: usize) -> PollResult {
        session::poll(
            &self.executor,
            &self.encoder,
            &self.target,
            session_id,
            tail_lines,
            &self.config.marker_prefix,
        )
    }

    /// Configured wait options; adjust and pass to [`SandboxShell::wait_with`].
    pub fn wait_options(&self) -> WaitOptions {
        self.config.wait_options()
    }

    pub fn wait(&self, session_id: &str) -> PollResult {
        self.wait_with(session_id, &self.wait_options())
    }

    pub fn wait_with(&self, session_id: &str, opts: &WaitOptions) -> PollResult {
        session::wait(
            &self.executor,
            &self.encoder,
            &self.target,
            session_id,
            opts,
            self.clock.as_ref(),
        )
    }

    pub fn kill(&self, session_id: &str) -> KillResult {
        session::kill(&self.executor, &self.encoder, &self.target, session_id)
    }

    pub fn list(&self) -> ListResult {
        session::list(&self.executor, &self.encoder, &self.target)
    }
}
