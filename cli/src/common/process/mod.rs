//! # jobrun Process Supervisor (`common::process`)
//!
//! File: cli/src/common/process/mod.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! `Process` runs one user-supplied command and supervises it until it exits.
//! It captures stdout and stderr as a single live, line-oriented stream,
//! optionally timestamps each line, fans selected lines out to a callback, and
//! can terminate the child with an escalating signal protocol.
//!
//! ## Architecture
//!
//! `start` drives the whole run:
//!
//! 1. Tokenize the command (`tokenize`) and build the child with the ambient
//!    environment overlaid by the configured one.
//! 2. Spawn the child on a PTY (`pty`) or on one OS pipe shared by stdout and
//!    stderr. On failure the exit status is forced to `"1"`.
//! 3. Flip the run state to `Running`, record the pid and open the
//!    `StartedGate` (`state`).
//! 4. Run the `LineProcessor` (`lines`) over the output, writing into the
//!    `OutputBuffer` (`output`). In PTY mode a copy task first pumps the
//!    terminal into an in-process line pipe.
//! 5. Wait for the child. This is the single point where the process is
//!    considered finished. Close the pipe write end, flip the state to
//!    `Exited` and translate the wait result (`exit_status`).
//! 6. Drain the background tasks with a ceiling (`wait_group`). Expiry is
//!    logged and never turns into an error.
//!
//! `kill` runs the interrupt → poll → force protocol (`kill`) and may be called
//! from any task while `start` is in flight.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use jobrun::common::process::Process;
//! use std::sync::Arc;
//!
//! # async fn run() -> jobrun::core::error::Result<()> {
//! let process = Arc::new(
//!     Process::new("sh -c 'echo building; exit 0'")
//!         .env("CI", "true")
//!         .timestamps(true)
//!         .line_filter(|line| line.starts_with("--- "))
//!         .line_callback(|line| println!("section: {}", line)),
//! );
//!
//! let runner = tokio::spawn({
//!     let process = process.clone();
//!     async move { process.start().await }
//! });
//! process.wait_started().await;
//! println!("running as PID {:?}", process.pid());
//!
//! runner.await??;
//! println!("{}", process.output());
//! assert_eq!(process.exit_status().as_deref(), Some("0"));
//! # Ok(())
//! # }
//! ```
//!

pub mod exit_status;
pub mod kill;
pub mod lines;
pub mod output;
pub mod pty;
pub mod state;
pub mod tokenize;
pub mod wait_group;

use crate::core::error::{JobrunError, Result};
use anyhow::anyhow;
use kill::{default_terminator, KillEscalator, Terminator};
use lines::{LineCallback, LineFilter, LinePreprocessor, LineProcessor};
use once_cell::sync::OnceCell;
use output::OutputBuffer;
use state::{RunState, RunStateCell, StartedGate};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};
use wait_group::BoundedWaitGroup;

/// Default ceiling for draining the copy and scan tasks after the child exits.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the in-process pipe between the PTY copy task and the scanner.
const LINE_PIPE_CAPACITY: usize = 64 * 1024;

type OutputReader = Box<dyn AsyncRead + Send + Unpin>;

/// Time bounds for one supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTimeouts {
    /// Ceiling for the post-exit drain of background tasks.
    pub drain: Duration,
    /// Time between the graceful and the forceful signal in `kill`.
    pub kill_grace: Duration,
    /// Liveness polling interval in `kill`.
    pub kill_poll_interval: Duration,
}

impl Default for ProcessTimeouts {
    fn default() -> Self {
        Self {
            drain: DEFAULT_DRAIN_TIMEOUT,
            kill_grace: kill::DEFAULT_KILL_GRACE,
            kill_poll_interval: kill::DEFAULT_KILL_POLL_INTERVAL,
        }
    }
}

/// A supervised external process.
///
/// Configure it with the builder methods, wrap it in an `Arc` and call
/// `start`. Every other method can be called concurrently from other tasks.
pub struct Process {
    command: String,
    env: Vec<(String, String)>,
    pty: bool,
    timestamps: bool,
    preprocessor: LinePreprocessor,
    filter: LineFilter,
    callback: Option<LineCallback>,
    timeouts: ProcessTimeouts,
    terminator: Arc<dyn Terminator>,

    start_called: AtomicBool,
    pid: AtomicU32,
    state: RunStateCell,
    started: StartedGate,
    exit_status: OnceCell<String>,
    output: Arc<OutputBuffer>,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("command", &self.command)
            .field("pty", &self.pty)
            .field("timestamps", &self.timestamps)
            .field("pid", &self.pid())
            .field("state", &self.state.load())
            .field("exit_status", &self.exit_status())
            .finish_non_exhaustive()
    }
}

impl Process {
    /// A process for `command`, tokenized with shell quoting rules at start.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: Vec::new(),
            pty: false,
            timestamps: false,
            preprocessor: Arc::new(|line: &str| line.to_string()),
            filter: Arc::new(|_: &str| false),
            callback: None,
            timeouts: ProcessTimeouts::default(),
            terminator: default_terminator(),
            start_called: AtomicBool::new(false),
            pid: AtomicU32::new(0),
            state: RunStateCell::default(),
            started: StartedGate::default(),
            exit_status: OnceCell::new(),
            output: Arc::new(OutputBuffer::new()),
        }
    }

    /// Adds one variable to the environment overlay. Overlay entries win over
    /// the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Run the child attached to a pseudo-terminal instead of a pipe.
    pub fn pty(mut self, enabled: bool) -> Self {
        self.pty = enabled;
        self
    }

    /// Prefix lines with an RFC3339 UTC timestamp.
    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    pub fn line_preprocessor<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.preprocessor = Arc::new(f);
        self
    }

    pub fn line_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.filter = Arc::new(f);
        self
    }

    pub fn line_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(f));
        self
    }

    pub fn timeouts(mut self, timeouts: ProcessTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Replaces the platform terminator used by `kill`.
    pub fn terminator(mut self, terminator: Arc<dyn Terminator>) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Child pid, once it has been spawned.
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Final exit status, once the child's wait has returned (or `"1"` after a
    /// failed spawn).
    pub fn exit_status(&self) -> Option<String> {
        self.exit_status.get().cloned()
    }

    pub fn run_state(&self) -> RunState {
        self.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Snapshot of the output collected so far.
    pub fn output(&self) -> String {
        self.output.snapshot()
    }

    /// Output appended after the first `offset` bytes.
    pub fn output_from(&self, offset: usize) -> String {
        self.output.snapshot_from(offset)
    }

    /// Resolves once the child has been spawned. Also resolves if `start`
    /// failed, so observers never hang on a process that will not run.
    pub async fn wait_started(&self) {
        self.started.wait(&self.state).await;
    }

    /// Runs the process to completion.
    ///
    /// Returns `Ok(())` once the child has exited, whatever its exit code;
    /// read the code from `exit_status`. Errors are returned only when the
    /// command cannot be tokenized or the child cannot be spawned.
    #[instrument(skip(self), fields(command = %self.command, pty = self.pty))]
    pub async fn start(&self) -> Result<()> {
        if self.start_called.swap(true, Ordering::AcqRel) {
            return Err(anyhow!(JobrunError::AlreadyStarted));
        }

        let argv = match tokenize::tokenize(&self.command) {
            Ok(argv) => argv,
            Err(e) => {
                self.abandon();
                return Err(e);
            }
        };

        let mut command = Command::new(&argv.program);
        command.args(&argv.args).envs(self.env.iter().cloned());

        let mut background = BoundedWaitGroup::new();
        let spawned = if self.pty {
            self.spawn_pty(&mut command, &mut background)
        } else {
            self.spawn_piped(&mut command)
        };
        let (mut child, reader) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                let _ = self
                    .exit_status
                    .set(exit_status::SPAWN_FAILED_EXIT_STATUS.to_string());
                self.abandon();
                return Err(e.context(format!("Failed to start '{}'", self.command)));
            }
        };

        // Running first: a visible pid implies the state has left NotStarted.
        self.state.mark_running();
        if let Some(pid) = child.id() {
            self.pid.store(pid, Ordering::Release);
        }
        info!("[Process] Process is running with PID: {:?}", self.pid());
        self.started.open();

        let processor = LineProcessor::new(
            self.output.clone(),
            self.timestamps,
            self.preprocessor.clone(),
            self.filter.clone(),
            self.callback.clone(),
        );
        background.spawn(processor.run(reader));

        let wait_result = child.wait().await;

        // The Command owns the pipe write end / PTY slave; dropping it lets the
        // reader see end-of-file once the child's own copies are gone.
        drop(command);

        self.state.mark_exited();
        let status = exit_status::translate(&wait_result);
        let _ = self.exit_status.set(status.clone());
        info!(
            "Process with PID: {:?} finished with Exit Status: {}",
            self.pid(),
            status
        );

        debug!("[Process] Waiting for routines to finish");
        if let Err(e) = background.wait_timeout(self.timeouts.drain).await {
            warn!("[Process] {}", e);
        }

        Ok(())
    }

    /// Terminates the child: graceful signal, poll, then a forceful signal if
    /// it is still alive after the grace period.
    ///
    /// Does nothing when there is no running child to signal.
    pub async fn kill(&self) -> Result<()> {
        let Some(pid) = self.pid() else {
            debug!("[Process] No process to signal yet");
            return Ok(());
        };
        if !self.is_running() {
            debug!("[Process] PID: {} is no longer running, not signalling", pid);
            return Ok(());
        }

        KillEscalator::new(
            self.terminator.clone(),
            self.timeouts.kill_grace,
            self.timeouts.kill_poll_interval,
        )
        .kill(pid, &self.state)
        .await
    }

    /// Marks a run that never produced a child as terminal and releases
    /// anyone waiting for it to start.
    fn abandon(&self) {
        self.state.mark_exited();
        self.started.open();
    }

    fn spawn_piped(&self, command: &mut Command) -> Result<(tokio::process::Child, OutputReader)> {
        let (reader, writer) = std::io::pipe().map_err(|source| {
            anyhow!(JobrunError::Spawn {
                program: self.command.clone(),
                source,
            })
        })?;
        let stderr = writer.try_clone().map_err(|source| {
            anyhow!(JobrunError::Spawn {
                program: self.command.clone(),
                source,
            })
        })?;

        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(stderr));

        let child = command.spawn().map_err(|source| {
            anyhow!(JobrunError::Spawn {
                program: self.command.clone(),
                source,
            })
        })?;
        let reader = async_pipe_reader(reader).map_err(|source| {
            anyhow!(JobrunError::Spawn {
                program: self.command.clone(),
                source,
            })
        })?;
        Ok((child, reader))
    }

    fn spawn_pty(
        &self,
        command: &mut Command,
        background: &mut BoundedWaitGroup,
    ) -> Result<(tokio::process::Child, OutputReader)> {
        let mut master = pty::attach(command)?;
        let child = command.spawn().map_err(|source| {
            anyhow!(JobrunError::Spawn {
                program: self.command.clone(),
                source,
            })
        })?;

        let (mut line_writer, line_reader) = tokio::io::duplex(LINE_PIPE_CAPACITY);
        background.spawn(async move {
            debug!("[Process] Starting to copy PTY to the buffer");
            match tokio::io::copy(&mut master, &mut line_writer).await {
                Ok(_) => debug!("[Process] PTY has finished being copied to the buffer"),
                Err(e) if pty::is_closed_terminal(&e) => {
                    debug!("[Process] PTY has finished being copied to the buffer")
                }
                Err(e) => error!("[Process] PTY output copy failed with error: {}", e),
            }
            let _ = line_writer.shutdown().await;
        });

        Ok((child, Box::new(line_reader)))
    }
}

#[cfg(unix)]
fn async_pipe_reader(reader: std::io::PipeReader) -> std::io::Result<OutputReader> {
    use std::os::fd::OwnedFd;
    let receiver = tokio::net::unix::pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
    Ok(Box::new(receiver))
}

#[cfg(windows)]
fn async_pipe_reader(reader: std::io::PipeReader) -> std::io::Result<OutputReader> {
    use std::os::windows::io::OwnedHandle;
    let file = std::fs::File::from(OwnedHandle::from(reader));
    Ok(Box::new(tokio::fs::File::from_std(file)))
}

#[cfg(test)]
mod tests {
    use super::kill::tests::SpyTerminator;
    use super::*;
    use std::sync::atomic::Ordering;

    fn quick_timeouts() -> ProcessTimeouts {
        ProcessTimeouts {
            drain: Duration::from_secs(5),
            kill_grace: Duration::from_millis(300),
            kill_poll_interval: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_defaults() {
        let process = Process::new("true");
        assert_eq!(process.command(), "true");
        assert_eq!(process.pid(), None);
        assert_eq!(process.exit_status(), None);
        assert_eq!(process.run_state(), RunState::NotStarted);
        assert!(!process.is_running());
        assert_eq!(process.output(), "");
        assert_eq!(process.timeouts, ProcessTimeouts::default());
        assert_eq!(process.timeouts.drain, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_kill_before_start_is_a_no_op() {
        let spy = Arc::new(SpyTerminator::new(true));
        let process = Process::new("true").terminator(spy.clone());
        process.kill().await.unwrap();
        assert_eq!(spy.interrupts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let process = Process::new("true");
        process.start().await.unwrap();
        let err = process.start().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<JobrunError>(),
            Some(JobrunError::AlreadyStarted)
        ));
        assert_eq!(process.exit_status().as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_tokenize_failure_leaves_status_unset_and_releases_waiters() {
        let process = Process::new("echo 'unbalanced");
        let err = process.start().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<JobrunError>(),
            Some(JobrunError::Tokenize { .. })
        ));
        assert_eq!(process.exit_status(), None);
        assert_eq!(process.pid(), None);
        tokio::time::timeout(Duration::from_secs(1), process.wait_started())
            .await
            .expect("wait_started must not hang after a failed start");
    }

    #[tokio::test]
    async fn test_spawn_failure_sets_status_one() {
        let process = Process::new("/definitely/not/a/real/binary --flag");
        let err = process.start().await.unwrap_err();
        assert!(err
            .chain()
            .any(|cause| matches!(cause.downcast_ref::<JobrunError>(), Some(JobrunError::Spawn { .. }))));
        assert_eq!(process.exit_status().as_deref(), Some("1"));
        assert!(!process.is_running());
        assert_eq!(process.run_state(), RunState::Exited);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pid_is_never_visible_before_running() {
        for _ in 0..20 {
            let process = Arc::new(Process::new("true"));
            let observer = tokio::spawn({
                let process = process.clone();
                async move {
                    loop {
                        let pid = process.pid();
                        let state = process.run_state();
                        if pid.is_some() {
                            assert!(state.has_started(), "pid {:?} seen in {:?}", pid, state);
                            return;
                        }
                        if state == RunState::Exited {
                            return;
                        }
                        tokio::task::yield_now().await;
                    }
                }
            });
            process.start().await.unwrap();
            observer.await.unwrap();
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_kill_uses_injected_terminator() {
        let spy = Arc::new(SpyTerminator::new(false));
        let process = Arc::new(
            Process::new("sleep 30")
                .terminator(spy.clone())
                .timeouts(quick_timeouts()),
        );
        let runner = tokio::spawn({
            let process = process.clone();
            async move { process.start().await }
        });
        process.wait_started().await;

        // The spy never delivers a real signal, so the fake process ignores the
        // interrupt and the escalation fires once.
        process.kill().await.unwrap();
        assert_eq!(spy.interrupts.load(Ordering::SeqCst), 1);
        assert_eq!(spy.forces.load(Ordering::SeqCst), 1);

        // Clean up the real child.
        kill::default_terminator()
            .force_kill(process.pid().unwrap())
            .unwrap();
        runner.await.unwrap().unwrap();
        assert!(!process.is_running());
    }
}
