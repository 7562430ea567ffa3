//! # Kill Escalation
//!
//! File: cli/src/common/process/kill.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! Terminating a supervised process is a two-signal protocol:
//!
//! ```text
//! Running ──interrupt──► Signaled(graceful) ──exits──────────────────► Exited
//!                               └──grace period elapses──force_kill──► Exited
//! ```
//!
//! 1. Send the graceful interrupt. If that fails, the error is returned and
//!    nothing else is attempted.
//! 2. Poll the process for liveness every `poll_interval`.
//! 3. If it is gone before `grace` elapses, done. Otherwise stop polling, send
//!    one forceful kill and return without re-polling.
//!
//! ## Architecture
//!
//! - `Terminator`: the platform's termination capability. `SignalTerminator`
//!   sends SIGTERM / SIGKILL on unix; `TaskkillTerminator` shells out to
//!   `TASKKILL /F` on Windows, where graceful interruption is not available.
//!   `default_terminator()` picks one per build target.
//! - `KillEscalator`: the protocol above, parameterised by a terminator so tests
//!   can count the signals it sends.
//!
use super::state::{RunState, RunStateCell};
use crate::core::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default wait between the graceful and the forceful signal.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(10);
/// Default delay between two liveness checks.
pub const DEFAULT_KILL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Platform capability for terminating a process by id.
pub trait Terminator: Send + Sync {
    /// Graceful request the process may intercept.
    fn interrupt(&self, pid: u32) -> Result<()>;
    /// Request the process cannot intercept.
    fn force_kill(&self, pid: u32) -> Result<()>;
    /// Whether `pid` still resolves to a live process. May block; the
    /// escalator runs it on the blocking pool.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Terminator for the current build target.
pub fn default_terminator() -> Arc<dyn Terminator> {
    #[cfg(unix)]
    {
        Arc::new(SignalTerminator)
    }
    #[cfg(not(unix))]
    {
        Arc::new(TaskkillTerminator)
    }
}

#[cfg(unix)]
pub use self::unix::SignalTerminator;

#[cfg(unix)]
mod unix {
    use super::Terminator;
    use crate::core::error::{JobrunError, Result};
    use anyhow::anyhow;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use tracing::{debug, error};

    /// SIGTERM, then SIGKILL. Liveness is probed with signal 0.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SignalTerminator;

    impl SignalTerminator {
        fn send(&self, pid: u32, signal: Signal) -> Result<()> {
            debug!("[Process] Sending signal: {} to PID: {}", signal, pid);
            kill(Pid::from_raw(pid as i32), signal).map_err(|errno| {
                error!(
                    "[Process] Failed to send signal: {} to PID: {} ({})",
                    signal, pid, errno
                );
                anyhow!(JobrunError::Signal {
                    signal: signal.to_string(),
                    pid,
                    reason: errno.desc().to_string(),
                })
            })
        }
    }

    impl Terminator for SignalTerminator {
        fn interrupt(&self, pid: u32) -> Result<()> {
            self.send(pid, Signal::SIGTERM)
        }

        fn force_kill(&self, pid: u32) -> Result<()> {
            self.send(pid, Signal::SIGKILL)
        }

        fn is_alive(&self, pid: u32) -> bool {
            kill(Pid::from_raw(pid as i32), None).is_ok()
        }
    }
}

/// Forceful `TASKKILL` for both steps; Windows has no graceful interrupt to send.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskkillTerminator;

impl TaskkillTerminator {
    fn taskkill(&self, pid: u32) -> Result<()> {
        use crate::core::error::JobrunError;
        use anyhow::anyhow;

        debug!("[Process] Running TASKKILL /F on PID: {}", pid);
        let status = std::process::Command::new("CMD")
            .args(["/C", "TASKKILL", "/F", "/PID", &pid.to_string()])
            .status()
            .map_err(|e| {
                anyhow!(JobrunError::Signal {
                    signal: "TASKKILL".into(),
                    pid,
                    reason: e.to_string(),
                })
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(anyhow!(JobrunError::Signal {
                signal: "TASKKILL".into(),
                pid,
                reason: format!("TASKKILL exited with {}", status),
            }))
        }
    }
}

impl Terminator for TaskkillTerminator {
    fn interrupt(&self, pid: u32) -> Result<()> {
        self.taskkill(pid)
    }

    fn force_kill(&self, pid: u32) -> Result<()> {
        self.taskkill(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        std::process::Command::new("CMD")
            .args(["/C", "TASKLIST", "/NH", "/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}

/// Runs the interrupt → poll → force protocol against one pid.
#[derive(Clone)]
pub struct KillEscalator {
    terminator: Arc<dyn Terminator>,
    grace: Duration,
    poll_interval: Duration,
}

impl KillEscalator {
    pub fn new(terminator: Arc<dyn Terminator>, grace: Duration, poll_interval: Duration) -> Self {
        Self {
            terminator,
            grace,
            poll_interval,
        }
    }

    /// Terminates `pid`. `state` is the supervisor's view of the process; once
    /// it reports `Exited` the watcher stops even if the pid is still visible.
    #[instrument(skip(self, state))]
    pub async fn kill(&self, pid: u32, state: &RunStateCell) -> Result<()> {
        self.terminator.interrupt(pid)?;

        let watcher = async {
            loop {
                debug!("[Process] Checking to see if PID: {} is still alive", pid);
                if state.load() == RunState::Exited || !self.probe_alive(pid).await {
                    debug!("[Process] Process with PID: {} has exited.", pid);
                    return;
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.grace, watcher).await {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!(
                    "[Process] PID: {} still alive after {:?}, sending forceful kill",
                    pid, self.grace
                );
                self.terminator.force_kill(pid)?;
                info!("[Process] Forcefully killed PID: {}", pid);
                Ok(())
            }
        }
    }

    async fn probe_alive(&self, pid: u32) -> bool {
        let terminator = self.terminator.clone();
        match tokio::task::spawn_blocking(move || terminator.is_alive(pid)).await {
            Ok(alive) => alive,
            Err(e) => {
                warn!("[Process] Liveness check for PID: {} failed: {}", pid, e);
                true
            }
        }
    }
}
