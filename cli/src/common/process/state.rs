//! # Run State and Started Gate
//!
//! File: cli/src/common/process/state.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! The running flag is the one piece of process state that every task reads and
//! only the supervisor writes. It is stored as an atomic tri-state
//! (`NotStarted`, `Running`, `Exited`) and moves strictly forward:
//!
//! ```text
//! NotStarted ──► Running ──► Exited
//!      └─────────────────────────▲   (spawn/tokenize failure)
//! ```
//!
//! `StartedGate` lets any number of observers wait for the process to leave
//! `NotStarted`. It is the async counterpart of a condition variable: a waiter
//! registers interest, re-checks the predicate, and only then suspends, so a
//! broadcast that lands between the check and the suspend is never lost.
//!
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Notify;
use tracing::trace;

/// Lifecycle position of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    NotStarted = 0,
    Running = 1,
    Exited = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::NotStarted,
            1 => RunState::Running,
            _ => RunState::Exited,
        }
    }

    /// True once the process has been spawned or has reached a terminal state.
    pub fn has_started(self) -> bool {
        self != RunState::NotStarted
    }
}

/// Atomic cell holding a `RunState`. Transitions use compare-and-swap so the
/// state can never move backwards.
#[derive(Debug)]
pub struct RunStateCell(AtomicU8);

impl Default for RunStateCell {
    fn default() -> Self {
        Self(AtomicU8::new(RunState::NotStarted as u8))
    }
}

impl RunStateCell {
    pub fn load(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.load() == RunState::Running
    }

    /// `NotStarted → Running`. Returns false if the cell was anywhere else.
    pub fn mark_running(&self) -> bool {
        self.transition(RunState::NotStarted, RunState::Running)
    }

    /// `Running → Exited`, or `NotStarted → Exited` when the process never ran.
    pub fn mark_exited(&self) -> bool {
        self.transition(RunState::Running, RunState::Exited)
            || self.transition(RunState::NotStarted, RunState::Exited)
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        let swapped = self
            .0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            trace!("Run state {:?} -> {:?}", from, to);
        }
        swapped
    }
}

/// Broadcast point for "the process has started".
#[derive(Debug, Default)]
pub struct StartedGate {
    notify: Notify,
}

impl StartedGate {
    /// Wakes every current waiter. Must be called after the state has been
    /// moved out of `NotStarted`.
    pub fn open(&self) {
        self.notify.notify_waiters();
    }

    /// Suspends until `state` reports `has_started()`.
    pub async fn wait(&self, state: &RunStateCell) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent `open` cannot slip between.
            notified.as_mut().enable();
            if state.load().has_started() {
                return;
            }
            notified.await;
        }
    }
}
