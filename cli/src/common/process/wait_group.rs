//! # Bounded Wait Group
//!
//! File: cli/src/common/process/wait_group.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! A counting group of background tasks that can be waited on with a ceiling.
//! The supervisor uses it to drain the PTY copy task and the line scanner after
//! the child has exited. Some children leave descriptors open in grandchildren,
//! so a reader may never see end-of-file; the ceiling keeps `start` from
//! hanging on them.
//!
//! Expiry is reported as `JobrunError::DrainTimeout` so the caller can log it.
//! Tasks still running at that point are aborted.
//!
use crate::core::error::{JobrunError, Result};
use anyhow::anyhow;
use futures_util::future::join_all;
use std::future::Future;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct BoundedWaitGroup {
    handles: Vec<JoinHandle<()>>,
}

impl BoundedWaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `future` on the runtime and tracks it.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push(tokio::spawn(future));
    }

    /// Runs `f` on the blocking pool and tracks it.
    pub fn spawn_blocking<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handles.push(tokio::task::spawn_blocking(f));
    }

    /// Number of tracked tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every tracked task, giving up after `limit`.
    ///
    /// On expiry the unfinished tasks are aborted and `DrainTimeout` is returned.
    /// A task that panicked is logged and counts as finished.
    pub async fn wait_timeout(self, limit: Duration) -> Result<()> {
        let aborts: Vec<AbortHandle> = self.handles.iter().map(|h| h.abort_handle()).collect();

        match tokio::time::timeout(limit, join_all(self.handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!("Background task ended abnormally: {}", e);
                    }
                }
                Ok(())
            }
            Err(_) => {
                let unfinished = aborts.iter().filter(|a| !a.is_finished()).count();
                debug!("Aborting {} unfinished background task(s)", unfinished);
                for abort in aborts {
                    abort.abort();
                }
                Err(anyhow!(JobrunError::DrainTimeout(limit)))
            }
        }
    }

    /// Stops tracking without waiting. Detached tasks keep running to
    /// completion. Returns how many were still pending.
    pub fn detach(self) -> usize {
        self.pending()
    }
}
