//! # jobrun Integration Test Common Helpers
//!
//! File: cli/tests/common.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! Shared helpers for the integration test crates (`cli.rs`, `process.rs`).
//! Each `.rs` file in `cli/tests/` (other than this module) is compiled as a
//! separate test crate, so helpers live here instead of being duplicated.
//!

// Different test files use different helpers.
#![allow(dead_code)]

pub use assert_cmd::Command;
use jobrun::common::process::Process;
use std::time::Duration;

/// # Get jobrun Command (`jobrun_cmd`)
///
/// Creates an `assert_cmd::Command` pointing to the compiled `jobrun` binary.
///
/// ## Panics
/// Panics if the `jobrun` binary cannot be found via `Command::cargo_bin`.
pub fn jobrun_cmd() -> Command {
    Command::cargo_bin("jobrun").expect("Failed to find jobrun binary for testing")
}

/// Polls `check` every 10ms until it holds, panicking after `limit`.
pub async fn eventually<F>(limit: Duration, what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out after {:?} waiting for {}", limit, what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Waits until the process output contains `needle`.
pub async fn wait_for_output(process: &Process, needle: &str) {
    eventually(Duration::from_secs(5), needle, || {
        process.output().contains(needle)
    })
    .await;
}
