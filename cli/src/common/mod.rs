//! # jobrun Common Utilities (`common`)
//!
//! File: cli/src/common/mod.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! This module is the organizational entry point for the shared utility
//! modules. It keeps the reusable machinery separate from command-specific
//! logic (`commands::`) and core infrastructure (`core::`).
//!
//! - **`process`**: The supervised process runner: spawning (pipe or PTY),
//!   line capture and timestamping, line callbacks, exit status translation,
//!   and kill escalation.
//!
//! ```rust,no_run
//! use jobrun::common::process::Process;
//!
//! # async fn run_example() -> jobrun::core::error::Result<()> {
//! let process = Process::new("echo hello");
//! process.start().await?;
//! assert_eq!(process.output(), "hello\n");
//! # Ok(())
//! # }
//! ```
//!

/// Supervised execution of external processes.
pub mod process;
