//! # jobrun Command Modules
//!
//! File: cli/src/commands/mod.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! This module aggregates the top-level commands of the jobrun CLI. Each
//! command defines its own arguments structure and handler function, and
//! `main.rs` routes to them.
//!
//! - `run`: Run a command under supervision and stream its output
//!

/// Runs a command under the process supervisor. Implements `jobrun run`.
pub mod run;
