//! # jobrun Library Root
//!
//! File: cli/src/lib.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! jobrun launches a user-supplied command on behalf of a build agent,
//! captures its combined output as a live line stream, and manages its
//! lifecycle through to termination. The `jobrun` binary (`main.rs`) is a thin
//! CLI over this library; the agent embeds `common::process::Process` directly.
//!
//! ## Architecture
//!
//! - `commands`: CLI command handlers (`run`).
//! - `common`: Shared utilities. `common::process` is the process supervisor.
//! - `core`: Infrastructure (configuration, errors).
//!
pub mod commands;
pub mod common;
pub mod core;
