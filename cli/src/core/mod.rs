//! # jobrun Core Infrastructure
//!
//! File: cli/src/core/mod.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! This module aggregates the core infrastructure components used by the
//! command handlers and the process supervisor:
//! - `config`: Configuration loading, merging, and validation
//! - `error`: Error types and error handling utilities
//!
//! ```rust
//! use jobrun::core::config; // For loading configuration
//! use jobrun::core::error::{JobrunError, Result}; // For error handling
//! ```
//!
pub mod config;
pub mod error;
