//! # jobrun Error Types
//!
//! File: cli/src/core/error.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! This module defines the error types used throughout jobrun. Only three
//! classes of failure are ever surfaced to a caller of the supervisor:
//!
//! - **Configuration errors**: the command string cannot be tokenized, or the
//!   configuration files are invalid. Nothing is spawned.
//! - **Spawn errors**: PTY allocation or process creation failed. The exit
//!   status of the process is forced to `"1"`.
//! - **Signal errors**: `Kill` could not deliver a signal.
//!
//! Everything else (PTY closing, scanner read errors, drain timeouts, odd wait
//! results) is logged and absorbed where it happens.
//!
//! ## Architecture
//!
//! - `JobrunError`: A custom error enum using `thiserror` for specific error types
//! - `Result<T>`: A type alias for `anyhow::Result<T>` for flexible error handling
//!
//! ## Examples
//!
//! ```rust,ignore
//! // Raise a specific error
//! return Err(anyhow!(JobrunError::EmptyCommand));
//!
//! // Pattern matching on error types
//! match process.start().await {
//!     Ok(()) => println!("exit status: {:?}", process.exit_status()),
//!     Err(e) if matches!(e.downcast_ref::<JobrunError>(), Some(JobrunError::Spawn { .. })) => {
//!         println!("could not start the command");
//!     }
//!     Err(e) => return Err(e),
//! }
//! ```
//!
use std::time::Duration;
use thiserror::Error;

/// Custom error type for jobrun.
#[derive(Error, Debug)]
pub enum JobrunError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to tokenize command '{command}': {source}")]
    Tokenize {
        command: String,
        #[source]
        source: shell_words::ParseError,
    },

    #[error("Command string is empty")]
    EmptyCommand,

    #[error("Process has already been started")]
    AlreadyStarted,

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to allocate a pseudo-terminal: {0}")]
    Pty(String),

    #[error("Failed to send {signal} to PID {pid}: {reason}")]
    Signal {
        signal: String,
        pid: u32,
        reason: String,
    },

    #[error("Timed out after {0:?} waiting for background tasks")]
    DrainTimeout(Duration),

    #[error("External command failed: {cmd}, Status: {status}")]
    ExternalCommand { cmd: String, status: String },
}

/// Type alias for Result using anyhow::Error for broad compatibility.
pub type Result<T> = anyhow::Result<T>;

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let config_err = JobrunError::Config("Missing setting 'foo'".to_string());
        assert_eq!(
            config_err.to_string(),
            "Configuration error: Missing setting 'foo'"
        );

        let signal_err = JobrunError::Signal {
            signal: "SIGTERM".into(),
            pid: 42,
            reason: "ESRCH: No such process".into(),
        };
        assert_eq!(
            signal_err.to_string(),
            "Failed to send SIGTERM to PID 42: ESRCH: No such process"
        );

        let external = JobrunError::ExternalCommand {
            cmd: "make test".into(),
            status: "2".into(),
        };
        assert_eq!(
            external.to_string(),
            "External command failed: make test, Status: 2"
        );
    }

    #[test]
    fn test_tokenize_error_keeps_source() {
        let source = shell_words::split("echo 'unterminated").unwrap_err();
        let err = JobrunError::Tokenize {
            command: "echo 'unterminated".into(),
            source,
        };
        assert!(err.to_string().starts_with("Failed to tokenize command"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
