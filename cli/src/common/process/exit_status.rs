//! # Exit Status Translation
//!
//! File: cli/src/common/process/exit_status.rs
//! Author: Christi Mahu
//!
//! Maps the result of waiting on a child into the string-encoded status the
//! build agent reports upstream: `"0"` for success, the exit code otherwise,
//! and `"-1"` when the platform cannot give a numeric code.
//!
use std::io;
use std::process::ExitStatus;
use tracing::{debug, error};

/// Status recorded when the platform cannot report a numeric exit code.
pub const UNKNOWN_EXIT_STATUS: &str = "-1";

/// Status recorded when the process could not be started at all.
pub const SPAWN_FAILED_EXIT_STATUS: &str = "1";

/// Translates a completed wait into an exit status string.
///
/// A child terminated by a signal has no exit code; on unix this yields
/// `"-1"` and the signal number is logged at debug level.
pub fn translate(wait_result: &io::Result<ExitStatus>) -> String {
    match wait_result {
        Ok(status) => match status.code() {
            Some(code) => code.to_string(),
            None => {
                log_missing_code(status);
                UNKNOWN_EXIT_STATUS.to_string()
            }
        },
        Err(e) => {
            error!("Unexpected error waiting for process: {:?}", e);
            UNKNOWN_EXIT_STATUS.to_string()
        }
    }
}

#[cfg(unix)]
fn log_missing_code(status: &ExitStatus) {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(signal) => debug!("Process was terminated by signal {}", signal),
        None => error!("Process exit status has neither a code nor a signal: {:?}", status),
    }
}

#[cfg(not(unix))]
fn log_missing_code(status: &ExitStatus) {
    error!("Unimplemented for a platform that reports no exit code: {:?}", status);
}
