//! # jobrun Run Command Handler
//!
//! File: cli/src/commands/run.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! This module implements `jobrun run`. It launches one command under the
//! process supervisor and streams its combined output to stdout while it runs.
//!
//! ## Architecture
//!
//! The command flow is as follows:
//! 1. Parse the arguments (`RunArgs`) and load the configuration (`core::config`).
//! 2. Apply the command-line flags on top of the configuration.
//! 3. Build a `Process`: environment overlay, PTY/timestamp modes, ANSI
//!    stripping as the line preprocessor and `callback_pattern` as the line
//!    filter. Accepted lines are logged as section markers.
//! 4. Run `start` in a background task. Meanwhile poll `output()` and print
//!    whatever is new, and turn Ctrl-C into `kill`.
//! 5. Print the remainder and map the exit status to the command result. A
//!    non-zero status becomes `JobrunError::ExternalCommand`, which `main`
//!    turns into the process exit code.
//!
//! ## Usage
//!
//! ```bash
//! # Run a build step with timestamps
//! jobrun run --timestamps -- "make test"
//!
//! # Run inside a pseudo-terminal with an extra variable
//! jobrun run --pty --env CI=true -- "sh -c 'ls --color=auto'"
//! ```
//!
use crate::{
    common::process::Process,
    core::{
        config::{self, Config},
        error::{JobrunError, Result},
    },
};
use anyhow::{anyhow, Context};
use clap::Parser;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// How often the output buffer is polled for new text.
const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07")
        .expect("ANSI escape pattern is valid")
});

/// # Run Arguments (`RunArgs`)
///
/// Defines the command-line arguments accepted by `jobrun run`.
#[derive(Parser, Debug)]
#[command(
    about = "Run a command under supervision and stream its output",
    long_about = "Starts the command, streams its combined stdout/stderr line by line, \
                  and exits with the command's exit status. Ctrl-C terminates the command \
                  (SIGTERM, then SIGKILL after the grace period)."
)]
pub struct RunArgs {
    /// Attach the command to a pseudo-terminal.
    #[arg(long)]
    pub pty: bool,

    /// Prefix each output line with an RFC3339 UTC timestamp.
    #[arg(long)]
    pub timestamps: bool,

    /// Extra environment variable for the command (repeatable).
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Configuration file to use instead of the user/project files.
    #[arg(long, env = "JOBRUN_CONFIG")]
    pub config: Option<PathBuf>,

    /// The command line to run. Quoted with shell rules, e.g. "sh -c 'exit 3'".
    #[arg(required = true, last = true)]
    pub command: Vec<String>,
}

fn parse_env_pair(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// # Handle Run Command (`handle_run`)
///
/// Runs the command to completion.
///
/// ## Returns
///
/// * `Ok(())` when the command exits with status `0`.
/// * `Err(JobrunError::ExternalCommand)` carrying the status otherwise.
/// * Any configuration or spawn error.
pub async fn handle_run(args: RunArgs) -> Result<()> {
    info!("Handling run command...");
    debug!("Run args: {:?}", args);

    let cfg = config::load_config(args.config.as_deref())
        .context("Failed to load jobrun configuration")?;
    let command_line = args.command.join(" ");
    let process = Arc::new(build_process(&command_line, &args, &cfg)?);

    let runner = tokio::spawn({
        let process = process.clone();
        async move { process.start().await }
    });
    tokio::pin!(runner);

    let mut stdout = tokio::io::stdout();
    let mut printed = 0usize;
    let mut ticker = tokio::time::interval(OUTPUT_POLL_INTERVAL);
    let mut interrupted = false;

    let start_result = loop {
        tokio::select! {
            joined = &mut runner => {
                break joined.context("Supervisor task panicked")?;
            }
            _ = ticker.tick() => {
                printed = flush_new_output(&process, printed, &mut stdout).await?;
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    continue;
                }
                warn!("Interrupt received, terminating '{}'", command_line);
                let process = process.clone();
                tokio::spawn(async move {
                    if let Err(e) = process.kill().await {
                        warn!("Failed to terminate process: {:#}", e);
                    }
                });
            }
        }
    };
    flush_new_output(&process, printed, &mut stdout).await?;
    start_result?;

    let status = process.exit_status().unwrap_or_else(|| "-1".to_string());
    if status == "0" {
        info!("Command '{}' finished successfully.", command_line);
        Ok(())
    } else {
        warn!("Command '{}' finished with exit status {}.", command_line, status);
        Err(anyhow!(JobrunError::ExternalCommand {
            cmd: command_line,
            status,
        }))
    }
}

/// Configuration plus flags → a ready-to-start `Process`.
fn build_process(command_line: &str, args: &RunArgs, cfg: &Config) -> Result<Process> {
    let timeouts = cfg.timeouts.to_process_timeouts();
    let mut process = Process::new(command_line)
        .pty(args.pty || cfg.process.pty)
        .timestamps(args.timestamps || cfg.process.timestamps)
        .envs(cfg.process.env.clone())
        .envs(args.env.iter().cloned())
        .timeouts(timeouts);

    if cfg.lines.strip_ansi {
        process = process.line_preprocessor(strip_ansi);
    }

    if let Some(pattern) = &cfg.lines.callback_pattern {
        let matcher = Regex::new(pattern).map_err(|e| {
            anyhow!(JobrunError::Config(format!(
                "Invalid callback_pattern '{}': {}",
                pattern, e
            )))
        })?;
        process = process
            .line_filter(move |line| matcher.is_match(line))
            .line_callback(|line| info!(target: "jobrun::section", "{}", line));
    }

    Ok(process)
}

fn strip_ansi(line: &str) -> String {
    ANSI_ESCAPE.replace_all(line, "").into_owned()
}

/// Writes the part of the output buffer past `printed` and returns the new offset.
async fn flush_new_output(
    process: &Process,
    printed: usize,
    stdout: &mut tokio::io::Stdout,
) -> Result<usize> {
    let fresh = process.output_from(printed);
    if !fresh.is_empty() {
        stdout
            .write_all(fresh.as_bytes())
            .await
            .context("Failed to write command output")?;
        stdout.flush().await.context("Failed to flush stdout")?;
    }
    Ok(printed + fresh.len())
}
