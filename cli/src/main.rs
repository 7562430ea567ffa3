//! # jobrun Main Entry Point
//!
//! File: cli/src/main.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! This file serves as the main entry point for the jobrun CLI application.
//! It handles:
//! - Command-line argument parsing using Clap
//! - Setting up the logging system based on verbosity flags
//! - Routing execution to the command handlers
//! - Mapping the supervised command's exit status to our own
//!
//! Logs go to stderr so stdout carries only the supervised command's output.
//!
//! ## Examples
//!
//! ```bash
//! # Get help
//! jobrun --help
//!
//! # Run a command with increased verbosity
//! jobrun -vv run -- "make test"
//! ```
//!
use clap::Parser;
use jobrun::{commands, core::error::JobrunError};
use tracing_subscriber::{fmt, EnvFilter};

/// Defines the top-level command-line arguments structure using Clap's derive macros.
#[derive(Parser, Debug)]
#[command(
    name = "jobrun",
    about = "Supervised process runner for build steps",
    long_about = "Runs a command, streams its combined output line by line (optionally \
                  timestamped), and manages its lifecycle through to termination.",
    propagate_version = true,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

/// Enum defining all available top-level commands.
#[derive(Parser, Debug)]
enum Commands {
    #[command(alias = "r")]
    Run(commands::run::RunArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    tracing::debug!("Parsed CLI arguments: {:?}", cli);

    let command_result = match cli.command {
        Commands::Run(args) => commands::run::handle_run(args).await,
    };

    if let Err(e) = command_result {
        // A command that ran but failed passes its own status through.
        if let Some(JobrunError::ExternalCommand { status, .. }) = e.downcast_ref::<JobrunError>() {
            let code = status.parse::<i32>().ok().filter(|c| *c > 0).unwrap_or(1);
            std::process::exit(code);
        }
        tracing::error!("Command execution failed: {:?}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
