//! # jobrun Configuration System
//!
//! File: cli/src/core/config.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! This module loads, merges and validates the settings that shape a
//! supervised run: PTY and timestamp modes, the environment overlay, line
//! filtering, and the drain/kill timeouts.
//!
//! ## Architecture
//!
//! Configuration sources (in order of precedence):
//! 1. An explicit `--config <path>` file (`~` is expanded)
//! 2. Project-specific `.jobrun.toml` in the current directory or ancestors
//!    (the search stops at a directory containing `.git`)
//! 3. User-specific `config.toml` in the platform config dir (`~/.config/jobrun/` on Linux)
//! 4. Default values defined in the code
//!
//! Command-line flags are applied on top by the `run` command.
//!
//! ## Examples
//!
//! ```toml
//! [process]
//! pty = false
//! timestamps = true
//!
//! [process.env]
//! CI = "true"
//!
//! [lines]
//! strip_ansi = true
//! callback_pattern = '^(?:---|\+\+\+|~~~)\s'
//!
//! [timeouts]
//! drain_secs = 10
//! kill_grace_secs = 10
//! kill_poll_interval_ms = 1000
//! ```
//!
use crate::common::process::ProcessTimeouts;
use crate::core::error::{JobrunError, Result};
use anyhow::{anyhow, Context};
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Represents the main configuration structure, loaded from TOML files.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub lines: LinesConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

/// How the child is launched.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProcessConfig {
    /// Attach the child to a pseudo-terminal.
    #[serde(default)]
    pub pty: bool,
    /// Prefix output lines with RFC3339 UTC timestamps.
    #[serde(default)]
    pub timestamps: bool,
    /// Environment overlay; wins over the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Line preprocessing and callback selection.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LinesConfig {
    /// Remove ANSI escape sequences before filtering.
    #[serde(default)]
    pub strip_ansi: bool,
    /// Regex selecting lines reported as section markers.
    #[serde(default)]
    pub callback_pattern: Option<String>,
}

/// Drain and kill timings.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    #[serde(default = "default_drain_secs")]
    pub drain_secs: u64,
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
    #[serde(default = "default_kill_poll_interval_ms")]
    pub kill_poll_interval_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            drain_secs: default_drain_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            kill_poll_interval_ms: default_kill_poll_interval_ms(),
        }
    }
}

impl TimeoutsConfig {
    pub fn to_process_timeouts(&self) -> ProcessTimeouts {
        ProcessTimeouts {
            drain: Duration::from_secs(self.drain_secs),
            kill_grace: Duration::from_secs(self.kill_grace_secs),
            kill_poll_interval: Duration::from_millis(self.kill_poll_interval_ms),
        }
    }
}

fn default_drain_secs() -> u64 {
    10
}
fn default_kill_grace_secs() -> u64 {
    10
}
fn default_kill_poll_interval_ms() -> u64 {
    1000
}

const PROJECT_CONFIG_FILENAME: &str = ".jobrun.toml";

/// Loads the merged configuration. `explicit` replaces the user and project
/// files when given.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let config = match explicit {
        Some(path) => {
            let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
            info!("Loading configuration from: {}", expanded.display());
            load_config_from_path(&expanded)?
        }
        None => {
            let user_config = load_user_config()?;
            let project_config = load_project_config()?;
            merge_configs(user_config.unwrap_or_default(), project_config)
        }
    };
    validate_config(&config).context("Configuration validation failed")?;
    debug!("Final loaded configuration: {:?}", config);
    Ok(config)
}

fn load_user_config() -> Result<Option<Config>> {
    if let Some(proj_dirs) = ProjectDirs::from("com", "jobrun", "jobrun") {
        let config_path = proj_dirs.config_dir().join("config.toml");
        if config_path.exists() {
            info!("Loading user configuration from: {}", config_path.display());
            load_config_from_path(&config_path).map(Some)
        } else {
            debug!(
                "User configuration file not found at {}",
                config_path.display()
            );
            Ok(None)
        }
    } else {
        warn!("Could not determine user config directory.");
        Ok(None)
    }
}

fn load_project_config() -> Result<Option<Config>> {
    let current_dir = std::env::current_dir().context("Failed to get current directory")?;
    if let Some(project_config_path) = find_project_config_path(&current_dir) {
        info!(
            "Loading project configuration from: {}",
            project_config_path.display()
        );
        load_config_from_path(&project_config_path).map(Some)
    } else {
        debug!("No project configuration file (.jobrun.toml) found in current directory or ancestors.");
        Ok(None)
    }
}

fn find_project_config_path(start: &Path) -> Option<PathBuf> {
    let mut path = start;
    loop {
        let project_config = path.join(PROJECT_CONFIG_FILENAME);
        if project_config.is_file() {
            return Some(project_config);
        }
        if path.join(".git").is_dir() {
            debug!(
                "Found .git directory at {}, stopping project config search.",
                path.display()
            );
            return None;
        }
        path = path.parent()?;
    }
}

fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML from file: {}", path.display()))
}

/// Project values win where they differ from the defaults; env maps are
/// merged key by key.
fn merge_configs(user: Config, project: Option<Config>) -> Config {
    let project = match project {
        Some(p) => p,
        None => return user,
    };
    let defaults = TimeoutsConfig::default();

    let mut env = user.process.env;
    env.extend(project.process.env);

    Config {
        process: ProcessConfig {
            pty: project.process.pty || user.process.pty,
            timestamps: project.process.timestamps || user.process.timestamps,
            env,
        },
        lines: LinesConfig {
            strip_ansi: project.lines.strip_ansi || user.lines.strip_ansi,
            callback_pattern: project
                .lines
                .callback_pattern
                .or(user.lines.callback_pattern),
        },
        timeouts: TimeoutsConfig {
            drain_secs: pick(project.timeouts.drain_secs, user.timeouts.drain_secs, defaults.drain_secs),
            kill_grace_secs: pick(
                project.timeouts.kill_grace_secs,
                user.timeouts.kill_grace_secs,
                defaults.kill_grace_secs,
            ),
            kill_poll_interval_ms: pick(
                project.timeouts.kill_poll_interval_ms,
                user.timeouts.kill_poll_interval_ms,
                defaults.kill_poll_interval_ms,
            ),
        },
    }
}

fn pick(project: u64, user: u64, default: u64) -> u64 {
    if project != default {
        project
    } else {
        user
    }
}

fn validate_config(config: &Config) -> Result<()> {
    let timeouts = &config.timeouts;
    if timeouts.drain_secs == 0 || timeouts.kill_grace_secs == 0 || timeouts.kill_poll_interval_ms == 0 {
        return Err(anyhow!(JobrunError::Config(
            "Timeouts must be greater than zero.".to_string()
        )));
    }
    for key in config.process.env.keys() {
        if key.is_empty() || key.contains('=') {
            return Err(anyhow!(JobrunError::Config(format!(
                "Invalid environment variable name: '{}'.",
                key
            ))));
        }
    }
    if let Some(pattern) = &config.lines.callback_pattern {
        regex::Regex::new(pattern).map_err(|e| {
            anyhow!(JobrunError::Config(format!(
                "Invalid callback_pattern '{}': {}",
                pattern, e
            )))
        })?;
    }
    Ok(())
}
