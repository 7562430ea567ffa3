//! # Command Tokenization
//!
//! File: cli/src/common/process/tokenize.rs
//! Author: Christi Mahu
//!
//! Splits the configured command string into a program and its arguments using
//! shell quoting rules (`shell-words`). No expansion or globbing is performed;
//! wrap the command in `sh -c '...'` when shell features are needed.
//!
use crate::core::error::{JobrunError, Result};
use anyhow::anyhow;

/// Tokenized command line: `program` plus its `args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argv {
    pub program: String,
    pub args: Vec<String>,
}

pub fn tokenize(command: &str) -> Result<Argv> {
    let mut words = shell_words::split(command).map_err(|source| {
        anyhow!(JobrunError::Tokenize {
            command: command.to_string(),
            source,
        })
    })?;

    if words.is_empty() {
        return Err(anyhow!(JobrunError::EmptyCommand));
    }
    let program = words.remove(0);
    Ok(Argv {
        program,
        args: words,
    })
}
