//! # Line Processor
//!
//! File: cli/src/common/process/lines.rs
//! Author: Christi Mahu
//!
//! ## Overview
//!
//! Turns the child's raw output stream into buffered lines. For every line:
//!
//! 1. The preprocessor produces the line used for decisions (the raw line is
//!    what gets displayed).
//! 2. With timestamps on, the filter is evaluated once. Header-expansion lines
//!    (`^^^ +++`) and filter-accepted lines are written verbatim; every other
//!    line gets a `[<RFC3339 UTC>] ` prefix.
//! 3. With timestamps off, the raw line is written as is.
//! 4. If the filter accepted the line, or has not been evaluated yet, a
//!    callback task is dispatched. It re-checks the filter when needed and
//!    calls the line callback with the raw line.
//!
//! Buffer writes happen in stream order from this single task. Callback tasks
//! run on the blocking pool and carry no ordering guarantee; they are detached
//! when the stream ends.
//!
use super::output::OutputBuffer;
use super::wait_group::BoundedWaitGroup;
use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

/// Maps a raw line to the form used for filtering and header detection.
pub type LinePreprocessor = Arc<dyn Fn(&str) -> String + Send + Sync>;
/// Decides whether a (preprocessed) line triggers the callback.
pub type LineFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;
/// Receives the raw text of every line the filter accepts.
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

// Downstream log renderers match this marker too; keep them in sync.
static HEADER_EXPANSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\^\^\^\s+\+\+\+)$").expect("header expansion pattern is valid")
});

/// True for the structural `^^^ +++` marker line.
pub fn is_header_expansion(line: &str) -> bool {
    HEADER_EXPANSION.is_match(line)
}

/// `[2026-10-19T08:15:00Z] ` style prefix for the current instant.
pub fn timestamp_prefix() -> String {
    format!("[{}] ", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[derive(Clone)]
pub struct LineProcessor {
    timestamps: bool,
    preprocessor: LinePreprocessor,
    filter: LineFilter,
    callback: Option<LineCallback>,
    sink: Arc<OutputBuffer>,
}

impl LineProcessor {
    pub fn new(
        sink: Arc<OutputBuffer>,
        timestamps: bool,
        preprocessor: LinePreprocessor,
        filter: LineFilter,
        callback: Option<LineCallback>,
    ) -> Self {
        Self {
            timestamps,
            preprocessor,
            filter,
            callback,
            sink,
        }
    }

    /// Scans `reader` until end-of-stream or a read error.
    pub async fn run<R>(self, reader: R)
    where
        R: AsyncRead + Unpin,
    {
        debug!("[LineScanner] Starting to read lines");
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        let mut callbacks = BoundedWaitGroup::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let raw = String::from_utf8_lossy(trim_line_ending(&buf));
                    self.process_line(&raw, &mut callbacks);
                }
                Err(e) => {
                    debug!("[LineScanner] Error from scanner: {}", e);
                    break;
                }
            }
        }

        let pending = callbacks.detach();
        debug!(
            "[LineScanner] Finished ({} line callback(s) still running)",
            pending
        );
    }

    fn process_line(&self, raw: &str, callbacks: &mut BoundedWaitGroup) {
        let processed = (self.preprocessor)(raw);
        let mut verdict = None;

        if self.timestamps {
            let accepted = (self.filter)(&processed);
            verdict = Some(accepted);
            if accepted || is_header_expansion(&processed) {
                self.sink.append(&format!("{}\n", raw));
            } else {
                self.sink
                    .append(&format!("{}{}\n", timestamp_prefix(), raw));
            }
        } else {
            self.sink.append(&format!("{}\n", raw));
        }

        if verdict == Some(false) {
            return;
        }
        let Some(callback) = self.callback.clone() else {
            return;
        };
        let filter = self.filter.clone();
        let raw = raw.to_string();
        callbacks.spawn_blocking(move || {
            if verdict == Some(true) || filter(&processed) {
                callback(&raw);
            }
        });
    }
}

/// Strips the `\n` and at most one preceding `\r`.
fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
