//! # Output Buffer
//!
//! File: cli/src/common/process/output.rs
//! Author: Christi Mahu
//!
//! Append-only buffer holding everything the line scanner has written so far.
//! The scanner task is the only writer; any number of readers may take a
//! snapshot at any time, including while the process is still running.
//!
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

#[derive(Debug, Default)]
pub struct OutputBuffer {
    inner: Mutex<String>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an already formatted chunk (normally one line plus `\n`).
    pub fn append(&self, chunk: &str) {
        self.lock().push_str(chunk);
    }

    /// Point-in-time copy of the buffer.
    pub fn snapshot(&self) -> String {
        let guard = self.lock();
        trace!("Polling for output: ({} bytes)", guard.len());
        guard.clone()
    }

    /// Copy of everything appended after the first `offset` bytes. Used by
    /// streaming readers that remember how much they have already seen.
    pub fn snapshot_from(&self, offset: usize) -> String {
        let guard = self.lock();
        guard.get(offset..).unwrap_or_default().to_string()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock cannot leave a half-written String behind,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, String> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_append_and_snapshot() {
        let buffer = OutputBuffer::new();
        assert!(buffer.is_empty());
        buffer.append("a\n");
        buffer.append("b\n");
        assert_eq!(buffer.snapshot(), "a\nb\n");
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.snapshot_from(2), "b\n");
        assert_eq!(buffer.snapshot_from(4), "");
        assert_eq!(buffer.snapshot_from(99), "");
    }

    #[test]
    fn test_snapshots_grow_while_writer_runs() {
        let buffer = Arc::new(OutputBuffer::new());
        let writer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    buffer.append(&format!("{}\n", i));
                }
            })
        };

        let mut last_len = 0;
        while !writer.is_finished() {
            let snapshot = buffer.snapshot();
            assert!(snapshot.len() >= last_len, "buffer must never shrink");
            last_len = snapshot.len();
        }
        writer.join().unwrap();

        let lines: Vec<String> = buffer.snapshot().lines().map(String::from).collect();
        let expected: Vec<String> = (0..500).map(|i| i.to_string()).collect();
        assert_eq!(lines, expected);
    }
}
