//! Counters and placement values shared between the scanner, the
//! executors and the progress reporter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A placement hint for an item dropped onto a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    /// Screen the point refers to.
    pub screen: i32,
}

impl Position {
    pub fn new(x: i32, y: i32, screen: i32) -> Self {
        Self { x, y, screen }
    }
}

/// Totals gathered by scanning the sources of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Files and directories counted.
    pub num_files: usize,
    /// Bytes of every non-directory counted.
    pub num_bytes: u64,
    /// Files counted since the last scan progress report.
    #[serde(skip)]
    pub num_files_since_progress: usize,
}

impl SourceInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one entry.
    pub fn count(&mut self, size: u64, is_dir: bool) {
        self.num_files += 1;
        if !is_dir {
            self.num_bytes += size;
        }
        self.num_files_since_progress += 1;
    }
}

/// Work completed so far by a transfer or delete executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInfo {
    /// Completed items; a directory counts once regardless of its contents.
    pub num_files: usize,
    /// Bytes written so far.
    pub num_bytes: u64,
}

impl TransferInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes per second over the given elapsed time.
    pub fn rate(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.num_bytes as f64 / secs
        } else {
            0.0
        }
    }

    /// Estimated seconds left, given the scanned total.
    pub fn remaining_secs(&self, source: &SourceInfo, elapsed: Duration) -> Option<u64> {
        let rate = self.rate(elapsed);
        if rate <= 0.0 {
            return None;
        }
        let total = source.num_bytes.max(self.num_bytes);
        Some(((total - self.num_bytes) as f64 / rate) as u64)
    }
}
