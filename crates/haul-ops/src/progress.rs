//! Progress reporting types for file operations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use haul_core::{SourceInfo, TransferInfo};
use humansize::{DECIMAL, format_size};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::OperationError;
use crate::naming::display_name;

/// The type of operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum OperationType {
    Copy,
    Move,
    Duplicate,
    Link,
    Delete,
    Trash,
    #[strum(to_string = "Empty trash")]
    EmptyTrash,
    #[strum(to_string = "Restore from trash")]
    RestoreFromTrash,
    #[strum(to_string = "Create folder")]
    CreateFolder,
    #[strum(to_string = "Create file")]
    CreateFile,
    Rename,
    #[strum(to_string = "Change permissions")]
    SetPermissions,
    #[strum(to_string = "Change owner")]
    ChangeOwner,
    #[strum(to_string = "Change group")]
    ChangeGroup,
    #[strum(to_string = "Mark as trusted")]
    MarkTrusted,
}

impl OperationType {
    fn past_tense(&self) -> &'static str {
        match self {
            Self::Copy => "Copied",
            Self::Move => "Moved",
            Self::Duplicate => "Duplicated",
            Self::Link => "Linked",
            Self::Delete => "Deleted",
            Self::Trash => "Trashed",
            Self::EmptyTrash => "Emptied",
            Self::RestoreFromTrash => "Restored",
            Self::CreateFolder | Self::CreateFile => "Created",
            Self::Rename => "Renamed",
            Self::SetPermissions => "Changed permissions of",
            Self::ChangeOwner => "Changed owner of",
            Self::ChangeGroup => "Changed group of",
            Self::MarkTrusted => "Trusted",
        }
    }
}

/// Progress information for an ongoing operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationProgress {
    /// The type of operation.
    pub operation_type: OperationType,
    /// Headline such as `Copying "a" to "b"`.
    pub status: String,
    /// Secondary line such as `1 MB of 4 MB`.
    pub details: String,
    /// Number of files/directories completed.
    pub files_completed: usize,
    /// Total number of files/directories to process.
    pub files_total: usize,
    /// Number of bytes processed so far.
    pub bytes_processed: u64,
    /// Total bytes to process (may be 0 if unknown).
    pub bytes_total: u64,
    /// The file currently being processed.
    pub current_file: Option<PathBuf>,
}

impl OperationProgress {
    /// Create a new progress update for an operation.
    pub fn new(operation_type: OperationType, files_total: usize, bytes_total: u64) -> Self {
        Self {
            operation_type,
            status: String::new(),
            details: String::new(),
            files_completed: 0,
            files_total,
            bytes_processed: 0,
            bytes_total,
            current_file: None,
        }
    }

    pub(crate) fn from_counters(
        operation_type: OperationType,
        source: &SourceInfo,
        transfer: &TransferInfo,
    ) -> Self {
        Self {
            files_completed: transfer.num_files,
            bytes_processed: transfer.num_bytes,
            ..Self::new(
                operation_type,
                source.num_files,
                source.num_bytes.max(transfer.num_bytes),
            )
        }
    }

    pub(crate) fn with_text(mut self, status: impl Into<String>, details: impl Into<String>) -> Self {
        self.status = status.into();
        self.details = details.into();
        self
    }

    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_processed as f64 / self.bytes_total as f64) * 100.0
        } else if self.files_total > 0 {
            (self.files_completed as f64 / self.files_total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Result of a completed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationComplete {
    /// The type of operation.
    pub operation_type: OperationType,
    /// False when the job was aborted, cancelled or failed fatally.
    pub success: bool,
    /// The user cancelled, or every item was skipped.
    pub user_cancel: bool,
    /// Number of items completed.
    pub files_processed: usize,
    /// Total bytes processed.
    pub bytes_processed: u64,
    /// Top-level destinations created, in creation order.
    pub debuting: Vec<PathBuf>,
    /// The item a create job made.
    pub new_file: Option<PathBuf>,
    /// Paths skipped by choice.
    pub skipped: Vec<PathBuf>,
    /// Errors that occurred.
    pub errors: Vec<OperationError>,
}

impl OperationComplete {
    /// An empty record for a job that did nothing yet.
    pub fn new(operation_type: OperationType) -> Self {
        Self {
            operation_type,
            success: true,
            user_cancel: false,
            files_processed: 0,
            bytes_processed: 0,
            debuting: Vec::new(),
            new_file: None,
            skipped: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// A record for a job that could not start.
    pub fn failed(operation_type: OperationType, error: OperationError) -> Self {
        Self {
            success: false,
            errors: vec![error],
            ..Self::new(operation_type)
        }
    }

    /// Check if the operation was fully successful.
    pub fn is_success(&self) -> bool {
        self.success && self.errors.is_empty()
    }

    /// Get a human-readable summary of the operation.
    pub fn summary(&self) -> String {
        let action = self.operation_type.past_tense();
        let mut summary = format!("{} {} {}", action, self.files_processed, items(self.files_processed));
        if !self.skipped.is_empty() {
            summary.push_str(&format!(", {} skipped", self.skipped.len()));
        }
        if !self.errors.is_empty() {
            summary.push_str(&format!(", {} failed", self.errors.len()));
        }
        if self.user_cancel {
            summary.push_str(" (cancelled)");
        } else if !self.success {
            summary.push_str(" (aborted)");
        }
        summary
    }
}

fn items(n: usize) -> &'static str {
    if n == 1 { "item" } else { "items" }
}

fn plural<'a>(n: u64, one: &'a str, many: &'a str) -> &'a str {
    if n == 1 { one } else { many }
}

/// Human form of a duration: "5 seconds", "3 minutes", "1 hour, 5 minutes",
/// "approximately 7 hours".
pub fn format_time(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds} {}", plural(seconds, "second", "seconds"));
    }
    if seconds < 60 * 60 {
        let minutes = seconds / 60;
        return format!("{minutes} {}", plural(minutes, "minute", "minutes"));
    }
    let hours = seconds / (60 * 60);
    if seconds < 60 * 60 * 4 {
        let minutes = (seconds - hours * 60 * 60) / 60;
        return format!(
            "{hours} {}, {minutes} {}",
            plural(hours, "hour", "hours"),
            plural(minutes, "minute", "minutes")
        );
    }
    format!("approximately {hours} {}", plural(hours, "hour", "hours"))
}

/// What the sources are being scanned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanKind {
    Copy,
    Move,
    Delete,
    Trash,
}

impl ScanKind {
    /// Primary text for scan failures.
    pub fn error_primary(&self) -> &'static str {
        match self {
            Self::Copy => "Error while copying.",
            Self::Move => "Error while moving.",
            Self::Delete => "Error while deleting.",
            Self::Trash => "Error while moving files to trash.",
        }
    }
}

pub(crate) fn count_details(kind: ScanKind, source: &SourceInfo) -> String {
    let n = source.num_files as u64;
    let size = format_size(source.num_bytes, DECIMAL);
    let files = plural(n, "file", "files");
    match kind {
        ScanKind::Copy => format!("Preparing to copy {n} {files} ({size})"),
        ScanKind::Move => format!("Preparing to move {n} {files} ({size})"),
        ScanKind::Delete => format!("Preparing to delete {n} {files} ({size})"),
        ScanKind::Trash => format!("Preparing to trash {n} {files}"),
    }
}

/// Which verb a transfer status uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferVerb {
    Copying,
    Moving,
    Duplicating,
}

/// Headline for a transfer in progress.
pub(crate) fn transfer_status(
    verb: TransferVerb,
    sources: &[PathBuf],
    destination: Option<&Path>,
    source: &SourceInfo,
    transfer: &TransferInfo,
) -> String {
    let total = source.num_files;
    // The report after the last item still names the last item.
    let current = (transfer.num_files + 1).min(total.max(1));
    let first = sources.first().map(|p| display_name(p)).unwrap_or_default();
    let dest = destination.map(display_name);
    let word = match verb {
        TransferVerb::Copying => "Copying",
        TransferVerb::Moving => "Moving",
        TransferVerb::Duplicating => "Duplicating",
    };

    match (total, sources.len(), dest) {
        (1, _, Some(dest)) if verb != TransferVerb::Duplicating => {
            format!("{word} \"{first}\" to \"{dest}\"")
        }
        (1, _, _) => format!("Duplicating \"{first}\""),
        (_, 1, Some(dest)) if verb != TransferVerb::Duplicating => {
            format!("{word} file {current} of {total} (in \"{first}\") to \"{dest}\"")
        }
        (_, 1, _) => format!("Duplicating file {current} of {total} (in \"{first}\")"),
        (_, _, Some(dest)) if verb != TransferVerb::Duplicating => {
            format!("{word} file {current} of {total} to \"{dest}\"")
        }
        _ => format!("Duplicating file {current} of {total}"),
    }
}

/// Byte counts, plus rate and time left once the rate is reliable.
pub(crate) fn transfer_details(
    source: &SourceInfo,
    transfer: &TransferInfo,
    elapsed: Duration,
    reliable_after: Duration,
) -> String {
    let total = source.num_bytes.max(transfer.num_bytes);
    let done = format_size(transfer.num_bytes, DECIMAL);
    let total_s = format_size(total, DECIMAL);
    let remaining = transfer
        .remaining_secs(source, elapsed)
        .filter(|_| elapsed >= reliable_after);
    let Some(remaining) = remaining else {
        return format!("{done} of {total_s}");
    };
    format!(
        "{done} of {total_s} \u{2014} {} left ({}/sec)",
        format_time(remaining),
        format_size(transfer.rate(elapsed) as u64, DECIMAL)
    )
}

pub(crate) fn delete_details(
    source: &SourceInfo,
    transfer: &TransferInfo,
    elapsed: Duration,
    reliable_after: Duration,
) -> String {
    let left = source.num_files.saturating_sub(transfer.num_files).max(1) as u64;
    let files_left = format!("{left} {} left to delete", plural(left, "file", "files"));
    if elapsed < reliable_after || transfer.num_files == 0 {
        return files_left;
    }
    let per_sec = transfer.num_files as f64 / elapsed.as_secs_f64();
    let remaining = (left as f64 / per_sec) as u64;
    format!("{files_left}\u{2014}{} left", format_time(remaining))
}

pub(crate) fn trash_details(trashed: usize, total: usize) -> String {
    let left = total.saturating_sub(trashed) as u64;
    format!("{left} {} left to trash", plural(left, "file", "files"))
}
