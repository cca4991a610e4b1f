//! Conflict detection and resolution for file operations.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A destination that is already occupied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictPrompt {
    /// The source path being operated on.
    pub source: PathBuf,
    /// The occupied destination.
    pub destination: PathBuf,
    /// The directory the destination lives in.
    pub dest_dir: PathBuf,
    /// The kind of conflict.
    pub kind: ConflictKind,
    pub source_size: Option<u64>,
    pub destination_size: Option<u64>,
    /// Modification times in seconds since the epoch.
    pub source_modified: Option<i64>,
    pub destination_modified: Option<i64>,
}

impl ConflictPrompt {
    /// Describe the conflict between `source` and `destination`.
    pub fn new(source: &Path, destination: &Path, dest_dir: &Path) -> Self {
        let src_meta = std::fs::symlink_metadata(source).ok();
        let dest_meta = std::fs::symlink_metadata(destination).ok();
        let kind = ConflictKind::classify(
            src_meta.as_ref().is_some_and(|m| m.is_dir()),
            dest_meta.as_ref().is_some_and(|m| m.is_dir()),
        );

        Self {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            dest_dir: dest_dir.to_path_buf(),
            kind,
            source_size: src_meta.as_ref().map(|m| m.len()),
            destination_size: dest_meta.as_ref().map(|m| m.len()),
            source_modified: src_meta.as_ref().map(|m| m.mtime()),
            destination_modified: dest_meta.as_ref().map(|m| m.mtime()),
        }
    }

    pub fn is_merge(&self) -> bool {
        self.kind == ConflictKind::Merge
    }
}

/// The kind of conflict encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Something other than two directories; overwriting replaces it.
    Replace,
    /// Both sides are directories; overwriting merges their contents.
    Merge,
}

impl ConflictKind {
    pub fn classify(source_is_dir: bool, destination_is_dir: bool) -> Self {
        if source_is_dir && destination_is_dir {
            Self::Merge
        } else {
            Self::Replace
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => write!(f, "File already exists"),
            Self::Merge => write!(f, "Folder already exists"),
        }
    }
}

/// What to do about one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConflictOutcome {
    /// Abort the entire operation.
    Cancel,
    /// Leave the destination alone.
    #[default]
    Skip,
    /// Overwrite the destination.
    Replace,
    /// Merge into the destination directory.
    Merge,
    /// Use another name for the destination.
    Rename,
}

/// An answer to a [`ConflictPrompt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConflictResponse {
    pub outcome: ConflictOutcome,
    /// The name to use with [`ConflictOutcome::Rename`].
    pub new_name: Option<String>,
    /// Apply the same outcome to every later conflict of the job.
    pub apply_to_all: bool,
}

impl ConflictResponse {
    pub fn cancel() -> Self {
        Self {
            outcome: ConflictOutcome::Cancel,
            ..Default::default()
        }
    }

    pub fn skip(apply_to_all: bool) -> Self {
        Self {
            outcome: ConflictOutcome::Skip,
            new_name: None,
            apply_to_all,
        }
    }

    /// Replace files and merge directories.
    pub fn replace(apply_to_all: bool) -> Self {
        Self {
            outcome: ConflictOutcome::Replace,
            new_name: None,
            apply_to_all,
        }
    }

    pub fn rename(new_name: impl Into<String>) -> Self {
        Self {
            outcome: ConflictOutcome::Rename,
            new_name: Some(new_name.into()),
            apply_to_all: false,
        }
    }
}

/// The sticky per-job conflict policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ConflictPolicy {
    pub skip_all_conflict: bool,
    pub merge_all: bool,
    pub replace_all: bool,
}

/// Decision for a conflict that needs no prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StickyDecision {
    Overwrite,
    Skip,
}

impl ConflictPolicy {
    /// The cached decision for a conflict of the given kind, if any.
    pub fn decide(&self, kind: ConflictKind) -> Option<StickyDecision> {
        let overwrite = match kind {
            ConflictKind::Merge => self.merge_all,
            ConflictKind::Replace => self.replace_all,
        };
        if overwrite {
            Some(StickyDecision::Overwrite)
        } else if self.skip_all_conflict {
            Some(StickyDecision::Skip)
        } else {
            None
        }
    }

    /// Remember an "apply to all" answer.
    pub fn remember(&mut self, kind: ConflictKind, response: &ConflictResponse) {
        if !response.apply_to_all {
            return;
        }
        match response.outcome {
            ConflictOutcome::Skip => self.skip_all_conflict = true,
            ConflictOutcome::Replace | ConflictOutcome::Merge => match kind {
                ConflictKind::Merge => self.merge_all = true,
                ConflictKind::Replace => self.replace_all = true,
            },
            ConflictOutcome::Cancel | ConflictOutcome::Rename => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify() {
        assert_eq!(ConflictKind::classify(true, true), ConflictKind::Merge);
        assert_eq!(ConflictKind::classify(true, false), ConflictKind::Replace);
        assert_eq!(ConflictKind::classify(false, true), ConflictKind::Replace);
        assert_eq!(ConflictKind::classify(false, false), ConflictKind::Replace);
    }

    #[test]
    fn test_prompt_reads_both_sides() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&b).unwrap();

        let prompt = ConflictPrompt::new(&a, &b, temp.path());
        assert!(prompt.is_merge());

        std::fs::write(temp.path().join("f"), b"12345").unwrap();
        let prompt = ConflictPrompt::new(&temp.path().join("f"), &b, temp.path());
        assert_eq!(prompt.kind, ConflictKind::Replace);
        assert_eq!(prompt.source_size, Some(5));
    }

    #[test]
    fn test_policy_is_kind_specific() {
        let mut policy = ConflictPolicy::default();
        assert_eq!(policy.decide(ConflictKind::Replace), None);

        policy.remember(ConflictKind::Merge, &ConflictResponse::replace(true));
        assert_eq!(
            policy.decide(ConflictKind::Merge),
            Some(StickyDecision::Overwrite)
        );
        assert_eq!(policy.decide(ConflictKind::Replace), None);

        policy.remember(ConflictKind::Replace, &ConflictResponse::skip(true));
        assert_eq!(
            policy.decide(ConflictKind::Replace),
            Some(StickyDecision::Skip)
        );
        assert_eq!(
            policy.decide(ConflictKind::Merge),
            Some(StickyDecision::Overwrite)
        );
    }

    #[test]
    fn test_single_answers_are_not_remembered() {
        let mut policy = ConflictPolicy::default();
        policy.remember(ConflictKind::Replace, &ConflictResponse::replace(false));
        policy.remember(ConflictKind::Replace, &ConflictResponse::rename("x"));
        assert_eq!(policy, ConflictPolicy::default());
    }
}
