//! File operation types.

use std::path::PathBuf;

use haul_core::Position;
use serde::{Deserialize, Serialize};

use crate::permissions::OwnershipKind;
use crate::progress::OperationType;

/// A file operation to be executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FileOperation {
    /// Copy files/directories into a directory.
    Copy {
        sources: Vec<PathBuf>,
        destination: PathBuf,
        /// Placement hints, by source index.
        positions: Vec<Position>,
        /// Custom name for the single top-level item.
        target_name: Option<String>,
    },
    /// Move files/directories into a directory.
    Move {
        sources: Vec<PathBuf>,
        destination: PathBuf,
        positions: Vec<Position>,
    },
    /// Copy files/directories next to themselves under a new name.
    Duplicate {
        sources: Vec<PathBuf>,
        positions: Vec<Position>,
    },
    /// Create symbolic links to files/directories in a directory.
    Link {
        sources: Vec<PathBuf>,
        destination: PathBuf,
        positions: Vec<Position>,
    },
    /// Trash or permanently delete files/directories.
    Delete {
        targets: Vec<PathBuf>,
        try_trash: bool,
    },
    /// Permanently delete everything in the trash.
    EmptyTrash,
    /// Put trashed items back where they came from, matched by their
    /// original path and deletion time.
    RestoreFromTrash { items: Vec<(PathBuf, i64)> },
    /// Create a new directory.
    CreateFolder {
        parent: PathBuf,
        name: Option<String>,
        position: Option<Position>,
    },
    /// Create a new file, empty or with the given contents.
    CreateFile {
        parent: PathBuf,
        name: Option<String>,
        contents: Option<Vec<u8>>,
        position: Option<Position>,
    },
    /// Create a new file by copying a template.
    CreateFromTemplate {
        parent: PathBuf,
        template: PathBuf,
        name: Option<String>,
        position: Option<Position>,
    },
    /// Rename a single file or directory.
    Rename { source: PathBuf, new_name: String },
    /// Set the permission bits of one file.
    SetPermissions { target: PathBuf, mode: u32 },
    /// Change permission bits under a directory, applying
    /// `(mode & !mask) | (value & mask)` to files and directories separately.
    SetPermissionsRecursive {
        root: PathBuf,
        file_value: u32,
        file_mask: u32,
        dir_value: u32,
        dir_mask: u32,
    },
    /// Put back recorded permission bits.
    RestorePermissions { modes: Vec<(PathBuf, u32)> },
    /// Change the owner or the group of one file.
    ChangeOwnership {
        target: PathBuf,
        kind: OwnershipKind,
        value: String,
    },
    /// Make a desktop launcher executable and self-launching.
    MarkTrusted { target: PathBuf },
}

impl FileOperation {
    /// Create a copy operation.
    pub fn copy(sources: Vec<PathBuf>, destination: PathBuf) -> Self {
        Self::Copy {
            sources,
            destination,
            positions: Vec::new(),
            target_name: None,
        }
    }

    /// Create a move operation.
    pub fn move_to(sources: Vec<PathBuf>, destination: PathBuf) -> Self {
        Self::Move {
            sources,
            destination,
            positions: Vec::new(),
        }
    }

    /// Create a duplicate operation.
    pub fn duplicate(sources: Vec<PathBuf>) -> Self {
        Self::Duplicate {
            sources,
            positions: Vec::new(),
        }
    }

    /// Create a link operation.
    pub fn link(sources: Vec<PathBuf>, destination: PathBuf) -> Self {
        Self::Link {
            sources,
            destination,
            positions: Vec::new(),
        }
    }

    /// Create a delete operation.
    pub fn delete(targets: Vec<PathBuf>, try_trash: bool) -> Self {
        Self::Delete { targets, try_trash }
    }

    /// Create a rename operation.
    pub fn rename(source: PathBuf, new_name: impl Into<String>) -> Self {
        Self::Rename {
            source,
            new_name: new_name.into(),
        }
    }

    /// The kind of job this operation runs as.
    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::Copy { .. } => OperationType::Copy,
            Self::Move { .. } => OperationType::Move,
            Self::Duplicate { .. } => OperationType::Duplicate,
            Self::Link { .. } => OperationType::Link,
            Self::Delete {
                try_trash: true, ..
            } => OperationType::Trash,
            Self::Delete { .. } => OperationType::Delete,
            Self::EmptyTrash => OperationType::EmptyTrash,
            Self::RestoreFromTrash { .. } => OperationType::RestoreFromTrash,
            Self::CreateFolder { .. } => OperationType::CreateFolder,
            Self::CreateFile { .. } | Self::CreateFromTemplate { .. } => OperationType::CreateFile,
            Self::Rename { .. } => OperationType::Rename,
            Self::SetPermissions { .. }
            | Self::SetPermissionsRecursive { .. }
            | Self::RestorePermissions { .. } => OperationType::SetPermissions,
            Self::ChangeOwnership {
                kind: OwnershipKind::Owner,
                ..
            } => OperationType::ChangeOwner,
            Self::ChangeOwnership {
                kind: OwnershipKind::Group,
                ..
            } => OperationType::ChangeGroup,
            Self::MarkTrusted { .. } => OperationType::MarkTrusted,
        }
    }
}

/// An error that occurred during a file operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    /// The path that caused the error.
    pub path: PathBuf,
    /// A human-readable error message.
    pub message: String,
}

impl OperationError {
    /// Create a new operation error.
    pub fn new(path: PathBuf, message: impl Into<String>) -> Self {
        Self {
            path,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_types() {
        assert_eq!(
            FileOperation::delete(vec![], true).operation_type(),
            OperationType::Trash
        );
        assert_eq!(
            FileOperation::delete(vec![], false).operation_type(),
            OperationType::Delete
        );
        assert_eq!(
            FileOperation::ChangeOwnership {
                target: PathBuf::from("/x"),
                kind: OwnershipKind::Group,
                value: "staff".into(),
            }
            .operation_type(),
            OperationType::ChangeGroup
        );
    }

    #[test]
    fn test_operation_error_display() {
        let err = OperationError::new(PathBuf::from("/tmp/a"), "Permission denied");
        assert_eq!(err.to_string(), "/tmp/a: Permission denied");
    }
}
