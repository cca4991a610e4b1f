//! Error types for file operations.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use thiserror::Error;

/// Errors that can occur while operating on a single path.
#[derive(Debug, Error)]
pub enum OpError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Something already occupies the path.
    #[error("File exists: {path}")]
    AlreadyExists { path: PathBuf },

    /// A directory was found where a file was expected.
    #[error("Is a directory: {path}")]
    IsADirectory { path: PathBuf },

    /// A non-directory was found where a directory was expected.
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// The directory still has entries.
    #[error("Directory not empty: {path}")]
    DirectoryNotEmpty { path: PathBuf },

    /// The name is not valid on the destination filesystem.
    #[error("Invalid filename: {path}")]
    InvalidFilename { path: PathBuf },

    /// A rename would cross filesystem boundaries.
    #[error("Cannot move across filesystems: {path}")]
    CrossesDevices { path: PathBuf },

    /// The filesystem is mounted read-only.
    #[error("Read-only filesystem: {path}")]
    ReadOnly { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl OpError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.raw_os_error() == Some(Errno::EINVAL as i32) {
            return Self::InvalidFilename { path };
        }
        match source.kind() {
            ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            ErrorKind::NotFound => Self::NotFound { path },
            ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            ErrorKind::IsADirectory => Self::IsADirectory { path },
            ErrorKind::NotADirectory => Self::NotADirectory { path },
            ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty { path },
            ErrorKind::CrossesDevices => Self::CrossesDevices { path },
            ErrorKind::ReadOnlyFilesystem => Self::ReadOnly { path },
            _ => Self::Io { path, source },
        }
    }

    /// Create an error from a raw errno value.
    pub fn errno(path: impl Into<PathBuf>, errno: Errno) -> Self {
        Self::io(path, std::io::Error::from_raw_os_error(errno as i32))
    }

    /// Create a free-form error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// The path the error refers to, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::PermissionDenied { path }
            | Self::NotFound { path }
            | Self::AlreadyExists { path }
            | Self::IsADirectory { path }
            | Self::NotADirectory { path }
            | Self::DirectoryNotEmpty { path }
            | Self::InvalidFilename { path }
            | Self::CrossesDevices { path }
            | Self::ReadOnly { path }
            | Self::Io { path, .. } => Some(path),
            Self::Cancelled | Self::InvalidConfig { .. } | Self::Other { .. } => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// Short description without the path, suitable as dialog details.
    pub fn details(&self) -> String {
        match self {
            Self::PermissionDenied { .. } => "Permission denied".into(),
            Self::NotFound { .. } => "No such file or directory".into(),
            Self::AlreadyExists { .. } => "File exists".into(),
            Self::IsADirectory { .. } => "Is a directory".into(),
            Self::NotADirectory { .. } => "Not a directory".into(),
            Self::DirectoryNotEmpty { .. } => "Directory not empty".into(),
            Self::InvalidFilename { .. } => "Invalid filename".into(),
            Self::CrossesDevices { .. } => "Invalid cross-device link".into(),
            Self::ReadOnly { .. } => "Read-only file system".into(),
            Self::Io { source, .. } => source.to_string(),
            Self::Cancelled => "Operation was cancelled".into(),
            Self::InvalidConfig { message } | Self::Other { message } => message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_error_io() {
        let err = OpError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, OpError::PermissionDenied { .. }));
        assert!(err.is_permission_denied());
        assert_eq!(err.path(), Some(Path::new("/test/path")));
    }

    #[test]
    fn test_op_error_raw_errno() {
        let err = OpError::errno("/x", Errno::EINVAL);
        assert!(matches!(err, OpError::InvalidFilename { .. }));

        let err = OpError::errno("/x", Errno::EEXIST);
        assert!(matches!(err, OpError::AlreadyExists { .. }));

        let err = OpError::errno("/x", Errno::EXDEV);
        assert!(matches!(err, OpError::CrossesDevices { .. }));

        let err = OpError::errno("/x", Errno::ENOTEMPTY);
        assert!(matches!(err, OpError::DirectoryNotEmpty { .. }));
    }

    #[test]
    fn test_details_omit_path() {
        let err = OpError::errno("/secret/place", Errno::ENOENT);
        assert_eq!(err.details(), "No such file or directory");
        assert!(err.to_string().contains("/secret/place"));
        assert_eq!(OpError::Cancelled.path(), None);
    }
}
