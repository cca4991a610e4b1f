//! The trash store and the jobs that work on it directly.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use haul_core::OpError;
use serde::{Deserialize, Serialize};

use crate::fsinfo::{is_dir_parent, normalize};
use crate::job::CommonJob;
use crate::progress::{OperationProgress, OperationType};
use crate::request::{Choice, MessagePrompt};

/// Seconds a trashed item's timestamp may drift from the recorded one and
/// still be considered the same item.
pub const TIMESTAMP_TOLERANCE: i64 = 1;

/// One item in a trash store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashEntry {
    /// Store-specific identifier.
    pub id: OsString,
    pub original_path: PathBuf,
    /// Seconds since the epoch.
    pub deleted_at: i64,
}

/// A recoverable holding area for deleted items.
pub trait TrashStore: Send + Sync + fmt::Debug {
    /// Move `path` into the trash.
    fn trash(&self, path: &Path) -> Result<(), OpError>;

    fn list(&self) -> Result<Vec<TrashEntry>, OpError>;

    /// Put entries back at their original paths.
    fn restore(&self, entries: &[TrashEntry]) -> Result<(), OpError>;

    /// Delete entries for good.
    fn purge(&self, entries: &[TrashEntry]) -> Result<(), OpError>;

    /// Directory holding the trashed items, when there is one.
    fn root(&self) -> Option<PathBuf>;

    /// Whether `path` lives inside the trash.
    fn contains(&self, path: &Path) -> bool {
        self.root().is_some_and(|root| is_dir_parent(path, &root))
    }
}

fn trash_error(err: trash::Error) -> OpError {
    OpError::other(err.to_string())
}

/// The desktop's own trash, through the `trash` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTrash;

#[cfg(all(unix, not(target_os = "macos"), not(target_os = "ios"), not(target_os = "android")))]
mod system {
    use super::*;
    use trash::TrashItem;
    use trash::os_limited;

    fn matching(entries: &[TrashEntry]) -> Result<Vec<TrashItem>, OpError> {
        let items = os_limited::list().map_err(trash_error)?;
        Ok(items
            .into_iter()
            .filter(|item| entries.iter().any(|e| e.id == item.id))
            .collect())
    }

    pub fn list() -> Result<Vec<TrashEntry>, OpError> {
        let items = os_limited::list().map_err(trash_error)?;
        Ok(items
            .into_iter()
            .map(|item| TrashEntry {
                original_path: item.original_path(),
                deleted_at: item.time_deleted,
                id: item.id,
            })
            .collect())
    }

    pub fn restore(entries: &[TrashEntry]) -> Result<(), OpError> {
        os_limited::restore_all(matching(entries)?).map_err(trash_error)
    }

    pub fn purge(entries: &[TrashEntry]) -> Result<(), OpError> {
        os_limited::purge_all(matching(entries)?).map_err(trash_error)
    }

    pub fn root() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("Trash"))
    }
}

#[cfg(not(all(unix, not(target_os = "macos"), not(target_os = "ios"), not(target_os = "android"))))]
mod system {
    use super::*;

    fn unsupported() -> OpError {
        OpError::other("Browsing the trash is not supported on this platform")
    }

    pub fn list() -> Result<Vec<TrashEntry>, OpError> {
        Err(unsupported())
    }

    pub fn restore(_entries: &[TrashEntry]) -> Result<(), OpError> {
        Err(unsupported())
    }

    pub fn purge(_entries: &[TrashEntry]) -> Result<(), OpError> {
        Err(unsupported())
    }

    pub fn root() -> Option<PathBuf> {
        None
    }
}

impl TrashStore for SystemTrash {
    fn trash(&self, path: &Path) -> Result<(), OpError> {
        trash::delete(path).map_err(trash_error)
    }

    fn list(&self) -> Result<Vec<TrashEntry>, OpError> {
        system::list()
    }

    fn restore(&self, entries: &[TrashEntry]) -> Result<(), OpError> {
        system::restore(entries)
    }

    fn purge(&self, entries: &[TrashEntry]) -> Result<(), OpError> {
        system::purge(entries)
    }

    fn root(&self) -> Option<PathBuf> {
        system::root()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TrashInfo {
    original_path: PathBuf,
    deleted_at: i64,
}

/// A trash kept in a plain directory: items under `files/`, one JSON
/// record per item under `info/`.
#[derive(Debug, Clone)]
pub struct DirectoryTrash {
    root: PathBuf,
}

impl DirectoryTrash {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    fn info_dir(&self) -> PathBuf {
        self.root.join("info")
    }

    fn info_path(&self, id: &OsString) -> PathBuf {
        let mut name = id.clone();
        name.push(".json");
        self.info_dir().join(name)
    }

    fn unique_id(&self, name: &OsString) -> OsString {
        let files = self.files_dir();
        let mut id = name.clone();
        let mut n = 2;
        while fs::symlink_metadata(files.join(&id)).is_ok() || self.info_path(&id).exists() {
            id = name.clone();
            id.push(format!(".{n}"));
            n += 1;
        }
        id
    }

    fn remove_entry(&self, id: &OsString) -> Result<(), OpError> {
        let info = self.info_path(id);
        fs::remove_file(&info).map_err(|e| OpError::io(&info, e))
    }
}

impl TrashStore for DirectoryTrash {
    fn trash(&self, path: &Path) -> Result<(), OpError> {
        let original_path = normalize(path);
        let name = original_path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| OpError::InvalidFilename {
                path: path.to_path_buf(),
            })?;
        for dir in [self.files_dir(), self.info_dir()] {
            fs::create_dir_all(&dir).map_err(|e| OpError::io(&dir, e))?;
        }

        let id = self.unique_id(&name);
        let info = TrashInfo {
            original_path: original_path.clone(),
            deleted_at: chrono::Utc::now().timestamp(),
        };
        let json = serde_json::to_vec_pretty(&info).map_err(|e| OpError::other(e.to_string()))?;
        let info_path = self.info_path(&id);
        fs::write(&info_path, json).map_err(|e| OpError::io(&info_path, e))?;

        if let Err(e) = fs::rename(&original_path, self.files_dir().join(&id)) {
            let _ = fs::remove_file(&info_path);
            return Err(OpError::io(path, e));
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<TrashEntry>, OpError> {
        let info_dir = self.info_dir();
        let reader = match fs::read_dir(&info_dir) {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(OpError::io(&info_dir, e)),
        };

        let mut entries = Vec::new();
        for entry in reader {
            let entry = entry.map_err(|e| OpError::io(&info_dir, e))?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(id) = path.file_stem().map(|s| s.to_os_string()) else {
                continue;
            };
            let content = fs::read(&path).map_err(|e| OpError::io(&path, e))?;
            match serde_json::from_slice::<TrashInfo>(&content) {
                Ok(info) => entries.push(TrashEntry {
                    id,
                    original_path: info.original_path,
                    deleted_at: info.deleted_at,
                }),
                Err(e) => {
                    tracing::warn!(target: "haul::delete", path = %path.display(), error = %e, "unreadable trash info");
                }
            }
        }
        entries.sort_by_key(|e| e.deleted_at);
        Ok(entries)
    }

    fn restore(&self, entries: &[TrashEntry]) -> Result<(), OpError> {
        for entry in entries {
            let target = &entry.original_path;
            if fs::symlink_metadata(target).is_ok() {
                return Err(OpError::AlreadyExists {
                    path: target.clone(),
                });
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| OpError::io(parent, e))?;
            }
            let stored = self.files_dir().join(&entry.id);
            fs::rename(&stored, target).map_err(|e| OpError::io(&stored, e))?;
            self.remove_entry(&entry.id)?;
        }
        Ok(())
    }

    fn purge(&self, entries: &[TrashEntry]) -> Result<(), OpError> {
        for entry in entries {
            let stored = self.files_dir().join(&entry.id);
            let result = match fs::symlink_metadata(&stored) {
                Ok(meta) if meta.is_dir() => fs::remove_dir_all(&stored),
                Ok(_) => fs::remove_file(&stored),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            };
            result.map_err(|e| OpError::io(&stored, e))?;
            self.remove_entry(&entry.id)?;
        }
        Ok(())
    }

    fn root(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }
}

/// Permanently delete everything in the trash.
pub(crate) fn empty_trash(job: &mut CommonJob) {
    if job.config.confirm_trash {
        let choice = job.ask(MessagePrompt::question(
            "Empty all items from Trash?",
            "All items in the Trash will be permanently deleted.",
            &[Choice::Cancel, Choice::EmptyTrash],
        ));
        if choice != Choice::EmptyTrash {
            job.cancel_by_user();
            return;
        }
    }

    let entries = match job.trash.list() {
        Ok(entries) => entries,
        Err(e) => {
            let root = job.trash.root().unwrap_or_default();
            job.record_error(&root, e.details());
            job.abort();
            return;
        }
    };

    job.send_progress(
        OperationProgress::new(OperationType::EmptyTrash, entries.len(), 0)
            .with_text("Emptying Trash", ""),
    );
    for entry in entries {
        if job.is_aborted() {
            break;
        }
        match job.trash.purge(std::slice::from_ref(&entry)) {
            Ok(()) => job.outcome.files_processed += 1,
            Err(e) => job.record_error(&entry.original_path, e.details()),
        }
    }
}

/// Put back trashed items, found by original path and deletion time.
pub(crate) fn restore_from_trash(job: &mut CommonJob, items: &[(PathBuf, i64)]) {
    let entries = match job.trash.list() {
        Ok(entries) => entries,
        Err(e) => {
            let root = job.trash.root().unwrap_or_default();
            job.record_error(&root, e.details());
            job.abort();
            return;
        }
    };

    let mut matched = Vec::new();
    for (original, deleted_at) in items {
        let found = entries
            .iter()
            .filter(|e| {
                &e.original_path == original
                    && (e.deleted_at - deleted_at).abs() <= TIMESTAMP_TOLERANCE
            })
            .max_by_key(|e| e.deleted_at);
        match found {
            Some(entry) => matched.push(entry.clone()),
            None => job.record_error(original, "The item could not be found in the trash."),
        }
    }

    for entry in matched {
        if job.is_aborted() {
            break;
        }
        match job.trash.restore(std::slice::from_ref(&entry)) {
            Ok(()) => {
                job.outcome.files_processed += 1;
                job.changes.added(&entry.original_path);
                job.add_debuting(&entry.original_path);
            }
            Err(e) => job.record_error(&entry.original_path, e.details()),
        }
    }

    if job.outcome.files_processed == 0 && !items.is_empty() {
        job.outcome.success = false;
    }
}
