//! Trashing and permanent deletion.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use haul_core::{OpError, SourceInfo, TransferInfo};

use crate::fsinfo::normalize;
use crate::job::{CommonJob, Recovery};
use crate::naming::display_name;
use crate::progress::{OperationProgress, ScanKind, delete_details, trash_details};
use crate::request::{Choice, MessagePrompt};
use crate::scan::scan_sources;
use crate::undo::UndoInfo;

/// Trash or delete `targets`.
///
/// Items already in the trash and, without `try_trash`, every item are
/// deleted for good after a confirmation. Items in staging folders or on
/// the desktop layer are deleted without asking.
pub(crate) fn run(job: &mut CommonJob, targets: &[PathBuf], try_trash: bool) {
    tracing::info!(
        target: "haul::delete",
        id = job.id,
        count = targets.len(),
        try_trash,
        "delete started"
    );

    let mut to_trash = Vec::new();
    let mut to_delete = Vec::new();
    let mut confirm_in_trash = false;
    let mut confirm_delete = false;
    for target in targets {
        if try_trash && job.trash.contains(target) {
            confirm_in_trash = true;
            to_delete.push(target.clone());
        } else if job.config.is_staging(target) || job.config.is_on_desktop(target) {
            to_delete.push(target.clone());
        } else if try_trash {
            to_trash.push(target.clone());
        } else {
            confirm_delete = true;
            to_delete.push(target.clone());
        }
    }

    if try_trash {
        job.undo_info = Some(UndoInfo::Trash { items: Vec::new() });
    }

    let mut skipped = 0;
    let mut executor = DeleteExecutor::new(job);
    if !to_delete.is_empty() {
        let confirmed = if confirm_in_trash {
            executor.confirm(&to_delete, true)
        } else if confirm_delete {
            executor.confirm(&to_delete, false)
        } else {
            true
        };
        if !confirmed {
            executor.job.cancel_by_user();
            return;
        }
        skipped += executor.delete_files(&to_delete);
    }
    if !to_trash.is_empty() {
        skipped += executor.trash_files(&to_trash);
    }

    let processed = executor.processed();
    job.outcome.files_processed = processed;
    if !targets.is_empty() && skipped == targets.len() {
        job.outcome.user_cancel = true;
    }
}

struct DeleteExecutor<'a> {
    job: &'a mut CommonJob,
    source: SourceInfo,
    transfer: TransferInfo,
    trashed: usize,
}

impl<'a> DeleteExecutor<'a> {
    fn new(job: &'a mut CommonJob) -> Self {
        Self {
            job,
            source: SourceInfo::new(),
            transfer: TransferInfo::new(),
            trashed: 0,
        }
    }

    fn processed(&self) -> usize {
        self.transfer.num_files + self.trashed
    }

    fn files_left(&self) -> usize {
        self.source.num_files.saturating_sub(self.transfer.num_files)
    }

    /// Ask before deleting for good. Disabled by `confirm_trash = false`.
    fn confirm(&mut self, files: &[PathBuf], from_trash: bool) -> bool {
        if !self.job.config.confirm_trash {
            return true;
        }
        let primary = match (files, from_trash) {
            ([file], true) => format!(
                "Are you sure you want to permanently delete \"{}\" from the trash?",
                display_name(file)
            ),
            (_, true) => format!(
                "Are you sure you want to permanently delete the {} selected items from the trash?",
                files.len()
            ),
            ([file], false) => format!(
                "Are you sure you want to permanently delete \"{}\"?",
                display_name(file)
            ),
            (_, false) => format!(
                "Are you sure you want to permanently delete the {} selected items?",
                files.len()
            ),
        };
        let choice = self.job.ask(MessagePrompt::question(
            primary,
            "If you delete an item, it will be permanently lost.",
            &[Choice::Cancel, Choice::Delete],
        ));
        choice == Choice::Delete
    }

    fn report_delete_progress(&mut self) {
        if !self.job.progress_due() {
            return;
        }
        let reliable = Duration::from_secs(self.job.config.reliable_rate_secs);
        let details = delete_details(&self.source, &self.transfer, self.job.elapsed(), reliable);
        self.job.send_progress(
            OperationProgress::from_counters(self.job.operation_type(), &self.source, &self.transfer)
                .with_text("Deleting files", details),
        );
    }

    fn report_trash_progress(&self, total: usize) {
        let mut progress = OperationProgress::new(self.job.operation_type(), total, 0)
            .with_text("Moving files to trash", trash_details(self.trashed, total));
        progress.files_completed = self.trashed;
        self.job.send_progress(progress);
    }

    /// Delete `files` for good. Returns how many of them were skipped.
    fn delete_files(&mut self, files: &[PathBuf]) -> usize {
        if self.job.is_aborted() {
            return 0;
        }
        let scanned = scan_sources(self.job, files, ScanKind::Delete);
        self.source.num_files += scanned.num_files;
        self.source.num_bytes += scanned.num_bytes;
        if self.job.is_aborted() {
            return 0;
        }
        self.job.restart_timer();
        self.report_delete_progress();

        let mut skipped = 0;
        for file in files {
            if self.job.is_aborted() {
                break;
            }
            if !self.delete_file(file) {
                skipped += 1;
            }
        }
        skipped
    }

    /// Returns false when `file`, or something below it, was left behind.
    fn delete_file(&mut self, file: &Path) -> bool {
        if self.job.should_skip_file(file) {
            self.job.record_skip(file);
            return false;
        }

        let is_dir = fs::symlink_metadata(file).is_ok_and(|m| m.is_dir());
        let removed = if is_dir {
            fs::remove_dir(file)
        } else {
            fs::remove_file(file)
        };
        let err = match removed {
            Ok(()) => {
                self.job.changes.removed(file);
                self.transfer.num_files += 1;
                self.report_delete_progress();
                return true;
            }
            Err(e) => e,
        };
        if is_dir && err.kind() == io::ErrorKind::DirectoryNotEmpty {
            return self.delete_dir(file);
        }

        let details = OpError::io(file, err).details();
        let files_left = self.files_left();
        self.job.item_failed(
            file,
            "Error while deleting.",
            format!("There was an error deleting {}.", display_name(file)),
            Some(details),
            files_left,
        );
        false
    }

    /// Delete the children of `dir`, then `dir` itself unless a child was
    /// left behind.
    fn delete_dir(&mut self, dir: &Path) -> bool {
        let skip_read_error = self.job.should_skip_readdir_error(dir);
        let mut kept_child = false;

        loop {
            let reader = match fs::read_dir(dir) {
                Ok(reader) => reader,
                Err(e) => {
                    let (secondary, details) = if e.kind() == io::ErrorKind::PermissionDenied {
                        (
                            format!(
                                "The folder \"{}\" cannot be deleted because you do not have permissions to read it.",
                                display_name(dir)
                            ),
                            None,
                        )
                    } else {
                        (
                            format!("There was an error reading the folder \"{}\".", display_name(dir)),
                            Some(OpError::io(dir, e).details()),
                        )
                    };
                    let mut prompt = MessagePrompt::warning(
                        "Error while deleting.",
                        secondary.clone(),
                        &[Choice::Cancel, Choice::Skip, Choice::Retry],
                    );
                    if let Some(details) = details {
                        prompt = prompt.with_details(details);
                    }
                    match self.job.recover(prompt) {
                        Recovery::Retry => continue,
                        Recovery::Skip => {
                            self.job.record_error(dir, secondary);
                            kept_child = true;
                        }
                        Recovery::Abort => {}
                    }
                    break;
                }
            };

            let mut children = Vec::new();
            let mut failure = None;
            for entry in reader {
                match entry {
                    Ok(entry) => children.push(entry.path()),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            for child in &children {
                if self.job.is_aborted() {
                    break;
                }
                if !self.delete_file(child) {
                    kept_child = true;
                }
            }

            if let Some(e) = failure.filter(|_| !skip_read_error) {
                let secondary = if e.kind() == io::ErrorKind::PermissionDenied {
                    format!(
                        "Files in the folder \"{}\" cannot be deleted because you do not have permissions to see them.",
                        display_name(dir)
                    )
                } else {
                    format!(
                        "There was an error getting information about the files in the folder \"{}\".",
                        display_name(dir)
                    )
                };
                let prompt = MessagePrompt::warning(
                    "Error while deleting.",
                    secondary.clone(),
                    &[Choice::Cancel, Choice::SkipFiles],
                )
                .with_details(OpError::io(dir, e).details());
                if self.job.recover(prompt) != Recovery::Abort {
                    self.job.record_error(dir, secondary);
                    kept_child = true;
                }
            }
            break;
        }

        if self.job.is_aborted() {
            return false;
        }
        if kept_child {
            self.job.record_skip(dir);
            return false;
        }

        match fs::remove_dir(dir) {
            Ok(()) => {
                self.job.changes.removed(dir);
                self.transfer.num_files += 1;
                self.report_delete_progress();
                true
            }
            Err(e) => {
                let details = OpError::io(dir, e).details();
                let files_left = self.files_left();
                self.job.item_failed(
                    dir,
                    "Error while deleting.",
                    format!("Could not remove the folder {}.", display_name(dir)),
                    Some(details),
                    files_left,
                );
                false
            }
        }
    }

    /// Move `files` into the trash. Returns how many were skipped; items
    /// the user chose to delete instead are deleted at the end.
    fn trash_files(&mut self, files: &[PathBuf]) -> usize {
        if self.job.is_aborted() {
            return 0;
        }
        let mut total = files.len();
        let mut skipped = 0;
        let mut to_delete = Vec::new();
        self.report_trash_progress(total);

        for file in files {
            if self.job.is_aborted() {
                break;
            }
            let original = normalize(file);
            let err = match self.job.trash.trash(file) {
                Ok(()) => {
                    self.job.changes.removed(file);
                    if let Some(UndoInfo::Trash { items }) = &mut self.job.undo_info {
                        items.push((original, chrono::Utc::now().timestamp()));
                    }
                    self.trashed += 1;
                    self.report_trash_progress(total);
                    continue;
                }
                Err(e) => e,
            };
            tracing::debug!(target: "haul::delete", path = %file.display(), error = %err, "trash failed");

            let show_all = total - self.trashed > 1;
            total -= 1;
            if self.job.skip_all_error {
                self.job.record_skip(file);
                skipped += 1;
                continue;
            }
            if self.job.delete_all {
                to_delete.push(file.clone());
                continue;
            }

            let choices: &[Choice] = if show_all {
                &[
                    Choice::Cancel,
                    Choice::SkipAll,
                    Choice::Skip,
                    Choice::DeleteAll,
                    Choice::Delete,
                ]
            } else {
                &[Choice::Cancel, Choice::Skip, Choice::Delete]
            };
            let prompt = MessagePrompt::question(
                "Cannot move file to trash, do you want to delete immediately?",
                format!("The file \"{}\" cannot be moved to the trash.", display_name(file)),
                choices,
            )
            .with_details(err.details());
            match self.job.ask(prompt) {
                Choice::SkipAll => {
                    self.job.skip_all_error = true;
                    self.job.record_skip(file);
                    skipped += 1;
                }
                Choice::Skip => {
                    self.job.record_skip(file);
                    skipped += 1;
                }
                Choice::DeleteAll => {
                    self.job.delete_all = true;
                    to_delete.push(file.clone());
                }
                Choice::Delete => to_delete.push(file.clone()),
                _ => {
                    self.job.cancel_by_user();
                    break;
                }
            }
        }

        if !to_delete.is_empty() {
            skipped += self.delete_files(&to_delete);
        }
        skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::test_job;
    use crate::progress::OperationType;
    use tempfile::TempDir;

    #[test]
    fn test_permanent_delete_removes_tree() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dir");
        fs::create_dir_all(dir.join("a/b")).unwrap();
        fs::write(dir.join("a/b/file"), b"x").unwrap();
        fs::write(dir.join("top"), b"y").unwrap();

        let (mut job, _rx) = test_job(&runtime, OperationType::Delete, &temp.path().join("trash"));
        job.config = std::sync::Arc::new(haul_core::EngineConfig {
            confirm_trash: false,
            ..Default::default()
        });
        run(&mut job, &[dir.clone()], false);

        assert!(!dir.exists());
        // dir, a, b, file, top
        assert_eq!(job.outcome.files_processed, 5);
        assert!(job.undo_info.is_none());
    }

    #[test]
    fn test_skipped_child_keeps_directory() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dir");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("keep"), b"1").unwrap();
        fs::write(dir.join("drop"), b"2").unwrap();

        let (mut job, _rx) = test_job(&runtime, OperationType::Delete, &temp.path().join("trash"));
        job.config = std::sync::Arc::new(haul_core::EngineConfig {
            confirm_trash: false,
            ..Default::default()
        });
        job.skip_file(&dir.join("keep"));
        run(&mut job, &[dir.clone()], false);

        assert!(dir.join("keep").exists());
        assert!(!dir.join("drop").exists());
        assert!(job.outcome.skipped.contains(&dir));
        assert!(job.outcome.skipped.contains(&dir.join("keep")));
        // The only requested item was skipped.
        assert!(job.outcome.user_cancel);
    }

    #[test]
    fn test_trash_records_undo_items() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("note");
        fs::write(&file, b"x").unwrap();

        let (mut job, _rx) = test_job(&runtime, OperationType::Trash, &temp.path().join("trash"));
        run(&mut job, &[file.clone()], true);

        assert!(!file.exists());
        assert_eq!(job.outcome.files_processed, 1);
        match job.undo_info.as_ref().unwrap() {
            UndoInfo::Trash { items } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].0, normalize(&file));
            }
            other => panic!("unexpected undo entry {other:?}"),
        }
    }
}
