//! Counting the sources before a transfer, and checking the destination.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use haul_core::{OpError, SourceInfo};
use humansize::{DECIMAL, format_size};

use crate::fsinfo;
use crate::job::{CommonJob, Recovery};
use crate::naming::display_name;
use crate::progress::{OperationProgress, ScanKind, count_details};
use crate::request::{Choice, MessagePrompt};

fn report_count(job: &CommonJob, kind: ScanKind, info: &SourceInfo) {
    job.send_progress(
        OperationProgress::new(job.operation_type(), info.num_files, info.num_bytes)
            .with_text("", count_details(kind, info)),
    );
}

fn count(job: &CommonJob, kind: ScanKind, info: &mut SourceInfo, meta: &fs::Metadata) {
    info.count(meta.len(), meta.is_dir());
    if info.num_files_since_progress > job.config.scan_report_every {
        report_count(job, kind, info);
        info.num_files_since_progress = 0;
    }
}

/// Count every item under `sources` without following symlinks.
///
/// Directories are visited depth first: subdirectories go to the front of
/// the queue so deeper paths are counted before their siblings.
pub(crate) fn scan_sources(job: &mut CommonJob, sources: &[PathBuf], kind: ScanKind) -> SourceInfo {
    let mut info = SourceInfo::new();
    report_count(job, kind, &info);

    for source in sources {
        if job.is_aborted() {
            break;
        }
        scan_file(job, source, kind, &mut info);
    }

    report_count(job, kind, &info);
    tracing::debug!(
        target: "haul::scan",
        id = job.id,
        files = info.num_files,
        bytes = info.num_bytes,
        "sources scanned"
    );
    info
}

fn scan_file(job: &mut CommonJob, file: &Path, kind: ScanKind, info: &mut SourceInfo) {
    let mut dirs = VecDeque::new();

    loop {
        match fs::symlink_metadata(file) {
            Ok(meta) => {
                count(job, kind, info, &meta);
                if meta.is_dir() {
                    dirs.push_front(file.to_path_buf());
                }
                break;
            }
            Err(e) => {
                let secondary = if e.kind() == io::ErrorKind::PermissionDenied {
                    format!(
                        "The file \"{}\" cannot be handled because you do not have permissions to read it.",
                        display_name(file)
                    )
                } else {
                    format!(
                        "There was an error getting information about \"{}\".",
                        display_name(file)
                    )
                };
                match job.recover(scan_warning(kind, secondary, &e, &[
                    Choice::Cancel,
                    Choice::SkipAll,
                    Choice::Skip,
                    Choice::Retry,
                ])) {
                    Recovery::Retry => continue,
                    Recovery::Skip => job.skip_file(file),
                    Recovery::Abort => {}
                }
                break;
            }
        }
    }

    while !job.is_aborted() {
        let Some(dir) = dirs.pop_front() else {
            break;
        };
        scan_dir(job, &dir, kind, info, &mut dirs);
    }
}

fn scan_warning(kind: ScanKind, secondary: String, err: &io::Error, choices: &[Choice]) -> MessagePrompt {
    let prompt = MessagePrompt::warning(kind.error_primary(), secondary, choices);
    if err.kind() == io::ErrorKind::PermissionDenied {
        prompt
    } else {
        prompt.with_details(err.to_string())
    }
}

fn scan_dir(
    job: &mut CommonJob,
    dir: &Path,
    kind: ScanKind,
    info: &mut SourceInfo,
    dirs: &mut VecDeque<PathBuf>,
) {
    let saved = *info;

    'retry: loop {
        let reader = match fs::read_dir(dir) {
            Ok(reader) => reader,
            Err(e) => {
                let secondary = if e.kind() == io::ErrorKind::PermissionDenied {
                    format!(
                        "The folder \"{}\" cannot be handled because you do not have permissions to read it.",
                        display_name(dir)
                    )
                } else {
                    format!(
                        "There was an error reading the folder \"{}\".",
                        display_name(dir)
                    )
                };
                match job.recover(scan_warning(kind, secondary, &e, &[
                    Choice::Cancel,
                    Choice::SkipAll,
                    Choice::Skip,
                    Choice::Retry,
                ])) {
                    Recovery::Retry => continue 'retry,
                    Recovery::Skip => job.skip_file(dir),
                    Recovery::Abort => {}
                }
                return;
            }
        };

        let mut found = Vec::new();
        let mut failure = None;
        for entry in reader {
            if job.is_aborted() {
                return;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            match entry.metadata() {
                Ok(meta) => {
                    count(job, kind, info, &meta);
                    if meta.is_dir() {
                        found.push(entry.path());
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        let Some(e) = failure else {
            push_subdirs(dirs, found);
            return;
        };
        let secondary = if e.kind() == io::ErrorKind::PermissionDenied {
            format!(
                "Files in the folder \"{}\" cannot be handled because you do not have permissions to see them.",
                display_name(dir)
            )
        } else {
            format!(
                "There was an error getting information about the files in the folder \"{}\".",
                display_name(dir)
            )
        };
        match job.recover(scan_warning(kind, secondary, &e, &[
            Choice::Cancel,
            Choice::SkipFiles,
            Choice::Retry,
        ])) {
            Recovery::Retry => {
                *info = saved;
                continue 'retry;
            }
            Recovery::Skip => {
                job.skip_readdir_error(dir);
                push_subdirs(dirs, found);
            }
            Recovery::Abort => {}
        }
        return;
    }
}

fn push_subdirs(dirs: &mut VecDeque<PathBuf>, found: Vec<PathBuf>) {
    // Reversed so the queue front keeps enumeration order.
    for subdir in found.into_iter().rev() {
        dirs.push_front(subdir);
    }
}

/// Check that `dest` can receive `required` bytes. Problems that cannot be
/// worked around abort the job.
pub(crate) fn verify_destination(job: &mut CommonJob, dest: &Path, required: u64) {
    let primary = format!("Error while copying to \"{}\".", display_name(dest));

    loop {
        let meta = match fs::metadata(dest) {
            Ok(meta) => meta,
            Err(e) => {
                let prompt = if e.kind() == io::ErrorKind::PermissionDenied {
                    MessagePrompt::error(
                        &primary,
                        "You do not have permissions to access the destination folder.",
                        &[Choice::Cancel, Choice::Retry],
                    )
                } else {
                    MessagePrompt::error(
                        &primary,
                        "There was an error getting information about the destination.",
                        &[Choice::Cancel, Choice::Retry],
                    )
                    .with_details(OpError::io(dest, e).details())
                };
                match job.ask(prompt) {
                    Choice::Retry => continue,
                    _ => {
                        job.cancel_by_user();
                        return;
                    }
                }
            }
        };

        if !meta.is_dir() {
            job.ask(MessagePrompt::error(
                &primary,
                "The destination is not a folder.",
                &[Choice::Cancel],
            ));
            job.record_error(dest, "The destination is not a folder.");
            job.abort();
            return;
        }

        // Filesystems that cannot report their state are not checked further.
        let Ok(free) = fsinfo::free_space(dest) else {
            return;
        };
        if required > 0 && free < required {
            let prompt = MessagePrompt::warning(
                &primary,
                "There is not enough space on the destination. Try to remove files to make space.",
                &[Choice::Cancel, Choice::CopyAnyway, Choice::Retry],
            )
            .with_details(format!(
                "There is {} available, but {} is required.",
                format_size(free, DECIMAL),
                format_size(required, DECIMAL)
            ));
            match job.ask(prompt) {
                Choice::Retry => continue,
                Choice::CopyAnyway => {}
                _ => {
                    job.cancel_by_user();
                    return;
                }
            }
        }

        if fsinfo::is_read_only(dest).unwrap_or(false) {
            job.ask(MessagePrompt::error(
                &primary,
                "The destination is read-only.",
                &[Choice::Cancel],
            ));
            job.record_error(dest, "The destination is read-only.");
            job.abort();
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::test_job;
    use crate::progress::OperationType;
    use tempfile::TempDir;

    #[test]
    fn test_counts_files_and_directories() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::create_dir_all(root.join("c")).unwrap();
        fs::write(root.join("a/one"), b"12345").unwrap();
        fs::write(root.join("a/b/two"), b"123").unwrap();
        fs::write(root.join("three"), b"12").unwrap();
        let loose = temp.path().join("loose");
        fs::write(&loose, b"1").unwrap();

        let (mut job, _rx) = test_job(&runtime, OperationType::Copy, &temp.path().join("trash"));
        let info = scan_sources(&mut job, &[root, loose], ScanKind::Copy);

        // 4 directories (root, a, b, c) and 4 files.
        assert_eq!(info.num_files, 8);
        assert_eq!(info.num_bytes, 11);
        assert!(!job.is_aborted());
    }

    #[test]
    fn test_symlinks_are_not_followed() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("big"), vec![0u8; 1000]).unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let (mut job, _rx) = test_job(&runtime, OperationType::Copy, &temp.path().join("trash"));
        let info = scan_sources(&mut job, &[link], ScanKind::Copy);
        assert_eq!(info.num_files, 1);
        assert!(info.num_bytes < 1000);
    }

    #[test]
    fn test_verify_destination_accepts_directory() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let temp = TempDir::new().unwrap();
        let (mut job, _rx) = test_job(&runtime, OperationType::Copy, &temp.path().join("trash"));
        verify_destination(&mut job, temp.path(), 1);
        assert!(!job.is_aborted());
    }
}
