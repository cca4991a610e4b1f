//! Symbolic links to the sources.

use std::ffi::OsString;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use haul_core::{OpError, Position};
use nix::errno::Errno;

use crate::fsinfo::{self, normalize};
use crate::job::CommonJob;
use crate::naming::{self, display_name};
use crate::progress::OperationProgress;
use crate::undo::{TransferKind, TransferUndo, UndoInfo};

/// Link every source into `dest_dir`.
pub(crate) fn run(job: &mut CommonJob, sources: &[PathBuf], dest_dir: &Path, positions: &[Position]) {
    tracing::info!(
        target: "haul::transfer",
        id = job.id,
        sources = sources.len(),
        destination = %dest_dir.display(),
        "link started"
    );
    let src_dir = sources.first().and_then(|s| s.parent()).map(Path::to_path_buf);
    job.undo_info = Some(UndoInfo::Transfer(TransferUndo::new(
        TransferKind::CreateLink,
        src_dir,
        Some(dest_dir.to_path_buf()),
    )));

    let mut linker = Linker {
        job,
        dest_fs_type: None,
        max_length: fsinfo::max_name_length(dest_dir),
    };
    let total = sources.len();
    for (index, src) in sources.iter().enumerate() {
        if linker.job.is_aborted() {
            break;
        }
        linker.report_progress(dest_dir, total, index);
        linker.link_file(src, dest_dir, positions.get(index).copied(), total - index);
    }
}

struct Linker<'a> {
    job: &'a mut CommonJob,
    dest_fs_type: Option<String>,
    max_length: Option<usize>,
}

impl Linker<'_> {
    fn report_progress(&self, dest_dir: &Path, total: usize, done: usize) {
        let left = total - done;
        let details = if left == 1 {
            "Making link to 1 file".to_string()
        } else {
            format!("Making links to {left} files")
        };
        let mut progress = OperationProgress::new(self.job.operation_type(), total, 0)
            .with_text(format!("Creating links in \"{}\"", display_name(dest_dir)), details);
        progress.files_completed = done;
        self.job.send_progress(progress);
    }

    fn link_path(&self, src: &Path, dest_dir: &Path, count: u32) -> PathBuf {
        let name = src
            .file_name()
            .unwrap_or(src.as_os_str())
            .to_os_string();
        let name = match name.to_str() {
            Some(utf8) => OsString::from(naming::link_name(utf8, count, self.max_length)),
            None => naming::link_name_raw(&name, count),
        };
        dest_dir.join(naming::for_fs(name, self.dest_fs_type.as_deref()))
    }

    fn link_file(&mut self, src: &Path, dest_dir: &Path, position: Option<Position>, files_left: usize) {
        let target = normalize(src);
        let mut count: u32 = if target.parent() == Some(normalize(dest_dir).as_path()) {
            1
        } else {
            0
        };
        let mut handled_invalid = false;

        loop {
            if self.job.is_aborted() {
                return;
            }
            let dest = self.link_path(src, dest_dir, count);
            let err = match symlink(&target, &dest) {
                Ok(()) => {
                    self.job.outcome.files_processed += 1;
                    self.job.changes.added(&dest);
                    match position {
                        Some(position) => self.job.changes.position_set(&dest, position),
                        None => self.job.changes.position_remove(&dest),
                    }
                    self.job.add_debuting(&dest);
                    if let Some(UndoInfo::Transfer(undo)) = &mut self.job.undo_info {
                        undo.add_pair(src, &dest);
                    }
                    return;
                }
                Err(e) => e,
            };

            match err.raw_os_error().map(Errno::from_raw) {
                Some(Errno::EEXIST) => {
                    count += 1;
                    continue;
                }
                Some(Errno::EINVAL) if !handled_invalid => {
                    handled_invalid = true;
                    self.dest_fs_type = fsinfo::filesystem_type(dest_dir);
                    if self.link_path(src, dest_dir, count) != dest {
                        continue;
                    }
                }
                _ => {}
            }

            self.link_failed(src, dest_dir, err, files_left);
            return;
        }
    }

    fn link_failed(&mut self, src: &Path, dest_dir: &Path, err: io::Error, files_left: usize) {
        let unsupported = err.raw_os_error() == Some(Errno::EOPNOTSUPP as i32);
        let (secondary, details) = if unsupported {
            ("The target doesn't support symbolic links.".to_string(), None)
        } else {
            (
                format!("There was an error creating the symlink in {}.", display_name(dest_dir)),
                Some(OpError::io(src, err).details()),
            )
        };
        self.job.item_failed(
            src,
            format!("Error while creating link to {}.", display_name(src)),
            secondary,
            details,
            files_left,
        );
    }
}
