//! Copy, move and duplicate.
//!
//! Every top-level source runs through [`CopyMoveJob::copy_move_file`]: the
//! destination name is resolved, a non-recursive native call is attempted
//! and its outcome decides between done, conflict handling, recursing into
//! a directory or reporting a failure. Moves first try a plain rename of
//! every top-level item and only fall back to copy-then-delete for the
//! items that could not be renamed.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::time::Duration;

use haul_core::{OpError, Position, SourceInfo, TransferInfo};
use nix::errno::Errno;

use crate::conflict::{ConflictOutcome, ConflictPrompt, StickyDecision};
use crate::fsinfo;
use crate::job::{CommonJob, Recovery};
use crate::naming::{self, display_name};
use crate::progress::{
    OperationProgress, ScanKind, TransferVerb, transfer_details, transfer_status,
};
use crate::request::{Choice, MessagePrompt};
use crate::scan::{scan_sources, verify_destination};
use crate::trusted;
use crate::undo::{TransferKind, TransferUndo, UndoInfo};

const CHUNK_SIZE: usize = 256 * 1024;

/// Files-left count for prompts that offer Skip All regardless.
const SKIP_ALL_ALWAYS: usize = usize::MAX;

/// Which transfer a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferMode {
    Copy,
    Move,
    /// Copy next to the source under a unique name.
    Duplicate,
}

/// The sources and destination of a transfer job.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransferRequest<'a> {
    pub mode: TransferMode,
    pub sources: &'a [PathBuf],
    /// Absent for duplicates.
    pub destination: Option<&'a Path>,
    pub positions: &'a [Position],
    /// Name for the single top-level item of a copy.
    pub target_name: Option<&'a str>,
}

/// Result of one native, non-recursive attempt.
#[derive(Debug)]
enum Attempt {
    Done,
    Exists,
    IsDirectory,
    /// The source is a directory that has to be created and filled.
    WouldRecurse,
    /// The source is a directory and the destination one already.
    WouldMerge,
    /// A rename is impossible across filesystems.
    CrossDevice,
    InvalidName(io::Error),
    Cancelled,
    Failed(io::Error),
}

impl Attempt {
    fn from_error(err: io::Error) -> Self {
        match err.raw_os_error().map(Errno::from_raw) {
            Some(Errno::EEXIST) => Self::Exists,
            Some(Errno::EISDIR) => Self::IsDirectory,
            Some(Errno::EXDEV) => Self::CrossDevice,
            Some(Errno::EINVAL) => Self::InvalidName(err),
            _ => Self::Failed(err),
        }
    }

    /// The error to show when the attempt ends up unhandled.
    fn into_error(self) -> io::Error {
        match self {
            Self::Exists => io::Error::from_raw_os_error(Errno::EEXIST as i32),
            Self::IsDirectory => io::Error::from_raw_os_error(Errno::EISDIR as i32),
            Self::CrossDevice => io::Error::from_raw_os_error(Errno::EXDEV as i32),
            Self::InvalidName(err) | Self::Failed(err) => err,
            Self::Done | Self::WouldRecurse | Self::WouldMerge | Self::Cancelled => {
                io::Error::other("unexpected transfer state")
            }
        }
    }
}

/// How an occupied destination is handled.
enum Occupied {
    Overwrite,
    Skip,
    Rename(PathBuf),
    Cancel,
}

enum CreateDir {
    Created,
    /// The name was adjusted for the destination filesystem.
    Renamed,
    Failed,
}

enum DirOutcome {
    Retry,
    Finished { skipped: bool },
}

/// One item handed to [`CopyMoveJob::copy_move_file`].
#[derive(Debug, Clone, Copy)]
struct Step<'a> {
    dest_dir: &'a Path,
    /// Name to use instead of the source's.
    name: Option<&'a OsStr>,
    /// Whether the source is known to share the destination's filesystem.
    same_fs: bool,
    /// Pick a fresh "(copy)" name instead of conflicting.
    unique: bool,
    toplevel: bool,
    position: Option<Position>,
    overwrite: bool,
    /// Record the origin/target pair in the undo entry.
    record: bool,
}

/// A top-level move that has to go through copy-then-delete.
#[derive(Debug)]
struct Deferred {
    source: PathBuf,
    name: Option<OsString>,
    overwrite: bool,
    position: Option<Position>,
}

struct CopyMoveJob<'a> {
    common: &'a mut CommonJob,
    mode: TransferMode,
    sources: &'a [PathBuf],
    destination: Option<&'a Path>,
    /// Filesystem type of the destination, once a name was rejected.
    dest_fs_type: Option<String>,
    name_limits: HashMap<PathBuf, Option<usize>>,
    source: SourceInfo,
    transfer: TransferInfo,
    /// Items a move already renamed in place before falling back to copying.
    renamed: TransferInfo,
    readonly_source_fs: bool,
}

/// Run a copy, move or duplicate job.
pub(crate) fn run(common: &mut CommonJob, request: TransferRequest<'_>) {
    let kind = match request.mode {
        TransferMode::Copy => TransferKind::Copy,
        TransferMode::Duplicate => TransferKind::Duplicate,
        TransferMode::Move
            if request
                .sources
                .first()
                .is_some_and(|s| common.trash.contains(s)) =>
        {
            TransferKind::RestoreFromTrash
        }
        TransferMode::Move => TransferKind::Move,
    };
    let src_dir = request
        .sources
        .first()
        .and_then(|s| s.parent())
        .map(Path::to_path_buf);
    let dest_dir = request
        .destination
        .map(Path::to_path_buf)
        .or_else(|| src_dir.clone());
    common.undo_info = Some(UndoInfo::Transfer(TransferUndo::new(kind, src_dir, dest_dir)));

    tracing::info!(
        target: "haul::transfer",
        id = common.id,
        mode = ?request.mode,
        sources = request.sources.len(),
        destination = ?request.destination,
        "transfer started"
    );

    let mut job = CopyMoveJob {
        common: &mut *common,
        mode: request.mode,
        sources: request.sources,
        destination: request.destination,
        dest_fs_type: None,
        name_limits: HashMap::new(),
        source: SourceInfo::new(),
        transfer: TransferInfo::new(),
        renamed: TransferInfo::new(),
        readonly_source_fs: false,
    };
    match request.mode {
        TransferMode::Copy | TransferMode::Duplicate => {
            job.copy_files(request.positions, request.target_name)
        }
        TransferMode::Move => job.move_files(request.positions),
    }

    let files = job.renamed.num_files + job.transfer.num_files;
    let bytes = job.renamed.num_bytes + job.transfer.num_bytes;
    common.outcome.files_processed = files;
    common.outcome.bytes_processed = bytes;
}

impl CopyMoveJob<'_> {
    fn is_move(&self) -> bool {
        self.mode == TransferMode::Move
    }

    fn files_left(&self) -> usize {
        self.source.num_files.saturating_sub(self.transfer.num_files)
    }

    fn verb(&self) -> TransferVerb {
        match self.mode {
            TransferMode::Copy => TransferVerb::Copying,
            TransferMode::Move => TransferVerb::Moving,
            TransferMode::Duplicate => TransferVerb::Duplicating,
        }
    }

    fn report_progress(&mut self) {
        if !self.common.progress_due() {
            return;
        }
        let reliable = Duration::from_secs(self.common.config.reliable_rate_secs);
        let status = transfer_status(
            self.verb(),
            self.sources,
            self.destination,
            &self.source,
            &self.transfer,
        );
        let details = transfer_details(&self.source, &self.transfer, self.common.elapsed(), reliable);
        self.common.send_progress(
            OperationProgress::from_counters(self.common.operation_type(), &self.source, &self.transfer)
                .with_text(status, details),
        );
    }

    fn name_limit(&mut self, dir: &Path) -> Option<usize> {
        *self
            .name_limits
            .entry(dir.to_path_buf())
            .or_insert_with(|| fsinfo::max_name_length(dir))
    }

    /// Destination path for `src` inside `dest_dir`. `unique_nr` selects
    /// the nth duplicate name.
    fn target(
        &mut self,
        src: &Path,
        dest_dir: &Path,
        name: Option<&OsStr>,
        unique_nr: Option<u64>,
    ) -> PathBuf {
        let base = name
            .or_else(|| src.file_name())
            .unwrap_or(src.as_os_str())
            .to_os_string();
        let base = match unique_nr {
            None => base,
            Some(nr) => match base.to_str() {
                Some(utf8) => {
                    let max = self.name_limit(dest_dir);
                    OsString::from(naming::duplicate_name(utf8, nr, max))
                }
                None => naming::duplicate_name_raw(&base, nr),
            },
        };
        dest_dir.join(naming::for_fs(base, self.dest_fs_type.as_deref()))
    }

    /// `dest` with its name adjusted for the destination filesystem.
    fn sanitized(&self, dest: &Path) -> PathBuf {
        match (dest.parent(), dest.file_name()) {
            (Some(parent), Some(name)) => {
                parent.join(naming::for_fs(name.to_os_string(), self.dest_fs_type.as_deref()))
            }
            _ => dest.to_path_buf(),
        }
    }

    /// Look up the destination's filesystem once per job, returning the
    /// adjusted destination when its name changes.
    fn retry_name(&mut self, dest: &Path, handled: &mut bool) -> Option<PathBuf> {
        if *handled {
            return None;
        }
        *handled = true;
        let dir = dest.parent()?;
        self.dest_fs_type = fsinfo::filesystem_type(dir);
        tracing::debug!(
            target: "haul::transfer",
            fs_type = ?self.dest_fs_type,
            "name rejected by destination filesystem"
        );
        let fixed = self.sanitized(dest);
        (fixed != dest).then_some(fixed)
    }

    fn record_pair(&mut self, src: &Path, dest: &Path) {
        if let Some(UndoInfo::Transfer(undo)) = &mut self.common.undo_info {
            undo.add_pair(src, dest);
        }
    }

    fn announce_toplevel(&mut self, dest: &Path, position: Option<Position>) {
        match position {
            Some(position) => self.common.changes.position_set(dest, position),
            None => self.common.changes.position_remove(dest),
        }
        self.common.add_debuting(dest);
    }

    /// Refuse to put a folder into itself or a file over itself.
    fn violates_ancestry(
        &mut self,
        src: &Path,
        dest_dir: &Path,
        dest: &Path,
        files_left: usize,
    ) -> bool {
        let verb = if self.is_move() { "move" } else { "copy" };
        let (primary, secondary) = if fsinfo::is_dir_parent(dest_dir, src) {
            (
                format!("You cannot {verb} a folder into itself."),
                "The destination folder is inside the source folder.",
            )
        } else if fsinfo::is_dir_parent(src, dest) {
            (
                format!("You cannot {verb} a file over itself."),
                "The source file would be overwritten by the destination.",
            )
        } else {
            return false;
        };
        self.common
            .item_failed(src, primary, secondary, None, files_left);
        true
    }

    fn transfer_failed(&mut self, src: &Path, dest_dir: &Path, err: io::Error) {
        let (primary, secondary) = if self.is_move() {
            (
                format!("Error while moving \"{}\".", display_name(src)),
                format!("There was an error moving the file into {}.", display_name(dest_dir)),
            )
        } else {
            (
                format!("Error while copying \"{}\".", display_name(src)),
                format!("There was an error copying the file into {}.", display_name(dest_dir)),
            )
        };
        let details = OpError::io(src, err).details();
        let files_left = self.files_left();
        self.common
            .item_failed(src, primary, secondary, Some(details), files_left);
    }

    fn occupied(&mut self, src: &Path, dest: &Path, dest_dir: &Path) -> Occupied {
        let prompt = ConflictPrompt::new(src, dest, dest_dir);
        match self.common.conflicts.decide(prompt.kind) {
            Some(StickyDecision::Overwrite) => return Occupied::Overwrite,
            Some(StickyDecision::Skip) => {
                self.common.record_skip(src);
                return Occupied::Skip;
            }
            None => {}
        }

        let response = self.common.resolve_conflict(prompt);
        match (response.outcome, response.new_name) {
            (ConflictOutcome::Skip, _) => {
                self.common.record_skip(src);
                Occupied::Skip
            }
            (ConflictOutcome::Replace | ConflictOutcome::Merge, _) => Occupied::Overwrite,
            (ConflictOutcome::Rename, Some(name)) => Occupied::Rename(
                dest_dir.join(naming::for_fs(name.into(), self.dest_fs_type.as_deref())),
            ),
            (ConflictOutcome::Cancel | ConflictOutcome::Rename, _) => {
                self.common.cancel_by_user();
                Occupied::Cancel
            }
        }
    }

    fn copy_files(&mut self, positions: &[Position], target_name: Option<&str>) {
        let sources = self.sources;
        let verify_dir = match self.destination {
            Some(dest) => Some(dest.to_path_buf()),
            None => sources.first().and_then(|s| s.parent()).map(Path::to_path_buf),
        };
        if let Some(dir) = &verify_dir {
            verify_destination(self.common, dir, 0);
            if self.common.is_aborted() {
                return;
            }
        }

        self.source = scan_sources(self.common, sources, ScanKind::Copy);
        if self.common.is_aborted() {
            return;
        }
        if let Some(dir) = &verify_dir {
            verify_destination(self.common, dir, self.source.num_bytes);
            if self.common.is_aborted() {
                return;
            }
        }

        self.readonly_source_fs = sources
            .first()
            .and_then(|s| s.parent())
            .is_some_and(|dir| fsinfo::is_read_only(dir).unwrap_or(false));
        self.common.restart_timer();
        self.report_progress();

        let target_name = target_name.map(OsStr::new);
        for (index, src) in sources.iter().enumerate() {
            if self.common.is_aborted() {
                break;
            }
            let Some(dest_dir) = self.destination.or_else(|| src.parent()) else {
                self.common.record_error(src, "The item has no parent folder.");
                continue;
            };
            let same_fs = fsinfo::same_filesystem(src, dest_dir);
            self.copy_move_file(src, Step {
                dest_dir,
                name: target_name,
                same_fs,
                unique: self.destination.is_none(),
                toplevel: true,
                position: positions.get(index).copied(),
                overwrite: false,
                record: true,
            });
        }
    }

    fn move_files(&mut self, positions: &[Position]) {
        let sources = self.sources;
        let Some(dest_dir) = self.destination else {
            return;
        };
        verify_destination(self.common, dest_dir, 0);
        if self.common.is_aborted() {
            return;
        }

        let total = sources.len();
        let mut deferred = Vec::new();
        for (index, src) in sources.iter().enumerate() {
            if self.common.is_aborted() {
                break;
            }
            self.report_preparing(dest_dir, total, index);
            self.move_file_prepare(
                src,
                dest_dir,
                positions.get(index).copied(),
                total - index,
                &mut deferred,
            );
        }
        if self.common.is_aborted() || deferred.is_empty() {
            return;
        }

        tracing::debug!(
            target: "haul::transfer",
            id = self.common.id,
            deferred = deferred.len(),
            "falling back to copy and delete"
        );
        let fallback_sources: Vec<PathBuf> = deferred.iter().map(|d| d.source.clone()).collect();
        // Phase two counts against its own scan.
        self.renamed = std::mem::take(&mut self.transfer);
        self.source = scan_sources(self.common, &fallback_sources, ScanKind::Move);
        if self.common.is_aborted() {
            return;
        }
        verify_destination(self.common, dest_dir, self.source.num_bytes);
        if self.common.is_aborted() {
            return;
        }
        self.readonly_source_fs = false;
        self.common.restart_timer();
        self.report_progress();

        for item in &deferred {
            if self.common.is_aborted() {
                break;
            }
            let same_fs = fsinfo::same_filesystem(&item.source, dest_dir);
            self.copy_move_file(&item.source, Step {
                dest_dir,
                name: item.name.as_deref(),
                same_fs,
                unique: false,
                toplevel: true,
                position: item.position,
                overwrite: item.overwrite,
                record: true,
            });
        }
    }

    fn report_preparing(&self, dest_dir: &Path, total: usize, done: usize) {
        let left = total - done;
        let details = if left == 1 {
            "Preparing to move 1 file".to_string()
        } else {
            format!("Preparing to move {left} files")
        };
        let mut progress = OperationProgress::new(self.common.operation_type(), total, 0)
            .with_text(format!("Preparing to Move to \"{}\"", display_name(dest_dir)), details);
        progress.files_completed = done;
        self.common.send_progress(progress);
    }

    /// Phase one of a move: rename in place, deferring what needs a copy.
    fn move_file_prepare(
        &mut self,
        src: &Path,
        dest_dir: &Path,
        position: Option<Position>,
        files_left: usize,
        deferred: &mut Vec<Deferred>,
    ) {
        let mut overwrite = false;
        let mut handled_invalid = self.dest_fs_type.is_some();
        let mut dest = self.target(src, dest_dir, None, None);
        let mut renamed = false;

        if self.violates_ancestry(src, dest_dir, &dest, files_left) {
            return;
        }

        loop {
            if self.common.is_aborted() {
                return;
            }
            let attempt = self.move_native(src, &dest, overwrite, true, false);
            let needs_copy = matches!(
                attempt,
                Attempt::CrossDevice | Attempt::WouldRecurse | Attempt::WouldMerge
            ) || (overwrite && matches!(attempt, Attempt::IsDirectory));
            if needs_copy {
                deferred.push(Deferred {
                    source: src.to_path_buf(),
                    name: renamed
                        .then(|| dest.file_name().map(OsStr::to_os_string))
                        .flatten(),
                    overwrite,
                    position,
                });
                return;
            }
            match attempt {
                Attempt::Done => {
                    tracing::debug!(target: "haul::transfer", src = %src.display(), dest = %dest.display(), "renamed");
                    self.transfer.num_files += 1;
                    self.announce_toplevel(&dest, position);
                    self.common.changes.moved(src, &dest);
                    self.record_pair(src, &dest);
                    return;
                }
                Attempt::InvalidName(err) => match self.retry_name(&dest, &mut handled_invalid) {
                    Some(fixed) => dest = fixed,
                    None => {
                        self.prepare_failed(src, dest_dir, err, files_left);
                        return;
                    }
                },
                Attempt::Exists if !overwrite => match self.occupied(src, &dest, dest_dir) {
                    Occupied::Overwrite => overwrite = true,
                    Occupied::Rename(new_dest) => {
                        dest = new_dest;
                        renamed = true;
                    }
                    Occupied::Skip | Occupied::Cancel => return,
                },
                Attempt::Cancelled => return,
                other => {
                    self.prepare_failed(src, dest_dir, other.into_error(), files_left);
                    return;
                }
            }
        }
    }

    fn prepare_failed(&mut self, src: &Path, dest_dir: &Path, err: io::Error, files_left: usize) {
        let details = OpError::io(src, err).details();
        self.common.item_failed(
            src,
            format!("Error while moving \"{}\".", display_name(src)),
            format!("There was an error moving the file into {}.", display_name(dest_dir)),
            Some(details),
            files_left,
        );
    }

    /// Transfer one item, recursing into directories. Returns true when the
    /// item, or anything below it, was left behind.
    fn copy_move_file(&mut self, src: &Path, step: Step<'_>) -> bool {
        if self.common.should_skip_file(src) {
            self.common.record_skip(src);
            return true;
        }

        let Step {
            dest_dir,
            mut same_fs,
            unique,
            toplevel,
            position,
            mut overwrite,
            record,
            ..
        } = step;
        let name = if toplevel { step.name } else { None };
        let mut unique_nr = 1;
        let mut handled_invalid = self.dest_fs_type.is_some();
        let mut dest = if unique {
            self.target(src, dest_dir, name, Some(unique_nr))
        } else {
            self.target(src, dest_dir, name, None)
        };

        let files_left = self.files_left();
        if self.violates_ancestry(src, dest_dir, &dest, files_left) {
            return true;
        }

        let trusted_launcher = !self.is_move()
            && self.common.config.desktop_dir.as_deref() == Some(dest_dir)
            && trusted::is_trusted_desktop_file(src, &self.common.config.launcher_dirs);

        loop {
            if self.common.is_aborted() {
                return true;
            }
            let attempt = if self.is_move() {
                self.move_native(src, &dest, overwrite, same_fs, true)
            } else {
                self.copy_native(src, &dest, overwrite)
            };

            match attempt {
                Attempt::Done => {
                    self.transfer.num_files += 1;
                    self.report_progress();
                    if toplevel {
                        self.announce_toplevel(&dest, position);
                    }
                    if self.is_move() {
                        self.common.changes.moved(src, &dest);
                    } else {
                        self.common.changes.added(&dest);
                    }
                    if trusted_launcher {
                        trusted::mark_trusted(self.common, &dest, true);
                    }
                    if record {
                        self.record_pair(src, &dest);
                    }
                    return false;
                }
                Attempt::InvalidName(err) => match self.retry_name(&dest, &mut handled_invalid) {
                    Some(fixed) => dest = fixed,
                    None => {
                        self.transfer_failed(src, dest_dir, err);
                        return true;
                    }
                },
                Attempt::Exists if !overwrite => {
                    if unique {
                        unique_nr += 1;
                        dest = self.target(src, dest_dir, name, Some(unique_nr));
                        continue;
                    }
                    match self.occupied(src, &dest, dest_dir) {
                        Occupied::Overwrite => overwrite = true,
                        Occupied::Rename(new_dest) => dest = new_dest,
                        Occupied::Skip | Occupied::Cancel => return true,
                    }
                }
                Attempt::IsDirectory if overwrite => {
                    let existing = dest.clone();
                    if !self.remove_target_recursively(src, &existing) {
                        return true;
                    }
                }
                Attempt::WouldRecurse | Attempt::WouldMerge => {
                    let would_recurse = matches!(attempt, Attempt::WouldRecurse);
                    if overwrite && would_recurse && !self.remove_blocker(src, &dest, dest_dir) {
                        return true;
                    }
                    if !would_recurse {
                        same_fs = false;
                    }
                    match self.copy_move_directory(src, &mut dest, would_recurse, same_fs, record) {
                        DirOutcome::Retry => continue,
                        DirOutcome::Finished { skipped } => {
                            if toplevel && would_recurse && dest.exists() {
                                self.announce_toplevel(&dest, position);
                            }
                            return skipped;
                        }
                    }
                }
                Attempt::Cancelled => return true,
                other => {
                    self.transfer_failed(src, dest_dir, other.into_error());
                    return true;
                }
            }
        }
    }

    /// Delete the non-directory occupying the place of a directory.
    fn remove_blocker(&mut self, src: &Path, dest: &Path, dest_dir: &Path) -> bool {
        match fs::remove_file(dest) {
            Ok(()) => {
                self.common.changes.removed(dest);
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                let primary = if self.is_move() {
                    format!("Error while moving \"{}\".", display_name(src))
                } else {
                    format!("Error while copying \"{}\".", display_name(src))
                };
                let secondary = format!(
                    "Could not remove the already existing file with the same name in {}.",
                    display_name(dest_dir)
                );
                let details = OpError::io(dest, e).details();
                self.common
                    .item_failed(src, primary, secondary, Some(details), SKIP_ALL_ALWAYS);
                false
            }
        }
    }

    /// Native copy of a single item. Directories are never copied here.
    fn copy_native(&mut self, src: &Path, dest: &Path, overwrite: bool) -> Attempt {
        let meta = match fs::symlink_metadata(src) {
            Ok(meta) => meta,
            Err(e) => return Attempt::Failed(e),
        };
        let existing = fs::symlink_metadata(dest).ok();

        if meta.is_dir() {
            return match existing {
                None => Attempt::WouldRecurse,
                Some(_) if !overwrite => Attempt::Exists,
                Some(d) if d.is_dir() => Attempt::WouldMerge,
                Some(_) => Attempt::WouldRecurse,
            };
        }

        let mut truncate = false;
        if let Some(d) = &existing {
            if !overwrite {
                return Attempt::Exists;
            }
            if d.is_dir() {
                return Attempt::IsDirectory;
            }
            if d.is_file() && meta.is_file() {
                truncate = true;
            } else if let Err(e) = fs::remove_file(dest) {
                return Attempt::Failed(e);
            }
        }

        let file_type = meta.file_type();
        if file_type.is_symlink() {
            let target = match fs::read_link(src) {
                Ok(target) => target,
                Err(e) => return Attempt::Failed(e),
            };
            return match symlink(&target, dest) {
                Ok(()) => Attempt::Done,
                Err(e) => Attempt::from_error(e),
            };
        }
        if file_type.is_file() {
            return self.copy_contents(src, dest, &meta, truncate);
        }
        Attempt::Failed(io::Error::new(
            io::ErrorKind::Unsupported,
            "Special files cannot be copied",
        ))
    }

    fn copy_contents(&mut self, src: &Path, dest: &Path, meta: &fs::Metadata, truncate: bool) -> Attempt {
        let mut input = match File::open(src) {
            Ok(file) => file,
            Err(e) => return Attempt::Failed(e),
        };
        let mut options = OpenOptions::new();
        options.write(true);
        if truncate {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut output = match options.open(dest) {
            Ok(file) => file,
            Err(e) => return Attempt::from_error(e),
        };

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            if self.common.is_aborted() {
                drop(output);
                let _ = fs::remove_file(dest);
                return Attempt::Cancelled;
            }
            let n = match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    drop(output);
                    let _ = fs::remove_file(dest);
                    return Attempt::Failed(e);
                }
            };
            if let Err(e) = output.write_all(&buf[..n]) {
                drop(output);
                let _ = fs::remove_file(dest);
                return Attempt::Failed(e);
            }
            self.transfer.num_bytes += n as u64;
            self.report_progress();
        }

        if !self.readonly_source_fs {
            let _ = output.set_permissions(meta.permissions());
        }
        if let Ok(modified) = meta.modified() {
            let _ = output.set_modified(modified);
        }
        Attempt::Done
    }

    /// Native move of a single item. With `fallback`, files on another
    /// filesystem are copied then deleted; without it they are reported as
    /// [`Attempt::CrossDevice`].
    fn move_native(
        &mut self,
        src: &Path,
        dest: &Path,
        overwrite: bool,
        same_fs: bool,
        fallback: bool,
    ) -> Attempt {
        let meta = match fs::symlink_metadata(src) {
            Ok(meta) => meta,
            Err(e) => return Attempt::Failed(e),
        };
        if let Ok(existing) = fs::symlink_metadata(dest) {
            if !overwrite {
                return Attempt::Exists;
            }
            match (meta.is_dir(), existing.is_dir()) {
                (true, true) => return Attempt::WouldMerge,
                (true, false) => return Attempt::WouldRecurse,
                (false, true) => return Attempt::IsDirectory,
                (false, false) => {}
            }
        }

        let try_rename = same_fs
            || dest
                .parent()
                .is_some_and(|dir| fsinfo::same_filesystem(src, dir));
        if try_rename {
            match fs::rename(src, dest) {
                Ok(()) => return Attempt::Done,
                Err(e) => match Attempt::from_error(e) {
                    Attempt::CrossDevice => {}
                    other => return other,
                },
            }
        }

        if !fallback {
            return Attempt::CrossDevice;
        }
        if meta.is_dir() {
            return Attempt::WouldRecurse;
        }
        match self.copy_native(src, dest, overwrite) {
            Attempt::Done => match fs::remove_file(src) {
                Ok(()) => Attempt::Done,
                Err(e) => Attempt::Failed(e),
            },
            other => other,
        }
    }

    fn create_dest_dir(&mut self, src: &Path, dest: &mut PathBuf) -> CreateDir {
        let mut handled_invalid = self.dest_fs_type.is_some();
        loop {
            if self.common.is_aborted() {
                return CreateDir::Failed;
            }
            let err = match fs::create_dir(&*dest) {
                Ok(()) => {
                    self.common.changes.added(&*dest);
                    return CreateDir::Created;
                }
                Err(e) => e,
            };

            if err.raw_os_error() == Some(Errno::EINVAL as i32) {
                if let Some(fixed) = self.retry_name(dest, &mut handled_invalid) {
                    *dest = fixed;
                    return CreateDir::Renamed;
                }
            }

            let secondary = if err.kind() == io::ErrorKind::PermissionDenied {
                format!(
                    "The folder \"{}\" cannot be copied because you do not have permissions to create it in the destination.",
                    display_name(src)
                )
            } else {
                format!("There was an error creating the folder \"{}\".", display_name(src))
            };
            let details = OpError::io(&*dest, err).details();
            let prompt = MessagePrompt::warning(
                "Error while copying.",
                secondary.clone(),
                &[Choice::Cancel, Choice::Skip, Choice::Retry],
            )
            .with_details(details);
            match self.common.recover(prompt) {
                Recovery::Retry => continue,
                Recovery::Skip => {
                    self.common.record_error(src, secondary);
                    return CreateDir::Failed;
                }
                Recovery::Abort => return CreateDir::Failed,
            }
        }
    }

    fn copy_move_directory(
        &mut self,
        src: &Path,
        dest: &mut PathBuf,
        create_dest: bool,
        same_fs: bool,
        record: bool,
    ) -> DirOutcome {
        if create_dest {
            match self.create_dest_dir(src, dest) {
                CreateDir::Created => {}
                CreateDir::Renamed => return DirOutcome::Retry,
                CreateDir::Failed => return DirOutcome::Finished { skipped: true },
            }
        }
        if record && (create_dest || self.is_move()) {
            self.record_pair(src, dest);
        }

        let child_record = record && !create_dest && !self.is_move();
        let skip_read_error = self.common.should_skip_readdir_error(src);
        let mut skipped = false;

        loop {
            let reader = match fs::read_dir(src) {
                Ok(reader) => reader,
                Err(e) => {
                    let secondary = if e.kind() == io::ErrorKind::PermissionDenied {
                        format!(
                            "The folder \"{}\" cannot be copied because you do not have permissions to read it.",
                            display_name(src)
                        )
                    } else {
                        format!("There was an error reading the folder \"{}\".", display_name(src))
                    };
                    let prompt = MessagePrompt::warning(
                        self.error_primary(),
                        secondary.clone(),
                        &[Choice::Cancel, Choice::Skip, Choice::Retry],
                    )
                    .with_details(OpError::io(src, e).details());
                    match self.common.recover(prompt) {
                        Recovery::Retry => continue,
                        Recovery::Skip => {
                            self.common.record_error(src, secondary);
                            skipped = true;
                        }
                        Recovery::Abort => return DirOutcome::Finished { skipped: true },
                    }
                    break;
                }
            };

            // The listing is taken up front so the handle is closed before
            // any child prompts.
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
            children.sort();

            for child in &children {
                if self.common.is_aborted() {
                    break;
                }
                let child_skipped = self.copy_move_file(child, Step {
                    dest_dir: dest.as_path(),
                    name: None,
                    same_fs,
                    unique: false,
                    toplevel: false,
                    position: None,
                    overwrite: false,
                    record: child_record,
                });
                skipped |= child_skipped;
            }

            if let Some(e) = failure.filter(|_| !skip_read_error) {
                let secondary = if e.kind() == io::ErrorKind::PermissionDenied {
                    format!(
                        "Files in the folder \"{}\" cannot be copied because you do not have permissions to see them.",
                        display_name(src)
                    )
                } else {
                    format!(
                        "There was an error getting information about the files in the folder \"{}\".",
                        display_name(src)
                    )
                };
                let prompt = MessagePrompt::warning(
                    self.error_primary(),
                    secondary.clone(),
                    &[Choice::Cancel, Choice::SkipFiles],
                )
                .with_details(OpError::io(src, e).details());
                match self.common.recover(prompt) {
                    Recovery::Abort => return DirOutcome::Finished { skipped: true },
                    Recovery::Retry | Recovery::Skip => {
                        self.common.record_error(src, secondary);
                        skipped = true;
                    }
                }
            }
            break;
        }

        if self.common.is_aborted() {
            return DirOutcome::Finished { skipped: true };
        }

        self.transfer.num_files += 1;
        self.report_progress();

        if create_dest && !self.readonly_source_fs {
            if let Ok(meta) = fs::symlink_metadata(src) {
                let _ = fs::set_permissions(&*dest, meta.permissions());
            }
        }

        if self.is_move() && !skipped {
            match fs::remove_dir(src) {
                Ok(()) => self.common.changes.removed(src),
                Err(e) => {
                    let details = OpError::io(src, e).details();
                    let files_left = self.files_left();
                    self.common.item_failed(
                        src,
                        format!("Error while moving \"{}\".", display_name(src)),
                        "Could not remove the source folder.",
                        Some(details),
                        files_left,
                    );
                    skipped = true;
                }
            }
        }

        DirOutcome::Finished { skipped }
    }

    fn error_primary(&self) -> &'static str {
        if self.is_move() {
            "Error while moving."
        } else {
            "Error while copying."
        }
    }

    /// Delete `file` and everything below it so `src` can take its place.
    /// Failures prompt on their own, whatever the outer transfer decided.
    fn remove_target_recursively(&mut self, src: &Path, file: &Path) -> bool {
        let is_dir = fs::symlink_metadata(file).is_ok_and(|m| m.is_dir());
        let primary = format!("Error while copying \"{}\".", display_name(src));

        if is_dir {
            let children = match fs::read_dir(file) {
                Ok(reader) => reader
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .collect::<Vec<_>>(),
                Err(e) => {
                    let details = OpError::io(file, e).details();
                    self.common.item_failed(
                        file,
                        primary,
                        format!(
                            "Could not remove files from the already existing folder {}.",
                            display_name(file)
                        ),
                        Some(details),
                        SKIP_ALL_ALWAYS,
                    );
                    return false;
                }
            };
            for child in children {
                if self.common.is_aborted() {
                    return false;
                }
                if !self.remove_target_recursively(src, &child) {
                    return false;
                }
            }
        }

        let removed = if is_dir {
            fs::remove_dir(file)
        } else {
            fs::remove_file(file)
        };
        match removed {
            Ok(()) => {
                self.common.changes.removed(file);
                true
            }
            Err(e) => {
                let details = OpError::io(file, e).details();
                self.common.item_failed(
                    file,
                    primary,
                    format!("Could not remove the already existing file {}.", display_name(file)),
                    Some(details),
                    SKIP_ALL_ALWAYS,
                );
                false
            }
        }
    }
}
