//! Permission bits and ownership.

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt, lchown};
use std::path::{Path, PathBuf};

use haul_core::OpError;
use nix::unistd::{Gid, Group, Uid, User};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::job::CommonJob;
use crate::progress::OperationProgress;
use crate::undo::UndoInfo;

/// Mode bits a permission change may touch.
const MODE_BITS: u32 = 0o7777;

/// Which id an ownership change sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum OwnershipKind {
    Owner,
    Group,
}

/// `current` with the bits selected by `mask` taken from `value`.
pub fn apply_mask(current: u32, value: u32, mask: u32) -> u32 {
    (current & !mask) | (value & mask)
}

fn mode_of(path: &Path) -> Result<u32, OpError> {
    fs::symlink_metadata(path)
        .map(|meta| meta.permissions().mode() & MODE_BITS)
        .map_err(|e| OpError::io(path, e))
}

fn set_mode(path: &Path, mode: u32) -> Result<(), OpError> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| OpError::io(path, e))
}

fn fail(job: &mut CommonJob, path: &Path, err: OpError) {
    job.record_error(path, err.details());
    job.outcome.success = false;
}

/// Set the permission bits of one file.
pub(crate) fn set_permissions(job: &mut CommonJob, target: &Path, mode: u32) {
    let before = match mode_of(target) {
        Ok(before) => before,
        Err(e) => return fail(job, target, e),
    };
    let after = mode & MODE_BITS;
    if let Err(e) = set_mode(target, after) {
        return fail(job, target, e);
    }
    tracing::info!(target: "haul::job", id = job.id, path = %target.display(), before, after, "permissions set");
    job.changes.changed(target);
    job.outcome.files_processed = 1;
    job.undo_info = Some(UndoInfo::Permissions {
        file: target.to_path_buf(),
        before,
        after,
    });
}

/// Change the mode of `root` and everything below it. Entries that cannot
/// be read or changed are passed over.
pub(crate) fn set_permissions_recursive(
    job: &mut CommonJob,
    root: &Path,
    file_value: u32,
    file_mask: u32,
    dir_value: u32,
    dir_mask: u32,
) {
    tracing::info!(target: "haul::job", id = job.id, root = %root.display(), "recursive permission change started");
    job.send_progress(
        OperationProgress::new(job.operation_type(), 0, 0).with_text("Setting permissions", ""),
    );

    let mut originals = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(path) = pending.pop() {
        if job.is_aborted() {
            break;
        }
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };
        // Symlink modes cannot be changed; their targets are not ours.
        if meta.file_type().is_symlink() {
            continue;
        }
        let (value, mask) = if meta.is_dir() {
            (dir_value, dir_mask)
        } else {
            (file_value, file_mask)
        };
        let current = meta.permissions().mode() & MODE_BITS;
        originals.push((path.clone(), current));
        let updated = apply_mask(current, value, mask);
        if updated != current {
            if let Err(e) = set_mode(&path, updated) {
                tracing::debug!(target: "haul::job", id = job.id, error = %e, "permission change ignored");
            } else {
                job.changes.changed(&path);
            }
        }
        job.outcome.files_processed += 1;

        if meta.is_dir() {
            push_children(&path, &mut pending);
        }
    }

    job.undo_info = Some(UndoInfo::RecursivePermissions {
        root: root.to_path_buf(),
        file_value,
        file_mask,
        dir_value,
        dir_mask,
        originals,
    });
}

/// Queue the children of `dir` so they are visited in listing order.
fn push_children(dir: &Path, pending: &mut Vec<PathBuf>) {
    let Ok(reader) = fs::read_dir(dir) else {
        return;
    };
    let mut children: Vec<PathBuf> = reader.filter_map(|e| e.ok().map(|e| e.path())).collect();
    children.reverse();
    pending.extend(children);
}

/// Put back recorded modes.
pub(crate) fn restore_permissions(job: &mut CommonJob, modes: &[(PathBuf, u32)]) {
    for (path, mode) in modes {
        if job.is_aborted() {
            break;
        }
        match set_mode(path, *mode) {
            Ok(()) => {
                job.changes.changed(path);
                job.outcome.files_processed += 1;
            }
            Err(e) => job.record_error(path, e.details()),
        }
    }
}

fn user_name(uid: u32) -> String {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

fn group_name(gid: u32) -> String {
    match Group::from_gid(Gid::from_raw(gid)) {
        Ok(Some(group)) => group.name,
        _ => gid.to_string(),
    }
}

/// Resolve a user or group given by name or numeric id.
pub fn resolve_id(kind: OwnershipKind, value: &str) -> Result<u32, OpError> {
    if let Ok(id) = value.parse::<u32>() {
        return Ok(id);
    }
    let found = match kind {
        OwnershipKind::Owner => User::from_name(value)
            .ok()
            .flatten()
            .map(|user| user.uid.as_raw()),
        OwnershipKind::Group => Group::from_name(value)
            .ok()
            .flatten()
            .map(|group| group.gid.as_raw()),
    };
    found.ok_or_else(|| OpError::other(format!("Unknown {kind} '{value}'")))
}

/// Set the owner or the group of one file, without following symlinks.
pub(crate) fn change_ownership(job: &mut CommonJob, target: &Path, kind: OwnershipKind, value: &str) {
    let meta = match fs::symlink_metadata(target) {
        Ok(meta) => meta,
        Err(e) => return fail(job, target, OpError::io(target, e)),
    };
    let id = match resolve_id(kind, value) {
        Ok(id) => id,
        Err(e) => return fail(job, target, e),
    };

    let (before, after, result) = match kind {
        OwnershipKind::Owner => (
            user_name(meta.uid()),
            user_name(id),
            lchown(target, Some(id), None),
        ),
        OwnershipKind::Group => (
            group_name(meta.gid()),
            group_name(id),
            lchown(target, None, Some(id)),
        ),
    };
    if let Err(e) = result {
        return fail(job, target, OpError::io(target, e));
    }

    tracing::info!(target: "haul::job", id = job.id, path = %target.display(), %kind, %before, %after, "ownership changed");
    job.changes.changed(target);
    job.outcome.files_processed = 1;
    job.undo_info = Some(UndoInfo::Ownership {
        kind,
        file: target.to_path_buf(),
        before,
        after,
    });
}
