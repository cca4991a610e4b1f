//! Queries about the filesystems that hold sources and destinations.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use haul_core::OpError;
use nix::sys::statvfs::{FsFlags, statvfs};
use nix::unistd::{PathconfVar, pathconf};

/// Longest file name that can be created in `dir`, bounded by both the
/// filesystem's name limit and its path limit.
pub fn max_name_length(dir: &Path) -> Option<usize> {
    let name_max = pathconf(dir, PathconfVar::NAME_MAX).ok().flatten()?;
    let path_max = pathconf(dir, PathconfVar::PATH_MAX).ok().flatten()?;
    let dir_len = dir.as_os_str().len() as i64 + 1;
    let max = (name_max as i64).min(path_max as i64 - dir_len);
    (max > 0).then_some(max as usize)
}

/// Short name of the filesystem type holding `path`, such as "msdos".
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn filesystem_type(path: &Path) -> Option<String> {
    use nix::sys::statfs::{
        BTRFS_SUPER_MAGIC, EXT4_SUPER_MAGIC, MSDOS_SUPER_MAGIC, TMPFS_MAGIC, statfs,
    };

    let fs = statfs(path).ok()?.filesystem_type();
    let name = if fs == MSDOS_SUPER_MAGIC {
        "msdos"
    } else if fs == EXT4_SUPER_MAGIC {
        "ext4"
    } else if fs == BTRFS_SUPER_MAGIC {
        "btrfs"
    } else if fs == TMPFS_MAGIC {
        "tmpfs"
    } else {
        "unknown"
    };
    Some(name.to_string())
}

/// Short name of the filesystem type holding `path`, such as "msdos".
#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
pub fn filesystem_type(path: &Path) -> Option<String> {
    let stat = nix::sys::statfs::statfs(path).ok()?;
    Some(stat.filesystem_type_name().to_string())
}

/// Short name of the filesystem type holding `path`, such as "msdos".
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd"
)))]
pub fn filesystem_type(_path: &Path) -> Option<String> {
    None
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
pub fn free_space(path: &Path) -> Result<u64, OpError> {
    let stat = statvfs(path).map_err(|e| OpError::errno(path, e))?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

/// Whether the filesystem holding `path` is mounted read-only.
pub fn is_read_only(path: &Path) -> Result<bool, OpError> {
    let stat = statvfs(path).map_err(|e| OpError::errno(path, e))?;
    Ok(stat.flags().contains(FsFlags::ST_RDONLY))
}

/// Device id of the filesystem holding `path`, without following a final
/// symlink.
pub fn device_id(path: &Path) -> Option<u64> {
    std::fs::symlink_metadata(path).ok().map(|m| m.dev())
}

/// Whether `a` and `b` live on the same filesystem.
pub fn same_filesystem(a: &Path, b: &Path) -> bool {
    match (device_id(a), std::fs::metadata(b).ok().map(|m| m.dev())) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Absolute form of `path` with its parent directories resolved. The final
/// component is kept as is so symlinks are not followed.
pub fn normalize(path: &Path) -> PathBuf {
    let resolved = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            parent.canonicalize().ok().map(|p| p.join(name))
        }
        _ => path.canonicalize().ok(),
    };
    resolved.unwrap_or_else(|| path.to_path_buf())
}

/// Whether `root` is `child` or one of its ancestors.
pub fn is_dir_parent(child: &Path, root: &Path) -> bool {
    normalize(child).starts_with(normalize(root))
}
