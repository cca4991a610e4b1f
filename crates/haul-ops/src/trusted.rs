//! Desktop launchers that may run without asking.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use haul_core::OpError;

use crate::job::CommonJob;
use crate::request::{Choice, MessagePrompt};

const TRUSTED_SHEBANG: &[u8] = b"#!/usr/bin/env xdg-open\n";

/// Whether `path` is a launcher from a system directory that is not yet
/// executable.
pub fn is_trusted_desktop_file(path: &Path, launcher_dirs: &[PathBuf]) -> bool {
    if path.extension().is_none_or(|ext| ext != "desktop") {
        return false;
    }
    let Ok(meta) = fs::symlink_metadata(path) else {
        return false;
    };
    if !meta.is_file() || meta.permissions().mode() & 0o100 != 0 {
        return false;
    }
    let Ok(canonical) = path.canonicalize() else {
        return false;
    };
    launcher_dirs.iter().any(|dir| {
        dir.canonicalize()
            .is_ok_and(|dir| canonical.starts_with(dir))
    })
}

/// Prefix the launcher with a shebang when it has none and make it
/// executable for everyone.
pub fn mark_desktop_file_trusted(path: &Path) -> Result<(), OpError> {
    let contents = fs::read(path).map_err(|e| OpError::io(path, e))?;
    if !contents.starts_with(b"#!") {
        let mut updated = Vec::with_capacity(TRUSTED_SHEBANG.len() + contents.len());
        updated.extend_from_slice(TRUSTED_SHEBANG);
        updated.extend_from_slice(&contents);
        fs::write(path, updated).map_err(|e| OpError::io(path, e))?;
    }

    let meta = fs::symlink_metadata(path).map_err(|e| OpError::io(path, e))?;
    let mode = meta.permissions().mode();
    let executable = mode | 0o111;
    if executable != mode {
        fs::set_permissions(path, fs::Permissions::from_mode(executable))
            .map_err(|e| OpError::io(path, e))?;
    }
    Ok(())
}

/// Mark `path` trusted inside a job. Interactive failures offer a retry;
/// otherwise, or on cancel, the job is aborted.
pub(crate) fn mark_trusted(job: &mut CommonJob, path: &Path, interactive: bool) -> bool {
    loop {
        let err = match mark_desktop_file_trusted(path) {
            Ok(()) => {
                job.changes.changed(path);
                return true;
            }
            Err(e) => e,
        };
        tracing::warn!(target: "haul::job", id = job.id, path = %path.display(), error = %err, "could not mark launcher trusted");

        let choice = if interactive {
            job.ask(MessagePrompt::error(
                "Unable to mark launcher trusted (executable)",
                err.details(),
                &[Choice::Cancel, Choice::Retry],
            ))
        } else {
            Choice::Cancel
        };
        if choice == Choice::Retry {
            continue;
        }
        job.record_error(path, err.details());
        if interactive {
            job.cancel_by_user();
        } else {
            job.abort();
        }
        return false;
    }
}

/// The stand-alone trust job.
pub(crate) fn run(job: &mut CommonJob, path: &Path) {
    if mark_trusted(job, path, false) {
        job.outcome.files_processed = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mark_adds_shebang_and_exec_bits() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("app.desktop");
        fs::write(&file, b"[Desktop Entry]\n").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

        mark_desktop_file_trusted(&file).unwrap();

        let contents = fs::read(&file).unwrap();
        assert!(contents.starts_with(TRUSTED_SHEBANG));
        assert!(contents.ends_with(b"[Desktop Entry]\n"));
        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);

        // A second pass changes nothing.
        mark_desktop_file_trusted(&file).unwrap();
        assert_eq!(fs::read(&file).unwrap(), contents);
    }

    #[test]
    fn test_trusted_only_under_launcher_dirs() {
        let temp = TempDir::new().unwrap();
        let apps = temp.path().join("applications");
        fs::create_dir(&apps).unwrap();
        let launcher = apps.join("app.desktop");
        fs::write(&launcher, b"[Desktop Entry]\n").unwrap();
        fs::set_permissions(&launcher, fs::Permissions::from_mode(0o644)).unwrap();
        let elsewhere = temp.path().join("other.desktop");
        fs::write(&elsewhere, b"[Desktop Entry]\n").unwrap();
        fs::set_permissions(&elsewhere, fs::Permissions::from_mode(0o644)).unwrap();

        let dirs = vec![apps.clone()];
        assert!(is_trusted_desktop_file(&launcher, &dirs));
        assert!(!is_trusted_desktop_file(&elsewhere, &dirs));

        fs::set_permissions(&launcher, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(!is_trusted_desktop_file(&launcher, &dirs));
    }
}
