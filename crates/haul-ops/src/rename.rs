//! Rename operation.

use std::fs;
use std::path::Path;

use crate::job::CommonJob;
use crate::progress::OperationProgress;
use crate::undo::UndoInfo;

/// Check that `name` can be a single path component.
pub fn validate_filename(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Name cannot be empty".into());
    }

    if name.len() > 255 {
        return Err("Name is too long (max 255 bytes)".into());
    }

    for c in ['/', '\0'] {
        if name.contains(c) {
            return Err(format!("Name cannot contain '{}'", c.escape_default()));
        }
    }

    if name == "." || name == ".." {
        return Err("'.' and '..' are reserved names".into());
    }

    Ok(())
}

/// Rename `source` within its directory.
pub(crate) fn run(job: &mut CommonJob, source: &Path, new_name: &str) {
    let mut progress = OperationProgress::new(job.operation_type(), 1, 0)
        .with_text(format!("Renaming \"{}\"", source.display()), "");
    progress.current_file = Some(source.to_path_buf());
    job.send_progress(progress);

    if let Err(e) = validate_filename(new_name) {
        fail(job, source, e);
        return;
    }

    let parent = source.parent().unwrap_or(Path::new(""));
    let new_path = parent.join(new_name);
    if new_path == source {
        return;
    }

    // Another item already has the name.
    if fs::symlink_metadata(&new_path).is_ok() {
        fail(job, source, format!("'{new_name}' already exists"));
        return;
    }

    match fs::rename(source, &new_path) {
        Ok(()) => {
            tracing::info!(
                target: "haul::job",
                id = job.id,
                from = %source.display(),
                to = %new_path.display(),
                "renamed"
            );
            job.changes.moved(source, &new_path);
            job.outcome.files_processed = 1;
            job.undo_info = Some(UndoInfo::Rename {
                old: source.to_path_buf(),
                new: new_path,
            });
        }
        Err(e) => fail(job, source, format!("Rename failed: {e}")),
    }
}

fn fail(job: &mut CommonJob, source: &Path, message: String) {
    job.record_error(source, message);
    job.outcome.success = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::test_job;
    use crate::progress::OperationType;
    use tempfile::TempDir;

    #[test]
    fn test_validate_filename_valid() {
        assert!(validate_filename("test.txt").is_ok());
        assert!(validate_filename(".hidden").is_ok());
        assert!(validate_filename("file with spaces ").is_ok());
        assert!(validate_filename("foo (copy).txt").is_ok());
    }

    #[test]
    fn test_validate_filename_invalid() {
        assert!(validate_filename("").is_err());
        assert!(validate_filename("test/file").is_err());
        assert!(validate_filename("nul\0byte").is_err());
        assert!(validate_filename(".").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_rename_records_undo() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("old.txt");
        fs::write(&old, b"x").unwrap();

        let (mut job, _rx) = test_job(&runtime, OperationType::Rename, &temp.path().join("trash"));
        run(&mut job, &old, "new.txt");

        let new = temp.path().join("new.txt");
        assert!(new.exists());
        assert!(!old.exists());
        assert_eq!(job.undo_info, Some(UndoInfo::Rename { old, new }));
    }

    #[test]
    fn test_rename_onto_existing_fails() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let (mut job, _rx) = test_job(&runtime, OperationType::Rename, &temp.path().join("trash"));
        run(&mut job, &a, "b");

        assert!(!job.outcome.success);
        assert_eq!(job.outcome.errors.len(), 1);
        assert_eq!(fs::read(&b).unwrap(), b"b");
        assert!(job.undo_info.is_none());
    }
}
