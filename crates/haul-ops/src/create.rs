//! New folders and files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use haul_core::{OpError, Position};
use nix::errno::Errno;

use crate::fsinfo;
use crate::job::CommonJob;
use crate::naming::{self, display_name};
use crate::progress::OperationProgress;
use crate::request::{Choice, MessagePrompt};
use crate::scan::verify_destination;
use crate::undo::{CreateKind, UndoInfo};

/// Name used when the caller gives none.
fn default_name(kind: &CreateKind) -> String {
    match kind {
        CreateKind::Folder => "Untitled Folder".to_string(),
        CreateKind::File { .. } => "Untitled Document".to_string(),
        CreateKind::Template { template } => match template.file_name() {
            Some(name) => format!("Untitled {}", name.to_string_lossy()),
            None => "Untitled Document".to_string(),
        },
    }
}

/// Create one new item in `parent`.
pub(crate) fn run(
    job: &mut CommonJob,
    parent: &Path,
    kind: CreateKind,
    name: Option<&str>,
    position: Option<Position>,
) {
    tracing::info!(target: "haul::job", id = job.id, parent = %parent.display(), "create started");
    verify_destination(job, parent, 0);
    if job.is_aborted() {
        return;
    }

    let name = name.map_or_else(|| default_name(&kind), str::to_string);
    job.send_progress(
        OperationProgress::new(job.operation_type(), 1, 0)
            .with_text(format!("Creating \"{name}\""), ""),
    );

    let mut fs_type: Option<String> = None;
    let mut handled_invalid = false;
    let mut count: u32 = 1;
    let mut dest = parent.join(&name);

    loop {
        if job.is_aborted() {
            return;
        }
        let err = match make(&kind, &dest) {
            Ok(()) => break,
            Err(e) => e,
        };

        match err.raw_os_error().map(Errno::from_raw) {
            Some(Errno::EEXIST) => {
                count += 1;
                let next = naming::numbered_name(&name, count);
                dest = parent.join(naming::for_fs(next.into(), fs_type.as_deref()));
                continue;
            }
            Some(Errno::EINVAL) if !handled_invalid => {
                handled_invalid = true;
                fs_type = fsinfo::filesystem_type(parent);
                let current = naming::numbered_name(&name, count);
                let fixed = parent.join(naming::for_fs(current.into(), fs_type.as_deref()));
                if fixed != dest {
                    dest = fixed;
                    continue;
                }
            }
            _ => {}
        }

        let details = OpError::io(&dest, err).details();
        let primary = match kind {
            CreateKind::Folder => format!("Error while creating directory {}.", display_name(&dest)),
            _ => format!("Error while creating file {}.", display_name(&dest)),
        };
        let prompt = MessagePrompt::warning(
            primary,
            format!("There was an error creating the directory in {}.", display_name(parent)),
            &[Choice::Cancel, Choice::Skip],
        )
        .with_details(details.clone());
        match job.ask(prompt) {
            Choice::Skip => job.record_error(&dest, details),
            _ => job.cancel_by_user(),
        }
        return;
    }

    job.changes.added(&dest);
    match position {
        Some(position) => job.changes.position_set(&dest, position),
        None => job.changes.position_remove(&dest),
    }
    job.outcome.files_processed = 1;
    job.outcome.new_file = Some(dest.clone());
    job.add_debuting(&dest);
    tracing::debug!(target: "haul::job", id = job.id, path = %dest.display(), "created");
    job.undo_info = Some(UndoInfo::Create { kind, target: dest });
}

fn make(kind: &CreateKind, dest: &Path) -> io::Result<()> {
    match kind {
        CreateKind::Folder => fs::create_dir(dest),
        CreateKind::File { contents } => {
            let mut file = OpenOptions::new().write(true).create_new(true).open(dest)?;
            let written = match contents {
                Some(data) => file.write_all(data).and_then(|()| file.sync_all()),
                None => Ok(()),
            };
            discard_on_error(written, dest)
        }
        CreateKind::Template { template } => {
            let mut source = File::open(template)?;
            let mut file = OpenOptions::new().write(true).create_new(true).open(dest)?;
            discard_on_error(io::copy(&mut source, &mut file).map(|_| ()), dest)
        }
    }
}

/// Remove a half-written file so a failed attempt leaves nothing behind.
fn discard_on_error(result: io::Result<()>, dest: &Path) -> io::Result<()> {
    if result.is_err() {
        let _ = fs::remove_file(dest);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::test_job;
    use crate::progress::OperationType;
    use tempfile::TempDir;

    #[test]
    fn test_new_folders_are_numbered() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let temp = TempDir::new().unwrap();

        let (mut job, _rx) = test_job(&runtime, OperationType::CreateFolder, &temp.path().join("trash"));
        run(&mut job, temp.path(), CreateKind::Folder, None, None);
        run(&mut job, temp.path(), CreateKind::Folder, None, None);

        assert!(temp.path().join("Untitled Folder").is_dir());
        assert!(temp.path().join("Untitled Folder 2").is_dir());
        assert_eq!(job.outcome.new_file, Some(temp.path().join("Untitled Folder 2")));
    }

    #[test]
    fn test_new_file_with_contents_keeps_extension_when_numbered() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("notes.txt"), b"old").unwrap();

        let (mut job, _rx) = test_job(&runtime, OperationType::CreateFile, &temp.path().join("trash"));
        let kind = CreateKind::File {
            contents: Some(b"hello".to_vec()),
        };
        run(&mut job, temp.path(), kind.clone(), Some("notes.txt"), None);

        let created = temp.path().join("notes 2.txt");
        assert_eq!(fs::read(&created).unwrap(), b"hello");
        assert_eq!(fs::read(temp.path().join("notes.txt")).unwrap(), b"old");
        assert_eq!(
            job.undo_info,
            Some(UndoInfo::Create {
                kind,
                target: created
            })
        );
    }

    #[test]
    fn test_template_copy_takes_template_name() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let temp = TempDir::new().unwrap();
        let template = temp.path().join("templates/report.md");
        fs::create_dir_all(template.parent().unwrap()).unwrap();
        fs::write(&template, b"# Report\n").unwrap();
        let dest = temp.path().join("work");
        fs::create_dir(&dest).unwrap();

        let (mut job, _rx) = test_job(&runtime, OperationType::CreateFile, &temp.path().join("trash"));
        run(
            &mut job,
            &dest,
            CreateKind::Template {
                template: template.clone(),
            },
            None,
            None,
        );

        assert_eq!(fs::read(dest.join("Untitled report.md")).unwrap(), b"# Report\n");
        assert_eq!(job.outcome.files_processed, 1);
    }
}
