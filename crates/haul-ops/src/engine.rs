//! The engine: entry points that turn requests into running jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use haul_core::EngineConfig;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::changes::{ChangeQueue, ChangeSink, LogSink};
use crate::create;
use crate::delete;
use crate::fsinfo::{is_dir_parent, normalize};
use crate::job::{CommonJob, JobContext, JobEvent, JobHandle};
use crate::link;
use crate::operation::{FileOperation, OperationError};
use crate::permissions::{self, OwnershipKind};
use crate::progress::OperationComplete;
use crate::rename;
use crate::transfer::{self, TransferMode, TransferRequest};
use crate::trash::{self, DirectoryTrash, SystemTrash, TrashStore};
use crate::trusted;
use crate::undo::{CreateKind, Direction, Replay, UndoManager};

/// What a drop or paste asks for, before [`Engine::copy_move`] picks the
/// actual operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAction {
    Copy,
    Move,
    Link,
}

struct Inner {
    config: Arc<EngineConfig>,
    undo: UndoManager,
    changes: ChangeQueue,
    trash: Arc<dyn TrashStore>,
    next_id: AtomicU64,
}

/// Runs file operations as background jobs and owns the state they share:
/// the undo slot, the change queue and the trash store.
///
/// Cloning is cheap; clones share that state. Jobs run on the blocking
/// pool of the tokio runtime the entry point is called from.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("trash", &self.inner.trash)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// An engine using the trash configured in `config`, or the desktop's
    /// own trash when none is.
    pub fn new(config: EngineConfig) -> Self {
        let trash: Arc<dyn TrashStore> = match &config.trash_dir {
            Some(dir) => Arc::new(DirectoryTrash::new(dir)),
            None => Arc::new(SystemTrash),
        };
        Self::with_parts(config, trash, Arc::new(LogSink))
    }

    pub fn with_parts(config: EngineConfig, trash: Arc<dyn TrashStore>, sink: Arc<dyn ChangeSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                undo: UndoManager::new(),
                changes: ChangeQueue::new(sink),
                trash,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn undo_manager(&self) -> &UndoManager {
        &self.inner.undo
    }

    pub fn changes(&self) -> &ChangeQueue {
        &self.inner.changes
    }

    pub fn trash(&self) -> &Arc<dyn TrashStore> {
        &self.inner.trash
    }

    /// Run `operation` as a new job.
    pub fn submit(&self, operation: FileOperation) -> JobHandle {
        self.spawn(operation, None)
    }

    pub fn copy(&self, sources: Vec<PathBuf>, destination: PathBuf) -> JobHandle {
        self.submit(FileOperation::copy(sources, destination))
    }

    pub fn move_files(&self, sources: Vec<PathBuf>, destination: PathBuf) -> JobHandle {
        self.submit(FileOperation::move_to(sources, destination))
    }

    pub fn duplicate(&self, sources: Vec<PathBuf>) -> JobHandle {
        self.submit(FileOperation::duplicate(sources))
    }

    pub fn link(&self, sources: Vec<PathBuf>, destination: PathBuf) -> JobHandle {
        self.submit(FileOperation::link(sources, destination))
    }

    /// Copy, move or link `sources`, picking the operation from where they
    /// go. See [`Engine::resolve_transfer`].
    pub fn copy_move(
        &self,
        sources: Vec<PathBuf>,
        destination: Option<PathBuf>,
        action: TransferAction,
    ) -> JobHandle {
        let operation = self.resolve_transfer(sources, destination, action);
        self.submit(operation)
    }

    /// The operation a transfer request really is.
    ///
    /// A copy without a destination, or into the sources' own directory,
    /// duplicates. A move into the trash trashes and a move into a staging
    /// directory copies.
    pub fn resolve_transfer(
        &self,
        sources: Vec<PathBuf>,
        destination: Option<PathBuf>,
        action: TransferAction,
    ) -> FileOperation {
        let source_dir = sources
            .first()
            .and_then(|s| normalize(s).parent().map(Path::to_path_buf));
        let Some(destination) = destination.or_else(|| source_dir.clone()) else {
            return FileOperation::duplicate(sources);
        };

        match action {
            TransferAction::Link => FileOperation::link(sources, destination),
            TransferAction::Copy => {
                if source_dir.as_deref() == Some(normalize(&destination).as_path()) {
                    FileOperation::duplicate(sources)
                } else {
                    FileOperation::copy(sources, destination)
                }
            }
            TransferAction::Move => {
                let into_trash = self
                    .inner
                    .trash
                    .root()
                    .is_some_and(|root| is_dir_parent(&destination, &root));
                if into_trash {
                    FileOperation::delete(sources, true)
                } else if self.inner.config.is_staging(&destination) {
                    FileOperation::copy(sources, destination)
                } else {
                    FileOperation::move_to(sources, destination)
                }
            }
        }
    }

    /// Delete `targets` for good.
    pub fn delete(&self, targets: Vec<PathBuf>) -> JobHandle {
        self.submit(FileOperation::delete(targets, false))
    }

    /// Move `targets` to the trash; items that cannot be trashed may be
    /// deleted instead.
    pub fn trash_or_delete(&self, targets: Vec<PathBuf>) -> JobHandle {
        self.submit(FileOperation::delete(targets, true))
    }

    pub fn empty_trash(&self) -> JobHandle {
        self.submit(FileOperation::EmptyTrash)
    }

    pub fn new_folder(&self, parent: PathBuf, name: Option<String>) -> JobHandle {
        self.submit(FileOperation::CreateFolder {
            parent,
            name,
            position: None,
        })
    }

    pub fn new_file(&self, parent: PathBuf, name: Option<String>, contents: Option<Vec<u8>>) -> JobHandle {
        self.submit(FileOperation::CreateFile {
            parent,
            name,
            contents,
            position: None,
        })
    }

    pub fn new_file_from_template(
        &self,
        parent: PathBuf,
        name: Option<String>,
        template: PathBuf,
    ) -> JobHandle {
        self.submit(FileOperation::CreateFromTemplate {
            parent,
            template,
            name,
            position: None,
        })
    }

    pub fn rename(&self, source: PathBuf, new_name: impl Into<String>) -> JobHandle {
        self.submit(FileOperation::rename(source, new_name))
    }

    pub fn set_permissions(&self, target: PathBuf, mode: u32) -> JobHandle {
        self.submit(FileOperation::SetPermissions { target, mode })
    }

    pub fn set_permissions_recursive(
        &self,
        root: PathBuf,
        file_value: u32,
        file_mask: u32,
        dir_value: u32,
        dir_mask: u32,
    ) -> JobHandle {
        self.submit(FileOperation::SetPermissionsRecursive {
            root,
            file_value,
            file_mask,
            dir_value,
            dir_mask,
        })
    }

    /// Set the owner of `target` to a user name or uid.
    pub fn change_owner(&self, target: PathBuf, user: impl Into<String>) -> JobHandle {
        self.submit(FileOperation::ChangeOwnership {
            target,
            kind: OwnershipKind::Owner,
            value: user.into(),
        })
    }

    /// Set the group of `target` to a group name or gid.
    pub fn change_group(&self, target: PathBuf, group: impl Into<String>) -> JobHandle {
        self.submit(FileOperation::ChangeOwnership {
            target,
            kind: OwnershipKind::Group,
            value: group.into(),
        })
    }

    pub fn mark_desktop_file_trusted(&self, target: PathBuf) -> JobHandle {
        self.submit(FileOperation::MarkTrusted { target })
    }

    /// Revert the pending undo entry. None when there is nothing to undo.
    pub fn undo(&self) -> Option<JobHandle> {
        self.replay(Direction::Undo)
    }

    /// Perform the pending redo entry again. None when there is nothing to
    /// redo.
    pub fn redo(&self) -> Option<JobHandle> {
        self.replay(Direction::Redo)
    }

    fn replay(&self, direction: Direction) -> Option<JobHandle> {
        let replay = self.inner.undo.begin(direction)?;
        let operation = match direction {
            Direction::Undo => replay.info.inverse(),
            Direction::Redo => replay.info.forward(),
        };
        Some(self.spawn(operation, Some(replay)))
    }

    fn spawn(&self, operation: FileOperation, replay: Option<Replay>) -> JobHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let operation_type = operation.operation_type();

        let Ok(runtime) = Handle::try_current() else {
            tracing::error!(target: "haul::job", id, "no tokio runtime to run the job on");
            if let Some(replay) = replay {
                self.inner.undo.finish(replay, false, true, None);
            }
            return JobHandle::finished(
                id,
                OperationComplete::failed(
                    operation_type,
                    OperationError::new(PathBuf::new(), "no async runtime available"),
                ),
            );
        };

        if replay.is_none() {
            self.inner.undo.discard_redo();
        }
        tracing::info!(target: "haul::job", id, operation = %operation_type, replay = replay.is_some(), "job submitted");

        let (tx, rx) = mpsc::channel(self.inner.config.channel_size);
        let cancel = CancellationToken::new();
        let context = JobContext {
            config: Arc::clone(&self.inner.config),
            changes: self.inner.changes.clone(),
            trash: Arc::clone(&self.inner.trash),
        };
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = runtime.clone();

        runtime.spawn_blocking(move || {
            let mut job = CommonJob::new(
                id,
                operation_type,
                context,
                token,
                tx.clone(),
                handle,
                replay.is_some(),
            );
            execute(&mut job, &operation);
            let (complete, undo) = job.finish();

            match replay {
                Some(replay) => inner
                    .undo
                    .finish(replay, complete.success, complete.user_cancel, undo),
                None if undo.is_some() => inner.undo.set_action(undo),
                None => {}
            }
            inner.changes.consume(true);

            tracing::info!(
                target: "haul::job",
                id,
                success = complete.success,
                summary = %complete.summary(),
                "job finished"
            );
            // The controller may have dropped the handle already.
            let _ = tx.blocking_send(JobEvent::Complete(complete));
        });

        JobHandle::new(id, operation_type, cancel, rx)
    }
}

/// Run the executor for `operation`.
fn execute(job: &mut CommonJob, operation: &FileOperation) {
    match operation {
        FileOperation::Copy {
            sources,
            destination,
            positions,
            target_name,
        } => transfer::run(
            job,
            TransferRequest {
                mode: TransferMode::Copy,
                sources,
                destination: Some(destination.as_path()),
                positions,
                target_name: target_name.as_deref(),
            },
        ),
        FileOperation::Move {
            sources,
            destination,
            positions,
        } => transfer::run(
            job,
            TransferRequest {
                mode: TransferMode::Move,
                sources,
                destination: Some(destination.as_path()),
                positions,
                target_name: None,
            },
        ),
        FileOperation::Duplicate { sources, positions } => transfer::run(
            job,
            TransferRequest {
                mode: TransferMode::Duplicate,
                sources,
                destination: None,
                positions,
                target_name: None,
            },
        ),
        FileOperation::Link {
            sources,
            destination,
            positions,
        } => link::run(job, sources, destination, positions),
        FileOperation::Delete { targets, try_trash } => delete::run(job, targets, *try_trash),
        FileOperation::EmptyTrash => trash::empty_trash(job),
        FileOperation::RestoreFromTrash { items } => trash::restore_from_trash(job, items),
        FileOperation::CreateFolder {
            parent,
            name,
            position,
        } => create::run(job, parent, CreateKind::Folder, name.as_deref(), *position),
        FileOperation::CreateFile {
            parent,
            name,
            contents,
            position,
        } => create::run(
            job,
            parent,
            CreateKind::File {
                contents: contents.clone(),
            },
            name.as_deref(),
            *position,
        ),
        FileOperation::CreateFromTemplate {
            parent,
            template,
            name,
            position,
        } => create::run(
            job,
            parent,
            CreateKind::Template {
                template: template.clone(),
            },
            name.as_deref(),
            *position,
        ),
        FileOperation::Rename { source, new_name } => rename::run(job, source, new_name),
        FileOperation::SetPermissions { target, mode } => {
            permissions::set_permissions(job, target, *mode)
        }
        FileOperation::SetPermissionsRecursive {
            root,
            file_value,
            file_mask,
            dir_value,
            dir_mask,
        } => permissions::set_permissions_recursive(
            job,
            root,
            *file_value,
            *file_mask,
            *dir_value,
            *dir_mask,
        ),
        FileOperation::RestorePermissions { modes } => permissions::restore_permissions(job, modes),
        FileOperation::ChangeOwnership {
            target,
            kind,
            value,
        } => permissions::change_ownership(job, target, *kind, value),
        FileOperation::MarkTrusted { target } => trusted::run(job, target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn engine(temp: &TempDir) -> Engine {
        let config = EngineConfig::builder()
            .trash_dir(temp.path().join("trash"))
            .staging_dirs(vec![temp.path().join("burn")])
            .build()
            .unwrap();
        Engine::new(config)
    }

    #[test]
    fn test_resolve_transfer_rules() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);
        let dir = temp.path().join("dir");
        let other = temp.path().join("other");
        let burn = temp.path().join("burn");
        for d in [&dir, &other, &burn, &temp.path().join("trash")] {
            fs::create_dir_all(d).unwrap();
        }
        let file = dir.join("a");
        fs::write(&file, b"a").unwrap();
        let sources = vec![file];

        let op = engine.resolve_transfer(sources.clone(), None, TransferAction::Copy);
        assert!(matches!(op, FileOperation::Duplicate { .. }));
        let op = engine.resolve_transfer(sources.clone(), Some(dir.clone()), TransferAction::Copy);
        assert!(matches!(op, FileOperation::Duplicate { .. }));
        let op = engine.resolve_transfer(sources.clone(), Some(other.clone()), TransferAction::Copy);
        assert!(matches!(op, FileOperation::Copy { .. }));
        let op = engine.resolve_transfer(sources.clone(), Some(other.clone()), TransferAction::Move);
        assert!(matches!(op, FileOperation::Move { .. }));
        let op = engine.resolve_transfer(sources.clone(), Some(burn), TransferAction::Move);
        assert!(matches!(op, FileOperation::Copy { .. }));
        let op = engine.resolve_transfer(
            sources.clone(),
            Some(temp.path().join("trash")),
            TransferAction::Move,
        );
        assert!(matches!(op, FileOperation::Delete { try_trash: true, .. }));
        let op = engine.resolve_transfer(sources, Some(other), TransferAction::Link);
        assert!(matches!(op, FileOperation::Link { .. }));
    }

    #[test]
    fn test_submit_without_runtime_fails_cleanly() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);
        let mut handle = engine.new_folder(temp.path().to_path_buf(), None);
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let event = runtime.block_on(handle.recv());
        match event {
            Some(JobEvent::Complete(complete)) => assert!(!complete.success),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!temp.path().join("Untitled Folder").exists());
    }
}
