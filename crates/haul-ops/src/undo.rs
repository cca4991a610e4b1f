//! Single-slot undo/redo for file operations.
//!
//! Every finished job may leave one [`UndoInfo`] behind. It replaces
//! whatever the [`UndoManager`] held before; there is no history. Undoing
//! runs the entry's inverse as a new job, redoing runs it forward again.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::broadcast;

use crate::operation::FileOperation;
use crate::permissions::OwnershipKind;

/// Which transfer a [`TransferUndo`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Copy,
    Duplicate,
    Move,
    CreateLink,
    RestoreFromTrash,
}

/// Origin/target pairs of a copy, move, duplicate or link job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferUndo {
    pub kind: TransferKind,
    /// Directory the items came from.
    pub src_dir: Option<PathBuf>,
    /// Directory the items went to.
    pub dest_dir: Option<PathBuf>,
    /// `(origin, target)` in transfer order.
    pub pairs: Vec<(PathBuf, PathBuf)>,
}

impl TransferUndo {
    pub fn new(kind: TransferKind, src_dir: Option<PathBuf>, dest_dir: Option<PathBuf>) -> Self {
        Self {
            kind,
            src_dir,
            dest_dir,
            pairs: Vec::new(),
        }
    }

    pub fn add_pair(&mut self, origin: &Path, target: &Path) {
        self.pairs.push((origin.to_path_buf(), target.to_path_buf()));
    }

    fn origins(&self) -> Vec<PathBuf> {
        self.pairs.iter().map(|(origin, _)| origin.clone()).collect()
    }

    fn targets(&self) -> Vec<PathBuf> {
        self.pairs.iter().map(|(_, target)| target.clone()).collect()
    }
}

/// What a create job made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateKind {
    Folder,
    /// An empty file, or one with the given initial contents.
    File { contents: Option<Vec<u8>> },
    Template { template: PathBuf },
}

/// Minimal data needed to invert one finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UndoInfo {
    Transfer(TransferUndo),
    Create {
        kind: CreateKind,
        target: PathBuf,
    },
    Rename {
        old: PathBuf,
        new: PathBuf,
    },
    /// Original paths with the time each was put into the trash.
    Trash { items: Vec<(PathBuf, i64)> },
    RecursivePermissions {
        root: PathBuf,
        file_value: u32,
        file_mask: u32,
        dir_value: u32,
        dir_mask: u32,
        /// Mode of every touched entry before the change.
        originals: Vec<(PathBuf, u32)>,
    },
    Permissions {
        file: PathBuf,
        before: u32,
        after: u32,
    },
    Ownership {
        kind: OwnershipKind,
        file: PathBuf,
        before: String,
        after: String,
    },
}

/// Menu texts for the pending entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoLabels {
    pub undo_label: String,
    pub undo_description: String,
    pub redo_label: String,
    pub redo_description: String,
}

impl Default for UndoLabels {
    fn default() -> Self {
        Self {
            undo_label: "Undo".into(),
            undo_description: "Undo last action".into(),
            redo_label: "Redo".into(),
            redo_description: "Redo last undone action".into(),
        }
    }
}

fn base(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn shown(path: Option<&PathBuf>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}

impl UndoInfo {
    /// Number of items the entry covers.
    pub fn item_count(&self) -> usize {
        match self {
            Self::Transfer(t) => t.pairs.len(),
            Self::Trash { items } => items.len(),
            Self::RecursivePermissions { originals, .. } => originals.len(),
            _ => 1,
        }
    }

    /// Entries with nothing to invert are not worth keeping.
    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    pub fn labels(&self) -> UndoLabels {
        let mut labels = UndoLabels::default();
        let count = self.item_count();
        let mut set = |undo_label: String, undo_desc: String, redo_label: String, redo_desc: String| {
            labels = UndoLabels {
                undo_label,
                undo_description: undo_desc,
                redo_label,
                redo_description: redo_desc,
            };
        };

        match self {
            Self::Transfer(t) => {
                let name = t.pairs.first().map(|(_, target)| base(target)).unwrap_or_default();
                let source = shown(t.src_dir.as_ref());
                let destination = shown(t.dest_dir.as_ref());
                let many = count > 1;
                match t.kind {
                    TransferKind::Move if many => set(
                        format!("_Undo Move {count} items"),
                        format!("Move {count} items back to '{source}'"),
                        format!("_Redo Move {count} items"),
                        format!("Move {count} items to '{destination}'"),
                    ),
                    TransferKind::Move => set(
                        "_Undo Move".into(),
                        format!("Move '{name}' back to '{source}'"),
                        "_Redo Move".into(),
                        format!("Move '{name}' to '{destination}'"),
                    ),
                    TransferKind::RestoreFromTrash if many => set(
                        "_Undo Restore from Trash".into(),
                        format!("Move {count} items back to trash"),
                        "_Redo Restore from Trash".into(),
                        format!("Restore {count} items from trash"),
                    ),
                    TransferKind::RestoreFromTrash => set(
                        "_Undo Restore from Trash".into(),
                        format!("Move '{name}' back to trash"),
                        "_Redo Restore from Trash".into(),
                        format!("Restore '{name}' from trash"),
                    ),
                    TransferKind::Copy if many => set(
                        format!("_Undo Copy {count} items"),
                        format!("Delete {count} copied items"),
                        format!("_Redo Copy {count} items"),
                        format!("Copy {count} items to '{destination}'"),
                    ),
                    TransferKind::Copy => set(
                        "_Undo Copy".into(),
                        format!("Delete '{name}'"),
                        "_Redo Copy".into(),
                        format!("Copy '{name}' to '{destination}'"),
                    ),
                    TransferKind::Duplicate if many => set(
                        format!("_Undo Duplicate {count} items"),
                        format!("Delete {count} duplicated items"),
                        format!("_Redo Duplicate {count} items"),
                        format!("Duplicate {count} items in '{destination}'"),
                    ),
                    TransferKind::Duplicate => set(
                        "_Undo Duplicate".into(),
                        format!("Delete '{name}'"),
                        "_Redo Duplicate".into(),
                        format!("Duplicate '{name}' in '{destination}'"),
                    ),
                    TransferKind::CreateLink if many => set(
                        "_Undo Create Link".into(),
                        format!("Delete links to {count} items"),
                        "_Redo Create Link".into(),
                        format!("Create links to {count} items"),
                    ),
                    TransferKind::CreateLink => {
                        let origin = t.pairs.first().map(|(o, _)| base(o)).unwrap_or_default();
                        set(
                            "_Undo Create Link".into(),
                            format!("Delete link to '{origin}'"),
                            "_Redo Create Link".into(),
                            format!("Create link to '{origin}'"),
                        )
                    }
                }
            }
            Self::Create { kind, target } => {
                let name = target.display();
                let (undo_label, redo_label, redo) = match kind {
                    CreateKind::Folder => (
                        "_Undo Create Folder",
                        "_Redo Create Folder",
                        format!("Create a new folder '{name}'"),
                    ),
                    CreateKind::File { .. } => (
                        "_Undo Create Empty File",
                        "_Redo Create Empty File",
                        format!("Create an empty file '{name}'"),
                    ),
                    CreateKind::Template { .. } => (
                        "_Undo Create from Template",
                        "_Redo Create from Template",
                        format!("Create new file '{name}' from template"),
                    ),
                };
                set(
                    undo_label.into(),
                    format!("Delete '{name}'"),
                    redo_label.into(),
                    redo,
                );
            }
            Self::Rename { old, new } => set(
                "_Undo Rename".into(),
                format!("Rename '{}' as '{}'", base(new), base(old)),
                "_Redo Rename".into(),
                format!("Rename '{}' as '{}'", base(old), base(new)),
            ),
            Self::Trash { items } => match items.as_slice() {
                [(path, _)] => set(
                    "_Undo Trash".into(),
                    format!("Restore '{}' to '{}'", base(path), path.display()),
                    "_Redo Trash".into(),
                    format!("Move '{}' to trash", path.display()),
                ),
                _ => set(
                    "_Undo Trash".into(),
                    format!("Restore {count} items from trash"),
                    "_Redo Trash".into(),
                    format!("Move {count} items to trash"),
                ),
            },
            Self::RecursivePermissions { root, .. } => set(
                "_Undo Change Permissions".into(),
                format!(
                    "Restore original permissions of items enclosed in '{}'",
                    base(root)
                ),
                "_Redo Change Permissions".into(),
                format!("Set permissions of items enclosed in '{}'", base(root)),
            ),
            Self::Permissions { file, .. } => set(
                "_Undo Change Permissions".into(),
                format!("Restore original permissions of '{}'", base(file)),
                "_Redo Change Permissions".into(),
                format!("Set permissions of '{}'", base(file)),
            ),
            Self::Ownership {
                kind,
                file,
                before,
                after,
            } => {
                let (what, label) = match kind {
                    OwnershipKind::Owner => ("owner", "Owner"),
                    OwnershipKind::Group => ("group", "Group"),
                };
                set(
                    format!("_Undo Change {label}"),
                    format!("Restore {what} of '{}' to '{before}'", base(file)),
                    format!("_Redo Change {label}"),
                    format!("Set {what} of '{}' to '{after}'", base(file)),
                );
            }
        }
        labels
    }

    /// The operation that reverts the entry.
    pub fn inverse(&self) -> FileOperation {
        match self {
            Self::Transfer(t) => match t.kind {
                TransferKind::Copy | TransferKind::Duplicate | TransferKind::CreateLink => {
                    let mut targets = t.targets();
                    targets.reverse();
                    FileOperation::delete(targets, false)
                }
                TransferKind::Move => {
                    let back = t
                        .src_dir
                        .clone()
                        .or_else(|| t.pairs.first().and_then(|(o, _)| o.parent().map(Path::to_path_buf)))
                        .unwrap_or_default();
                    FileOperation::move_to(t.targets(), back)
                }
                TransferKind::RestoreFromTrash => FileOperation::delete(t.targets(), true),
            },
            Self::Create { target, .. } => FileOperation::delete(vec![target.clone()], false),
            Self::Rename { old, new } => FileOperation::rename(new.clone(), base(old)),
            Self::Trash { items } => FileOperation::RestoreFromTrash {
                items: items.clone(),
            },
            Self::RecursivePermissions { originals, .. } => FileOperation::RestorePermissions {
                modes: originals.clone(),
            },
            Self::Permissions { file, before, .. } => FileOperation::SetPermissions {
                target: file.clone(),
                mode: *before,
            },
            Self::Ownership {
                kind, file, before, ..
            } => FileOperation::ChangeOwnership {
                target: file.clone(),
                kind: *kind,
                value: before.clone(),
            },
        }
    }

    /// The operation that performs the entry again.
    pub fn forward(&self) -> FileOperation {
        match self {
            Self::Transfer(t) => {
                let dest = t.dest_dir.clone().unwrap_or_default();
                match t.kind {
                    TransferKind::Copy => FileOperation::copy(t.origins(), dest),
                    TransferKind::Duplicate => FileOperation::duplicate(t.origins()),
                    TransferKind::CreateLink => FileOperation::link(t.origins(), dest),
                    TransferKind::Move | TransferKind::RestoreFromTrash => {
                        FileOperation::move_to(t.origins(), dest)
                    }
                }
            }
            Self::Create { kind, target } => {
                let parent = target.parent().map(Path::to_path_buf).unwrap_or_default();
                let name = Some(base(target));
                match kind {
                    CreateKind::Folder => FileOperation::CreateFolder {
                        parent,
                        name,
                        position: None,
                    },
                    CreateKind::File { contents } => FileOperation::CreateFile {
                        parent,
                        name,
                        contents: contents.clone(),
                        position: None,
                    },
                    CreateKind::Template { template } => FileOperation::CreateFromTemplate {
                        parent,
                        template: template.clone(),
                        name,
                        position: None,
                    },
                }
            }
            Self::Rename { old, new } => FileOperation::rename(old.clone(), base(new)),
            Self::Trash { items } => {
                FileOperation::delete(items.iter().map(|(p, _)| p.clone()).collect(), true)
            }
            Self::RecursivePermissions {
                root,
                file_value,
                file_mask,
                dir_value,
                dir_mask,
                ..
            } => FileOperation::SetPermissionsRecursive {
                root: root.clone(),
                file_value: *file_value,
                file_mask: *file_mask,
                dir_value: *dir_value,
                dir_mask: *dir_mask,
            },
            Self::Permissions { file, after, .. } => FileOperation::SetPermissions {
                target: file.clone(),
                mode: *after,
            },
            Self::Ownership {
                kind, file, after, ..
            } => FileOperation::ChangeOwnership {
                target: file.clone(),
                kind: *kind,
                value: after.clone(),
            },
        }
    }

    fn same_variant(&self, other: &UndoInfo) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// What the undo slot currently offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum UndoState {
    None,
    Undo,
    Redo,
}

/// Which way a replay runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Direction {
    Undo,
    Redo,
}

/// A replay in flight: the entry taken out of the slot and the slot
/// generation it belongs to.
#[derive(Debug)]
pub(crate) struct Replay {
    pub direction: Direction,
    pub info: UndoInfo,
    generation: u64,
}

#[derive(Debug)]
struct Slot {
    info: Option<UndoInfo>,
    state: UndoState,
    last_state: UndoState,
    generation: u64,
}

/// Holder of the single pending undo/redo entry.
#[derive(Debug, Clone)]
pub struct UndoManager {
    slot: Arc<Mutex<Slot>>,
    notify: broadcast::Sender<UndoState>,
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoManager {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(16);
        Self {
            slot: Arc::new(Mutex::new(Slot {
                info: None,
                state: UndoState::None,
                last_state: UndoState::None,
                generation: 0,
            })),
            notify,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Receive the new state every time the slot changes.
    pub fn subscribe(&self) -> broadcast::Receiver<UndoState> {
        self.notify.subscribe()
    }

    fn emit(&self, state: UndoState) {
        tracing::debug!(target: "haul::undo", %state, "undo state changed");
        // Nobody listening is fine.
        let _ = self.notify.send(state);
    }

    pub fn state(&self) -> UndoState {
        self.lock().state
    }

    /// A copy of the pending entry.
    pub fn action(&self) -> Option<UndoInfo> {
        self.lock().info.clone()
    }

    /// Menu texts for the pending entry, or the generic ones.
    pub fn labels(&self) -> UndoLabels {
        self.lock()
            .info
            .as_ref()
            .map(UndoInfo::labels)
            .unwrap_or_default()
    }

    /// Replace the pending entry. `None` clears the slot.
    pub fn set_action(&self, info: Option<UndoInfo>) {
        let state = {
            let mut slot = self.lock();
            slot.generation += 1;
            slot.last_state = UndoState::None;
            slot.state = if info.is_some() {
                UndoState::Undo
            } else {
                UndoState::None
            };
            slot.info = info;
            slot.state
        };
        self.emit(state);
    }

    /// Forget a pending redo; a pending undo stays.
    pub fn discard_redo(&self) {
        let cleared = {
            let mut slot = self.lock();
            if slot.state == UndoState::Redo {
                slot.generation += 1;
                slot.info = None;
                slot.state = UndoState::None;
                slot.last_state = UndoState::None;
                true
            } else {
                false
            }
        };
        if cleared {
            tracing::debug!(target: "haul::undo", "pending redo discarded");
            self.emit(UndoState::None);
        }
    }

    /// Take the entry out of the slot to replay it, if the slot is in the
    /// matching state.
    pub(crate) fn begin(&self, direction: Direction) -> Option<Replay> {
        let replay = {
            let mut slot = self.lock();
            let expected = match direction {
                Direction::Undo => UndoState::Undo,
                Direction::Redo => UndoState::Redo,
            };
            if slot.state != expected {
                return None;
            }
            let info = slot.info.take()?;
            slot.last_state = slot.state;
            slot.state = UndoState::None;
            slot.generation += 1;
            Replay {
                direction,
                info,
                generation: slot.generation,
            }
        };
        tracing::info!(target: "haul::undo", %direction, "replay started");
        self.emit(UndoState::None);
        Some(replay)
    }

    /// Settle the slot after a replay's job finished.
    ///
    /// Success flips the state, a user cancel restores the state from
    /// before the replay and any other failure leaves the slot empty. A
    /// completion for an entry that was superseded meanwhile is ignored.
    /// `refreshed` is the entry the replaying job recorded itself; a
    /// successful redo keeps it in place of the old one.
    pub(crate) fn finish(
        &self,
        replay: Replay,
        success: bool,
        user_cancel: bool,
        refreshed: Option<UndoInfo>,
    ) {
        let state = {
            let mut slot = self.lock();
            if slot.generation != replay.generation {
                tracing::debug!(target: "haul::undo", "replay finished after being superseded");
                return;
            }
            slot.generation += 1;
            if success {
                let info = match (replay.direction, refreshed) {
                    (Direction::Redo, Some(fresh))
                        if fresh.same_variant(&replay.info) && !fresh.is_empty() =>
                    {
                        fresh
                    }
                    _ => replay.info,
                };
                slot.info = Some(info);
                slot.state = match replay.direction {
                    Direction::Undo => UndoState::Redo,
                    Direction::Redo => UndoState::Undo,
                };
            } else if user_cancel {
                slot.info = Some(replay.info);
                slot.state = slot.last_state;
            } else {
                slot.info = None;
                slot.state = UndoState::None;
            }
            slot.state
        };
        tracing::info!(target: "haul::undo", %state, success, user_cancel, "replay finished");
        self.emit(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy_info(count: usize) -> UndoInfo {
        let mut t = TransferUndo::new(
            TransferKind::Copy,
            Some(PathBuf::from("/src")),
            Some(PathBuf::from("/dst")),
        );
        for i in 0..count {
            t.add_pair(
                &PathBuf::from(format!("/src/f{i}")),
                &PathBuf::from(format!("/dst/f{i}")),
            );
        }
        UndoInfo::Transfer(t)
    }

    #[test]
    fn test_labels() {
        let labels = copy_info(3).labels();
        assert_eq!(labels.undo_label, "_Undo Copy 3 items");
        assert_eq!(labels.undo_description, "Delete 3 copied items");
        assert_eq!(labels.redo_description, "Copy 3 items to '/dst'");

        let labels = copy_info(1).labels();
        assert_eq!(labels.undo_label, "_Undo Copy");
        assert_eq!(labels.undo_description, "Delete 'f0'");

        let mut moved = TransferUndo::new(
            TransferKind::Move,
            Some(PathBuf::from("/src")),
            Some(PathBuf::from("/dst")),
        );
        moved.add_pair(Path::new("/src/a"), Path::new("/dst/a"));
        let labels = UndoInfo::Transfer(moved).labels();
        assert_eq!(labels.undo_description, "Move 'a' back to '/src'");

        let labels = UndoInfo::Rename {
            old: PathBuf::from("/d/old"),
            new: PathBuf::from("/d/new"),
        }
        .labels();
        assert_eq!(labels.undo_description, "Rename 'new' as 'old'");
        assert_eq!(labels.redo_description, "Rename 'old' as 'new'");

        assert_eq!(UndoLabels::default().undo_label, "Undo");
    }

    #[test]
    fn test_inverse_of_copy_deletes_targets_in_reverse() {
        match copy_info(2).inverse() {
            FileOperation::Delete { targets, try_trash } => {
                assert!(!try_trash);
                assert_eq!(
                    targets,
                    vec![PathBuf::from("/dst/f1"), PathBuf::from("/dst/f0")]
                );
            }
            other => panic!("unexpected inverse {other:?}"),
        }
    }

    #[test]
    fn test_inverse_and_forward_of_rename() {
        let info = UndoInfo::Rename {
            old: PathBuf::from("/d/old"),
            new: PathBuf::from("/d/new"),
        };
        match info.inverse() {
            FileOperation::Rename { source, new_name } => {
                assert_eq!(source, PathBuf::from("/d/new"));
                assert_eq!(new_name, "old");
            }
            other => panic!("unexpected inverse {other:?}"),
        }
        match info.forward() {
            FileOperation::Rename { source, new_name } => {
                assert_eq!(source, PathBuf::from("/d/old"));
                assert_eq!(new_name, "new");
            }
            other => panic!("unexpected forward {other:?}"),
        }
    }

    #[test]
    fn test_state_machine() {
        let manager = UndoManager::new();
        let mut rx = manager.subscribe();
        assert_eq!(manager.state(), UndoState::None);
        assert!(manager.begin(Direction::Undo).is_none());

        manager.set_action(Some(copy_info(1)));
        assert_eq!(manager.state(), UndoState::Undo);
        assert_eq!(rx.try_recv().unwrap(), UndoState::Undo);
        assert!(manager.begin(Direction::Redo).is_none());

        let replay = manager.begin(Direction::Undo).unwrap();
        assert_eq!(manager.state(), UndoState::None);
        manager.finish(replay, true, false, None);
        assert_eq!(manager.state(), UndoState::Redo);
        assert_eq!(manager.action(), Some(copy_info(1)));

        let replay = manager.begin(Direction::Redo).unwrap();
        manager.finish(replay, false, true, None);
        assert_eq!(manager.state(), UndoState::Redo);

        let replay = manager.begin(Direction::Redo).unwrap();
        manager.finish(replay, false, false, None);
        assert_eq!(manager.state(), UndoState::None);
        assert!(manager.action().is_none());
    }

    #[test]
    fn test_redo_discarded_undo_kept() {
        let manager = UndoManager::new();
        manager.set_action(Some(copy_info(1)));
        manager.discard_redo();
        assert_eq!(manager.state(), UndoState::Undo);

        let replay = manager.begin(Direction::Undo).unwrap();
        manager.finish(replay, true, false, None);
        assert_eq!(manager.state(), UndoState::Redo);
        manager.discard_redo();
        assert_eq!(manager.state(), UndoState::None);
    }

    #[test]
    fn test_superseded_replay_is_ignored() {
        let manager = UndoManager::new();
        manager.set_action(Some(copy_info(1)));
        let replay = manager.begin(Direction::Undo).unwrap();

        manager.set_action(Some(copy_info(2)));
        manager.finish(replay, true, false, None);

        assert_eq!(manager.state(), UndoState::Undo);
        assert_eq!(manager.action(), Some(copy_info(2)));
    }

    #[test]
    fn test_redo_refreshes_entry() {
        let manager = UndoManager::new();
        let old = UndoInfo::Trash {
            items: vec![(PathBuf::from("/a"), 100)],
        };
        manager.set_action(Some(old.clone()));
        let replay = manager.begin(Direction::Undo).unwrap();
        manager.finish(replay, true, false, None);

        let fresh = UndoInfo::Trash {
            items: vec![(PathBuf::from("/a"), 200)],
        };
        let replay = manager.begin(Direction::Redo).unwrap();
        manager.finish(replay, true, false, Some(fresh.clone()));
        assert_eq!(manager.action(), Some(fresh));
        assert_eq!(manager.state(), UndoState::Undo);
    }
}
