//! File operations engine for haul.
//!
//! Every operation (copy, move, duplicate, link, delete, trash, create,
//! rename, permission and ownership changes) runs as a job on the blocking
//! pool of a tokio runtime. A job reports through a channel of
//! [`JobEvent`]s: progress updates, prompts that pause it until answered,
//! and one final completion record. Finished jobs leave an undo entry in
//! the engine's single-slot [`UndoManager`] and their filesystem changes in
//! its [`ChangeQueue`].

mod changes;
mod conflict;
mod create;
mod delete;
mod engine;
mod fsinfo;
mod job;
mod link;
pub mod naming;
mod operation;
mod permissions;
mod progress;
mod rename;
mod request;
mod scan;
mod transfer;
mod trash;
mod trusted;
mod undo;

pub use changes::{Change, ChangeQueue, ChangeSink, LogSink, PositionRequest};
pub use conflict::{ConflictKind, ConflictOutcome, ConflictPrompt, ConflictResponse};
pub use engine::{Engine, TransferAction};
pub use job::{JobEvent, JobHandle};
pub use operation::{FileOperation, OperationError};
pub use permissions::{OwnershipKind, apply_mask, resolve_id};
pub use progress::{OperationComplete, OperationProgress, OperationType, format_time};
pub use rename::validate_filename;
pub use request::{AutoResponder, Choice, MessageKind, MessagePrompt, Prompt, Reply, Request, Responder};
pub use trash::{DirectoryTrash, SystemTrash, TIMESTAMP_TOLERANCE, TrashEntry, TrashStore};
pub use trusted::{is_trusted_desktop_file, mark_desktop_file_trusted};
pub use undo::{
    CreateKind, Direction, TransferKind, TransferUndo, UndoInfo, UndoLabels, UndoManager, UndoState,
};
