//! Batched notifications about filesystem changes made by jobs.
//!
//! Executors enqueue one [`Change`] per mutated path. A consumer drains the
//! queue in arrival order and hands compatible runs of changes to a
//! [`ChangeSink`] as batches.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use haul_core::Position;

/// Items collected before a partial consume forces a flush.
const MAX_CHUNK: usize = 20;

/// One filesystem mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(PathBuf),
    Changed(PathBuf),
    Removed(PathBuf),
    Moved { from: PathBuf, to: PathBuf },
    PositionSet { path: PathBuf, position: Position },
    PositionRemove(PathBuf),
}

/// A placement request for a view; `None` clears the stored position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRequest {
    pub path: PathBuf,
    pub position: Option<Position>,
}

/// Receives batches of changes. Every method defaults to doing nothing.
pub trait ChangeSink: Send + Sync {
    fn files_added(&self, _paths: &[PathBuf]) {}
    fn files_changed(&self, _paths: &[PathBuf]) {}
    fn files_removed(&self, _paths: &[PathBuf]) {}
    fn files_moved(&self, _pairs: &[(PathBuf, PathBuf)]) {}
    fn positions(&self, _requests: &[PositionRequest]) {}
}

/// Sink that only traces what it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ChangeSink for LogSink {
    fn files_added(&self, paths: &[PathBuf]) {
        tracing::trace!(target: "haul::changes", count = paths.len(), "files added");
    }

    fn files_changed(&self, paths: &[PathBuf]) {
        tracing::trace!(target: "haul::changes", count = paths.len(), "files changed");
    }

    fn files_removed(&self, paths: &[PathBuf]) {
        tracing::trace!(target: "haul::changes", count = paths.len(), "files removed");
    }

    fn files_moved(&self, pairs: &[(PathBuf, PathBuf)]) {
        tracing::trace!(target: "haul::changes", count = pairs.len(), "files moved");
    }

    fn positions(&self, requests: &[PositionRequest]) {
        tracing::trace!(target: "haul::changes", count = requests.len(), "positions scheduled");
    }
}

#[derive(Default)]
struct Pending {
    additions: Vec<PathBuf>,
    changes: Vec<PathBuf>,
    deletions: Vec<PathBuf>,
    moves: Vec<(PathBuf, PathBuf)>,
    positions: Vec<PositionRequest>,
}

impl Pending {
    fn needs_flush_before(&self, change: &Change) -> bool {
        use Change::*;

        let position = matches!(change, PositionSet { .. } | PositionRemove(_));
        (!self.additions.is_empty() && !(matches!(change, Added(_)) || position))
            || (!self.changes.is_empty() && !matches!(change, Changed(_)))
            || (!self.moves.is_empty() && !(matches!(change, Moved { .. }) || position))
            || (!self.deletions.is_empty() && !matches!(change, Removed(_)))
            || (!self.positions.is_empty()
                && !(position || matches!(change, Added(_) | Moved { .. })))
    }

    fn push(&mut self, change: Change) {
        match change {
            Change::Added(path) => self.additions.push(path),
            Change::Changed(path) => self.changes.push(path),
            Change::Removed(path) => self.deletions.push(path),
            Change::Moved { from, to } => self.moves.push((from, to)),
            Change::PositionSet { path, position } => self.positions.push(PositionRequest {
                path,
                position: Some(position),
            }),
            Change::PositionRemove(path) => self.positions.push(PositionRequest {
                path,
                position: None,
            }),
        }
    }

    fn flush(&mut self, sink: &dyn ChangeSink) {
        if !self.deletions.is_empty() {
            sink.files_removed(&std::mem::take(&mut self.deletions));
        }
        if !self.moves.is_empty() {
            sink.files_moved(&std::mem::take(&mut self.moves));
        }
        if !self.additions.is_empty() {
            sink.files_added(&std::mem::take(&mut self.additions));
        }
        if !self.changes.is_empty() {
            sink.files_changed(&std::mem::take(&mut self.changes));
        }
        if !self.positions.is_empty() {
            sink.positions(&std::mem::take(&mut self.positions));
        }
    }
}

/// Process-wide FIFO of pending changes, shared by every job of an engine.
#[derive(Clone)]
pub struct ChangeQueue {
    queue: Arc<Mutex<VecDeque<Change>>>,
    sink: Arc<dyn ChangeSink>,
}

impl fmt::Debug for ChangeQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeQueue")
            .field("pending", &self.len())
            .finish()
    }
}

impl ChangeQueue {
    pub fn new(sink: Arc<dyn ChangeSink>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Change>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, change: Change) {
        self.lock().push_back(change);
    }

    pub fn added(&self, path: impl Into<PathBuf>) {
        self.push(Change::Added(path.into()));
    }

    pub fn changed(&self, path: impl Into<PathBuf>) {
        self.push(Change::Changed(path.into()));
    }

    pub fn removed(&self, path: impl Into<PathBuf>) {
        self.push(Change::Removed(path.into()));
    }

    pub fn moved(&self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) {
        self.push(Change::Moved {
            from: from.into(),
            to: to.into(),
        });
    }

    pub fn position_set(&self, path: impl Into<PathBuf>, position: Position) {
        self.push(Change::PositionSet {
            path: path.into(),
            position,
        });
    }

    pub fn position_remove(&self, path: impl Into<PathBuf>) {
        self.push(Change::PositionRemove(path.into()));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drain the queue into the sink.
    ///
    /// Consecutive compatible changes are delivered together. Unless
    /// `consume_all` is set, the collected batch is also flushed every
    /// [`MAX_CHUNK`] changes.
    pub fn consume(&self, consume_all: bool) {
        let mut pending = Pending::default();
        let mut chunk_count = 0;

        loop {
            // The lock is released before the sink runs.
            let next = self.lock().pop_front();
            let Some(change) = next else {
                pending.flush(self.sink.as_ref());
                return;
            };

            if pending.needs_flush_before(&change) || (!consume_all && chunk_count >= MAX_CHUNK) {
                pending.flush(self.sink.as_ref());
                chunk_count = 0;
            }

            pending.push(change);
            chunk_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }

        fn log(&self, kind: &str, paths: impl Iterator<Item = String>) {
            let joined: Vec<String> = paths.collect();
            self.0
                .lock()
                .unwrap()
                .push(format!("{kind}[{}]", joined.join(",")));
        }
    }

    fn name(path: &PathBuf) -> String {
        path.display().to_string()
    }

    impl ChangeSink for Recorder {
        fn files_added(&self, paths: &[PathBuf]) {
            self.log("added", paths.iter().map(name));
        }
        fn files_changed(&self, paths: &[PathBuf]) {
            self.log("changed", paths.iter().map(name));
        }
        fn files_removed(&self, paths: &[PathBuf]) {
            self.log("removed", paths.iter().map(name));
        }
        fn files_moved(&self, pairs: &[(PathBuf, PathBuf)]) {
            self.log(
                "moved",
                pairs.iter().map(|(a, b)| format!("{}>{}", name(a), name(b))),
            );
        }
        fn positions(&self, requests: &[PositionRequest]) {
            self.log(
                "positions",
                requests.iter().map(|r| {
                    format!("{}{}", name(&r.path), if r.position.is_some() { "+" } else { "-" })
                }),
            );
        }
    }

    fn queue() -> (ChangeQueue, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (ChangeQueue::new(recorder.clone()), recorder)
    }

    #[test]
    fn test_additions_absorb_positions() {
        let (queue, recorder) = queue();
        queue.added("a");
        queue.position_set("a", Position::new(1, 2, 0));
        queue.added("b");
        queue.removed("c");
        queue.consume(true);

        assert_eq!(
            recorder.take(),
            vec!["added[a,b]", "positions[a+]", "removed[c]"]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flush_order_within_batch() {
        let (queue, recorder) = queue();
        queue.moved("x", "y");
        queue.position_remove("y");
        queue.consume(true);

        assert_eq!(recorder.take(), vec!["moved[x>y]", "positions[y-]"]);
    }

    #[test]
    fn test_changes_only_absorb_changes() {
        let (queue, recorder) = queue();
        queue.changed("a");
        queue.changed("b");
        queue.added("c");
        queue.changed("d");
        queue.consume(true);

        assert_eq!(
            recorder.take(),
            vec!["changed[a,b]", "added[c]", "changed[d]"]
        );
    }

    #[test]
    fn test_removals_batch() {
        let (queue, recorder) = queue();
        for i in 0..3 {
            queue.removed(format!("r{i}"));
        }
        queue.moved("m", "n");
        queue.consume(true);

        assert_eq!(recorder.take(), vec!["removed[r0,r1,r2]", "moved[m>n]"]);
    }

    #[test]
    fn test_partial_consume_chunks() {
        let (queue, recorder) = queue();
        for i in 0..45 {
            queue.added(format!("f{i}"));
        }
        queue.consume(false);

        let batches = recorder.take();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].matches(',').count(), 19);
        assert_eq!(batches[1].matches(',').count(), 19);
        assert_eq!(batches[2].matches(',').count(), 4);

        for i in 0..45 {
            queue.added(format!("f{i}"));
        }
        queue.consume(true);
        assert_eq!(recorder.take().len(), 1);
    }
}
