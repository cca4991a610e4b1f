//! Job plumbing shared by every operation: the handle given to callers,
//! the event stream, prompting, skip bookkeeping and the completion record.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use haul_core::EngineConfig;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::changes::ChangeQueue;
use crate::conflict::{ConflictOutcome, ConflictPolicy, ConflictPrompt, ConflictResponse};
use crate::progress::{OperationComplete, OperationProgress, OperationType};
use crate::request::{Choice, MessagePrompt, Prompt, Reply, Request, Responder};
use crate::trash::TrashStore;
use crate::undo::UndoInfo;
use crate::OperationError;

/// Everything a running job tells its controller.
#[derive(Debug)]
pub enum JobEvent {
    /// Progress update.
    Progress(OperationProgress),
    /// The job is paused until the request is answered.
    Prompt(Request),
    /// The job finished. Always the last event, sent exactly once.
    Complete(OperationComplete),
}

/// Handle to a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    operation_type: OperationType,
    cancel: CancellationToken,
    events: mpsc::Receiver<JobEvent>,
}

impl JobHandle {
    pub(crate) fn new(
        id: u64,
        operation_type: OperationType,
        cancel: CancellationToken,
        events: mpsc::Receiver<JobEvent>,
    ) -> Self {
        Self {
            id,
            operation_type,
            cancel,
            events,
        }
    }

    /// A handle whose job already finished with `complete`.
    pub(crate) fn finished(id: u64, complete: OperationComplete) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let operation_type = complete.operation_type;
        // A fresh channel with room for one event cannot be full.
        let _ = tx.try_send(JobEvent::Complete(complete));
        Self::new(id, operation_type, CancellationToken::new(), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Ask the job to stop. Work already done stays done.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, or None once the job is gone.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Drive the job to its end, answering prompts with `responder`.
    pub async fn run_with<R: Responder + ?Sized>(mut self, responder: &mut R) -> OperationComplete {
        while let Some(event) = self.events.recv().await {
            match event {
                JobEvent::Progress(progress) => responder.progress(&progress),
                JobEvent::Prompt(request) => {
                    let reply = responder.respond(&request.prompt);
                    request.reply(reply);
                }
                JobEvent::Complete(complete) => return complete,
            }
        }
        OperationComplete::failed(
            self.operation_type,
            OperationError::new(PathBuf::new(), "job ended without reporting completion"),
        )
    }
}

/// Elapsed-time clock that can be stopped while a prompt is open.
#[derive(Debug)]
pub(crate) struct JobTimer {
    started: Instant,
    paused_at: Option<Instant>,
    paused: Duration,
}

impl JobTimer {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            paused_at: None,
            paused: Duration::ZERO,
        }
    }

    pub fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    pub fn resume(&mut self) {
        if let Some(at) = self.paused_at.take() {
            self.paused += at.elapsed();
        }
    }

    /// Running time, excluding time spent paused.
    pub fn elapsed(&self) -> Duration {
        let now = self.paused_at.unwrap_or_else(Instant::now);
        now.duration_since(self.started).saturating_sub(self.paused)
    }
}

/// How a failed step continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recovery {
    Retry,
    Skip,
    Abort,
}

/// Engine state every job gets a share of.
#[derive(Clone)]
pub(crate) struct JobContext {
    pub config: Arc<EngineConfig>,
    pub changes: ChangeQueue,
    pub trash: Arc<dyn TrashStore>,
}

/// State common to all jobs: cancellation, sticky answers, skip sets, the
/// undo entry being built and the completion record.
pub(crate) struct CommonJob {
    pub id: u64,
    pub config: Arc<EngineConfig>,
    pub changes: ChangeQueue,
    pub trash: Arc<dyn TrashStore>,
    /// Set for jobs that replay an undo entry.
    pub replay: bool,
    pub skip_all_error: bool,
    pub delete_all: bool,
    pub conflicts: ConflictPolicy,
    pub undo_info: Option<UndoInfo>,
    pub outcome: OperationComplete,
    cancel: CancellationToken,
    events: mpsc::Sender<JobEvent>,
    runtime: Handle,
    timer: JobTimer,
    last_progress: Option<Instant>,
    aborted_by_job: bool,
    skip_files: HashSet<PathBuf>,
    skip_readdir_error: HashSet<PathBuf>,
}

impl CommonJob {
    pub fn new(
        id: u64,
        operation_type: OperationType,
        context: JobContext,
        cancel: CancellationToken,
        events: mpsc::Sender<JobEvent>,
        runtime: Handle,
        replay: bool,
    ) -> Self {
        Self {
            id,
            config: context.config,
            changes: context.changes,
            trash: context.trash,
            replay,
            skip_all_error: false,
            delete_all: false,
            conflicts: ConflictPolicy::default(),
            undo_info: None,
            outcome: OperationComplete::new(operation_type),
            cancel,
            events,
            runtime,
            timer: JobTimer::new(),
            last_progress: None,
            aborted_by_job: false,
            skip_files: HashSet::new(),
            skip_readdir_error: HashSet::new(),
        }
    }

    pub fn operation_type(&self) -> OperationType {
        self.outcome.operation_type
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the job. The undo entry built so far is dropped.
    pub fn abort(&mut self) {
        if !self.is_aborted() {
            tracing::info!(target: "haul::job", id = self.id, "job aborted");
            self.aborted_by_job = true;
        }
        self.undo_info = None;
        self.cancel.cancel();
    }

    /// Stop the job because the user said so.
    pub fn cancel_by_user(&mut self) {
        if !self.is_aborted() {
            self.outcome.user_cancel = true;
        }
        self.abort();
    }

    pub fn elapsed(&self) -> Duration {
        self.timer.elapsed()
    }

    /// Start timing again, once counting is over and the real work begins.
    pub fn restart_timer(&mut self) {
        self.timer = JobTimer::new();
    }

    /// Whether enough time passed since the last progress report.
    pub fn progress_due(&mut self) -> bool {
        let now = Instant::now();
        let interval = Duration::from_millis(self.config.progress_interval_ms);
        match self.last_progress {
            Some(last) if now.duration_since(last) < interval => false,
            _ => {
                self.last_progress = Some(now);
                true
            }
        }
    }

    /// Send a progress update; dropped when the controller lags behind.
    pub fn send_progress(&self, progress: OperationProgress) {
        let _ = self.events.try_send(JobEvent::Progress(progress));
    }

    fn round_trip(&mut self, prompt: Prompt) -> Option<Reply> {
        self.timer.pause();
        let (request, rx) = Request::new(prompt);
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let reply = self.runtime.block_on(async move {
            tokio::select! {
                reply = async {
                    events.send(JobEvent::Prompt(request)).await.ok()?;
                    rx.await.ok()
                } => reply,
                _ = cancel.cancelled() => None,
            }
        });
        self.timer.resume();
        reply
    }

    /// Ask the controller to pick one of the prompt's choices. A job that
    /// is already aborted, a dropped request or an answer that was not
    /// offered all count as Cancel.
    pub fn ask(&mut self, prompt: MessagePrompt) -> Choice {
        if self.is_aborted() {
            return Choice::Cancel;
        }
        tracing::debug!(target: "haul::job", id = self.id, primary = %prompt.primary, "prompting");
        let offered = prompt.choices.clone();
        match self.round_trip(Prompt::Message(prompt)) {
            Some(Reply::Choice(choice)) if offered.contains(&choice) => choice,
            _ => Choice::Cancel,
        }
    }

    /// Ask about a failed step offering some of Cancel, Skip All, Skip,
    /// Skip files and Retry. Cancel aborts the job; Skip All is remembered.
    pub fn recover(&mut self, prompt: MessagePrompt) -> Recovery {
        if self.skip_all_error && prompt.choices.contains(&Choice::SkipAll) {
            return Recovery::Skip;
        }
        match self.ask(prompt) {
            Choice::Retry => Recovery::Retry,
            Choice::SkipAll => {
                self.skip_all_error = true;
                Recovery::Skip
            }
            Choice::Skip | Choice::SkipFiles => Recovery::Skip,
            _ => {
                self.cancel_by_user();
                Recovery::Abort
            }
        }
    }

    /// Report a failed item, offering Cancel, Skip and, when more than one
    /// file is left, Skip All. The failure is recorded unless the job was
    /// cancelled; returns false in that case.
    pub fn item_failed(
        &mut self,
        path: &Path,
        primary: impl Into<String>,
        secondary: impl Into<String>,
        details: Option<String>,
        files_left: usize,
    ) -> bool {
        let secondary = secondary.into();
        let message = details.clone().unwrap_or_else(|| secondary.clone());
        if self.skip_all_error {
            self.record_error(path, message);
            return true;
        }
        let mut prompt = MessagePrompt::warning(
            primary,
            secondary,
            &[Choice::Cancel, Choice::SkipAll, Choice::Skip],
        )
        .skip_all_if(files_left);
        if let Some(details) = details {
            prompt = prompt.with_details(details);
        }
        match self.recover(prompt) {
            Recovery::Abort => false,
            Recovery::Retry | Recovery::Skip => {
                self.record_error(path, message);
                true
            }
        }
    }

    /// Ask how to handle an occupied destination. A dropped request, or a
    /// rename without a name, counts as Cancel.
    pub fn resolve_conflict(&mut self, prompt: ConflictPrompt) -> ConflictResponse {
        if self.is_aborted() {
            return ConflictResponse::cancel();
        }
        let kind = prompt.kind;
        let response = match self.round_trip(Prompt::Conflict(prompt)) {
            Some(Reply::Conflict(response)) => response,
            _ => ConflictResponse::cancel(),
        };
        let valid = match response.outcome {
            ConflictOutcome::Rename => response
                .new_name
                .as_deref()
                .is_some_and(|name| !name.is_empty()),
            _ => true,
        };
        if !valid {
            return ConflictResponse::cancel();
        }
        self.conflicts.remember(kind, &response);
        response
    }

    pub fn skip_file(&mut self, path: &Path) {
        self.skip_files.insert(path.to_path_buf());
    }

    pub fn should_skip_file(&self, path: &Path) -> bool {
        self.skip_files.contains(path)
    }

    pub fn skip_readdir_error(&mut self, path: &Path) {
        self.skip_readdir_error.insert(path.to_path_buf());
    }

    pub fn should_skip_readdir_error(&self, path: &Path) -> bool {
        self.skip_readdir_error.contains(path)
    }

    /// Note a path left alone by choice.
    pub fn record_skip(&mut self, path: &Path) {
        tracing::debug!(target: "haul::job", id = self.id, path = %path.display(), "skipped");
        self.outcome.skipped.push(path.to_path_buf());
    }

    /// Note a path that could not be handled.
    pub fn record_error(&mut self, path: &Path, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target: "haul::job", id = self.id, path = %path.display(), %message, "operation failed");
        self.outcome
            .errors
            .push(OperationError::new(path.to_path_buf(), message));
    }

    /// Note a top-level destination the job created.
    pub fn add_debuting(&mut self, path: &Path) {
        if !self.outcome.debuting.iter().any(|p| p == path) {
            self.outcome.debuting.push(path.to_path_buf());
        }
    }

    /// Close the job, yielding its completion record and undo entry.
    pub fn finish(mut self) -> (OperationComplete, Option<UndoInfo>) {
        if self.is_aborted() {
            self.outcome.success = false;
            if !self.aborted_by_job {
                // Cancelled through the handle.
                self.outcome.user_cancel = true;
            }
            self.undo_info = None;
        }
        let undo = self.undo_info.take().filter(|info| !info.is_empty());
        (self.outcome, undo)
    }
}

/// A job wired to a directory trash under `trash_root`, for unit tests that
/// never prompt.
#[cfg(test)]
pub(crate) fn test_job(
    runtime: &tokio::runtime::Runtime,
    operation_type: OperationType,
    trash_root: &Path,
) -> (CommonJob, mpsc::Receiver<JobEvent>) {
    let (tx, rx) = mpsc::channel(1024);
    let context = JobContext {
        config: Arc::new(EngineConfig::default()),
        changes: ChangeQueue::new(Arc::new(crate::changes::LogSink)),
        trash: Arc::new(crate::trash::DirectoryTrash::new(trash_root)),
    };
    let job = CommonJob::new(
        1,
        operation_type,
        context,
        CancellationToken::new(),
        tx,
        runtime.handle().clone(),
        false,
    );
    (job, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_excludes_pauses() {
        let mut timer = JobTimer::new();
        timer.pause();
        let frozen = timer.elapsed();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(timer.elapsed(), frozen);
        timer.resume();
        assert!(timer.elapsed() < frozen + Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_finished_handle_yields_completion() {
        let mut complete = OperationComplete::new(OperationType::Copy);
        complete.success = false;
        let handle = JobHandle::finished(7, complete);
        assert_eq!(handle.id(), 7);

        let mut never = |_: &Prompt| Reply::Choice(Choice::Cancel);
        let complete = handle.run_with(&mut never).await;
        assert!(!complete.success);
        assert_eq!(complete.operation_type, OperationType::Copy);
    }

    #[tokio::test]
    async fn test_closed_channel_synthesizes_failure() {
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let handle = JobHandle::new(1, OperationType::Move, CancellationToken::new(), rx);
        let mut never = |_: &Prompt| Reply::Choice(Choice::Cancel);
        let complete = handle.run_with(&mut never).await;
        assert!(!complete.success);
        assert_eq!(complete.errors.len(), 1);
    }
}
