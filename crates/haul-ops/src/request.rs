//! Questions a running job asks its controller, and the answers it
//! accepts.

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::oneshot;

use crate::conflict::{ConflictPrompt, ConflictResponse};

/// One button of a message prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum Choice {
    Cancel,
    Skip,
    #[strum(to_string = "Skip All")]
    SkipAll,
    #[strum(to_string = "Skip files")]
    SkipFiles,
    Retry,
    Delete,
    #[strum(to_string = "Delete All")]
    DeleteAll,
    #[strum(to_string = "Copy Anyway")]
    CopyAnyway,
    #[strum(to_string = "Empty Trash")]
    EmptyTrash,
}

/// How serious a message prompt is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum MessageKind {
    Error,
    Warning,
    Question,
}

/// A message with a fixed set of choices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePrompt {
    pub kind: MessageKind,
    pub primary: String,
    pub secondary: String,
    pub details: Option<String>,
    pub choices: Vec<Choice>,
}

impl MessagePrompt {
    pub fn new(
        kind: MessageKind,
        primary: impl Into<String>,
        secondary: impl Into<String>,
        choices: &[Choice],
    ) -> Self {
        Self {
            kind,
            primary: primary.into(),
            secondary: secondary.into(),
            details: None,
            choices: choices.to_vec(),
        }
    }

    pub fn error(primary: impl Into<String>, secondary: impl Into<String>, choices: &[Choice]) -> Self {
        Self::new(MessageKind::Error, primary, secondary, choices)
    }

    pub fn warning(
        primary: impl Into<String>,
        secondary: impl Into<String>,
        choices: &[Choice],
    ) -> Self {
        Self::new(MessageKind::Warning, primary, secondary, choices)
    }

    pub fn question(
        primary: impl Into<String>,
        secondary: impl Into<String>,
        choices: &[Choice],
    ) -> Self {
        Self::new(MessageKind::Question, primary, secondary, choices)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Drop "Skip All" from the choices unless more than one item is left.
    pub fn skip_all_if(mut self, files_left: usize) -> Self {
        if files_left <= 1 {
            self.choices.retain(|c| *c != Choice::SkipAll);
        }
        self
    }
}

/// Anything a job can ask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Prompt {
    Message(MessagePrompt),
    Conflict(ConflictPrompt),
}

/// An answer to a [`Prompt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Choice(Choice),
    Conflict(ConflictResponse),
}

/// A prompt awaiting its answer. Dropping it unanswered counts as Cancel.
#[derive(Debug)]
pub struct Request {
    pub prompt: Prompt,
    reply: oneshot::Sender<Reply>,
}

impl Request {
    pub(crate) fn new(prompt: Prompt) -> (Self, oneshot::Receiver<Reply>) {
        let (reply, rx) = oneshot::channel();
        (Self { prompt, reply }, rx)
    }

    /// Answer the prompt.
    pub fn reply(self, reply: Reply) {
        // The worker may have been torn down already.
        let _ = self.reply.send(reply);
    }

    pub fn choose(self, choice: Choice) {
        self.reply(Reply::Choice(choice));
    }
}

/// Something that answers prompts and observes progress on behalf of a
/// job's controller.
pub trait Responder {
    fn respond(&mut self, prompt: &Prompt) -> Reply;

    fn progress(&mut self, _progress: &crate::OperationProgress) {}
}

impl<F> Responder for F
where
    F: FnMut(&Prompt) -> Reply,
{
    fn respond(&mut self, prompt: &Prompt) -> Reply {
        self(prompt)
    }
}

/// Answers every prompt the same way without asking anyone.
#[derive(Debug, Clone)]
pub struct AutoResponder {
    /// Preferred answers to message prompts, in order; the first one the
    /// prompt offers wins, otherwise its first choice is taken.
    pub choices: Vec<Choice>,
    pub conflict: ConflictResponse,
}

impl AutoResponder {
    /// Skip everything that fails and every conflict.
    pub fn skip_all() -> Self {
        Self {
            choices: vec![
                Choice::SkipAll,
                Choice::SkipFiles,
                Choice::Skip,
                Choice::CopyAnyway,
                Choice::Delete,
                Choice::EmptyTrash,
            ],
            conflict: ConflictResponse::skip(true),
        }
    }

    /// Like [`AutoResponder::skip_all`], but merge or replace on conflicts.
    pub fn replace_all() -> Self {
        Self {
            conflict: ConflictResponse::replace(true),
            ..Self::skip_all()
        }
    }
}

impl Responder for AutoResponder {
    fn respond(&mut self, prompt: &Prompt) -> Reply {
        match prompt {
            Prompt::Conflict(_) => Reply::Conflict(self.conflict.clone()),
            Prompt::Message(message) => {
                let choice = self
                    .choices
                    .iter()
                    .find(|c| message.choices.contains(c))
                    .or(message.choices.first())
                    .copied()
                    .unwrap_or(Choice::Cancel);
                Reply::Choice(choice)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_labels() {
        assert_eq!(Choice::SkipAll.to_string(), "Skip All");
        assert_eq!(Choice::CopyAnyway.to_string(), "Copy Anyway");
        assert_eq!(Choice::Retry.to_string(), "Retry");
    }

    #[test]
    fn test_skip_all_hidden_for_last_file() {
        let prompt = MessagePrompt::error("a", "b", &[Choice::Cancel, Choice::SkipAll, Choice::Skip]);
        assert_eq!(prompt.clone().skip_all_if(2).choices.len(), 3);
        assert_eq!(
            prompt.skip_all_if(1).choices,
            vec![Choice::Cancel, Choice::Skip]
        );
    }

    #[test]
    fn test_auto_responder_prefers_first_offered() {
        let mut auto = AutoResponder::skip_all();
        let prompt = Prompt::Message(MessagePrompt::error(
            "x",
            "y",
            &[Choice::Cancel, Choice::Skip, Choice::Retry],
        ));
        assert_eq!(auto.respond(&prompt), Reply::Choice(Choice::Skip));

        let prompt = Prompt::Message(MessagePrompt::error("x", "y", &[Choice::Cancel]));
        assert_eq!(auto.respond(&prompt), Reply::Choice(Choice::Cancel));
    }

    #[test]
    fn test_dropped_request_is_observable() {
        let (request, mut rx) = Request::new(Prompt::Message(MessagePrompt::question(
            "q",
            "",
            &[Choice::Cancel],
        )));
        drop(request);
        assert!(rx.try_recv().is_err());
    }
}
