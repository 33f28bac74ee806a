//! Tutor chat for a lesson.

use serde::Serialize;
use tracing::{debug, warn};

use super::{ChatTurn, ExchangeGate, PendingExchange, Ticket};
use crate::completion::CompletionService;
use crate::error::{ExchangeError, ServiceError, SessionError};
use crate::parser::clean_text;
use crate::prompts::{tutor_prompt, TUTOR_APOLOGY};

/// Question-and-answer conversation with the medical tutor.
///
/// Learner turns are appended as soon as they are sent. A failed call leaves
/// the question in place and appends a failure notice; the learner can simply
/// ask again.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorChat {
    lesson_id: String,
    lesson_title: String,
    turns: Vec<ChatTurn>,
    #[serde(flatten)]
    gate: ExchangeGate,
}

impl TutorChat {
    /// Starts an empty conversation about a lesson.
    #[must_use]
    pub fn new(lesson_id: impl Into<String>, lesson_title: impl Into<String>) -> Self {
        Self {
            lesson_id: lesson_id.into(),
            lesson_title: lesson_title.into(),
            turns: Vec::new(),
            gate: ExchangeGate::new(),
        }
    }

    /// Lesson this conversation belongs to.
    #[must_use]
    pub fn lesson_id(&self) -> &str {
        &self.lesson_id
    }

    /// Conversation so far.
    #[must_use]
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Request state.
    #[must_use]
    pub const fn gate(&self) -> &ExchangeGate {
        &self.gate
    }

    /// Appends the learner's message and returns the prompt to send.
    pub fn begin_message(&mut self, text: &str) -> Result<PendingExchange, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        let ticket = self.gate.begin()?;

        let prompt = tutor_prompt(&self.lesson_title, &self.turns, text);
        self.turns.push(ChatTurn::asker(text));
        debug!(lesson = %self.lesson_id, turns = self.turns.len(), "Tutor question sent");

        Ok(PendingExchange { ticket, prompt })
    }

    /// Applies the service result for `ticket`.
    ///
    /// On success the cleaned reply is appended and returned. On failure the
    /// apology notice is appended and the failure is returned.
    pub fn complete_message(
        &mut self,
        ticket: Ticket,
        result: Result<String, ServiceError>,
    ) -> Result<ChatTurn, SessionError> {
        self.gate.check(ticket)?;

        match result {
            Ok(reply) => {
                self.gate.finish(ticket)?;
                let turn = ChatTurn::responder(clean_text(&reply));
                self.turns.push(turn.clone());
                Ok(turn)
            }
            Err(err) => {
                warn!(lesson = %self.lesson_id, error = %err, "Tutor reply failed");
                self.gate.fail(ticket, err.to_string())?;
                self.turns.push(ChatTurn::system_error(TUTOR_APOLOGY));
                Err(ExchangeError::Service(err).into())
            }
        }
    }

    /// Sends a message and waits for the reply.
    pub async fn send(
        &mut self,
        service: &dyn CompletionService,
        text: &str,
    ) -> Result<ChatTurn, SessionError> {
        let pending = self.begin_message(text)?;
        let result = service.complete(&pending.prompt).await;
        self.complete_message(pending.ticket, result)
    }

    /// Drops any reply still in flight.
    pub fn cancel(&mut self) {
        self.gate.invalidate();
    }
}
