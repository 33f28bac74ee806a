//! Interactive study sessions.
//!
//! Each controller alternates between waiting for the learner and waiting for
//! the completion service. The shared [`ExchangeGate`] enforces one request in
//! flight per session and tags each request with a generation so that a reply
//! arriving after the session was reset or replaced is dropped.
//!
//! Controllers expose two-phase methods (`begin_*` returns the prompt and a
//! [`Ticket`], `complete_*` applies the reply) so callers never need to hold a
//! session across the service call, plus one-call async helpers for callers
//! that can.

pub mod case;
pub mod evaluation;
pub mod quiz;
pub mod tutor;

pub use case::MedicalCase;
pub use evaluation::{evaluate_progress, ProgressEvaluation};
pub use quiz::{AnswerFeedback, QuizProgress, QuizRunner, QuizSettings, QuizStep, QuizSummary};
pub use tutor::TutorChat;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Generations are process-wide, so a ticket from a discarded session never
/// matches the session that replaced it.
static GENERATIONS: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_generation() -> u64 {
    GENERATIONS.fetch_add(1, Ordering::Relaxed) + 1
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The learner.
    Asker,
    /// The tutor or the simulated patient.
    Responder,
    /// A failure notice shown in place of a reply.
    SystemError,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asker => write!(f, "asker"),
            Self::Responder => write!(f, "responder"),
            Self::SystemError => write!(f, "system_error"),
        }
    }
}

/// One entry of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Who said it.
    pub role: Role,
    /// What was said.
    pub text: String,
}

impl ChatTurn {
    /// A learner turn.
    #[must_use]
    pub fn asker(text: impl Into<String>) -> Self {
        Self {
            role: Role::Asker,
            text: text.into(),
        }
    }

    /// A reply turn.
    #[must_use]
    pub fn responder(text: impl Into<String>) -> Self {
        Self {
            role: Role::Responder,
            text: text.into(),
        }
    }

    /// A failure notice.
    #[must_use]
    pub fn system_error(text: impl Into<String>) -> Self {
        Self {
            role: Role::SystemError,
            text: text.into(),
        }
    }
}

/// State of the request/response cycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    /// Waiting for the learner.
    #[default]
    Idle,
    /// A request is in flight.
    AwaitingResponse,
    /// The last request failed.
    Error,
}

impl std::fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingResponse => write!(f, "awaiting_response"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Proof that a request was started, tagged with its generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Ticket {
    generation: u64,
}

impl Ticket {
    /// Generation the request belongs to.
    #[must_use]
    pub const fn generation(self) -> u64 {
        self.generation
    }
}

/// A started request: what to send and the ticket to complete it with.
#[derive(Debug, Clone)]
#[must_use]
pub struct PendingExchange {
    /// Ticket identifying the request.
    pub ticket: Ticket,
    /// Prompt for the completion service.
    pub prompt: String,
}

/// One-request-at-a-time gate with generation tagging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeGate {
    state: ExchangeState,
    generation: u64,
    last_error: Option<String>,
}

impl ExchangeGate {
    /// Creates an idle gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ExchangeState {
        self.state
    }

    /// Message of the last failure, cleared by the next success.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Current generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true while a request is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state == ExchangeState::AwaitingResponse
    }

    /// Starts a request.
    pub fn begin(&mut self) -> Result<Ticket, SessionError> {
        if self.is_busy() {
            return Err(SessionError::Busy);
        }
        self.generation = next_generation();
        self.state = ExchangeState::AwaitingResponse;
        Ok(Ticket {
            generation: self.generation,
        })
    }

    /// Returns true if `ticket` belongs to the request in flight.
    #[must_use]
    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.is_busy() && ticket.generation == self.generation
    }

    /// Rejects a stale ticket.
    pub fn check(&self, ticket: Ticket) -> Result<(), SessionError> {
        if self.is_current(ticket) {
            Ok(())
        } else {
            Err(SessionError::Stale)
        }
    }

    /// Marks the request as answered.
    pub fn finish(&mut self, ticket: Ticket) -> Result<(), SessionError> {
        self.check(ticket)?;
        self.state = ExchangeState::Idle;
        self.last_error = None;
        Ok(())
    }

    /// Marks the request as failed.
    pub fn fail(&mut self, ticket: Ticket, message: impl Into<String>) -> Result<(), SessionError> {
        self.check(ticket)?;
        self.state = ExchangeState::Error;
        self.last_error = Some(message.into());
        Ok(())
    }

    /// Drops whatever is in flight. Its reply will be discarded.
    pub fn invalidate(&mut self) {
        self.generation = next_generation();
        self.state = ExchangeState::Idle;
    }
}
