//! Simulated patient cases.
//!
//! A case is presented once, then the learner interviews the patient and
//! finally submits a diagnosis. The diagnosis is evaluated by a separate call
//! and, once a verdict is in, the case is closed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{ChatTurn, ExchangeGate, PendingExchange, Ticket};
use crate::completion::CompletionService;
use crate::error::{ExchangeError, ServiceError, SessionError};
use crate::parser::{clean_text, parse_diagnosis, DiagnosisVerdict};
use crate::prompts::{case_prompt, diagnosis_prompt, patient_prompt, PATIENT_APOLOGY};

/// A patient interview ending in a diagnosis.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalCase {
    lesson_id: String,
    lesson_title: String,
    narrative: Option<String>,
    turns: Vec<ChatTurn>,
    diagnosis: Option<String>,
    verdict: Option<DiagnosisVerdict>,
    started_at: DateTime<Utc>,
    #[serde(flatten)]
    gate: ExchangeGate,
}

impl MedicalCase {
    /// Creates a case that has not been presented yet.
    #[must_use]
    pub fn new(lesson_id: impl Into<String>, lesson_title: impl Into<String>) -> Self {
        Self {
            lesson_id: lesson_id.into(),
            lesson_title: lesson_title.into(),
            narrative: None,
            turns: Vec::new(),
            diagnosis: None,
            verdict: None,
            started_at: Utc::now(),
            gate: ExchangeGate::new(),
        }
    }

    /// Lesson this case belongs to.
    #[must_use]
    pub fn lesson_id(&self) -> &str {
        &self.lesson_id
    }

    /// Case presentation, once generated.
    #[must_use]
    pub fn narrative(&self) -> Option<&str> {
        self.narrative.as_deref()
    }

    /// Interview so far.
    #[must_use]
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Verdict on the submitted diagnosis.
    #[must_use]
    pub const fn verdict(&self) -> Option<&DiagnosisVerdict> {
        self.verdict.as_ref()
    }

    /// Request state.
    #[must_use]
    pub const fn gate(&self) -> &ExchangeGate {
        &self.gate
    }

    /// Returns true once a verdict has been given.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.verdict.is_some()
    }

    fn ensure_open(&self) -> Result<&str, SessionError> {
        if self.is_finished() {
            return Err(SessionError::Finished);
        }
        self.narrative.as_deref().ok_or(SessionError::NotStarted)
    }

    /// Requests the case presentation.
    pub fn begin_start(&mut self) -> Result<PendingExchange, SessionError> {
        if self.narrative.is_some() {
            return Err(SessionError::Finished);
        }
        let ticket = self.gate.begin()?;
        Ok(PendingExchange {
            ticket,
            prompt: case_prompt(&self.lesson_title),
        })
    }

    /// Applies the presentation reply.
    pub fn complete_start(
        &mut self,
        ticket: Ticket,
        result: Result<String, ServiceError>,
    ) -> Result<&str, SessionError> {
        self.gate.check(ticket)?;
        match result {
            Ok(reply) => {
                self.gate.finish(ticket)?;
                info!(lesson = %self.lesson_id, "Medical case presented");
                Ok(self.narrative.insert(clean_text(&reply)).as_str())
            }
            Err(err) => {
                warn!(lesson = %self.lesson_id, error = %err, "Case presentation failed");
                self.gate.fail(ticket, err.to_string())?;
                Err(ExchangeError::Service(err).into())
            }
        }
    }

    /// Appends a clinician question and returns the patient prompt.
    pub fn begin_question(&mut self, question: &str) -> Result<PendingExchange, SessionError> {
        let narrative = self.ensure_open()?;
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyInput);
        }

        let prompt = patient_prompt(&self.lesson_title, narrative, &self.turns, question);
        let ticket = self.gate.begin()?;
        self.turns.push(ChatTurn::asker(question));
        debug!(lesson = %self.lesson_id, turns = self.turns.len(), "Patient question sent");
        Ok(PendingExchange { ticket, prompt })
    }

    /// Applies the patient's reply.
    ///
    /// A failure appends a notice to the interview and leaves the case open.
    pub fn complete_question(
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
                warn!(lesson = %self.lesson_id, error = %err, "Patient reply failed");
                self.gate.fail(ticket, err.to_string())?;
                self.turns.push(ChatTurn::system_error(PATIENT_APOLOGY));
                Err(ExchangeError::Service(err).into())
            }
        }
    }

    /// Submits a diagnosis and returns the evaluation prompt.
    pub fn begin_diagnosis(&mut self, diagnosis: &str) -> Result<PendingExchange, SessionError> {
        let narrative = self.ensure_open()?;
        let diagnosis = diagnosis.trim();
        if diagnosis.is_empty() {
            return Err(SessionError::EmptyInput);
        }

        let prompt = diagnosis_prompt(&self.lesson_title, narrative, &self.turns, diagnosis);
        let ticket = self.gate.begin()?;
        self.diagnosis = Some(diagnosis.to_string());
        Ok(PendingExchange { ticket, prompt })
    }

    /// Applies the evaluation reply.
    ///
    /// A parsed verdict closes the case. A service or parse failure leaves it
    /// open so the diagnosis can be submitted again.
    pub fn complete_diagnosis(
        &mut self,
        ticket: Ticket,
        result: Result<String, ServiceError>,
    ) -> Result<&DiagnosisVerdict, SessionError> {
        self.gate.check(ticket)?;

        let parsed = result
            .map_err(ExchangeError::from)
            .and_then(|reply| parse_diagnosis(&reply).map_err(ExchangeError::from));

        match parsed {
            Ok(verdict) => {
                self.gate.finish(ticket)?;
                info!(lesson = %self.lesson_id, correct = verdict.is_correct, "Diagnosis evaluated");
                Ok(self.verdict.insert(verdict))
            }
            Err(err) => {
                warn!(lesson = %self.lesson_id, error = %err, "Diagnosis evaluation failed");
                self.gate.fail(ticket, err.to_string())?;
                Err(err.into())
            }
        }
    }

    /// Generates the case presentation.
    pub async fn start(&mut self, service: &dyn CompletionService) -> Result<String, SessionError> {
        let pending = self.begin_start()?;
        let result = service.complete(&pending.prompt).await;
        self.complete_start(pending.ticket, result).map(str::to_string)
    }

    /// Asks the patient a question.
    pub async fn ask(
        &mut self,
        service: &dyn CompletionService,
        question: &str,
    ) -> Result<ChatTurn, SessionError> {
        let pending = self.begin_question(question)?;
        let result = service.complete(&pending.prompt).await;
        self.complete_question(pending.ticket, result)
    }

    /// Submits a diagnosis for evaluation.
    pub async fn submit_diagnosis(
        &mut self,
        service: &dyn CompletionService,
        diagnosis: &str,
    ) -> Result<DiagnosisVerdict, SessionError> {
        let pending = self.begin_diagnosis(diagnosis)?;
        let result = service.complete(&pending.prompt).await;
        self.complete_diagnosis(pending.ticket, result).cloned()
    }

    /// Drops any reply still in flight.
    pub fn cancel(&mut self) {
        self.gate.invalidate();
    }
}
