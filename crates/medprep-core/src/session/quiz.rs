//! Quiz sessions.
//!
//! A quiz asks for `count` generated questions, one at a time. The question
//! index only moves forward when a question was generated and parsed
//! successfully; a failure keeps the previous question on screen and can be
//! retried. Asking for the next question after the last one ends the quiz.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ExchangeGate, ExchangeState, PendingExchange, Ticket};
use crate::completion::CompletionService;
use crate::config::QuizConfig;
use crate::error::{ExchangeError, ServiceError, SessionError};
use crate::parser::{parse_quiz_item, QuizItem};
use crate::prompts::quiz_prompt;

/// Parameters chosen when starting a quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSettings {
    /// Number of questions.
    pub count: u32,
    /// Difficulty percentage, 0 to 100.
    pub difficulty: u8,
}

impl QuizSettings {
    /// Settings from the configured defaults.
    #[must_use]
    pub const fn from_defaults(config: &QuizConfig) -> Self {
        Self {
            count: config.default_count,
            difficulty: config.default_difficulty,
        }
    }

    /// Checks the settings against the configured limits.
    pub fn validate(&self, limits: &QuizConfig) -> Result<(), SessionError> {
        if !(limits.min_count..=limits.max_count).contains(&self.count) {
            return Err(SessionError::InvalidQuizConfig {
                message: format!(
                    "question count must be between {} and {} (got {})",
                    limits.min_count, limits.max_count, self.count
                ),
            });
        }
        if self.difficulty > 100 {
            return Err(SessionError::InvalidQuizConfig {
                message: format!("difficulty must be between 0 and 100 (got {})", self.difficulty),
            });
        }
        Ok(())
    }
}

/// The learner's answer to one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedAnswer {
    /// 1-based question number.
    pub index: u32,
    /// Chosen letter.
    pub choice: char,
    /// Whether it was right.
    pub correct: bool,
}

/// Result of answering the current question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerFeedback {
    /// Chosen letter.
    pub choice: char,
    /// Whether it was right.
    pub correct: bool,
    /// Letter of the right answer.
    pub correct_choice: char,
    /// Explanation of the right answer.
    pub explanation: String,
}

/// Final tally of a finished quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSummary {
    /// Lesson the quiz was about.
    pub lesson_id: String,
    /// Planned number of questions.
    pub total: u32,
    /// Questions answered.
    pub answered: u32,
    /// Questions answered correctly.
    pub correct: u32,
    /// Rounded percentage of correct answers over `total`.
    pub score_percent: u8,
}

/// What asking for the next question leads to.
#[derive(Debug)]
pub enum QuizStep {
    /// A question must be generated.
    Generate(PendingExchange),
    /// The quiz is over and should be cleared.
    Finished(QuizSummary),
}

/// Outcome of the one-call helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizProgress {
    /// A new question is being shown.
    Question(QuizItem),
    /// The quiz is over and should be cleared.
    Finished(QuizSummary),
}

/// A running quiz.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizRunner {
    lesson_id: String,
    lesson_title: String,
    settings: QuizSettings,
    index: u32,
    current: Option<QuizItem>,
    answers: Vec<RecordedAnswer>,
    #[serde(flatten)]
    gate: ExchangeGate,
}

impl QuizRunner {
    /// Creates a quiz after validating `settings` against `limits`.
    ///
    /// No question is requested yet; call [`QuizRunner::begin_next`] or
    /// [`QuizRunner::advance`] for the first one.
    pub fn new(
        lesson_id: impl Into<String>,
        lesson_title: impl Into<String>,
        settings: QuizSettings,
        limits: &QuizConfig,
    ) -> Result<Self, SessionError> {
        settings.validate(limits)?;
        Ok(Self {
            lesson_id: lesson_id.into(),
            lesson_title: lesson_title.into(),
            settings,
            index: 0,
            current: None,
            answers: Vec::new(),
            gate: ExchangeGate::new(),
        })
    }

    /// Lesson this quiz is about.
    #[must_use]
    pub fn lesson_id(&self) -> &str {
        &self.lesson_id
    }

    /// Chosen settings.
    #[must_use]
    pub const fn settings(&self) -> QuizSettings {
        self.settings
    }

    /// 1-based number of the question shown, 0 before the first one.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Question being shown.
    #[must_use]
    pub const fn current(&self) -> Option<&QuizItem> {
        self.current.as_ref()
    }

    /// Request state.
    #[must_use]
    pub const fn gate(&self) -> &ExchangeGate {
        &self.gate
    }

    /// Answers so far.
    #[must_use]
    pub fn answers(&self) -> &[RecordedAnswer] {
        &self.answers
    }

    /// Tally so far.
    #[must_use]
    pub fn summary(&self) -> QuizSummary {
        let answered = u32::try_from(self.answers.len()).unwrap_or(u32::MAX);
        let correct = u32::try_from(self.answers.iter().filter(|a| a.correct).count())
            .unwrap_or(u32::MAX);
        let total = self.settings.count.max(1);
        let score_percent =
            u8::try_from((u64::from(correct) * 100 + u64::from(total) / 2) / u64::from(total))
                .unwrap_or(100);

        QuizSummary {
            lesson_id: self.lesson_id.clone(),
            total: self.settings.count,
            answered,
            correct,
            score_percent,
        }
    }

    /// Moves on: requests the next question, or ends the quiz after the last.
    pub fn begin_next(&mut self) -> Result<QuizStep, SessionError> {
        if self.gate.is_busy() {
            return Err(SessionError::Busy);
        }

        if self.index >= self.settings.count {
            self.gate.invalidate();
            self.current = None;
            let summary = self.summary();
            info!(
                lesson = %self.lesson_id,
                correct = summary.correct,
                total = summary.total,
                "Quiz finished"
            );
            return Ok(QuizStep::Finished(summary));
        }

        self.request_next().map(QuizStep::Generate)
    }

    /// Requests the question that failed to generate last time.
    pub fn retry(&mut self) -> Result<PendingExchange, SessionError> {
        if self.gate.state() != ExchangeState::Error {
            return Err(SessionError::NothingToRetry);
        }
        self.request_next()
    }

    fn request_next(&mut self) -> Result<PendingExchange, SessionError> {
        let ticket = self.gate.begin()?;
        let prompt = quiz_prompt(
            &self.lesson_title,
            self.settings.difficulty,
            self.index + 1,
            self.settings.count,
        );
        Ok(PendingExchange { ticket, prompt })
    }

    /// Applies the service result for `ticket`.
    ///
    /// A parsed question becomes the current one and the index advances.
    /// Anything else leaves the quiz where it was.
    pub fn complete_item(
        &mut self,
        ticket: Ticket,
        result: Result<String, ServiceError>,
    ) -> Result<&QuizItem, SessionError> {
        self.gate.check(ticket)?;

        let parsed = result
            .map_err(ExchangeError::from)
            .and_then(|reply| parse_quiz_item(&reply).map_err(ExchangeError::from));

        match parsed {
            Ok(item) => {
                self.gate.finish(ticket)?;
                self.index += 1;
                Ok(self.current.insert(item))
            }
            Err(err) => {
                warn!(
                    lesson = %self.lesson_id,
                    question = self.index + 1,
                    error = %err,
                    "Quiz question generation failed"
                );
                self.gate.fail(ticket, err.to_string())?;
                Err(err.into())
            }
        }
    }

    /// Records an answer to the current question.
    pub fn answer(&mut self, choice: char) -> Result<AnswerFeedback, SessionError> {
        let item = self.current.as_ref().ok_or(SessionError::NoCurrentItem)?;
        if self.answers.iter().any(|a| a.index == self.index) {
            return Err(SessionError::AlreadyAnswered);
        }

        let chosen = item.choice(choice).ok_or_else(|| SessionError::UnknownChoice {
            choice: choice.to_string(),
        })?;
        let correct_choice = item
            .correct_choice()
            .map_or(chosen.id, |c| c.id);

        let feedback = AnswerFeedback {
            choice: chosen.id,
            correct: chosen.is_correct,
            correct_choice,
            explanation: item.explanation.clone(),
        };
        self.answers.push(RecordedAnswer {
            index: self.index,
            choice: feedback.choice,
            correct: feedback.correct,
        });
        Ok(feedback)
    }

    /// Requests the next question and waits for it.
    pub async fn advance(
        &mut self,
        service: &dyn CompletionService,
    ) -> Result<QuizProgress, SessionError> {
        match self.begin_next()? {
            QuizStep::Finished(summary) => Ok(QuizProgress::Finished(summary)),
            QuizStep::Generate(pending) => {
                let result = service.complete(&pending.prompt).await;
                self.complete_item(pending.ticket, result)
                    .map(|item| QuizProgress::Question(item.clone()))
            }
        }
    }

    /// Retries the failed question and waits for it.
    pub async fn retry_with(
        &mut self,
        service: &dyn CompletionService,
    ) -> Result<QuizItem, SessionError> {
        let pending = self.retry()?;
        let result = service.complete(&pending.prompt).await;
        self.complete_item(pending.ticket, result).cloned()
    }
}
