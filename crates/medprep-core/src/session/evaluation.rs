//! One-shot progress evaluation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::completion::CompletionService;
use crate::error::ServiceError;
use crate::lesson::Lesson;
use crate::parser::clean_text;
use crate::prompts::evaluation_prompt;

/// Written feedback on a learner's progress in one lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvaluation {
    /// Lesson that was evaluated.
    pub lesson_id: String,
    /// Cleaned feedback text.
    pub text: String,
    /// When the feedback was produced.
    pub generated_at: DateTime<Utc>,
}

/// Asks the completion service to assess progress on `lesson`.
pub async fn evaluate_progress(
    service: &dyn CompletionService,
    lesson: &Lesson,
) -> Result<ProgressEvaluation, ServiceError> {
    let reply = service.complete(&evaluation_prompt(lesson)).await?;
    let text = clean_text(&reply);
    if text.is_empty() {
        return Err(ServiceError::EmptyResponse);
    }

    info!(lesson = %lesson.id, progress = lesson.progress, "Progress evaluated");
    Ok(ProgressEvaluation {
        lesson_id: lesson.id.clone(),
        text,
        generated_at: Utc::now(),
    })
}
