//! MedPrep Report Generation
//!
//! Types and generators for study-progress reports. A [`ProgressReport`] is
//! built from per-lesson entries; the summary, the per-theme breakdown and
//! the study recommendations are derived from them. Reports serialize to
//! JSON for programmatic access or render to Markdown for reading.
//!
//! # Example
//!
//! ```rust
//! use medprep_report::{LessonEntry, MarkdownGenerator, ProgressReport};
//!
//! let report = ProgressReport::builder()
//!     .title("Révisions ECN")
//!     .lesson(LessonEntry::new("lesson-1", "Lesson 1", "Cardiologie").with_progress(80))
//!     .lesson(LessonEntry::new("lesson-2", "Lesson 2", "Pneumologie"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(report.summary.mastered, 1);
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("# MedPrep Progress Report"));
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Progress at or above which a lesson counts as mastered.
///
/// Kept in step with the lesson store's threshold so that reports and the
/// live statistics agree.
pub const MASTERY_THRESHOLD: u8 = 70;

/// Most lessons listed under a single recommendation category.
const MAX_PER_CATEGORY: usize = 3;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Mastery Level
// ============================================================================

/// Where a lesson stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasteryLevel {
    /// At or above the mastery threshold.
    Mastered,
    /// Started but below the threshold.
    InProgress,
    /// No progress yet.
    NotStarted,
}

impl MasteryLevel {
    /// Level for a progress percentage.
    #[must_use]
    pub const fn from_progress(progress: u8) -> Self {
        if progress >= MASTERY_THRESHOLD {
            Self::Mastered
        } else if progress > 0 {
            Self::InProgress
        } else {
            Self::NotStarted
        }
    }

    /// Section heading used in reports.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Mastered => "Mastered",
            Self::InProgress => "In Progress",
            Self::NotStarted => "Not Started",
        }
    }
}

impl std::fmt::Display for MasteryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// ============================================================================
// Lesson Entry
// ============================================================================

/// One lesson as it appears in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonEntry {
    /// Lesson id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Medical specialty.
    pub theme: String,
    /// Progress percentage, 0 to 100.
    pub progress: u8,
    /// Completed quizzes.
    pub quizzes_taken: u32,
    /// When the last quiz was completed.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Whether the lesson has a PDF or inline text attached.
    pub has_document: bool,
}

impl LessonEntry {
    /// Creates an untouched lesson entry.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, theme: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            theme: theme.into(),
            progress: 0,
            quizzes_taken: 0,
            last_attempt: None,
            has_document: false,
        }
    }

    /// Sets the progress, clamped to 100.
    #[must_use]
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress.min(100);
        self
    }

    /// Records quiz activity.
    #[must_use]
    pub const fn with_quizzes(mut self, taken: u32, last_attempt: Option<DateTime<Utc>>) -> Self {
        self.quizzes_taken = taken;
        self.last_attempt = last_attempt;
        self
    }

    /// Marks whether study material is attached.
    #[must_use]
    pub const fn with_document(mut self, has_document: bool) -> Self {
        self.has_document = has_document;
        self
    }

    /// Mastery level of this lesson.
    #[must_use]
    pub const fn level(&self) -> MasteryLevel {
        MasteryLevel::from_progress(self.progress)
    }
}

// ============================================================================
// Progress Report
// ============================================================================

/// Complete study-progress report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Report title, usually the learner's or the catalog's name.
    pub title: String,

    /// When the report was generated.
    pub generated_at: DateTime<Utc>,

    /// Aggregate figures.
    pub summary: ReportSummary,

    /// Every lesson, in catalog order.
    pub lessons: Vec<LessonEntry>,

    /// Progress per medical specialty, sorted by theme name.
    pub themes: Vec<ThemeSummary>,

    /// What to study next, highest priority first.
    pub recommendations: Vec<Recommendation>,
}

impl ProgressReport {
    /// Creates a new report builder.
    #[must_use]
    pub fn builder() -> ReportBuilder {
        ReportBuilder::default()
    }

    /// Serializes the report to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ReportError::from)
    }

    /// Lessons at the given level, in catalog order.
    pub fn lessons_at(&self, level: MasteryLevel) -> impl Iterator<Item = &LessonEntry> {
        self.lessons.iter().filter(move |l| l.level() == level)
    }
}

// ============================================================================
// ReportBuilder
// ============================================================================

/// Builder for constructing [`ProgressReport`] instances.
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    title: Option<String>,
    generated_at: Option<DateTime<Utc>>,
    lessons: Vec<LessonEntry>,
    recommendations: Vec<Recommendation>,
}

impl ReportBuilder {
    /// Sets the report title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the generation time. Defaults to now.
    #[must_use]
    pub const fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = Some(at);
        self
    }

    /// Adds a lesson.
    #[must_use]
    pub fn lesson(mut self, lesson: LessonEntry) -> Self {
        self.lessons.push(lesson);
        self
    }

    /// Sets all lessons at once.
    #[must_use]
    pub fn lessons(mut self, lessons: Vec<LessonEntry>) -> Self {
        self.lessons = lessons;
        self
    }

    /// Adds a recommendation ahead of the derived ones.
    #[must_use]
    pub fn recommendation(mut self, rec: Recommendation) -> Self {
        self.recommendations.push(rec);
        self
    }

    /// Builds the report.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` if the title is missing or two
    /// lessons share an id.
    pub fn build(self) -> Result<ProgressReport> {
        let title = self
            .title
            .ok_or_else(|| ReportError::InvalidData("title is required".to_string()))?;

        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.lessons.iter().find(|l| !seen.insert(l.id.as_str())) {
            return Err(ReportError::InvalidData(format!(
                "duplicate lesson id '{}'",
                dup.id
            )));
        }

        let summary = ReportSummary::from_lessons(&self.lessons);
        let themes = ThemeSummary::from_lessons(&self.lessons);
        let mut recommendations = self.recommendations;
        recommendations.extend(derive_recommendations(&self.lessons, &themes));
        recommendations.sort_by_key(|r| r.priority);

        Ok(ProgressReport {
            title,
            generated_at: self.generated_at.unwrap_or_else(Utc::now),
            summary,
            lessons: self.lessons,
            themes,
            recommendations,
        })
    }
}

// ============================================================================
// ReportSummary
// ============================================================================

/// Aggregate progress across all lessons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Number of lessons.
    pub total_lessons: usize,
    /// Rounded mean progress.
    pub global_percentage: u8,
    /// Lessons at or above the mastery threshold.
    pub mastered: usize,
    /// Lessons started but not mastered.
    pub in_progress: usize,
    /// Lessons with no progress.
    pub not_started: usize,
    /// Quizzes completed across all lessons.
    pub quizzes_taken: u64,
    /// Lessons with study material attached.
    pub with_document: usize,
}

impl ReportSummary {
    /// Computes the summary of `lessons`.
    #[must_use]
    pub fn from_lessons(lessons: &[LessonEntry]) -> Self {
        let count = |level| lessons.iter().filter(|l| l.level() == level).count();
        Self {
            total_lessons: lessons.len(),
            global_percentage: mean_progress(lessons.iter().map(|l| l.progress)),
            mastered: count(MasteryLevel::Mastered),
            in_progress: count(MasteryLevel::InProgress),
            not_started: count(MasteryLevel::NotStarted),
            quizzes_taken: lessons.iter().map(|l| u64::from(l.quizzes_taken)).sum(),
            with_document: lessons.iter().filter(|l| l.has_document).count(),
        }
    }
}

/// Rounded mean of percentages; 0 when there are none.
fn mean_progress(values: impl Iterator<Item = u8>) -> u8 {
    let (sum, n) = values.fold((0u64, 0u64), |(sum, n), v| (sum + u64::from(v), n + 1));
    if n == 0 {
        return 0;
    }
    u8::try_from((sum + n / 2) / n).unwrap_or(100)
}

// ============================================================================
// ThemeSummary
// ============================================================================

/// Progress within one medical specialty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeSummary {
    /// Specialty name.
    pub theme: String,
    /// Lessons in this specialty.
    pub lessons: usize,
    /// Rounded mean progress.
    pub average_progress: u8,
    /// Lessons mastered.
    pub mastered: usize,
}

impl ThemeSummary {
    /// Groups `lessons` by theme, sorted by theme name.
    #[must_use]
    pub fn from_lessons(lessons: &[LessonEntry]) -> Vec<Self> {
        let mut by_theme: BTreeMap<&str, Vec<&LessonEntry>> = BTreeMap::new();
        for lesson in lessons {
            by_theme.entry(lesson.theme.as_str()).or_default().push(lesson);
        }

        by_theme
            .into_iter()
            .map(|(theme, group)| Self {
                theme: theme.to_string(),
                lessons: group.len(),
                average_progress: mean_progress(group.iter().map(|l| l.progress)),
                mastered: group
                    .iter()
                    .filter(|l| l.level() == MasteryLevel::Mastered)
                    .count(),
            })
            .collect()
    }
}

// ============================================================================
// Recommendation
// ============================================================================

/// A prioritized study suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Priority of this recommendation (1 = highest priority).
    pub priority: u32,

    /// Category (e.g., "review", "practice", "coverage").
    pub category: String,

    /// What to do.
    pub description: String,
}

impl Recommendation {
    /// Creates a new recommendation.
    #[must_use]
    pub fn new(priority: u32, category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            priority,
            category: category.into(),
            description: description.into(),
        }
    }
}

/// Suggestions derived from lesson state.
///
/// Started lessons furthest from mastery come first, then started lessons
/// never quizzed, then specialties nobody has touched.
fn derive_recommendations(lessons: &[LessonEntry], themes: &[ThemeSummary]) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    let mut weakest: Vec<_> = lessons
        .iter()
        .filter(|l| l.level() == MasteryLevel::InProgress)
        .collect();
    weakest.sort_by_key(|l| l.progress);
    recs.extend(weakest.iter().take(MAX_PER_CATEGORY).map(|l| {
        Recommendation::new(
            1,
            "review",
            format!("Review {} ({}%, mastery at {MASTERY_THRESHOLD}%)", l.title, l.progress),
        )
    }));

    recs.extend(
        lessons
            .iter()
            .filter(|l| l.progress > 0 && l.quizzes_taken == 0)
            .take(MAX_PER_CATEGORY)
            .map(|l| Recommendation::new(2, "practice", format!("Take a quiz on {}", l.title))),
    );

    recs.extend(
        themes
            .iter()
            .filter(|t| t.average_progress == 0)
            .take(MAX_PER_CATEGORY)
            .map(|t| {
                Recommendation::new(
                    3,
                    "coverage",
                    format!("Start studying {} ({} lessons)", t.theme, t.lessons),
                )
            }),
    );

    recs
}

// ============================================================================
// Tests
// ============================================================================
