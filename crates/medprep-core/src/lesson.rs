//! Lessons and the lesson store.
//!
//! The store is created once at startup from a fixed catalog and is the only
//! writer of lesson state. Readers get snapshots.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use medprep_document::DocumentHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CatalogConfig;
use crate::error::{MedPrepError, Result};

/// Progress at or above which a lesson counts as mastered.
pub const MASTERY_THRESHOLD: u8 = 70;

/// Specialties the built-in catalog cycles through.
const THEMES: [&str; 12] = [
    "Cardiologie",
    "Pneumologie",
    "Neurologie",
    "Gastro-entérologie",
    "Néphrologie",
    "Endocrinologie",
    "Infectiologie",
    "Hématologie",
    "Pédiatrie",
    "Gynécologie-obstétrique",
    "Psychiatrie",
    "Dermatologie",
];

/// A unit of study material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    /// Stable id, `lesson-N`.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Medical specialty.
    pub theme: String,
    /// Progress percentage, 0 to 100.
    pub progress: u8,
    /// Number of completed quizzes.
    pub quizzes_taken: u32,
    /// When the last quiz was completed.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Locator of the lesson PDF.
    pub pdf_url: Option<String>,
    /// Inline lesson text.
    pub content: Option<String>,
}

impl Lesson {
    /// Creates the `number`th lesson of the built-in catalog.
    #[must_use]
    pub fn numbered(number: u32) -> Self {
        let theme_index = usize::try_from(number.saturating_sub(1)).unwrap_or_default() % THEMES.len();
        Self {
            id: format!("lesson-{number}"),
            title: format!("Lesson {number}"),
            theme: THEMES[theme_index].to_string(),
            progress: 0,
            quizzes_taken: 0,
            last_attempt: None,
            pdf_url: None,
            content: None,
        }
    }

    /// The document to show for this lesson.
    ///
    /// Inline content wins over a PDF locator.
    #[must_use]
    pub fn document_handle(&self) -> Option<DocumentHandle> {
        self.content
            .clone()
            .map(DocumentHandle::Inline)
            .or_else(|| self.pdf_url.clone().map(DocumentHandle::Url))
    }

    /// Returns true once progress reaches the mastery threshold.
    #[must_use]
    pub const fn is_mastered(&self) -> bool {
        self.progress >= MASTERY_THRESHOLD
    }

    /// Returns true when started but not mastered.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        self.progress > 0 && self.progress < MASTERY_THRESHOLD
    }
}

/// Aggregate progress across all lessons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonStats {
    /// Number of lessons.
    pub total: usize,
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
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    id: String,
    title: String,
    #[serde(default)]
    theme: Option<String>,
    #[serde(default)]
    pdf_url: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Owner of all lesson state.
#[derive(Debug, Clone, Default)]
pub struct LessonStore {
    lessons: Vec<Lesson>,
    index: HashMap<String, usize>,
}

impl LessonStore {
    /// Creates a store holding `count` numbered lessons.
    #[must_use]
    pub fn with_default_catalog(count: u32) -> Self {
        Self::from_lessons((1..=count).map(Lesson::numbered).collect())
    }

    /// Creates a store from explicit lessons.
    ///
    /// Later lessons with a duplicate id are dropped.
    #[must_use]
    pub fn from_lessons(lessons: Vec<Lesson>) -> Self {
        let mut store = Self::default();
        for lesson in lessons {
            if store.index.contains_key(&lesson.id) {
                debug!(id = %lesson.id, "Skipping duplicate lesson id");
                continue;
            }
            store.index.insert(lesson.id.clone(), store.lessons.len());
            store.lessons.push(lesson);
        }
        store
    }

    /// Builds the store described by the catalog configuration.
    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        match &config.file {
            Some(path) => Self::load_catalog(Path::new(path)),
            None => Ok(Self::with_default_catalog(config.lesson_count)),
        }
    }

    /// Loads lessons from a JSON catalog file.
    ///
    /// The file holds an array of `{ id, title, theme?, pdfUrl?, content? }`.
    pub fn load_catalog(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MedPrepError::catalog_load(path, e.to_string()))?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&contents)
            .map_err(|e| MedPrepError::catalog_load(path, e.to_string()))?;

        if entries.is_empty() {
            return Err(MedPrepError::catalog_load(path, "catalog is empty"));
        }

        let lessons = entries
            .into_iter()
            .map(|entry| Lesson {
                id: entry.id,
                title: entry.title,
                theme: entry.theme.unwrap_or_default(),
                progress: 0,
                quizzes_taken: 0,
                last_attempt: None,
                pdf_url: entry.pdf_url,
                content: entry.content,
            })
            .collect::<Vec<_>>();
        info!(path = %path.display(), lessons = lessons.len(), "Lesson catalog loaded");
        Ok(Self::from_lessons(lessons))
    }

    /// Number of lessons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    /// Returns true if the store has no lessons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }

    /// Copy of every lesson, in catalog order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Lesson> {
        self.lessons.clone()
    }

    /// Looks up a lesson.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Lesson> {
        self.index.get(id).map(|&i| &self.lessons[i])
    }

    /// Returns true if a lesson has this id.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Lesson> {
        let i = *self.index.get(id)?;
        self.lessons.get_mut(i)
    }

    /// Sets progress, clamped to 100. Returns false for an unknown id.
    pub fn set_progress(&mut self, id: &str, progress: u8) -> bool {
        self.get_mut(id).map_or(false, |lesson| {
            lesson.progress = progress.min(100);
            true
        })
    }

    /// Zeroes progress and the quiz count. Returns false for an unknown id.
    pub fn reset_progress(&mut self, id: &str) -> bool {
        self.get_mut(id).map_or(false, |lesson| {
            lesson.progress = 0;
            lesson.quizzes_taken = 0;
            true
        })
    }

    /// Attaches a PDF locator, making it the lesson's document.
    pub fn attach_document(&mut self, id: &str, locator: impl Into<String>) -> bool {
        let locator = locator.into();
        self.get_mut(id).map_or(false, |lesson| {
            lesson.pdf_url = Some(locator);
            lesson.content = None;
            true
        })
    }

    /// Sets inline text, which takes precedence over any PDF.
    pub fn set_content(&mut self, id: &str, text: impl Into<String>) -> bool {
        let text = text.into();
        self.get_mut(id).map_or(false, |lesson| {
            lesson.content = Some(text);
            true
        })
    }

    /// Records a completed quiz.
    ///
    /// Bumps the quiz count, stamps the attempt, and raises progress to the
    /// score if the score is higher.
    pub fn record_quiz_attempt(&mut self, id: &str, score_percent: u8, at: DateTime<Utc>) -> bool {
        self.get_mut(id).map_or(false, |lesson| {
            lesson.quizzes_taken = lesson.quizzes_taken.saturating_add(1);
            lesson.last_attempt = Some(at);
            lesson.progress = lesson.progress.max(score_percent.min(100));
            true
        })
    }

    /// Aggregate progress.
    #[must_use]
    pub fn stats(&self) -> LessonStats {
        let total = self.lessons.len();
        let sum: u64 = self.lessons.iter().map(|l| u64::from(l.progress)).sum();
        let global_percentage = if total == 0 {
            0
        } else {
            let total = total as u64;
            u8::try_from((sum + total / 2) / total).unwrap_or(100)
        };

        LessonStats {
            total,
            global_percentage,
            mastered: self.lessons.iter().filter(|l| l.is_mastered()).count(),
            in_progress: self.lessons.iter().filter(|l| l.is_in_progress()).count(),
            not_started: self.lessons.iter().filter(|l| l.progress == 0).count(),
            quizzes_taken: self.lessons.iter().map(|l| u64::from(l.quizzes_taken)).sum(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_has_numbered_lessons() {
        let store = LessonStore::with_default_catalog(75);
        assert_eq!(store.len(), 75);
        let first = store.get("lesson-1").unwrap();
        assert_eq!(first.title, "Lesson 1");
        assert_eq!(first.theme, "Cardiologie");
        assert_eq!(store.get("lesson-13").unwrap().theme, "Cardiologie");
        assert!(store.get("lesson-76").is_none());
    }

    #[test]
    fn test_set_progress_clamps() {
        let mut store = LessonStore::with_default_catalog(3);
        assert!(store.set_progress("lesson-2", 150));
        assert_eq!(store.get("lesson-2").unwrap().progress, 100);
        assert!(!store.set_progress("lesson-9", 10));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut store = LessonStore::with_default_catalog(3);
        store.set_progress("lesson-1", 80);
        store.record_quiz_attempt("lesson-1", 60, Utc::now());

        assert!(store.reset_progress("lesson-1"));
        let once = store.get("lesson-1").cloned().unwrap();
        assert!(store.reset_progress("lesson-1"));
        let twice = store.get("lesson-1").cloned().unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.progress, 0);
        assert_eq!(twice.quizzes_taken, 0);
    }

    #[test]
    fn test_unknown_id_is_noop() {
        let mut store = LessonStore::with_default_catalog(2);
        let before = store.snapshot();
        assert!(!store.reset_progress("lesson-99"));
        assert!(!store.attach_document("nope", "/uploads/x.pdf"));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_content_wins_over_pdf() {
        let mut store = LessonStore::with_default_catalog(1);
        store.attach_document("lesson-1", "/uploads/lesson-1.pdf");
        store.set_content("lesson-1", "Résumé");
        assert_eq!(
            store.get("lesson-1").unwrap().document_handle(),
            Some(DocumentHandle::inline("Résumé"))
        );
    }

    #[test]
    fn test_attach_document_replaces_inline_content() {
        let mut store = LessonStore::with_default_catalog(1);
        store.set_content("lesson-1", "old notes");
        store.attach_document("lesson-1", "/uploads/lesson-1.pdf");
        assert_eq!(
            store.get("lesson-1").unwrap().document_handle(),
            Some(DocumentHandle::url("/uploads/lesson-1.pdf"))
        );
    }

    #[test]
    fn test_record_quiz_attempt_raises_progress_only() {
        let mut store = LessonStore::with_default_catalog(1);
        store.set_progress("lesson-1", 50);
        store.record_quiz_attempt("lesson-1", 30, Utc::now());
        let lesson = store.get("lesson-1").unwrap();
        assert_eq!(lesson.progress, 50);
        assert_eq!(lesson.quizzes_taken, 1);
        assert!(lesson.last_attempt.is_some());

        store.record_quiz_attempt("lesson-1", 90, Utc::now());
        assert_eq!(store.get("lesson-1").unwrap().progress, 90);
    }

    #[test]
    fn test_stats() {
        let mut store = LessonStore::with_default_catalog(4);
        store.set_progress("lesson-1", 100);
        store.set_progress("lesson-2", 70);
        store.set_progress("lesson-3", 31);

        let stats = store.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.global_percentage, 50);
        assert_eq!(stats.mastered, 2);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.not_started, 1);
    }

    #[test]
    fn test_stats_rounds_half_up() {
        let mut store = LessonStore::with_default_catalog(2);
        store.set_progress("lesson-1", 1);
        assert_eq!(store.stats().global_percentage, 1);
    }

    #[test]
    fn test_from_lessons_drops_duplicates() {
        let store = LessonStore::from_lessons(vec![Lesson::numbered(1), Lesson::numbered(1)]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_load_catalog_file() {
        use std::io::Write;

        let path = std::env::temp_dir().join("test_medprep_catalog.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            br#"[{"id": "lesson-1", "title": "ECG", "theme": "Cardiologie", "content": "P, QRS, T"},
                 {"id": "lesson-2", "title": "Asthme", "pdfUrl": "https://cdn/asthme.pdf"}]"#,
        )
        .unwrap();

        let store = LessonStore::load_catalog(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("lesson-1").unwrap().title, "ECG");
        assert_eq!(
            store.get("lesson-2").unwrap().document_handle(),
            Some(DocumentHandle::url("https://cdn/asthme.pdf"))
        );

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_catalog_missing_file() {
        let err = LessonStore::load_catalog(Path::new("/nonexistent/catalog.json")).unwrap_err();
        assert!(matches!(err, MedPrepError::CatalogLoadError { .. }));
    }
}
