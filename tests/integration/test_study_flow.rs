//! Library-level flows that span more than one crate.

mod common;

use std::sync::Arc;

use chrono::Utc;
use common::{quiz_reply, sample_pdf};
use medprep_core::{
    LessonStore, QuizConfig, QuizProgress, QuizRunner, QuizSettings, ScriptedCompletion,
};
use medprep_document::{
    DocumentHandle, DocumentRenderer, DocumentView, MemoryTransport, PdfDecoder, RenderEvent,
    RendererConfig,
};
use medprep_report::{LessonEntry, MarkdownGenerator, MasteryLevel, ProgressReport};

#[tokio::test]
async fn test_switching_documents_never_mixes_pages() {
    let first = sample_pdf(&["Ancien 1", "Ancien 2", "Ancien 3", "Ancien 4"]);
    let second = sample_pdf(&["Nouveau 1", "Nouveau 2"]);
    let renderer = DocumentRenderer::new(
        Arc::new(
            MemoryTransport::new()
                .with_document("/uploads/lesson-1.pdf", first)
                .with_document("/uploads/lesson-2.pdf", second)
                .with_chunk_size(64),
        ),
        Arc::new(PdfDecoder),
        RendererConfig::default(),
    );

    let mut view = DocumentView::new();
    let stale = renderer.open(DocumentHandle::url("/uploads/lesson-1.pdf"));
    view.begin(stale.generation());
    let current = renderer.open(DocumentHandle::url("/uploads/lesson-2.pdf"));
    view.begin(current.generation());

    for update in stale.collect().await {
        assert!(!view.apply(&update), "stale update was applied");
    }
    for update in current.collect().await {
        assert!(view.apply(&update));
    }

    assert!(view.is_ready());
    let surfaces: Vec<_> = view.pages.iter().map(|p| p.surface.as_str()).collect();
    assert_eq!(surfaces, vec!["Nouveau 1", "Nouveau 2"]);
}

#[tokio::test]
async fn test_progress_events_follow_byte_counts() {
    let pdf = sample_pdf(&["Page unique"]);
    let size = pdf.len() as u64;
    let renderer = DocumentRenderer::new(
        Arc::new(
            MemoryTransport::new()
                .with_document("doc", pdf)
                .with_chunk_size(100),
        ),
        Arc::new(PdfDecoder),
        RendererConfig::default(),
    );

    let updates = renderer.open(DocumentHandle::url("doc")).collect().await;
    let fractions: Vec<f64> = updates
        .iter()
        .filter_map(|u| match u.event {
            RenderEvent::Progress { loaded, total, fraction } => {
                assert_eq!(total, size);
                assert!(loaded <= total);
                Some(fraction)
            }
            _ => None,
        })
        .collect();

    assert!(!fractions.is_empty());
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert!((fractions[fractions.len() - 1] - 1.0).abs() < f64::EPSILON);
    assert!(matches!(updates.last().map(|u| &u.event), Some(RenderEvent::Finished)));
}

#[tokio::test]
async fn test_short_quiz_feeds_lesson_progress() {
    let limits = QuizConfig::default();
    let settings = QuizSettings {
        count: 3,
        difficulty: 50,
    };
    let service = ScriptedCompletion::new((1..=3).map(|n| quiz_reply(n, 'D')));
    let mut runner =
        QuizRunner::new("lesson-2", "Lesson 2", settings, &limits).expect("valid settings");

    let mut summary = None;
    for step in 0..4 {
        match runner.advance(&service).await.expect("advance") {
            QuizProgress::Question(item) => {
                assert_eq!(item.choices.len(), 4);
                let choice = if step == 0 { 'A' } else { 'D' };
                runner.answer(choice).expect("answer");
            }
            QuizProgress::Finished(done) => {
                summary = Some(done);
                break;
            }
        }
    }
    let summary = summary.expect("quiz finished after three questions");
    assert_eq!(summary.total, 3);
    assert_eq!(summary.correct, 2);
    assert_eq!(summary.score_percent, 67);

    let mut store = LessonStore::with_default_catalog(3);
    store.set_progress("lesson-2", 80);
    assert!(store.record_quiz_attempt("lesson-2", summary.score_percent, Utc::now()));
    let lesson = store.get("lesson-2").expect("lesson");
    assert_eq!(lesson.progress, 80);
    assert_eq!(lesson.quizzes_taken, 1);
}

#[test]
fn test_report_from_store_snapshot() {
    let mut store = LessonStore::with_default_catalog(12);
    store.set_progress("lesson-1", 90);
    store.set_progress("lesson-2", 30);
    store.record_quiz_attempt("lesson-3", 50, Utc::now());
    store.attach_document("lesson-1", "/uploads/lesson-1.pdf");

    let entries: Vec<LessonEntry> = store
        .snapshot()
        .iter()
        .map(|lesson| {
            LessonEntry::new(&lesson.id, &lesson.title, &lesson.theme)
                .with_progress(lesson.progress)
                .with_quizzes(lesson.quizzes_taken, lesson.last_attempt)
                .with_document(lesson.document_handle().is_some())
        })
        .collect();

    let report = ProgressReport::builder()
        .title("Révisions")
        .lessons(entries)
        .build()
        .expect("report builds");

    let stats = store.stats();
    assert_eq!(report.summary.total_lessons, stats.total);
    assert_eq!(report.summary.global_percentage, stats.global_percentage);
    assert_eq!(report.summary.mastered, stats.mastered);
    assert_eq!(report.summary.with_document, 1);
    assert_eq!(report.lessons_at(MasteryLevel::Mastered).count(), 1);
    assert!(!report.recommendations.is_empty());

    let markdown = MarkdownGenerator::new(&report).generate();
    assert!(markdown.contains("### Mastered (1)"));
    assert!(markdown.contains("### In Progress (2)"));
}
