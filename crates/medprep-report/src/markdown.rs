//! Markdown rendering of progress reports.
//!
//! The generated document has a summary table, a per-theme table, lesson
//! tables grouped by mastery level, and the recommendations list.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{LessonEntry, MasteryLevel, ProgressReport, ThemeSummary};

/// Width of the textual progress bar, in cells.
const BAR_WIDTH: usize = 10;

/// Generates Markdown reports from a [`ProgressReport`].
pub struct MarkdownGenerator<'a> {
    report: &'a ProgressReport,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a ProgressReport) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_themes(&mut output);
        self.write_lessons(&mut output);
        self.write_recommendations(&mut output);
        self.write_footer(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# MedPrep Progress Report: {}\n",
            escape_markdown(&self.report.title)
        );
    }

    /// Writes the summary section with metrics table.
    fn write_summary(&self, output: &mut String) {
        let summary = &self.report.summary;

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(
            output,
            "| Overall Progress | {} |",
            progress_bar(summary.global_percentage)
        );
        let _ = writeln!(output, "| Lessons | {} |", summary.total_lessons);
        let _ = writeln!(output, "| Mastered | {} |", summary.mastered);
        let _ = writeln!(output, "| In Progress | {} |", summary.in_progress);
        let _ = writeln!(output, "| Not Started | {} |", summary.not_started);
        let _ = writeln!(output, "| Quizzes Taken | {} |", summary.quizzes_taken);
        let _ = writeln!(
            output,
            "| Lessons With Material | {} |",
            summary.with_document
        );
        let _ = writeln!(output);
    }

    fn write_themes(&self, output: &mut String) {
        let _ = writeln!(output, "## Themes\n");

        if self.report.themes.is_empty() {
            let _ = writeln!(output, "*No lessons in the catalog.*\n");
            return;
        }

        let _ = writeln!(output, "| Theme | Lessons | Mastered | Average |");
        let _ = writeln!(output, "|-------|---------|----------|---------|");
        for theme in &self.report.themes {
            Self::write_theme_row(output, theme);
        }
        let _ = writeln!(output);
    }

    fn write_theme_row(output: &mut String, theme: &ThemeSummary) {
        let name = escape_markdown(&theme.theme);
        let _ = writeln!(
            output,
            "| {name} | {} | {} | {} |",
            theme.lessons,
            theme.mastered,
            progress_bar(theme.average_progress)
        );
    }

    /// Writes one table per mastery level.
    fn write_lessons(&self, output: &mut String) {
        let _ = writeln!(output, "## Lessons\n");

        for level in [
            MasteryLevel::Mastered,
            MasteryLevel::InProgress,
            MasteryLevel::NotStarted,
        ] {
            let lessons: Vec<_> = self.report.lessons_at(level).collect();
            Self::write_lesson_section(output, level, &lessons);
        }
    }

    fn write_lesson_section(output: &mut String, level: MasteryLevel, lessons: &[&LessonEntry]) {
        let _ = writeln!(output, "### {level} ({})\n", lessons.len());

        if lessons.is_empty() {
            let _ = writeln!(output, "*None*\n");
            return;
        }

        let _ = writeln!(output, "| Lesson | Theme | Progress | Quizzes | Last Attempt |");
        let _ = writeln!(output, "|--------|-------|----------|---------|--------------|");
        for lesson in lessons {
            Self::write_lesson_row(output, lesson);
        }
        let _ = writeln!(output);
    }

    fn write_lesson_row(output: &mut String, lesson: &LessonEntry) {
        let title = escape_markdown(&lesson.title);
        let theme = escape_markdown(&lesson.theme);
        let last = lesson
            .last_attempt
            .as_ref()
            .map_or_else(|| "-".to_string(), format_timestamp);
        let _ = writeln!(
            output,
            "| {title} | {theme} | {}% | {} | {last} |",
            lesson.progress, lesson.quizzes_taken
        );
    }

    fn write_recommendations(&self, output: &mut String) {
        let _ = writeln!(output, "## Recommendations\n");

        if self.report.recommendations.is_empty() {
            let _ = writeln!(output, "*Nothing to suggest. Keep it up.*\n");
            return;
        }

        for (index, rec) in self.report.recommendations.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. **[{}]** {}",
                index + 1,
                escape_markdown(&rec.category),
                escape_markdown(&rec.description),
            );
        }

        let _ = writeln!(output);
    }

    fn write_footer(&self, output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&self.report.generated_at);
        let _ = writeln!(output, "*Generated by MedPrep at {timestamp}*");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Renders a percentage as `[####------] 40%`.
fn progress_bar(percent: u8) -> String {
    let percent = percent.min(100);
    let filled = (usize::from(percent) * BAR_WIDTH + 50) / 100;
    format!(
        "`[{}{}]` {percent}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled)
    )
}

/// Format: "YYYY-MM-DD HH:MM:SS UTC"
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Escapes special Markdown characters in text.
///
/// Newlines become `<br>` so the text stays inside table cells.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
