//! Parsing of completion replies.
//!
//! The completion service is asked to answer in a fixed shape where fields
//! are introduced by literal markers (`QUESTION:`, `A)`, `CORRECT:` and so
//! on). [`MarkerScanner`] walks the reply once, expecting the markers in a
//! given order, and yields the text between them. A reply that misses a
//! marker or a field is rejected as a whole; no defaults are invented.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Markers of a quiz reply, in the order they must appear.
pub const QUIZ_MARKERS: [&str; 7] = [
    "QUESTION:",
    "A)",
    "B)",
    "C)",
    "D)",
    "CORRECT:",
    "EXPLANATION:",
];

/// Markers of a diagnosis reply, in the order they must appear.
pub const DIAGNOSIS_MARKERS: [&str; 2] = ["VERDICT:", "EXPLICATION:"];

/// Ids of the four quiz choices.
pub const CHOICE_IDS: [char; 4] = ['A', 'B', 'C', 'D'];

const CHOICE_FIELDS: [&str; 4] = ["choice A", "choice B", "choice C", "choice D"];

/// One answer option of a quiz item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizChoice {
    /// Letter A to D.
    pub id: char,
    /// Answer text.
    pub text: String,
    /// Whether this is the correct answer.
    pub is_correct: bool,
}

/// A generated multiple-choice question.
///
/// Always has exactly four choices, A to D in order, exactly one of which is
/// correct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizItem {
    /// Question text.
    pub question: String,
    /// Choices A to D.
    pub choices: Vec<QuizChoice>,
    /// Why the correct answer is correct.
    pub explanation: String,
}

impl QuizItem {
    /// The correct choice.
    #[must_use]
    pub fn correct_choice(&self) -> Option<&QuizChoice> {
        self.choices.iter().find(|c| c.is_correct)
    }

    /// Looks up a choice by letter, ignoring case.
    #[must_use]
    pub fn choice(&self, id: char) -> Option<&QuizChoice> {
        let id = id.to_ascii_uppercase();
        self.choices.iter().find(|c| c.id == id)
    }
}

/// Evaluation of a submitted diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisVerdict {
    /// Whether the diagnosis was judged correct.
    pub is_correct: bool,
    /// Explanation from the evaluator.
    pub explanation: String,
}

impl DiagnosisVerdict {
    /// Heading shown with the verdict.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        if self.is_correct {
            "Diagnostic Correct!"
        } else {
            "Diagnostic à Revoir"
        }
    }
}

/// Single-pass scanner over marker-delimited text.
///
/// The scanner holds the index of the next expected marker and a cursor into
/// the text. Each step finds the next marker at or after the cursor and
/// closes the section opened by the previous one.
///
/// When every marker starts a line somewhere in the text, only line-start
/// occurrences are taken, so `(A)` inside a question is not read as a choice.
/// Otherwise the first occurrence wins, which lets markers share a line.
#[derive(Debug)]
pub struct MarkerScanner<'a> {
    text: &'a str,
    markers: &'a [&'static str],
    line_mode: bool,
    next: usize,
    cursor: usize,
    open: Option<usize>,
    sections: Vec<&'a str>,
}

impl<'a> MarkerScanner<'a> {
    /// Creates a scanner for `markers` over `text`.
    #[must_use]
    pub fn new(text: &'a str, markers: &'a [&'static str]) -> Self {
        let line_mode = markers
            .iter()
            .all(|marker| text.match_indices(marker).any(|(at, _)| starts_line(text, at)));
        Self {
            text,
            markers,
            line_mode,
            next: 0,
            cursor: 0,
            open: None,
            sections: Vec::with_capacity(markers.len()),
        }
    }

    /// Runs the scanner to completion.
    ///
    /// Returns the text following each marker, untrimmed, one entry per
    /// marker. Text before the first marker is ignored.
    pub fn scan(mut self) -> Result<Vec<&'a str>, ParseError> {
        while self.next < self.markers.len() {
            self.step()?;
        }
        if let Some(start) = self.open.take() {
            self.sections.push(&self.text[start..]);
        }
        Ok(self.sections)
    }

    fn step(&mut self) -> Result<(), ParseError> {
        let marker = self.markers[self.next];
        let Some(found) = self.find(marker) else {
            return Err(if self.text[..self.cursor].contains(marker) {
                ParseError::OutOfOrder { marker }
            } else {
                ParseError::MissingMarker { marker }
            });
        };

        if let Some(start) = self.open.take() {
            self.sections.push(&self.text[start..found]);
        }
        self.cursor = found + marker.len();
        self.open = Some(self.cursor);
        self.next += 1;
        Ok(())
    }

    fn find(&self, marker: &str) -> Option<usize> {
        let rest = &self.text[self.cursor..];
        if self.line_mode {
            let at_line_start = rest
                .match_indices(marker)
                .map(|(offset, _)| self.cursor + offset)
                .find(|&at| starts_line(self.text, at));
            if at_line_start.is_some() {
                return at_line_start;
            }
        }
        rest.find(marker).map(|offset| self.cursor + offset)
    }
}

/// Whether only whitespace precedes `at` on its line.
fn starts_line(text: &str, at: usize) -> bool {
    text[..at]
        .rsplit('\n')
        .next()
        .unwrap_or_default()
        .trim()
        .is_empty()
}

/// Parses a quiz reply.
///
/// The reply must contain, in order, `QUESTION:`, `A)`, `B)`, `C)`, `D)`,
/// `CORRECT:` and `EXPLANATION:`. Markers may share a line; when each one
/// starts its own line, text like `(A)` inside the question is left alone.
///
/// # Examples
///
/// ```
/// use medprep_core::parser::parse_quiz_item;
///
/// let item = parse_quiz_item(
///     "QUESTION: What is X?A) 1B) 2C) 3D) 4CORRECT: BEXPLANATION: Because.",
/// )
/// .unwrap();
/// assert_eq!(item.question, "What is X?");
/// assert!(item.choices[1].is_correct);
/// ```
pub fn parse_quiz_item(text: &str) -> Result<QuizItem, ParseError> {
    let sections = MarkerScanner::new(text, &QUIZ_MARKERS).scan()?;

    let question = required(sections[0], "question")?;
    let correct = correct_letter(sections[5])?;
    let explanation = required(sections[6], "explanation")?;

    let choices = CHOICE_IDS
        .iter()
        .zip(CHOICE_FIELDS)
        .zip(&sections[1..5])
        .map(|((&id, field), raw)| {
            Ok(QuizChoice {
                id,
                text: required(raw, field)?,
                is_correct: id == correct,
            })
        })
        .collect::<Result<Vec<_>, ParseError>>()?;

    Ok(QuizItem {
        question,
        choices,
        explanation,
    })
}

/// Parses a diagnosis evaluation reply.
///
/// `VERDICT:` is followed by `CORRECT` or `INCORRECT` in any case, then
/// `EXPLICATION:` and the explanation.
pub fn parse_diagnosis(text: &str) -> Result<DiagnosisVerdict, ParseError> {
    let sections = MarkerScanner::new(text, &DIAGNOSIS_MARKERS).scan()?;

    let verdict = first_word(sections[0]);
    let is_correct = if verdict.eq_ignore_ascii_case("CORRECT") {
        true
    } else if verdict.eq_ignore_ascii_case("INCORRECT") {
        false
    } else {
        return Err(ParseError::InvalidVerdict {
            found: sections[0].trim().to_string(),
        });
    };

    Ok(DiagnosisVerdict {
        is_correct,
        explanation: required(sections[1], "explanation")?,
    })
}

/// Strips emphasis markers and blank lines from free text.
///
/// Removes `**` and `*`, drops lines that are empty after trimming, and joins
/// the rest with blank lines between them.
#[must_use]
pub fn clean_text(text: &str) -> String {
    let stripped = text.replace("**", "").replace('*', "");
    stripped
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn required(raw: &str, field: &'static str) -> Result<String, ParseError> {
    let value = raw.trim();
    if value.is_empty() {
        Err(ParseError::EmptyField { field })
    } else {
        Ok(value.to_string())
    }
}

fn first_word(raw: &str) -> &str {
    raw.split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| !c.is_alphanumeric())
}

fn correct_letter(raw: &str) -> Result<char, ParseError> {
    let word = first_word(raw);
    let mut chars = word.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) if CHOICE_IDS.contains(&letter.to_ascii_uppercase()) => {
            Ok(letter.to_ascii_uppercase())
        }
        _ => Err(ParseError::InvalidCorrectLetter {
            found: raw.trim().to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = "QUESTION: Quel est le nerf de la jambe ?\n\
        A) Nerf médian\n\
        B) Nerf sciatique\n\
        C) Nerf radial\n\
        D) Nerf ulnaire\n\
        CORRECT: B\n\
        EXPLANATION: Le nerf sciatique innerve le membre inférieur.";

    #[test]
    fn test_parse_well_formed_quiz() {
        let item = parse_quiz_item(WELL_FORMED).unwrap();
        assert_eq!(item.question, "Quel est le nerf de la jambe ?");
        assert_eq!(item.choices.len(), 4);
        let ids: Vec<char> = item.choices.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!['A', 'B', 'C', 'D']);
        assert_eq!(item.choices[0].text, "Nerf médian");
        assert_eq!(item.correct_choice().unwrap().id, 'B');
        assert_eq!(item.choices.iter().filter(|c| c.is_correct).count(), 1);
        assert_eq!(
            item.explanation,
            "Le nerf sciatique innerve le membre inférieur."
        );
    }

    #[test]
    fn test_parse_inline_markers() {
        let item = parse_quiz_item(
            "QUESTION: What is X?A) 1B) 2C) 3D) 4CORRECT: BEXPLANATION: Because.",
        )
        .unwrap();

        assert_eq!(item.question, "What is X?");
        let texts: Vec<&str> = item.choices.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["1", "2", "3", "4"]);
        let correct: Vec<bool> = item.choices.iter().map(|c| c.is_correct).collect();
        assert_eq!(correct, vec![false, true, false, false]);
        assert_eq!(item.explanation, "Because.");
    }

    #[test]
    fn test_choice_letter_inside_question() {
        let item = parse_quiz_item(
            "QUESTION: Carence en vitamine (A) ?\n\
             A) Héméralopie\n\
             B) Scorbut\n\
             C) Béribéri\n\
             D) Pellagre\n\
             CORRECT: A\n\
             EXPLANATION: La vitamine A intervient dans la vision nocturne (B) non.",
        )
        .unwrap();

        assert_eq!(item.question, "Carence en vitamine (A) ?");
        assert_eq!(item.choices[0].text, "Héméralopie");
        assert_eq!(item.choices[1].text, "Scorbut");
        assert!(item.choices[0].is_correct);
        assert!(item.explanation.ends_with("(B) non."));
    }

    #[test]
    fn test_mixed_layout_falls_back_to_first_occurrence() {
        let item =
            parse_quiz_item("QUESTION: Q ?\nA) 1 B) 2 C) 3 D) 4\nCORRECT: C\nEXPLANATION: E.")
                .unwrap();
        let texts: Vec<&str> = item.choices.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_preamble_is_ignored() {
        let text = format!("Voici votre question :\n\n{WELL_FORMED}");
        assert!(parse_quiz_item(&text).is_ok());
    }

    #[test]
    fn test_missing_correct_fails() {
        let text = WELL_FORMED.replace("CORRECT: B\n", "");
        assert_eq!(
            parse_quiz_item(&text).unwrap_err(),
            ParseError::MissingMarker { marker: "CORRECT:" }
        );
    }

    #[test]
    fn test_missing_choice_fails() {
        let text = WELL_FORMED.replace("C) Nerf radial\n", "");
        assert_eq!(
            parse_quiz_item(&text).unwrap_err(),
            ParseError::MissingMarker { marker: "C)" }
        );
    }

    #[test]
    fn test_missing_explanation_fails() {
        let text = WELL_FORMED.replace("EXPLANATION:", "NOTE:");
        assert!(matches!(
            parse_quiz_item(&text).unwrap_err(),
            ParseError::MissingMarker {
                marker: "EXPLANATION:"
            }
        ));
    }

    #[test]
    fn test_out_of_order_marker_fails() {
        let text = "QUESTION: Q\nB) two\nA) one\nC) three\nD) four\nCORRECT: A\nEXPLANATION: E";
        assert_eq!(
            parse_quiz_item(text).unwrap_err(),
            ParseError::OutOfOrder { marker: "B)" }
        );
    }

    #[test]
    fn test_invalid_correct_letter_fails() {
        let text = WELL_FORMED.replace("CORRECT: B", "CORRECT: E");
        assert!(matches!(
            parse_quiz_item(&text).unwrap_err(),
            ParseError::InvalidCorrectLetter { .. }
        ));

        let text = WELL_FORMED.replace("CORRECT: B", "CORRECT: Both");
        assert!(parse_quiz_item(&text).is_err());
    }

    #[test]
    fn test_correct_letter_tolerates_punctuation() {
        let text = WELL_FORMED.replace("CORRECT: B", "CORRECT: B)");
        assert_eq!(parse_quiz_item(&text).unwrap().correct_choice().unwrap().id, 'B');
    }

    #[test]
    fn test_empty_question_fails() {
        let text = WELL_FORMED.replace("Quel est le nerf de la jambe ?", "  ");
        assert_eq!(
            parse_quiz_item(&text).unwrap_err(),
            ParseError::EmptyField { field: "question" }
        );
    }

    #[test]
    fn test_choice_lookup_ignores_case() {
        let item = parse_quiz_item(WELL_FORMED).unwrap();
        assert_eq!(item.choice('b').unwrap().text, "Nerf sciatique");
        assert!(item.choice('E').is_none());
    }

    #[test]
    fn test_parse_diagnosis_case_insensitive() {
        for verdict in ["CORRECT", "correct", "Correct"] {
            let parsed =
                parse_diagnosis(&format!("VERDICT: {verdict}\nEXPLICATION: Bien vu.")).unwrap();
            assert!(parsed.is_correct);
            assert_eq!(parsed.explanation, "Bien vu.");
        }

        let parsed =
            parse_diagnosis("VERDICT: INCORRECT\nEXPLICATION:  Il s'agit d'une appendicite. ")
                .unwrap();
        assert!(!parsed.is_correct);
        assert_eq!(parsed.explanation, "Il s'agit d'une appendicite.");
        assert_eq!(parsed.label(), "Diagnostic à Revoir");
    }

    #[test]
    fn test_parse_diagnosis_rejects_unknown_verdict() {
        assert!(matches!(
            parse_diagnosis("VERDICT: PARTIEL\nEXPLICATION: x").unwrap_err(),
            ParseError::InvalidVerdict { .. }
        ));
        assert!(matches!(
            parse_diagnosis("EXPLICATION: x").unwrap_err(),
            ParseError::MissingMarker { marker: "VERDICT:" }
        ));
    }

    #[test]
    fn test_clean_text_strips_emphasis_and_blank_lines() {
        assert_eq!(clean_text("**Hello**\n\n*world*\n"), "Hello\n\nworld");
        assert_eq!(clean_text("a\n   \n\nb\nc"), "a\n\nb\n\nc");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn test_scanner_returns_one_section_per_marker() {
        let sections = MarkerScanner::new("x K1: a K2: b", &["K1:", "K2:"])
            .scan()
            .unwrap();
        assert_eq!(sections, vec![" a ", " b"]);
    }
}
