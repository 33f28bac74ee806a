//! Prompt builders.
//!
//! All instructions sent to the completion service live here. Prompts are in
//! French, like the rest of the learner-facing text, and spell out the exact
//! reply shape the parser expects.

use std::fmt::Write as _;

use crate::lesson::Lesson;
use crate::session::{ChatTurn, Role};

/// Shown in the tutor chat when a reply cannot be obtained.
pub const TUTOR_APOLOGY: &str =
    "Je suis désolé, mais je ne peux pas répondre pour le moment. Veuillez réessayer votre question.";

/// Shown in the case conversation when the patient cannot answer.
pub const PATIENT_APOLOGY: &str = "Désolé, je ne peux pas répondre pour le moment.";

/// Medical-professor prompt for the tutor chat.
///
/// Earlier turns are included so follow-up questions keep their context.
/// Failure notices are left out.
#[must_use]
pub fn tutor_prompt(lesson_title: &str, history: &[ChatTurn], question: &str) -> String {
    let mut prompt = format!(
        "Vous êtes un professeur de médecine compétent et bienveillant qui aide un étudiant à \
         préparer ses examens médicaux. La leçon en cours est « {lesson_title} ».\n\
         Répondez à la question de l'étudiant de manière claire et pédagogique, en utilisant la \
         terminologie médicale appropriée. Répondez TOUJOURS en français.\n"
    );

    write_history(&mut prompt, history, "Étudiant", "Professeur");
    let _ = write!(prompt, "\nQuestion de l'étudiant : {question}");
    prompt
}

/// Quiz-question prompt.
///
/// `number` and `count` tell the model where in the quiz this question sits,
/// so successive questions cover different ground.
#[must_use]
pub fn quiz_prompt(lesson_title: &str, difficulty: u8, number: u32, count: u32) -> String {
    format!(
        "En tant que professeur de médecine, générez une question de quiz sur le sujet \
         \"{lesson_title}\" avec un niveau de difficulté de {difficulty}%. \
         Il s'agit de la question {number} sur {count} : abordez un aspect différent du sujet.\n\
         Format requis :\n\
         - Une question\n\
         - Quatre choix de réponse (A, B, C, D)\n\
         - Une seule réponse correcte\n\
         - Une explication détaillée de la réponse correcte\n\n\
         Répondez en français et structurez la réponse exactement comme ceci :\n\
         QUESTION: [votre question]\n\
         A) [choix A]\n\
         B) [choix B]\n\
         C) [choix C]\n\
         D) [choix D]\n\
         CORRECT: [lettre de la réponse correcte]\n\
         EXPLANATION: [explication détaillée]"
    )
}

/// Prompt that opens a simulated patient case.
#[must_use]
pub fn case_prompt(lesson_title: &str) -> String {
    format!(
        "Vous êtes un professeur de médecine qui prépare un cas clinique pour un étudiant. \
         Le cas doit porter sur le sujet « {lesson_title} ».\n\
         Présentez le patient à la première personne, comme s'il arrivait en consultation : \
         âge, motif de consultation et symptômes principaux. Ne donnez pas le diagnostic. \
         Restez concis (un paragraphe) et répondez en français."
    )
}

/// Prompt for the patient's reply to a clinician question.
///
/// Carries the case and the whole conversation so the patient stays
/// consistent.
#[must_use]
pub fn patient_prompt(
    lesson_title: &str,
    case: &str,
    history: &[ChatTurn],
    question: &str,
) -> String {
    let mut prompt = format!(
        "Vous jouez le rôle d'un patient dans un cas clinique sur « {lesson_title} ».\n\
         Cas : {case}\n\
         Répondez uniquement en tant que patient, en français, avec des mots simples. \
         Ne révélez jamais le diagnostic et ne donnez que les informations qu'un patient \
         connaîtrait.\n"
    );

    write_history(&mut prompt, history, "Médecin", "Patient");
    let _ = write!(prompt, "\nQuestion du médecin : {question}\nRéponse du patient :");
    prompt
}

/// Prompt asking whether a diagnosis is right.
#[must_use]
pub fn diagnosis_prompt(
    lesson_title: &str,
    case: &str,
    history: &[ChatTurn],
    diagnosis: &str,
) -> String {
    let mut prompt = format!(
        "Vous êtes un professeur de médecine qui évalue le diagnostic d'un étudiant pour un cas \
         clinique sur « {lesson_title} ».\n\
         Cas : {case}\n"
    );

    write_history(&mut prompt, history, "Étudiant", "Patient");
    let _ = write!(
        prompt,
        "\nDiagnostic proposé : {diagnosis}\n\n\
         Indiquez si le diagnostic est correct puis expliquez pourquoi, en français. \
         Structurez la réponse exactement comme ceci :\n\
         VERDICT: [CORRECT ou INCORRECT]\n\
         EXPLICATION: [explication]"
    );
    prompt
}

/// Prompt summarizing a learner's progress on a lesson.
#[must_use]
pub fn evaluation_prompt(lesson: &Lesson) -> String {
    let last_attempt = lesson.last_attempt.map_or_else(
        || "aucune".to_string(),
        |at| at.format("%d/%m/%Y").to_string(),
    );

    format!(
        "Vous êtes un professeur de médecine qui fait le point avec un étudiant.\n\
         Leçon : « {} » ({})\n\
         Progression : {}%\n\
         Quiz réalisés : {}\n\
         Dernière tentative : {last_attempt}\n\n\
         Évaluez sa progression en quelques phrases, en français : points forts probables, \
         points à revoir et prochaine étape conseillée.",
        lesson.title, lesson.theme, lesson.progress, lesson.quizzes_taken
    )
}

fn write_history(prompt: &mut String, history: &[ChatTurn], asker: &str, responder: &str) {
    let turns: Vec<&ChatTurn> = history
        .iter()
        .filter(|turn| turn.role != Role::SystemError)
        .collect();
    if turns.is_empty() {
        return;
    }

    prompt.push_str("\nÉchanges précédents :\n");
    for turn in turns {
        let speaker = match turn.role {
            Role::Asker => asker,
            _ => responder,
        };
        let _ = writeln!(prompt, "{speaker} : {}", turn.text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tutor_prompt_includes_history_without_errors() {
        let history = vec![
            ChatTurn::asker("Qu'est-ce qu'un souffle ?"),
            ChatTurn::system_error(TUTOR_APOLOGY),
            ChatTurn::asker("Et un souffle systolique ?"),
            ChatTurn::responder("Un souffle pendant la systole."),
        ];
        let prompt = tutor_prompt("Cardiologie", &history, "Exemples ?");
        assert!(prompt.contains("Étudiant : Qu'est-ce qu'un souffle ?"));
        assert!(prompt.contains("Professeur : Un souffle pendant la systole."));
        assert!(!prompt.contains(TUTOR_APOLOGY));
        assert!(prompt.ends_with("Question de l'étudiant : Exemples ?"));
    }

    #[test]
    fn test_quiz_prompt_names_markers_and_difficulty() {
        let prompt = quiz_prompt("Lesson 4", 70, 2, 10);
        for marker in crate::parser::QUIZ_MARKERS {
            assert!(prompt.contains(marker), "missing {marker}");
        }
        assert!(prompt.contains("70%"));
        assert!(prompt.contains("question 2 sur 10"));
    }

    #[test]
    fn test_patient_prompt_carries_case() {
        let prompt = patient_prompt(
            "Pneumologie",
            "Homme de 54 ans, toux depuis 3 semaines.",
            &[ChatTurn::asker("Fumez-vous ?"), ChatTurn::responder("Oui, un paquet par jour.")],
            "Avez-vous de la fièvre ?",
        );
        assert!(prompt.contains("toux depuis 3 semaines"));
        assert!(prompt.contains("Médecin : Fumez-vous ?"));
        assert!(prompt.contains("Patient : Oui, un paquet par jour."));
        assert!(prompt.contains("Avez-vous de la fièvre ?"));
    }

    #[test]
    fn test_diagnosis_prompt_names_markers() {
        let prompt = diagnosis_prompt("Neurologie", "cas", &[], "AVC ischémique");
        for marker in crate::parser::DIAGNOSIS_MARKERS {
            assert!(prompt.contains(marker));
        }
        assert!(prompt.contains("AVC ischémique"));
    }

    #[test]
    fn test_evaluation_prompt_reports_progress() {
        let mut lesson = Lesson::numbered(3);
        lesson.progress = 42;
        lesson.quizzes_taken = 2;
        let prompt = evaluation_prompt(&lesson);
        assert!(prompt.contains("Lesson 3"));
        assert!(prompt.contains("42%"));
        assert!(prompt.contains("Quiz réalisés : 2"));
        assert!(prompt.contains("Dernière tentative : aucune"));
    }
}
