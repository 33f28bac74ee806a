//! MedPrep Core
//!
//! Lesson catalog, study sessions (tutor chat, quizzes, simulated clinical
//! cases), completion service client, uploads, and the HTTP/WebSocket API.

pub mod api;
pub mod completion;
pub mod config;
pub mod error;
pub mod events;
pub mod lesson;
pub mod parser;
pub mod prompts;
pub mod session;
pub mod upload;

pub use api::{create_router, AppState, ErrorResponse, LessonViewer, QuizResponse, UploadResponse};
pub use completion::{CompletionService, HttpCompletionClient, ScriptedCompletion};
pub use config::{
    CatalogConfig, CompletionConfig, CompletionProvider, Config, QuizConfig, ServerConfig,
    ViewerConfig,
};
pub use error::{
    ExchangeError, MedPrepError, ParseError, Result, ServiceError, ServiceErrorKind, SessionError,
    UploadError,
};
pub use events::{EventBroadcaster, EventFilter, StudyEvent};
pub use lesson::{Lesson, LessonStats, LessonStore, MASTERY_THRESHOLD};
pub use parser::{clean_text, parse_diagnosis, parse_quiz_item, DiagnosisVerdict, QuizChoice, QuizItem};
pub use session::{
    evaluate_progress, AnswerFeedback, ChatTurn, ExchangeGate, ExchangeState, MedicalCase,
    PendingExchange, ProgressEvaluation, QuizProgress, QuizRunner, QuizSettings, QuizStep,
    QuizSummary, Role, Ticket, TutorChat,
};
pub use upload::{PdfUpload, StoredUpload, UploadStore, UPLOAD_ROUTE};
