//! Error types for MedPrep.
//!
//! Every failure is scoped to one interaction: a completion call, a parse, an
//! upload or a session action. The per-area enums below are what controllers
//! and handlers match on; [`MedPrepError`] wraps them for callers that only
//! need to report.

use std::path::PathBuf;

use medprep_document::LoadError;

/// A specialized `Result` type for MedPrep operations.
pub type Result<T> = std::result::Result<T, MedPrepError>;

/// Errors that can occur anywhere in the MedPrep core.
#[derive(Debug, thiserror::Error)]
pub enum MedPrepError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your medprep.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// The lesson catalog file could not be loaded.
    #[error("Failed to load lesson catalog '{path}': {message}\n\nSuggestion: Check that 'catalog.file' points to a JSON array of lessons")]
    CatalogLoadError {
        /// Path to the catalog file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Lesson Errors
    // ========================================================================
    /// No lesson has the requested id.
    #[error("Lesson not found: '{id}'")]
    LessonNotFound {
        /// The requested id.
        id: String,
    },

    // ========================================================================
    // Interaction Errors
    // ========================================================================
    /// The completion service failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A completion reply did not have the expected shape.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// An upload was rejected or could not be stored.
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// A session action was refused.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A document could not be loaded.
    #[error(transparent)]
    Document(#[from] LoadError),

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MedPrepError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `CatalogLoadError`.
    #[must_use]
    pub fn catalog_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CatalogLoadError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `LessonNotFound` error.
    #[must_use]
    pub fn lesson_not_found(id: impl Into<String>) -> Self {
        Self::LessonNotFound { id: id.into() }
    }

    /// Returns `true` if this error is transient and may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Service(err) => err.is_transient(),
            Self::Document(err) => err.is_transient(),
            Self::Session(SessionError::Busy) => true,
            _ => false,
        }
    }

    /// Returns `true` if this error should stop the process at startup.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::CatalogLoadError { .. }
        )
    }
}

// ============================================================================
// Completion Service
// ============================================================================

/// Categories of completion-service failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Authentication failure (invalid API key, expired credentials).
    Authentication,
    /// Rate limit or quota exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues.
    Network,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl ServiceErrorKind {
    /// Classifies an HTTP status code.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }

    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check your API key or credentials",
            Self::RateLimit => "Wait and retry, or check your API quota",
            Self::Server => "Retry later; the completion service may be experiencing issues",
            Self::Network => "Check your network connection",
            Self::Other => "Check the completion provider's status page",
        }
    }
}

/// Failures of the external completion service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// No API key is available.
    #[error("Completion service not configured: environment variable '{env_var}' is not set\n\nSuggestion: Export {env_var} with your API key")]
    NotConfigured {
        /// Variable that should hold the key.
        env_var: String,
    },

    /// The call did not complete in time.
    #[error("Completion service timed out after {timeout_secs}s")]
    Timeout {
        /// Timeout that elapsed.
        timeout_secs: u64,
    },

    /// The service answered with an error or could not be reached.
    #[error("Completion service error ({kind}): {message}\n\nSuggestion: {suggestion}")]
    Api {
        /// Failure category.
        kind: ServiceErrorKind,
        /// Detail from the service or transport.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// The service answered with no text.
    #[error("Completion service returned an empty response")]
    EmptyResponse,
}

impl ServiceError {
    /// Creates a new `Api` error with automatic suggestion based on error kind.
    #[must_use]
    pub fn api(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self::Api {
            kind,
            message: message.into(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Returns `true` if the same request may succeed later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::EmptyResponse
                | Self::Api {
                    kind: ServiceErrorKind::RateLimit
                        | ServiceErrorKind::Server
                        | ServiceErrorKind::Network,
                    ..
                }
        )
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Why a completion reply could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A required marker never appears.
    #[error("missing marker '{marker}'")]
    MissingMarker {
        /// The marker text.
        marker: &'static str,
    },

    /// A marker appears before one that must precede it.
    #[error("marker '{marker}' is out of order")]
    OutOfOrder {
        /// The misplaced marker.
        marker: &'static str,
    },

    /// A field is present but blank.
    #[error("field '{field}' is empty")]
    EmptyField {
        /// The field name.
        field: &'static str,
    },

    /// `CORRECT:` is not a single letter A to D.
    #[error("correct answer must be one of A, B, C, D (found '{found}')")]
    InvalidCorrectLetter {
        /// The value that was found.
        found: String,
    },

    /// `VERDICT:` is neither CORRECT nor INCORRECT.
    #[error("verdict must be CORRECT or INCORRECT (found '{found}')")]
    InvalidVerdict {
        /// The value that was found.
        found: String,
    },
}

// ============================================================================
// Upload
// ============================================================================

/// Reasons an upload is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    /// No file was supplied.
    #[error("No file selected")]
    NoFile,

    /// The file is not a PDF.
    #[error("Please select a valid PDF file")]
    InvalidType {
        /// Content type that was supplied.
        content_type: String,
    },

    /// The file exceeds the size limit.
    #[error("File size exceeds {limit_mb}MB limit")]
    TooLarge {
        /// Size of the file in bytes.
        size: u64,
        /// Configured limit in megabytes.
        limit_mb: u64,
    },

    /// The file has no content.
    #[error("The selected file is empty")]
    EmptyFile,

    /// The lesson id cannot be turned into a file name.
    #[error("Invalid lesson id '{id}'")]
    InvalidLessonId {
        /// The rejected id.
        id: String,
    },

    /// No lesson has this id.
    #[error("Lesson not found: '{id}'")]
    UnknownLesson {
        /// The requested id.
        id: String,
    },

    /// The file could not be written.
    #[error("Failed to store upload: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },
}

// ============================================================================
// Sessions
// ============================================================================

/// A completion exchange that failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    /// The service call failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The reply did not parse.
    #[error("unexpected reply format: {0}")]
    Parse(#[from] ParseError),
}

/// Reasons a session action is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A response is already being awaited.
    #[error("A response is already pending for this session")]
    Busy,

    /// The session has reached its terminal state.
    #[error("This session is finished")]
    Finished,

    /// The session has no case yet.
    #[error("The case has not been presented yet")]
    NotStarted,

    /// The result belongs to a superseded request.
    #[error("The response arrived after the session moved on")]
    Stale,

    /// The learner submitted nothing.
    #[error("Message must not be empty")]
    EmptyInput,

    /// Quiz parameters are out of range.
    #[error("Invalid quiz configuration: {message}")]
    InvalidQuizConfig {
        /// What is wrong.
        message: String,
    },

    /// No quiz item is being shown.
    #[error("No quiz question is currently shown")]
    NoCurrentItem,

    /// The current item was already answered.
    #[error("This question has already been answered")]
    AlreadyAnswered,

    /// The choice id is not A to D.
    #[error("Unknown choice '{choice}'")]
    UnknownChoice {
        /// The rejected choice.
        choice: String,
    },

    /// There is nothing to retry.
    #[error("There is no failed request to retry")]
    NothingToRetry,

    /// The completion exchange failed.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

impl From<ServiceError> for SessionError {
    fn from(err: ServiceError) -> Self {
        Self::Exchange(ExchangeError::Service(err))
    }
}

impl From<ParseError> for SessionError {
    fn from(err: ParseError) -> Self {
        Self::Exchange(ExchangeError::Parse(err))
    }
}
