//! Configuration types for MedPrep.
//!
//! Configuration is read from `medprep.json` (camelCase keys). Every field has
//! a default, unknown fields are ignored, and a missing file yields the
//! default configuration. Values are validated after parsing.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MedPrepError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "medprep.json";

/// Default HTTP port.
const fn default_port() -> u16 {
    3000
}

/// Default bind address.
fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Default directory for uploaded documents.
fn default_upload_dir() -> String {
    "uploads".to_string()
}

/// Default upload size limit in megabytes.
const fn default_max_upload_mb() -> u64 {
    10
}

/// Default model name.
fn default_model() -> String {
    "gemini-pro".to_string()
}

/// Default environment variable holding the completion API key.
fn default_api_key_env() -> String {
    "MEDPREP_API_KEY".to_string()
}

/// Default completion timeout in seconds.
const fn default_completion_timeout() -> u64 {
    30
}

/// Default viewer width in pixels.
const fn default_viewport_width() -> f64 {
    848.0
}

/// Default page margin in pixels.
const fn default_margin() -> f64 {
    medprep_document::PAGE_MARGIN_PX
}

/// Default number of questions per quiz.
const fn default_quiz_count() -> u32 {
    10
}

/// Default minimum number of questions per quiz.
const fn default_quiz_min_count() -> u32 {
    1
}

/// Default maximum number of questions per quiz.
const fn default_quiz_max_count() -> u32 {
    50
}

/// Default quiz difficulty percentage.
const fn default_quiz_difficulty() -> u8 {
    50
}

/// Default number of lessons in the built-in catalog.
const fn default_lesson_count() -> u32 {
    75
}

/// Main configuration for MedPrep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Completion service settings.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Document viewer settings.
    #[serde(default)]
    pub viewer: ViewerConfig,

    /// Quiz settings.
    #[serde(default)]
    pub quiz: QuizConfig,

    /// Lesson catalog settings.
    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `medprep.json` in the current directory. If found, loads and
    /// validates the configuration. If not found, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            MedPrepError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `MedPrepError::ConfigParseError` if the file exists but contains
    /// invalid JSON or invalid enum values.
    ///
    /// Returns `MedPrepError::ConfigValidationError` if the configuration values
    /// are out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(MedPrepError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| MedPrepError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `MedPrepError::ConfigValidationError` if any validation check fails.
    pub fn validate(&self) -> Result<()> {
        if self.completion.timeout_seconds == 0 {
            return Err(MedPrepError::config_validation(
                "completion.timeoutSeconds must be greater than 0",
                "Set completion.timeoutSeconds to at least 1 second in your medprep.json",
            ));
        }

        if self.completion.model.trim().is_empty() {
            return Err(MedPrepError::config_validation(
                "completion.model must not be empty",
                "Set completion.model, for example \"gemini-pro\"",
            ));
        }

        if self.completion.api_key_env.trim().is_empty() {
            return Err(MedPrepError::config_validation(
                "completion.apiKeyEnv must not be empty",
                "Name the environment variable that holds your API key",
            ));
        }

        if self.viewer.viewport_width <= self.viewer.margin {
            return Err(MedPrepError::config_validation(
                format!(
                    "viewer.viewportWidth ({}) must be larger than viewer.margin ({})",
                    self.viewer.viewport_width, self.viewer.margin
                ),
                "Increase viewer.viewportWidth in your medprep.json",
            ));
        }

        if self.quiz.min_count == 0 || self.quiz.min_count > self.quiz.max_count {
            return Err(MedPrepError::config_validation(
                format!(
                    "quiz.minCount ({}) must be between 1 and quiz.maxCount ({})",
                    self.quiz.min_count, self.quiz.max_count
                ),
                "Use minCount 1 and maxCount 50 unless you need something else",
            ));
        }

        if !(self.quiz.min_count..=self.quiz.max_count).contains(&self.quiz.default_count) {
            return Err(MedPrepError::config_validation(
                format!(
                    "quiz.defaultCount ({}) must be between {} and {}",
                    self.quiz.default_count, self.quiz.min_count, self.quiz.max_count
                ),
                "Adjust quiz.defaultCount in your medprep.json",
            ));
        }

        if self.quiz.default_difficulty > 100 {
            return Err(MedPrepError::config_validation(
                "quiz.defaultDifficulty must be between 0 and 100",
                "Difficulty is a percentage",
            ));
        }

        if self.server.max_upload_mb == 0 {
            return Err(MedPrepError::config_validation(
                "server.maxUploadMb must be greater than 0",
                "Set server.maxUploadMb to at least 1 in your medprep.json",
            ));
        }

        if self.server.upload_dir.trim().is_empty() {
            return Err(MedPrepError::config_validation(
                "server.uploadDir must not be empty",
                "Provide a directory for uploaded documents (use 'uploads' for the default)",
            ));
        }

        if self.catalog.file.is_none() && self.catalog.lesson_count == 0 {
            return Err(MedPrepError::config_validation(
                "catalog.lessonCount must be greater than 0",
                "Set catalog.lessonCount or point catalog.file at a lesson list",
            ));
        }

        Ok(())
    }

    /// Base URL that uploaded documents are served from.
    #[must_use]
    pub fn public_base_url(&self) -> String {
        self.server
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.server.host, self.server.port))
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Externally visible base URL, used to resolve `/uploads/...` locators.
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Directory uploaded documents are written to.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Upload size limit in megabytes.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            public_base_url: None,
            upload_dir: default_upload_dir(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl ServerConfig {
    /// Upload size limit in bytes.
    #[must_use]
    pub const fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }
}

/// Completion service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionConfig {
    /// Which API dialect to speak.
    #[serde(default)]
    pub provider: CompletionProvider,

    /// Override for the provider's base URL.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_completion_timeout")]
    pub timeout_seconds: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: CompletionProvider::default(),
            base_url: None,
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_seconds: default_completion_timeout(),
        }
    }
}

impl CompletionConfig {
    /// Base URL to use, falling back to the provider's public endpoint.
    #[must_use]
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
    }
}

/// Supported completion API dialects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompletionProvider {
    /// Google Gemini `generateContent` (default).
    #[default]
    Gemini,
    /// `OpenAI`-compatible chat completions.
    OpenAi,
}

impl CompletionProvider {
    /// Parses a string into a `CompletionProvider`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }

    /// Public endpoint for this provider.
    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::OpenAi => "https://api.openai.com/v1",
        }
    }
}

impl std::fmt::Display for CompletionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

impl std::str::FromStr for CompletionProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_str_case_insensitive(s).ok_or_else(|| {
            format!("invalid completion provider '{s}': expected one of 'gemini', 'openai'")
        })
    }
}

impl<'de> Deserialize<'de> for CompletionProvider {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for CompletionProvider {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Document viewer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerConfig {
    /// Width of the viewer area in pixels.
    #[serde(default = "default_viewport_width")]
    pub viewport_width: f64,

    /// Space kept around pages in pixels.
    #[serde(default = "default_margin")]
    pub margin: f64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            viewport_width: default_viewport_width(),
            margin: default_margin(),
        }
    }
}

/// Quiz settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizConfig {
    /// Questions per quiz when the learner does not choose.
    #[serde(default = "default_quiz_count")]
    pub default_count: u32,

    /// Smallest accepted question count.
    #[serde(default = "default_quiz_min_count")]
    pub min_count: u32,

    /// Largest accepted question count.
    #[serde(default = "default_quiz_max_count")]
    pub max_count: u32,

    /// Difficulty percentage when the learner does not choose.
    #[serde(default = "default_quiz_difficulty")]
    pub default_difficulty: u8,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            default_count: default_quiz_count(),
            min_count: default_quiz_min_count(),
            max_count: default_quiz_max_count(),
            default_difficulty: default_quiz_difficulty(),
        }
    }
}

/// Lesson catalog settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogConfig {
    /// Number of lessons in the built-in catalog.
    #[serde(default = "default_lesson_count")]
    pub lesson_count: u32,

    /// JSON file replacing the built-in catalog.
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            lesson_count: default_lesson_count(),
            file: None,
        }
    }
}
