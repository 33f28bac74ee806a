//! Completion service client.
//!
//! Every AI feature goes through [`CompletionService::complete`]: a prompt in,
//! text out. [`HttpCompletionClient`] speaks the Gemini `generateContent` API
//! (the default) or an `OpenAI`-compatible chat-completions API, and bounds
//! every call with the configured timeout.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::{CompletionConfig, CompletionProvider};
use crate::error::{ServiceError, ServiceErrorKind};

/// A text-completion backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Sends `prompt` and returns the generated text.
    async fn complete(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// HTTP client for a hosted completion API.
#[derive(Debug, Clone)]
pub struct HttpCompletionClient {
    client: Client,
    provider: CompletionProvider,
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    timeout: Duration,
}

impl HttpCompletionClient {
    /// Builds a client from configuration, reading the API key from the
    /// configured environment variable.
    #[must_use]
    pub fn from_config(config: &CompletionConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            warn!(
                env_var = %config.api_key_env,
                "No completion API key found; AI features will report an error"
            );
        }
        Self::new(config, api_key)
    }

    /// Builds a client with an explicit API key.
    #[must_use]
    pub fn new(config: &CompletionConfig, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            provider: config.provider,
            base_url: config.effective_base_url(),
            model: config.model.clone(),
            api_key,
            api_key_env: config.api_key_env.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    /// Returns true if an API key is available.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn send(&self, api_key: &str, prompt: &str) -> Result<String, ServiceError> {
        let base = self.base_url.trim_end_matches('/');
        let request = match self.provider {
            CompletionProvider::Gemini => self
                .client
                .post(format!("{base}/models/{}:generateContent", self.model))
                .query(&[("key", api_key)])
                .json(&GeminiRequest::new(prompt)),
            CompletionProvider::OpenAi => self
                .client
                .post(format!("{base}/chat/completions"))
                .bearer_auth(api_key)
                .json(&ChatRequest::new(&self.model, prompt)),
        };

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::api(ServiceErrorKind::Network, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::api(
                ServiceErrorKind::from_status(status.as_u16()),
                format!("HTTP {status}: {}", body.chars().take(200).collect::<String>()),
            ));
        }

        let text = match self.provider {
            CompletionProvider::Gemini => response
                .json::<GeminiResponse>()
                .await
                .map_err(|e| ServiceError::api(ServiceErrorKind::Other, e.to_string()))?
                .into_text(),
            CompletionProvider::OpenAi => response
                .json::<ChatResponse>()
                .await
                .map_err(|e| ServiceError::api(ServiceErrorKind::Other, e.to_string()))?
                .into_text(),
        };

        text.filter(|t| !t.trim().is_empty())
            .ok_or(ServiceError::EmptyResponse)
    }
}

#[async_trait]
impl CompletionService for HttpCompletionClient {
    #[instrument(skip(self, prompt), fields(provider = %self.provider, model = %self.model, prompt_len = prompt.len()))]
    async fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ServiceError::NotConfigured {
                env_var: self.api_key_env.clone(),
            })?;

        let text = tokio::time::timeout(self.timeout, self.send(api_key, prompt))
            .await
            .map_err(|_| ServiceError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            })??;

        debug!(reply_len = text.len(), "Completion received");
        Ok(text)
    }
}

// ============================================================================
// Gemini wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

impl GeminiRequest {
    fn new(prompt: &str) -> Self {
        Self {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: Some(prompt.to_string()),
                }],
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

impl GeminiResponse {
    fn into_text(self) -> Option<String> {
        let parts = self.candidates.into_iter().next()?.content?.parts;
        let text: String = parts.into_iter().filter_map(|p| p.text).collect();
        Some(text)
    }
}

// ============================================================================
// Chat-completions wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

impl ChatRequest {
    fn new(model: &str, prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

impl ChatResponse {
    fn into_text(self) -> Option<String> {
        self.choices.into_iter().next()?.message.content
    }
}

// ============================================================================
// Scripted service
// ============================================================================

/// Completion service that replays canned replies in order.
///
/// Records every prompt it receives. Once the script runs out it answers
/// with [`ServiceError::EmptyResponse`]. Used for demos and tests.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, ServiceError>>>,
    prompts: Mutex<Vec<String>>,
    latency: Option<Duration>,
}

impl ScriptedCompletion {
    /// Creates a service that returns `replies` in order.
    #[must_use]
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            ..Self::default()
        }
    }

    /// Creates a service from explicit results, including failures.
    #[must_use]
    pub fn from_results(results: impl IntoIterator<Item = Result<String, ServiceError>>) -> Self {
        Self {
            replies: Mutex::new(results.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Delays every reply.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Appends a reply to the script.
    pub fn push(&self, reply: Result<String, ServiceError>) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Prompts received so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Err(ServiceError::EmptyResponse))
    }
}
