//! Text generation through the Anthropic Messages API.
//!
//! The [`Generator`] trait is the seam between the chat turn and the model:
//! it takes a system prompt, prior conversation turns and the assembled user
//! turn, and returns the reply text. [`AnthropicGenerator`] is the production
//! implementation.
//!
//! # Failures
//!
//! | Cause | Error | Retried |
//! |-------|-------|---------|
//! | HTTP 401/403 | [`GenerationError::Authentication`] | no |
//! | HTTP 429, 5xx | [`GenerationError::Api`] | up to `generation.max_retries` |
//! | other HTTP status | [`GenerationError::Api`] | no |
//! | network error, timeout | [`GenerationError::Transport`] | up to `generation.max_retries` |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::GenerationConfig;
use crate::retry::{should_retry_status, RetryPolicy};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One prior turn of the chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation service rejected the API key: {0}")]
    Authentication(String),
    #[error("generation service error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
    #[error("could not reach generation service: {0}")]
    Transport(String),
}

impl GenerationError {
    fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Authentication(_) => false,
            GenerationError::Api { status, .. } => should_retry_status(*status),
            GenerationError::Transport(_) => true,
        }
    }
}

/// Opaque completion service.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        history: &[ChatTurn],
        user_turn: &str,
    ) -> Result<String, GenerationError>;
}

/// [`Generator`] backed by `POST {api_base}/messages`.
pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_key: String,
    config: GenerationConfig,
    retry: RetryPolicy,
}

impl AnthropicGenerator {
    /// Create a generator with the key from `ANTHROPIC_API_KEY`.
    pub fn from_env(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            GenerationError::Authentication("ANTHROPIC_API_KEY environment variable not set".into())
        })?;
        Self::new(config, api_key)
    }

    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            config: config.clone(),
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<String, GenerationError> {
        let url = format!("{}/messages", self.config.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| GenerationError::Transport(e.to_string()))?;
            return parse_reply(&json);
        }

        let body_text = response.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), &body_text))
    }
}

#[async_trait]
impl Generator for AnthropicGenerator {
    async fn generate(
        &self,
        system: &str,
        history: &[ChatTurn],
        user_turn: &str,
    ) -> Result<String, GenerationError> {
        let body = request_body(&self.config, system, history, user_turn);
        let body = &body;
        self.retry
            .run(GenerationError::is_retryable, move |_| self.send_once(body))
            .await
    }
}

/// Classify a non-success response: 401/403 are authentication failures,
/// everything else is an API error carrying the status.
fn status_error(status: u16, body: &str) -> GenerationError {
    let message = error_message(body);
    match status {
        401 | 403 => GenerationError::Authentication(message),
        status => GenerationError::Api { status, message },
    }
}

fn request_body(
    config: &GenerationConfig,
    system: &str,
    history: &[ChatTurn],
    user_turn: &str,
) -> serde_json::Value {
    let mut messages: Vec<serde_json::Value> = history
        .iter()
        .map(|turn| serde_json::json!({"role": turn.role, "content": turn.content}))
        .collect();
    messages.push(serde_json::json!({"role": Role::User, "content": user_turn}));

    serde_json::json!({
        "model": config.model,
        "max_tokens": config.max_tokens,
        "system": system,
        "messages": messages,
    })
}

/// Concatenate the text blocks of a Messages API response.
fn parse_reply(json: &serde_json::Value) -> Result<String, GenerationError> {
    let content = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| GenerationError::Api {
            status: 200,
            message: "response is missing content".to_string(),
        })?;

    Ok(content
        .iter()
        .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

/// `error.message` from an API error body, or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
