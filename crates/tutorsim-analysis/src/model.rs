//! Chat-completion model access.
//!
//! `ChatModel` is the seam between prompt construction and the network.
//! `OpenAiChatModel` speaks the OpenAI-compatible `/chat/completions`
//! protocol with JSON-object response mode, which covers hosted models as
//! well as self-hosted gateways.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AnalysisError;

/// Which of the two structured calls a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPurpose {
    Analysis,
    Suggestion,
}

impl fmt::Display for CallPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallPurpose::Analysis => f.write_str("analysis"),
            CallPurpose::Suggestion => f.write_str("suggestion"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A structured-output chat request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub purpose: CallPurpose,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(purpose: CallPurpose, prompt: String, temperature: f32) -> Self {
        Self {
            purpose,
            messages: vec![ChatMessage::user(prompt)],
            temperature,
        }
    }

    /// Concatenated message text, mostly for matching in tests.
    pub fn text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A language model that returns the raw text of a JSON-mode completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, AnalysisError>;
}

/// Connection settings for an OpenAI-compatible endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatModelConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ChatModelConfig {
    fn default() -> Self {
        ChatModelConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-5-nano".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ChatModelConfig {
    /// Read `LLM_API_BASE`, `LLM_API_KEY` (or `OPENAI_API_KEY`) and `TUTORSIM_MODEL`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        ChatModelConfig {
            base_url: std::env::var("LLM_API_BASE").unwrap_or(defaults.base_url),
            api_key: std::env::var("LLM_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok()
                .filter(|k| !k.is_empty()),
            model: std::env::var("TUTORSIM_MODEL").unwrap_or(defaults.model),
            timeout_secs: defaults.timeout_secs,
        }
    }

    pub fn new(base_url: &str, model: &str) -> Self {
        ChatModelConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// reqwest client for `/chat/completions`
#[derive(Debug, Clone)]
pub struct OpenAiChatModel {
    config: ChatModelConfig,
    http_client: reqwest::Client,
}

impl OpenAiChatModel {
    pub fn new(config: ChatModelConfig) -> Result<Self, AnalysisError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("tutorsim-analysis/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| AnalysisError::ClientBuild(e.to_string()))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &ChatModelConfig {
        &self.config
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, request: &ChatRequest) -> Result<String, AnalysisError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = CompletionBody {
            model: &self.config.model,
            messages: &request.messages,
            temperature: request.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut builder = self.http_client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AnalysisError::Timeout(self.config.timeout_secs)
            } else {
                AnalysisError::from(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let completion: CompletionResponse = response.json().await?;
        debug!(purpose = %request.purpose, model = %self.config.model, "completion received");

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(AnalysisError::EmptyCompletion)
    }
}
