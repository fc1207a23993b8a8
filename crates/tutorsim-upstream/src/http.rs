//! HTTP client for the Simulation and Scoring services
//!
//! Both services live behind the same base URL and share the `X-Api-Key`
//! header, so one client implements both traits.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::UpstreamError;
use crate::service::{ScoringService, SimulationService};
use crate::types::{
    ConversationStart, MseRequest, Prediction, SetType, StartConversationRequest, Student,
    StudentList, StudentReply, Topic, TopicList, TutorMessageRequest, TutoringRequest,
};
use crate::Result;

const DEFAULT_BASE_URL: &str = "https://knowunity-agent-olympics-2026-api.vercel.app";

/// Upstream connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the simulation API
    pub base_url: String,
    /// Team API key sent as `X-Api-Key`
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl UpstreamConfig {
    /// Read `TUTOR_API_BASE` and `TUTOR_API_KEY`, keeping defaults for anything unset
    pub fn from_env() -> Self {
        let defaults = Self::default();
        UpstreamConfig {
            base_url: std::env::var("TUTOR_API_BASE").unwrap_or(defaults.base_url),
            api_key: std::env::var("TUTOR_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout_secs: std::env::var("TUTOR_API_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }

    /// Config for a specific server
    pub fn new(base_url: &str) -> Self {
        UpstreamConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Set the API key
    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// reqwest-backed client for the simulation and scoring endpoints
#[derive(Debug, Clone)]
pub struct HttpSimulationClient {
    config: UpstreamConfig,
    http_client: reqwest::Client,
}

impl HttpSimulationClient {
    /// Create a new client
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("tutorsim/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| UpstreamError::ClientBuild(e.to_string()))?;

        Ok(HttpSimulationClient {
            config,
            http_client,
        })
    }

    /// Create a client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(UpstreamConfig::from_env())
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(reqwest::header::ACCEPT, "application/json");
        match &self.config.api_key {
            Some(key) => request.header("X-Api-Key", key),
            None => request,
        }
    }

    /// Send a prepared request and decode a JSON body, mapping non-2xx
    /// responses to `UpstreamError::Status`.
    async fn execute<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(self.config.timeout_secs)
            } else {
                UpstreamError::from(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "upstream rejected request");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl SimulationService for HttpSimulationClient {
    async fn list_students(&self, set_type: SetType) -> Result<Vec<Student>> {
        let request = self
            .http_client
            .get(self.url("/students"))
            .query(&[("set_type", set_type.as_str())]);
        let list: StudentList = self.execute(request).await?;
        debug!(set_type = %set_type, count = list.students.len(), "listed students");
        Ok(list.students)
    }

    async fn list_topics(&self, student_id: &str) -> Result<Vec<Topic>> {
        let request = self
            .http_client
            .get(self.url(&format!("/students/{student_id}/topics")));
        let list: TopicList = self.execute(request).await?;
        debug!(student_id = %student_id, count = list.topics.len(), "listed topics");
        Ok(list.topics)
    }

    async fn start_conversation(
        &self,
        student_id: &str,
        topic_id: &str,
    ) -> Result<ConversationStart> {
        let body = StartConversationRequest {
            student_id: student_id.to_string(),
            topic_id: topic_id.to_string(),
        };
        let request = self.http_client.post(self.url("/interact/start")).json(&body);
        self.execute(request).await
    }

    async fn send_tutor_message(&self, conversation_id: &str, text: &str) -> Result<StudentReply> {
        let body = TutorMessageRequest {
            conversation_id: conversation_id.to_string(),
            tutor_message: text.to_string(),
        };
        let request = self.http_client.post(self.url("/interact")).json(&body);
        self.execute(request).await
    }
}

#[async_trait]
impl ScoringService for HttpSimulationClient {
    async fn evaluate_mse(
        &self,
        predictions: &[Prediction],
        set_type: SetType,
    ) -> Result<serde_json::Value> {
        let body = MseRequest {
            predictions: predictions.to_vec(),
            set_type,
        };
        let request = self.http_client.post(self.url("/evaluate/mse")).json(&body);
        self.execute(request).await
    }

    async fn evaluate_tutoring(&self, set_type: SetType) -> Result<serde_json::Value> {
        let body = TutoringRequest { set_type };
        let request = self
            .http_client
            .post(self.url("/evaluate/tutoring"))
            .json(&body);
        self.execute(request).await
    }
}
