//! Scripted chat model (testing only)
//!
//! `ScriptedChatModel` answers each request from the first rule whose
//! purpose matches and whose needle occurs in the prompt, falling back to a
//! well-formed default for the purpose. Every request is recorded.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AnalysisError;
use crate::model::{CallPurpose, ChatModel, ChatRequest};

const DEFAULT_ANALYSIS: &str =
    r#"{"understanding_level": 3, "justification": "scripted default", "evidence": []}"#;
const DEFAULT_SUGGESTION: &str =
    r#"{"suggested_response": "Tell me more about how you got that.", "strategy_note": "scripted default"}"#;

#[derive(Debug, Clone)]
struct Rule {
    purpose: CallPurpose,
    needle: String,
    reply: Result<String, AnalysisError>,
}

#[derive(Debug, Default)]
pub struct ScriptedChatModel {
    rules: Vec<Rule>,
    always_fail: Option<AnalysisError>,
    latency: Duration,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A model whose every call fails with `err`
    pub fn failing(err: AnalysisError) -> Self {
        Self {
            always_fail: Some(err),
            ..Self::default()
        }
    }

    /// Answer analysis prompts containing `needle` with `content`
    pub fn with_analysis(self, needle: &str, content: &str) -> Self {
        self.with_rule(CallPurpose::Analysis, needle, Ok(content.to_string()))
    }

    /// Answer suggestion prompts containing `needle` with `content`
    pub fn with_suggestion(self, needle: &str, content: &str) -> Self {
        self.with_rule(CallPurpose::Suggestion, needle, Ok(content.to_string()))
    }

    /// Fail prompts of `purpose` containing `needle`
    pub fn failing_when(self, purpose: CallPurpose, needle: &str, err: AnalysisError) -> Self {
        self.with_rule(purpose, needle, Err(err))
    }

    fn with_rule(
        mut self,
        purpose: CallPurpose,
        needle: &str,
        reply: Result<String, AnalysisError>,
    ) -> Self {
        self.rules.push(Rule {
            purpose,
            needle: needle.to_string(),
            reply,
        });
        self
    }

    /// Delay every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn log(&self) -> MutexGuard<'_, Vec<ChatRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests received so far, in arrival order
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.log().clone()
    }

    /// Requests of one purpose received so far
    pub fn requests_for(&self, purpose: CallPurpose) -> Vec<ChatRequest> {
        self.log()
            .iter()
            .filter(|r| r.purpose == purpose)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn complete(&self, request: &ChatRequest) -> Result<String, AnalysisError> {
        self.log().push(request.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(err) = &self.always_fail {
            return Err(err.clone());
        }

        let text = request.text();
        let rule = self
            .rules
            .iter()
            .find(|r| r.purpose == request.purpose && text.contains(&r.needle));

        match rule {
            Some(rule) => rule.reply.clone(),
            None => Ok(match request.purpose {
                CallPurpose::Analysis => DEFAULT_ANALYSIS.to_string(),
                CallPurpose::Suggestion => DEFAULT_SUGGESTION.to_string(),
            }),
        }
    }
}
