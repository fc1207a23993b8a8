//! Understanding analysis and next-step suggestion.
//!
//! Both calls go through [`AnalysisClient::best_effort`], the one place
//! where model failures are caught. Callers always get a value back: a
//! transport error, a timeout, or unusable output turns into the typed
//! fallback for that call and a `warn!` line, never an `Err`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AnalysisError;
use crate::model::{CallPurpose, ChatModel, ChatRequest};
use crate::payload::{AnalysisResult, StructuredOutput, SuggestionResult, UnderstandingLevel};
use crate::prompts::{analysis_prompt, suggestion_prompt};
use crate::transcript::Transcript;

/// Sampling and time budget for the two calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Temperature for level inference; kept at 0 so reruns agree
    pub analysis_temperature: f32,
    /// Temperature for suggestions
    pub suggestion_temperature: f32,
    /// Upper bound on a single model call
    pub call_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            analysis_temperature: 0.0,
            suggestion_temperature: 0.7,
            call_timeout_secs: 30,
        }
    }
}

/// Structured-output analysis over any [`ChatModel`].
pub struct AnalysisClient {
    model: Arc<dyn ChatModel>,
    config: AnalysisConfig,
    degraded_calls: AtomicU64,
}

impl AnalysisClient {
    pub fn new(model: Arc<dyn ChatModel>, config: AnalysisConfig) -> Self {
        Self {
            model,
            config,
            degraded_calls: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Number of calls that fell back since this client was created.
    pub fn degraded_calls(&self) -> u64 {
        self.degraded_calls.load(Ordering::Relaxed)
    }

    /// Infer the student's understanding level from the whole transcript.
    ///
    /// Never fails: any model problem yields level 3 with the error in the
    /// justification.
    pub async fn analyze_understanding(
        &self,
        transcript: &Transcript,
        topic_name: &str,
    ) -> AnalysisResult {
        let request = ChatRequest::new(
            CallPurpose::Analysis,
            analysis_prompt(transcript, topic_name),
            self.config.analysis_temperature,
        );
        self.best_effort(request, |err| AnalysisResult::fallback(&err.to_string()))
            .await
    }

    /// Suggest the next tutor message for the given level and last reply.
    ///
    /// Never fails: any model problem yields a generic follow-up question.
    pub async fn suggest_next_step(
        &self,
        level: UnderstandingLevel,
        topic_name: &str,
        last_student_reply: &str,
    ) -> SuggestionResult {
        let request = ChatRequest::new(
            CallPurpose::Suggestion,
            suggestion_prompt(level, topic_name, last_student_reply),
            self.config.suggestion_temperature,
        );
        self.best_effort(request, |err| SuggestionResult::fallback(&err.to_string()))
            .await
    }

    /// Run one model call under the time budget and parse its output,
    /// substituting `fallback` on any failure.
    async fn best_effort<T, F>(&self, request: ChatRequest, fallback: F) -> T
    where
        T: StructuredOutput,
        F: FnOnce(&AnalysisError) -> T,
    {
        match self.structured_call(&request).await {
            Ok(value) => value,
            Err(err) => {
                self.degraded_calls.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event = "analysis.degraded",
                    purpose = %request.purpose,
                    error = %err,
                    "model call failed, using fallback"
                );
                fallback(&err)
            }
        }
    }

    async fn structured_call<T: StructuredOutput>(
        &self,
        request: &ChatRequest,
    ) -> Result<T, AnalysisError> {
        let budget = Duration::from_secs(self.config.call_timeout_secs);
        let content = tokio::time::timeout(budget, self.model.complete(request))
            .await
            .map_err(|_| AnalysisError::Timeout(self.config.call_timeout_secs))??;
        debug!(purpose = %request.purpose, bytes = content.len(), "parsing model output");
        T::parse(&content)
    }
}
