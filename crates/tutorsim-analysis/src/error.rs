//! Error types for tutorsim-analysis
//!
//! These never leave the crate through `AnalysisClient`; they exist so the
//! degradation log line says exactly what went wrong.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("model transport error: {0}")]
    Transport(String),

    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned no completion content")]
    EmptyCompletion,

    #[error("model output is not the expected JSON shape: {0}")]
    MalformedPayload(String),

    #[error("understanding level {0} is outside 1..=5")]
    InvalidLevel(i64),

    #[error("model call timed out after {0}s")]
    Timeout(u64),

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        AnalysisError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(err: serde_json::Error) -> Self {
        AnalysisError::MalformedPayload(err.to_string())
    }
}
