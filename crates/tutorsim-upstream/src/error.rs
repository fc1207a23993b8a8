//! Error types for tutorsim-upstream

use thiserror::Error;

/// Errors raised by the Simulation and Scoring services
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// The service answered with a non-success status
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// The response body did not match the expected shape
    #[error("upstream response could not be decoded: {0}")]
    Decode(String),

    /// The call exceeded its time budget
    #[error("upstream call timed out after {0}s")]
    Timeout(u64),

    /// The HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// A value could not be parsed into a known set type
    #[error("unknown set type: {0}")]
    UnknownSetType(String),
}

impl UpstreamError {
    /// HTTP status carried by the error, if the service answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            UpstreamError::Decode(err.to_string())
        } else if err.is_timeout() {
            UpstreamError::Transport(format!("timeout: {err}"))
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        UpstreamError::Decode(err.to_string())
    }
}
