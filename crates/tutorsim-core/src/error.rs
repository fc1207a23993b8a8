use thiserror::Error;
use tutorsim_analysis::AnalysisError;
use tutorsim_upstream::{SetType, UpstreamError};

use crate::domain::BatchStatus;

#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error("simulation service error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("scoring service error: {0}")]
    Scoring(UpstreamError),

    #[error("batch for set type {set_type} is not ready for submission (status: {status})")]
    BatchNotReady {
        set_type: SetType,
        status: BatchStatus,
    },

    #[error("a batch for set type {0} is already in progress")]
    BatchAlreadyRunning(SetType),

    #[error("model client error: {0}")]
    Model(#[from] AnalysisError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for SimulatorError {
    fn from(err: toml::de::Error) -> Self {
        SimulatorError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SimulatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_message_names_status() {
        let err = SimulatorError::BatchNotReady {
            set_type: SetType::Dev,
            status: BatchStatus::InProgress,
        };
        assert_eq!(
            err.to_string(),
            "batch for set type dev is not ready for submission (status: in_progress)"
        );
    }

    #[test]
    fn test_scoring_error_keeps_upstream_body() {
        let err = SimulatorError::Scoring(UpstreamError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        });
        assert!(err.to_string().contains("bad gateway"));
    }
}
