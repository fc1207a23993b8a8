//! Result Aggregator / Submitter.
//!
//! Turns a completed batch into one prediction per record and forwards it
//! to the scoring service. Scoring failures are returned as they are; there
//! is no retry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tutorsim_upstream::{Prediction, ScoringService, SetType};

use crate::batch::BatchState;
use crate::domain::{BatchStatus, SimulationRecord};
use crate::error::{Result, SimulatorError};
use crate::obs;

/// Both raw scoring responses for one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub set_type: SetType,
    pub prediction_count: usize,
    pub mse_result: serde_json::Value,
    pub tutoring_result: serde_json::Value,
}

pub struct Submitter {
    scoring: Arc<dyn ScoringService>,
}

impl Submitter {
    pub fn new(scoring: Arc<dyn ScoringService>) -> Self {
        Self { scoring }
    }

    /// One prediction per record, in record order.
    pub fn predictions(records: &[SimulationRecord]) -> Vec<Prediction> {
        records.iter().map(SimulationRecord::prediction).collect()
    }

    /// Fail with `BatchNotReady` unless `status` is completed.
    pub fn ensure_ready(set_type: SetType, status: BatchStatus) -> Result<()> {
        if status == BatchStatus::Completed {
            Ok(())
        } else {
            Err(SimulatorError::BatchNotReady { set_type, status })
        }
    }

    /// Submit a completed batch: predictions first, then the tutoring score.
    pub async fn submit(&self, state: &BatchState) -> Result<SubmissionResult> {
        let snapshot = state.snapshot().await;
        Self::ensure_ready(snapshot.set_type, snapshot.status)?;

        let predictions = Self::predictions(&snapshot.records);
        let mse_result = self
            .scoring
            .evaluate_mse(&predictions, snapshot.set_type)
            .await
            .map_err(SimulatorError::Scoring)?;
        let tutoring_result = self
            .scoring
            .evaluate_tutoring(snapshot.set_type)
            .await
            .map_err(SimulatorError::Scoring)?;

        obs::emit_submission_completed(snapshot.set_type, predictions.len());

        Ok(SubmissionResult {
            set_type: snapshot.set_type,
            prediction_count: predictions.len(),
            mse_result,
            tutoring_result,
        })
    }
}
