//! Batch lifecycle status.

use std::fmt;

use serde::{Deserialize, Serialize};
use tutorsim_upstream::SetType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    NotStarted,
    InProgress,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Cancelled)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::NotStarted => "not_started",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Completed => "completed",
            BatchStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a batch for status polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusReport {
    pub set_type: SetType,
    pub status: BatchStatus,
    pub completed_count: usize,
    pub failed_count: usize,
    pub total_expected: usize,
    pub progress_percent: f64,
}

impl BatchStatusReport {
    pub fn not_started(set_type: SetType) -> Self {
        Self {
            set_type,
            status: BatchStatus::NotStarted,
            completed_count: 0,
            failed_count: 0,
            total_expected: 0,
            progress_percent: 0.0,
        }
    }
}

/// Share of finished pairs, rounded to two decimals.
///
/// Exactly 100 when the batch is completed and strictly below 100 otherwise.
pub fn progress_percent(status: BatchStatus, completed: usize, total: usize) -> f64 {
    if status == BatchStatus::Completed {
        return 100.0;
    }
    if total == 0 {
        return 0.0;
    }
    let pct = (completed as f64 / total as f64 * 100.0 * 100.0).round() / 100.0;
    pct.min(99.99)
}
