//! Shared per-batch state.
//!
//! `BatchState` is the single place session records are collected. Appends
//! from concurrently running sessions are serialised by one internal lock;
//! status changes are also broadcast on a watch channel so waiters do not
//! have to poll.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tracing::warn;
use tutorsim_upstream::SetType;
use uuid::Uuid;

use crate::domain::{progress_percent, BatchStatus, BatchStatusReport, SimulationRecord};

struct BatchInner {
    status: BatchStatus,
    records: Vec<SimulationRecord>,
    keys: HashSet<(String, String)>,
    finished_at: Option<DateTime<Utc>>,
}

/// Records and lifecycle for one batch of one set type
pub struct BatchState {
    batch_id: Uuid,
    set_type: SetType,
    total_expected: usize,
    started_at: DateTime<Utc>,
    inner: Mutex<BatchInner>,
    status_tx: watch::Sender<BatchStatus>,
}

/// Consistent copy of a batch taken under one lock
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    pub batch_id: Uuid,
    pub set_type: SetType,
    pub status: BatchStatus,
    pub total_expected: usize,
    pub records: Vec<SimulationRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchState {
    /// A new batch, already in progress with no records.
    pub fn new(set_type: SetType, total_expected: usize) -> Self {
        let (status_tx, _) = watch::channel(BatchStatus::InProgress);
        Self {
            batch_id: Uuid::new_v4(),
            set_type,
            total_expected,
            started_at: Utc::now(),
            inner: Mutex::new(BatchInner {
                status: BatchStatus::InProgress,
                records: Vec::with_capacity(total_expected),
                keys: HashSet::with_capacity(total_expected),
                finished_at: None,
            }),
            status_tx,
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn set_type(&self) -> SetType {
        self.set_type
    }

    pub fn total_expected(&self) -> usize {
        self.total_expected
    }

    /// Append a finished pair's record.
    ///
    /// Returns `false` and drops the record when the pair already has one,
    /// when the batch is full, or when the batch is already terminal.
    pub async fn append(&self, record: SimulationRecord) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.status.is_terminal() {
            warn!(
                set_type = %self.set_type,
                student_id = %record.student_id,
                topic_id = %record.topic_id,
                "record arrived after batch finished"
            );
            return false;
        }
        if inner.records.len() >= self.total_expected || !inner.keys.insert(record.key()) {
            warn!(
                set_type = %self.set_type,
                student_id = %record.student_id,
                topic_id = %record.topic_id,
                "duplicate or surplus record rejected"
            );
            return false;
        }
        inner.records.push(record);
        true
    }

    /// Move to a terminal status. Only the first call has any effect.
    ///
    /// The batch is `Cancelled` when cancellation was requested and some
    /// pairs never produced a record; otherwise it is `Completed`.
    pub async fn finish(&self, cancel_requested: bool) -> BatchStatus {
        let mut inner = self.inner.lock().await;
        if inner.status.is_terminal() {
            return inner.status;
        }
        inner.status = if cancel_requested && inner.records.len() < self.total_expected {
            BatchStatus::Cancelled
        } else {
            BatchStatus::Completed
        };
        inner.finished_at = Some(Utc::now());
        self.status_tx.send_replace(inner.status);
        inner.status
    }

    pub async fn status(&self) -> BatchStatus {
        self.inner.lock().await.status
    }

    /// Status, counts and progress as one consistent view.
    pub async fn report(&self) -> BatchStatusReport {
        let inner = self.inner.lock().await;
        let completed_count = inner.records.len();
        BatchStatusReport {
            set_type: self.set_type,
            status: inner.status,
            completed_count,
            failed_count: inner.records.iter().filter(|r| r.is_failure()).count(),
            total_expected: self.total_expected,
            progress_percent: progress_percent(inner.status, completed_count, self.total_expected),
        }
    }

    pub async fn records(&self) -> Vec<SimulationRecord> {
        self.inner.lock().await.records.clone()
    }

    pub async fn snapshot(&self) -> BatchSnapshot {
        let inner = self.inner.lock().await;
        BatchSnapshot {
            batch_id: self.batch_id,
            set_type: self.set_type,
            status: inner.status,
            total_expected: self.total_expected,
            records: inner.records.clone(),
            started_at: self.started_at,
            finished_at: inner.finished_at,
        }
    }

    /// Watch the batch status.
    pub fn subscribe(&self) -> watch::Receiver<BatchStatus> {
        self.status_tx.subscribe()
    }

    /// Resolve once the batch is terminal, returning that status.
    pub async fn wait_terminal(&self) -> BatchStatus {
        let mut rx = self.subscribe();
        let terminal = rx.wait_for(|status| status.is_terminal()).await.map(|s| *s);
        match terminal {
            Ok(status) => status,
            Err(_) => self.status().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(student: &str, topic: &str) -> SimulationRecord {
        SimulationRecord::failed(student, topic, "Topic", "n/a")
    }

    #[tokio::test]
    async fn test_new_batch_is_in_progress_and_empty() {
        let state = BatchState::new(SetType::Dev, 3);
        let report = state.report().await;
        assert_eq!(report.status, BatchStatus::InProgress);
        assert_eq!(report.completed_count, 0);
        assert_eq!(report.total_expected, 3);
        assert_eq!(report.progress_percent, 0.0);
    }

    #[tokio::test]
    async fn test_duplicate_pairs_rejected() {
        let state = BatchState::new(SetType::Dev, 3);
        assert!(state.append(record("s1", "t1")).await);
        assert!(!state.append(record("s1", "t1")).await);
        assert!(state.append(record("s1", "t2")).await);
        assert_eq!(state.records().await.len(), 2);
    }

    #[tokio::test]
    async fn test_never_exceeds_total_expected() {
        let state = BatchState::new(SetType::Dev, 1);
        assert!(state.append(record("s1", "t1")).await);
        assert!(!state.append(record("s2", "t1")).await);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let state = Arc::new(BatchState::new(SetType::Eval, 50));
        let mut handles = Vec::new();
        for i in 0..50 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                state.append(record(&format!("s{i}"), "t1")).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(state.report().await.completed_count, 50);
    }

    #[tokio::test]
    async fn test_finish_is_one_shot() {
        let state = BatchState::new(SetType::Dev, 1);
        state.append(record("s1", "t1")).await;
        assert_eq!(state.finish(false).await, BatchStatus::Completed);
        assert_eq!(state.finish(true).await, BatchStatus::Completed);
        assert!(!state.append(record("s2", "t1")).await);

        let report = state.report().await;
        assert_eq!(report.progress_percent, 100.0);
        assert_eq!(report.failed_count, 1);
        assert!(state.snapshot().await.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_with_missing_records() {
        let state = BatchState::new(SetType::Dev, 2);
        state.append(record("s1", "t1")).await;
        assert_eq!(state.finish(true).await, BatchStatus::Cancelled);
        let report = state.report().await;
        assert_eq!(report.progress_percent, 50.0);
    }

    #[tokio::test]
    async fn test_cancel_after_everything_finished_still_completes() {
        let state = BatchState::new(SetType::Dev, 1);
        state.append(record("s1", "t1")).await;
        assert_eq!(state.finish(true).await, BatchStatus::Completed);
    }

    #[tokio::test]
    async fn test_wait_terminal_resolves_on_finish() {
        let state = Arc::new(BatchState::new(SetType::MiniDev, 0));
        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.wait_terminal().await })
        };
        tokio::task::yield_now().await;
        state.finish(false).await;
        assert_eq!(waiter.await.unwrap(), BatchStatus::Completed);
    }
}
