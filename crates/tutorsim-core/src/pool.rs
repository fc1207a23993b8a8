//! Concurrency Controller: run every pair with at most K sessions live.
//!
//! Each pair gets its own task; a shared semaphore admits K of them at a
//! time. The permit is owned by the task, so it is released however the
//! task ends, including by panic. A panicked task still yields a failed
//! record, so every pair accounts for exactly one record unless the batch
//! was cancelled before it started.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tracing::{instrument, warn, Instrument};

use crate::batch::BatchState;
use crate::domain::{SimulationRecord, StudentTopicPair};

/// Counts of how each pair's task ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Tasks that produced a record
    pub finished: usize,
    /// Pairs never started because the batch was cancelled
    pub skipped: usize,
    /// Tasks that panicked and were replaced with a failed record
    pub panicked: usize,
}

enum PairRun {
    Finished,
    Skipped,
}

/// Bounded executor for session drivers
#[derive(Debug, Clone, Copy)]
pub struct SessionPool {
    max_concurrent: usize,
}

impl SessionPool {
    /// A pool admitting `max_concurrent` sessions at once (at least one).
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run `driver` once per pair and append every record to `state`.
    ///
    /// `driver` is an async closure `(pair, cancel) -> SimulationRecord`.
    /// Pairs still waiting for a slot when `cancel` flips are skipped.
    #[instrument(
        skip_all,
        fields(
            set_type = %state.set_type(),
            pairs = pairs.len(),
            max_concurrent = self.max_concurrent,
        )
    )]
    pub async fn run<F, Fut>(
        &self,
        pairs: Vec<StudentTopicPair>,
        state: Arc<BatchState>,
        cancel: watch::Receiver<bool>,
        driver: F,
    ) -> PoolReport
    where
        F: Fn(StudentTopicPair, watch::Receiver<bool>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SimulationRecord> + Send + 'static,
    {
        let driver = Arc::new(driver);
        let sem = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = Vec::with_capacity(pairs.len());

        for pair in pairs {
            let driver = Arc::clone(&driver);
            let state = Arc::clone(&state);
            let sem = Arc::clone(&sem);
            let cancel = cancel.clone();
            let task_pair = pair.clone();

            let task = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();

                if *cancel.borrow() {
                    return PairRun::Skipped;
                }

                let record = driver(task_pair, cancel).await;
                state.append(record).await;
                PairRun::Finished
            }
            .in_current_span());

            tasks.push((pair, task));
        }

        let mut report = PoolReport::default();
        for (pair, task) in tasks {
            match task.await {
                Ok(PairRun::Finished) => report.finished += 1,
                Ok(PairRun::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(
                        student_id = %pair.student_id,
                        topic_id = %pair.topic_id,
                        error = %e,
                        "session task did not finish"
                    );
                    report.panicked += 1;
                    state
                        .append(SimulationRecord::failed(
                            &pair.student_id,
                            &pair.topic_id,
                            &pair.topic_name,
                            &format!("session task did not finish: {e}"),
                        ))
                        .await;
                }
            }
        }

        report
    }
}
