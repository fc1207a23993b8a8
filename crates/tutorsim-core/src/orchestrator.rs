//! Batch Orchestrator.
//!
//! Owns one [`BatchState`] per set type. `launch_batch` discovers every
//! (student, topic) pair, opens its conversation, and hands the pairs to a
//! [`SessionPool`] running in the background; the call returns as soon as
//! the batch is registered so callers can poll `get_status`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;

use futures::future::try_join_all;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn, Instrument};
use tutorsim_analysis::{AnalysisClient, OpenAiChatModel, Transcript};
use tutorsim_upstream::{
    ConversationStart, HttpSimulationClient, ScoringService, SetType, SimulationService, Student,
    StudentReply, Topic,
};
use uuid::Uuid;

use crate::batch::{BatchSnapshot, BatchState};
use crate::config::{BatchConfig, SimulatorConfig};
use crate::domain::{BatchStatus, BatchStatusReport, SimulationRecord, StudentTopicPair};
use crate::error::{Result, SimulatorError};
use crate::metrics::METRICS;
use crate::obs::{self, BatchSpan};
use crate::pool::SessionPool;
use crate::session::{SessionDriver, TurnOutcome};
use crate::submit::{SubmissionResult, Submitter};

/// Returned by `launch_batch` once the batch is running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchReceipt {
    pub batch_id: Uuid,
    pub set_type: SetType,
    /// Pairs the batch will produce records for
    pub pair_count: usize,
    /// Pairs whose conversation could not be opened; already recorded as failed
    pub failed_starts: usize,
}

/// Pairs found for a set type
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub pairs: Vec<StudentTopicPair>,
    pub failed: Vec<SimulationRecord>,
}

impl Discovery {
    pub fn total(&self) -> usize {
        self.pairs.len() + self.failed.len()
    }
}

struct BatchEntry {
    state: Arc<BatchState>,
    cancel: watch::Sender<bool>,
}

/// Claim on a set type while its batch is being discovered. Released on drop.
struct LaunchReservation<'a> {
    launching: &'a StdMutex<HashSet<SetType>>,
    set_type: SetType,
}

impl Drop for LaunchReservation<'_> {
    fn drop(&mut self) {
        self.launching
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.set_type);
    }
}

pub struct BatchOrchestrator {
    simulation: Arc<dyn SimulationService>,
    driver: SessionDriver,
    submitter: Submitter,
    config: BatchConfig,
    batches: Mutex<HashMap<SetType, BatchEntry>>,
    launching: StdMutex<HashSet<SetType>>,
}

impl BatchOrchestrator {
    pub fn new(
        simulation: Arc<dyn SimulationService>,
        scoring: Arc<dyn ScoringService>,
        analysis: Arc<AnalysisClient>,
        config: BatchConfig,
    ) -> Self {
        let driver = SessionDriver::new(Arc::clone(&simulation), analysis, config.turn_timeout());
        Self {
            simulation,
            driver,
            submitter: Submitter::new(scoring),
            config,
            batches: Mutex::new(HashMap::new()),
            launching: StdMutex::new(HashSet::new()),
        }
    }

    /// Wire the HTTP simulation client and an OpenAI-compatible model.
    pub fn from_config(config: &SimulatorConfig) -> Result<Self> {
        let http = Arc::new(HttpSimulationClient::new(config.upstream.clone())?);
        let model = Arc::new(OpenAiChatModel::new(config.model.clone())?);
        let analysis = Arc::new(AnalysisClient::new(model, config.analysis.clone()));
        Ok(Self::new(http.clone(), http, analysis, config.batch.clone()))
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Find every pair in `set_type` and open its conversation.
    ///
    /// Roster failures abort discovery. A pair whose conversation cannot be
    /// opened becomes a failed record instead of a pair.
    pub async fn discover(&self, set_type: SetType) -> Result<Discovery> {
        let students = self.simulation.list_students(set_type).await?;
        let topic_lists =
            try_join_all(students.iter().map(|s| self.simulation.list_topics(&s.id))).await?;

        let candidates: Vec<(&Student, &Topic)> = students
            .iter()
            .zip(topic_lists.iter())
            .flat_map(|(student, topics)| topics.iter().map(move |topic| (student, topic)))
            .collect();

        let starts: Vec<_> = stream::iter(candidates)
            .map(|(student, topic)| async move {
                let start = self.simulation.start_conversation(&student.id, &topic.id).await;
                (student, topic, start)
            })
            .buffered(self.config.max_concurrent_sessions.max(1))
            .collect()
            .await;

        let mut discovery = Discovery::default();
        for (student, topic, start) in starts {
            match start {
                Ok(start) => discovery.pairs.push(StudentTopicPair::from_start(
                    student,
                    topic,
                    start,
                    self.config.default_max_turns,
                )),
                Err(e) => {
                    warn!(
                        student_id = %student.id,
                        topic_id = %topic.id,
                        error = %e,
                        "could not open conversation"
                    );
                    discovery.failed.push(SimulationRecord::failed(
                        &student.id,
                        &topic.id,
                        &topic.name,
                        &e.to_string(),
                    ));
                }
            }
        }

        info!(
            set_type = %set_type,
            students = students.len(),
            pairs = discovery.pairs.len(),
            failed_starts = discovery.failed.len(),
            "discovery finished"
        );
        Ok(discovery)
    }

    /// Discover `set_type` and start its batch in the background.
    ///
    /// Fails with `BatchAlreadyRunning` while a batch for the same set type
    /// is in progress or being discovered; a finished batch is replaced.
    pub async fn launch_batch(&self, set_type: SetType) -> Result<LaunchReceipt> {
        let reservation = self.reserve(set_type).await?;

        let Discovery { pairs, failed } = self.discover(set_type).await?;
        let failed_starts = failed.len();
        let state = Arc::new(BatchState::new(set_type, pairs.len() + failed_starts));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        self.batches.lock().await.insert(
            set_type,
            BatchEntry {
                state: Arc::clone(&state),
                cancel: cancel_tx,
            },
        );
        drop(reservation);

        for record in failed {
            state.append(record).await;
        }

        let receipt = LaunchReceipt {
            batch_id: state.batch_id(),
            set_type,
            pair_count: state.total_expected(),
            failed_starts,
        };
        obs::emit_batch_launched(set_type, &receipt.batch_id.to_string(), receipt.pair_count);

        let span = BatchSpan::new(set_type, &receipt.batch_id.to_string()).span();
        let pool = SessionPool::new(self.config.max_concurrent_sessions);
        tokio::spawn(
            run_batch(self.driver.clone(), pool, state, cancel_rx, pairs).instrument(span),
        );

        Ok(receipt)
    }

    /// Claim `set_type` for discovery. The registry lock is held while
    /// checking, so two launches cannot both pass.
    async fn reserve(&self, set_type: SetType) -> Result<LaunchReservation<'_>> {
        let batches = self.batches.lock().await;
        if let Some(entry) = batches.get(&set_type) {
            if !entry.state.status().await.is_terminal() {
                return Err(SimulatorError::BatchAlreadyRunning(set_type));
            }
        }

        let mut launching = self.launching.lock().unwrap_or_else(PoisonError::into_inner);
        if !launching.insert(set_type) {
            return Err(SimulatorError::BatchAlreadyRunning(set_type));
        }
        Ok(LaunchReservation {
            launching: &self.launching,
            set_type,
        })
    }

    async fn state(&self, set_type: SetType) -> Option<Arc<BatchState>> {
        self.batches
            .lock()
            .await
            .get(&set_type)
            .map(|entry| Arc::clone(&entry.state))
    }

    /// Status, counts and progress for `set_type`. Read-only.
    pub async fn get_status(&self, set_type: SetType) -> BatchStatusReport {
        match self.state(set_type).await {
            Some(state) => state.report().await,
            None => BatchStatusReport::not_started(set_type),
        }
    }

    /// Records collected so far, in completion order.
    pub async fn records(&self, set_type: SetType) -> Vec<SimulationRecord> {
        match self.state(set_type).await {
            Some(state) => state.records().await,
            None => Vec::new(),
        }
    }

    pub async fn snapshot(&self, set_type: SetType) -> Option<BatchSnapshot> {
        match self.state(set_type).await {
            Some(state) => Some(state.snapshot().await),
            None => None,
        }
    }

    /// Ask a running batch to stop. Sessions finish their current turn;
    /// pairs not yet started are skipped. Returns `false` when there is
    /// nothing running to cancel.
    pub async fn cancel(&self, set_type: SetType) -> bool {
        let batches = self.batches.lock().await;
        let Some(entry) = batches.get(&set_type) else {
            return false;
        };
        if entry.state.status().await.is_terminal() {
            return false;
        }
        entry.cancel.send_replace(true);
        obs::emit_batch_cancel_requested(set_type);
        true
    }

    /// Wait until the batch for `set_type` is terminal.
    pub async fn wait_for_completion(&self, set_type: SetType) -> BatchStatus {
        match self.state(set_type).await {
            Some(state) => state.wait_terminal().await,
            None => BatchStatus::NotStarted,
        }
    }

    /// Submit a completed batch for scoring.
    ///
    /// Fails with `BatchNotReady`, without any network call, unless the
    /// batch for `set_type` is completed.
    pub async fn submit(&self, set_type: SetType) -> Result<SubmissionResult> {
        match self.state(set_type).await {
            Some(state) => self.submitter.submit(&state).await,
            None => Err(SimulatorError::BatchNotReady {
                set_type,
                status: BatchStatus::NotStarted,
            }),
        }
    }

    pub async fn list_students(&self, set_type: SetType) -> Result<Vec<Student>> {
        Ok(self.simulation.list_students(set_type).await?)
    }

    pub async fn list_topics(&self, student_id: &str) -> Result<Vec<Topic>> {
        Ok(self.simulation.list_topics(student_id).await?)
    }

    pub async fn start_conversation(
        &self,
        student_id: &str,
        topic_id: &str,
    ) -> Result<ConversationStart> {
        Ok(self.simulation.start_conversation(student_id, topic_id).await?)
    }

    pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<StudentReply> {
        Ok(self.simulation.send_tutor_message(conversation_id, text).await?)
    }

    /// One assessed turn on a conversation the caller drives.
    pub async fn interact(
        &self,
        conversation_id: &str,
        topic_name: &str,
        tutor_message: &str,
        transcript: &mut Transcript,
    ) -> Result<TurnOutcome> {
        Ok(self
            .driver
            .take_turn(conversation_id, topic_name, tutor_message, transcript)
            .await?)
    }
}

async fn run_batch(
    driver: SessionDriver,
    pool: SessionPool,
    state: Arc<BatchState>,
    cancel: watch::Receiver<bool>,
    pairs: Vec<StudentTopicPair>,
) {
    let started = Instant::now();
    let driver = Arc::new(driver);

    let report = pool
        .run(pairs, Arc::clone(&state), cancel.clone(), move |pair, cancel| {
            let driver = Arc::clone(&driver);
            async move { driver.run(&pair, &cancel).await.record }
        })
        .await;

    let cancel_requested = *cancel.borrow();
    let status = state.finish(cancel_requested).await;
    if status == BatchStatus::Completed {
        METRICS.inc_batches_completed();
    }

    let summary = state.report().await;
    obs::emit_batch_finished(
        state.set_type(),
        status,
        summary.completed_count,
        summary.failed_count,
        summary.total_expected,
        started.elapsed().as_millis() as u64,
    );
    if report.panicked > 0 || report.skipped > 0 {
        warn!(
            panicked = report.panicked,
            skipped = report.skipped,
            "batch finished with sessions that did not run to completion"
        );
    }
    METRICS.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutorsim_analysis::fakes::ScriptedChatModel;
    use tutorsim_analysis::AnalysisConfig;
    use tutorsim_upstream::fakes::{conversation_id_for, ScriptedSimulation};
    use tutorsim_upstream::UpstreamError;

    fn orchestrator(sim: Arc<ScriptedSimulation>) -> BatchOrchestrator {
        let analysis = Arc::new(AnalysisClient::new(
            Arc::new(ScriptedChatModel::new()),
            AnalysisConfig::default(),
        ));
        BatchOrchestrator::new(sim.clone(), sim, analysis, BatchConfig::default())
    }

    fn roster() -> ScriptedSimulation {
        ScriptedSimulation::new()
            .with_student(
                Student::new("s1", "Ada"),
                vec![Topic::new("t1", "Fractions"), Topic::new("t2", "Algebra")],
            )
            .with_student(Student::new("s2", "Brook"), vec![Topic::new("t1", "Fractions")])
    }

    #[tokio::test]
    async fn test_discovery_opens_every_pair() {
        let sim = Arc::new(roster().with_default_max_turns(None));
        let discovery = orchestrator(sim).discover(SetType::Dev).await.unwrap();

        assert_eq!(discovery.total(), 3);
        assert!(discovery.failed.is_empty());
        assert!(discovery.pairs.iter().all(|p| p.max_turns == 5));
        assert_eq!(discovery.pairs[2].conversation_id, conversation_id_for("s2", "t1"));
    }

    #[tokio::test]
    async fn test_failed_start_becomes_failed_record() {
        let sim = Arc::new(roster().fail_start("s1", "t2"));
        let discovery = orchestrator(sim).discover(SetType::Dev).await.unwrap();

        assert_eq!(discovery.pairs.len(), 2);
        assert_eq!(discovery.failed.len(), 1);
        assert_eq!(discovery.failed[0].topic_id, "t2");
        assert!(discovery.failed[0].justification.contains("429"));
    }

    #[tokio::test]
    async fn test_reservation_blocks_second_launch_until_dropped() {
        let orch = orchestrator(Arc::new(roster()));
        let claim = orch.reserve(SetType::Dev).await.unwrap();
        assert!(matches!(
            orch.reserve(SetType::Dev).await,
            Err(SimulatorError::BatchAlreadyRunning(SetType::Dev))
        ));
        assert!(orch.reserve(SetType::Eval).await.is_ok());

        drop(claim);
        assert!(orch.reserve(SetType::Dev).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_set_is_not_started() {
        let orch = orchestrator(Arc::new(roster()));
        let report = orch.get_status(SetType::Eval).await;
        assert_eq!(report.status, BatchStatus::NotStarted);
        assert!(orch.records(SetType::Eval).await.is_empty());
        assert!(!orch.cancel(SetType::Eval).await);
        assert_eq!(orch.wait_for_completion(SetType::Eval).await, BatchStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_submit_without_batch_is_not_ready() {
        let sim = Arc::new(roster());
        let orch = orchestrator(sim.clone());
        let err = orch.submit(SetType::Dev).await.unwrap_err();
        assert!(matches!(
            err,
            SimulatorError::BatchNotReady {
                status: BatchStatus::NotStarted,
                ..
            }
        ));
        assert_eq!(sim.scoring_calls(), 0);
    }

    #[tokio::test]
    async fn test_pass_through_interact_appends_to_transcript() {
        let sim = Arc::new(roster());
        let orch = orchestrator(sim.clone());
        let start = orch.start_conversation("s1", "t1").await.unwrap();

        let mut transcript = Transcript::new();
        let turn = orch
            .interact(&start.conversation_id, "Fractions", "What is 1/2 + 1/4?", &mut transcript)
            .await
            .unwrap();

        assert_eq!(transcript.len(), 1);
        assert_eq!(turn.reply.turn_number, 1);
        assert_eq!(turn.analysis.understanding_level.value(), 3);
        assert_eq!(sim.tutor_messages("s1", "t1"), vec!["What is 1/2 + 1/4?".to_string()]);
    }

    #[tokio::test]
    async fn test_pass_through_surfaces_upstream_errors() {
        let orch = orchestrator(Arc::new(roster()));
        let err = orch.send_message("missing", "hi").await.unwrap_err();
        match err {
            SimulatorError::Upstream(UpstreamError::Status { status, .. }) => {
                assert_eq!(status, 404)
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
