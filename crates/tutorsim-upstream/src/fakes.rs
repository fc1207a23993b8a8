//! In-memory fakes for the service traits (testing only)
//!
//! `ScriptedSimulation` implements both `SimulationService` and
//! `ScoringService` from a fixed roster. Per-pair behaviour (turn budget,
//! early completion, injected failures) is scripted up front, and the fake
//! records everything it receives so tests can assert on it afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::UpstreamError;
use crate::service::{ScoringService, SimulationService};
use crate::types::{ConversationStart, Prediction, SetType, Student, StudentReply, Topic};
use crate::Result;

type PairKey = (String, String);

fn key(student_id: &str, topic_id: &str) -> PairKey {
    (student_id.to_string(), topic_id.to_string())
}

/// Conversation id the fake hands out for a pair.
pub fn conversation_id_for(student_id: &str, topic_id: &str) -> String {
    format!("conv-{student_id}-{topic_id}")
}

#[derive(Debug, Clone, Default)]
struct PairScript {
    max_turns: Option<u32>,
    complete_after: Option<u32>,
    fail_on_turn: Option<u32>,
}

#[derive(Debug)]
struct Conversation {
    pair: PairKey,
    topic_name: String,
    max_turns: Option<u32>,
    tutor_messages: Vec<String>,
    complete: bool,
}

#[derive(Debug, Default)]
struct SimState {
    roster: Vec<(Student, Vec<Topic>)>,
    default_max_turns: Option<u32>,
    scripts: HashMap<PairKey, PairScript>,
    failing_starts: HashSet<PairKey>,
    conversations: HashMap<String, Conversation>,
    submitted: Vec<(SetType, Vec<Prediction>)>,
    tutoring_requests: Vec<SetType>,
    scoring_failure: Option<UpstreamError>,
}

/// Scripted simulation + scoring service.
#[derive(Debug)]
pub struct ScriptedSimulation {
    state: Mutex<SimState>,
    latency: Duration,
    roster_latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    send_calls: AtomicUsize,
    start_calls: AtomicUsize,
    scoring_calls: AtomicUsize,
}

impl Default for ScriptedSimulation {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter when a call finishes, however it finishes.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedSimulation {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                default_max_turns: Some(5),
                ..SimState::default()
            }),
            latency: Duration::ZERO,
            roster_latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            scoring_calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn script_mut(&self, student_id: &str, topic_id: &str, edit: impl FnOnce(&mut PairScript)) {
        let mut state = self.state();
        edit(state.scripts.entry(key(student_id, topic_id)).or_default());
    }

    /// Add a student and the topics they can be tutored on
    pub fn with_student(self, student: Student, topics: Vec<Topic>) -> Self {
        self.state().roster.push((student, topics));
        self
    }

    /// Turn budget reported for pairs without their own; `None` omits `max_turns`
    pub fn with_default_max_turns(self, max_turns: Option<u32>) -> Self {
        self.state().default_max_turns = max_turns;
        self
    }

    /// Turn budget reported for one pair
    pub fn with_max_turns(self, student_id: &str, topic_id: &str, max_turns: u32) -> Self {
        self.script_mut(student_id, topic_id, |s| s.max_turns = Some(max_turns));
        self
    }

    /// Report `is_complete` on the given turn
    pub fn complete_after(self, student_id: &str, topic_id: &str, turns: u32) -> Self {
        self.script_mut(student_id, topic_id, |s| s.complete_after = Some(turns));
        self
    }

    /// Reject the given turn with a 500
    pub fn fail_on_turn(self, student_id: &str, topic_id: &str, turn: u32) -> Self {
        self.script_mut(student_id, topic_id, |s| s.fail_on_turn = Some(turn));
        self
    }

    /// Reject `start_conversation` for a pair with a 429
    pub fn fail_start(self, student_id: &str, topic_id: &str) -> Self {
        self.state().failing_starts.insert(key(student_id, topic_id));
        self
    }

    /// Make every scoring call fail with `err`
    pub fn fail_scoring(self, err: UpstreamError) -> Self {
        self.state().scoring_failure = Some(err);
        self
    }

    /// Delay every `send_tutor_message` call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay every `list_students` call
    pub fn with_roster_latency(mut self, latency: Duration) -> Self {
        self.roster_latency = latency;
        self
    }

    /// Highest number of `send_tutor_message` calls observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Total `send_tutor_message` calls received
    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// Total `start_conversation` calls received, including rejected ones
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Total scoring calls received (MSE and tutoring)
    pub fn scoring_calls(&self) -> usize {
        self.scoring_calls.load(Ordering::SeqCst)
    }

    /// Tutor messages accepted for a pair, in order
    pub fn tutor_messages(&self, student_id: &str, topic_id: &str) -> Vec<String> {
        let state = self.state();
        state
            .conversations
            .get(&conversation_id_for(student_id, topic_id))
            .map(|c| c.tutor_messages.clone())
            .unwrap_or_default()
    }

    /// Turns the student answered for a pair
    pub fn turns_taken(&self, student_id: &str, topic_id: &str) -> usize {
        self.tutor_messages(student_id, topic_id).len()
    }

    /// Every prediction set passed to `evaluate_mse`
    pub fn submitted_predictions(&self) -> Vec<(SetType, Vec<Prediction>)> {
        self.state().submitted.clone()
    }

    /// Every set type passed to `evaluate_tutoring`
    pub fn tutoring_requests(&self) -> Vec<SetType> {
        self.state().tutoring_requests.clone()
    }
}

#[async_trait]
impl SimulationService for ScriptedSimulation {
    async fn list_students(&self, _set_type: SetType) -> Result<Vec<Student>> {
        if !self.roster_latency.is_zero() {
            tokio::time::sleep(self.roster_latency).await;
        }
        Ok(self.state().roster.iter().map(|(s, _)| s.clone()).collect())
    }

    async fn list_topics(&self, student_id: &str) -> Result<Vec<Topic>> {
        let state = self.state();
        state
            .roster
            .iter()
            .find(|(s, _)| s.id == student_id)
            .map(|(_, topics)| topics.clone())
            .ok_or_else(|| UpstreamError::Status {
                status: 404,
                body: format!("student {student_id} not found"),
            })
    }

    async fn start_conversation(
        &self,
        student_id: &str,
        topic_id: &str,
    ) -> Result<ConversationStart> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        let pair = key(student_id, topic_id);

        if state.failing_starts.contains(&pair) {
            return Err(UpstreamError::Status {
                status: 429,
                body: "conversation limit reached".to_string(),
            });
        }

        let topic_name = state
            .roster
            .iter()
            .find(|(s, _)| s.id == student_id)
            .and_then(|(_, topics)| topics.iter().find(|t| t.id == topic_id))
            .map(|t| t.name.clone())
            .ok_or_else(|| UpstreamError::Status {
                status: 404,
                body: format!("unknown pair {student_id}/{topic_id}"),
            })?;

        let max_turns = state
            .scripts
            .get(&pair)
            .and_then(|s| s.max_turns)
            .or(state.default_max_turns);

        let conversation_id = conversation_id_for(student_id, topic_id);
        state.conversations.insert(
            conversation_id.clone(),
            Conversation {
                pair,
                topic_name,
                max_turns,
                tutor_messages: Vec::new(),
                complete: false,
            },
        );

        Ok(ConversationStart {
            conversation_id,
            max_turns,
        })
    }

    async fn send_tutor_message(&self, conversation_id: &str, text: &str) -> Result<StudentReply> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state();
        let SimState {
            conversations,
            scripts,
            ..
        } = &mut *state;

        let conversation =
            conversations
                .get_mut(conversation_id)
                .ok_or_else(|| UpstreamError::Status {
                    status: 404,
                    body: format!("conversation {conversation_id} not found"),
                })?;

        let budget_spent = conversation
            .max_turns
            .is_some_and(|max| conversation.tutor_messages.len() as u32 >= max);
        if conversation.complete || budget_spent {
            return Err(UpstreamError::Status {
                status: 409,
                body: "conversation already complete".to_string(),
            });
        }

        let turn = conversation.tutor_messages.len() as u32 + 1;
        let script = scripts.get(&conversation.pair).cloned().unwrap_or_default();

        if script.fail_on_turn == Some(turn) {
            return Err(UpstreamError::Status {
                status: 500,
                body: format!("simulated failure on turn {turn}"),
            });
        }

        conversation.tutor_messages.push(text.to_string());
        let is_complete = script.complete_after == Some(turn);
        conversation.complete = is_complete;

        Ok(StudentReply {
            student_response: format!(
                "Turn {turn}: here is what I think about {}",
                conversation.topic_name
            ),
            turn_number: turn,
            is_complete,
        })
    }
}

#[async_trait]
impl ScoringService for ScriptedSimulation {
    async fn evaluate_mse(
        &self,
        predictions: &[Prediction],
        set_type: SetType,
    ) -> Result<serde_json::Value> {
        self.scoring_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if let Some(err) = &state.scoring_failure {
            return Err(err.clone());
        }
        state.submitted.push((set_type, predictions.to_vec()));
        Ok(serde_json::json!({
            "set_type": set_type,
            "num_predictions": predictions.len(),
            "mse_score": 0.0,
        }))
    }

    async fn evaluate_tutoring(&self, set_type: SetType) -> Result<serde_json::Value> {
        self.scoring_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if let Some(err) = &state.scoring_failure {
            return Err(err.clone());
        }
        state.tutoring_requests.push(set_type);
        Ok(serde_json::json!({ "set_type": set_type, "score": 0.5 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> ScriptedSimulation {
        ScriptedSimulation::new().with_student(
            Student::new("s1", "Ada"),
            vec![Topic::new("t1", "Fractions"), Topic::new("t2", "Algebra")],
        )
    }

    #[tokio::test]
    async fn test_discovery_follows_roster() {
        let sim = roster();
        let students = sim.list_students(SetType::MiniDev).await.unwrap();
        assert_eq!(students.len(), 1);

        let topics = sim.list_topics("s1").await.unwrap();
        assert_eq!(topics.len(), 2);

        let err = sim.list_topics("nobody").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_conversation_completes_on_script() {
        let sim = roster().complete_after("s1", "t1", 2);
        let start = sim.start_conversation("s1", "t1").await.unwrap();
        assert_eq!(start.max_turns, Some(5));

        let first = sim.send_tutor_message(&start.conversation_id, "hi").await.unwrap();
        assert!(!first.is_complete);
        assert!(first.student_response.contains("Fractions"));

        let second = sim.send_tutor_message(&start.conversation_id, "and?").await.unwrap();
        assert!(second.is_complete);
        assert_eq!(second.turn_number, 2);

        let err = sim
            .send_tutor_message(&start.conversation_id, "again")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert_eq!(sim.turns_taken("s1", "t1"), 2);
    }

    #[tokio::test]
    async fn test_turn_budget_is_enforced() {
        let sim = roster().with_max_turns("s1", "t2", 1);
        let start = sim.start_conversation("s1", "t2").await.unwrap();
        sim.send_tutor_message(&start.conversation_id, "one").await.unwrap();
        let err = sim
            .send_tutor_message(&start.conversation_id, "two")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(409));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let sim = roster().fail_start("s1", "t2").fail_on_turn("s1", "t1", 1);

        let err = sim.start_conversation("s1", "t2").await.unwrap_err();
        assert_eq!(err.status(), Some(429));

        let start = sim.start_conversation("s1", "t1").await.unwrap();
        let err = sim
            .send_tutor_message(&start.conversation_id, "hello")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn test_scoring_records_predictions() {
        let sim = roster();
        let predictions = vec![Prediction {
            student_id: "s1".to_string(),
            topic_id: "t1".to_string(),
            predicted_level: 4,
        }];
        sim.evaluate_mse(&predictions, SetType::Dev).await.unwrap();
        sim.evaluate_tutoring(SetType::Dev).await.unwrap();

        let submitted = sim.submitted_predictions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0, SetType::Dev);
        assert_eq!(submitted[0].1, predictions);
        assert_eq!(sim.tutoring_requests(), vec![SetType::Dev]);
        assert_eq!(sim.scoring_calls(), 2);
    }
}
