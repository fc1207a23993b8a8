//! Service trait definitions for the upstream collaborators
//!
//! - `SimulationService`: student/topic discovery and the conversation turn loop
//! - `ScoringService`: prediction and tutoring-quality evaluation
//!
//! Both traits are async and transport-agnostic. `HttpSimulationClient`
//! implements them against the real HTTP API; the `fakes` module provides
//! scripted in-memory versions for tests.

use async_trait::async_trait;

use crate::types::{ConversationStart, Prediction, SetType, Student, StudentReply, Topic};
use crate::Result;

/// Request/response access to the simulated students.
#[async_trait]
pub trait SimulationService: Send + Sync {
    /// List every student in an evaluation set.
    async fn list_students(&self, set_type: SetType) -> Result<Vec<Student>>;

    /// List the topics a student can be tutored on.
    async fn list_topics(&self, student_id: &str) -> Result<Vec<Topic>>;

    /// Open a conversation for one (student, topic) pair.
    async fn start_conversation(&self, student_id: &str, topic_id: &str)
        -> Result<ConversationStart>;

    /// Deliver one tutor message and receive the student's reply.
    async fn send_tutor_message(&self, conversation_id: &str, text: &str) -> Result<StudentReply>;
}

/// Scoring endpoints. Results are returned as raw JSON because their
/// shape belongs to the scoring service, not to us.
#[async_trait]
pub trait ScoringService: Send + Sync {
    /// Score predicted understanding levels against ground truth.
    async fn evaluate_mse(
        &self,
        predictions: &[Prediction],
        set_type: SetType,
    ) -> Result<serde_json::Value>;

    /// Score the tutoring quality of every conversation held for the set.
    async fn evaluate_tutoring(&self, set_type: SetType) -> Result<serde_json::Value>;
}
