//! One (student, topic) simulation task.

use serde::{Deserialize, Serialize};
use tutorsim_upstream::{ConversationStart, Student, Topic};

/// Everything a session needs to run, captured once during discovery and
/// never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentTopicPair {
    pub student_id: String,
    pub topic_id: String,
    pub topic_name: String,
    pub conversation_id: String,
    pub max_turns: u32,
}

impl StudentTopicPair {
    /// Build a pair from a started conversation, using `default_max_turns`
    /// when the service did not grant an explicit budget.
    pub fn from_start(
        student: &Student,
        topic: &Topic,
        start: ConversationStart,
        default_max_turns: u32,
    ) -> Self {
        Self {
            student_id: student.id.clone(),
            topic_id: topic.id.clone(),
            topic_name: topic.name.clone(),
            conversation_id: start.conversation_id,
            max_turns: start.max_turns.unwrap_or(default_max_turns),
        }
    }

    /// (student_id, topic_id)
    pub fn key(&self) -> (String, String) {
        (self.student_id.clone(), self.topic_id.clone())
    }
}
