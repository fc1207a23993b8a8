//! Wire types exchanged with the Simulation and Scoring services.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UpstreamError;

/// Evaluation set a batch of students belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetType {
    #[default]
    MiniDev,
    Dev,
    Eval,
}

impl SetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetType::MiniDev => "mini_dev",
            SetType::Dev => "dev",
            SetType::Eval => "eval",
        }
    }
}

impl fmt::Display for SetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SetType {
    type Err = UpstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "mini_dev" | "minidev" => Ok(SetType::MiniDev),
            "dev" => Ok(SetType::Dev),
            "eval" => Ok(SetType::Eval),
            other => Err(UpstreamError::UnknownSetType(other.to_string())),
        }
    }
}

/// A simulated student
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub grade_level: Option<u32>,
}

impl Student {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            grade_level: None,
        }
    }

    pub fn with_grade(mut self, grade_level: u32) -> Self {
        self.grade_level = Some(grade_level);
        self
    }
}

/// A topic a student can be tutored on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub subject_name: Option<String>,
}

impl Topic {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            subject_name: None,
        }
    }
}

/// `GET /students` envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentList {
    #[serde(default)]
    pub students: Vec<Student>,
}

/// `GET /students/{id}/topics` envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicList {
    #[serde(default)]
    pub topics: Vec<Topic>,
}

/// `POST /interact/start` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConversationRequest {
    pub student_id: String,
    pub topic_id: String,
}

/// `POST /interact/start` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStart {
    pub conversation_id: String,
    /// Turn budget granted by the service; absent on some deployments.
    #[serde(default)]
    pub max_turns: Option<u32>,
}

/// `POST /interact` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorMessageRequest {
    pub conversation_id: String,
    pub tutor_message: String,
}

/// `POST /interact` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentReply {
    #[serde(alias = "studentresponse", default)]
    pub student_response: String,
    #[serde(default)]
    pub turn_number: u32,
    #[serde(default)]
    pub is_complete: bool,
}

/// One predicted understanding level submitted for scoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub student_id: String,
    pub topic_id: String,
    pub predicted_level: u8,
}

/// `POST /evaluate/mse` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MseRequest {
    pub predictions: Vec<Prediction>,
    pub set_type: SetType,
}

/// `POST /evaluate/tutoring` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutoringRequest {
    pub set_type: SetType,
}
