//! Per-pair simulation outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tutorsim_analysis::{AnalysisResult, UnderstandingLevel};
use tutorsim_upstream::Prediction;

use super::pair::StudentTopicPair;

/// Why a session stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEnd {
    /// The simulation service reported the conversation complete
    StudentComplete,
    /// The turn budget was used up (or was zero)
    TurnLimitReached,
    /// The batch was cancelled between turns
    Cancelled,
    /// The simulation service rejected a call; the session was aborted
    Failed { error: String },
}

impl SessionEnd {
    pub fn is_failure(&self) -> bool {
        matches!(self, SessionEnd::Failed { .. })
    }
}

/// Final verdict for one pair. Created once when its session ends and
/// never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub student_id: String,
    pub topic_id: String,
    pub topic_name: String,
    pub understanding_level: UnderstandingLevel,
    pub justification: String,
    pub turns_completed: u32,
    pub outcome: SessionEnd,
    pub finished_at: DateTime<Utc>,
}

impl SimulationRecord {
    /// Build the record for a session that ended with `end` after
    /// `turns_completed` turns, `last` being the most recent analysis.
    pub fn from_session(
        pair: &StudentTopicPair,
        turns_completed: u32,
        last: Option<AnalysisResult>,
        end: SessionEnd,
    ) -> Self {
        let (understanding_level, justification) = match (&end, last) {
            (SessionEnd::Failed { error }, Some(analysis)) => (
                analysis.understanding_level,
                format!(
                    "Session aborted after {turns_completed} turn(s): {error}. Last assessment: {}",
                    analysis.justification
                ),
            ),
            (SessionEnd::Failed { error }, None) => (
                UnderstandingLevel::FALLBACK,
                format!("Session aborted before any interaction: {error}"),
            ),
            (_, Some(analysis)) => (analysis.understanding_level, analysis.justification),
            (_, None) => (
                UnderstandingLevel::FALLBACK,
                "No interaction: the session ended before any turn completed".to_string(),
            ),
        };

        Self {
            student_id: pair.student_id.clone(),
            topic_id: pair.topic_id.clone(),
            topic_name: pair.topic_name.clone(),
            understanding_level,
            justification,
            turns_completed,
            outcome: end,
            finished_at: Utc::now(),
        }
    }

    /// Record for a pair that failed before a session could run at all.
    pub fn failed(student_id: &str, topic_id: &str, topic_name: &str, error: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            topic_id: topic_id.to_string(),
            topic_name: topic_name.to_string(),
            understanding_level: UnderstandingLevel::FALLBACK,
            justification: format!("Session aborted before any interaction: {error}"),
            turns_completed: 0,
            outcome: SessionEnd::Failed {
                error: error.to_string(),
            },
            finished_at: Utc::now(),
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.student_id.clone(), self.topic_id.clone())
    }

    pub fn is_failure(&self) -> bool {
        self.outcome.is_failure()
    }

    pub fn prediction(&self) -> Prediction {
        Prediction {
            student_id: self.student_id.clone(),
            topic_id: self.topic_id.clone(),
            predicted_level: self.understanding_level.value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> StudentTopicPair {
        StudentTopicPair {
            student_id: "s1".to_string(),
            topic_id: "t1".to_string(),
            topic_name: "Fractions".to_string(),
            conversation_id: "c-1".to_string(),
            max_turns: 3,
        }
    }

    fn analysis(level: u8) -> AnalysisResult {
        AnalysisResult {
            understanding_level: UnderstandingLevel::try_from(level).unwrap(),
            justification: "consistent answers".to_string(),
            evidence: vec![],
            thinking_process: None,
        }
    }

    #[test]
    fn test_zero_turns_means_no_interaction() {
        let record = SimulationRecord::from_session(&pair(), 0, None, SessionEnd::TurnLimitReached);
        assert_eq!(record.understanding_level, UnderstandingLevel::FALLBACK);
        assert!(record.justification.starts_with("No interaction"));
        assert!(!record.is_failure());
    }

    #[test]
    fn test_completed_session_keeps_last_analysis() {
        let record = SimulationRecord::from_session(
            &pair(),
            2,
            Some(analysis(4)),
            SessionEnd::StudentComplete,
        );
        assert_eq!(record.understanding_level.value(), 4);
        assert_eq!(record.justification, "consistent answers");
        assert_eq!(record.prediction().predicted_level, 4);
    }

    #[test]
    fn test_failed_session_keeps_last_level_and_error() {
        let end = SessionEnd::Failed {
            error: "upstream returned status 500".to_string(),
        };
        let record = SimulationRecord::from_session(&pair(), 1, Some(analysis(2)), end);
        assert!(record.is_failure());
        assert_eq!(record.understanding_level.value(), 2);
        assert!(record.justification.contains("status 500"));
        assert!(record.justification.contains("consistent answers"));
    }

    #[test]
    fn test_failed_before_start() {
        let record = SimulationRecord::failed("s1", "t2", "Algebra", "status 429");
        assert!(record.is_failure());
        assert_eq!(record.turns_completed, 0);
        assert_eq!(record.understanding_level.value(), 3);
    }

    #[test]
    fn test_session_end_serializes_tagged() {
        let json = serde_json::to_value(SessionEnd::Failed {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["error"], "boom");
    }
}
