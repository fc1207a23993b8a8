//! Ordered record of one tutoring conversation.

use serde::{Deserialize, Serialize};

/// One tutor-message/student-reply exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub tutor: String,
    pub student: String,
}

/// Append-only sequence of turns. Order is the conversational context the
/// analysis prompt is built from, so turns are never edited once pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tutor: impl Into<String>, student: impl Into<String>) {
        self.turns.push(Turn {
            tutor: tutor.into(),
            student: student.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last_student_reply(&self) -> Option<&str> {
        self.turns.last().map(|t| t.student.as_str())
    }

    /// Render as `Tutor: ...` / `Student: ...` lines.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("Tutor: {}\nStudent: {}", t.tutor, t.student))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FromIterator<(String, String)> for Transcript {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut transcript = Transcript::new();
        for (tutor, student) in iter {
            transcript.push(tutor, student);
        }
        transcript
    }
}
