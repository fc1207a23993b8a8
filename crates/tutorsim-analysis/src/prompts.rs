//! Prompt templates.
//!
//! Templates use `{name}` placeholders filled by plain substitution so the
//! literal JSON braces in the response schema need no escaping.

use crate::payload::UnderstandingLevel;
use crate::transcript::Transcript;

pub const ANALYSIS_TEMPLATE: &str = r#"You are an experienced K-12 tutoring coach. Read the tutoring conversation below and rate how well the student understands the topic.

Rubric:
1 - Struggling: major misconceptions, cannot do basic steps.
2 - Below grade: partial understanding, frequent mistakes.
3 - At grade: core ideas mostly right, consistent on standard tasks.
4 - Above grade: solid grasp, only occasional slips, little guidance needed.
5 - Advanced: deep mastery, explains the reasoning behind each step.

Topic: {topic_name}

Conversation:
{history_text}

Judge from the student's own words: their errors, vocabulary and how quickly they pick things up.
Respond with a single JSON object and nothing else:
{"thinking_process": "...", "understanding_level": <integer 1-5>, "justification": "...", "evidence": ["quote", "..."]}"#;

pub const SUGGESTION_TEMPLATE: &str = r#"You are a K-12 pedagogy advisor helping a tutor choose what to say next.

Topic: {topic_name}
Current understanding level: {level}/5 ({level_label})
Student's last reply: "{last_response}"

Strategy: {strategy}

Respond with a single JSON object and nothing else:
{"suggested_response": "the tutor's next message, addressed to the student", "strategy_note": "why this move"}"#;

const SCAFFOLD_STRATEGY: &str =
    "The student is below grade. Scaffold: use a simpler example and check the fundamentals.";
const SOCRATIC_STRATEGY: &str =
    "The student is at or above grade. Ask a Socratic question that challenges an assumption.";

/// Render the understanding-analysis prompt for a transcript.
pub fn analysis_prompt(transcript: &Transcript, topic_name: &str) -> String {
    ANALYSIS_TEMPLATE
        .replace("{topic_name}", topic_name)
        .replace("{history_text}", &transcript.render())
}

/// Render the next-step prompt.
pub fn suggestion_prompt(level: UnderstandingLevel, topic_name: &str, last_reply: &str) -> String {
    let strategy = if level < UnderstandingLevel::AT_GRADE {
        SCAFFOLD_STRATEGY
    } else {
        SOCRATIC_STRATEGY
    };
    SUGGESTION_TEMPLATE
        .replace("{topic_name}", topic_name)
        .replace("{level_label}", level.label())
        .replace("{level}", &level.to_string())
        .replace("{strategy}", strategy)
        .replace("{last_response}", last_reply)
}
