//! Structured model outputs and their parsers.
//!
//! Models are asked for a bare JSON object but do not always comply, so
//! parsing first unwraps Markdown fences or surrounding prose, then
//! validates the shape. Anything that still does not fit is a
//! `MalformedPayload` and ends up on the fallback path.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Rubric score for how well a student understands a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct UnderstandingLevel(u8);

impl UnderstandingLevel {
    pub const STRUGGLING: UnderstandingLevel = UnderstandingLevel(1);
    pub const BELOW_GRADE: UnderstandingLevel = UnderstandingLevel(2);
    pub const AT_GRADE: UnderstandingLevel = UnderstandingLevel(3);
    pub const ABOVE_GRADE: UnderstandingLevel = UnderstandingLevel(4);
    pub const ADVANCED: UnderstandingLevel = UnderstandingLevel(5);

    /// Level substituted whenever no trustworthy assessment exists.
    pub const FALLBACK: UnderstandingLevel = UnderstandingLevel::AT_GRADE;

    pub fn new(level: i64) -> Result<Self, AnalysisError> {
        match level {
            1..=5 => Ok(UnderstandingLevel(level as u8)),
            other => Err(AnalysisError::InvalidLevel(other)),
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "struggling",
            2 => "below grade",
            3 => "at grade",
            4 => "above grade",
            _ => "advanced",
        }
    }
}

impl Default for UnderstandingLevel {
    fn default() -> Self {
        UnderstandingLevel::FALLBACK
    }
}

impl TryFrom<u8> for UnderstandingLevel {
    type Error = AnalysisError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        UnderstandingLevel::new(i64::from(value))
    }
}

impl From<UnderstandingLevel> for u8 {
    fn from(level: UnderstandingLevel) -> Self {
        level.0
    }
}

impl fmt::Display for UnderstandingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inferred understanding for one transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub understanding_level: UnderstandingLevel,
    pub justification: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_process: Option<String>,
}

impl AnalysisResult {
    /// At-grade verdict used when the model could not be consulted.
    pub fn fallback(reason: &str) -> Self {
        AnalysisResult {
            understanding_level: UnderstandingLevel::FALLBACK,
            justification: format!("Defaulting to at-grade level: {reason}"),
            evidence: Vec::new(),
            thinking_process: None,
        }
    }
}

/// Next tutor move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionResult {
    pub next_tutor_message: String,
    pub rationale: String,
}

impl SuggestionResult {
    pub const FALLBACK_MESSAGE: &'static str = "Can you explain your thinking further?";

    pub fn fallback(reason: &str) -> Self {
        SuggestionResult {
            next_tutor_message: Self::FALLBACK_MESSAGE.to_string(),
            rationale: format!("Generic follow-up: {reason}"),
        }
    }
}

/// A model output that can be parsed from raw completion text.
pub trait StructuredOutput: Sized {
    fn parse(content: &str) -> Result<Self, AnalysisError>;
}

#[derive(Deserialize)]
struct RawAnalysis {
    understanding_level: serde_json::Value,
    #[serde(default)]
    justification: Option<String>,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    thinking_process: Option<String>,
}

#[derive(Deserialize)]
struct RawSuggestion {
    #[serde(alias = "next_tutor_message")]
    suggested_response: Option<String>,
    #[serde(alias = "rationale", default)]
    strategy_note: Option<String>,
}

fn level_from_value(value: &serde_json::Value) -> Result<UnderstandingLevel, AnalysisError> {
    let level = match value {
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i,
            (None, Some(f)) if f.fract() == 0.0 => f as i64,
            _ => {
                return Err(AnalysisError::MalformedPayload(format!(
                    "understanding_level {n} is not an integer"
                )))
            }
        },
        other => {
            return Err(AnalysisError::MalformedPayload(format!(
                "understanding_level must be a number, got {other}"
            )))
        }
    };
    UnderstandingLevel::new(level)
}

impl StructuredOutput for AnalysisResult {
    fn parse(content: &str) -> Result<Self, AnalysisError> {
        let raw: RawAnalysis = serde_json::from_str(extract_json(content)?)?;
        Ok(AnalysisResult {
            understanding_level: level_from_value(&raw.understanding_level)?,
            justification: raw
                .justification
                .filter(|j| !j.trim().is_empty())
                .unwrap_or_else(|| "No justification provided".to_string()),
            evidence: raw.evidence,
            thinking_process: raw.thinking_process,
        })
    }
}

impl StructuredOutput for SuggestionResult {
    fn parse(content: &str) -> Result<Self, AnalysisError> {
        let raw: RawSuggestion = serde_json::from_str(extract_json(content)?)?;
        let message = raw
            .suggested_response
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .ok_or_else(|| {
                AnalysisError::MalformedPayload("suggested_response is missing or empty".into())
            })?;
        Ok(SuggestionResult {
            next_tutor_message: message,
            rationale: raw.strategy_note.unwrap_or_default(),
        })
    }
}

fn fenced_block() -> Option<&'static Regex> {
    static FENCED: OnceLock<Option<Regex>> = OnceLock::new();
    FENCED
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*\})\s*```").ok())
        .as_ref()
}

/// Locate the JSON object inside a completion.
pub fn extract_json(content: &str) -> Result<&str, AnalysisError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(AnalysisError::EmptyCompletion);
    }
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Ok(trimmed);
    }
    if let Some(body) = fenced_block()
        .and_then(|re| re.captures(trimmed))
        .and_then(|c| c.get(1))
    {
        return Ok(body.as_str());
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => Ok(&trimmed[start..=end]),
        _ => Err(AnalysisError::MalformedPayload(
            "no JSON object found in completion".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_bounds() {
        assert!(UnderstandingLevel::new(0).is_err());
        assert!(UnderstandingLevel::new(6).is_err());
        assert_eq!(UnderstandingLevel::new(5).unwrap(), UnderstandingLevel::ADVANCED);
        assert_eq!(UnderstandingLevel::default().value(), 3);
        assert_eq!(UnderstandingLevel::BELOW_GRADE.label(), "below grade");
    }

    #[test]
    fn test_level_serde_rejects_out_of_range() {
        let ok: UnderstandingLevel = serde_json::from_str("4").unwrap();
        assert_eq!(ok.value(), 4);
        assert!(serde_json::from_str::<UnderstandingLevel>("9").is_err());
    }

    #[test]
    fn test_parse_plain_analysis() {
        let result = AnalysisResult::parse(
            r#"{"understanding_level": 2, "justification": "mixes up numerator", "evidence": ["1/2 > 3/4"]}"#,
        )
        .unwrap();
        assert_eq!(result.understanding_level, UnderstandingLevel::BELOW_GRADE);
        assert_eq!(result.evidence, vec!["1/2 > 3/4".to_string()]);
        assert!(result.thinking_process.is_none());
    }

    #[test]
    fn test_parse_fenced_analysis_with_defaults() {
        let content = "Here you go:\n```json\n{\"understanding_level\": 4.0, \"thinking_process\": \"solid\"}\n```";
        let result = AnalysisResult::parse(content).unwrap();
        assert_eq!(result.understanding_level.value(), 4);
        assert_eq!(result.justification, "No justification provided");
        assert_eq!(result.thinking_process.as_deref(), Some("solid"));
    }

    #[test]
    fn test_parse_rejects_bad_levels() {
        assert_eq!(
            AnalysisResult::parse(r#"{"understanding_level": 7}"#),
            Err(AnalysisError::InvalidLevel(7))
        );
        assert!(matches!(
            AnalysisResult::parse(r#"{"understanding_level": "high"}"#),
            Err(AnalysisError::MalformedPayload(_))
        ));
        assert!(matches!(
            AnalysisResult::parse(r#"{"understanding_level": 2.5}"#),
            Err(AnalysisError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_parse_suggestion_accepts_either_key_set() {
        let wire = SuggestionResult::parse(
            r#"{"suggested_response": "Try drawing it.", "strategy_note": "scaffold"}"#,
        )
        .unwrap();
        assert_eq!(wire.next_tutor_message, "Try drawing it.");
        assert_eq!(wire.rationale, "scaffold");

        let native =
            SuggestionResult::parse(r#"{"next_tutor_message": "Why?", "rationale": "follow-up"}"#)
                .unwrap();
        assert_eq!(native.next_tutor_message, "Why?");
    }

    #[test]
    fn test_parse_suggestion_requires_message() {
        assert!(SuggestionResult::parse(r#"{"suggested_response": "  "}"#).is_err());
        assert!(SuggestionResult::parse(r#"{"strategy_note": "x"}"#).is_err());
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("  {\"a\":1} ").unwrap(), "{\"a\":1}");
        assert_eq!(extract_json("sure! {\"a\":1} hope it helps").unwrap(), "{\"a\":1}");
        assert_eq!(extract_json(""), Err(AnalysisError::EmptyCompletion));
        assert!(extract_json("no json here").is_err());
    }
}
