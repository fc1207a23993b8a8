//! Session Driver: one simulated tutoring conversation, end to end.
//!
//! A session walks `Started -> TurnInProgress -> ... -> Finished`. Each turn
//! sends the current tutor message, appends the exchange to the transcript,
//! re-assesses the whole transcript and asks for the next tutor message.
//! Only a simulation-service failure stops a session early; model trouble is
//! absorbed by [`AnalysisClient`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, Instrument};
use tutorsim_analysis::{AnalysisClient, AnalysisResult, SuggestionResult, Transcript};
use tutorsim_upstream::{SimulationService, StudentReply, UpstreamError};

use crate::domain::{SessionEnd, SimulationRecord, StudentTopicPair};
use crate::metrics::METRICS;
use crate::obs::{self, SessionSpan};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Started,
    TurnInProgress { turn: u32 },
    Finished { end: SessionEnd },
}

/// Everything one turn produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub reply: StudentReply,
    pub analysis: AnalysisResult,
    pub suggestion: SuggestionResult,
}

/// Result of a full session
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub record: SimulationRecord,
    pub transcript: Transcript,
    pub final_state: SessionState,
}

/// Opening tutor message for a fresh conversation.
pub fn opener(topic_name: &str) -> String {
    format!("Hi! Let's talk about {topic_name}. What do you already know about it?")
}

/// Drives sessions against a simulation service and an analysis client.
#[derive(Clone)]
pub struct SessionDriver {
    simulation: Arc<dyn SimulationService>,
    analysis: Arc<AnalysisClient>,
    turn_timeout: Duration,
}

impl SessionDriver {
    pub fn new(
        simulation: Arc<dyn SimulationService>,
        analysis: Arc<AnalysisClient>,
        turn_timeout: Duration,
    ) -> Self {
        Self {
            simulation,
            analysis,
            turn_timeout,
        }
    }

    /// Run one turn: send `tutor_message`, record the exchange in
    /// `transcript`, then analyse and suggest.
    ///
    /// Fails only when the simulation service does; the transcript is left
    /// untouched in that case.
    pub async fn take_turn(
        &self,
        conversation_id: &str,
        topic_name: &str,
        tutor_message: &str,
        transcript: &mut Transcript,
    ) -> Result<TurnOutcome, UpstreamError> {
        let reply = tokio::time::timeout(
            self.turn_timeout,
            self.simulation.send_tutor_message(conversation_id, tutor_message),
        )
        .await
        .map_err(|_| UpstreamError::Timeout(self.turn_timeout.as_secs()))??;

        transcript.push(tutor_message, reply.student_response.as_str());

        let analysis = self
            .analysis
            .analyze_understanding(transcript, topic_name)
            .await;
        let suggestion = self
            .analysis
            .suggest_next_step(
                analysis.understanding_level,
                topic_name,
                &reply.student_response,
            )
            .await;

        Ok(TurnOutcome {
            reply,
            analysis,
            suggestion,
        })
    }

    /// Drive `pair` until the student is done, the turn budget runs out,
    /// the simulation service fails, or `cancel` flips to `true`.
    ///
    /// Cancellation is only observed between turns.
    pub async fn run(
        &self,
        pair: &StudentTopicPair,
        cancel: &watch::Receiver<bool>,
    ) -> SessionOutcome {
        let span = SessionSpan::new(pair).span();
        self.drive(pair, cancel).instrument(span).await
    }

    async fn drive(
        &self,
        pair: &StudentTopicPair,
        cancel: &watch::Receiver<bool>,
    ) -> SessionOutcome {
        obs::emit_session_started(pair);
        METRICS.inc_sessions_started();

        let mut state = SessionState::Started;
        let mut transcript = Transcript::new();
        let mut tutor_message = opener(&pair.topic_name);
        let mut latest: Option<AnalysisResult> = None;
        let mut turns: u32 = 0;

        let end = loop {
            if turns >= pair.max_turns {
                break SessionEnd::TurnLimitReached;
            }
            if *cancel.borrow() {
                break SessionEnd::Cancelled;
            }

            transition(&mut state, SessionState::TurnInProgress { turn: turns + 1 });
            let outcome = match self
                .take_turn(
                    &pair.conversation_id,
                    &pair.topic_name,
                    &tutor_message,
                    &mut transcript,
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    obs::emit_session_failed(&pair.student_id, &pair.topic_id, turns + 1, &err);
                    break SessionEnd::Failed {
                        error: err.to_string(),
                    };
                }
            };

            turns += 1;
            METRICS.inc_turns();
            obs::emit_turn_completed(
                &pair.conversation_id,
                turns,
                outcome.analysis.understanding_level.value(),
                outcome.reply.is_complete,
            );

            latest = Some(outcome.analysis);
            tutor_message = outcome.suggestion.next_tutor_message;

            if outcome.reply.is_complete {
                break SessionEnd::StudentComplete;
            }
        };

        transition(&mut state, SessionState::Finished { end: end.clone() });
        if end.is_failure() {
            METRICS.inc_sessions_failed();
        }
        METRICS.inc_sessions_finished();

        let record = SimulationRecord::from_session(pair, turns, latest, end);
        obs::emit_session_finished(&record);

        SessionOutcome {
            record,
            transcript,
            final_state: state,
        }
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    debug!(from = ?state, to = ?next, "session state transition");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutorsim_analysis::fakes::ScriptedChatModel;
    use tutorsim_analysis::{AnalysisConfig, AnalysisError, CallPurpose, UnderstandingLevel};
    use tutorsim_upstream::fakes::{conversation_id_for, ScriptedSimulation};
    use tutorsim_upstream::{Student, Topic};

    fn simulation() -> ScriptedSimulation {
        ScriptedSimulation::new().with_student(
            Student::new("s1", "Ada"),
            vec![Topic::new("t1", "Fractions")],
        )
    }

    fn pair(max_turns: u32) -> StudentTopicPair {
        StudentTopicPair {
            student_id: "s1".to_string(),
            topic_id: "t1".to_string(),
            topic_name: "Fractions".to_string(),
            conversation_id: conversation_id_for("s1", "t1"),
            max_turns,
        }
    }

    async fn driver(sim: Arc<ScriptedSimulation>, model: ScriptedChatModel) -> SessionDriver {
        sim.start_conversation("s1", "t1").await.unwrap();
        let analysis = Arc::new(AnalysisClient::new(
            Arc::new(model),
            AnalysisConfig::default(),
        ));
        SessionDriver::new(sim, analysis, Duration::from_secs(30))
    }

    fn not_cancelled() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        rx
    }

    #[tokio::test]
    async fn test_turn_budget_is_never_exceeded() {
        let sim = Arc::new(simulation());
        let driver = driver(sim.clone(), ScriptedChatModel::new()).await;

        let outcome = driver.run(&pair(3), &not_cancelled()).await;

        assert_eq!(outcome.record.turns_completed, 3);
        assert_eq!(outcome.transcript.len(), 3);
        assert_eq!(sim.turns_taken("s1", "t1"), 3);
        assert_eq!(outcome.record.outcome, SessionEnd::TurnLimitReached);
        assert_eq!(
            outcome.final_state,
            SessionState::Finished {
                end: SessionEnd::TurnLimitReached
            }
        );
    }

    #[tokio::test]
    async fn test_completion_stops_further_turns() {
        let sim = Arc::new(simulation().complete_after("s1", "t1", 2));
        let driver = driver(sim.clone(), ScriptedChatModel::new()).await;

        let outcome = driver.run(&pair(5), &not_cancelled()).await;

        assert_eq!(outcome.record.outcome, SessionEnd::StudentComplete);
        assert_eq!(outcome.record.turns_completed, 2);
        assert_eq!(sim.send_calls(), 2);
    }

    #[tokio::test]
    async fn test_opener_then_suggestions_drive_the_conversation() {
        let sim = Arc::new(simulation());
        let model = ScriptedChatModel::new().with_suggestion(
            "Fractions",
            r#"{"suggested_response": "What is half of 4?", "strategy_note": "follow-up"}"#,
        );
        let driver = driver(sim.clone(), model).await;

        driver.run(&pair(2), &not_cancelled()).await;

        let sent = sim.tutor_messages("s1", "t1");
        assert_eq!(sent[0], opener("Fractions"));
        assert_eq!(sent[1], "What is half of 4?");
    }

    #[tokio::test]
    async fn test_last_analysis_is_the_verdict() {
        let sim = Arc::new(simulation().complete_after("s1", "t1", 2));
        // The second analysis prompt is the first to contain the turn-2 reply.
        let model = ScriptedChatModel::new()
            .with_analysis("Turn 2:", r#"{"understanding_level": 5, "justification": "second"}"#)
            .with_analysis("Fractions", r#"{"understanding_level": 1, "justification": "first"}"#);
        let driver = driver(sim, model).await;

        let outcome = driver.run(&pair(5), &not_cancelled()).await;
        assert_eq!(outcome.record.understanding_level, UnderstandingLevel::ADVANCED);
        assert_eq!(outcome.record.justification, "second");
    }

    #[tokio::test]
    async fn test_analysis_failure_degrades_without_aborting() {
        let sim = Arc::new(simulation().complete_after("s1", "t1", 2));
        let model = ScriptedChatModel::new().failing_when(
            CallPurpose::Analysis,
            "Fractions",
            AnalysisError::MalformedPayload("not json".to_string()),
        );
        let driver = driver(sim.clone(), model).await;

        let outcome = driver.run(&pair(5), &not_cancelled()).await;

        assert_eq!(outcome.record.understanding_level.value(), 3);
        assert_eq!(outcome.record.turns_completed, 2);
        assert!(!outcome.record.is_failure());
    }

    #[tokio::test]
    async fn test_simulation_failure_aborts_with_failed_record() {
        let sim = Arc::new(simulation().fail_on_turn("s1", "t1", 2));
        let model = ScriptedChatModel::new()
            .with_analysis("Fractions", r#"{"understanding_level": 4, "justification": "ok"}"#);
        let driver = driver(sim.clone(), model).await;

        let outcome = driver.run(&pair(5), &not_cancelled()).await;

        assert!(outcome.record.is_failure());
        assert_eq!(outcome.record.turns_completed, 1);
        assert_eq!(outcome.record.understanding_level.value(), 4);
        assert!(outcome.record.justification.contains("status 500"));
        assert_eq!(outcome.transcript.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_budget_means_no_interaction() {
        let sim = Arc::new(simulation());
        let driver = driver(sim.clone(), ScriptedChatModel::new()).await;

        let outcome = driver.run(&pair(0), &not_cancelled()).await;

        assert_eq!(sim.send_calls(), 0);
        assert_eq!(outcome.record.understanding_level.value(), 3);
        assert!(outcome.record.justification.starts_with("No interaction"));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_turn() {
        let sim = Arc::new(simulation());
        let driver = driver(sim.clone(), ScriptedChatModel::new()).await;
        let (_tx, rx) = watch::channel(true);

        let outcome = driver.run(&pair(5), &rx).await;

        assert_eq!(outcome.record.outcome, SessionEnd::Cancelled);
        assert_eq!(sim.send_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_turn_times_out_as_upstream_failure() {
        let sim = Arc::new(simulation().with_latency(Duration::from_secs(60)));
        sim.start_conversation("s1", "t1").await.unwrap();
        let analysis = Arc::new(AnalysisClient::new(
            Arc::new(ScriptedChatModel::new()),
            AnalysisConfig::default(),
        ));
        let driver = SessionDriver::new(sim, analysis, Duration::from_secs(5));

        let outcome = driver.run(&pair(3), &not_cancelled()).await;
        assert!(outcome.record.is_failure());
        assert!(outcome.record.justification.contains("timed out after 5s"));
    }

    #[tokio::test]
    async fn test_take_turn_leaves_transcript_untouched_on_failure() {
        let sim = Arc::new(simulation().fail_on_turn("s1", "t1", 1));
        let driver = driver(sim, ScriptedChatModel::new()).await;
        let mut transcript = Transcript::new();

        let result = driver
            .take_turn(&conversation_id_for("s1", "t1"), "Fractions", "hello", &mut transcript)
            .await;
        assert!(result.is_err());
        assert!(transcript.is_empty());
    }
}
