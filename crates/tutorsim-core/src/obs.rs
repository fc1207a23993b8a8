//! Structured observability hooks for batch and session lifecycle events.
//!
//! This module provides:
//! - Batch- and session-scoped spans (`BatchSpan`, `SessionSpan`)
//! - Emission functions for key lifecycle events: launch, session start,
//!   turn, session finish or failure, batch finish, cancellation, submission
//!
//! Events are emitted at `info!` level (configurable via `TUTORSIM_LOG`).

use tracing::{info, warn, Span};
use tutorsim_upstream::SetType;

use crate::domain::{BatchStatus, SimulationRecord, StudentTopicPair};

/// Span covering one batch from launch to its terminal status.
///
/// Async code attaches it with `Instrument::instrument(span.span())`;
/// synchronous callers can hold the guard from [`BatchSpan::enter`].
pub struct BatchSpan {
    span: Span,
}

impl BatchSpan {
    pub fn new(set_type: SetType, batch_id: &str) -> Self {
        Self {
            span: tracing::info_span!("tutorsim.batch", set_type = %set_type, batch_id = %batch_id),
        }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn enter(self) -> tracing::span::EnteredSpan {
        self.span.entered()
    }
}

/// Span covering one session, tagged with the pair it drives.
pub struct SessionSpan {
    span: Span,
}

impl SessionSpan {
    pub fn new(pair: &StudentTopicPair) -> Self {
        Self {
            span: tracing::info_span!(
                "tutorsim.session",
                student_id = %pair.student_id,
                topic_id = %pair.topic_id,
                conversation_id = %pair.conversation_id,
            ),
        }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn enter(self) -> tracing::span::EnteredSpan {
        self.span.entered()
    }
}

/// Emit event: batch launched with its discovered pair count.
pub fn emit_batch_launched(set_type: SetType, batch_id: &str, pair_count: usize) {
    info!(
        event = "batch.launched",
        set_type = %set_type,
        batch_id = %batch_id,
        pair_count = pair_count,
    );
}

pub fn emit_session_started(pair: &StudentTopicPair) {
    info!(
        event = "session.started",
        student_id = %pair.student_id,
        topic_id = %pair.topic_id,
        conversation_id = %pair.conversation_id,
        max_turns = pair.max_turns,
    );
}

/// Emit event: one turn finished with the level inferred after it.
pub fn emit_turn_completed(conversation_id: &str, turn: u32, level: u8, is_complete: bool) {
    info!(
        event = "session.turn_completed",
        conversation_id = %conversation_id,
        turn = turn,
        level = level,
        is_complete = is_complete,
    );
}

pub fn emit_session_finished(record: &SimulationRecord) {
    info!(
        event = "session.finished",
        student_id = %record.student_id,
        topic_id = %record.topic_id,
        level = record.understanding_level.value(),
        turns = record.turns_completed,
        outcome = ?record.outcome,
    );
}

/// Emit event: the simulation service rejected a call (warning level).
pub fn emit_session_failed(
    student_id: &str,
    topic_id: &str,
    turn: u32,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "session.failed",
        student_id = %student_id,
        topic_id = %topic_id,
        turn = turn,
        error = %error,
    );
}

/// Emit event: batch reached a terminal status.
pub fn emit_batch_finished(
    set_type: SetType,
    status: BatchStatus,
    records: usize,
    failed: usize,
    total_expected: usize,
    duration_ms: u64,
) {
    info!(
        event = "batch.finished",
        set_type = %set_type,
        status = %status,
        records = records,
        failed = failed,
        total_expected = total_expected,
        duration_ms = duration_ms,
    );
}

pub fn emit_batch_cancel_requested(set_type: SetType) {
    info!(event = "batch.cancel_requested", set_type = %set_type);
}

/// Emit event: predictions submitted and both scores received.
pub fn emit_submission_completed(set_type: SetType, predictions: usize) {
    info!(
        event = "batch.submitted",
        set_type = %set_type,
        predictions = predictions,
    );
}
