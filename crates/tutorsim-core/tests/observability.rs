//! Observability tests for batch and session lifecycle tracing.

use std::sync::Arc;

use tracing_test::traced_test;
use tutorsim_analysis::fakes::ScriptedChatModel;
use tutorsim_analysis::{AnalysisClient, AnalysisConfig, AnalysisError};
use tutorsim_core::obs::{
    emit_batch_cancel_requested, emit_batch_finished, emit_batch_launched,
    emit_session_failed, emit_turn_completed, BatchSpan,
};
use tutorsim_core::{BatchConfig, BatchOrchestrator, BatchStatus};
use tutorsim_upstream::fakes::ScriptedSimulation;
use tutorsim_upstream::{SetType, Student, Topic, UpstreamError};

#[traced_test]
#[test]
fn test_emit_batch_launched_logs_pair_count() {
    emit_batch_launched(SetType::Dev, "batch-1", 4);
    assert!(logs_contain("batch.launched"));
    assert!(logs_contain("pair_count=4"));
}

#[traced_test]
#[test]
fn test_emit_turn_completed_logs_level() {
    emit_turn_completed("conv-1", 2, 4, false);
    assert!(logs_contain("session.turn_completed"));
    assert!(logs_contain("level=4"));
}

#[traced_test]
#[test]
fn test_emit_session_failed_is_a_warning() {
    let err = UpstreamError::Status {
        status: 500,
        body: "boom".to_string(),
    };
    emit_session_failed("s1", "t1", 3, &err);
    assert!(logs_contain("WARN"));
    assert!(logs_contain("session.failed"));
}

#[traced_test]
#[test]
fn test_emit_batch_finished_and_cancel() {
    emit_batch_cancel_requested(SetType::Eval);
    emit_batch_finished(SetType::Eval, BatchStatus::Cancelled, 1, 0, 4, 1200);
    assert!(logs_contain("batch.cancel_requested"));
    assert!(logs_contain("status=cancelled"));
}

#[traced_test]
#[test]
fn test_batch_span_enter_creates_span() {
    let span = BatchSpan::new(SetType::MiniDev, "batch-span").enter();
    drop(span);
}

#[traced_test]
#[tokio::test]
async fn test_batch_run_emits_lifecycle_events() {
    let sim = Arc::new(
        ScriptedSimulation::new()
            .with_student(Student::new("s1", "Ada"), vec![Topic::new("t1", "Fractions")])
            .complete_after("s1", "t1", 1),
    );
    let analysis = Arc::new(AnalysisClient::new(
        Arc::new(ScriptedChatModel::new()),
        AnalysisConfig::default(),
    ));
    let orch = BatchOrchestrator::new(sim.clone(), sim, analysis, BatchConfig::default());

    orch.launch_batch(SetType::Dev).await.unwrap();
    orch.wait_for_completion(SetType::Dev).await;

    assert!(logs_contain("batch.launched"));
    assert!(logs_contain("session.started"));
    assert!(logs_contain("session.finished"));
    assert!(logs_contain("batch.finished"));
}

#[traced_test]
#[tokio::test]
async fn test_degraded_analysis_is_logged_not_raised() {
    let sim = Arc::new(
        ScriptedSimulation::new()
            .with_student(Student::new("s1", "Ada"), vec![Topic::new("t1", "Fractions")])
            .complete_after("s1", "t1", 1),
    );
    let analysis = Arc::new(AnalysisClient::new(
        Arc::new(ScriptedChatModel::failing(AnalysisError::EmptyCompletion)),
        AnalysisConfig::default(),
    ));
    let orch = BatchOrchestrator::new(sim.clone(), sim, analysis.clone(), BatchConfig::default());

    orch.launch_batch(SetType::Dev).await.unwrap();
    assert_eq!(orch.wait_for_completion(SetType::Dev).await, BatchStatus::Completed);

    assert!(logs_contain("analysis.degraded"));
    assert_eq!(analysis.degraded_calls(), 2);
}
