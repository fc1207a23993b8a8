//! Tutorsim-Core: Batch Tutoring Simulation
//!
//! This crate drives many simulated tutoring conversations at once and
//! turns them into a scored prediction set.
//!
//! ## Layer 2 - Orchestration
//!
//! Focus: bounded concurrency, a strictly sequential turn loop per session,
//! and failure-tolerant aggregation. One failing pair never stops a batch.
//!
//! ## Key Components
//!
//! - `SessionDriver`: one conversation, turn by turn
//! - `SessionPool`: at most K sessions live
//! - `BatchState`: the synchronised record collection for one batch
//! - `BatchOrchestrator`: discovery, launch, status, cancellation, submission
//! - `Submitter`: predictions and tutoring score for a completed batch

pub mod batch;
pub mod config;
pub mod domain;
mod error;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod pool;
pub mod session;
pub mod submit;
pub mod telemetry;

pub use batch::{BatchSnapshot, BatchState};
pub use config::{BatchConfig, SimulatorConfig};
pub use domain::{BatchStatus, BatchStatusReport, SessionEnd, SimulationRecord, StudentTopicPair};
pub use error::{Result, SimulatorError};
pub use orchestrator::{BatchOrchestrator, Discovery, LaunchReceipt};
pub use pool::{PoolReport, SessionPool};
pub use session::{opener, SessionDriver, SessionOutcome, SessionState, TurnOutcome};
pub use submit::{SubmissionResult, Submitter};
