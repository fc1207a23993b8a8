//! Tutorsim-Upstream: Simulation and Scoring Service Clients
//!
//! This crate owns every call Tutorsim makes to the third-party student
//! simulation API: roster discovery, the conversation turn loop, and the
//! scoring endpoints that grade a finished batch.
//!
//! ## Layer 0 - Upstream I/O
//!
//! Focus: faithful wire types and one distinct error for any non-success
//! answer, so callers decide whether a failure aborts a pair or the batch.
//!
//! ## Key Components
//!
//! - `SimulationService` / `ScoringService`: transport-agnostic traits
//! - `HttpSimulationClient`: reqwest implementation of both
//! - `fakes::ScriptedSimulation`: scripted in-memory implementation for tests

mod error;
pub mod fakes;
mod http;
pub mod service;
pub mod types;

pub use error::UpstreamError;
pub use http::{HttpSimulationClient, UpstreamConfig};
pub use service::{ScoringService, SimulationService};
pub use types::{ConversationStart, Prediction, SetType, Student, StudentReply, Topic};

/// Result type for upstream operations
pub type Result<T> = std::result::Result<T, UpstreamError>;
