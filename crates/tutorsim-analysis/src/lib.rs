//! Tutorsim-Analysis: LLM Understanding Analysis
//!
//! This crate turns a tutoring transcript into a pedagogical assessment
//! with two structured-output model calls: infer the student's
//! understanding level, then suggest what the tutor should say next.
//!
//! ## Layer 1 - Model I/O
//!
//! Focus: degrade, don't fail. A bad model response costs one turn's
//! accuracy, never a session.
//!
//! ## Key Components
//!
//! - `ChatModel`: the model seam, with `OpenAiChatModel` for real endpoints
//! - `AnalysisClient`: prompts + parsing + the fallback boundary
//! - `Transcript`, `AnalysisResult`, `SuggestionResult`, `UnderstandingLevel`

pub mod client;
mod error;
pub mod fakes;
pub mod model;
pub mod payload;
pub mod prompts;
pub mod transcript;

pub use client::{AnalysisClient, AnalysisConfig};
pub use error::AnalysisError;
pub use model::{CallPurpose, ChatMessage, ChatModel, ChatModelConfig, ChatRequest, OpenAiChatModel};
pub use payload::{AnalysisResult, StructuredOutput, SuggestionResult, UnderstandingLevel};
pub use transcript::{Transcript, Turn};
