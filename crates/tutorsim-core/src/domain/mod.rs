//! Domain models for Tutorsim.
//!
//! - `StudentTopicPair`: one simulation task, fixed at discovery time
//! - `SimulationRecord`: the permanent verdict for one pair
//! - `BatchStatus` / `BatchStatusReport`: batch lifecycle as seen by pollers

pub mod pair;
pub mod record;
pub mod status;

pub use pair::StudentTopicPair;
pub use record::{SessionEnd, SimulationRecord};
pub use status::{progress_percent, BatchStatus, BatchStatusReport};
