//! Chat turn orchestration.

pub mod orchestrator;

pub use orchestrator::{ChatOrchestrator, TurnRequest};
