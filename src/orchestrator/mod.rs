//! Execution orchestration
//!
//! Drives the iterations of one execution on a background task, persisting a
//! result per iteration and publishing progress on the broadcast bus.

pub mod runner;

pub use runner::{Orchestrator, OrchestratorError, RunMode, RunSummary};
