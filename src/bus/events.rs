//! Events published while an execution runs

use crate::store::models::{ExecutionId, ExecutionStatus, ResultRecord};
use serde::{Deserialize, Serialize};

/// Per-iteration progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IterationEvent {
    /// A content delta, published the moment it is decoded
    Chunk {
        /// 1-based iteration number
        iteration: u32,
        /// The delta only, never the accumulated text
        content: String,
    },
    /// The iteration's result was persisted
    Complete {
        /// 1-based iteration number
        iteration: u32,
        /// Stored result
        result: ResultRecord,
    },
    /// The iteration failed
    Error {
        /// 1-based iteration number
        iteration: u32,
        /// Failure description
        error: String,
    },
}

impl IterationEvent {
    /// Iteration the event belongs to
    pub fn iteration(&self) -> u32 {
        match self {
            IterationEvent::Chunk { iteration, .. }
            | IterationEvent::Complete { iteration, .. }
            | IterationEvent::Error { iteration, .. } => *iteration,
        }
    }
}

/// Terminal status broadcast once per execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalStatus {
    /// Completed or failed
    pub status: ExecutionStatus,
}

/// Anything delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    /// Iteration progress
    Iteration(IterationEvent),
    /// Execution finished
    Final(FinalStatus),
}

impl From<IterationEvent> for StreamEvent {
    fn from(event: IterationEvent) -> Self {
        StreamEvent::Iteration(event)
    }
}

impl From<FinalStatus> for StreamEvent {
    fn from(status: FinalStatus) -> Self {
        StreamEvent::Final(status)
    }
}

/// Topic an event is published on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Chunk/complete/error events for every iteration of one execution
    Iterations(ExecutionId),
    /// The final status of one execution
    Execution(ExecutionId),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Iterations(id) => write!(f, "iteration_{}", id),
            Topic::Execution(id) => write!(f, "execution_{}", id),
        }
    }
}
