//! Per-iteration text reassembly
//!
//! Each iteration owns its own buffer. Chunks append to it; `complete`
//! attaches the server's metadata but keeps the locally accumulated text,
//! unless no chunk was ever seen (a subscriber that joined late).

use crate::bus::{IterationEvent, StreamEvent};
use crate::provider::TokenUsage;
use crate::store::models::{ExecutionId, ExecutionStatus};
use std::collections::BTreeMap;
use tracing::debug;

/// Display state of one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationPhase {
    /// Chunks are arriving
    Streaming,
    /// Result received
    Completed,
    /// Error received
    Failed,
}

/// What a client shows for one iteration
#[derive(Debug, Clone, PartialEq)]
pub struct IterationView {
    /// 1-based iteration number
    pub iteration: u32,
    /// Accumulated text
    pub text: String,
    /// Display state
    pub phase: IterationPhase,
    /// Chunks received for this iteration
    pub chunks: usize,
    /// Latency reported with the result
    pub response_time_ms: Option<u64>,
    /// Token accounting reported with the result
    pub tokens: Option<TokenUsage>,
    /// Failure message
    pub error: Option<String>,
}

impl IterationView {
    fn new(iteration: u32) -> Self {
        Self {
            iteration,
            text: String::new(),
            phase: IterationPhase::Streaming,
            chunks: 0,
            response_time_ms: None,
            tokens: None,
            error: None,
        }
    }

    /// Whether a terminal event arrived for this iteration
    pub fn is_terminal(&self) -> bool {
        self.phase != IterationPhase::Streaming
    }
}

/// Effect of applying one event
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Text of an iteration grew; carries the cumulative text
    Text {
        /// Iteration number
        iteration: u32,
        /// The delta just applied
        delta: String,
        /// Everything accumulated so far
        text: String,
    },
    /// Iteration completed
    Completed(IterationView),
    /// Iteration failed
    Failed {
        /// Iteration number
        iteration: u32,
        /// Failure message
        error: String,
    },
    /// Execution reached its terminal status
    Finished(ExecutionStatus),
    /// Event had no effect (after a terminal event of the same iteration)
    Ignored,
}

/// Client-side view of one execution
#[derive(Debug, Clone)]
pub struct Reassembly {
    execution_id: ExecutionId,
    iterations: BTreeMap<u32, IterationView>,
    final_status: Option<ExecutionStatus>,
}

impl Reassembly {
    /// Empty view of an execution
    pub fn new(execution_id: impl Into<ExecutionId>) -> Self {
        Self {
            execution_id: execution_id.into(),
            iterations: BTreeMap::new(),
            final_status: None,
        }
    }

    /// Execution this view belongs to
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// View of one iteration, if any event arrived for it
    pub fn iteration(&self, iteration: u32) -> Option<&IterationView> {
        self.iterations.get(&iteration)
    }

    /// Every iteration seen, in iteration order
    pub fn iterations(&self) -> impl Iterator<Item = &IterationView> {
        self.iterations.values()
    }

    /// Terminal status, once received
    pub fn final_status(&self) -> Option<ExecutionStatus> {
        self.final_status
    }

    /// Fold one event into the view
    pub fn apply(&mut self, event: &StreamEvent) -> Update {
        match event {
            StreamEvent::Final(status) => {
                self.final_status = Some(status.status);
                Update::Finished(status.status)
            }
            StreamEvent::Iteration(event) => self.apply_iteration(event),
        }
    }

    fn apply_iteration(&mut self, event: &IterationEvent) -> Update {
        let iteration = event.iteration();
        let view = self
            .iterations
            .entry(iteration)
            .or_insert_with(|| IterationView::new(iteration));

        if view.is_terminal() {
            debug!(
                execution_id = %self.execution_id,
                iteration,
                "Ignoring event after iteration finished"
            );
            return Update::Ignored;
        }

        match event {
            IterationEvent::Chunk { content, .. } => {
                view.text.push_str(content);
                view.chunks += 1;
                Update::Text {
                    iteration,
                    delta: content.clone(),
                    text: view.text.clone(),
                }
            }
            IterationEvent::Complete { result, .. } => {
                if view.chunks == 0 {
                    view.text = result.response_text.clone();
                }
                view.phase = IterationPhase::Completed;
                view.response_time_ms = Some(result.response_time_ms);
                view.tokens = Some(result.tokens_used);
                Update::Completed(view.clone())
            }
            IterationEvent::Error { error, .. } => {
                view.phase = IterationPhase::Failed;
                view.error = Some(error.clone());
                Update::Failed {
                    iteration,
                    error: error.clone(),
                }
            }
        }
    }
}
