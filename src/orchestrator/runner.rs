//! Sequential iteration runner
//!
//! One background task per execution. Iterations never overlap: iteration
//! `i + 1` starts only after the result of iteration `i` is stored.
//!
//! Batch failures are recorded and the loop moves on. A streaming failure
//! records an error for the in-flight iteration, skips the rest and marks the
//! execution failed.

use crate::bus::{BroadcastBus, IterationEvent};
use crate::provider::{
    GatewayError, GenerationRequest, ProviderGateway, StreamOutcome, StreamToken,
    StreamingTransport, TokenUsage,
};
use crate::store::models::{Execution, ExecutionId, ExecutionStatus, ResultRecord};
use crate::store::{ExecutionStore, PersistenceError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors that stop orchestration before its natural end
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Execution id unknown to the store
    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    /// Execution exists but its prompt does not
    #[error("Prompt {prompt_id} for execution {execution_id} not found")]
    PromptNotFound {
        /// Execution id
        execution_id: ExecutionId,
        /// Missing prompt id
        prompt_id: String,
    },

    /// Reading or writing records failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// How each iteration talks to the generation service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One request/response call per iteration
    Batch,
    /// Incremental body, chunks published as they arrive
    Streaming,
}

impl RunMode {
    fn for_execution(execution: &Execution) -> Self {
        if execution.streaming {
            RunMode::Streaming
        } else {
            RunMode::Batch
        }
    }
}

/// Tally of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Execution that ran
    pub execution_id: ExecutionId,
    /// Terminal status written to the store
    pub status: ExecutionStatus,
    /// Iterations that stored a success result
    pub succeeded: u32,
    /// Iterations that stored an error result
    pub failed: u32,
    /// Iterations started (less than requested after a streaming abort)
    pub attempted: u32,
}

enum IterationOutcome {
    Succeeded,
    Failed,
    /// Failed and the rest of the run must be skipped
    Aborted,
}

/// Runs executions against the generation service
pub struct Orchestrator {
    store: Arc<dyn ExecutionStore>,
    gateway: ProviderGateway,
    transport: StreamingTransport,
    bus: BroadcastBus,
}

impl Orchestrator {
    /// Create an orchestrator over its collaborators
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        gateway: ProviderGateway,
        transport: StreamingTransport,
        bus: BroadcastBus,
    ) -> Self {
        Self {
            store,
            gateway,
            transport,
            bus,
        }
    }

    /// Run an execution on its own background task
    pub fn spawn(self: &Arc<Self>, execution_id: ExecutionId) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run(&execution_id).await {
                error!(execution_id = %execution_id, error = %e, "Execution aborted");
            }
        })
    }

    /// Run every iteration of an execution to completion
    ///
    /// The execution must be `pending`. Returns once the terminal status is
    /// stored and broadcast.
    pub async fn run(&self, execution_id: &str) -> Result<RunSummary, OrchestratorError> {
        let execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| OrchestratorError::ExecutionNotFound(execution_id.to_string()))?;
        let prompt = self
            .store
            .get_prompt(&execution.prompt_id)
            .await?
            .ok_or_else(|| OrchestratorError::PromptNotFound {
                execution_id: execution.id.clone(),
                prompt_id: execution.prompt_id.clone(),
            })?;

        self.store
            .update_execution_status(&execution.id, ExecutionStatus::Running, None)
            .await?;

        let mode = RunMode::for_execution(&execution);
        info!(
            execution_id = %execution.id,
            iterations = execution.iterations,
            mode = ?mode,
            provider = ?prompt.provider(),
            model = %prompt.selected_model,
            "Execution started"
        );

        let request = GenerationRequest::from_prompt(&prompt);
        match self.run_iterations(&execution, &request, mode).await {
            Ok(summary) => {
                if let Err(e) = self.finish(&execution.id, summary.status).await {
                    error!(execution_id = %execution.id, error = %e, "Could not store terminal status");
                    self.bus.publish_final(&execution.id, ExecutionStatus::Failed);
                    return Err(e.into());
                }
                info!(
                    execution_id = %execution.id,
                    status = %summary.status,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "Execution finished"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(execution_id = %execution.id, error = %e, "Execution failed while storing results");
                if let Err(finish_err) = self.finish(&execution.id, ExecutionStatus::Failed).await {
                    warn!(
                        execution_id = %execution.id,
                        error = %finish_err,
                        "Could not mark execution failed"
                    );
                    self.bus.publish_final(&execution.id, ExecutionStatus::Failed);
                }
                Err(e)
            }
        }
    }

    async fn run_iterations(
        &self,
        execution: &Execution,
        request: &GenerationRequest,
        mode: RunMode,
    ) -> Result<RunSummary, OrchestratorError> {
        let mut summary = RunSummary {
            execution_id: execution.id.clone(),
            status: ExecutionStatus::Completed,
            succeeded: 0,
            failed: 0,
            attempted: 0,
        };

        for iteration in 1..=execution.iterations {
            summary.attempted += 1;
            debug!(execution_id = %execution.id, iteration, "Starting iteration");

            let outcome = match mode {
                RunMode::Batch => self.run_batch(&execution.id, iteration, request).await?,
                RunMode::Streaming => {
                    self.run_streaming(&execution.id, iteration, request)
                        .await?
                }
            };

            match outcome {
                IterationOutcome::Succeeded => summary.succeeded += 1,
                IterationOutcome::Failed => summary.failed += 1,
                IterationOutcome::Aborted => {
                    summary.failed += 1;
                    summary.status = ExecutionStatus::Failed;
                    warn!(
                        execution_id = %execution.id,
                        iteration,
                        skipped = execution.iterations - iteration,
                        "Stream failed, skipping remaining iterations"
                    );
                    break;
                }
            }
        }

        Ok(summary)
    }

    async fn run_batch(
        &self,
        execution_id: &str,
        iteration: u32,
        request: &GenerationRequest,
    ) -> Result<IterationOutcome, PersistenceError> {
        let response = self.gateway.generate(request).await;

        if response.is_success() {
            let record = ResultRecord::success(
                execution_id,
                iteration,
                response.text,
                response.tokens_used,
                response.response_time_ms,
            );
            self.store.append_result(&record).await?;
            self.publish_complete(execution_id, iteration, record);
            Ok(IterationOutcome::Succeeded)
        } else {
            let message = response
                .error_message
                .unwrap_or_else(|| format!("Generation returned status {}", response.status.as_str()));
            let mut record = ResultRecord::failure(execution_id, iteration, message.clone());
            record.status = response.status;
            record.response_time_ms = response.response_time_ms;
            self.store.append_result(&record).await?;
            self.publish_error(execution_id, iteration, message);
            Ok(IterationOutcome::Failed)
        }
    }

    async fn run_streaming(
        &self,
        execution_id: &str,
        iteration: u32,
        request: &GenerationRequest,
    ) -> Result<IterationOutcome, PersistenceError> {
        let start = Instant::now();

        let mut tokens = match self.transport.open(request).await {
            Ok(rx) => rx,
            Err(e) => {
                return self
                    .abort_stream(execution_id, iteration, e, start)
                    .await;
            }
        };

        while let Some(token) = tokens.recv().await {
            match token {
                StreamToken::Chunk(content) => {
                    self.bus.publish_iteration(
                        execution_id,
                        IterationEvent::Chunk { iteration, content },
                    );
                }
                StreamToken::Done(outcome) => {
                    let record = streamed_record(execution_id, iteration, outcome);
                    self.store.append_result(&record).await?;
                    self.publish_complete(execution_id, iteration, record);
                    return Ok(IterationOutcome::Succeeded);
                }
                StreamToken::Failed(e) => {
                    return self
                        .abort_stream(execution_id, iteration, e, start)
                        .await;
                }
            }
        }

        let closed = GatewayError::Transport("Stream closed without a terminal frame".to_string());
        self.abort_stream(execution_id, iteration, closed, start)
            .await
    }

    async fn abort_stream(
        &self,
        execution_id: &str,
        iteration: u32,
        err: GatewayError,
        start: Instant,
    ) -> Result<IterationOutcome, PersistenceError> {
        error!(execution_id = %execution_id, iteration, error = %err, "Streaming iteration failed");
        let message = err.to_string();
        let mut record = ResultRecord::failure(execution_id, iteration, message.clone());
        record.response_time_ms = start.elapsed().as_millis() as u64;
        self.store.append_result(&record).await?;
        self.publish_error(execution_id, iteration, message);
        Ok(IterationOutcome::Aborted)
    }

    fn publish_complete(&self, execution_id: &str, iteration: u32, result: ResultRecord) {
        self.bus
            .publish_iteration(execution_id, IterationEvent::Complete { iteration, result });
    }

    fn publish_error(&self, execution_id: &str, iteration: u32, error: String) {
        self.bus
            .publish_iteration(execution_id, IterationEvent::Error { iteration, error });
    }

    async fn finish(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
    ) -> Result<(), PersistenceError> {
        self.store
            .update_execution_status(execution_id, status, Some(Utc::now().timestamp()))
            .await?;
        self.bus.publish_final(execution_id, status);
        Ok(())
    }
}

/// Output tokens approximated by the word count of the streamed text
fn streamed_record(execution_id: &str, iteration: u32, outcome: StreamOutcome) -> ResultRecord {
    let words = outcome.text.split_whitespace().count();
    let tokens = TokenUsage::new(0, u32::try_from(words).unwrap_or(u32::MAX));
    ResultRecord::success(
        execution_id,
        iteration,
        outcome.text,
        tokens,
        outcome.response_time_ms,
    )
}
