//! Record store
//!
//! Persistence collaborator for prompts, executions, results and templates,
//! plus the aggregate usage report. The orchestrator and the HTTP handlers
//! only see the [`ExecutionStore`] trait; [`SqliteStore`] is the production
//! implementation.

pub mod db;
pub mod models;

pub use db::SqliteStore;
pub use models::{
    Execution, ExecutionId, ExecutionStatus, Prompt, ResultRecord, ResultStatus, StatusReport,
    Template, TemplateDraft, UsageReport,
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur reading or writing records
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Database driver error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database file location could not be prepared
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record addressed by an update does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Lifecycle rule violated by a status update
    #[error("Invalid status transition for execution {id}: {from} -> {to}")]
    InvalidTransition {
        /// Execution id
        id: ExecutionId,
        /// Current status
        from: ExecutionStatus,
        /// Requested status
        to: ExecutionStatus,
    },

    /// A result for this iteration already exists
    #[error("Result already recorded for execution {execution_id}, iteration {iteration}")]
    DuplicateResult {
        /// Execution id
        execution_id: ExecutionId,
        /// Iteration number
        iteration: u32,
    },

    /// Another template already uses this name
    #[error("Template name already taken: {0}")]
    DuplicateName(String),

    /// Stored row could not be decoded into a model
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Create/update operations for executions and append-only results, template
/// CRUD and usage aggregates
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a prompt configuration
    async fn create_prompt(&self, prompt: &Prompt) -> Result<(), PersistenceError>;

    /// Fetch a prompt by id
    async fn get_prompt(&self, id: &str) -> Result<Option<Prompt>, PersistenceError>;

    /// Insert a new execution
    async fn create_execution(&self, execution: &Execution) -> Result<(), PersistenceError>;

    /// Fetch an execution by id
    async fn get_execution(&self, id: &str) -> Result<Option<Execution>, PersistenceError>;

    /// Move an execution to `status`, enforcing the lifecycle rule
    ///
    /// `completed_at` is recorded when given. Returns the updated execution.
    async fn update_execution_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        completed_at: Option<i64>,
    ) -> Result<Execution, PersistenceError>;

    /// Append the terminal result of one iteration
    async fn append_result(&self, result: &ResultRecord) -> Result<(), PersistenceError>;

    /// Look up the result of one iteration
    async fn find_result(
        &self,
        execution_id: &str,
        iteration: u32,
    ) -> Result<Option<ResultRecord>, PersistenceError>;

    /// All results of an execution, ordered by iteration
    async fn list_results(&self, execution_id: &str) -> Result<Vec<ResultRecord>, PersistenceError>;

    /// Insert a template; names are unique
    async fn create_template(&self, template: &Template) -> Result<(), PersistenceError>;

    /// Fetch a template by id
    async fn get_template(&self, id: &str) -> Result<Option<Template>, PersistenceError>;

    /// Every template, ordered by name
    async fn list_templates(&self) -> Result<Vec<Template>, PersistenceError>;

    /// Overwrite a stored template
    async fn update_template(&self, template: &Template) -> Result<(), PersistenceError>;

    /// Remove a template; returns whether it existed
    async fn delete_template(&self, id: &str) -> Result<bool, PersistenceError>;

    /// Row counts, newest prompts and per-model prompt counts
    async fn usage_report(&self) -> Result<UsageReport, PersistenceError>;

    /// Execution, prompt and results in one read
    async fn status_report(&self, execution_id: &str) -> Result<Option<StatusReport>, PersistenceError> {
        let Some(execution) = self.get_execution(execution_id).await? else {
            return Ok(None);
        };
        let prompt = self.get_prompt(&execution.prompt_id).await?.ok_or_else(|| {
            PersistenceError::Corrupt(format!(
                "execution {} references missing prompt {}",
                execution.id, execution.prompt_id
            ))
        })?;
        let results = self.list_results(execution_id).await?;
        Ok(Some(StatusReport::new(execution, prompt, results)))
    }
}
