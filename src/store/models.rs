//! Execution data models
//!
//! Prompts, executions and per-iteration results, plus the status report
//! served to polling clients.

use crate::error::ValidationError;
use crate::provider::types::{GenerationParams, ProviderKind, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an execution
pub type ExecutionId = String;

/// Unique identifier for a prompt configuration
pub type PromptId = String;

/// Unique identifier for a template
pub type TemplateId = String;

/// Smallest accepted iteration count
pub const MIN_ITERATIONS: u32 = 1;
/// Largest accepted iteration count
pub const MAX_ITERATIONS: u32 = 10;
/// Maximum prompt length in characters
pub const MAX_PROMPT_LENGTH: usize = 100_000;
/// Maximum template name length in characters
pub const MAX_TEMPLATE_NAME_LENGTH: usize = 255;
/// Prompts listed in the usage report
pub const RECENT_PROMPTS_LIMIT: u32 = 5;

/// Lifecycle state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Created, not yet picked up
    Pending,
    /// Iterations in progress
    Running,
    /// Orchestration finished (individual iterations may have failed)
    Completed,
    /// Orchestration aborted
    Failed,
    /// Reserved; no cancellation path exists yet
    Cancelled,
}

impl ExecutionStatus {
    /// Convert the status to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step
    ///
    /// pending -> running -> {completed, failed}
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (ExecutionStatus::Pending, ExecutionStatus::Running)
                | (ExecutionStatus::Running, ExecutionStatus::Completed)
                | (ExecutionStatus::Running, ExecutionStatus::Failed)
        )
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// Text generated
    Success,
    /// Provider or transport failure
    Error,
    /// Deadline exceeded
    Timeout,
    /// Abandoned before completion
    Cancelled,
}

impl ResultStatus {
    /// Convert the status to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Error => "error",
            ResultStatus::Timeout => "timeout",
            ResultStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ResultStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ResultStatus::Success),
            "error" => Ok(ResultStatus::Error),
            "timeout" => Ok(ResultStatus::Timeout),
            "cancelled" => Ok(ResultStatus::Cancelled),
            other => Err(format!("unknown result status: {}", other)),
        }
    }
}

/// A validated prompt configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Unique identifier for the prompt
    pub id: PromptId,
    /// System prompt (may be empty)
    pub system_prompt: String,
    /// User prompt
    pub user_prompt: String,
    /// Model id the prompt runs against
    pub selected_model: String,
    /// Sampling parameters
    pub parameters: GenerationParams,
    /// When the prompt was created (Unix timestamp)
    pub created_at: i64,
}

impl Prompt {
    /// Validate the inputs and build a prompt with a fresh id
    pub fn new(
        system_prompt: String,
        user_prompt: String,
        selected_model: String,
        parameters: GenerationParams,
    ) -> Result<Self, ValidationError> {
        if user_prompt.trim().is_empty() {
            return Err(ValidationError::MissingField("user_prompt"));
        }
        if selected_model.trim().is_empty() {
            return Err(ValidationError::MissingField("selected_model"));
        }
        if user_prompt.chars().count() > MAX_PROMPT_LENGTH {
            return Err(ValidationError::TooLong {
                field: "user_prompt",
                max: MAX_PROMPT_LENGTH,
            });
        }
        if system_prompt.chars().count() > MAX_PROMPT_LENGTH {
            return Err(ValidationError::TooLong {
                field: "system_prompt",
                max: MAX_PROMPT_LENGTH,
            });
        }

        let provider = ProviderKind::from_model_id(&selected_model)
            .ok_or_else(|| ValidationError::UnknownModel(selected_model.clone()))?;
        parameters.validate()?;

        let min_tokens = provider.min_max_tokens(&selected_model);
        if parameters.max_tokens < min_tokens {
            return Err(ValidationError::MaxTokensTooLow {
                model: selected_model,
                min: min_tokens,
            });
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            system_prompt,
            user_prompt,
            selected_model,
            parameters,
            created_at: Utc::now().timestamp(),
        })
    }

    /// Provider family of the selected model
    pub fn provider(&self) -> Option<ProviderKind> {
        ProviderKind::from_model_id(&self.selected_model)
    }
}

/// One submission of a prompt, run `iterations` times
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier for the execution
    pub id: ExecutionId,
    /// Prompt this execution runs
    pub prompt_id: PromptId,
    /// Number of iterations requested (1..=10)
    pub iterations: u32,
    /// Whether iterations stream their output
    pub streaming: bool,
    /// Lifecycle state
    pub status: ExecutionStatus,
    /// When the execution was submitted (Unix timestamp)
    pub started_at: Option<i64>,
    /// When orchestration finished (Unix timestamp)
    pub completed_at: Option<i64>,
}

impl Execution {
    /// Validate the iteration count and build a pending execution
    pub fn new(
        prompt_id: PromptId,
        iterations: u32,
        streaming: bool,
    ) -> Result<Self, ValidationError> {
        validate_iterations(iterations)?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            prompt_id,
            iterations,
            streaming,
            status: ExecutionStatus::Pending,
            started_at: Some(Utc::now().timestamp()),
            completed_at: None,
        })
    }

    /// Whether orchestration has finished, successfully or not
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Check an iteration count against 1..=10
pub fn validate_iterations(iterations: u32) -> Result<(), ValidationError> {
    if (MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations) {
        Ok(())
    } else {
        Err(ValidationError::IterationsOutOfRange {
            value: iterations,
            min: MIN_ITERATIONS,
            max: MAX_ITERATIONS,
        })
    }
}

/// Terminal outcome of one iteration (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Unique identifier for the result
    pub id: String,
    /// Execution this result belongs to
    pub execution_id: ExecutionId,
    /// 1-based iteration number, unique within the execution
    pub iteration_number: u32,
    /// Outcome
    pub status: ResultStatus,
    /// Generated text (empty on failure)
    pub response_text: String,
    /// Token accounting
    pub tokens_used: TokenUsage,
    /// Latency of the iteration
    pub response_time_ms: u64,
    /// Failure description
    pub error_message: Option<String>,
}

impl ResultRecord {
    /// A successful iteration
    pub fn success(
        execution_id: &str,
        iteration_number: u32,
        response_text: String,
        tokens_used: TokenUsage,
        response_time_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            execution_id: execution_id.to_string(),
            iteration_number,
            status: ResultStatus::Success,
            response_text,
            tokens_used,
            response_time_ms,
            error_message: None,
        }
    }

    /// A failed iteration with empty text
    pub fn failure(execution_id: &str, iteration_number: u32, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            execution_id: execution_id.to_string(),
            iteration_number,
            status: ResultStatus::Error,
            response_text: String::new(),
            tokens_used: TokenUsage::default(),
            response_time_ms: 0,
            error_message: Some(message.into()),
        }
    }

    /// Whether the iteration produced text
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// Execution joined with its prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDetails {
    /// Execution fields
    #[serde(flatten)]
    pub execution: Execution,
    /// Prompt the execution runs
    pub prompt: Prompt,
}

/// Read model served to polling clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Execution with its prompt
    pub execution: ExecutionDetails,
    /// Results recorded so far, ordered by iteration
    pub results: Vec<ResultRecord>,
    /// True once orchestration reached a terminal state
    pub completed: bool,
}

impl StatusReport {
    /// Assemble a report; `completed` follows the execution status
    pub fn new(execution: Execution, prompt: Prompt, results: Vec<ResultRecord>) -> Self {
        let completed = execution.is_finished();
        Self {
            execution: ExecutionDetails { execution, prompt },
            results,
            completed,
        }
    }
}

/// Reusable prompt skeleton
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Unique identifier for the template
    pub id: TemplateId,
    /// Unique display name
    pub name: String,
    /// Free-form description
    pub description: Option<String>,
    /// System prompt to prefill
    pub system_prompt: String,
    /// User prompt to prefill
    pub user_prompt: String,
    /// Sampling parameters to prefill
    pub default_parameters: GenerationParams,
    /// Creation time (Unix timestamp)
    pub created_at: i64,
    /// Last update time (Unix timestamp)
    pub updated_at: i64,
}

/// Template fields as submitted on create or update
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TemplateDraft {
    /// Unique display name
    #[serde(default)]
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// System prompt
    #[serde(default)]
    pub system_prompt: String,
    /// User prompt
    #[serde(default)]
    pub user_prompt: String,
    /// Missing fields take the prompt defaults
    #[serde(default)]
    pub default_parameters: GenerationParams,
}

impl TemplateDraft {
    fn validate(&self) -> Result<(), ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if name.chars().count() > MAX_TEMPLATE_NAME_LENGTH {
            return Err(ValidationError::TooLong {
                field: "name",
                max: MAX_TEMPLATE_NAME_LENGTH,
            });
        }
        for (field, text) in [
            ("system_prompt", &self.system_prompt),
            ("user_prompt", &self.user_prompt),
        ] {
            if text.chars().count() > MAX_PROMPT_LENGTH {
                return Err(ValidationError::TooLong {
                    field,
                    max: MAX_PROMPT_LENGTH,
                });
            }
        }
        self.default_parameters.validate()
    }
}

impl Template {
    /// Validate a draft and build a template with a fresh id
    pub fn new(draft: TemplateDraft) -> Result<Self, ValidationError> {
        draft.validate()?;
        let now = Utc::now().timestamp();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: draft.name.trim().to_string(),
            description: draft.description,
            system_prompt: draft.system_prompt,
            user_prompt: draft.user_prompt,
            default_parameters: draft.default_parameters,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace every editable field with the draft's
    pub fn apply(&mut self, draft: TemplateDraft) -> Result<(), ValidationError> {
        draft.validate()?;
        self.name = draft.name.trim().to_string();
        self.description = draft.description;
        self.system_prompt = draft.system_prompt;
        self.user_prompt = draft.user_prompt;
        self.default_parameters = draft.default_parameters;
        self.updated_at = Utc::now().timestamp();
        Ok(())
    }
}

/// Row counts across the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStatistics {
    /// Stored prompt configurations
    pub prompts_count: u64,
    /// Stored executions
    pub executions_count: u64,
    /// Stored iteration results
    pub results_count: u64,
    /// Stored templates
    pub templates_count: u64,
}

/// A recently submitted prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentPrompt {
    /// Prompt id
    pub id: PromptId,
    /// Model the prompt ran against
    pub model: String,
    /// System prompt
    pub system_prompt: String,
    /// User prompt
    pub user_prompt: String,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Sampling parameters
    pub parameters: GenerationParams,
}

impl From<Prompt> for RecentPrompt {
    fn from(prompt: Prompt) -> Self {
        Self {
            created_at: DateTime::from_timestamp(prompt.created_at, 0).unwrap_or_default(),
            id: prompt.id,
            model: prompt.selected_model,
            system_prompt: prompt.system_prompt,
            user_prompt: prompt.user_prompt,
            parameters: prompt.parameters,
        }
    }
}

/// How many prompts ran against one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Model id
    pub model: String,
    /// Prompts submitted for it
    pub count: u64,
}

/// Usage history served by `GET /api/usage_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    /// Row counts
    pub statistics: UsageStatistics,
    /// Newest prompts first
    pub recent_prompts: Vec<RecentPrompt>,
    /// Most used model first
    pub model_usage: Vec<ModelUsage>,
}
