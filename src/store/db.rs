//! SQLite record store
//!
//! Handles all database interactions for prompts, executions, results and
//! templates.

use crate::provider::types::{GenerationParams, TokenUsage};
use crate::store::models::{
    Execution, ExecutionStatus, ModelUsage, Prompt, RecentPrompt, ResultRecord, ResultStatus,
    Template, UsageReport, UsageStatistics, RECENT_PROMPTS_LIMIT,
};
use crate::store::{ExecutionStore, PersistenceError};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

/// Database-backed [`ExecutionStore`]
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct PromptRow {
    id: String,
    system_prompt: String,
    user_prompt: String,
    selected_model: String,
    temperature: f64,
    max_tokens: i64,
    top_p: f64,
    created_at: i64,
}

impl TryFrom<PromptRow> for Prompt {
    type Error = PersistenceError;

    fn try_from(row: PromptRow) -> Result<Self, Self::Error> {
        Ok(Prompt {
            id: row.id,
            system_prompt: row.system_prompt,
            user_prompt: row.user_prompt,
            selected_model: row.selected_model,
            parameters: GenerationParams {
                temperature: row.temperature,
                max_tokens: to_u32(row.max_tokens, "max_tokens")?,
                top_p: row.top_p,
            },
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    prompt_id: String,
    iterations: i64,
    streaming: bool,
    status: String,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = PersistenceError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        Ok(Execution {
            id: row.id,
            prompt_id: row.prompt_id,
            iterations: to_u32(row.iterations, "iterations")?,
            streaming: row.streaming,
            status: ExecutionStatus::from_str(&row.status).map_err(PersistenceError::Corrupt)?,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
struct ResultRow {
    id: String,
    execution_id: String,
    iteration_number: i64,
    status: String,
    response_text: String,
    input_tokens: i64,
    output_tokens: i64,
    response_time_ms: i64,
    error_message: Option<String>,
}

impl TryFrom<ResultRow> for ResultRecord {
    type Error = PersistenceError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        Ok(ResultRecord {
            id: row.id,
            execution_id: row.execution_id,
            iteration_number: to_u32(row.iteration_number, "iteration_number")?,
            status: ResultStatus::from_str(&row.status).map_err(PersistenceError::Corrupt)?,
            response_text: row.response_text,
            tokens_used: TokenUsage::new(
                to_u32(row.input_tokens, "input_tokens")?,
                to_u32(row.output_tokens, "output_tokens")?,
            ),
            response_time_ms: u64::try_from(row.response_time_ms).map_err(|_| {
                PersistenceError::Corrupt(format!(
                    "negative response_time_ms: {}",
                    row.response_time_ms
                ))
            })?,
            error_message: row.error_message,
        })
    }
}

#[derive(FromRow)]
struct TemplateRow {
    id: String,
    name: String,
    description: Option<String>,
    system_prompt: String,
    user_prompt: String,
    temperature: f64,
    max_tokens: i64,
    top_p: f64,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<TemplateRow> for Template {
    type Error = PersistenceError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        Ok(Template {
            id: row.id,
            name: row.name,
            description: row.description,
            system_prompt: row.system_prompt,
            user_prompt: row.user_prompt,
            default_parameters: GenerationParams {
                temperature: row.temperature,
                max_tokens: to_u32(row.max_tokens, "max_tokens")?,
                top_p: row.top_p,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn to_u32(value: i64, column: &str) -> Result<u32, PersistenceError> {
    u32::try_from(value)
        .map_err(|_| PersistenceError::Corrupt(format!("{} out of range: {}", column, value)))
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

const PROMPT_COLUMNS: &str =
    "id, system_prompt, user_prompt, selected_model, temperature, max_tokens, top_p, created_at";

const TEMPLATE_COLUMNS: &str = "id, name, description, system_prompt, user_prompt, \
     temperature, max_tokens, top_p, created_at, updated_at";

/// Embedded schema, applied in order on every connect
const MIGRATIONS: [&str; 2] = [
    include_str!("../../migrations/001_create_executions.sql"),
    include_str!("../../migrations/002_create_templates.sql"),
];

const EXECUTION_COLUMNS: &str =
    "id, prompt_id, iterations, streaming, status, started_at, completed_at";

const RESULT_COLUMNS: &str = "id, execution_id, iteration_number, status, response_text, \
     input_tokens, output_tokens, response_time_ms, error_message";

impl SqliteStore {
    /// Open (or create) the database and run migrations
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file, or a `sqlite:` URL
    pub async fn connect(db_path: &str) -> Result<Self, PersistenceError> {
        let connection_string = if db_path.starts_with("sqlite:") {
            db_path.to_string()
        } else {
            // Ensure parent directory exists
            if let Some(parent) = PathBuf::from(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            format!("sqlite:{}", db_path)
        };

        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!("Connected to SQLite database at: {}", db_path);

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Private in-memory database, for tests and ephemeral runs
    pub async fn in_memory() -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Each connection to :memory: is its own database, so keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), PersistenceError> {
        debug!("Running database migrations...");

        for migration_sql in MIGRATIONS {
            // Drop comment lines, then split into statements
            let cleaned_sql: String = migration_sql
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("--"))
                .collect::<Vec<_>>()
                .join(" ");

            for statement in cleaned_sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(statement).execute(&self.pool).await?;
            }
        }

        debug!("Database migrations completed successfully");
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn create_prompt(&self, prompt: &Prompt) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO prompts (id, system_prompt, user_prompt, selected_model, temperature, max_tokens, top_p, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&prompt.id)
        .bind(&prompt.system_prompt)
        .bind(&prompt.user_prompt)
        .bind(&prompt.selected_model)
        .bind(prompt.parameters.temperature)
        .bind(i64::from(prompt.parameters.max_tokens))
        .bind(prompt.parameters.top_p)
        .bind(prompt.created_at)
        .execute(&self.pool)
        .await?;

        debug!(prompt_id = %prompt.id, "Created prompt");
        Ok(())
    }

    async fn get_prompt(&self, id: &str) -> Result<Option<Prompt>, PersistenceError> {
        let row = sqlx::query_as::<_, PromptRow>(&format!(
            "SELECT {} FROM prompts WHERE id = ?",
            PROMPT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Prompt::try_from).transpose()
    }

    async fn create_execution(&self, execution: &Execution) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO executions (id, prompt_id, iterations, streaming, status, started_at, completed_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&execution.id)
        .bind(&execution.prompt_id)
        .bind(i64::from(execution.iterations))
        .bind(execution.streaming)
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        debug!(execution_id = %execution.id, iterations = execution.iterations, "Created execution");
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<Execution>, PersistenceError> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM executions WHERE id = ?",
            EXECUTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Execution::try_from).transpose()
    }

    async fn update_execution_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        completed_at: Option<i64>,
    ) -> Result<Execution, PersistenceError> {
        let current = self
            .get_execution(id)
            .await?
            .ok_or_else(|| PersistenceError::NotFound(format!("execution {}", id)))?;

        if !current.status.can_transition_to(status) {
            return Err(PersistenceError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to: status,
            });
        }

        // Compare-and-set on the status we validated against
        let updated = sqlx::query(
            "UPDATE executions SET status = ?, completed_at = COALESCE(?, completed_at) \
             WHERE id = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(completed_at)
        .bind(id)
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let latest = self
                .get_execution(id)
                .await?
                .map(|e| e.status)
                .unwrap_or(current.status);
            return Err(PersistenceError::InvalidTransition {
                id: id.to_string(),
                from: latest,
                to: status,
            });
        }

        debug!(execution_id = %id, from = %current.status, to = %status, "Updated execution status");

        Ok(Execution {
            status,
            completed_at: completed_at.or(current.completed_at),
            ..current
        })
    }

    async fn append_result(&self, result: &ResultRecord) -> Result<(), PersistenceError> {
        let inserted = sqlx::query(
            "INSERT INTO results (id, execution_id, iteration_number, status, response_text, input_tokens, output_tokens, response_time_ms, error_message, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&result.id)
        .bind(&result.execution_id)
        .bind(i64::from(result.iteration_number))
        .bind(result.status.as_str())
        .bind(&result.response_text)
        .bind(i64::from(result.tokens_used.input))
        .bind(i64::from(result.tokens_used.output))
        .bind(i64::try_from(result.response_time_ms).unwrap_or(i64::MAX))
        .bind(&result.error_message)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {
                debug!(
                    execution_id = %result.execution_id,
                    iteration = result.iteration_number,
                    status = result.status.as_str(),
                    "Recorded result"
                );
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(PersistenceError::DuplicateResult {
                execution_id: result.execution_id.clone(),
                iteration: result.iteration_number,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_result(
        &self,
        execution_id: &str,
        iteration: u32,
    ) -> Result<Option<ResultRecord>, PersistenceError> {
        let row = sqlx::query_as::<_, ResultRow>(&format!(
            "SELECT {} FROM results WHERE execution_id = ? AND iteration_number = ?",
            RESULT_COLUMNS
        ))
        .bind(execution_id)
        .bind(i64::from(iteration))
        .fetch_optional(&self.pool)
        .await?;

        row.map(ResultRecord::try_from).transpose()
    }

    async fn list_results(&self, execution_id: &str) -> Result<Vec<ResultRecord>, PersistenceError> {
        let rows = sqlx::query_as::<_, ResultRow>(&format!(
            "SELECT {} FROM results WHERE execution_id = ? ORDER BY iteration_number ASC",
            RESULT_COLUMNS
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ResultRecord::try_from).collect()
    }

    async fn create_template(&self, template: &Template) -> Result<(), PersistenceError> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO templates ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TEMPLATE_COLUMNS
        ))
        .bind(&template.id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.system_prompt)
        .bind(&template.user_prompt)
        .bind(template.default_parameters.temperature)
        .bind(i64::from(template.default_parameters.max_tokens))
        .bind(template.default_parameters.top_p)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {
                debug!(template_id = %template.id, name = %template.name, "Created template");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                Err(PersistenceError::DuplicateName(template.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_template(&self, id: &str) -> Result<Option<Template>, PersistenceError> {
        let row = sqlx::query_as::<_, TemplateRow>(&format!(
            "SELECT {} FROM templates WHERE id = ?",
            TEMPLATE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Template::try_from).transpose()
    }

    async fn list_templates(&self) -> Result<Vec<Template>, PersistenceError> {
        let rows = sqlx::query_as::<_, TemplateRow>(&format!(
            "SELECT {} FROM templates ORDER BY name ASC",
            TEMPLATE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Template::try_from).collect()
    }

    async fn update_template(&self, template: &Template) -> Result<(), PersistenceError> {
        let updated = sqlx::query(
            "UPDATE templates SET name = ?, description = ?, system_prompt = ?, user_prompt = ?, \
             temperature = ?, max_tokens = ?, top_p = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.system_prompt)
        .bind(&template.user_prompt)
        .bind(template.default_parameters.temperature)
        .bind(i64::from(template.default_parameters.max_tokens))
        .bind(template.default_parameters.top_p)
        .bind(template.updated_at)
        .bind(&template.id)
        .execute(&self.pool)
        .await;

        match updated {
            Ok(done) if done.rows_affected() == 0 => {
                Err(PersistenceError::NotFound(format!("template {}", template.id)))
            }
            Ok(_) => {
                debug!(template_id = %template.id, "Updated template");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                Err(PersistenceError::DuplicateName(template.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_template(&self, id: &str) -> Result<bool, PersistenceError> {
        let deleted = sqlx::query("DELETE FROM templates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        debug!(template_id = %id, deleted = deleted.rows_affected(), "Deleted template");
        Ok(deleted.rows_affected() > 0)
    }

    async fn usage_report(&self) -> Result<UsageReport, PersistenceError> {
        let (prompts_count, executions_count, results_count, templates_count) =
            sqlx::query_as::<_, (i64, i64, i64, i64)>(
                "SELECT (SELECT COUNT(*) FROM prompts), (SELECT COUNT(*) FROM executions), \
                 (SELECT COUNT(*) FROM results), (SELECT COUNT(*) FROM templates)",
            )
            .fetch_one(&self.pool)
            .await?;

        let recent = sqlx::query_as::<_, PromptRow>(&format!(
            "SELECT {} FROM prompts ORDER BY created_at DESC, rowid DESC LIMIT ?",
            PROMPT_COLUMNS
        ))
        .bind(i64::from(RECENT_PROMPTS_LIMIT))
        .fetch_all(&self.pool)
        .await?;
        let recent_prompts = recent
            .into_iter()
            .map(|row| Prompt::try_from(row).map(RecentPrompt::from))
            .collect::<Result<Vec<_>, _>>()?;

        let model_usage = sqlx::query_as::<_, (String, i64)>(
            "SELECT selected_model, COUNT(*) AS uses FROM prompts \
             GROUP BY selected_model ORDER BY uses DESC, selected_model ASC",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(model, count)| ModelUsage {
            model,
            count: to_count(count),
        })
        .collect();

        Ok(UsageReport {
            statistics: UsageStatistics {
                prompts_count: to_count(prompts_count),
                executions_count: to_count(executions_count),
                results_count: to_count(results_count),
                templates_count: to_count(templates_count),
            },
            recent_prompts,
            model_usage,
        })
    }
}
