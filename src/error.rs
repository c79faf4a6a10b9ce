//! Error types and error handling for the application
//!
//! `ValidationError` covers everything rejected before orchestration starts.
//! `AppError` is the HTTP-facing error; every variant converts into a JSON
//! response via `IntoResponse`.

use crate::store::PersistenceError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Input rejected at submission time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A required field was missing or blank
    #[error("{0} is required")]
    MissingField(&'static str),

    /// Iteration count outside 1..=10
    #[error("iterations must be between {min} and {max}, got {value}")]
    IterationsOutOfRange {
        /// Submitted value
        value: u32,
        /// Lower bound (inclusive)
        min: u32,
        /// Upper bound (inclusive)
        max: u32,
    },

    /// A numeric generation parameter outside its bounds
    #[error("{name} must be between {min} and {max}, got {value}")]
    ParameterOutOfRange {
        /// Parameter name
        name: &'static str,
        /// Submitted value
        value: f64,
        /// Lower bound (inclusive)
        min: f64,
        /// Upper bound (inclusive)
        max: f64,
    },

    /// Model id does not belong to any known provider family
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Model-specific constraint violated
    #[error("{model} requires max_tokens of at least {min}")]
    MaxTokensTooLow {
        /// Model id
        model: String,
        /// Minimum max_tokens accepted by the model
        min: u32,
    },

    /// Text field exceeds the accepted length
    #[error("{field} exceeds maximum length of {max} characters")]
    TooLong {
        /// Field name
        field: &'static str,
        /// Maximum accepted length
        max: usize,
    },
}

/// Application-level error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Request failed validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Execution with the given ID was not found
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// No result recorded for the requested iteration
    #[error("Result not found: execution {execution_id}, iteration {iteration}")]
    ResultNotFound {
        /// Execution the lookup was scoped to
        execution_id: String,
        /// Iteration number requested
        iteration: u32,
    },

    /// Template with the given ID was not found
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// Error reading or writing records
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Internal server error (catch-all for unexpected errors)
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::ExecutionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::ResultNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Persistence(PersistenceError::DuplicateName(_)) => StatusCode::CONFLICT,
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
