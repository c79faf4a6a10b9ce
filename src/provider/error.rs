//! Generation service error types
//!
//! Errors that can occur while talking to the generation endpoint, in either
//! batch or streaming mode.

use thiserror::Error;

/// Errors raised reaching or reading from the generation service
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Network-level failure (connection refused, reset, DNS...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The whole request exceeded its deadline
    #[error("Request timed out after {0} ms")]
    Timeout(u128),

    /// A streaming body went silent for too long
    #[error("Stream idle for more than {0} ms")]
    IdleTimeout(u128),

    /// Service answered with a non-2xx status
    #[error("LLM Service Error: {status} - {body}")]
    Provider {
        /// HTTP status code
        status: u16,
        /// Response body, as text
        body: String,
    },

    /// Response body could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Classify a reqwest failure, given the deadline that was applied
    pub fn from_reqwest(err: reqwest::Error, timeout: std::time::Duration) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(timeout.as_millis())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}
