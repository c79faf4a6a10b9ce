//! Generation service access
//!
//! Batch calls go through [`ProviderGateway`]; streaming calls go through
//! [`StreamingTransport`], which decodes the event-stream body with
//! [`sse::FrameParser`].

pub mod constants;
pub mod error;
pub mod gateway;
pub mod sse;
pub mod streaming;
pub mod types;

pub use error::GatewayError;
pub use gateway::ProviderGateway;
pub use streaming::{StreamOutcome, StreamToken, StreamingTransport};
pub use types::{GenerationParams, GenerationRequest, GenerationResponse, ProviderKind, TokenUsage};
