//! Generation service request/response types
//!
//! Structs that mirror the `POST /generate` JSON contract, plus the closed
//! set of provider families a model id can belong to.

use crate::error::ValidationError;
use crate::store::models::{Prompt, ResultStatus};
use serde::{Deserialize, Serialize};

/// Provider family behind a model id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-style chat completion API
    OpenAi,
    /// Anthropic-style messages API
    Anthropic,
    /// Google Gemini-style generateContent API
    Google,
}

impl ProviderKind {
    /// Every provider family, in display order
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Google,
    ];

    /// Resolve the provider family from a model id
    ///
    /// Returns `None` for ids no provider claims.
    pub fn from_model_id(model_id: &str) -> Option<Self> {
        let id = model_id.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| {
            kind.model_prefixes()
                .iter()
                .any(|prefix| id.starts_with(prefix))
        })
    }

    /// Model-id prefixes owned by this provider
    pub fn model_prefixes(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi => &["gpt", "o1", "o3", "o4"],
            ProviderKind::Anthropic => &["claude"],
            ProviderKind::Google => &["gemini"],
        }
    }

    /// Human-readable provider name
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Anthropic => "Anthropic",
            ProviderKind::Google => "Google",
        }
    }

    /// Smallest `max_tokens` the given model accepts
    ///
    /// GPT-5 family models reject budgets under 2000 tokens.
    pub fn min_max_tokens(&self, model_id: &str) -> u32 {
        match self {
            ProviderKind::OpenAi if model_id.trim().to_ascii_lowercase().starts_with("gpt-5") => {
                2000
            }
            _ => 1,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Sampling parameters for a prompt
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Sampling temperature, 0.0..=2.0
    pub temperature: f64,
    /// Output token budget, 1..=32000
    pub max_tokens: u32,
    /// Nucleus sampling mass, 0.0..=1.0
    pub top_p: f64,
}

impl GenerationParams {
    /// Inclusive temperature bounds
    pub const TEMPERATURE_RANGE: (f64, f64) = (0.0, 2.0);
    /// Inclusive top_p bounds
    pub const TOP_P_RANGE: (f64, f64) = (0.0, 1.0);
    /// Largest accepted max_tokens
    pub const MAX_TOKENS_LIMIT: u32 = 32_000;

    /// Check every field against its bounds
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("temperature", self.temperature, Self::TEMPERATURE_RANGE)?;
        check_range("top_p", self.top_p, Self::TOP_P_RANGE)?;
        check_range(
            "max_tokens",
            f64::from(self.max_tokens),
            (1.0, f64::from(Self::MAX_TOKENS_LIMIT)),
        )?;
        Ok(())
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_tokens: 2031,
            top_p: 0.4,
        }
    }
}

fn check_range(name: &'static str, value: f64, (min, max): (f64, f64)) -> Result<(), ValidationError> {
    // NaN fails both comparisons, so test for containment rather than exclusion
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ValidationError::ParameterOutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

/// Token accounting for one generation
///
/// On the wire this is `{input, output, total}`; `total` is always derived
/// from the other two, whatever the sender claimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TokenUsageWire", into = "TokenUsageWire")]
pub struct TokenUsage {
    /// Prompt tokens
    pub input: u32,
    /// Completion tokens
    pub output: u32,
}

impl TokenUsage {
    /// Create a usage record
    pub fn new(input: u32, output: u32) -> Self {
        Self { input, output }
    }

    /// Input plus output tokens
    pub fn total(&self) -> u32 {
        self.input.saturating_add(self.output)
    }
}

#[derive(Serialize, Deserialize, Default)]
struct TokenUsageWire {
    #[serde(default)]
    input: u32,
    #[serde(default)]
    output: u32,
    #[serde(default)]
    total: u32,
}

impl From<TokenUsageWire> for TokenUsage {
    fn from(wire: TokenUsageWire) -> Self {
        TokenUsage::new(wire.input, wire.output)
    }
}

impl From<TokenUsage> for TokenUsageWire {
    fn from(usage: TokenUsage) -> Self {
        TokenUsageWire {
            input: usage.input,
            output: usage.output,
            total: usage.total(),
        }
    }
}

/// Body of `POST /generate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model to run
    pub model_id: String,
    /// System prompt (may be empty)
    pub system_prompt: String,
    /// User prompt
    pub user_prompt: String,
    /// Sampling temperature
    pub temperature: f64,
    /// Output token budget
    pub max_tokens: u32,
    /// Nucleus sampling mass
    pub top_p: f64,
    /// Whether the service should answer with an event stream
    pub stream: bool,
}

impl GenerationRequest {
    /// Build a request from a stored prompt configuration
    pub fn from_prompt(prompt: &Prompt) -> Self {
        Self {
            model_id: prompt.selected_model.clone(),
            system_prompt: prompt.system_prompt.clone(),
            user_prompt: prompt.user_prompt.clone(),
            temperature: prompt.parameters.temperature,
            max_tokens: prompt.parameters.max_tokens,
            top_p: prompt.parameters.top_p,
            stream: false,
        }
    }

    /// Copy of this request with the `stream` flag set
    pub fn with_stream(&self, stream: bool) -> Self {
        Self {
            stream,
            ..self.clone()
        }
    }

    /// Provider family of the requested model
    pub fn provider(&self) -> Option<ProviderKind> {
        ProviderKind::from_model_id(&self.model_id)
    }
}

/// Non-streaming response of `POST /generate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Generated text
    #[serde(default)]
    pub text: String,
    /// Token accounting
    #[serde(default)]
    pub tokens_used: TokenUsage,
    /// Provider-side latency
    #[serde(default)]
    pub response_time_ms: u64,
    /// Outcome reported by the service
    #[serde(default = "default_status")]
    pub status: ResultStatus,
    /// Failure description when `status` is not success
    #[serde(default)]
    pub error_message: Option<String>,
}

fn default_status() -> ResultStatus {
    ResultStatus::Success
}

impl GenerationResponse {
    /// Synthetic error result for a call that never produced a usable response
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            tokens_used: TokenUsage::default(),
            response_time_ms: 0,
            status: ResultStatus::Error,
            error_message: Some(message.into()),
        }
    }

    /// Whether the service reported success
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}
