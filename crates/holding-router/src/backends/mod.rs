/// OpenAI-compatible chat-completions backend.
pub mod openai;

use crate::config::ProviderConfig;
use async_trait::async_trait;
use std::time::Duration;

/// Classified provider failure. Never leaves this crate: the router folds it
/// into the aggregated exhausted message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Missing credential or unsupported input. Skipped, not counted.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// Rate limit, 5xx, timeout or connection error. Counts toward cooldown.
    #[error("{0}")]
    Transient(String),
    /// Any other rejection (4xx, unparseable body). Counts toward cooldown.
    #[error("{0}")]
    Rejected(String),
}

/// One chat-completion call against a single provider.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    /// Provider being called.
    pub provider: &'a ProviderConfig,
    /// Resolved credential, if the provider needs one.
    pub api_key: Option<&'a str>,
    /// System message.
    pub system_prompt: &'a str,
    /// User message.
    pub user_prompt: &'a str,
    /// `max_tokens` request field.
    pub max_tokens: u32,
    /// `temperature` request field.
    pub temperature: f32,
    /// Upper bound for the whole call.
    pub timeout: Duration,
}

/// Text completion plus any usage the provider reported.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    /// Trimmed completion text. May be empty.
    pub content: String,
    /// Prompt tokens, when reported.
    pub tokens_in: Option<u32>,
    /// Completion tokens, when reported.
    pub tokens_out: Option<u32>,
}

/// Transport for provider calls.
///
/// The router owns ordering, cooldown and accounting; a backend only performs
/// one call and classifies its outcome.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// Performs one chat completion.
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<Completion, ProviderError>;
}
