//! Provider-fallback call router.
//!
//! Every generation in the process goes through one [`CallRouter`]. It walks
//! an ordered chain of OpenAI-compatible providers, skipping those without a
//! credential or in cooldown, and returns the first non-empty completion.
//! A single permit serializes all calls and a daily spend breaker refuses
//! calls once the ceiling is reached.
//!
//! # Main types
//!
//! - [`CallRouter`]: Runs one generation through the chain.
//! - [`Generation`]: Completed, exhausted or breaker-tripped outcome.
//! - [`RouterConfig`] / [`ProviderConfig`]: Chain and tuning.
//! - [`ProviderBackend`]: Transport trait; [`OpenAiCompatibleBackend`] is the
//!   HTTP implementation.
//! - [`ProviderHealth`]: Failure counters and cooldown deadlines.
//! - [`SpendBreaker`]: Daily spend circuit breaker.
//! - [`CostTracker`]: Cost summaries over the cost log.

/// Provider transports.
pub mod backends;
/// Daily spend breaker.
pub mod breaker;
/// Router and provider configuration.
pub mod config;
/// Cost summaries.
pub mod cost;
/// Credential lookup.
pub mod credentials;
/// Provider health tracking.
pub mod health;
/// The call router.
pub mod router;

pub use backends::openai::OpenAiCompatibleBackend;
pub use backends::{ChatRequest, Completion, ProviderBackend, ProviderError};
pub use breaker::{SpendBreaker, SpendState};
pub use config::{default_providers, ProviderConfig, RouterConfig};
pub use cost::CostTracker;
pub use credentials::{CredentialSource, EnvCredentials, StaticCredentials};
pub use health::ProviderHealth;
pub use router::{CallRouter, Generated, Generation, GenerationRequest};
