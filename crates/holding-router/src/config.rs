use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One OpenAI-compatible provider in the fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Short name used in labels, health tracking and model tags.
    pub name: String,
    /// Base URL; `/chat/completions` is appended.
    pub base_url: String,
    /// Model identifier sent in the request body.
    pub model: String,
    /// Environment variable holding the API key. `None` for local providers
    /// that need no credential.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Fixed cost estimate added to the daily spend per successful call.
    #[serde(default)]
    pub cost_per_call_usd: f64,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ProviderConfig {
    /// Creates a provider with no credential, cost or extra headers. Chain
    /// [`with_key_env`](Self::with_key_env) for hosted providers.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            model: model.into(),
            api_key_env: None,
            cost_per_call_usd: 0.0,
            headers: BTreeMap::new(),
        }
    }

    /// A self-hosted provider that needs no credential, such as Ollama.
    pub fn local(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self::new(name, base_url, model)
    }

    /// Requires the credential stored under `env`.
    pub fn with_key_env(mut self, env: impl Into<String>) -> Self {
        self.api_key_env = Some(env.into());
        self
    }

    /// Sets the per-call cost estimate.
    pub fn with_cost(mut self, cost_per_call_usd: f64) -> Self {
        self.cost_per_call_usd = cost_per_call_usd;
        self
    }

    /// Adds an extra request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// `provider/model`, as recorded on cost entries.
    pub fn model_tag(&self) -> String {
        format!("{}/{}", self.name, self.model)
    }
}

/// Router tuning and the ordered provider chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Consecutive failures before a provider enters cooldown.
    #[serde(default = "default_cooldown_failures")]
    pub cooldown_failures: u32,
    /// Cooldown length in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Generated text is truncated to this many characters.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    /// `max_tokens` sent to providers.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// `temperature` sent to providers.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Process-wide daily spend ceiling.
    #[serde(default = "default_daily_spend_limit")]
    pub daily_spend_limit_usd: f64,
    /// Providers in priority order.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
}

fn default_call_timeout_ms() -> u64 {
    15_000
}

fn default_cooldown_failures() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_max_output_chars() -> usize {
    3500
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

fn default_daily_spend_limit() -> f64 {
    10.0
}

/// cerebras -> openrouter -> gemini -> ollama (local) -> groq.
pub fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new("cerebras", "https://api.cerebras.ai/v1", "llama3.1-8b")
            .with_key_env("CEREBRAS_API_KEY")
            .with_cost(0.0001),
        ProviderConfig::new("openrouter", "https://openrouter.ai/api/v1", "openrouter/auto")
            .with_key_env("OPENROUTER_API_KEY")
            .with_cost(0.002)
            .with_header("HTTP-Referer", "https://holding.local")
            .with_header("X-Title", "Holding"),
        ProviderConfig::new(
            "gemini",
            "https://generativelanguage.googleapis.com/v1beta/openai",
            "gemini-2.0-flash",
        )
        .with_key_env("GOOGLE_API_KEY")
        .with_cost(0.001),
        ProviderConfig::local("ollama", "http://localhost:11434/v1", "qwen3:4b"),
        ProviderConfig::new("groq", "https://api.groq.com/openai/v1", "llama-3.3-70b-versatile")
            .with_key_env("GROQ_API_KEY")
            .with_cost(0.0005),
    ]
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            cooldown_failures: default_cooldown_failures(),
            cooldown_secs: default_cooldown_secs(),
            max_output_chars: default_max_output_chars(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            daily_spend_limit_usd: default_daily_spend_limit(),
            providers: default_providers(),
        }
    }
}

impl RouterConfig {
    /// Per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Cooldown length.
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Replaces the provider chain.
    pub fn with_providers(mut self, providers: Vec<ProviderConfig>) -> Self {
        self.providers = providers;
        self
    }

    /// Sets the daily spend ceiling.
    pub fn with_spend_limit(mut self, limit_usd: f64) -> Self {
        self.daily_spend_limit_usd = limit_usd;
        self
    }
}
