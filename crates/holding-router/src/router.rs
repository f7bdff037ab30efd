use crate::backends::{ChatRequest, Completion, ProviderBackend, ProviderError};
use crate::breaker::{SpendBreaker, SpendState};
use crate::config::{ProviderConfig, RouterConfig};
use crate::cost::CostTracker;
use crate::credentials::CredentialSource;
use crate::health::ProviderHealth;
use chrono::{Local, Utc};
use holding_channels::{Alert, Notifier};
use holding_core::{AuditEvent, CostLogEntry, HoldingError, HoldingResult};
use holding_store::{AuditLog, Store};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// A single generation request on behalf of one agent.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Tenant billed for the call.
    pub tenant_id: String,
    /// Agent whose system prompt is used.
    pub agent_id: String,
    /// Task served, when known.
    pub task_id: Option<String>,
    /// Agent system prompt.
    pub system_prompt: String,
    /// User prompt.
    pub user_prompt: String,
}

/// Outcome of [`CallRouter::generate`]. Provider failures never escape as
/// errors; they are folded into [`Generation::Exhausted`].
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    /// A provider produced non-empty text.
    Completed {
        /// Generated text, truncated to the output cap.
        content: String,
        /// Attempt label, e.g. `groq (fallback 4)`.
        provider: String,
        /// `provider/model`.
        model: String,
        /// Wall time of the successful call.
        elapsed_ms: u64,
    },
    /// Every provider failed or was skipped.
    Exhausted {
        /// `label: reason (Nms)` per attempted provider.
        errors: Vec<String>,
    },
    /// The daily spend ceiling is reached; nothing was attempted.
    BreakerTripped {
        /// Spend so far today.
        daily_spend: f64,
        /// Configured ceiling.
        limit: f64,
    },
}

impl Generation {
    /// User-facing text: the content, or an explanatory error line.
    pub fn text(&self) -> String {
        match self {
            Generation::Completed { content, .. } => content.clone(),
            Generation::Exhausted { errors } => {
                if errors.is_empty() {
                    "[LLM ERROR] All providers failed: no provider available".to_string()
                } else {
                    format!("[LLM ERROR] All providers failed: {}", errors.join("; "))
                }
            }
            Generation::BreakerTripped { daily_spend, limit } => format!(
                "[CIRCUIT BREAKER] Daily spend limit reached (${daily_spend:.2} / ${limit:.2}); \
                 no LLM calls until tomorrow"
            ),
        }
    }

    /// True for [`Generation::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, Generation::Completed { .. })
    }

    /// Converts to the pipeline's error taxonomy.
    pub fn into_result(self) -> HoldingResult<Generated> {
        match self {
            Generation::Completed {
                content,
                provider,
                model,
                elapsed_ms,
            } => Ok(Generated {
                content,
                provider,
                model,
                elapsed_ms,
            }),
            Generation::Exhausted { .. } => Err(HoldingError::ProvidersExhausted(self.text())),
            Generation::BreakerTripped { .. } => {
                Err(HoldingError::SpendLimitReached(self.text()))
            }
        }
    }
}

/// Successful generation, as seen by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    /// Generated text.
    pub content: String,
    /// Attempt label.
    pub provider: String,
    /// `provider/model`.
    pub model: String,
    /// Wall time of the successful call.
    pub elapsed_ms: u64,
}

/// Routes generation calls through the ordered provider chain.
///
/// One instance is built at startup and shared by reference. It owns the
/// global single-call permit, the per-provider health and the spend breaker.
pub struct CallRouter {
    config: RouterConfig,
    permit: Semaphore,
    backend: Arc<dyn ProviderBackend>,
    credentials: Arc<dyn CredentialSource>,
    health: ProviderHealth,
    breaker: SpendBreaker,
    store: Arc<dyn Store>,
    audit: AuditLog,
    notifier: Arc<dyn Notifier>,
}

fn provider_label(idx: usize, provider: &ProviderConfig) -> String {
    if idx == 0 {
        format!("{} (primary)", provider.name)
    } else {
        format!("{} (fallback {idx})", provider.name)
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.chars().count() / 4).unwrap_or(u32::MAX)
}

impl CallRouter {
    /// Creates a router with fresh health and spend state.
    pub fn new(
        config: RouterConfig,
        backend: Arc<dyn ProviderBackend>,
        credentials: Arc<dyn CredentialSource>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let health = ProviderHealth::new(config.cooldown_failures, config.cooldown());
        let breaker = SpendBreaker::new(config.daily_spend_limit_usd, Local::now().date_naive());
        Self {
            config,
            permit: Semaphore::new(1),
            backend,
            credentials,
            health,
            breaker,
            audit: AuditLog::new(store.clone()),
            store,
            notifier,
        }
    }

    /// Rebuilds today's spend from the cost log.
    pub async fn restore_daily_spend(&self) -> HoldingResult<f64> {
        let today = Local::now().date_naive();
        let spent = CostTracker::new(self.store.clone()).spent_on(today).await?;
        self.breaker.restore(spent, today);
        info!(spent, limit = self.config.daily_spend_limit_usd, "Restored daily spend");
        Ok(spent)
    }

    /// Provider health tracker.
    pub fn health(&self) -> &ProviderHealth {
        &self.health
    }

    /// Spend breaker.
    pub fn breaker(&self) -> &SpendBreaker {
        &self.breaker
    }

    /// Router configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Generates text for `request`, falling back through the provider chain.
    ///
    /// Holds the global permit for the breaker check and the whole provider
    /// iteration, so at most one call is in flight process-wide.
    pub async fn generate(&self, request: &GenerationRequest) -> Generation {
        let Ok(_permit) = self.permit.acquire().await else {
            return Generation::Exhausted {
                errors: vec!["router permit closed".to_string()],
            };
        };

        let today = Local::now().date_naive();
        if let Err(state) = self.breaker.check(today) {
            return self.breaker_tripped(request, state).await;
        }

        let mut errors = Vec::new();
        for (idx, provider) in self.config.providers.iter().enumerate() {
            if self.health.is_cooling_down(&provider.name, Instant::now()) {
                debug!(provider = %provider.name, "Skipping provider in cooldown");
                continue;
            }

            let api_key = match &provider.api_key_env {
                Some(env) => match self.credentials.get(env) {
                    Some(key) => Some(key),
                    None => {
                        debug!(provider = %provider.name, env = %env, "Skipping provider without credential");
                        continue;
                    }
                },
                None => None,
            };

            let label = provider_label(idx, provider);
            let chat = ChatRequest {
                provider,
                api_key: api_key.as_deref(),
                system_prompt: &request.system_prompt,
                user_prompt: &request.user_prompt,
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                timeout: self.config.call_timeout(),
            };

            let start = Instant::now();
            let outcome =
                match tokio::time::timeout(chat.timeout, self.backend.complete(&chat)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Transient(format!(
                        "Timeout ({}ms)",
                        self.config.call_timeout_ms
                    ))),
                };
            let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            let reason = match outcome {
                Ok(completion) if !completion.content.trim().is_empty() => {
                    return self
                        .completed(request, provider, label, completion, elapsed_ms, today)
                        .await;
                }
                Ok(_) => "empty response".to_string(),
                Err(ProviderError::Unavailable(why)) => {
                    debug!(provider = %provider.name, reason = %why, "Provider unavailable");
                    continue;
                }
                Err(e) => e.to_string(),
            };

            self.health.record_failure(&provider.name, Instant::now());
            warn!(provider = %label, error = %reason, elapsed_ms, "LLM call failed");
            errors.push(format!("{label}: {reason} ({elapsed_ms}ms)"));
        }

        error!(
            tenant_id = %request.tenant_id,
            agent_id = %request.agent_id,
            errors = %errors.join("; "),
            "All LLM providers failed"
        );
        self.audit
            .record(
                AuditEvent::new("llm_all_failed")
                    .tenant(&request.tenant_id)
                    .agent(&request.agent_id)
                    .details(serde_json::json!({ "errors": errors })),
            )
            .await;
        Generation::Exhausted { errors }
    }

    async fn completed(
        &self,
        request: &GenerationRequest,
        provider: &ProviderConfig,
        label: String,
        completion: Completion,
        elapsed_ms: u64,
        today: chrono::NaiveDate,
    ) -> Generation {
        self.health.record_success(&provider.name);

        let content = truncate_chars(completion.content.trim(), self.config.max_output_chars);
        let model = provider.model_tag();
        let tokens_in = completion
            .tokens_in
            .unwrap_or_else(|| estimate_tokens(&request.user_prompt));
        let tokens_out = completion
            .tokens_out
            .unwrap_or_else(|| estimate_tokens(&content));

        let entry = CostLogEntry {
            tenant_id: request.tenant_id.clone(),
            agent_id: request.agent_id.clone(),
            model: model.clone(),
            tokens_in,
            tokens_out,
            cost_usd: provider.cost_per_call_usd,
            task_id: request.task_id.clone(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.insert_cost(&entry).await {
            warn!(error = %e, "Failed to record cost entry");
        }

        self.audit
            .record(
                AuditEvent::new("llm_call")
                    .tenant(&request.tenant_id)
                    .agent(&request.agent_id)
                    .details(serde_json::json!({
                        "provider": label,
                        "model": model,
                        "response_time_ms": elapsed_ms,
                        "tokens_in": tokens_in,
                        "tokens_out": tokens_out,
                    })),
            )
            .await;

        if self.breaker.record_spend(provider.cost_per_call_usd, today) {
            let state = self.breaker.snapshot();
            let alert = Alert::breaker_tripped(state.daily_spend, state.spend_limit);
            if let Err(e) = self.notifier.notify(&alert).await {
                warn!(error = %e, "Failed to send breaker alert");
            }
        }

        info!(
            provider = %label,
            elapsed_ms,
            chars = content.chars().count(),
            "LLM call succeeded"
        );
        Generation::Completed {
            content,
            provider: label,
            model,
            elapsed_ms,
        }
    }

    async fn breaker_tripped(&self, request: &GenerationRequest, state: SpendState) -> Generation {
        warn!(
            spent = state.daily_spend,
            limit = state.spend_limit,
            agent_id = %request.agent_id,
            "Generation refused by spend breaker"
        );
        self.audit
            .record(
                AuditEvent::new("llm_breaker_tripped")
                    .tenant(&request.tenant_id)
                    .agent(&request.agent_id)
                    .details(serde_json::json!({
                        "daily_spend": state.daily_spend,
                        "limit": state.spend_limit,
                    })),
            )
            .await;
        Generation::BreakerTripped {
            daily_spend: state.daily_spend,
            limit: state.spend_limit,
        }
    }
}
