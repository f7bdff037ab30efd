use async_trait::async_trait;
use holding_core::HoldingResult;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Why an alert was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Daily spend limit reached; generation is paused.
    BreakerTripped,
    /// A task was escalated to a human.
    Escalation,
}

/// A human-facing alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Alert category.
    pub kind: AlertKind,
    /// Tenant concerned, if any.
    pub tenant_id: Option<String>,
    /// Message body.
    pub text: String,
}

impl Alert {
    /// Alert for a tripped spend breaker.
    pub fn breaker_tripped(daily_spend: f64, limit: f64) -> Self {
        Self {
            kind: AlertKind::BreakerTripped,
            tenant_id: None,
            text: format!(
                "CIRCUIT BREAKER TRIPPED\nDaily spend: ${daily_spend:.2} / ${limit:.2}\n\
                 All LLM calls paused until tomorrow."
            ),
        }
    }

    /// Alert for an escalated task.
    pub fn escalation(tenant_id: &str, task_id: &str, title: &str, reason: &str) -> Self {
        Self {
            kind: AlertKind::Escalation,
            tenant_id: Some(tenant_id.to_string()),
            text: format!("ESCALATION [{tenant_id}]\nTask {task_id}: {title}\nReason: {reason}"),
        }
    }
}

/// Outbound, best-effort alert channel.
///
/// Callers treat a failed notification as non-fatal: they log the error and
/// carry on with the operation that raised the alert.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name for logs.
    fn name(&self) -> &str;
    /// Delivers one alert.
    async fn notify(&self, alert: &Alert) -> HoldingResult<()>;
}

/// Notifier that only writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, alert: &Alert) -> HoldingResult<()> {
        warn!(
            kind = ?alert.kind,
            tenant_id = alert.tenant_id.as_deref().unwrap_or("-"),
            text = %alert.text,
            "alert"
        );
        Ok(())
    }
}

/// Sends each alert to every registered notifier.
#[derive(Default)]
pub struct FanoutNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl FanoutNotifier {
    /// Creates an empty fanout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a notifier.
    pub fn with(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Number of registered notifiers.
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// True when no notifier is registered.
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    fn name(&self) -> &str {
        "fanout"
    }

    /// Individual failures are logged; the first one is returned after every
    /// notifier has been tried.
    async fn notify(&self, alert: &Alert) -> HoldingResult<()> {
        let mut first_err = None;
        for notifier in &self.notifiers {
            match notifier.notify(alert).await {
                Ok(()) => info!(channel = notifier.name(), "Alert delivered"),
                Err(e) => {
                    warn!(channel = notifier.name(), error = %e, "Alert delivery failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
