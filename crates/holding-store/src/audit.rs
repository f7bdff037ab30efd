use crate::store::Store;
use holding_core::{AuditEvent, HoldingResult};
use std::sync::Arc;
use tracing::{info, warn};

/// Append-only audit trail that records every pipeline and router action.
///
/// Each event is emitted as a structured `tracing` line and persisted through
/// the store. A failed write is logged and dropped: auditing never fails the
/// operation being audited.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn Store>,
}

impl AuditLog {
    /// Creates an audit log writing to `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Records one event.
    pub async fn record(&self, event: AuditEvent) {
        info!(
            action = %event.action,
            tenant_id = event.tenant_id.as_deref().unwrap_or("-"),
            agent_id = event.agent_id.as_deref().unwrap_or("-"),
            task_id = event.task_id.as_deref().unwrap_or("-"),
            details = %event.details,
            "audit"
        );
        if let Err(e) = self.store.insert_audit(&event).await {
            warn!(action = %event.action, error = %e, "Failed to persist audit event");
        }
    }

    /// Most recent events, newest first.
    pub async fn recent(
        &self,
        tenant_id: Option<&str>,
        limit: usize,
    ) -> HoldingResult<Vec<AuditEvent>> {
        self.store.list_audit(tenant_id, limit).await
    }
}
