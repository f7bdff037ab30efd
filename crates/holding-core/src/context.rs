use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request-scoped context threaded through every inbound pipeline call.
///
/// Replaces ambient "current tenant" state: every store read and audit event
/// is scoped by the tenant carried here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Identifies one logical interaction (a CLI invocation, a chat turn).
    pub session_id: Uuid,
    /// Tenant every read and write is scoped to.
    pub tenant_id: String,
    /// Who initiated the request, if known.
    pub actor: Option<String>,
}

impl RequestContext {
    /// Creates a context for `tenant_id` with a fresh session id.
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            actor: None,
        }
    }

    /// Sets the actor.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Actor name, or `"system"` when none was given.
    pub fn actor_name(&self) -> &str {
        self.actor.as_deref().unwrap_or("system")
    }
}
