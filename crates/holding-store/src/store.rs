use async_trait::async_trait;
use chrono::{DateTime, Utc};
use holding_core::{
    Agent, AgentStatus, AuditEvent, CostLogEntry, Correction, HoldingResult, Task, TaskStatus,
    Tenant,
};
use serde::Serialize;

/// Filter for [`Store::list_tasks`]. Results are always scoped to one tenant.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Tenant to list.
    pub tenant_id: String,
    /// Only tasks in this state.
    pub status: Option<TaskStatus>,
    /// Only tasks assigned to this agent.
    pub assigned_to: Option<String>,
    /// Maximum number of tasks returned.
    pub limit: Option<usize>,
}

impl TaskFilter {
    /// All tasks of a tenant.
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    /// Restricts to one status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restricts to one assignee.
    pub fn with_assignee(mut self, agent_id: impl Into<String>) -> Self {
        self.assigned_to = Some(agent_id.into());
        self
    }

    /// Caps the number of results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, task: &Task) -> bool {
        task.tenant_id == self.tenant_id
            && self.status.map_or(true, |s| task.status == s)
            && self
                .assigned_to
                .as_deref()
                .map_or(true, |a| task.assigned_to.as_deref() == Some(a))
    }
}

/// Aggregated cost for one (tenant, agent, model) triple.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostSummaryRow {
    /// Tenant.
    pub tenant_id: String,
    /// Agent.
    pub agent_id: String,
    /// `provider/model` tag.
    pub model: String,
    /// Sum of prompt tokens.
    pub tokens_in: u64,
    /// Sum of completion tokens.
    pub tokens_out: u64,
    /// Sum of estimated cost.
    pub cost_usd: f64,
    /// Number of successful calls.
    pub call_count: u64,
}

/// Durable keyed tables for tenants, agents, tasks, corrections, costs and
/// audit events.
///
/// No cross-record transactions are required. Task updates are keyed by
/// `(id, tenant_id)`, so an update can never move a task between tenants.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts a tenant unless one with the same id exists. Returns whether it
    /// was inserted.
    async fn insert_tenant(&self, tenant: &Tenant) -> HoldingResult<bool>;
    /// Looks up a tenant.
    async fn get_tenant(&self, id: &str) -> HoldingResult<Option<Tenant>>;
    /// All tenants in insertion order.
    async fn list_tenants(&self) -> HoldingResult<Vec<Tenant>>;
    /// Replaces a tenant's profile. Fails with `TenantNotFound` if absent.
    async fn update_tenant(&self, tenant: &Tenant) -> HoldingResult<()>;

    /// Inserts an agent unless one with the same id exists. Returns whether it
    /// was inserted.
    async fn insert_agent(&self, agent: &Agent) -> HoldingResult<bool>;
    /// Looks up an agent.
    async fn get_agent(&self, id: &str) -> HoldingResult<Option<Agent>>;
    /// A tenant's agents in registration order.
    async fn list_agents(&self, tenant_id: &str) -> HoldingResult<Vec<Agent>>;
    /// Sets an agent's status. Fails with `AgentNotFound` if absent.
    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> HoldingResult<()>;
    /// Replaces an agent's system prompt. Fails with `AgentNotFound` if absent.
    async fn update_agent_prompt(&self, agent_id: &str, prompt: &str) -> HoldingResult<()>;

    /// Inserts a new task.
    async fn insert_task(&self, task: &Task) -> HoldingResult<()>;
    /// Looks up a task inside a tenant. A task of another tenant is `None`.
    async fn get_task(&self, tenant_id: &str, task_id: &str) -> HoldingResult<Option<Task>>;
    /// Lists tasks newest first.
    async fn list_tasks(&self, filter: &TaskFilter) -> HoldingResult<Vec<Task>>;
    /// Overwrites the mutable fields of the row matching `(task.id, task.tenant_id)`.
    /// Fails with `TaskNotFound` if no such row exists.
    async fn update_task(&self, task: &Task) -> HoldingResult<()>;
    /// Moves a task from `from` to `to` in one atomic step. Returns `false`
    /// when the tenant has no such task in state `from`, which is how a caller
    /// learns it lost a race for the task.
    async fn transition_task(
        &self,
        tenant_id: &str,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> HoldingResult<bool>;

    /// Appends a correction and returns its id.
    async fn insert_correction(&self, correction: &Correction) -> HoldingResult<i64>;
    /// A task's corrections, newest first.
    async fn list_corrections(&self, task_id: &str) -> HoldingResult<Vec<Correction>>;

    /// Appends a cost entry.
    async fn insert_cost(&self, entry: &CostLogEntry) -> HoldingResult<()>;
    /// Aggregated costs, optionally for one tenant, ordered by tenant, agent, model.
    async fn cost_summary(&self, tenant_id: Option<&str>) -> HoldingResult<Vec<CostSummaryRow>>;
    /// Sum of `cost_usd` over entries at or after `since`.
    async fn total_cost_since(&self, since: DateTime<Utc>) -> HoldingResult<f64>;

    /// Appends an audit event.
    async fn insert_audit(&self, event: &AuditEvent) -> HoldingResult<()>;
    /// Audit events newest first, optionally for one tenant.
    async fn list_audit(&self, tenant_id: Option<&str>, limit: usize)
        -> HoldingResult<Vec<AuditEvent>>;
}
