use crate::store::{CostSummaryRow, Store, TaskFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use holding_core::{
    Agent, AgentStatus, AuditEvent, CostLogEntry, Correction, HoldingError, HoldingResult, Task,
    TaskStatus, Tenant,
};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    tenants: Vec<Tenant>,
    agents: Vec<Agent>,
    tasks: Vec<Task>,
    corrections: Vec<Correction>,
    costs: Vec<CostLogEntry>,
    audit: Vec<AuditEvent>,
}

/// In-process store. Used by tests and by `database.path = ":memory:"`.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> HoldingResult<bool> {
        let mut t = self.tables.write().await;
        if t.tenants.iter().any(|x| x.id == tenant.id) {
            return Ok(false);
        }
        t.tenants.push(tenant.clone());
        Ok(true)
    }

    async fn get_tenant(&self, id: &str) -> HoldingResult<Option<Tenant>> {
        let t = self.tables.read().await;
        Ok(t.tenants.iter().find(|x| x.id == id).cloned())
    }

    async fn list_tenants(&self) -> HoldingResult<Vec<Tenant>> {
        Ok(self.tables.read().await.tenants.clone())
    }

    async fn update_tenant(&self, tenant: &Tenant) -> HoldingResult<()> {
        let mut t = self.tables.write().await;
        let slot = t
            .tenants
            .iter_mut()
            .find(|x| x.id == tenant.id)
            .ok_or_else(|| HoldingError::TenantNotFound(tenant.id.clone()))?;
        *slot = tenant.clone();
        Ok(())
    }

    async fn insert_agent(&self, agent: &Agent) -> HoldingResult<bool> {
        let mut t = self.tables.write().await;
        if t.agents.iter().any(|x| x.id == agent.id) {
            return Ok(false);
        }
        t.agents.push(agent.clone());
        Ok(true)
    }

    async fn get_agent(&self, id: &str) -> HoldingResult<Option<Agent>> {
        let t = self.tables.read().await;
        Ok(t.agents.iter().find(|x| x.id == id).cloned())
    }

    async fn list_agents(&self, tenant_id: &str) -> HoldingResult<Vec<Agent>> {
        let t = self.tables.read().await;
        Ok(t.agents
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> HoldingResult<()> {
        let mut t = self.tables.write().await;
        let agent = t
            .agents
            .iter_mut()
            .find(|x| x.id == agent_id)
            .ok_or_else(|| HoldingError::AgentNotFound(agent_id.to_string()))?;
        agent.status = status;
        Ok(())
    }

    async fn update_agent_prompt(&self, agent_id: &str, prompt: &str) -> HoldingResult<()> {
        let mut t = self.tables.write().await;
        let agent = t
            .agents
            .iter_mut()
            .find(|x| x.id == agent_id)
            .ok_or_else(|| HoldingError::AgentNotFound(agent_id.to_string()))?;
        agent.system_prompt = prompt.to_string();
        Ok(())
    }

    async fn insert_task(&self, task: &Task) -> HoldingResult<()> {
        let mut t = self.tables.write().await;
        if t.tasks.iter().any(|x| x.id == task.id) {
            return Err(HoldingError::Store(format!("duplicate task id: {}", task.id)));
        }
        t.tasks.push(task.clone());
        Ok(())
    }

    async fn get_task(&self, tenant_id: &str, task_id: &str) -> HoldingResult<Option<Task>> {
        let t = self.tables.read().await;
        Ok(t.tasks
            .iter()
            .find(|x| x.id == task_id && x.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> HoldingResult<Vec<Task>> {
        let t = self.tables.read().await;
        let mut tasks: Vec<Task> = t
            .tasks
            .iter()
            .rev()
            .filter(|x| filter.matches(x))
            .cloned()
            .collect();
        // Stable sort keeps reverse insertion order among equal timestamps.
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    async fn update_task(&self, task: &Task) -> HoldingResult<()> {
        let mut t = self.tables.write().await;
        let slot = t
            .tasks
            .iter_mut()
            .find(|x| x.id == task.id && x.tenant_id == task.tenant_id)
            .ok_or_else(|| HoldingError::TaskNotFound(task.id.clone()))?;
        *slot = task.clone();
        Ok(())
    }

    async fn transition_task(
        &self,
        tenant_id: &str,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> HoldingResult<bool> {
        let mut t = self.tables.write().await;
        match t
            .tasks
            .iter_mut()
            .find(|x| x.id == task_id && x.tenant_id == tenant_id && x.status == from)
        {
            Some(task) => {
                task.status = to;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_correction(&self, correction: &Correction) -> HoldingResult<i64> {
        let mut t = self.tables.write().await;
        let id = t.corrections.len() as i64 + 1;
        let mut stored = correction.clone();
        stored.id = id;
        t.corrections.push(stored);
        Ok(id)
    }

    async fn list_corrections(&self, task_id: &str) -> HoldingResult<Vec<Correction>> {
        let t = self.tables.read().await;
        Ok(t.corrections
            .iter()
            .rev()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn insert_cost(&self, entry: &CostLogEntry) -> HoldingResult<()> {
        self.tables.write().await.costs.push(entry.clone());
        Ok(())
    }

    async fn cost_summary(&self, tenant_id: Option<&str>) -> HoldingResult<Vec<CostSummaryRow>> {
        let t = self.tables.read().await;
        let mut groups: BTreeMap<(String, String, String), CostSummaryRow> = BTreeMap::new();
        for entry in t
            .costs
            .iter()
            .filter(|e| tenant_id.map_or(true, |id| e.tenant_id == id))
        {
            let key = (
                entry.tenant_id.clone(),
                entry.agent_id.clone(),
                entry.model.clone(),
            );
            let row = groups.entry(key).or_insert_with(|| CostSummaryRow {
                tenant_id: entry.tenant_id.clone(),
                agent_id: entry.agent_id.clone(),
                model: entry.model.clone(),
                tokens_in: 0,
                tokens_out: 0,
                cost_usd: 0.0,
                call_count: 0,
            });
            row.tokens_in += u64::from(entry.tokens_in);
            row.tokens_out += u64::from(entry.tokens_out);
            row.cost_usd += entry.cost_usd;
            row.call_count += 1;
        }
        Ok(groups.into_values().collect())
    }

    async fn total_cost_since(&self, since: DateTime<Utc>) -> HoldingResult<f64> {
        let t = self.tables.read().await;
        Ok(t.costs
            .iter()
            .filter(|e| e.timestamp >= since)
            .map(|e| e.cost_usd)
            .sum())
    }

    async fn insert_audit(&self, event: &AuditEvent) -> HoldingResult<()> {
        self.tables.write().await.audit.push(event.clone());
        Ok(())
    }

    async fn list_audit(
        &self,
        tenant_id: Option<&str>,
        limit: usize,
    ) -> HoldingResult<Vec<AuditEvent>> {
        let t = self.tables.read().await;
        Ok(t.audit
            .iter()
            .rev()
            .filter(|e| tenant_id.map_or(true, |id| e.tenant_id.as_deref() == Some(id)))
            .take(limit)
            .cloned()
            .collect())
    }
}
