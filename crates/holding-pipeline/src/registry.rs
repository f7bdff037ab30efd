use holding_core::{Agent, AgentRole, AgentStatus, HoldingError, HoldingResult, Tenant};
use holding_store::Store;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Tenants and their agents, with the lookups the pipeline needs.
///
/// Registration enforces the hierarchy invariants: an agent's tenant must
/// exist, its parent must be a known agent of the same tenant without
/// forming a cycle, and a tenant has at most one auditor.
#[derive(Clone)]
pub struct AgentRegistry {
    store: Arc<dyn Store>,
}

impl AgentRegistry {
    /// Creates a registry over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Inserts a tenant. Returns `false` if it already existed.
    pub async fn register_tenant(&self, tenant: &Tenant) -> HoldingResult<bool> {
        let inserted = self.store.insert_tenant(tenant).await?;
        if inserted {
            info!(tenant_id = %tenant.id, "Tenant registered");
        }
        Ok(inserted)
    }

    /// Inserts an agent after checking the registry invariants. Returns
    /// `false` if an agent with this id already existed.
    pub async fn register_agent(&self, agent: &Agent) -> HoldingResult<bool> {
        if self.store.get_agent(&agent.id).await?.is_some() {
            debug!(agent_id = %agent.id, "Agent already registered");
            return Ok(false);
        }
        if self.store.get_tenant(&agent.tenant_id).await?.is_none() {
            return Err(HoldingError::Registry(format!(
                "agent {} references unknown tenant {}",
                agent.id, agent.tenant_id
            )));
        }
        if let Some(parent_id) = &agent.parent_agent_id {
            self.check_parent(agent, parent_id).await?;
        }
        if agent.role == AgentRole::Auditor {
            if let Some(existing) = self.get_auditor(&agent.tenant_id).await? {
                return Err(HoldingError::Registry(format!(
                    "tenant {} already has auditor {}",
                    agent.tenant_id, existing.id
                )));
            }
        }

        let inserted = self.store.insert_agent(agent).await?;
        if inserted {
            info!(
                agent_id = %agent.id,
                tenant_id = %agent.tenant_id,
                role = %agent.role,
                "Agent registered"
            );
        }
        Ok(inserted)
    }

    async fn check_parent(&self, agent: &Agent, parent_id: &str) -> HoldingResult<()> {
        let mut seen = HashSet::from([agent.id.clone()]);
        let mut next = Some(parent_id.to_string());
        while let Some(id) = next {
            if !seen.insert(id.clone()) {
                return Err(HoldingError::Registry(format!(
                    "parent chain of agent {} forms a cycle at {id}",
                    agent.id
                )));
            }
            let Some(ancestor) = self.store.get_agent(&id).await? else {
                return Err(HoldingError::Registry(format!(
                    "agent {} references unknown parent {id}",
                    agent.id
                )));
            };
            if ancestor.tenant_id != agent.tenant_id {
                return Err(HoldingError::Registry(format!(
                    "parent {id} of agent {} belongs to tenant {}",
                    agent.id, ancestor.tenant_id
                )));
            }
            next = ancestor.parent_agent_id;
        }
        Ok(())
    }

    /// Tenant by id.
    pub async fn tenant(&self, tenant_id: &str) -> HoldingResult<Option<Tenant>> {
        self.store.get_tenant(tenant_id).await
    }

    /// Agent by id, scoped to `tenant_id`.
    pub async fn agent(&self, tenant_id: &str, agent_id: &str) -> HoldingResult<Option<Agent>> {
        Ok(self
            .store
            .get_agent(agent_id)
            .await?
            .filter(|a| a.tenant_id == tenant_id))
    }

    /// All agents of a tenant in registration order.
    pub async fn agents(&self, tenant_id: &str) -> HoldingResult<Vec<Agent>> {
        self.store.list_agents(tenant_id).await
    }

    /// First available worker whose skills cover `task_type`, else the
    /// first available worker, else `None`.
    pub async fn get_agent_for_task(
        &self,
        tenant_id: &str,
        task_type: &str,
    ) -> HoldingResult<Option<Agent>> {
        let workers: Vec<Agent> = self
            .store
            .list_agents(tenant_id)
            .await?
            .into_iter()
            .filter(|a| a.role == AgentRole::Worker && a.status != AgentStatus::Offline)
            .collect();

        let chosen = match workers.iter().position(|a| a.handles(task_type)) {
            Some(idx) => workers.into_iter().nth(idx),
            None => workers.into_iter().next(),
        };
        debug!(
            tenant_id,
            task_type,
            agent_id = chosen.as_ref().map_or("-", |a| a.id.as_str()),
            "Worker lookup"
        );
        Ok(chosen)
    }

    /// The tenant's auditor, if any.
    pub async fn get_auditor(&self, tenant_id: &str) -> HoldingResult<Option<Agent>> {
        Ok(self
            .store
            .list_agents(tenant_id)
            .await?
            .into_iter()
            .find(|a| a.role == AgentRole::Auditor))
    }

    /// Sets an agent's status.
    pub async fn set_status(&self, agent_id: &str, status: AgentStatus) -> HoldingResult<()> {
        self.store.set_agent_status(agent_id, status).await
    }

    /// Replaces an agent's system prompt.
    pub async fn update_prompt(&self, agent_id: &str, prompt: &str) -> HoldingResult<()> {
        self.store.update_agent_prompt(agent_id, prompt).await
    }
}
