use crate::registry::AgentRegistry;
use crate::rules::{CorrectionRules, RuleBook};
use holding_core::{Agent, AgentRole, AuditEvent, HoldingResult, Tenant};
use holding_store::AuditLog;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

/// Tenant definition as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSeed {
    /// Tenant id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Business type label.
    #[serde(rename = "type", default)]
    pub tenant_type: String,
    /// Brand voice text.
    #[serde(default)]
    pub brand_voice: String,
    /// Target audience text.
    #[serde(default)]
    pub target_audience: String,
    /// Industry text.
    #[serde(default)]
    pub industry: String,
    /// Review rules for this tenant.
    #[serde(default)]
    pub rules: CorrectionRules,
}

impl TenantSeed {
    /// The tenant record this seed creates.
    pub fn to_tenant(&self) -> Tenant {
        let mut tenant = Tenant::new(&self.id, &self.name)
            .with_brand_voice(&self.brand_voice)
            .with_target_audience(&self.target_audience);
        tenant.tenant_type = self.tenant_type.clone();
        tenant.industry = self.industry.clone();
        tenant
    }
}

/// Builds the rule book from the configured tenants.
pub fn rule_book(tenants: &[TenantSeed]) -> RuleBook {
    tenants.iter().fold(RuleBook::new(), |book, seed| {
        book.with_tenant(&seed.id, seed.rules.clone())
    })
}

/// Agent definition as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSeed {
    /// Agent id.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Display name.
    pub name: String,
    /// Role.
    pub role: AgentRole,
    /// Specialization label.
    #[serde(default)]
    pub specialization: String,
    /// Skill tags, in match order.
    #[serde(default)]
    pub skills: Vec<String>,
    /// Model tag.
    #[serde(default)]
    pub model: String,
    /// Parent agent.
    #[serde(default)]
    pub parent_agent_id: Option<String>,
    /// Confidence threshold.
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f64,
    /// System prompt file, relative to the prompts directory.
    #[serde(default)]
    pub prompt_file: Option<String>,
}

fn default_threshold() -> f64 {
    0.8
}

impl AgentSeed {
    /// The agent record this seed creates.
    pub fn to_agent(&self, system_prompt: String) -> Agent {
        let mut agent = Agent::new(&self.id, &self.tenant_id, &self.name, self.role)
            .with_skills(self.skills.iter().cloned())
            .with_system_prompt(system_prompt);
        agent.specialization = self.specialization.clone();
        agent.model = self.model.clone();
        agent.parent_agent_id = self.parent_agent_id.clone();
        agent.confidence_threshold = self.confidence_threshold;
        agent
    }

    /// Reads the system prompt from `prompts_dir`. A seed without a prompt
    /// file, or whose file is missing, gets an empty prompt.
    pub async fn load_prompt(&self, prompts_dir: &Path) -> HoldingResult<String> {
        let Some(file) = &self.prompt_file else {
            return Ok(String::new());
        };
        let path = prompts_dir.join(file);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(agent_id = %self.id, path = %path.display(), "Prompt file not found");
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// What a seeding run inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Tenants created.
    pub tenants: usize,
    /// Agents created.
    pub agents: usize,
}

/// Inserts the configured tenants and agents that do not exist yet.
///
/// Agents go through [`AgentRegistry::register_agent`], so parents must be
/// listed before their children.
pub async fn seed_tenants_and_agents(
    registry: &AgentRegistry,
    audit: &AuditLog,
    tenants: &[TenantSeed],
    agents: &[AgentSeed],
    prompts_dir: &Path,
) -> HoldingResult<SeedReport> {
    let mut report = SeedReport::default();
    for seed in tenants {
        if registry.register_tenant(&seed.to_tenant()).await? {
            report.tenants += 1;
        }
    }
    for seed in agents {
        if registry.agent(&seed.tenant_id, &seed.id).await?.is_some() {
            continue;
        }
        let prompt = seed.load_prompt(prompts_dir).await?;
        if registry.register_agent(&seed.to_agent(prompt)).await? {
            report.agents += 1;
        }
    }

    audit
        .record(AuditEvent::new("seed").details(serde_json::json!({
            "tenants_created": report.tenants,
            "agents_created": report.agents,
        })))
        .await;
    info!(tenants = report.tenants, agents = report.agents, "Seed complete");
    Ok(report)
}

/// Re-reads prompt files and updates agents whose stored prompt differs.
/// Returns the number of agents updated.
pub async fn refresh_prompts(
    registry: &AgentRegistry,
    audit: &AuditLog,
    agents: &[AgentSeed],
    prompts_dir: &Path,
) -> HoldingResult<usize> {
    let mut updated = 0;
    for seed in agents {
        let prompt = seed.load_prompt(prompts_dir).await?;
        if prompt.is_empty() {
            continue;
        }
        let Some(existing) = registry.agent(&seed.tenant_id, &seed.id).await? else {
            continue;
        };
        if existing.system_prompt != prompt {
            registry.update_prompt(&seed.id, &prompt).await?;
            info!(agent_id = %seed.id, "Prompt refreshed");
            updated += 1;
        }
    }

    audit
        .record(AuditEvent::new("prompts_refreshed").details(serde_json::json!({
            "updated": updated,
        })))
        .await;
    Ok(updated)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use holding_store::{MemoryStore, Store};
    use std::sync::Arc;

    const CONFIG: &str = r#"
[[tenants]]
id = "acme"
name = "Acme Coffee"
type = "lunchroom"
brand_voice = "warm"

[tenants.rules]
auto_approve = ["hashtags"]

[[agents]]
id = "acme-boss"
tenant_id = "acme"
name = "Director"
role = "manager"

[[agents]]
id = "acme-luna"
tenant_id = "acme"
name = "Luna"
role = "worker"
skills = ["instagram", "captions"]
parent_agent_id = "acme-boss"
prompt_file = "acme/luna.md"

[[agents]]
id = "acme-chef"
tenant_id = "acme"
name = "Chef"
role = "auditor"
parent_agent_id = "acme-boss"
confidence_threshold = 0.9
prompt_file = "acme/missing.md"
"#;

    #[derive(Deserialize)]
    struct Seeds {
        tenants: Vec<TenantSeed>,
        agents: Vec<AgentSeed>,
    }

    fn setup() -> (tempfile::TempDir, Seeds, AgentRegistry, AuditLog, Arc<MemoryStore>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("acme")).unwrap();
        std::fs::write(dir.path().join("acme/luna.md"), "  You are Luna.\n").unwrap();
        let seeds: Seeds = toml::from_str(CONFIG).unwrap();
        let store = Arc::new(MemoryStore::new());
        let registry = AgentRegistry::new(store.clone());
        let audit = AuditLog::new(store.clone());
        (dir, seeds, registry, audit, store)
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let (dir, seeds, registry, audit, store) = setup();

        let first = seed_tenants_and_agents(&registry, &audit, &seeds.tenants, &seeds.agents, dir.path())
            .await
            .unwrap();
        assert_eq!(first, SeedReport { tenants: 1, agents: 3 });

        let second = seed_tenants_and_agents(&registry, &audit, &seeds.tenants, &seeds.agents, dir.path())
            .await
            .unwrap();
        assert_eq!(second, SeedReport::default());

        let luna = registry.agent("acme", "acme-luna").await.unwrap().unwrap();
        assert_eq!(luna.system_prompt, "You are Luna.");
        assert_eq!(luna.parent_agent_id.as_deref(), Some("acme-boss"));
        let chef = registry.agent("acme", "acme-chef").await.unwrap().unwrap();
        assert_eq!(chef.system_prompt, "");
        assert_eq!(chef.confidence_threshold, 0.9);

        let tenant = store.get_tenant("acme").await.unwrap().unwrap();
        assert_eq!(tenant.tenant_type, "lunchroom");

        let events = store.list_audit(None, 10).await.unwrap();
        assert_eq!(events[0].action, "seed");
        assert_eq!(events[0].details["agents_created"], 0);
    }

    #[tokio::test]
    async fn test_refresh_updates_changed_prompts_only() {
        let (dir, seeds, registry, audit, _store) = setup();
        seed_tenants_and_agents(&registry, &audit, &seeds.tenants, &seeds.agents, dir.path())
            .await
            .unwrap();

        assert_eq!(
            refresh_prompts(&registry, &audit, &seeds.agents, dir.path()).await.unwrap(),
            0
        );

        std::fs::write(dir.path().join("acme/luna.md"), "You are Luna, v2.").unwrap();
        assert_eq!(
            refresh_prompts(&registry, &audit, &seeds.agents, dir.path()).await.unwrap(),
            1
        );
        let luna = registry.agent("acme", "acme-luna").await.unwrap().unwrap();
        assert_eq!(luna.system_prompt, "You are Luna, v2.");
    }

    #[test]
    fn test_rule_book_from_seeds() {
        let seeds: Seeds = toml::from_str(CONFIG).unwrap();
        let book = rule_book(&seeds.tenants);
        assert!(book.for_tenant("acme").auto_approves("hashtags"));
        assert!(!book.for_tenant("other").auto_approves("hashtags"));
    }
}
