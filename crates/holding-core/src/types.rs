use crate::error::HoldingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Default revision budget for a new task.
pub const DEFAULT_MAX_REVISIONS: u32 = 3;

/// Default priority for a new task (1 = highest, 10 = lowest).
pub const DEFAULT_PRIORITY: i32 = 5;

// --- Tenants ---

/// An isolated business context. All agent and task data is scoped to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// Short stable identifier, e.g. `"acme"`.
    pub id: String,
    /// Display name used in prompts ("Brand: ...").
    pub name: String,
    /// Free-form business category (`saas`, `ecommerce`, ...).
    #[serde(default, rename = "type")]
    pub tenant_type: String,
    /// Brand voice guidance injected into worker prompts.
    #[serde(default)]
    pub brand_voice: String,
    /// Target audience description injected into worker prompts.
    #[serde(default)]
    pub target_audience: String,
    /// Industry label.
    #[serde(default)]
    pub industry: String,
    /// Arbitrary tenant configuration.
    #[serde(default)]
    pub config: serde_json::Value,
    /// When the tenant was first stored.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// Creates a tenant with only an id and display name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tenant_type: String::new(),
            brand_voice: String::new(),
            target_audience: String::new(),
            industry: String::new(),
            config: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Sets the brand voice.
    pub fn with_brand_voice(mut self, voice: impl Into<String>) -> Self {
        self.brand_voice = voice.into();
        self
    }

    /// Sets the target audience.
    pub fn with_target_audience(mut self, audience: impl Into<String>) -> Self {
        self.target_audience = audience.into();
        self
    }
}

// --- Agents ---

/// Position of an agent inside its tenant's hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Supervises workers; never assigned tasks directly.
    Manager,
    /// Produces task output.
    Worker,
    /// Reviews worker output and emits a verdict.
    Auditor,
}

impl AgentRole {
    /// Lowercase name as stored and displayed.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Manager => "manager",
            AgentRole::Worker => "worker",
            AgentRole::Auditor => "auditor",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = HoldingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manager" => Ok(AgentRole::Manager),
            "worker" => Ok(AgentRole::Worker),
            "auditor" => Ok(AgentRole::Auditor),
            other => Err(HoldingError::Config(format!("unknown agent role: {other}"))),
        }
    }
}

/// Availability of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Ready for work.
    #[default]
    Idle,
    /// Currently generating output.
    Busy,
    /// Last operation failed.
    Error,
    /// Excluded from assignment.
    Offline,
}

impl AgentStatus {
    /// Lowercase name as stored and displayed.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
            AgentStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = HoldingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "busy" => Ok(AgentStatus::Busy),
            "error" => Ok(AgentStatus::Error),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(HoldingError::Config(format!(
                "unknown agent status: {other}"
            ))),
        }
    }
}

/// A role-specialized agent belonging to exactly one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Globally unique id, e.g. `"acme-copywriter"`.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Display name.
    pub name: String,
    /// Hierarchy role.
    pub role: AgentRole,
    /// Free-form specialization label.
    #[serde(default)]
    pub specialization: String,
    /// Ordered skill tags used for task routing.
    #[serde(default)]
    pub skills: Vec<String>,
    /// Model tag recorded for bookkeeping.
    #[serde(default)]
    pub model: String,
    /// Supervising agent in the same tenant, if any.
    #[serde(default)]
    pub parent_agent_id: Option<String>,
    /// Minimum confidence this agent is expected to reach (0..1).
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Current availability.
    #[serde(default)]
    pub status: AgentStatus,
    /// System prompt sent with every generation.
    #[serde(default)]
    pub system_prompt: String,
    /// When the agent was first stored.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_confidence_threshold() -> f64 {
    0.8
}

impl Agent {
    /// Creates an idle agent with no skills and an empty prompt.
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        role: AgentRole,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            role,
            specialization: String::new(),
            skills: Vec::new(),
            model: String::new(),
            parent_agent_id: None,
            confidence_threshold: default_confidence_threshold(),
            status: AgentStatus::Idle,
            system_prompt: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Sets the skill tags.
    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the parent agent.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_agent_id = Some(parent.into());
        self
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the initial status.
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    /// True if `task_type` equals a skill tag or is contained in one.
    pub fn handles(&self, task_type: &str) -> bool {
        self.skills
            .iter()
            .any(|skill| skill == task_type || skill.contains(task_type))
    }
}

// --- Tasks ---

/// Lifecycle state of a task.
///
/// `pending -> in_progress -> review -> approved | rejected`, with
/// `review -> pending` as the only backward edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be executed (new or sent back for revision).
    #[default]
    Pending,
    /// A worker is generating output.
    InProgress,
    /// Output stored, waiting for the auditor.
    Review,
    /// Accepted. Terminal.
    Approved,
    /// Escalated to a human. Terminal.
    Rejected,
}

impl TaskStatus {
    /// Snake-case name as stored and displayed.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Approved => "approved",
            TaskStatus::Rejected => "rejected",
        }
    }

    /// Approved and rejected tasks accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Approved | TaskStatus::Rejected)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = HoldingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "review" => Ok(TaskStatus::Review),
            "approved" => Ok(TaskStatus::Approved),
            "rejected" => Ok(TaskStatus::Rejected),
            other => Err(HoldingError::Config(format!("unknown task status: {other}"))),
        }
    }
}

/// A unit of work owned by one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// `ht_YYYYMMDD_HHMMSS_xxxxxx`.
    pub id: String,
    /// Owning tenant. Never changes after creation.
    pub tenant_id: String,
    /// Task type used for routing and policy lists.
    pub task_type: String,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Worker the task is assigned to.
    pub assigned_to: Option<String>,
    /// Who created the task.
    pub created_by: String,
    /// Structured input handed to the worker.
    pub input_data: serde_json::Value,
    /// Latest worker output; overwritten on each revision.
    pub output_data: Option<serde_json::Value>,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// 1 = highest.
    pub priority: i32,
    /// Number of times the task has been sent back.
    pub revision_count: u32,
    /// Revision budget before forced escalation.
    pub max_revisions: u32,
    /// Confidence from the latest review.
    pub confidence_score: Option<f64>,
    /// Feedback from the latest review.
    pub review_notes: Option<String>,
    /// Auditor that performed the latest review.
    pub reviewed_by: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Set only when the task is approved.
    pub approved_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a pending, unassigned task with a fresh id.
    pub fn new(
        tenant_id: impl Into<String>,
        task_type: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_task_id(now),
            tenant_id: tenant_id.into(),
            task_type: task_type.into(),
            title: title.into(),
            description: description.into(),
            assigned_to: None,
            created_by: "system".to_string(),
            input_data: serde_json::Value::Object(Default::default()),
            output_data: None,
            status: TaskStatus::Pending,
            priority: DEFAULT_PRIORITY,
            revision_count: 0,
            max_revisions: DEFAULT_MAX_REVISIONS,
            confidence_score: None,
            review_notes: None,
            reviewed_by: None,
            created_at: now,
            approved_at: None,
        }
    }

    /// Text content of the stored output, or `""` when none.
    pub fn output_content(&self) -> &str {
        self.output_data
            .as_ref()
            .and_then(|o| o.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or("")
    }

    /// True once the revision budget is spent.
    pub fn revisions_exhausted(&self) -> bool {
        self.revision_count >= self.max_revisions
    }
}

/// Builds a task id from the creation time plus six random hex digits.
pub fn generate_task_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ht_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..6])
}

// --- Corrections ---

/// Severity attached to a correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic issues.
    Minor,
    /// Substantive issues.
    Major,
    /// Unusable output.
    Critical,
}

impl Severity {
    /// Lowercase name as stored and displayed.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = HoldingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minor" => Ok(Severity::Minor),
            "major" => Ok(Severity::Major),
            "critical" => Ok(Severity::Critical),
            other => Err(HoldingError::Config(format!("unknown severity: {other}"))),
        }
    }
}

/// Append-only record of an auditor's objection to a task output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    /// Store-assigned id; `0` until inserted.
    #[serde(default)]
    pub id: i64,
    /// Task the correction applies to.
    pub task_id: String,
    /// Auditor that produced it.
    pub reviewer_agent_id: String,
    /// Leading slice of the reviewed output.
    pub original_output: String,
    /// Auditor feedback.
    pub correction: String,
    /// Why the correction was recorded.
    pub reason: String,
    /// How bad the problem is.
    pub severity: Severity,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
}

// --- Costs ---

/// Append-only cost record for one successful generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLogEntry {
    /// Tenant billed for the call.
    pub tenant_id: String,
    /// Agent the call was made for.
    pub agent_id: String,
    /// `provider/model`.
    pub model: String,
    /// Prompt tokens.
    pub tokens_in: u32,
    /// Completion tokens.
    pub tokens_out: u32,
    /// Estimated cost.
    pub cost_usd: f64,
    /// Task the call served, when known.
    pub task_id: Option<String>,
    /// Call completion time.
    pub timestamp: DateTime<Utc>,
}

// --- Audit ---

/// A single persisted audit-trail event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id.
    pub id: Uuid,
    /// Action name, e.g. `task_sent_back`.
    pub action: String,
    /// Tenant the event concerns, if any.
    pub tenant_id: Option<String>,
    /// Agent the event concerns, if any.
    pub agent_id: Option<String>,
    /// Task the event concerns, if any.
    pub task_id: Option<String>,
    /// Action-specific payload.
    pub details: serde_json::Value,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Creates an event stamped now with an empty payload.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            tenant_id: None,
            agent_id: None,
            task_id: None,
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Sets the tenant.
    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the agent.
    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Sets the task.
    pub fn task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Sets the payload.
    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_task_id_format() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        let id = generate_task_id(now);
        assert!(id.starts_with("ht_20250314_092653_"));
        assert_eq!(id.len(), "ht_20250314_092653_".len() + 6);
        assert!(id[19..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new("acme", "copy", "Landing page", "Write it");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.revision_count, 0);
        assert_eq!(task.max_revisions, DEFAULT_MAX_REVISIONS);
        assert!(task.assigned_to.is_none());
        assert!(task.approved_at.is_none());
        assert_eq!(task.output_content(), "");
    }

    #[test]
    fn test_task_status_round_trip_names() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Review,
            TaskStatus::Approved,
            TaskStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(TaskStatus::Approved.is_terminal());
        assert!(TaskStatus::Rejected.is_terminal());
        assert!(!TaskStatus::Review.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn test_agent_handles_exact_and_substring() {
        let agent = Agent::new("w", "acme", "Writer", AgentRole::Worker)
            .with_skills(["copywriting", "seo"]);
        assert!(agent.handles("seo"));
        assert!(agent.handles("copy"));
        assert!(!agent.handles("design"));
    }

    #[test]
    fn test_revisions_exhausted() {
        let mut task = Task::new("acme", "copy", "t", "d");
        task.revision_count = 2;
        assert!(!task.revisions_exhausted());
        task.revision_count = 3;
        assert!(task.revisions_exhausted());
    }

    #[test]
    fn test_output_content() {
        let mut task = Task::new("acme", "copy", "t", "d");
        task.output_data = Some(serde_json::json!({"content": "hello", "model": "x"}));
        assert_eq!(task.output_content(), "hello");
    }

    #[test]
    fn test_tenant_serde_uses_type_key() {
        let tenant: Tenant =
            serde_json::from_str(r#"{"id":"acme","name":"Acme","type":"saas"}"#).unwrap();
        assert_eq!(tenant.tenant_type, "saas");
        assert!(tenant.brand_voice.is_empty());
    }
}
