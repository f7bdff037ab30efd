use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task types that bypass part of the review policy for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionRules {
    /// A passing verdict on these types is approved regardless of confidence.
    pub auto_approve: Vec<String>,
    /// These types always go to a human after review.
    pub escalate_to_human: Vec<String>,
}

impl CorrectionRules {
    /// True if a passing verdict on `task_type` is enough to approve.
    pub fn auto_approves(&self, task_type: &str) -> bool {
        self.auto_approve.iter().any(|t| t == task_type)
    }

    /// True if `task_type` always escalates.
    pub fn escalates(&self, task_type: &str) -> bool {
        self.escalate_to_human.iter().any(|t| t == task_type)
    }
}

/// Review rules per tenant. Tenants without an entry get empty lists.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    tenants: HashMap<String, CorrectionRules>,
    empty: CorrectionRules,
}

impl RuleBook {
    /// Creates an empty rule book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rules for one tenant.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>, rules: CorrectionRules) -> Self {
        self.tenants.insert(tenant_id.into(), rules);
        self
    }

    /// Rules for `tenant_id`.
    pub fn for_tenant(&self, tenant_id: &str) -> &CorrectionRules {
        self.tenants.get(tenant_id).unwrap_or(&self.empty)
    }
}
