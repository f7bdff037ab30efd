//! Task lifecycle, agent registry and correction policy.
//!
//! A task moves `pending -> in_progress -> review -> approved | rejected`,
//! with `review -> pending` as the revision loop. Workers produce output
//! through the shared [`holding_router::CallRouter`]; the tenant's auditor
//! reviews it and the [`CorrectionEngine`] decides whether to approve, send
//! back or escalate.
//!
//! # Main types
//!
//! - [`TaskPipeline`]: create, execute, review and full-pipeline runs.
//! - [`AgentRegistry`]: Tenant/agent registration and worker/auditor lookup.
//! - [`CorrectionEngine`]: Auditor prompt, verdict parsing and the review policy.
//! - [`RuleBook`]: Per-tenant auto-approve and escalation lists.
//! - [`TenantSeed`] / [`AgentSeed`]: Seed definitions loaded from configuration.

/// Verdict parsing and the review policy.
pub mod correction;
/// The task pipeline.
pub mod pipeline;
/// Prompt construction.
pub mod prompt;
/// Agent and tenant registry.
pub mod registry;
/// Per-tenant review rules.
pub mod rules;
/// Idempotent seeding and prompt refresh.
pub mod seed;

pub use correction::{
    decide, parse_review, CorrectionEngine, Decision, ReviewAction, ReviewOutcome, Verdict,
    VerdictKind, APPROVE_CONFIDENCE, ESCALATE_CONFIDENCE,
};
pub use pipeline::{
    ExecutionOutput, NewTask, PipelineRun, PipelineStage, PipelineStop, TaskPipeline,
};
pub use prompt::{build_review_prompt, build_task_prompt};
pub use registry::AgentRegistry;
pub use rules::{CorrectionRules, RuleBook};
pub use seed::{
    refresh_prompts, rule_book, seed_tenants_and_agents, AgentSeed, SeedReport, TenantSeed,
};
