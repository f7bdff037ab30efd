//! Core types and error definitions for the Holding agent pipeline.
//!
//! This crate provides the foundational types shared across all Holding crates:
//! the error taxonomy, the tenant/agent/task data model and the request context
//! threaded through pipeline calls.
//!
//! # Main types
//!
//! - [`HoldingError`]: Unified error enum for pipeline-level failures.
//! - [`HoldingResult`]: Convenience alias for `Result<T, HoldingError>`.
//! - [`Tenant`], [`Agent`], [`Task`]: The scoped data model.
//! - [`Correction`], [`CostLogEntry`], [`AuditEvent`]: Append-only records.
//! - [`RequestContext`]: Session and tenant scope for one inbound request.

/// Request-scoped context.
pub mod context;
/// Error types.
pub mod error;
/// Domain types.
pub mod types;

pub use context::RequestContext;
pub use error::{HoldingError, HoldingResult};
pub use types::{
    generate_task_id, Agent, AgentRole, AgentStatus, AuditEvent, CostLogEntry, Correction,
    Severity, Task, TaskStatus, Tenant, DEFAULT_MAX_REVISIONS, DEFAULT_PRIORITY,
};
