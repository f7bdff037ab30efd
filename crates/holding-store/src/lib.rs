//! Persistence for the Holding agent pipeline.
//!
//! # Main types
//!
//! - [`Store`]: Async trait over the tenant, agent, task, correction, cost
//!   and audit tables.
//! - [`MemoryStore`]: In-process implementation.
//! - [`SqliteStore`]: SQLite implementation.
//! - [`AuditLog`]: Audit trail that logs and persists events.

/// Audit trail.
pub mod audit;
/// In-memory store.
pub mod memory;
/// SQLite store.
pub mod sqlite;
/// Store trait and query types.
pub mod store;

pub use audit::AuditLog;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{CostSummaryRow, Store, TaskFilter};
