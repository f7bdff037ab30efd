use crate::store::{CostSummaryRow, Store, TaskFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use holding_core::{
    Agent, AgentStatus, AuditEvent, CostLogEntry, Correction, HoldingError, HoldingResult, Task,
    TaskStatus, Tenant,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    type TEXT NOT NULL DEFAULT '',
    brand_voice TEXT NOT NULL DEFAULT '',
    target_audience TEXT NOT NULL DEFAULT '',
    industry TEXT NOT NULL DEFAULT '',
    config TEXT NOT NULL DEFAULT 'null',
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id),
    name TEXT NOT NULL,
    role TEXT NOT NULL,
    specialization TEXT NOT NULL DEFAULT '',
    skills TEXT NOT NULL DEFAULT '[]',
    model TEXT NOT NULL DEFAULT '',
    parent_agent_id TEXT,
    confidence_threshold REAL NOT NULL DEFAULT 0.8,
    status TEXT NOT NULL DEFAULT 'idle',
    system_prompt TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id),
    type TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    assigned_to TEXT,
    created_by TEXT NOT NULL DEFAULT 'system',
    input_data TEXT NOT NULL DEFAULT '{}',
    output_data TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 5,
    revision_count INTEGER NOT NULL DEFAULT 0,
    max_revisions INTEGER NOT NULL DEFAULT 3,
    confidence_score REAL,
    review_notes TEXT,
    reviewed_by TEXT,
    created_at TEXT NOT NULL,
    approved_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_tasks_tenant_status ON tasks(tenant_id, status);
CREATE TABLE IF NOT EXISTS corrections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    reviewer_agent_id TEXT NOT NULL,
    original_output TEXT NOT NULL,
    correction TEXT NOT NULL,
    reason TEXT NOT NULL,
    severity TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_corrections_task ON corrections(task_id);
CREATE TABLE IF NOT EXISTS cost_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    model TEXT NOT NULL,
    tokens_in INTEGER NOT NULL,
    tokens_out INTEGER NOT NULL,
    cost_usd REAL NOT NULL,
    task_id TEXT,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cost_log_timestamp ON cost_log(timestamp);
CREATE TABLE IF NOT EXISTS audit_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL,
    action TEXT NOT NULL,
    tenant_id TEXT,
    agent_id TEXT,
    task_id TEXT,
    details TEXT NOT NULL DEFAULT 'null',
    timestamp TEXT NOT NULL
);
";

const TASK_COLUMNS: &str = "id, tenant_id, type, title, description, assigned_to, created_by, \
    input_data, output_data, status, priority, revision_count, max_revisions, \
    confidence_score, review_notes, reviewed_by, created_at, approved_at";

const AGENT_COLUMNS: &str = "id, tenant_id, name, role, specialization, skills, model, \
    parent_agent_id, confidence_threshold, status, system_prompt, created_at";

const TENANT_COLUMNS: &str =
    "id, name, type, brand_voice, target_audience, industry, config, created_at";

/// SQLite-backed store. One connection guarded by an async mutex.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> HoldingError {
    HoldingError::Store(e.to_string())
}

fn conversion_err(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = HoldingError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_err(idx, e))
}

fn json_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_err(idx, e))
}

fn opt_json_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn tenant_from_row(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        id: row.get(0)?,
        name: row.get(1)?,
        tenant_type: row.get(2)?,
        brand_voice: row.get(3)?,
        target_audience: row.get(4)?,
        industry: row.get(5)?,
        config: json_col(row, 6)?,
        created_at: row.get(7)?,
    })
}

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let skills: String = row.get(5)?;
    Ok(Agent {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        role: enum_col(row, 3)?,
        specialization: row.get(4)?,
        skills: serde_json::from_str(&skills).map_err(|e| conversion_err(5, e))?,
        model: row.get(6)?,
        parent_agent_id: row.get(7)?,
        confidence_threshold: row.get(8)?,
        status: enum_col(row, 9)?,
        system_prompt: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        task_type: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        assigned_to: row.get(5)?,
        created_by: row.get(6)?,
        input_data: json_col(row, 7)?,
        output_data: opt_json_col(row, 8)?,
        status: enum_col(row, 9)?,
        priority: row.get(10)?,
        revision_count: row.get(11)?,
        max_revisions: row.get(12)?,
        confidence_score: row.get(13)?,
        review_notes: row.get(14)?,
        reviewed_by: row.get(15)?,
        created_at: row.get(16)?,
        approved_at: row.get(17)?,
    })
}

impl SqliteStore {
    /// Opens (or creates) a database file and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> HoldingResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        info!(path = %path.display(), "Opened SQLite store");
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> HoldingResult<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn with_connection(conn: Connection) -> HoldingResult<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> HoldingResult<bool> {
        let db = self.db.lock().await;
        let changed = db
            .execute(
                "INSERT OR IGNORE INTO tenants (id, name, type, brand_voice, target_audience, \
                 industry, config, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    tenant.id,
                    tenant.name,
                    tenant.tenant_type,
                    tenant.brand_voice,
                    tenant.target_audience,
                    tenant.industry,
                    tenant.config.to_string(),
                    tenant.created_at,
                ],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    async fn get_tenant(&self, id: &str) -> HoldingResult<Option<Tenant>> {
        let db = self.db.lock().await;
        db.query_row(
            &format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?1"),
            params![id],
            tenant_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    async fn list_tenants(&self) -> HoldingResult<Vec<Tenant>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare(&format!("SELECT {TENANT_COLUMNS} FROM tenants ORDER BY rowid"))
            .map_err(db_err)?;
        let rows = stmt.query_map([], tenant_from_row).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    async fn update_tenant(&self, tenant: &Tenant) -> HoldingResult<()> {
        let db = self.db.lock().await;
        let changed = db
            .execute(
                "UPDATE tenants SET name = ?2, type = ?3, brand_voice = ?4, target_audience = ?5, \
                 industry = ?6, config = ?7 WHERE id = ?1",
                params![
                    tenant.id,
                    tenant.name,
                    tenant.tenant_type,
                    tenant.brand_voice,
                    tenant.target_audience,
                    tenant.industry,
                    tenant.config.to_string(),
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(HoldingError::TenantNotFound(tenant.id.clone()));
        }
        Ok(())
    }

    async fn insert_agent(&self, agent: &Agent) -> HoldingResult<bool> {
        let skills = serde_json::to_string(&agent.skills)?;
        let db = self.db.lock().await;
        let changed = db
            .execute(
                "INSERT OR IGNORE INTO agents (id, tenant_id, name, role, specialization, skills, \
                 model, parent_agent_id, confidence_threshold, status, system_prompt, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    agent.id,
                    agent.tenant_id,
                    agent.name,
                    agent.role.as_str(),
                    agent.specialization,
                    skills,
                    agent.model,
                    agent.parent_agent_id,
                    agent.confidence_threshold,
                    agent.status.as_str(),
                    agent.system_prompt,
                    agent.created_at,
                ],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    async fn get_agent(&self, id: &str) -> HoldingResult<Option<Agent>> {
        let db = self.db.lock().await;
        db.query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
            params![id],
            agent_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    async fn list_agents(&self, tenant_id: &str) -> HoldingResult<Vec<Agent>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents WHERE tenant_id = ?1 ORDER BY rowid"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![tenant_id], agent_from_row)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> HoldingResult<()> {
        let db = self.db.lock().await;
        let changed = db
            .execute(
                "UPDATE agents SET status = ?2 WHERE id = ?1",
                params![agent_id, status.as_str()],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(HoldingError::AgentNotFound(agent_id.to_string()));
        }
        Ok(())
    }

    async fn update_agent_prompt(&self, agent_id: &str, prompt: &str) -> HoldingResult<()> {
        let db = self.db.lock().await;
        let changed = db
            .execute(
                "UPDATE agents SET system_prompt = ?2 WHERE id = ?1",
                params![agent_id, prompt],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(HoldingError::AgentNotFound(agent_id.to_string()));
        }
        Ok(())
    }

    async fn insert_task(&self, task: &Task) -> HoldingResult<()> {
        let output = task.output_data.as_ref().map(ToString::to_string);
        let db = self.db.lock().await;
        db.execute(
            &format!(
                "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, \
                 ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
            ),
            params![
                task.id,
                task.tenant_id,
                task.task_type,
                task.title,
                task.description,
                task.assigned_to,
                task.created_by,
                task.input_data.to_string(),
                output,
                task.status.as_str(),
                task.priority,
                task.revision_count,
                task.max_revisions,
                task.confidence_score,
                task.review_notes,
                task.reviewed_by,
                task.created_at,
                task.approved_at,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_task(&self, tenant_id: &str, task_id: &str) -> HoldingResult<Option<Task>> {
        let db = self.db.lock().await;
        db.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND tenant_id = ?2"),
            params![task_id, tenant_id],
            task_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> HoldingResult<Vec<Task>> {
        let limit = filter.limit.map_or(-1, |l| l as i64);
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE tenant_id = ?1 \
                 AND (?2 IS NULL OR status = ?2) AND (?3 IS NULL OR assigned_to = ?3) \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?4"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![
                    filter.tenant_id,
                    filter.status.map(|s| s.as_str()),
                    filter.assigned_to,
                    limit,
                ],
                task_from_row,
            )
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    async fn update_task(&self, task: &Task) -> HoldingResult<()> {
        let output = task.output_data.as_ref().map(ToString::to_string);
        let db = self.db.lock().await;
        let changed = db
            .execute(
                "UPDATE tasks SET type = ?3, title = ?4, description = ?5, assigned_to = ?6, \
                 input_data = ?7, output_data = ?8, status = ?9, priority = ?10, \
                 revision_count = ?11, max_revisions = ?12, confidence_score = ?13, \
                 review_notes = ?14, reviewed_by = ?15, approved_at = ?16 \
                 WHERE id = ?1 AND tenant_id = ?2",
                params![
                    task.id,
                    task.tenant_id,
                    task.task_type,
                    task.title,
                    task.description,
                    task.assigned_to,
                    task.input_data.to_string(),
                    output,
                    task.status.as_str(),
                    task.priority,
                    task.revision_count,
                    task.max_revisions,
                    task.confidence_score,
                    task.review_notes,
                    task.reviewed_by,
                    task.approved_at,
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(HoldingError::TaskNotFound(task.id.clone()));
        }
        Ok(())
    }

    async fn transition_task(
        &self,
        tenant_id: &str,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> HoldingResult<bool> {
        let db = self.db.lock().await;
        let changed = db
            .execute(
                "UPDATE tasks SET status = ?4 WHERE id = ?1 AND tenant_id = ?2 AND status = ?3",
                params![task_id, tenant_id, from.as_str(), to.as_str()],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    async fn insert_correction(&self, correction: &Correction) -> HoldingResult<i64> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO corrections (task_id, reviewer_agent_id, original_output, correction, \
             reason, severity, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                correction.task_id,
                correction.reviewer_agent_id,
                correction.original_output,
                correction.correction,
                correction.reason,
                correction.severity.as_str(),
                correction.created_at,
            ],
        )
        .map_err(db_err)?;
        Ok(db.last_insert_rowid())
    }

    async fn list_corrections(&self, task_id: &str) -> HoldingResult<Vec<Correction>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare(
                "SELECT id, task_id, reviewer_agent_id, original_output, correction, reason, \
                 severity, created_at FROM corrections WHERE task_id = ?1 ORDER BY id DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok(Correction {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    reviewer_agent_id: row.get(2)?,
                    original_output: row.get(3)?,
                    correction: row.get(4)?,
                    reason: row.get(5)?,
                    severity: enum_col(row, 6)?,
                    created_at: row.get(7)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    async fn insert_cost(&self, entry: &CostLogEntry) -> HoldingResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO cost_log (tenant_id, agent_id, model, tokens_in, tokens_out, cost_usd, \
             task_id, timestamp) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.tenant_id,
                entry.agent_id,
                entry.model,
                entry.tokens_in,
                entry.tokens_out,
                entry.cost_usd,
                entry.task_id,
                entry.timestamp,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn cost_summary(&self, tenant_id: Option<&str>) -> HoldingResult<Vec<CostSummaryRow>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare(
                "SELECT tenant_id, agent_id, model, SUM(tokens_in), SUM(tokens_out), \
                 SUM(cost_usd), COUNT(*) FROM cost_log WHERE (?1 IS NULL OR tenant_id = ?1) \
                 GROUP BY tenant_id, agent_id, model ORDER BY tenant_id, agent_id, model",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![tenant_id], |row| {
                Ok(CostSummaryRow {
                    tenant_id: row.get(0)?,
                    agent_id: row.get(1)?,
                    model: row.get(2)?,
                    tokens_in: row.get::<_, i64>(3)? as u64,
                    tokens_out: row.get::<_, i64>(4)? as u64,
                    cost_usd: row.get(5)?,
                    call_count: row.get::<_, i64>(6)? as u64,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    async fn total_cost_since(&self, since: DateTime<Utc>) -> HoldingResult<f64> {
        let db = self.db.lock().await;
        db.query_row(
            "SELECT COALESCE(SUM(cost_usd), 0.0) FROM cost_log WHERE timestamp >= ?1",
            params![since],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    async fn insert_audit(&self, event: &AuditEvent) -> HoldingResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO audit_log (id, action, tenant_id, agent_id, task_id, details, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.id.to_string(),
                event.action,
                event.tenant_id,
                event.agent_id,
                event.task_id,
                event.details.to_string(),
                event.timestamp,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_audit(
        &self,
        tenant_id: Option<&str>,
        limit: usize,
    ) -> HoldingResult<Vec<AuditEvent>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare(
                "SELECT id, action, tenant_id, agent_id, task_id, details, timestamp \
                 FROM audit_log WHERE (?1 IS NULL OR tenant_id = ?1) ORDER BY seq DESC LIMIT ?2",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![tenant_id, limit as i64], |row| {
                let id: String = row.get(0)?;
                Ok(AuditEvent {
                    id: id.parse().map_err(|e| conversion_err(0, e))?,
                    action: row.get(1)?,
                    tenant_id: row.get(2)?,
                    agent_id: row.get(3)?,
                    task_id: row.get(4)?,
                    details: json_col(row, 5)?,
                    timestamp: row.get(6)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}
