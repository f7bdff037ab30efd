use crate::correction::{CorrectionEngine, ReviewOutcome};
use crate::prompt::build_task_prompt;
use crate::registry::AgentRegistry;
use crate::rules::RuleBook;
use holding_channels::Notifier;
use holding_core::{
    AgentStatus, AuditEvent, Correction, HoldingError, HoldingResult, RequestContext, Task,
    TaskStatus, DEFAULT_PRIORITY,
};
use holding_router::{CallRouter, GenerationRequest};
use holding_store::{AuditLog, Store, TaskFilter};
use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;
use tracing::{info, warn};

/// Input to [`TaskPipeline::create_task`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    /// Task type, matched against worker skills.
    pub task_type: String,
    /// Short title.
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Priority; lower is more urgent.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Structured input passed to the worker.
    #[serde(default = "empty_object")]
    pub input_data: serde_json::Value,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl NewTask {
    /// A task with default priority and no input.
    pub fn new(task_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            title: title.into(),
            description: String::new(),
            priority: DEFAULT_PRIORITY,
            input_data: empty_object(),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the structured input.
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input_data = input;
        self
    }
}

/// Successful execution of a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutput {
    /// Task executed.
    pub task_id: String,
    /// Generated text.
    pub content: String,
    /// Provider label that served the call.
    pub provider: String,
    /// `provider/model`.
    pub model: String,
    /// Wall time of the provider call.
    pub elapsed_ms: u64,
}

/// Step at which a pipeline run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// The worker call.
    Execute,
    /// The auditor review.
    Review,
}

impl PipelineStage {
    /// State a task is left in when this stage fails.
    fn resting_status(self) -> TaskStatus {
        match self {
            PipelineStage::Execute => TaskStatus::Pending,
            PipelineStage::Review => TaskStatus::Review,
        }
    }
}

/// Failure that stopped a run after its task was created.
#[derive(Debug, Serialize)]
pub struct PipelineStop {
    /// Step that failed.
    pub stage: PipelineStage,
    /// What went wrong.
    #[serde(serialize_with = "error_text")]
    pub error: HoldingError,
}

fn error_text<S: Serializer>(error: &HoldingError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Result of [`TaskPipeline::run_full_pipeline`].
///
/// Once the task exists the run is always reported, so a stalled task can be
/// found and resumed by id.
#[derive(Debug, Serialize)]
pub struct PipelineRun {
    /// Task created.
    pub task_id: String,
    /// State of the task when the run ended.
    pub status: TaskStatus,
    /// Worker output, if execution succeeded.
    pub execution: Option<ExecutionOutput>,
    /// Auditor review, if it was applied.
    pub review: Option<ReviewOutcome>,
    /// Set when a step failed.
    pub stopped: Option<PipelineStop>,
}

impl PipelineRun {
    /// True when the task was executed and reviewed.
    pub fn is_complete(&self) -> bool {
        self.stopped.is_none()
    }
}

/// Moves `task` from `from` to `to` unless another caller got there first.
pub(crate) async fn claim_transition(
    store: &dyn Store,
    task: &Task,
    from: TaskStatus,
    to: TaskStatus,
) -> HoldingResult<()> {
    if store
        .transition_task(&task.tenant_id, &task.id, from, to)
        .await?
    {
        return Ok(());
    }
    let actual = store
        .get_task(&task.tenant_id, &task.id)
        .await?
        .ok_or_else(|| HoldingError::TaskNotFound(task.id.clone()))?
        .status;
    Err(HoldingError::invalid_state(&task.id, from, actual))
}

/// The task lifecycle: create, execute through the call router, review by
/// the tenant's auditor.
///
/// Every operation takes a [`RequestContext`] and only sees tasks of the
/// context's tenant. State changes are claimed with an atomic store
/// transition, so of two concurrent calls on the same task only one proceeds
/// and the other fails with `InvalidTaskState`.
pub struct TaskPipeline {
    store: Arc<dyn Store>,
    registry: AgentRegistry,
    router: Arc<CallRouter>,
    engine: CorrectionEngine,
    audit: AuditLog,
}

impl TaskPipeline {
    /// Creates a pipeline sharing the process-wide router.
    pub fn new(
        store: Arc<dyn Store>,
        router: Arc<CallRouter>,
        notifier: Arc<dyn Notifier>,
        rules: RuleBook,
    ) -> Self {
        Self {
            registry: AgentRegistry::new(store.clone()),
            engine: CorrectionEngine::new(router.clone(), store.clone(), notifier, rules),
            audit: AuditLog::new(store.clone()),
            router,
            store,
        }
    }

    /// Agent registry over the same store.
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Correction engine.
    pub fn engine(&self) -> &CorrectionEngine {
        &self.engine
    }

    /// Shared call router.
    pub fn router(&self) -> &Arc<CallRouter> {
        &self.router
    }

    /// Audit log over the same store.
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// A task of the context's tenant.
    pub async fn get_task(&self, ctx: &RequestContext, task_id: &str) -> HoldingResult<Task> {
        self.store
            .get_task(&ctx.tenant_id, task_id)
            .await?
            .ok_or_else(|| HoldingError::TaskNotFound(task_id.to_string()))
    }

    /// Tasks of the context's tenant, newest first.
    pub async fn list_tasks(
        &self,
        ctx: &RequestContext,
        status: Option<TaskStatus>,
        limit: Option<usize>,
    ) -> HoldingResult<Vec<Task>> {
        let mut filter = TaskFilter::tenant(&ctx.tenant_id);
        filter.status = status;
        filter.limit = limit;
        self.store.list_tasks(&filter).await
    }

    /// Corrections recorded against a task, newest first.
    pub async fn corrections(
        &self,
        ctx: &RequestContext,
        task_id: &str,
    ) -> HoldingResult<Vec<Correction>> {
        let task = self.get_task(ctx, task_id).await?;
        self.store.list_corrections(&task.id).await
    }

    /// Recent audit events of the context's tenant.
    pub async fn audit_trail(
        &self,
        ctx: &RequestContext,
        limit: usize,
    ) -> HoldingResult<Vec<AuditEvent>> {
        self.audit.recent(Some(&ctx.tenant_id), limit).await
    }

    /// Creates a pending task and assigns the best available worker, if any.
    /// Does not execute it.
    pub async fn create_task(&self, ctx: &RequestContext, new: NewTask) -> HoldingResult<String> {
        if self.registry.tenant(&ctx.tenant_id).await?.is_none() {
            return Err(HoldingError::TenantNotFound(ctx.tenant_id.clone()));
        }
        let worker = self
            .registry
            .get_agent_for_task(&ctx.tenant_id, &new.task_type)
            .await?;

        let mut task = Task::new(&ctx.tenant_id, new.task_type, new.title, new.description);
        task.priority = new.priority;
        task.input_data = new.input_data;
        task.created_by = ctx.actor_name().to_string();
        task.assigned_to = worker.map(|w| w.id);
        self.store.insert_task(&task).await?;

        self.audit
            .record(
                AuditEvent::new("task_created")
                    .tenant(&task.tenant_id)
                    .task(&task.id)
                    .details(serde_json::json!({
                        "task_id": task.id,
                        "type": task.task_type,
                        "assigned_to": task.assigned_to,
                    })),
            )
            .await;
        match &task.assigned_to {
            Some(agent_id) => info!(
                task_id = %task.id,
                tenant_id = %task.tenant_id,
                agent_id = %agent_id,
                "Task created"
            ),
            None => warn!(
                task_id = %task.id,
                tenant_id = %task.tenant_id,
                "Task created without an available worker"
            ),
        }
        Ok(task.id)
    }

    /// Runs the assigned worker on a pending task. On success the task
    /// moves to review; on any failure after the task was claimed it returns
    /// to pending and the error is returned.
    pub async fn execute_task(
        &self,
        ctx: &RequestContext,
        task_id: &str,
    ) -> HoldingResult<ExecutionOutput> {
        let mut task = self.get_task(ctx, task_id).await?;
        if task.status != TaskStatus::Pending {
            return Err(HoldingError::invalid_state(
                task_id,
                TaskStatus::Pending,
                task.status,
            ));
        }
        let agent_id = task
            .assigned_to
            .clone()
            .ok_or_else(|| HoldingError::NoAgentAssigned(task_id.to_string()))?;
        let agent = self
            .registry
            .agent(&task.tenant_id, &agent_id)
            .await?
            .ok_or_else(|| HoldingError::AgentNotFound(agent_id.clone()))?;
        let tenant = self.registry.tenant(&task.tenant_id).await?;

        claim_transition(
            self.store.as_ref(),
            &task,
            TaskStatus::Pending,
            TaskStatus::InProgress,
        )
        .await?;
        task.status = TaskStatus::InProgress;
        self.mark_agent(&agent.id, AgentStatus::Busy).await;

        let request = GenerationRequest {
            tenant_id: task.tenant_id.clone(),
            agent_id: agent.id.clone(),
            task_id: Some(task.id.clone()),
            system_prompt: agent.system_prompt.clone(),
            user_prompt: build_task_prompt(tenant.as_ref(), &task),
        };
        let result = self.router.generate(&request).await.into_result();
        self.mark_agent(&agent.id, AgentStatus::Idle).await;

        let generated = match result {
            Ok(generated) => generated,
            Err(e) => {
                self.release_task(ctx, &task, &agent.id, &e).await;
                return Err(e);
            }
        };

        task.output_data = Some(serde_json::json!({
            "content": generated.content,
            "provider": generated.provider,
            "model": generated.model,
        }));
        task.status = TaskStatus::Review;
        if let Err(e) = self.store.update_task(&task).await {
            self.release_task(ctx, &task, &agent.id, &e).await;
            return Err(e);
        }

        self.audit
            .record(
                AuditEvent::new("task_executed")
                    .tenant(&task.tenant_id)
                    .agent(&agent.id)
                    .task(&task.id)
                    .details(serde_json::json!({
                        "task_id": task.id,
                        "provider": generated.provider,
                        "model": generated.model,
                        "elapsed_ms": generated.elapsed_ms,
                    })),
            )
            .await;
        info!(
            task_id = %task.id,
            agent_id = %agent.id,
            provider = %generated.provider,
            elapsed_ms = generated.elapsed_ms,
            "Task executed"
        );

        Ok(ExecutionOutput {
            task_id: task.id,
            content: generated.content,
            provider: generated.provider,
            model: generated.model,
            elapsed_ms: generated.elapsed_ms,
        })
    }

    /// Has the tenant's auditor review a task in review and applies the
    /// verdict. A router failure leaves the task in review.
    pub async fn review_task(
        &self,
        ctx: &RequestContext,
        task_id: &str,
    ) -> HoldingResult<ReviewOutcome> {
        let task = self.get_task(ctx, task_id).await?;
        if task.status != TaskStatus::Review {
            return Err(HoldingError::invalid_state(
                task_id,
                TaskStatus::Review,
                task.status,
            ));
        }
        let auditor = self
            .registry
            .get_auditor(&task.tenant_id)
            .await?
            .ok_or_else(|| HoldingError::AuditorNotFound(task.tenant_id.clone()))?;

        let verdict = match self
            .engine
            .audit(&auditor, &task, task.output_content())
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Review call failed; task stays in review");
                return Err(e);
            }
        };
        self.engine.apply_review(ctx, &task, &auditor, verdict).await
    }

    /// Create, execute and review in one go. Only a failed create is an
    /// error; a later failure is reported on the returned run.
    pub async fn run_full_pipeline(
        &self,
        ctx: &RequestContext,
        new: NewTask,
    ) -> HoldingResult<PipelineRun> {
        let task_id = self.create_task(ctx, new).await?;
        let execution = match self.execute_task(ctx, &task_id).await {
            Ok(execution) => execution,
            Err(e) => {
                return Ok(self
                    .stopped_run(ctx, task_id, None, PipelineStage::Execute, e)
                    .await)
            }
        };
        match self.review_task(ctx, &task_id).await {
            Ok(review) => Ok(PipelineRun {
                task_id,
                status: review.task.status,
                execution: Some(execution),
                review: Some(review),
                stopped: None,
            }),
            Err(e) => Ok(self
                .stopped_run(ctx, task_id, Some(execution), PipelineStage::Review, e)
                .await),
        }
    }

    async fn stopped_run(
        &self,
        ctx: &RequestContext,
        task_id: String,
        execution: Option<ExecutionOutput>,
        stage: PipelineStage,
        error: HoldingError,
    ) -> PipelineRun {
        let status = match self.get_task(ctx, &task_id).await {
            Ok(task) => task.status,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Could not re-read stalled task");
                stage.resting_status()
            }
        };
        warn!(
            task_id = %task_id,
            session_id = %ctx.session_id,
            stage = ?stage,
            %status,
            error = %error,
            "Pipeline run stopped"
        );
        PipelineRun {
            task_id,
            status,
            execution,
            review: None,
            stopped: Some(PipelineStop { stage, error }),
        }
    }

    /// Agent status is advisory; a failed write must not strand the task.
    async fn mark_agent(&self, agent_id: &str, status: AgentStatus) {
        if let Err(e) = self.registry.set_status(agent_id, status).await {
            warn!(agent_id = %agent_id, %status, error = %e, "Agent status update failed");
        }
    }

    /// Returns an in-progress task to pending after a failed execution.
    async fn release_task(
        &self,
        ctx: &RequestContext,
        task: &Task,
        agent_id: &str,
        error: &HoldingError,
    ) {
        if let Err(e) = claim_transition(
            self.store.as_ref(),
            task,
            TaskStatus::InProgress,
            TaskStatus::Pending,
        )
        .await
        {
            warn!(task_id = %task.id, error = %e, "Could not return task to pending");
        }
        self.audit
            .record(
                AuditEvent::new("task_execution_failed")
                    .tenant(&task.tenant_id)
                    .agent(agent_id)
                    .task(&task.id)
                    .details(serde_json::json!({
                        "task_id": task.id,
                        "error": error.to_string(),
                    })),
            )
            .await;
        warn!(
            task_id = %task.id,
            agent_id = %agent_id,
            session_id = %ctx.session_id,
            error = %error,
            "Task execution failed; back to pending"
        );
    }
}
