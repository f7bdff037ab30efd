//! Task lifecycle scenarios driven through a real `CallRouter` with a
//! scripted provider backend.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use holding_channels::{Alert, AlertKind, Notifier};
use holding_core::{
    Agent, AgentRole, AgentStatus, AuditEvent, CostLogEntry, Correction, HoldingError,
    HoldingResult, RequestContext, Severity, Task, TaskStatus, Tenant,
};
use holding_pipeline::{
    CorrectionRules, NewTask, PipelineStage, ReviewAction, RuleBook, TaskPipeline,
};
use holding_router::{
    CallRouter, ChatRequest, Completion, ProviderBackend, ProviderConfig, ProviderError,
    RouterConfig, StaticCredentials,
};
use holding_store::{CostSummaryRow, MemoryStore, SqliteStore, Store, TaskFilter};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Replies in order, whatever the provider; records every user prompt.
#[derive(Default)]
struct ScriptedBackend {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn reply(&self, text: &str) {
        self.replies.lock().push_back(text.to_string());
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl ProviderBackend for ScriptedBackend {
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<Completion, ProviderError> {
        self.prompts.lock().push(request.user_prompt.to_string());
        match self.replies.lock().pop_front() {
            Some(content) => Ok(Completion {
                content,
                tokens_in: Some(40),
                tokens_out: Some(12),
            }),
            None => Err(ProviderError::Transient("Server error (503)".into())),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, alert: &Alert) -> HoldingResult<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

struct Harness {
    pipeline: TaskPipeline,
    backend: Arc<ScriptedBackend>,
    notifier: Arc<RecordingNotifier>,
    store: Arc<dyn Store>,
}

fn review_json(confidence: f64, verdict: &str) -> String {
    format!(
        r#"{{"confidence": {confidence}, "verdict": "{verdict}", "feedback": "Tighten the opening", "issues": ["too long"]}}"#
    )
}

async fn harness_with(store: Arc<dyn Store>, config: RouterConfig) -> Harness {
    let backend = Arc::new(ScriptedBackend::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let router = Arc::new(CallRouter::new(
        config,
        backend.clone(),
        Arc::new(StaticCredentials::new()),
        store.clone(),
        notifier.clone(),
    ));
    let rules = RuleBook::new().with_tenant(
        "acme",
        CorrectionRules {
            auto_approve: Vec::new(),
            escalate_to_human: vec!["legal".into()],
        },
    );
    let pipeline = TaskPipeline::new(store.clone(), router, notifier.clone(), rules);

    let registry = pipeline.registry();
    registry
        .register_tenant(&Tenant::new("acme", "Acme Coffee").with_brand_voice("warm, playful"))
        .await
        .unwrap();
    registry
        .register_tenant(&Tenant::new("globex", "Globex"))
        .await
        .unwrap();
    registry
        .register_agent(
            &Agent::new("acme-writer", "acme", "Writer", AgentRole::Worker)
                .with_skills(["copy", "legal"])
                .with_system_prompt("You write copy for Acme."),
        )
        .await
        .unwrap();
    registry
        .register_agent(
            &Agent::new("acme-judge", "acme", "Judge", AgentRole::Auditor)
                .with_system_prompt("You review copy for Acme."),
        )
        .await
        .unwrap();
    registry
        .register_agent(&Agent::new("globex-writer", "globex", "Writer", AgentRole::Worker))
        .await
        .unwrap();

    Harness {
        pipeline,
        backend,
        notifier,
        store,
    }
}

fn local_chain() -> RouterConfig {
    RouterConfig::default().with_providers(vec![ProviderConfig::local(
        "local",
        "http://127.0.0.1:9",
        "test-model",
    )])
}

async fn harness() -> Harness {
    harness_with(Arc::new(MemoryStore::new()), local_chain()).await
}

fn acme() -> RequestContext {
    RequestContext::new("acme").with_actor("tester")
}

fn copy_task() -> NewTask {
    NewTask::new("copy", "Autumn tagline").with_description("One line")
}

#[tokio::test]
async fn test_mid_confidence_pass_is_sent_back() {
    let h = harness().await;
    let ctx = acme();

    let task_id = h.pipeline.create_task(&ctx, copy_task()).await.unwrap();
    let task = h.pipeline.get_task(&ctx, &task_id).await.unwrap();
    assert_eq!(task.assigned_to.as_deref(), Some("acme-writer"));
    assert_eq!(task.created_by, "tester");

    h.backend.reply("Warm soup, warmer smiles.");
    let execution = h.pipeline.execute_task(&ctx, &task_id).await.unwrap();
    assert_eq!(execution.content, "Warm soup, warmer smiles.");
    assert_eq!(execution.provider, "local (primary)");

    h.backend.reply(&review_json(0.75, "pass"));
    let outcome = h.pipeline.review_task(&ctx, &task_id).await.unwrap();
    assert_eq!(outcome.action, ReviewAction::SentBack);
    assert_eq!(outcome.task.status, TaskStatus::Pending);
    assert_eq!(outcome.task.revision_count, 1);

    let stored = h.pipeline.get_task(&ctx, &task_id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.revision_count, 1);
    assert_eq!(stored.confidence_score, Some(0.75));
    assert_eq!(stored.reviewed_by.as_deref(), Some("acme-judge"));
    assert_eq!(stored.review_notes.as_deref(), Some("Tighten the opening"));
    assert!(stored.approved_at.is_none());

    let corrections = h.pipeline.corrections(&ctx, &task_id).await.unwrap();
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].severity, Severity::Minor);
    assert_eq!(corrections[0].original_output, "Warm soup, warmer smiles.");
    assert_eq!(corrections[0].correction, "too long");

    // The revision prompt carries the auditor's feedback.
    h.backend.reply("Soup. Smiles.");
    h.pipeline.execute_task(&ctx, &task_id).await.unwrap();
    let prompts = h.backend.prompts();
    let revision_prompt = prompts.last().unwrap();
    assert!(revision_prompt.starts_with("Brand: Acme Coffee\n\nBrand voice: warm, playful"));
    assert!(revision_prompt.ends_with("Previous review feedback (revision 1): Tighten the opening"));

    let trail = h.pipeline.audit_trail(&ctx, 20).await.unwrap();
    let actions: Vec<&str> = trail.iter().map(|e| e.action.as_str()).collect();
    assert!(actions.contains(&"task_created"));
    assert!(actions.contains(&"task_executed"));
    assert!(actions.contains(&"task_sent_back"));
    assert!(actions.contains(&"llm_call"));
}

#[tokio::test]
async fn test_exhausted_revisions_force_terminal_escalation() {
    let h = harness().await;
    let ctx = acme();

    let task_id = h.pipeline.create_task(&ctx, copy_task()).await.unwrap();
    let mut task = h.pipeline.get_task(&ctx, &task_id).await.unwrap();
    task.revision_count = 3;
    h.store.update_task(&task).await.unwrap();

    h.backend.reply("Draft four");
    h.pipeline.execute_task(&ctx, &task_id).await.unwrap();
    h.backend.reply(&review_json(0.75, "pass"));
    let outcome = h.pipeline.review_task(&ctx, &task_id).await.unwrap();

    assert_eq!(outcome.action, ReviewAction::Escalated);
    assert_eq!(outcome.task.status, TaskStatus::Rejected);
    assert_eq!(outcome.task.revision_count, 3);

    let corrections = h.pipeline.corrections(&ctx, &task_id).await.unwrap();
    assert_eq!(corrections[0].severity, Severity::Critical);

    let alerts = h.notifier.alerts.lock().clone();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::Escalation);
    assert!(alerts[0].text.contains(&task_id));

    // Terminal: nothing further succeeds against the task.
    let err = h.pipeline.execute_task(&ctx, &task_id).await.unwrap_err();
    assert!(matches!(err, HoldingError::InvalidTaskState { .. }));
    let err = h.pipeline.review_task(&ctx, &task_id).await.unwrap_err();
    assert!(matches!(err, HoldingError::InvalidTaskState { .. }));
}

#[tokio::test]
async fn test_full_pipeline_approves_confident_pass() {
    let h = harness().await;
    h.backend.reply("Bold ideas, built fast.");
    h.backend
        .reply(&format!("```json\n{}\n```", review_json(0.93, "pass")));

    let run = h
        .pipeline
        .run_full_pipeline(&acme(), copy_task())
        .await
        .unwrap();

    assert!(run.is_complete());
    assert_eq!(run.status, TaskStatus::Approved);
    assert_eq!(run.execution.unwrap().content, "Bold ideas, built fast.");
    let review = run.review.unwrap();
    assert_eq!(review.action, ReviewAction::Approved);
    assert_eq!(review.task.status, TaskStatus::Approved);
    assert!(review.task.approved_at.is_some());
    assert!(h
        .pipeline
        .corrections(&acme(), &run.task_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_escalation_list_overrides_confident_pass() {
    let h = harness().await;
    h.backend.reply("Terms and conditions draft");
    h.backend.reply(&review_json(0.99, "pass"));

    let run = h
        .pipeline
        .run_full_pipeline(&acme(), NewTask::new("legal", "Update terms"))
        .await
        .unwrap();
    assert_eq!(run.status, TaskStatus::Rejected);
    assert_eq!(run.review.unwrap().action, ReviewAction::Escalated);
}

#[tokio::test]
async fn test_unreadable_review_escalates_on_default_confidence() {
    let h = harness().await;
    h.backend.reply("Draft");
    h.backend.reply("Looks fine to me!");

    let run = h
        .pipeline
        .run_full_pipeline(&acme(), copy_task())
        .await
        .unwrap();
    let review = run.review.as_ref().unwrap();
    assert!(review.verdict.recovered);
    assert_eq!(review.verdict.confidence, 0.5);
    assert_eq!(review.action, ReviewAction::Escalated);

    let corrections = h.pipeline.corrections(&acme(), &run.task_id).await.unwrap();
    assert_eq!(corrections[0].severity, Severity::Minor);
    assert_eq!(corrections[0].reason, "Looks fine to me!");
}

#[tokio::test]
async fn test_execution_failure_returns_task_to_pending() {
    let h = harness().await;
    let ctx = acme();
    let task_id = h.pipeline.create_task(&ctx, copy_task()).await.unwrap();

    let err = h.pipeline.execute_task(&ctx, &task_id).await.unwrap_err();
    assert!(matches!(err, HoldingError::ProvidersExhausted(_)));
    assert!(err.is_retryable());
    assert!(err.to_string().contains("local (primary): Server error (503)"));

    let task = h.pipeline.get_task(&ctx, &task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.output_data.is_none());
    let writer = h
        .pipeline
        .registry()
        .agent("acme", "acme-writer")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(writer.status, AgentStatus::Idle);

    let trail = h.pipeline.audit_trail(&ctx, 10).await.unwrap();
    assert!(trail.iter().any(|e| e.action == "task_execution_failed"));

    // The task can be retried once a provider answers.
    h.backend.reply("Second try");
    let execution = h.pipeline.execute_task(&ctx, &task_id).await.unwrap();
    assert_eq!(execution.content, "Second try");
}

#[tokio::test]
async fn test_full_pipeline_short_circuits_on_spend_limit() {
    let h = harness_with(
        Arc::new(MemoryStore::new()),
        local_chain().with_spend_limit(0.0),
    )
    .await;
    h.backend.reply("never used");

    let run = h
        .pipeline
        .run_full_pipeline(&acme(), copy_task())
        .await
        .unwrap();
    let stop = run.stopped.as_ref().unwrap();
    assert_eq!(stop.stage, PipelineStage::Execute);
    assert!(matches!(stop.error, HoldingError::SpendLimitReached(_)));
    assert_eq!(run.status, TaskStatus::Pending);
    assert!(run.execution.is_none());
    assert!(h.backend.prompts().is_empty());

    let pending = h
        .pipeline
        .list_tasks(&acme(), Some(TaskStatus::Pending), None)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, run.task_id);
}

#[tokio::test]
async fn test_review_failure_leaves_task_in_review() {
    let h = harness().await;
    let ctx = acme();
    let task_id = h.pipeline.create_task(&ctx, copy_task()).await.unwrap();
    h.backend.reply("Draft");
    h.pipeline.execute_task(&ctx, &task_id).await.unwrap();

    let err = h.pipeline.review_task(&ctx, &task_id).await.unwrap_err();
    assert!(matches!(err, HoldingError::ProvidersExhausted(_)));
    let task = h.pipeline.get_task(&ctx, &task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Review);

    h.backend.reply(&review_json(0.95, "pass"));
    let outcome = h.pipeline.review_task(&ctx, &task_id).await.unwrap();
    assert_eq!(outcome.action, ReviewAction::Approved);
}

#[tokio::test]
async fn test_missing_worker_and_auditor() {
    let h = harness().await;
    let initech = RequestContext::new("initech");
    h.pipeline
        .registry()
        .register_tenant(&Tenant::new("initech", "Initech"))
        .await
        .unwrap();

    let task_id = h
        .pipeline
        .create_task(&initech, copy_task())
        .await
        .unwrap();
    let task = h.pipeline.get_task(&initech, &task_id).await.unwrap();
    assert!(task.assigned_to.is_none());
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(matches!(
        h.pipeline.execute_task(&initech, &task_id).await,
        Err(HoldingError::NoAgentAssigned(_))
    ));

    // Globex has a worker but no auditor.
    let globex = RequestContext::new("globex");
    h.backend.reply("Globex copy");
    let run = h
        .pipeline
        .run_full_pipeline(&globex, copy_task())
        .await
        .unwrap();
    let stop = run.stopped.as_ref().unwrap();
    assert_eq!(stop.stage, PipelineStage::Review);
    assert!(matches!(stop.error, HoldingError::AuditorNotFound(ref t) if t == "globex"));
    assert_eq!(run.status, TaskStatus::Review);
    assert_eq!(run.execution.as_ref().unwrap().content, "Globex copy");

    let stored = h.pipeline.get_task(&globex, &run.task_id).await.unwrap();
    assert_eq!(stored.output_content(), "Globex copy");
}

#[tokio::test]
async fn test_tasks_are_tenant_scoped() {
    let h = harness().await;
    let task_id = h.pipeline.create_task(&acme(), copy_task()).await.unwrap();

    let globex = RequestContext::new("globex");
    assert!(matches!(
        h.pipeline.get_task(&globex, &task_id).await,
        Err(HoldingError::TaskNotFound(_))
    ));
    assert!(matches!(
        h.pipeline.execute_task(&globex, &task_id).await,
        Err(HoldingError::TaskNotFound(_))
    ));
    assert!(h
        .pipeline
        .list_tasks(&globex, None, None)
        .await
        .unwrap()
        .is_empty());

    assert!(matches!(
        h.pipeline
            .create_task(&RequestContext::new("nobody"), copy_task())
            .await,
        Err(HoldingError::TenantNotFound(_))
    ));
}

#[tokio::test]
async fn test_corrections_listed_newest_first() {
    let h = harness().await;
    let ctx = acme();
    let task_id = h.pipeline.create_task(&ctx, copy_task()).await.unwrap();

    for (round, draft) in ["First draft", "Second draft"].iter().enumerate() {
        h.backend.reply(draft);
        h.pipeline.execute_task(&ctx, &task_id).await.unwrap();
        h.backend.reply(&review_json(0.7, "needs_revision"));
        let outcome = h.pipeline.review_task(&ctx, &task_id).await.unwrap();
        assert_eq!(outcome.task.revision_count, round as u32 + 1);
    }

    let corrections = h.pipeline.corrections(&ctx, &task_id).await.unwrap();
    assert_eq!(corrections.len(), 2);
    assert_eq!(corrections[0].original_output, "Second draft");
    assert_eq!(corrections[1].original_output, "First draft");
}

#[tokio::test]
async fn test_full_run_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(dir.path().join("holding.db")).unwrap());
    let h = harness_with(store, local_chain()).await;
    h.backend.reply("Bold ideas, built fast.");
    h.backend.reply(&review_json(0.75, "pass"));

    let run = h
        .pipeline
        .run_full_pipeline(&acme(), copy_task())
        .await
        .unwrap();
    assert_eq!(run.review.unwrap().action, ReviewAction::SentBack);
    assert_eq!(run.status, TaskStatus::Pending);

    let stored = h.pipeline.get_task(&acme(), &run.task_id).await.unwrap();
    assert_eq!(stored.revision_count, 1);
    assert_eq!(stored.output_content(), "Bold ideas, built fast.");
    assert_eq!(stored.output_data.unwrap()["provider"], "local (primary)");

    let costs = h.store.cost_summary(Some("acme")).await.unwrap();
    assert_eq!(costs.iter().map(|r| r.call_count).sum::<u64>(), 2);
}

#[tokio::test]
async fn test_full_pipeline_keeps_task_when_review_call_fails() {
    let h = harness().await;
    h.backend.reply("Hero draft");

    let run = h
        .pipeline
        .run_full_pipeline(&acme(), copy_task())
        .await
        .unwrap();
    assert!(!run.is_complete());
    let stop = run.stopped.as_ref().unwrap();
    assert_eq!(stop.stage, PipelineStage::Review);
    assert!(stop.error.is_retryable());
    assert!(matches!(stop.error, HoldingError::ProvidersExhausted(_)));
    assert_eq!(run.status, TaskStatus::Review);
    assert_eq!(run.execution.as_ref().unwrap().content, "Hero draft");
    assert!(run.review.is_none());

    let json = serde_json::to_value(&run).unwrap();
    assert_eq!(json["task_id"], run.task_id.as_str());
    assert_eq!(json["status"], "review");
    assert_eq!(json["stopped"]["stage"], "review");
    assert!(json["stopped"]["error"]
        .as_str()
        .unwrap()
        .starts_with("All providers exhausted"));

    // The reported id is enough to resume.
    h.backend.reply(&review_json(0.95, "pass"));
    let outcome = h.pipeline.review_task(&acme(), &run.task_id).await.unwrap();
    assert_eq!(outcome.action, ReviewAction::Approved);
}

/// Delegates to a `MemoryStore`, yielding inside reads so concurrent callers
/// interleave, and failing chosen writes on demand.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_agent_status: AtomicBool,
    fail_task_update: AtomicBool,
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> HoldingResult<bool> {
        self.inner.insert_tenant(tenant).await
    }
    async fn get_tenant(&self, id: &str) -> HoldingResult<Option<Tenant>> {
        tokio::task::yield_now().await;
        self.inner.get_tenant(id).await
    }
    async fn list_tenants(&self) -> HoldingResult<Vec<Tenant>> {
        self.inner.list_tenants().await
    }
    async fn update_tenant(&self, tenant: &Tenant) -> HoldingResult<()> {
        self.inner.update_tenant(tenant).await
    }
    async fn insert_agent(&self, agent: &Agent) -> HoldingResult<bool> {
        self.inner.insert_agent(agent).await
    }
    async fn get_agent(&self, id: &str) -> HoldingResult<Option<Agent>> {
        self.inner.get_agent(id).await
    }
    async fn list_agents(&self, tenant_id: &str) -> HoldingResult<Vec<Agent>> {
        tokio::task::yield_now().await;
        self.inner.list_agents(tenant_id).await
    }
    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> HoldingResult<()> {
        if self.fail_agent_status.load(Ordering::SeqCst) {
            return Err(HoldingError::Store("agents table is locked".into()));
        }
        self.inner.set_agent_status(agent_id, status).await
    }
    async fn update_agent_prompt(&self, agent_id: &str, prompt: &str) -> HoldingResult<()> {
        self.inner.update_agent_prompt(agent_id, prompt).await
    }
    async fn insert_task(&self, task: &Task) -> HoldingResult<()> {
        self.inner.insert_task(task).await
    }
    async fn get_task(&self, tenant_id: &str, task_id: &str) -> HoldingResult<Option<Task>> {
        self.inner.get_task(tenant_id, task_id).await
    }
    async fn list_tasks(&self, filter: &TaskFilter) -> HoldingResult<Vec<Task>> {
        self.inner.list_tasks(filter).await
    }
    async fn update_task(&self, task: &Task) -> HoldingResult<()> {
        if self.fail_task_update.load(Ordering::SeqCst) {
            return Err(HoldingError::Store("disk full".into()));
        }
        self.inner.update_task(task).await
    }
    async fn transition_task(
        &self,
        tenant_id: &str,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> HoldingResult<bool> {
        self.inner.transition_task(tenant_id, task_id, from, to).await
    }
    async fn insert_correction(&self, correction: &Correction) -> HoldingResult<i64> {
        self.inner.insert_correction(correction).await
    }
    async fn list_corrections(&self, task_id: &str) -> HoldingResult<Vec<Correction>> {
        self.inner.list_corrections(task_id).await
    }
    async fn insert_cost(&self, entry: &CostLogEntry) -> HoldingResult<()> {
        self.inner.insert_cost(entry).await
    }
    async fn cost_summary(&self, tenant_id: Option<&str>) -> HoldingResult<Vec<CostSummaryRow>> {
        self.inner.cost_summary(tenant_id).await
    }
    async fn total_cost_since(&self, since: DateTime<Utc>) -> HoldingResult<f64> {
        self.inner.total_cost_since(since).await
    }
    async fn insert_audit(&self, event: &AuditEvent) -> HoldingResult<()> {
        self.inner.insert_audit(event).await
    }
    async fn list_audit(
        &self,
        tenant_id: Option<&str>,
        limit: usize,
    ) -> HoldingResult<Vec<AuditEvent>> {
        self.inner.list_audit(tenant_id, limit).await
    }
}

async fn flaky_harness() -> (Harness, Arc<FlakyStore>) {
    let flaky = Arc::new(FlakyStore::default());
    let h = harness_with(flaky.clone(), local_chain()).await;
    (h, flaky)
}

#[tokio::test]
async fn test_concurrent_execute_runs_worker_once() {
    let (h, _flaky) = flaky_harness().await;
    let ctx = acme();
    let task_id = h.pipeline.create_task(&ctx, copy_task()).await.unwrap();
    h.backend.reply("only draft");
    h.backend.reply("duplicate draft");

    let (first, second) = tokio::join!(
        h.pipeline.execute_task(&ctx, &task_id),
        h.pipeline.execute_task(&ctx, &task_id)
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(HoldingError::InvalidTaskState { .. }))));
    assert_eq!(h.backend.prompts().len(), 1);

    let task = h.pipeline.get_task(&ctx, &task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Review);
    assert_eq!(task.output_content(), "only draft");
}

#[tokio::test]
async fn test_concurrent_reviews_apply_one_verdict() {
    let (h, _flaky) = flaky_harness().await;
    let ctx = acme();
    let task_id = h.pipeline.create_task(&ctx, copy_task()).await.unwrap();
    h.backend.reply("Draft");
    h.pipeline.execute_task(&ctx, &task_id).await.unwrap();
    h.backend.reply(&review_json(0.7, "needs_revision"));
    h.backend.reply(&review_json(0.7, "needs_revision"));

    let (first, second) = tokio::join!(
        h.pipeline.review_task(&ctx, &task_id),
        h.pipeline.review_task(&ctx, &task_id)
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(HoldingError::InvalidTaskState { .. }))));

    let task = h.pipeline.get_task(&ctx, &task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.revision_count, 1);
    assert_eq!(h.pipeline.corrections(&ctx, &task_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_agent_status_failure_does_not_strand_task() {
    let (h, flaky) = flaky_harness().await;
    let ctx = acme();
    let task_id = h.pipeline.create_task(&ctx, copy_task()).await.unwrap();
    flaky.fail_agent_status.store(true, Ordering::SeqCst);

    // Worker succeeds: the task still reaches review.
    h.backend.reply("Draft");
    h.pipeline.execute_task(&ctx, &task_id).await.unwrap();
    assert_eq!(
        h.pipeline.get_task(&ctx, &task_id).await.unwrap().status,
        TaskStatus::Review
    );

    // Worker fails: the task goes back to pending, not in_progress.
    let second = h.pipeline.create_task(&ctx, copy_task()).await.unwrap();
    let err = h.pipeline.execute_task(&ctx, &second).await.unwrap_err();
    assert!(matches!(err, HoldingError::ProvidersExhausted(_)));
    assert_eq!(
        h.pipeline.get_task(&ctx, &second).await.unwrap().status,
        TaskStatus::Pending
    );
}

#[tokio::test]
async fn test_failed_output_write_returns_task_to_pending() {
    let (h, flaky) = flaky_harness().await;
    let ctx = acme();
    let task_id = h.pipeline.create_task(&ctx, copy_task()).await.unwrap();
    flaky.fail_task_update.store(true, Ordering::SeqCst);
    h.backend.reply("Draft");

    let err = h.pipeline.execute_task(&ctx, &task_id).await.unwrap_err();
    assert!(matches!(err, HoldingError::Store(_)));
    let task = h.pipeline.get_task(&ctx, &task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    let trail = h.pipeline.audit_trail(&ctx, 10).await.unwrap();
    assert!(trail.iter().any(|e| e.action == "task_execution_failed"));

    flaky.fail_task_update.store(false, Ordering::SeqCst);
    h.backend.reply("Draft again");
    h.pipeline.execute_task(&ctx, &task_id).await.unwrap();
}
