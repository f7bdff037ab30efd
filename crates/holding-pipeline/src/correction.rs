use crate::pipeline::claim_transition;
use crate::prompt::build_review_prompt;
use crate::rules::{CorrectionRules, RuleBook};
use chrono::Utc;
use holding_channels::{Alert, Notifier};
use holding_core::{
    Agent, AuditEvent, Correction, HoldingResult, RequestContext, Severity, Task, TaskStatus,
};
use holding_router::{CallRouter, GenerationRequest};
use holding_store::{AuditLog, Store};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Below this confidence a review always escalates.
pub const ESCALATE_CONFIDENCE: f64 = 0.6;
/// At or above this confidence a passing review is approved.
pub const APPROVE_CONFIDENCE: f64 = 0.9;

const DEFAULT_CONFIDENCE: f64 = 0.5;
const FEEDBACK_FALLBACK_CHARS: usize = 500;
const CORRECTION_SNIPPET_CHARS: usize = 1000;

/// The auditor's overall call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    /// Output is acceptable.
    Pass,
    /// Output needs another attempt.
    NeedsRevision,
    /// Output is unacceptable.
    Reject,
}

impl VerdictKind {
    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictKind::Pass => "pass",
            VerdictKind::NeedsRevision => "needs_revision",
            VerdictKind::Reject => "reject",
        }
    }

    /// Unknown labels read as `needs_revision`.
    fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "pass" => VerdictKind::Pass,
            "reject" => VerdictKind::Reject,
            _ => VerdictKind::NeedsRevision,
        }
    }
}

/// Structured audit result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Auditor confidence in `[0, 1]`.
    pub confidence: f64,
    /// Overall call.
    pub verdict: VerdictKind,
    /// Free-text feedback for the worker.
    pub feedback: String,
    /// Severity, when the auditor gave a recognizable one.
    pub severity: Option<Severity>,
    /// Individual issues.
    pub issues: Vec<String>,
    /// Set when the raw reply could not be read as JSON at all.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recovered: bool,
}

impl Verdict {
    /// The conservative verdict used when the reply is unreadable.
    pub fn fallback(raw: &str) -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            verdict: VerdictKind::NeedsRevision,
            feedback: truncate_chars(raw, FEEDBACK_FALLBACK_CHARS),
            severity: Some(Severity::Minor),
            issues: Vec::new(),
            recovered: true,
        }
    }

    fn from_fields(fields: &Map<String, Value>, raw: &str) -> Self {
        let confidence = fields
            .get("confidence")
            .and_then(|v| {
                v.as_f64()
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            })
            .filter(|c: &f64| c.is_finite())
            .map_or(DEFAULT_CONFIDENCE, |c| c.clamp(0.0, 1.0));
        let verdict = fields
            .get("verdict")
            .and_then(Value::as_str)
            .map_or(VerdictKind::NeedsRevision, VerdictKind::from_label);
        let feedback = fields
            .get("feedback")
            .and_then(Value::as_str)
            .map_or_else(|| truncate_chars(raw, FEEDBACK_FALLBACK_CHARS), str::to_string);
        let severity: Option<Severity> = fields
            .get("severity")
            .and_then(Value::as_str)
            .and_then(|s| s.trim().to_ascii_lowercase().parse().ok());
        let issues: Vec<String> = fields
            .get("issues")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            confidence,
            verdict,
            feedback,
            severity,
            issues,
            recovered: false,
        }
    }

    /// True for a `pass` verdict.
    pub fn passed(&self) -> bool {
        self.verdict == VerdictKind::Pass
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Drops a fenced code block's markers and its info line.
fn strip_fence(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text;
    };
    let inner = match text.rfind("```").filter(|&end| end > start) {
        Some(end) => &text[start..end],
        None => &text[start..],
    };
    match inner.find('\n') {
        Some(nl) => &inner[nl + 1..],
        None => inner.get(3..).unwrap_or(""),
    }
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Reads an auditor reply into a [`Verdict`]. Never fails: unreadable
/// replies produce [`Verdict::fallback`] and missing fields take the same
/// conservative defaults.
pub fn parse_review(raw: &str) -> Verdict {
    let text = strip_fence(raw.trim());
    let fields = parse_object(text).or_else(|| {
        let start = text.find('{')?;
        let end = text.rfind('}').filter(|&end| end > start)?;
        parse_object(&text[start..=end])
    });
    match fields {
        Some(fields) => Verdict::from_fields(&fields, raw),
        None => {
            warn!(chars = raw.chars().count(), "Auditor reply is not JSON; using defaults");
            Verdict::fallback(raw)
        }
    }
}

/// Outcome of a review, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    /// Task approved (terminal).
    Approved,
    /// Task returned to pending for another revision.
    SentBack,
    /// Task rejected and handed to a human (terminal).
    Escalated,
}

impl ReviewAction {
    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::Approved => "approved",
            ReviewAction::SentBack => "sent_back",
            ReviewAction::Escalated => "escalated",
        }
    }
}

impl std::fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the review policy decided, before any side effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Reject and hand to a human.
    Escalate {
        /// Which rule forced it.
        reason: String,
    },
    /// Approve.
    Approve,
    /// Return for revision.
    SendBack,
}

/// The review policy, in priority order: escalate, approve, send back.
pub fn decide(task: &Task, verdict: &Verdict, rules: &CorrectionRules) -> Decision {
    if rules.escalates(&task.task_type) {
        return Decision::Escalate {
            reason: format!("task type '{}' requires human review", task.task_type),
        };
    }
    if verdict.confidence < ESCALATE_CONFIDENCE {
        return Decision::Escalate {
            reason: format!(
                "confidence {:.2} below {ESCALATE_CONFIDENCE:.2}",
                verdict.confidence
            ),
        };
    }
    if task.revisions_exhausted() {
        return Decision::Escalate {
            reason: format!(
                "revision limit reached ({}/{})",
                task.revision_count, task.max_revisions
            ),
        };
    }
    if verdict.passed()
        && (verdict.confidence >= APPROVE_CONFIDENCE || rules.auto_approves(&task.task_type))
    {
        return Decision::Approve;
    }
    Decision::SendBack
}

/// Result of [`CorrectionEngine::apply_review`].
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    /// What happened to the task.
    pub action: ReviewAction,
    /// The verdict that drove it.
    pub verdict: Verdict,
    /// The task after the transition.
    pub task: Task,
}

/// Runs auditor reviews and applies the review policy.
#[derive(Clone)]
pub struct CorrectionEngine {
    router: Arc<CallRouter>,
    store: Arc<dyn Store>,
    audit: AuditLog,
    notifier: Arc<dyn Notifier>,
    rules: Arc<RuleBook>,
}

impl CorrectionEngine {
    /// Creates an engine sharing the process-wide router.
    pub fn new(
        router: Arc<CallRouter>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        rules: RuleBook,
    ) -> Self {
        Self {
            router,
            audit: AuditLog::new(store.clone()),
            store,
            notifier,
            rules: Arc::new(rules),
        }
    }

    /// Review rules in effect.
    pub fn rules(&self) -> &RuleBook {
        &self.rules
    }

    /// Asks `auditor` to review `output`. Only router failures are errors;
    /// an unreadable reply becomes a conservative verdict.
    pub async fn audit(&self, auditor: &Agent, task: &Task, output: &str) -> HoldingResult<Verdict> {
        let request = GenerationRequest {
            tenant_id: task.tenant_id.clone(),
            agent_id: auditor.id.clone(),
            task_id: Some(task.id.clone()),
            system_prompt: auditor.system_prompt.clone(),
            user_prompt: build_review_prompt(task, output),
        };
        let generated = self.router.generate(&request).await.into_result()?;
        Ok(parse_review(&generated.content))
    }

    /// Applies `verdict` to `task` and persists the transition, a correction
    /// record where one is due, and an audit event. The task must still be in
    /// review; if another review already moved it, this fails with
    /// `InvalidTaskState` and records nothing.
    pub async fn apply_review(
        &self,
        ctx: &RequestContext,
        task: &Task,
        auditor: &Agent,
        verdict: Verdict,
    ) -> HoldingResult<ReviewOutcome> {
        let mut task = task.clone();
        let decision = decide(&task, &verdict, self.rules.for_tenant(&task.tenant_id));
        let output = task.output_content().to_string();

        let target = match &decision {
            Decision::Escalate { .. } => TaskStatus::Rejected,
            Decision::Approve => TaskStatus::Approved,
            Decision::SendBack => TaskStatus::Pending,
        };
        claim_transition(self.store.as_ref(), &task, TaskStatus::Review, target).await?;

        task.status = target;
        task.confidence_score = Some(verdict.confidence);
        task.reviewed_by = Some(auditor.id.clone());
        task.review_notes = Some(verdict.feedback.clone());

        let action = match decision {
            Decision::Escalate { reason } => {
                self.store.update_task(&task).await?;
                self.record_correction(
                    &task,
                    auditor,
                    &output,
                    &verdict,
                    verdict.severity.unwrap_or(Severity::Critical),
                )
                .await?;
                self.audit
                    .record(
                        AuditEvent::new("task_escalated")
                            .tenant(&task.tenant_id)
                            .agent(&auditor.id)
                            .task(&task.id)
                            .details(serde_json::json!({
                                "task_id": task.id,
                                "reason": reason,
                                "review": verdict,
                            })),
                    )
                    .await;
                warn!(
                    task_id = %task.id,
                    tenant_id = %task.tenant_id,
                    session_id = %ctx.session_id,
                    %reason,
                    "Task escalated"
                );
                let alert = Alert::escalation(&task.tenant_id, &task.id, &task.title, &reason);
                if let Err(e) = self.notifier.notify(&alert).await {
                    warn!(task_id = %task.id, error = %e, "Escalation alert failed");
                }
                ReviewAction::Escalated
            }
            Decision::Approve => {
                task.approved_at = Some(Utc::now());
                self.store.update_task(&task).await?;
                self.audit
                    .record(
                        AuditEvent::new("task_auto_approved")
                            .tenant(&task.tenant_id)
                            .agent(&auditor.id)
                            .task(&task.id)
                            .details(serde_json::json!({
                                "task_id": task.id,
                                "confidence": verdict.confidence,
                            })),
                    )
                    .await;
                info!(
                    task_id = %task.id,
                    session_id = %ctx.session_id,
                    confidence = verdict.confidence,
                    "Task approved"
                );
                ReviewAction::Approved
            }
            Decision::SendBack => {
                task.revision_count += 1;
                self.store.update_task(&task).await?;
                self.record_correction(
                    &task,
                    auditor,
                    &output,
                    &verdict,
                    verdict.severity.unwrap_or(Severity::Minor),
                )
                .await?;
                self.audit
                    .record(
                        AuditEvent::new("task_sent_back")
                            .tenant(&task.tenant_id)
                            .agent(&auditor.id)
                            .task(&task.id)
                            .details(serde_json::json!({
                                "task_id": task.id,
                                "revision": task.revision_count,
                            })),
                    )
                    .await;
                info!(
                    task_id = %task.id,
                    session_id = %ctx.session_id,
                    revision = task.revision_count,
                    confidence = verdict.confidence,
                    "Task sent back for revision"
                );
                ReviewAction::SentBack
            }
        };

        Ok(ReviewOutcome {
            action,
            verdict,
            task,
        })
    }

    async fn record_correction(
        &self,
        task: &Task,
        auditor: &Agent,
        output: &str,
        verdict: &Verdict,
        severity: Severity,
    ) -> HoldingResult<i64> {
        let correction = Correction {
            id: 0,
            task_id: task.id.clone(),
            reviewer_agent_id: auditor.id.clone(),
            original_output: truncate_chars(output, CORRECTION_SNIPPET_CHARS),
            correction: verdict.issues.join("; "),
            reason: verdict.feedback.clone(),
            severity,
            created_at: Utc::now(),
        };
        self.store.insert_correction(&correction).await
    }
}
