#![allow(clippy::unwrap_used, clippy::expect_used)]

use holding_core::*;

// ---------------------------------------------------------------------------
// 1. Task serialization keeps lifecycle fields
// ---------------------------------------------------------------------------

#[test]
fn task_serialization_keeps_lifecycle_fields() {
    let mut task = Task::new("acme", "copy", "Hero section", "Rewrite the hero");
    task.status = TaskStatus::InProgress;
    task.assigned_to = Some("acme-writer".into());
    task.input_data = serde_json::json!({"url": "https://acme.test"});

    let json = serde_json::to_value(&task).unwrap();
    assert_eq!(json["status"], "in_progress");
    assert_eq!(json["tenant_id"], "acme");

    let back: Task = serde_json::from_value(json).unwrap();
    assert_eq!(back, task);
}

// ---------------------------------------------------------------------------
// 2. Error display and classification
// ---------------------------------------------------------------------------

#[test]
fn invalid_state_error_message() {
    let err = HoldingError::invalid_state("ht_1", TaskStatus::Review, TaskStatus::Pending);
    assert_eq!(err.to_string(), "Task ht_1 is pending, expected review");
    assert!(!err.is_retryable());
}

#[test]
fn router_failures_are_retryable() {
    assert!(HoldingError::ProvidersExhausted("x".into()).is_retryable());
    assert!(HoldingError::SpendLimitReached("x".into()).is_retryable());
    assert!(!HoldingError::TaskNotFound("x".into()).is_retryable());
}

#[test]
fn json_error_converts() {
    let err: HoldingError = serde_json::from_str::<Task>("{").unwrap_err().into();
    assert!(matches!(err, HoldingError::Json(_)));
}

// ---------------------------------------------------------------------------
// 3. Agent and audit builders
// ---------------------------------------------------------------------------

#[test]
fn agent_deserializes_with_defaults() {
    let agent: Agent = serde_json::from_str(
        r#"{"id":"acme-audit","tenant_id":"acme","name":"Auditor","role":"auditor"}"#,
    )
    .unwrap();
    assert_eq!(agent.role, AgentRole::Auditor);
    assert_eq!(agent.status, AgentStatus::Idle);
    assert!(agent.skills.is_empty());
    assert!((agent.confidence_threshold - 0.8).abs() < f64::EPSILON);
}

#[test]
fn audit_event_builder() {
    let event = AuditEvent::new("task_created")
        .tenant("acme")
        .agent("acme-writer")
        .task("ht_1")
        .details(serde_json::json!({"title": "Hero"}));
    assert_eq!(event.action, "task_created");
    assert_eq!(event.tenant_id.as_deref(), Some("acme"));
    assert_eq!(event.details["title"], "Hero");
}
