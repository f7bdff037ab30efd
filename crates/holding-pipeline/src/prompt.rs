use holding_core::{Task, Tenant};

/// Worker prompt: tenant brand context, then the task fields, then the
/// previous review notes when the task is being revised.
pub fn build_task_prompt(tenant: Option<&Tenant>, task: &Task) -> String {
    let mut parts = Vec::new();
    if let Some(tenant) = tenant {
        parts.push(format!("Brand: {}", tenant.name));
        if !tenant.brand_voice.is_empty() {
            parts.push(format!("Brand voice: {}", tenant.brand_voice));
        }
        if !tenant.target_audience.is_empty() {
            parts.push(format!("Target audience: {}", tenant.target_audience));
        }
    }
    parts.push(format!("Task: {}", task.title));
    if !task.description.is_empty() {
        parts.push(format!("Description: {}", task.description));
    }
    if task.input_data.as_object().is_some_and(|o| !o.is_empty()) {
        parts.push(format!("Input: {}", task.input_data));
    }
    if task.revision_count > 0 {
        if let Some(notes) = task.review_notes.as_deref().filter(|n| !n.is_empty()) {
            parts.push(format!(
                "Previous review feedback (revision {}): {notes}",
                task.revision_count
            ));
        }
    }
    parts.join("\n\n")
}

/// Auditor prompt asking for a strict JSON verdict on `output`.
pub fn build_review_prompt(task: &Task, output: &str) -> String {
    format!(
        "Review the following output for tenant '{tenant}'.\n\
         Task: {title}\n\
         Type: {task_type}\n\n\
         --- OUTPUT ---\n{output}\n--- END OUTPUT ---\n\n\
         Give your assessment as JSON with these fields:\n\
         {{\"confidence\": 0.0-1.0, \"verdict\": \"pass|needs_revision|reject\", \
         \"feedback\": \"specific feedback\", \"severity\": \"minor|major|critical\", \
         \"issues\": [\"issue 1\", ...]}}\n\
         Answer ONLY with valid JSON.",
        tenant = task.tenant_id,
        title = task.title,
        task_type = task.task_type,
    )
}
