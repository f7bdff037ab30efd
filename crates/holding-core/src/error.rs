use thiserror::Error;

/// Top-level error type for the Holding pipeline.
///
/// Pipeline preconditions (missing task, agent or auditor, wrong task state)
/// are surfaced to callers as explicit variants. Provider-level failures never
/// reach this type directly: the call router absorbs them and only reports
/// [`HoldingError::ProvidersExhausted`] or [`HoldingError::SpendLimitReached`]
/// once the whole chain has been consulted.
#[derive(Debug, Error)]
pub enum HoldingError {
    /// No task with this id exists for the requesting tenant.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// The referenced agent does not exist.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// The tenant has no auditor agent registered.
    #[error("No auditor registered for tenant: {0}")]
    AuditorNotFound(String),

    /// The referenced tenant does not exist.
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    /// The task has no worker assigned, so it cannot be executed.
    #[error("Task {0} has no assigned agent")]
    NoAgentAssigned(String),

    /// The task is not in the state the operation requires.
    #[error("Task {task_id} is {actual}, expected {expected}")]
    InvalidTaskState {
        /// Task the operation was invoked on.
        task_id: String,
        /// State the operation requires.
        expected: String,
        /// State the task is actually in.
        actual: String,
    },

    /// Every provider in the chain failed or was skipped.
    #[error("All providers exhausted: {0}")]
    ProvidersExhausted(String),

    /// The daily spend ceiling was reached; no provider was contacted.
    #[error("Spend limit reached: {0}")]
    SpendLimitReached(String),

    /// A tenant or agent registration violated a registry invariant.
    #[error("Registry error: {0}")]
    Registry(String),

    /// An error from the persistent store.
    #[error("Store error: {0}")]
    Store(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error from an outbound notification channel.
    #[error("Channel error: {0}")]
    Channel(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`HoldingError`].
pub type HoldingResult<T> = Result<T, HoldingError>;

impl HoldingError {
    /// Builds an [`HoldingError::InvalidTaskState`] from displayable states.
    pub fn invalid_state(
        task_id: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        HoldingError::InvalidTaskState {
            task_id: task_id.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// True for the errors that mean "the task could not make progress right
    /// now but nothing is wrong with it" (providers down, budget spent).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HoldingError::ProvidersExhausted(_) | HoldingError::SpendLimitReached(_)
        )
    }
}
