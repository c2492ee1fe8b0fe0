use thiserror::Error;

/// Error kinds of spec.md §7, shared across every crate so failures are
/// reported through one vocabulary instead of ad hoc strings.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("plan invalid at line {line}: {detail}")]
    PlanInvalid { line: Option<usize>, detail: String },

    #[error("preflight blocked: {detail}")]
    PreflightBlock { detail: String },

    #[error("task '{task_id}' timed out after {elapsed_secs}s")]
    TaskTimeout { task_id: String, elapsed_secs: u64 },

    #[error("task '{task_id}' failed verification: {detail}")]
    TaskVerifierFail { task_id: String, detail: String },

    #[error("task '{task_id}' exhausted {attempts} attempts")]
    TaskExhausted { task_id: String, attempts: u32 },

    #[error("session state at '{path}' is corrupt: {detail}")]
    StateCorrupt { path: String, detail: String },

    #[error("monitor unreachable: {0}")]
    MonitorUnreachable(String),

    #[error("memory bridge unreachable: {0}")]
    MemoryUnreachable(String),

    #[error("switchboard unreachable: {0}")]
    SwitchboardDown(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Exit code mapping per spec.md §7.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::PreflightBlock { .. } => 2,
            OrchestratorError::PlanInvalid { .. } => 3,
            OrchestratorError::TaskExhausted { .. }
            | OrchestratorError::TaskTimeout { .. }
            | OrchestratorError::TaskVerifierFail { .. } => 1,
            _ => 70,
        }
    }
}
