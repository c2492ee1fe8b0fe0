use thiserror::Error;

use switchyard_types::OrchestratorError;

/// Failure modes of the task-file scanner (spec.md §4.A).
///
/// The parser is otherwise total — formatting drift is absorbed silently —
/// so every variant here corresponds to one of the three hard-error cases
/// the spec calls out by name.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: unrecognised task heading: {text}")]
    InvalidTaskHeading { line: usize, text: String },

    #[error("line {line}: duplicate task id '{id}'")]
    DuplicateTaskId { line: usize, id: String },

    #[error("task '{task_id}' depends on unknown task '{dep_id}'")]
    UnknownDependency { task_id: String, dep_id: String },

    #[error(
        "task '{task_id}' depends on '{dep_id}', which does not precede it (group ordering)"
    )]
    GroupOrderViolation { task_id: String, dep_id: String },

    #[error("dependency cycle detected: {0}")]
    DependencyCycle(String),
}

impl ParseError {
    fn line(&self) -> Option<usize> {
        match self {
            ParseError::InvalidTaskHeading { line, .. } => Some(*line),
            ParseError::DuplicateTaskId { line, .. } => Some(*line),
            _ => None,
        }
    }
}

impl From<ParseError> for OrchestratorError {
    fn from(err: ParseError) -> Self {
        OrchestratorError::PlanInvalid {
            line: err.line(),
            detail: err.to_string(),
        }
    }
}
