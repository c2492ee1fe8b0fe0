pub mod config;
pub mod error;
pub mod plan;
pub mod session;
pub mod switchboard;

pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use plan::{AgentTag, DodSpec, Task, TaskPlan, TaskPlanMeta};
pub use session::{
    PreflightCheck, PreflightReport, SessionState, SessionStatus, TaskAttempt, TaskStatus,
};
pub use switchboard::{AgentPresence, InboxMessage, MessageKind, MessagePriority};
