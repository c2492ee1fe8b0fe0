use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which configured agent profile a task's prompt is dispatched to.
///
/// Open-ended: a task file may name a profile the orchestrator doesn't
/// special-case yet, so unknown tags are preserved rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTag {
    General,
    Explore,
    Research,
    Custom(String),
}

impl AgentTag {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "general" | "general-purpose" => AgentTag::General,
            "explore" | "exploration" => AgentTag::Explore,
            "research" => AgentTag::Research,
            other => AgentTag::Custom(other.to_string()),
        }
    }

    /// Research/exploration tasks are exempt from the Definition-of-Done
    /// preflight check (spec.md §4.B check 4).
    pub fn exempt_from_dod(&self) -> bool {
        matches!(self, AgentTag::Explore | AgentTag::Research)
    }
}

/// The `Test:` line of a `Definition of Done` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DodSpec {
    /// Path to the test file, optionally suffixed with `::test_name`.
    pub test: String,
    pub assertion: Option<String>,
}

impl DodSpec {
    /// Splits `path::test_name` into its file and (optional) test-name parts.
    pub fn split_test_id(&self) -> (&str, Option<&str>) {
        match self.test.split_once("::") {
            Some((file, name)) => (file, Some(name)),
            None => (self.test.as_str(), None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub ordinal: u32,
    pub title: String,
    pub body: String,
    pub agent: AgentTag,
    pub group: u32,
    pub dependencies: Vec<String>,
    pub dod: Option<DodSpec>,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Task {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn requires_dod(&self) -> bool {
        !self.agent.exempt_from_dod()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskPlanMeta {
    pub source_path: String,
    pub source_checksum: String,
    pub questions_blockers_raw: Vec<String>,
    pub sanity_script_paths: Vec<String>,
    pub declared_test_paths: Vec<String>,
}

/// The immutable, ordered plan produced by the task-file parser (spec.md §3, §4.A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub tasks: Vec<Task>,
    pub meta: TaskPlanMeta,
}

impl TaskPlan {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn max_group(&self) -> u32 {
        self.tasks.iter().map(|t| t.group).max().unwrap_or(0)
    }

    pub fn tasks_in_group(&self, group: u32) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |t| t.group == group)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
