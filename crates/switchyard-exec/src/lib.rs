//! Task executor and group scheduler (spec.md §4.G–§4.H).
//!
//! Workers never touch `SessionState` directly — [`execute_task`] is a pure
//! function that returns a [`TaskOutcome`]; only the group scheduler in
//! [`run_plan`] applies outcomes through `StateStore`. This mirrors
//! `switchyard-state`'s own note that "the session driver is the only
//! writer; workers report results back through it." The worker pool itself
//! is a `Semaphore`-gated `JoinSet`, grounded on the teacher's
//! `engine.rs` execution loop (`task_semaphore.clone().try_acquire_owned()`,
//! `join_set.spawn(...)`, `join_set.join_next()`), generalized here from a
//! single flat task list to per-group dependency-gated dispatch.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use switchyard_gate::{GateOutcome, OutputQualityConfig};
use switchyard_monitor::MonitorClient;
use switchyard_state::StateStore;
use switchyard_types::{SessionState, Task, TaskPlan, TaskStatus};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub agent_program: PathBuf,
    pub verifier_program: PathBuf,
    pub memory_program: Option<PathBuf>,
    pub repo_root: PathBuf,
    pub log_dir: PathBuf,
    pub continue_on_error: bool,
    /// `None` uses spec.md's default: the number of ready tasks in the
    /// current group, capped at 8.
    pub concurrency_cap: Option<usize>,
    pub output_quality: OutputQualityConfig,
    pub quality_gate_timeout: Duration,
    pub kill_grace: Duration,
    /// Mirrors `OrchestratorConfig::quality_gate_disabled` (`QUALITY_GATE_DISABLED`,
    /// spec.md §6): when set, every task's quality-gate call is skipped and
    /// treated as an automatic pass.
    pub quality_gate_disabled: bool,
}

impl ExecutorConfig {
    pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(10);
    pub const DEFAULT_CONCURRENCY_UPPER_BOUND: usize = 8;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Passed,
    Failed { detail: String, attempts: u32 },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Failed,
    Partial,
    Paused,
}

enum TaskFailure {
    Cancelled,
    Timeout(Duration),
    Spawn(String),
    NonZero(String),
    Verifier(String),
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskFailure::Cancelled => write!(f, "cancelled"),
            TaskFailure::Timeout(d) => write!(f, "timed out after {}s", d.as_secs()),
            TaskFailure::Spawn(e) => write!(f, "failed to run agent: {e}"),
            TaskFailure::NonZero(detail) => write!(f, "agent process failed: {detail}"),
            TaskFailure::Verifier(detail) => write!(f, "verification failed: {detail}"),
        }
    }
}

/// Runs one task's full lifecycle: memory recall, then up to
/// `task.max_retries` attempts of subprocess + quality gate, then a
/// best-effort memory `learn` call once the task passes (spec.md §4.E).
pub async fn execute_task(
    task: &Task,
    config: &ExecutorConfig,
    monitor: &MonitorClient,
    session_id: &str,
    cancel: &CancellationToken,
) -> TaskOutcome {
    let recalled = match &config.memory_program {
        Some(program) => switchyard_memory::recall(program, &task.body).await,
        None => Vec::new(),
    };
    let prompt = switchyard_memory::compose_prompt(&task.body, &recalled);

    let max_attempts = task.max_retries.max(1);
    let mut last_detail = String::new();

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return TaskOutcome::Cancelled;
        }
        monitor
            .update(session_id, &task.id, "running", json!({ "attempt": attempt }))
            .await;

        match run_attempt(task, &prompt, attempt, config, cancel).await {
            Ok(()) => {
                if let Some(program) = &config.memory_program {
                    let stdout_path = config.log_dir.join(format!("{}.attempt{attempt}.stdout.log", task.id));
                    let solution = tail_file(&stdout_path, 4000).await;
                    switchyard_memory::learn(program, &task.body, &solution).await;
                }
                return TaskOutcome::Passed;
            }
            Err(TaskFailure::Cancelled) => return TaskOutcome::Cancelled,
            Err(other) => {
                last_detail = other.to_string();
                warn!(task = %task.id, attempt, detail = %last_detail, "task attempt failed");
            }
        }
    }

    TaskOutcome::Failed {
        detail: last_detail,
        attempts: max_attempts,
    }
}

async fn run_attempt(
    task: &Task,
    prompt: &str,
    attempt: u32,
    config: &ExecutorConfig,
    cancel: &CancellationToken,
) -> Result<(), TaskFailure> {
    tokio::fs::create_dir_all(&config.log_dir)
        .await
        .map_err(|e| TaskFailure::Spawn(e.to_string()))?;
    let stdout_path = config.log_dir.join(format!("{}.attempt{attempt}.stdout.log", task.id));
    let stderr_path = config.log_dir.join(format!("{}.attempt{attempt}.stderr.log", task.id));
    let stdout_file = std::fs::File::create(&stdout_path).map_err(|e| TaskFailure::Spawn(e.to_string()))?;
    let stderr_file = std::fs::File::create(&stderr_path).map_err(|e| TaskFailure::Spawn(e.to_string()))?;

    let mut command = Command::new(&config.agent_program);
    command.arg(prompt);
    command.current_dir(&config.repo_root);
    command.stdout(stdout_file);
    command.stderr(stderr_file);

    let mut child = command.spawn().map_err(|e| TaskFailure::Spawn(e.to_string()))?;

    let wait_outcome = tokio::select! {
        _ = cancel.cancelled() => {
            terminate_with_grace(&mut child, config.kill_grace).await;
            return Err(TaskFailure::Cancelled);
        }
        res = tokio::time::timeout(task.timeout, child.wait()) => res,
    };

    match wait_outcome {
        Err(_elapsed) => {
            terminate_with_grace(&mut child, config.kill_grace).await;
            return Err(TaskFailure::Timeout(task.timeout));
        }
        Ok(Err(e)) => return Err(TaskFailure::Spawn(e.to_string())),
        Ok(Ok(status)) if !status.success() => {
            let tail = tail_file(&stderr_path, 2000).await;
            return Err(TaskFailure::NonZero(format!("{status}: {tail}")));
        }
        Ok(Ok(_)) => {}
    }

    if config.quality_gate_disabled {
        return Ok(());
    }

    match switchyard_gate::run_gate(
        &config.verifier_program,
        &config.repo_root,
        task.dod.as_ref(),
        config.quality_gate_timeout,
        &config.output_quality,
        cancel,
        config.kill_grace,
    )
    .await
    {
        Ok(GateOutcome::Pass) => Ok(()),
        Ok(GateOutcome::SkipRejected) => Err(TaskFailure::Verifier("verifier rejected task (skip)".to_string())),
        Ok(GateOutcome::Cancelled) => Err(TaskFailure::Cancelled),
        Ok(GateOutcome::Fail { detail }) => Err(TaskFailure::Verifier(detail)),
        Err(e) => Err(TaskFailure::Verifier(format!("verifier invocation error: {e}"))),
    }
}

/// Sends a kill request, then waits up to `grace` for the process to exit,
/// retrying the kill once if it hasn't (spec.md §4.G "soft terminate then a
/// hard kill after a 10s grace"). `tokio::process` exposes a single kill
/// primitive rather than distinct SIGTERM/SIGKILL signals, so both steps use
/// `start_kill`; the grace window is honoured by how long we wait for reap
/// before escalating.
async fn terminate_with_grace(child: &mut tokio::process::Child, grace: Duration) {
    let _ = child.start_kill();
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!("subprocess did not exit within grace period, forcing kill");
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

async fn tail_file(path: &std::path::Path, max_len: usize) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            if text.len() <= max_len {
                text.to_string()
            } else {
                text[text.len() - max_len..].to_string()
            }
        }
        Err(_) => String::new(),
    }
}

fn is_task_terminal(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Passed | TaskStatus::Failed | TaskStatus::Skipped)
}

fn dependencies_satisfied(state: &SessionState, task: &Task) -> bool {
    task.dependencies
        .iter()
        .all(|dep_id| state.task_status(dep_id) == TaskStatus::Passed)
}

/// Transitively marks pending tasks `skipped` when any dependency has
/// failed or was itself skipped, but only under continue-on-error (spec.md
/// §4.H: "`skipped` is reserved for tasks whose dependency failed under
/// continue-on-error"). Returns the ids newly skipped this call.
fn propagate_skips(group_tasks: &[&Task], state: &mut SessionState, continue_on_error: bool) -> Vec<String> {
    if !continue_on_error {
        return Vec::new();
    }
    let mut newly_skipped = Vec::new();
    loop {
        let mut changed = false;
        for task in group_tasks {
            if state.task_status(&task.id) != TaskStatus::Pending {
                continue;
            }
            let blocked = task.dependencies.iter().any(|dep_id| {
                matches!(state.task_status(dep_id), TaskStatus::Failed | TaskStatus::Skipped)
            });
            if blocked {
                state.tasks.entry(task.id.clone()).or_default().status = TaskStatus::Skipped;
                newly_skipped.push(task.id.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    newly_skipped
}

/// Runs every group of `plan` in order, dispatching within a group subject
/// to dependency gates and a bounded worker pool. Stops advancing groups as
/// soon as a failure aborts the session (continue-on-error off).
pub async fn run_plan(
    plan: &TaskPlan,
    store: &StateStore,
    state: &mut SessionState,
    config: &ExecutorConfig,
    monitor: &MonitorClient,
    cancel: &CancellationToken,
) -> anyhow::Result<SessionOutcome> {
    let max_group = plan.max_group();
    let mut group = state.current_group;

    while group <= max_group {
        if cancel.is_cancelled() {
            store.pause(state).await?;
            return Ok(SessionOutcome::Paused);
        }
        store.advance_group(state, group).await?;
        let group_tasks: Vec<&Task> = plan.tasks_in_group(group).collect();
        if !group_tasks.is_empty() {
            let aborted = run_group(&group_tasks, store, state, config, monitor, cancel).await?;
            if aborted {
                break;
            }
        }
        if cancel.is_cancelled() {
            store.pause(state).await?;
            return Ok(SessionOutcome::Paused);
        }
        group += 1;
    }

    let outcome = compute_outcome(plan, state, config.continue_on_error);
    match outcome {
        SessionOutcome::Completed => store.complete(state).await?,
        _ => store.fail(state).await?,
    }
    Ok(outcome)
}

/// Returns `true` if the group aborted the session (a task failed and
/// continue-on-error is off).
async fn run_group(
    group_tasks: &[&Task],
    store: &StateStore,
    state: &mut SessionState,
    config: &ExecutorConfig,
    monitor: &MonitorClient,
    cancel: &CancellationToken,
) -> anyhow::Result<bool> {
    let cap = config
        .concurrency_cap
        .unwrap_or_else(|| group_tasks.len().min(ExecutorConfig::DEFAULT_CONCURRENCY_UPPER_BOUND))
        .max(1);
    let semaphore = Arc::new(Semaphore::new(cap));
    let mut join_set: JoinSet<(String, TaskOutcome)> = JoinSet::new();
    let mut dispatched: HashSet<String> = HashSet::new();
    let mut abort = false;
    let session_id = state.session_id.clone();

    loop {
        let newly_skipped = propagate_skips(group_tasks, state, config.continue_on_error);
        if !newly_skipped.is_empty() {
            store.save(state).await?;
            for id in &newly_skipped {
                monitor.update(&session_id, id, "skipped", json!({})).await;
            }
        }

        let all_terminal = group_tasks
            .iter()
            .all(|t| is_task_terminal(state.task_status(&t.id)));
        if all_terminal && join_set.is_empty() {
            break;
        }

        if !abort && !cancel.is_cancelled() {
            for task in group_tasks {
                if dispatched.contains(&task.id) {
                    continue;
                }
                if state.task_status(&task.id) != TaskStatus::Pending {
                    continue;
                }
                if !dependencies_satisfied(state, task) {
                    continue;
                }
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    continue;
                };
                dispatched.insert(task.id.clone());
                store.mark_running(state, &task.id).await?;
                monitor.update(&session_id, &task.id, "running", json!({})).await;

                let task_owned = task.clone();
                let exec_config = config.clone();
                let exec_monitor = monitor.clone();
                let exec_cancel = cancel.clone();
                let exec_session_id = session_id.clone();
                join_set.spawn(async move {
                    let outcome =
                        execute_task(&task_owned, &exec_config, &exec_monitor, &exec_session_id, &exec_cancel)
                            .await;
                    drop(permit);
                    (task_owned.id, outcome)
                });
            }
        }

        if join_set.is_empty() {
            if abort || cancel.is_cancelled() {
                break;
            }
            let pending_count = group_tasks
                .iter()
                .filter(|t| state.task_status(&t.id) == TaskStatus::Pending)
                .count();
            if pending_count > 0 {
                anyhow::bail!(
                    "group scheduler deadlock: {pending_count} pending task(s) with no satisfiable dependency"
                );
            }
            break;
        }

        if let Some(joined) = join_set.join_next().await {
            let (task_id, outcome) = joined?;
            match outcome {
                TaskOutcome::Passed => {
                    store.mark_passed(state, &task_id).await?;
                    monitor.update(&session_id, &task_id, "passed", json!({})).await;
                }
                TaskOutcome::Failed { detail, attempts } => {
                    store.mark_failed(state, &task_id, &detail, attempts).await?;
                    monitor
                        .update(&session_id, &task_id, "failed", json!({ "detail": detail }))
                        .await;
                    if !config.continue_on_error {
                        info!(task = %task_id, "aborting session: task failed and continue-on-error is off");
                        abort = true;
                    }
                }
                TaskOutcome::Cancelled => {
                    state.tasks.entry(task_id).or_default().status = TaskStatus::Pending;
                    store.save(state).await?;
                }
            }
        }
    }

    Ok(abort)
}

fn compute_outcome(plan: &TaskPlan, state: &SessionState, continue_on_error: bool) -> SessionOutcome {
    let mut any_failed = false;
    let mut any_passed = false;
    for task in &plan.tasks {
        match state.task_status(&task.id) {
            TaskStatus::Failed => any_failed = true,
            TaskStatus::Passed => any_passed = true,
            _ => {}
        }
    }
    if !any_failed {
        SessionOutcome::Completed
    } else if continue_on_error && any_passed {
        SessionOutcome::Partial
    } else {
        SessionOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use switchyard_types::{AgentTag, TaskPlanMeta};

    fn write_script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        path
    }

    fn task(id: &str, group: u32, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            ordinal: 0,
            title: format!("task {id}"),
            body: "do the thing".to_string(),
            agent: AgentTag::General,
            group,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            dod: None,
            timeout: Duration::from_secs(5),
            max_retries: 1,
        }
    }

    fn plan(tasks: Vec<Task>) -> TaskPlan {
        TaskPlan {
            tasks,
            meta: TaskPlanMeta {
                source_checksum: "chk".to_string(),
                ..Default::default()
            },
        }
    }

    fn config(dir: &std::path::Path, agent: PathBuf, verifier: PathBuf) -> ExecutorConfig {
        ExecutorConfig {
            agent_program: agent,
            verifier_program: verifier,
            memory_program: None,
            repo_root: dir.to_path_buf(),
            log_dir: dir.join("logs"),
            continue_on_error: false,
            concurrency_cap: Some(4),
            output_quality: OutputQualityConfig::default(),
            quality_gate_timeout: Duration::from_secs(5),
            kill_grace: Duration::from_secs(2),
            quality_gate_disabled: false,
        }
    }

    #[tokio::test]
    async fn passing_task_marks_passed_and_completes_session() {
        let dir = tempfile::tempdir().unwrap();
        let agent = write_script(dir.path(), "agent.sh", "exit 0");
        let verifier = write_script(dir.path(), "verifier.sh", "exit 0");
        let plan = plan(vec![task("1", 0, &[])]);
        let (store, mut state) = StateStore::create(dir.path(), &plan, Some("s1".to_string())).await.unwrap();
        let config = config(dir.path(), agent, verifier);
        let monitor = MonitorClient::from_config(&switchyard_types::OrchestratorConfig {
            task_monitor_api_url: None,
            task_monitor_enabled: false,
            scheduler_home: dir.path().to_path_buf(),
            orchestrate_state_dir: dir.path().to_path_buf(),
            switchboard_port: 8787,
            switchboard_url: String::new(),
            switchboard_ws: String::new(),
            agent_name: None,
            output_dir: None,
            output_pattern: None,
            sample_size: 5,
            quality_gate_timeout: Duration::from_secs(5),
            quality_gate_disabled: false,
            budget_check_program: None,
        });
        let cancel = CancellationToken::new();

        let outcome = run_plan(&plan, &store, &mut state, &config, &monitor, &cancel).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(state.task_status("1"), TaskStatus::Passed);
    }

    #[tokio::test]
    async fn failing_task_aborts_session_without_continue_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let agent = write_script(dir.path(), "agent.sh", "exit 0");
        let verifier = write_script(dir.path(), "verifier.sh", "exit 1");
        let plan = plan(vec![task("1", 0, &[]), task("2", 1, &[])]);
        let (store, mut state) = StateStore::create(dir.path(), &plan, Some("s2".to_string())).await.unwrap();
        let mut exec_config = config(dir.path(), agent, verifier);
        exec_config.continue_on_error = false;
        let monitor = MonitorClient::from_config(&switchyard_types::OrchestratorConfig {
            task_monitor_api_url: None,
            task_monitor_enabled: false,
            scheduler_home: dir.path().to_path_buf(),
            orchestrate_state_dir: dir.path().to_path_buf(),
            switchboard_port: 8787,
            switchboard_url: String::new(),
            switchboard_ws: String::new(),
            agent_name: None,
            output_dir: None,
            output_pattern: None,
            sample_size: 5,
            quality_gate_timeout: Duration::from_secs(5),
            quality_gate_disabled: false,
            budget_check_program: None,
        });
        let cancel = CancellationToken::new();

        let outcome = run_plan(&plan, &store, &mut state, &exec_config, &monitor, &cancel).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Failed);
        assert_eq!(state.task_status("1"), TaskStatus::Failed);
        assert_eq!(state.task_status("2"), TaskStatus::Pending);
    }

    #[tokio::test]
    async fn quality_gate_disabled_skips_verifier_and_passes() {
        let dir = tempfile::tempdir().unwrap();
        let agent = write_script(dir.path(), "agent.sh", "exit 0");
        let verifier = write_script(dir.path(), "verifier.sh", "exit 1");
        let plan = plan(vec![task("1", 0, &[])]);
        let (store, mut state) = StateStore::create(dir.path(), &plan, Some("s2b".to_string())).await.unwrap();
        let mut exec_config = config(dir.path(), agent, verifier);
        exec_config.quality_gate_disabled = true;
        let monitor = MonitorClient::from_config(&switchyard_types::OrchestratorConfig {
            task_monitor_api_url: None,
            task_monitor_enabled: false,
            scheduler_home: dir.path().to_path_buf(),
            orchestrate_state_dir: dir.path().to_path_buf(),
            switchboard_port: 8787,
            switchboard_url: String::new(),
            switchboard_ws: String::new(),
            agent_name: None,
            output_dir: None,
            output_pattern: None,
            sample_size: 5,
            quality_gate_timeout: Duration::from_secs(5),
            quality_gate_disabled: true,
            budget_check_program: None,
        });
        let cancel = CancellationToken::new();

        let outcome = run_plan(&plan, &store, &mut state, &exec_config, &monitor, &cancel).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(state.task_status("1"), TaskStatus::Passed);
    }

    #[tokio::test]
    async fn passing_task_invokes_memory_learn_with_task_body_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let agent = write_script(dir.path(), "agent.sh", "echo 'solved it'");
        let verifier = write_script(dir.path(), "verifier.sh", "exit 0");
        let learn_log = dir.path().join("learn.log");
        let memory = write_script(
            dir.path(),
            "memory.sh",
            &format!(
                "if [ \"$1\" = recall ]; then echo '{{}}'; else echo \"$@\" >> {}; fi",
                learn_log.display()
            ),
        );
        let mut exec_config = config(dir.path(), agent, verifier);
        exec_config.memory_program = Some(memory);
        let t = task("1", 0, &[]);
        let monitor = MonitorClient::from_config(&switchyard_types::OrchestratorConfig {
            task_monitor_api_url: None,
            task_monitor_enabled: false,
            scheduler_home: dir.path().to_path_buf(),
            orchestrate_state_dir: dir.path().to_path_buf(),
            switchboard_port: 8787,
            switchboard_url: String::new(),
            switchboard_ws: String::new(),
            agent_name: None,
            output_dir: None,
            output_pattern: None,
            sample_size: 5,
            quality_gate_timeout: Duration::from_secs(5),
            quality_gate_disabled: false,
            budget_check_program: None,
        });
        let cancel = CancellationToken::new();

        let outcome = execute_task(&t, &exec_config, &monitor, "s-learn", &cancel).await;
        assert_eq!(outcome, TaskOutcome::Passed);

        let logged = tokio::fs::read_to_string(&learn_log).await.unwrap();
        assert!(logged.contains("learn"));
        assert!(logged.contains("do the thing"));
        assert!(logged.contains("solved it"));
    }

    #[tokio::test]
    async fn dependent_task_is_skipped_under_continue_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let agent = write_script(dir.path(), "agent.sh", "exit 0");
        let verifier = write_script(dir.path(), "verifier.sh", "exit 1");
        let plan = plan(vec![task("1", 0, &[]), task("2", 0, &["1"])]);
        let (store, mut state) = StateStore::create(dir.path(), &plan, Some("s3".to_string())).await.unwrap();
        let mut exec_config = config(dir.path(), agent, verifier);
        exec_config.continue_on_error = true;
        let monitor = MonitorClient::from_config(&switchyard_types::OrchestratorConfig {
            task_monitor_api_url: None,
            task_monitor_enabled: false,
            scheduler_home: dir.path().to_path_buf(),
            orchestrate_state_dir: dir.path().to_path_buf(),
            switchboard_port: 8787,
            switchboard_url: String::new(),
            switchboard_ws: String::new(),
            agent_name: None,
            output_dir: None,
            output_pattern: None,
            sample_size: 5,
            quality_gate_timeout: Duration::from_secs(5),
            quality_gate_disabled: false,
            budget_check_program: None,
        });
        let cancel = CancellationToken::new();

        let outcome = run_plan(&plan, &store, &mut state, &exec_config, &monitor, &cancel).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Failed);
        assert_eq!(state.task_status("1"), TaskStatus::Failed);
        assert_eq!(state.task_status("2"), TaskStatus::Skipped);
    }

    #[test]
    fn dependencies_satisfied_requires_all_passed() {
        let mut state = SessionState {
            session_id: "s".to_string(),
            plan_checksum: "c".to_string(),
            tasks: Default::default(),
            current_group: 0,
            created_at_ms: 0,
            status: switchyard_types::SessionStatus::Running,
        };
        let t = task("2", 0, &["1"]);
        assert!(!dependencies_satisfied(&state, &t));
        state.tasks.insert(
            "1".to_string(),
            switchyard_types::TaskAttempt {
                status: TaskStatus::Passed,
                ..Default::default()
            },
        );
        assert!(dependencies_satisfied(&state, &t));
    }
}
