//! Session driver (spec.md §4.I): parses a task file, runs the pre-flight
//! gate, drives the group scheduler to completion or pause, and owns signal
//! handling. `Cli`/`Command` follow the teacher's own `engine/src/main.rs`
//! shape (`clap::Parser`/`Subcommand` over a handful of top-level verbs);
//! graceful-shutdown wiring follows `tandem-server::http::serve`'s
//! `tokio::signal::ctrl_c()` pattern, here driving a `CancellationToken`
//! instead of an axum shutdown future.

mod jobs;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use switchyard_exec::{ExecutorConfig, SessionOutcome};
use switchyard_gate::OutputQualityConfig;
use switchyard_monitor::MonitorClient;
use switchyard_observability::{init_orchestrator_logging, Component};
use switchyard_state::StateStore;
use switchyard_types::{OrchestratorConfig, OrchestratorError, SessionStatus};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "orchestrate")]
#[command(about = "Switchyard task-file orchestration runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse, pre-flight, and execute a task file.
    Run {
        task_file: PathBuf,
        #[arg(long, default_value = "agent")]
        agent_program: PathBuf,
        #[arg(long, default_value = "verifier")]
        verifier_program: PathBuf,
        #[arg(long)]
        memory_program: Option<PathBuf>,
        #[arg(long)]
        archiver_program: Option<PathBuf>,
        #[arg(long, default_value = ".")]
        repo_root: PathBuf,
        #[arg(long, default_value_t = false)]
        continue_on_error: bool,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// List paused/failed sessions with id, file, progress.
    Status,
    /// Resume the most recent (or named) paused/running session.
    Resume { session_id: Option<String> },
    /// Register a recurring job in the on-disk job registry (spec.md §6).
    /// Does not itself schedule anything — the cron-style scheduler reads
    /// this file.
    Schedule {
        task_file: PathBuf,
        #[arg(long)]
        cron: String,
    },
    /// Remove a task file's entry from the job registry.
    Unschedule { task_file: PathBuf },
    /// Run the switchboard daemon (spec.md §4.J) in the foreground.
    Switchboard {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Register as an agent on the switchboard (spec.md §4.K) and send one
    /// message, using `AGENT_NAME`/`--agent-name` as the sender identity.
    Send {
        to: String,
        body: String,
        #[arg(long)]
        agent_name: Option<String>,
        #[arg(long, value_enum, default_value = "info")]
        kind: SendKind,
    },
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum SendKind {
    Task,
    Info,
    Question,
    Response,
    Alert,
}

impl From<SendKind> for switchyard_types::MessageKind {
    fn from(kind: SendKind) -> Self {
        match kind {
            SendKind::Task => switchyard_types::MessageKind::Task,
            SendKind::Info => switchyard_types::MessageKind::Info,
            SendKind::Question => switchyard_types::MessageKind::Question,
            SendKind::Response => switchyard_types::MessageKind::Response,
            SendKind::Alert => switchyard_types::MessageKind::Alert,
        }
    }
}

#[tokio::main]
async fn main() {
    let config = OrchestratorConfig::from_env();
    let logs_dir = switchyard_observability::canonical_logs_dir_from_root(&config.orchestrate_state_dir);
    let _guard = match init_orchestrator_logging(Component::Driver, &logs_dir) {
        Ok((guard, _info)) => Some(guard),
        Err(e) => {
            eprintln!("warning: failed to initialize logging: {e}");
            None
        }
    };

    let cli = Cli::parse();
    let exit_code = run(cli, config).await;
    std::process::exit(exit_code);
}

async fn run(cli: Cli, config: OrchestratorConfig) -> i32 {
    match cli.command {
        Command::Run {
            task_file,
            agent_program,
            verifier_program,
            memory_program,
            archiver_program,
            repo_root,
            continue_on_error,
            concurrency,
        } => {
            run_session(
                &task_file,
                agent_program,
                verifier_program,
                memory_program,
                archiver_program,
                repo_root,
                continue_on_error,
                concurrency,
                &config,
            )
            .await
        }
        Command::Status => status(&config).await,
        Command::Resume { session_id } => {
            resume_session(session_id, &config).await
        }
        Command::Schedule { task_file, cron } => jobs::schedule(&task_file, &cron, &config).await,
        Command::Unschedule { task_file } => jobs::unschedule(&task_file, &config).await,
        Command::Switchboard { port } => {
            let port = port.unwrap_or(config.switchboard_port);
            let addr: SocketAddr = ([127, 0, 0, 1], port).into();
            let board_logs = switchyard_observability::canonical_logs_dir_from_root(&config.orchestrate_state_dir);
            let _ = init_orchestrator_logging(Component::Board, &board_logs);
            match switchyard_board::serve(addr, &config.orchestrate_state_dir).await {
                Ok(()) => 0,
                Err(e) => {
                    error!(error = %e, "switchboard daemon exited with error");
                    70
                }
            }
        }
        Command::Send { to, body, agent_name, kind } => {
            send_message(&config, agent_name, to, body, kind.into()).await
        }
    }
}

/// Registers with the switchboard daemon as `agent_name` (falling back to
/// `config.agent_name`, i.e. `AGENT_NAME`) and sends a single message
/// (spec.md §4.K). Exits non-zero when no agent identity is configured,
/// since the daemon's `/register` call requires one.
async fn send_message(
    config: &OrchestratorConfig,
    agent_name: Option<String>,
    to: String,
    body: String,
    kind: switchyard_types::MessageKind,
) -> i32 {
    let Some(agent_name) = agent_name.or_else(|| config.agent_name.clone()) else {
        error!("send requires --agent-name or AGENT_NAME to be set");
        return 64;
    };

    let (client, _inbound_rx) = match switchyard_board_client::SwitchboardClient::connect(config, agent_name).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "failed to connect to switchboard");
            return 70;
        }
    };

    let outcome = client
        .send(to, body, kind, switchyard_types::MessagePriority::Normal, None, None)
        .await;
    info!(?outcome, "send: message delivered");
    0
}

/// Sidecar file recording the task file and `run` invocation options behind
/// a session, since `SessionState` itself (spec.md §3) carries only the
/// plan checksum — needed so `orchestrate resume` can re-parse the same
/// plan with the same agent/verifier/memory programs. Not part of the
/// spec's data model; a minimal local addition.
#[derive(Debug, Serialize, Deserialize)]
struct ResumeSidecar {
    source_path: PathBuf,
    agent_program: PathBuf,
    verifier_program: PathBuf,
    memory_program: Option<PathBuf>,
    repo_root: PathBuf,
    continue_on_error: bool,
    concurrency: Option<usize>,
}

fn source_sidecar_path(state_dir: &Path, session_id: &str) -> PathBuf {
    state_dir.join(format!("{session_id}.source.txt"))
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    task_file: &Path,
    agent_program: PathBuf,
    verifier_program: PathBuf,
    memory_program: Option<PathBuf>,
    archiver_program: Option<PathBuf>,
    repo_root: PathBuf,
    continue_on_error: bool,
    concurrency: Option<usize>,
    config: &OrchestratorConfig,
) -> i32 {
    let source_text = match tokio::fs::read_to_string(task_file).await {
        Ok(text) => text,
        Err(e) => {
            error!(error = %e, path = %task_file.display(), "failed to read task file");
            return 3;
        }
    };

    let plan = match switchyard_parser::parse_source(&source_text, &task_file.display().to_string()) {
        Ok(plan) => plan,
        Err(e) => {
            let err: OrchestratorError = e.into();
            error!(error = %err, "task plan invalid");
            return err.exit_code();
        }
    };

    let state_dir = &config.orchestrate_state_dir;
    let report = match switchyard_preflight::run_preflight(&plan, &source_text, config, state_dir).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "pre-flight checker failed to run");
            return 70;
        }
    };

    if !report.passes() {
        let details: Vec<String> = report
            .failed_checks()
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect();
        eprintln!("Pre-flight blocked:\n{}", details.join("\n"));
        return 2;
    }

    let (store, mut state) = match StateStore::create(state_dir, &plan, None).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "failed to create session state");
            return 70;
        }
    };

    let sidecar = ResumeSidecar {
        source_path: task_file.to_path_buf(),
        agent_program: agent_program.clone(),
        verifier_program: verifier_program.clone(),
        memory_program: memory_program.clone(),
        repo_root: repo_root.clone(),
        continue_on_error,
        concurrency,
    };
    match serde_json::to_vec_pretty(&sidecar) {
        Ok(bytes) => {
            if let Err(e) =
                tokio::fs::write(source_sidecar_path(state_dir, store.session_id()), bytes).await
            {
                warn!(error = %e, "failed to persist session resume sidecar");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize session resume sidecar"),
    }

    let monitor = MonitorClient::from_config(config);
    monitor
        .register(
            store.session_id(),
            serde_json::json!({ "taskCount": plan.tasks.len(), "sourcePath": task_file.display().to_string() }),
        )
        .await;

    let executor_config = ExecutorConfig {
        agent_program,
        verifier_program,
        memory_program,
        repo_root,
        log_dir: state_dir.join(store.session_id()).join("logs"),
        continue_on_error,
        concurrency_cap: concurrency,
        output_quality: OutputQualityConfig {
            output_dir: config.output_dir.clone(),
            pattern: config
                .output_pattern
                .clone()
                .unwrap_or_else(|| OrchestratorConfig::DEFAULT_OUTPUT_PATTERN.to_string()),
            sample_size: config.sample_size,
        },
        quality_gate_timeout: config.quality_gate_timeout,
        kill_grace: ExecutorConfig::DEFAULT_KILL_GRACE,
        quality_gate_disabled: config.quality_gate_disabled,
    };

    info!(session = %store.session_id(), tasks = plan.tasks.len(), "starting session");
    let outcome = drive_plan(&plan, &store, &mut state, &executor_config, &monitor).await;
    finish(&monitor, store.session_id(), outcome, archiver_program.as_deref()).await
}

async fn resume_session(session_id: Option<String>, config: &OrchestratorConfig) -> i32 {
    let state_dir = &config.orchestrate_state_dir;
    let session_id = match session_id {
        Some(id) => id,
        None => match StateStore::most_recent_resumable(state_dir).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                eprintln!("no resumable session found");
                return 1;
            }
            Err(e) => {
                error!(error = %e, "failed to list sessions");
                return 70;
            }
        },
    };

    let sidecar_bytes = match tokio::fs::read(source_sidecar_path(state_dir, &session_id)).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, session = %session_id, "cannot resume: missing resume sidecar");
            return 1;
        }
    };
    let sidecar: ResumeSidecar = match serde_json::from_slice(&sidecar_bytes) {
        Ok(sidecar) => sidecar,
        Err(e) => {
            error!(error = %e, session = %session_id, "cannot resume: resume sidecar is corrupt");
            return 70;
        }
    };

    let (store, mut state) = match StateStore::load(state_dir, &session_id).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "session state is corrupt, refusing to resume");
            return 70;
        }
    };

    let source_text = match tokio::fs::read_to_string(&sidecar.source_path).await {
        Ok(text) => text,
        Err(e) => {
            error!(error = %e, path = %sidecar.source_path.display(), "failed to re-read task file for resume");
            return 1;
        }
    };
    let plan = match switchyard_parser::parse_source(&source_text, &sidecar.source_path.display().to_string()) {
        Ok(plan) => plan,
        Err(e) => {
            let err: OrchestratorError = e.into();
            error!(error = %err, "task plan invalid on resume");
            return err.exit_code();
        }
    };
    if plan.meta.source_checksum != state.plan_checksum {
        error!(session = %session_id, "task file changed since this session was created, refusing to resume");
        return 1;
    }

    let monitor = MonitorClient::from_config(config);
    let executor_config = ExecutorConfig {
        agent_program: sidecar.agent_program,
        verifier_program: sidecar.verifier_program,
        memory_program: sidecar.memory_program,
        repo_root: sidecar.repo_root,
        log_dir: state_dir.join(&session_id).join("logs"),
        continue_on_error: sidecar.continue_on_error,
        concurrency_cap: sidecar.concurrency,
        output_quality: OutputQualityConfig {
            output_dir: config.output_dir.clone(),
            pattern: config
                .output_pattern
                .clone()
                .unwrap_or_else(|| OrchestratorConfig::DEFAULT_OUTPUT_PATTERN.to_string()),
            sample_size: config.sample_size,
        },
        quality_gate_timeout: config.quality_gate_timeout,
        kill_grace: ExecutorConfig::DEFAULT_KILL_GRACE,
        quality_gate_disabled: config.quality_gate_disabled,
    };

    info!(session = %session_id, "resuming session");
    let outcome = drive_plan(&plan, &store, &mut state, &executor_config, &monitor).await;
    finish(&monitor, &session_id, outcome, None).await
}

/// Wires `SIGINT` into a `CancellationToken` the scheduler observes at
/// group and task boundaries, exactly as spec.md §4.I describes: "stop
/// dispatching new tasks, cancel in-flight ones gracefully, save state,
/// exit 0."
async fn drive_plan(
    plan: &switchyard_types::TaskPlan,
    store: &StateStore,
    state: &mut switchyard_types::SessionState,
    executor_config: &ExecutorConfig,
    monitor: &MonitorClient,
) -> anyhow::Result<SessionOutcome> {
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received interrupt, pausing session");
            signal_cancel.cancel();
        }
    });

    switchyard_exec::run_plan(plan, store, state, executor_config, monitor, &cancel).await
}

async fn finish(
    monitor: &MonitorClient,
    session_id: &str,
    outcome: anyhow::Result<SessionOutcome>,
    archiver_program: Option<&Path>,
) -> i32 {
    match outcome {
        Ok(SessionOutcome::Completed) => {
            monitor
                .complete(session_id, serde_json::json!({ "status": "completed" }))
                .await;
            archive(session_id, archiver_program).await;
            0
        }
        Ok(SessionOutcome::Paused) => {
            monitor
                .complete(session_id, serde_json::json!({ "status": "paused" }))
                .await;
            0
        }
        Ok(SessionOutcome::Failed) => {
            monitor
                .complete(session_id, serde_json::json!({ "status": "failed" }))
                .await;
            1
        }
        Ok(SessionOutcome::Partial) => {
            monitor
                .complete(session_id, serde_json::json!({ "status": "partial" }))
                .await;
            1
        }
        Err(e) => {
            error!(error = %e, "session aborted unexpectedly");
            70
        }
    }
}

/// Best-effort archival of a completed session (spec.md §1 non-goal: "one
/// final external program call"). Invoked only on `completed`, never on
/// `failed` or `paused` (spec.md §9).
async fn archive(session_id: &str, archiver_program: Option<&Path>) {
    let Some(program) = archiver_program else {
        return;
    };
    match tokio::process::Command::new(program).arg(session_id).status().await {
        Ok(status) if status.success() => info!(session = %session_id, "archived session"),
        Ok(status) => warn!(session = %session_id, ?status, "archiver exited non-zero"),
        Err(e) => warn!(session = %session_id, error = %e, "failed to invoke archiver"),
    }
}

async fn status(config: &OrchestratorConfig) -> i32 {
    let sessions = match StateStore::list_sessions(&config.orchestrate_state_dir).await {
        Ok(sessions) => sessions,
        Err(e) => {
            error!(error = %e, "failed to list sessions");
            return 70;
        }
    };

    let interesting: Vec<_> = sessions
        .iter()
        .filter(|s| matches!(s.status, SessionStatus::Paused | SessionStatus::Failed | SessionStatus::Running))
        .collect();

    if interesting.is_empty() {
        println!("no paused/failed/running sessions");
        return 0;
    }

    for session in interesting {
        let passed = session
            .tasks
            .values()
            .filter(|a| a.status == switchyard_types::TaskStatus::Passed)
            .count();
        println!(
            "{}  status={:?}  group={}  progress={}/{}",
            session.session_id,
            session.status,
            session.current_group,
            passed,
            session.tasks.len()
        );
    }
    0
}
