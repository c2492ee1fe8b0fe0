//! Pre-flight checker (spec.md §4.B).
//!
//! Runs the seven named checks in order and aggregates them into a
//! [`PreflightReport`]. A failing check blocks the session before any task
//! runs; a warning never does. The sanity-script and budget-check
//! sub-calls shell out the same way `BashTool::execute_with_cancel` does
//! in the teacher codebase, generalised to arbitrary external programs.

use std::path::Path;

use regex::Regex;
use tokio::process::Command;
use tracing::{info, warn};

use switchyard_types::{CheckStatus, OrchestratorConfig, PreflightCheck, PreflightReport, TaskPlan};

const BLOCKER_STRIP_TOKENS: &[&str] = &["none", "n/a", "nothing", "no questions", "no blockers"];
const BATCH_QUALITY_WORDS: &[&str] = &[
    "batch",
    "pipeline",
    "extract",
    "overnight",
    "nightly",
    "long-running",
];
const BUDGET_TOKENS: &[&str] = &["chutes", "llm", "scillm", "batch"];

/// Runs all seven checks against `plan` and `source_text` (the raw task
/// file bytes, needed for the two whole-file keyword scans that don't
/// reduce cleanly to parsed structure) and writes both a human-readable
/// report (stderr, via `tracing`) and the machine report
/// (`<state_dir>/preflight.json`).
pub async fn run_preflight(
    plan: &TaskPlan,
    source_text: &str,
    config: &OrchestratorConfig,
    state_dir: &Path,
) -> anyhow::Result<PreflightReport> {
    let mut checks = Vec::with_capacity(7);
    checks.push(check_questions_blockers(plan));
    checks.push(check_sanity_scripts_exist(plan));
    checks.push(check_sanity_scripts_pass(plan).await);
    checks.push(check_definition_of_done(plan));
    checks.push(check_test_files_exist(plan));
    checks.push(check_batch_quality_advisory(source_text));
    checks.push(check_budget(source_text, config).await);

    let report = PreflightReport { checks };

    for check in &report.checks {
        match check.status {
            CheckStatus::Pass => info!(check = %check.name, "preflight check passed"),
            CheckStatus::Warn => warn!(check = %check.name, detail = %check.detail, "preflight check warned"),
            CheckStatus::Fail => warn!(check = %check.name, detail = %check.detail, "preflight check failed"),
        }
    }

    tokio::fs::create_dir_all(state_dir).await?;
    let path = state_dir.join("preflight.json");
    let body = serde_json::to_vec_pretty(&report)?;
    tokio::fs::write(&path, body).await?;

    Ok(report)
}

fn check_questions_blockers(plan: &TaskPlan) -> PreflightCheck {
    let mut surviving = Vec::new();
    for raw in &plan.meta.questions_blockers_raw {
        let residue = strip_blocker_tokens(raw);
        if !residue.is_empty() {
            surviving.push(residue);
        }
    }
    if surviving.is_empty() {
        PreflightCheck {
            name: "questions_blockers_resolved".to_string(),
            status: CheckStatus::Pass,
            detail: "no unresolved blockers".to_string(),
        }
    } else {
        PreflightCheck {
            name: "questions_blockers_resolved".to_string(),
            status: CheckStatus::Fail,
            detail: format!("Unresolved blockers found: {}", surviving.join("; ")),
        }
    }
}

fn strip_blocker_tokens(raw: &str) -> String {
    let mut residue = raw.trim_start_matches('-').trim().to_string();
    for token in BLOCKER_STRIP_TOKENS {
        let lower = residue.to_ascii_lowercase();
        if lower == *token {
            residue.clear();
            break;
        }
    }
    residue
}

fn check_sanity_scripts_exist(plan: &TaskPlan) -> PreflightCheck {
    let missing: Vec<&String> = plan
        .meta
        .sanity_script_paths
        .iter()
        .filter(|p| !Path::new(p).exists())
        .collect();
    if missing.is_empty() {
        PreflightCheck {
            name: "sanity_scripts_exist".to_string(),
            status: CheckStatus::Pass,
            detail: format!("{} sanity script(s) resolved", plan.meta.sanity_script_paths.len()),
        }
    } else {
        PreflightCheck {
            name: "sanity_scripts_exist".to_string(),
            status: CheckStatus::Fail,
            detail: format!(
                "missing sanity scripts: {}",
                missing.into_iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

async fn check_sanity_scripts_pass(plan: &TaskPlan) -> PreflightCheck {
    let mut failures = Vec::new();
    for path in &plan.meta.sanity_script_paths {
        if !Path::new(path).exists() {
            // already reported by check_sanity_scripts_exist; don't double-count.
            continue;
        }
        match Command::new(path).output().await {
            Ok(output) => match output.status.code() {
                Some(0) => {}
                Some(42) => failures.push(format!("{path}: needs human clarification (exit 42)")),
                other => failures.push(format!("{path}: exited {other:?}")),
            },
            Err(err) => failures.push(format!("{path}: failed to execute: {err}")),
        }
    }
    if failures.is_empty() {
        PreflightCheck {
            name: "sanity_scripts_pass".to_string(),
            status: CheckStatus::Pass,
            detail: "all sanity scripts exited 0".to_string(),
        }
    } else {
        PreflightCheck {
            name: "sanity_scripts_pass".to_string(),
            status: CheckStatus::Fail,
            detail: failures.join("; "),
        }
    }
}

fn check_definition_of_done(plan: &TaskPlan) -> PreflightCheck {
    let mut missing = Vec::new();
    for task in &plan.tasks {
        if !task.requires_dod() {
            continue;
        }
        match &task.dod {
            None => missing.push(task.id.clone()),
            Some(dod) if dod.test.trim().eq_ignore_ascii_case("missing") => {
                missing.push(task.id.clone())
            }
            Some(_) => {}
        }
    }
    if missing.is_empty() {
        PreflightCheck {
            name: "definition_of_done_defined".to_string(),
            status: CheckStatus::Pass,
            detail: "every non-exempt task declares a Definition of Done".to_string(),
        }
    } else {
        PreflightCheck {
            name: "definition_of_done_defined".to_string(),
            status: CheckStatus::Fail,
            detail: format!("tasks missing Definition of Done: {}", missing.join(", ")),
        }
    }
}

fn check_test_files_exist(plan: &TaskPlan) -> PreflightCheck {
    let missing: Vec<&String> = plan
        .meta
        .declared_test_paths
        .iter()
        .filter(|p| !Path::new(p).exists())
        .collect();
    if missing.is_empty() {
        PreflightCheck {
            name: "test_files_exist".to_string(),
            status: CheckStatus::Pass,
            detail: format!("{} declared test file(s) resolved", plan.meta.declared_test_paths.len()),
        }
    } else {
        PreflightCheck {
            name: "test_files_exist".to_string(),
            status: CheckStatus::Fail,
            detail: format!(
                "missing test files: {}",
                missing.into_iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

fn check_batch_quality_advisory(source_text: &str) -> PreflightCheck {
    let lower = source_text.to_ascii_lowercase();
    let mentions_batch_word = BATCH_QUALITY_WORDS.iter().any(|w| lower.contains(w));
    if !mentions_batch_word {
        return PreflightCheck {
            name: "batch_quality_monitoring".to_string(),
            status: CheckStatus::Pass,
            detail: "no batch/pipeline keywords present".to_string(),
        };
    }
    let has_output_validation =
        lower.contains("output_dir") || lower.contains("output-validation") || lower.contains("quality-monitor") || lower.contains("quality_monitor");
    if has_output_validation {
        PreflightCheck {
            name: "batch_quality_monitoring".to_string(),
            status: CheckStatus::Pass,
            detail: "batch keywords present alongside output-validation pattern".to_string(),
        }
    } else {
        PreflightCheck {
            name: "batch_quality_monitoring".to_string(),
            status: CheckStatus::Warn,
            detail: "batch/pipeline keywords found with no OUTPUT_DIR or quality-monitor pattern".to_string(),
        }
    }
}

async fn check_budget(source_text: &str, config: &OrchestratorConfig) -> PreflightCheck {
    let lower = source_text.to_ascii_lowercase();
    let word_re = Regex::new(r"[a-z0-9_]+").expect("static regex");
    let mentions_llm = word_re
        .find_iter(&lower)
        .any(|m| BUDGET_TOKENS.contains(&m.as_str()));
    if !mentions_llm {
        return PreflightCheck {
            name: "budget_check".to_string(),
            status: CheckStatus::Pass,
            detail: "no external LLM usage tokens found".to_string(),
        };
    }
    let Some(program) = config.budget_check_program.as_ref() else {
        return PreflightCheck {
            name: "budget_check".to_string(),
            status: CheckStatus::Warn,
            detail: "LLM usage mentioned but no budget-check program configured".to_string(),
        };
    };
    if !program.exists() {
        return PreflightCheck {
            name: "budget_check".to_string(),
            status: CheckStatus::Warn,
            detail: format!("budget-check program '{}' not found", program.display()),
        };
    }
    match Command::new(program).output().await {
        Ok(output) if output.status.success() => PreflightCheck {
            name: "budget_check".to_string(),
            status: CheckStatus::Pass,
            detail: "budget-check program exited 0".to_string(),
        },
        Ok(output) => PreflightCheck {
            name: "budget_check".to_string(),
            status: CheckStatus::Fail,
            detail: format!("budget-check program exited {:?}", output.status.code()),
        },
        Err(err) => PreflightCheck {
            name: "budget_check".to_string(),
            status: CheckStatus::Fail,
            detail: format!("failed to execute budget-check program: {err}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::TaskPlanMeta;

    fn empty_plan() -> TaskPlan {
        TaskPlan {
            tasks: vec![],
            meta: TaskPlanMeta::default(),
        }
    }

    #[test]
    fn blocker_tokens_strip_to_empty() {
        assert_eq!(strip_blocker_tokens("- None"), "");
        assert_eq!(strip_blocker_tokens("- n/a"), "");
        assert_eq!(strip_blocker_tokens("- Which database?"), "Which database?");
    }

    #[test]
    fn questions_blockers_check_fails_on_surviving_blocker() {
        let mut plan = empty_plan();
        plan.meta.questions_blockers_raw = vec!["- Which database?".to_string()];
        let check = check_questions_blockers(&plan);
        assert_eq!(check.status, CheckStatus::Fail);
        assert!(check.detail.contains("Which database?"));
    }

    #[test]
    fn questions_blockers_check_passes_when_all_resolved() {
        let mut plan = empty_plan();
        plan.meta.questions_blockers_raw = vec!["- None".to_string(), "- n/a".to_string()];
        let check = check_questions_blockers(&plan);
        assert_eq!(check.status, CheckStatus::Pass);
    }

    #[test]
    fn batch_quality_warns_without_output_validation() {
        let check = check_batch_quality_advisory("Run the nightly batch pipeline over all repos.");
        assert_eq!(check.status, CheckStatus::Warn);
    }

    #[test]
    fn batch_quality_passes_with_output_dir_mentioned() {
        let check = check_batch_quality_advisory("Run the nightly batch job and write to OUTPUT_DIR.");
        assert_eq!(check.status, CheckStatus::Pass);
    }

    #[tokio::test]
    async fn budget_check_warns_when_mentioned_but_unconfigured() {
        let config = OrchestratorConfig {
            task_monitor_api_url: None,
            task_monitor_enabled: true,
            scheduler_home: "/tmp".into(),
            orchestrate_state_dir: "/tmp".into(),
            switchboard_port: 8787,
            switchboard_url: "http://127.0.0.1:8787".to_string(),
            switchboard_ws: "ws://127.0.0.1:8787/ws".to_string(),
            agent_name: None,
            output_dir: None,
            output_pattern: None,
            sample_size: 5,
            quality_gate_timeout: std::time::Duration::from_secs(600),
            quality_gate_disabled: false,
            budget_check_program: None,
        };
        let check = check_budget("we will call the llm for this batch", &config).await;
        assert_eq!(check.status, CheckStatus::Warn);
    }
}
