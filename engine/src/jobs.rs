//! On-disk job registry shared with an external cron-style scheduler
//! (spec.md §6): `<scheduler_home>/jobs.json` maps job name → job record.
//! The orchestrator only ever writes this file — it never reads it back to
//! drive execution, matching spec.md §1's non-goal framing of the
//! scheduler as an external collaborator.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use switchyard_types::OrchestratorConfig;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRecord {
    name: String,
    cron: String,
    command: String,
    workdir: String,
    enabled: bool,
    description: String,
    created_at: String,
}

async fn load_registry(path: &Path) -> BTreeMap<String, JobRecord> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => BTreeMap::new(),
    }
}

async fn save_registry(path: &Path, registry: &BTreeMap<String, JobRecord>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    let body = serde_json::to_vec_pretty(registry)?;
    tokio::fs::write(&tmp_path, &body).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

fn job_name(task_file: &Path) -> String {
    task_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("job")
        .to_string()
}

pub async fn schedule(task_file: &Path, cron: &str, config: &OrchestratorConfig) -> i32 {
    let registry_path = config.scheduler_home.join("jobs.json");
    let mut registry = load_registry(&registry_path).await;

    let name = job_name(task_file);
    let workdir = std::env::current_dir().unwrap_or_default();
    registry.insert(
        name.clone(),
        JobRecord {
            name: name.clone(),
            cron: cron.to_string(),
            command: format!("orchestrate run {}", task_file.display()),
            workdir: workdir.display().to_string(),
            enabled: true,
            description: format!("scheduled run of {}", task_file.display()),
            created_at: chrono::Utc::now().to_rfc3339(),
        },
    );

    match save_registry(&registry_path, &registry).await {
        Ok(()) => {
            info!(job = %name, cron, "registered recurring job");
            0
        }
        Err(e) => {
            error!(error = %e, "failed to write job registry");
            70
        }
    }
}

pub async fn unschedule(task_file: &Path, config: &OrchestratorConfig) -> i32 {
    let registry_path = config.scheduler_home.join("jobs.json");
    let mut registry = load_registry(&registry_path).await;
    let name = job_name(task_file);

    if registry.remove(&name).is_none() {
        println!("no scheduled job found for {}", task_file.display());
        return 0;
    }

    match save_registry(&registry_path, &registry).await {
        Ok(()) => {
            info!(job = %name, "removed scheduled job");
            0
        }
        Err(e) => {
            error!(error = %e, "failed to write job registry");
            70
        }
    }
}
