//! Session state store (spec.md §4.C).
//!
//! A session's mutable record lives at `<state_dir>/<session_id>.state.json`.
//! Every mutation goes through [`StateStore::save`], which writes to a sibling
//! temp file and renames it over the live file — readers always see either
//! the old or the new file, never a torn one. Mirrors the atomic-write idiom
//! in the teacher's `orchestrator::store::atomic_write`, strengthened to
//! write into the session directory itself (rather than in place) so a crash
//! mid-write can never leave a half-written state file on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use switchyard_types::{
    OrchestratorError, SessionState, SessionStatus, TaskAttempt, TaskPlan, TaskStatus,
};
use tracing::{info, warn};
use uuid::Uuid;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Handle onto a single session's on-disk state. The session driver is the
/// only writer; workers report results back through it rather than mutating
/// `SessionState` directly (spec.md §5 "Shared-resource policy").
pub struct StateStore {
    state_dir: PathBuf,
    session_id: String,
}

impl StateStore {
    fn path_for(state_dir: &Path, session_id: &str) -> PathBuf {
        state_dir.join(format!("{session_id}.state.json"))
    }

    /// Creates a fresh session for `plan` under `state_dir`, generating a new
    /// 128-bit random session id unless `session_id` is supplied (used by
    /// tests and by any caller re-deriving a known id).
    pub async fn create(
        state_dir: &Path,
        plan: &TaskPlan,
        session_id: Option<String>,
    ) -> Result<(Self, SessionState), OrchestratorError> {
        tokio::fs::create_dir_all(state_dir).await?;
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let state = SessionState {
            session_id: session_id.clone(),
            plan_checksum: plan.meta.source_checksum.clone(),
            tasks: HashMap::new(),
            current_group: 0,
            created_at_ms: now_ms(),
            status: SessionStatus::Running,
        };

        let store = Self {
            state_dir: state_dir.to_path_buf(),
            session_id,
        };
        store.save(&state).await?;
        Ok((store, state))
    }

    /// Loads an existing session's state. Demotes any task observed `running`
    /// back to `pending` (spec.md §4.C: "on resume, any task observed in
    /// running is demoted to pending — the previous worker is dead").
    pub async fn load(state_dir: &Path, session_id: &str) -> Result<(Self, SessionState), OrchestratorError> {
        let path = Self::path_for(state_dir, session_id);
        let bytes = tokio::fs::read(&path).await.map_err(|e| OrchestratorError::StateCorrupt {
            path: path.display().to_string(),
            detail: format!("unreadable: {e}"),
        })?;
        let mut state: SessionState =
            serde_json::from_slice(&bytes).map_err(|e| OrchestratorError::StateCorrupt {
                path: path.display().to_string(),
                detail: format!("invalid JSON: {e}"),
            })?;

        let mut demoted = 0usize;
        for attempt in state.tasks.values_mut() {
            if attempt.status == TaskStatus::Running {
                attempt.status = TaskStatus::Pending;
                demoted += 1;
            }
        }
        if demoted > 0 {
            info!(demoted, session_id, "demoted running tasks to pending on resume");
        }

        let store = Self {
            state_dir: state_dir.to_path_buf(),
            session_id: session_id.to_string(),
        };
        if demoted > 0 {
            store.save(&state).await?;
        }
        Ok((store, state))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> PathBuf {
        Self::path_for(&self.state_dir, &self.session_id)
    }

    /// Atomically replaces the session file: serialise, write to a sibling
    /// `.tmp-<uuid>` file, then rename over the live path.
    pub async fn save(&self, state: &SessionState) -> Result<(), OrchestratorError> {
        let path = self.path();
        let tmp_path = self
            .state_dir
            .join(format!(".{}.tmp-{}", self.session_id, Uuid::new_v4().simple()));
        let body = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    pub async fn mark_running(&self, state: &mut SessionState, task_id: &str) -> Result<(), OrchestratorError> {
        let attempt = state.tasks.entry(task_id.to_string()).or_default();
        attempt.status = TaskStatus::Running;
        attempt.started_at_ms = Some(now_ms());
        self.save(state).await
    }

    pub async fn mark_passed(&self, state: &mut SessionState, task_id: &str) -> Result<(), OrchestratorError> {
        let attempt = state.tasks.entry(task_id.to_string()).or_default();
        attempt.status = TaskStatus::Passed;
        attempt.finished_at_ms = Some(now_ms());
        attempt.last_error = None;
        self.save(state).await
    }

    pub async fn mark_failed(
        &self,
        state: &mut SessionState,
        task_id: &str,
        err_msg: &str,
        attempt_no: u32,
    ) -> Result<(), OrchestratorError> {
        let attempt = state.tasks.entry(task_id.to_string()).or_default();
        attempt.status = TaskStatus::Failed;
        attempt.finished_at_ms = Some(now_ms());
        attempt.attempt_count = attempt_no;
        attempt.last_error = Some(err_msg.to_string());
        self.save(state).await
    }

    pub async fn mark_skipped(&self, state: &mut SessionState, task_id: &str) -> Result<(), OrchestratorError> {
        let attempt = state.tasks.entry(task_id.to_string()).or_default();
        attempt.status = TaskStatus::Skipped;
        self.save(state).await
    }

    pub async fn record_attempt(&self, state: &mut SessionState, task_id: &str, attempt_no: u32) -> Result<(), OrchestratorError> {
        let attempt = state.tasks.entry(task_id.to_string()).or_default();
        attempt.attempt_count = attempt_no;
        self.save(state).await
    }

    pub async fn advance_group(&self, state: &mut SessionState, group: u32) -> Result<(), OrchestratorError> {
        state.current_group = group;
        self.save(state).await
    }

    pub async fn pause(&self, state: &mut SessionState) -> Result<(), OrchestratorError> {
        state.status = SessionStatus::Paused;
        self.save(state).await
    }

    pub async fn complete(&self, state: &mut SessionState) -> Result<(), OrchestratorError> {
        state.status = SessionStatus::Completed;
        self.save(state).await
    }

    pub async fn fail(&self, state: &mut SessionState) -> Result<(), OrchestratorError> {
        state.status = SessionStatus::Failed;
        self.save(state).await
    }

    /// Lists every `*.state.json` session file under `state_dir`, most
    /// recently modified first — used by `orchestrate status`.
    pub async fn list_sessions(state_dir: &Path) -> Result<Vec<SessionState>, OrchestratorError> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(state_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".state.json") || name.starts_with('.') {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<SessionState>(&bytes) {
                    Ok(state) => out.push(state),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt session file"),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read session file"),
            }
        }
        out.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        Ok(out)
    }

    /// Returns the most recently created non-terminal (running/paused)
    /// session id, used by `orchestrate resume` with no argument.
    pub async fn most_recent_resumable(state_dir: &Path) -> Result<Option<String>, OrchestratorError> {
        let sessions = Self::list_sessions(state_dir).await?;
        Ok(sessions
            .into_iter()
            .find(|s| !s.is_terminal())
            .map(|s| s.session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::TaskPlanMeta;

    fn empty_plan() -> TaskPlan {
        TaskPlan {
            tasks: vec![],
            meta: TaskPlanMeta {
                source_checksum: "abc123".to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn create_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let plan = empty_plan();
        let (store, state) = StateStore::create(dir.path(), &plan, Some("sess-1".to_string()))
            .await
            .unwrap();
        assert_eq!(state.plan_checksum, "abc123");
        assert!(store.path().exists());

        let (_store2, loaded) = StateStore::load(dir.path(), "sess-1").await.unwrap();
        assert_eq!(loaded.session_id, "sess-1");
        assert_eq!(loaded.plan_checksum, "abc123");
    }

    #[tokio::test]
    async fn resume_demotes_running_to_pending() {
        let dir = tempfile::tempdir().unwrap();
        let plan = empty_plan();
        let (store, mut state) = StateStore::create(dir.path(), &plan, Some("sess-2".to_string()))
            .await
            .unwrap();
        store.mark_running(&mut state, "1").await.unwrap();
        assert_eq!(state.task_status("1"), TaskStatus::Running);

        let (_store2, reloaded) = StateStore::load(dir.path(), "sess-2").await.unwrap();
        assert_eq!(reloaded.task_status("1"), TaskStatus::Pending);
    }

    #[tokio::test]
    async fn mark_passed_then_failed_updates_status_and_error() {
        let dir = tempfile::tempdir().unwrap();
        let plan = empty_plan();
        let (store, mut state) = StateStore::create(dir.path(), &plan, Some("sess-3".to_string()))
            .await
            .unwrap();
        store.mark_passed(&mut state, "1").await.unwrap();
        assert_eq!(state.task_status("1"), TaskStatus::Passed);

        store.mark_failed(&mut state, "2", "boom", 2).await.unwrap();
        assert_eq!(state.task_status("2"), TaskStatus::Failed);
        assert_eq!(state.tasks["2"].attempt_count, 2);
        assert_eq!(state.tasks["2"].last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn load_of_missing_session_is_state_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let err = StateStore::load(dir.path(), "nonexistent").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::StateCorrupt { .. }));
    }

    #[tokio::test]
    async fn most_recent_resumable_skips_terminal_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let plan = empty_plan();
        let (store_a, mut state_a) =
            StateStore::create(dir.path(), &plan, Some("sess-a".to_string())).await.unwrap();
        store_a.complete(&mut state_a).await.unwrap();

        let (store_b, mut state_b) =
            StateStore::create(dir.path(), &plan, Some("sess-b".to_string())).await.unwrap();
        store_b.pause(&mut state_b).await.unwrap();

        let resumable = StateStore::most_recent_resumable(dir.path()).await.unwrap();
        assert_eq!(resumable.as_deref(), Some("sess-b"));
    }
}
