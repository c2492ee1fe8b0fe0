//! Monitor client (spec.md §4.F).
//!
//! A thin `reqwest::Client` wrapper around the external task-monitor API.
//! Every call is best-effort: a failure is logged as a warning and the
//! orchestration run continues (spec.md: "failures produce a warning, never
//! abort"). The `.post(...).json(...).send().await` shape follows
//! `tandem-channels::dispatcher`'s own HTTP-call idiom.

use serde_json::{json, Value};
use switchyard_types::OrchestratorConfig;
use tracing::warn;

#[derive(Clone)]
pub struct MonitorClient {
    http: reqwest::Client,
    base_url: Option<String>,
    enabled: bool,
}

impl MonitorClient {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.task_monitor_api_url.clone(),
            enabled: config.task_monitor_enabled,
        }
    }

    fn endpoint(&self) -> Option<&str> {
        if self.enabled {
            self.base_url.as_deref()
        } else {
            None
        }
    }

    async fn post(&self, path: &str, body: Value) {
        let Some(base) = self.endpoint() else {
            return;
        };
        let url = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(status = %resp.status(), url, "monitor call returned non-success"),
            Err(e) => warn!(error = %e, url, "monitor call failed"),
        }
    }

    pub async fn register(&self, session_id: &str, plan_summary: Value) {
        self.post(
            "register",
            json!({ "sessionId": session_id, "plan": plan_summary }),
        )
        .await;
    }

    pub async fn update(&self, session_id: &str, task_id: &str, state: &str, counters: Value) {
        self.post(
            "update",
            json!({
                "sessionId": session_id,
                "taskId": task_id,
                "state": state,
                "counters": counters,
            }),
        )
        .await;
    }

    pub async fn complete(&self, session_id: &str, summary: Value) {
        self.post(
            "complete",
            json!({ "sessionId": session_id, "summary": summary }),
        )
        .await;
    }
}
