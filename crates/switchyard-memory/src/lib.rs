//! Memory bridge (spec.md §4.E).
//!
//! Speaks a fixed child-process contract with an external recall/learn
//! program (`<memory-program> recall --q "<query>"` / `learn --problem
//! --solution`); the storage and embedding backend behind that program is
//! the non-goal collaborator (teacher's own backend lives in
//! `tandem-memory::manager`, which this bridge mirrors only at the
//! method-shape level — `recall` ~ `MemoryManager::search`, `learn` ~
//! `MemoryManager::store_message`). Failures never block task execution:
//! every call is logged and swallowed, matching spec.md's "the bridge never
//! blocks execution on recall failure."

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalledItem {
    pub problem: String,
    pub solution: String,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RecallResponse {
    #[serde(default)]
    items: Vec<RecalledItem>,
    #[serde(default)]
    #[allow(dead_code)]
    found: bool,
}

const PREAMBLE_HEADER: &str = "Memory Recall (Prior Solutions Found)";
const SEPARATOR: &str = "---";

/// Calls `<memory_program> recall --q "<query>"` and returns the recalled
/// items, or an empty list on any failure (non-fatal per spec.md §4.E).
pub async fn recall(memory_program: &Path, query: &str) -> Vec<RecalledItem> {
    let output = match Command::new(memory_program)
        .arg("recall")
        .arg("--q")
        .arg(query)
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "memory bridge: recall invocation failed");
            return Vec::new();
        }
    };

    if !output.status.success() {
        warn!(
            code = ?output.status.code(),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "memory bridge: recall exited non-zero"
        );
        return Vec::new();
    }

    match serde_json::from_slice::<RecallResponse>(&output.stdout) {
        Ok(parsed) => parsed.items,
        Err(e) => {
            warn!(error = %e, "memory bridge: recall returned unparseable JSON");
            Vec::new()
        }
    }
}

/// Calls `<memory_program> learn --problem "<p>" --solution "<s>"`. Failures
/// are logged and swallowed; the caller never awaits a meaningful result.
pub async fn learn(memory_program: &Path, problem: &str, solution: &str) {
    match Command::new(memory_program)
        .arg("learn")
        .arg("--problem")
        .arg(problem)
        .arg("--solution")
        .arg(solution)
        .status()
        .await
    {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(code = ?status.code(), "memory bridge: learn exited non-zero"),
        Err(e) => warn!(error = %e, "memory bridge: learn invocation failed"),
    }
}

/// Builds the prompt sent to the agent subprocess: unchanged when `items`
/// is empty, otherwise prefixed with the canonical preamble (spec.md §4.E).
pub fn compose_prompt(task_body: &str, items: &[RecalledItem]) -> String {
    if items.is_empty() {
        return task_body.to_string();
    }

    let mut preamble = String::new();
    preamble.push_str(PREAMBLE_HEADER);
    preamble.push('\n');
    for (idx, item) in items.iter().enumerate() {
        preamble.push_str(&format!(
            "{}. Problem: {}\n   Solution: {}\n",
            idx + 1,
            item.problem,
            item.solution
        ));
    }
    preamble.push_str(SEPARATOR);
    preamble.push('\n');
    preamble.push_str(task_body);
    preamble
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
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

    #[test]
    fn compose_prompt_is_unchanged_when_no_items() {
        let prompt = compose_prompt("do the thing", &[]);
        assert_eq!(prompt, "do the thing");
    }

    #[test]
    fn compose_prompt_prepends_preamble_when_items_present() {
        let items = vec![RecalledItem {
            problem: "flaky test".to_string(),
            solution: "add a retry".to_string(),
            extra: serde_json::json!({}),
        }];
        let prompt = compose_prompt("fix the build", &items);
        assert!(prompt.starts_with(PREAMBLE_HEADER));
        assert!(prompt.contains("flaky test"));
        assert!(prompt.contains(SEPARATOR));
        assert!(prompt.ends_with("fix the build"));
    }

    #[tokio::test]
    async fn recall_parses_items_from_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "memory.sh",
            r#"echo '{"found": true, "items": [{"problem": "p", "solution": "s"}]}'"#,
        );
        let items = recall(&script, "some query").await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].problem, "p");
    }

    #[tokio::test]
    async fn recall_returns_empty_on_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "memory.sh", "exit 1");
        let items = recall(&script, "some query").await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn recall_returns_empty_on_missing_program() {
        let items = recall(Path::new("/nonexistent/memory-bin"), "q").await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn learn_does_not_panic_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "memory.sh", "exit 1");
        learn(&script, "p", "s").await;
    }
}
