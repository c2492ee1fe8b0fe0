//! End-to-end scenarios driving the compiled `orchestrate` binary, the way
//! `tandem-server`'s own integration tests spin up the real HTTP server
//! rather than exercising handlers in isolation.

use std::process::Command;

fn write_task_file(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn write_script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }
    path
}

fn orchestrate(state_dir: &std::path::Path, cwd: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_orchestrate"));
    cmd.current_dir(cwd)
        .env("ORCHESTRATE_STATE_DIR", state_dir)
        .env("TASK_MONITOR_ENABLED", "false")
        .env("QUALITY_GATE_DISABLED", "false");
    cmd
}

const HAPPY_PATH: &str = r#"
## Tasks
- [ ] **Task 1**: Setup database
  - Agent: general-purpose
  - Parallel: 0
  - Dependencies: none
  - Definition of Done:
    - Test: tests/test_setup.py::test_schema_created
    - Assertion: tables x, y, z exist

- [ ] **Task 2**: Run migration
  - Agent: general-purpose
  - Parallel: 1
  - Dependencies: Task 1
  - Definition of Done:
    - Test: tests/test_migration.py::test_applied
    - Assertion: migration table has one row

## Questions/Blockers
None
"#;

#[test]
fn happy_path_session_completes_with_exit_zero() {
    let dir = tempfile::tempdir().unwrap();
    let task_file = write_task_file(dir.path(), "task.md", HAPPY_PATH);
    let agent = write_script(dir.path(), "agent.sh", "exit 0");
    let verifier = write_script(dir.path(), "verifier.sh", "exit 0");
    let state_dir = dir.path().join("state");
    std::fs::create_dir_all(dir.path().join("tests")).unwrap();
    std::fs::write(dir.path().join("tests/test_setup.py"), "").unwrap();
    std::fs::write(dir.path().join("tests/test_migration.py"), "").unwrap();

    let output = orchestrate(&state_dir, dir.path())
        .arg("run")
        .arg(&task_file)
        .arg("--agent-program")
        .arg(&agent)
        .arg("--verifier-program")
        .arg(&verifier)
        .arg("--repo-root")
        .arg(dir.path())
        .output()
        .expect("orchestrate run");

    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn preflight_block_exits_with_code_two() {
    // A surviving "Questions/Blockers" entry is a parser no-op but trips
    // pre-flight's own "questions_blockers_resolved" check.
    let source = r#"
## Tasks
- [ ] **Task 1**: Setup database
  - Agent: general-purpose
  - Parallel: 0
  - Dependencies: none
  - Definition of Done:
    - Test: tests/test_setup.py::test_schema_created
    - Assertion: tables x, y, z exist

## Questions/Blockers
- Unresolved: which database engine should task 1 target?
"#;
    let dir = tempfile::tempdir().unwrap();
    let task_file = write_task_file(dir.path(), "task.md", source);
    let agent = write_script(dir.path(), "agent.sh", "exit 0");
    let verifier = write_script(dir.path(), "verifier.sh", "exit 0");
    let state_dir = dir.path().join("state");
    std::fs::create_dir_all(dir.path().join("tests")).unwrap();
    std::fs::write(dir.path().join("tests/test_setup.py"), "").unwrap();

    let output = orchestrate(&state_dir, dir.path())
        .arg("run")
        .arg(&task_file)
        .arg("--agent-program")
        .arg(&agent)
        .arg("--verifier-program")
        .arg(&verifier)
        .arg("--repo-root")
        .arg(dir.path())
        .output()
        .expect("orchestrate run");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn failing_task_without_continue_on_error_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let task_file = write_task_file(dir.path(), "task.md", HAPPY_PATH);
    let agent = write_script(dir.path(), "agent.sh", "exit 0");
    let verifier = write_script(dir.path(), "verifier.sh", "exit 1");
    let state_dir = dir.path().join("state");
    std::fs::create_dir_all(dir.path().join("tests")).unwrap();
    std::fs::write(dir.path().join("tests/test_setup.py"), "").unwrap();
    std::fs::write(dir.path().join("tests/test_migration.py"), "").unwrap();

    let output = orchestrate(&state_dir, dir.path())
        .arg("run")
        .arg(&task_file)
        .arg("--agent-program")
        .arg(&agent)
        .arg("--verifier-program")
        .arg(&verifier)
        .arg("--repo-root")
        .arg(dir.path())
        .output()
        .expect("orchestrate run");

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn status_reports_no_sessions_on_a_fresh_state_dir() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().join("state");
    std::fs::create_dir_all(&state_dir).unwrap();

    let output = orchestrate(&state_dir, dir.path())
        .arg("status")
        .output()
        .expect("orchestrate status");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("no paused/failed/running sessions"));
}
