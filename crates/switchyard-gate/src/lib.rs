//! Quality-gate runner (spec.md §4.D).
//!
//! Wraps the external verifier program as `<verifier> [test-id]`, cwd'd at
//! the repository root, and classifies its exit code. The cancellable-wait
//! shape mirrors `tandem-tools::BashTool::execute_with_cancel`
//! (`tokio::select!` over the child future and a `CancellationToken`),
//! generalized here to also race a hard wall-clock timeout.

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use switchyard_types::DodSpec;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Pass,
    /// Verifier exited 3 — the sentinel "skip" value some ecosystems use.
    SkipRejected,
    Fail { detail: String },
    Cancelled,
}

impl GateOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateOutcome::Pass)
    }
}

#[derive(Debug, Clone)]
pub struct OutputQualityConfig {
    pub output_dir: Option<PathBuf>,
    pub pattern: String,
    pub sample_size: usize,
}

impl Default for OutputQualityConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            pattern: "*.md".to_string(),
            sample_size: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFlag {
    WrongFormat,
    Empty,
    SuspiciouslySmall,
}

impl OutputFlag {
    /// Wrong-format and empty files indicate the verifier's own output is
    /// broken; a small file is merely suspicious, so only those two are
    /// critical (spec.md §4.D "one critical flag → fail the task; warnings
    /// surface but do not fail" — the spec names the three flags but not
    /// which are critical; this is the Open Question resolution recorded
    /// in DESIGN.md).
    pub fn is_critical(&self) -> bool {
        !matches!(self, OutputFlag::SuspiciouslySmall)
    }
}

#[derive(Debug, Clone)]
pub struct OutputQualityReport {
    pub sampled: usize,
    pub flags: Vec<(PathBuf, OutputFlag)>,
}

impl OutputQualityReport {
    pub fn has_critical(&self) -> bool {
        self.flags.iter().any(|(_, f)| f.is_critical())
    }
}

/// Default grace window between the soft and hard kill of the verifier
/// subprocess, matching `switchyard-exec`'s `ExecutorConfig::DEFAULT_KILL_GRACE`.
pub const DEFAULT_KILL_GRACE: std::time::Duration = std::time::Duration::from_secs(10);

/// Runs the verifier against `repo_root`. `dod` selects single-test mode;
/// `None` runs the whole suite (no argument). `kill_grace` bounds how long
/// the verifier subprocess is given to exit after a soft kill before a hard
/// kill is issued, on both timeout and cancellation (spec.md §5: "Workers
/// propagate cancellation into the verifier sub-call").
pub async fn run_gate(
    verifier_program: &Path,
    repo_root: &Path,
    dod: Option<&DodSpec>,
    timeout: std::time::Duration,
    output_quality: &OutputQualityConfig,
    cancel: &CancellationToken,
    kill_grace: std::time::Duration,
) -> anyhow::Result<GateOutcome> {
    let mut command = Command::new(verifier_program);
    command.current_dir(repo_root);
    if let Some(dod) = dod {
        command.arg(&dod.test);
    }
    if let Some(dir) = &output_quality.output_dir {
        command.env("OUTPUT_DIR", dir);
    }
    command.env("OUTPUT_PATTERN", &output_quality.pattern);
    command.env("SAMPLE_SIZE", output_quality.sample_size.to_string());
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());

    let mut child = command.spawn()?;
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let stdout_handle = tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        if let Some(out) = stdout_pipe.as_mut() {
            let _ = out.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_handle = tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        if let Some(err) = stderr_pipe.as_mut() {
            let _ = err.read_to_end(&mut buf).await;
        }
        buf
    });

    let wait_outcome = tokio::select! {
        _ = cancel.cancelled() => {
            terminate_with_grace(&mut child, kill_grace).await;
            stdout_handle.abort();
            stderr_handle.abort();
            return Ok(GateOutcome::Cancelled);
        }
        res = tokio::time::timeout(timeout, child.wait()) => res,
    };

    match wait_outcome {
        Err(_elapsed) => {
            terminate_with_grace(&mut child, kill_grace).await;
            stdout_handle.abort();
            stderr_handle.abort();
            Ok(GateOutcome::Fail {
                detail: format!("verifier exceeded quality-gate timeout of {:?}", timeout),
            })
        }
        Ok(Err(e)) => {
            stdout_handle.abort();
            stderr_handle.abort();
            Ok(GateOutcome::Fail {
                detail: format!("failed to run verifier: {e}"),
            })
        }
        Ok(Ok(status)) => {
            let stdout = stdout_handle.await.unwrap_or_default();
            let stderr = stderr_handle.await.unwrap_or_default();
            let output = std::process::Output { status, stdout, stderr };
            Ok(classify(&output, output_quality).await)
        }
    }
}

/// Sends a kill request to the verifier subprocess, then waits up to `grace`
/// for it to exit, retrying the kill once if it hasn't — the same
/// soft-terminate-then-hard-kill shape `switchyard-exec::terminate_with_grace`
/// uses for the agent subprocess (spec.md §4.G/§5).
async fn terminate_with_grace(child: &mut tokio::process::Child, grace: std::time::Duration) {
    let _ = child.start_kill();
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!("verifier subprocess did not exit within grace period, forcing kill");
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

async fn classify(output: &std::process::Output, output_quality: &OutputQualityConfig) -> GateOutcome {
    match output.status.code() {
        Some(0) => {
            if let Some(report) = sample_output_dir(output_quality).await {
                if report.has_critical() {
                    return GateOutcome::Fail {
                        detail: format!(
                            "output-quality sampling flagged {} of {} sampled file(s)",
                            report.flags.len(),
                            report.sampled
                        ),
                    };
                }
                for (path, flag) in &report.flags {
                    warn!(path = %path.display(), flag = ?flag, "output-quality advisory flag");
                }
            }
            GateOutcome::Pass
        }
        Some(3) => GateOutcome::SkipRejected,
        other => {
            let stderr_tail = tail(&output.stderr, 2000);
            GateOutcome::Fail {
                detail: format!("verifier exited {other:?}: {stderr_tail}"),
            }
        }
    }
}

fn tail(bytes: &[u8], max_len: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max_len {
        text.to_string()
    } else {
        text[text.len() - max_len..].to_string()
    }
}

/// Advisory sub-check: when `OUTPUT_DIR` is configured, sample up to
/// `sample_size` random files matching `pattern` and flag anything that
/// looks like a broken output file.
async fn sample_output_dir(config: &OutputQualityConfig) -> Option<OutputQualityReport> {
    let dir = config.output_dir.as_ref()?;
    let pattern = dir.join(&config.pattern);
    let glob_pattern = pattern.to_string_lossy().to_string();
    let candidates: Vec<PathBuf> = glob::glob(&glob_pattern)
        .ok()?
        .filter_map(|p| p.ok())
        .collect();
    if candidates.is_empty() {
        return Some(OutputQualityReport {
            sampled: 0,
            flags: Vec::new(),
        });
    }

    let mut rng = rand::thread_rng();
    let mut shuffled = candidates;
    shuffled.shuffle(&mut rng);
    let sample: Vec<PathBuf> = shuffled.into_iter().take(config.sample_size).collect();

    let mut flags = Vec::new();
    for path in &sample {
        if let Ok(metadata) = tokio::fs::metadata(path).await {
            if metadata.len() == 0 {
                flags.push((path.clone(), OutputFlag::Empty));
                continue;
            }
            if metadata.len() < 100 {
                flags.push((path.clone(), OutputFlag::SuspiciouslySmall));
                continue;
            }
        }
        if let Ok(bytes) = tokio::fs::read(path).await {
            if let Some(&first) = bytes.iter().find(|b| !b.is_ascii_whitespace()) {
                if first == b'{' || first == b'[' {
                    flags.push((path.clone(), OutputFlag::WrongFormat));
                }
            }
        }
    }

    Some(OutputQualityReport {
        sampled: sample.len(),
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
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

    #[tokio::test]
    async fn exit_zero_is_pass() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "verifier.sh", "exit 0");
        let cancel = CancellationToken::new();
        let outcome = run_gate(
            &script,
            dir.path(),
            None,
            std::time::Duration::from_secs(5),
            &OutputQualityConfig::default(),
            &cancel,
            DEFAULT_KILL_GRACE,
        )
        .await
        .unwrap();
        assert_eq!(outcome, GateOutcome::Pass);
    }

    #[tokio::test]
    async fn exit_three_is_skip_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "verifier.sh", "exit 3");
        let cancel = CancellationToken::new();
        let outcome = run_gate(
            &script,
            dir.path(),
            None,
            std::time::Duration::from_secs(5),
            &OutputQualityConfig::default(),
            &cancel,
            DEFAULT_KILL_GRACE,
        )
        .await
        .unwrap();
        assert_eq!(outcome, GateOutcome::SkipRejected);
    }

    #[tokio::test]
    async fn nonzero_exit_is_fail_with_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "verifier.sh", "echo boom 1>&2; exit 1");
        let cancel = CancellationToken::new();
        let outcome = run_gate(
            &script,
            dir.path(),
            None,
            std::time::Duration::from_secs(5),
            &OutputQualityConfig::default(),
            &cancel,
            DEFAULT_KILL_GRACE,
        )
        .await
        .unwrap();
        match outcome {
            GateOutcome::Fail { detail } => assert!(detail.contains("boom")),
            other => panic!("expected Fail, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dod_test_id_is_passed_as_argument() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "verifier.sh", "test \"$1\" = \"tests/x.py::test_y\" && exit 0 || exit 1");
        let dod = DodSpec {
            test: "tests/x.py::test_y".to_string(),
            assertion: None,
        };
        let cancel = CancellationToken::new();
        let outcome = run_gate(
            &script,
            dir.path(),
            Some(&dod),
            std::time::Duration::from_secs(5),
            &OutputQualityConfig::default(),
            &cancel,
            DEFAULT_KILL_GRACE,
        )
        .await
        .unwrap();
        assert_eq!(outcome, GateOutcome::Pass);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn cancellation_kills_the_verifier_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("pid");
        let script = write_script(
            dir.path(),
            "verifier.sh",
            &format!("echo $$ > {}\nsleep 30", pidfile.display()),
        );
        let cancel = CancellationToken::new();
        let cancel_later = cancel.clone();
        tokio::spawn(async move {
            // Give the shell script time to write its pid before cancelling.
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            cancel_later.cancel();
        });
        let outcome = run_gate(
            &script,
            dir.path(),
            None,
            std::time::Duration::from_secs(30),
            &OutputQualityConfig::default(),
            &cancel,
            std::time::Duration::from_millis(200),
        )
        .await
        .unwrap();
        assert_eq!(outcome, GateOutcome::Cancelled);

        let pid = std::fs::read_to_string(&pidfile).unwrap();
        let pid = pid.trim();
        assert!(!pid.is_empty(), "verifier never started");
        assert!(
            !std::path::Path::new(&format!("/proc/{pid}")).exists(),
            "verifier subprocess was not killed on cancellation"
        );
    }

    #[tokio::test]
    async fn empty_output_file_is_critical_flag() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(out_dir.join("report.md"), "").unwrap();

        let config = OutputQualityConfig {
            output_dir: Some(out_dir),
            pattern: "*.md".to_string(),
            sample_size: 5,
        };
        let report = sample_output_dir(&config).await.unwrap();
        assert!(report.has_critical());
        assert_eq!(report.flags[0].1, OutputFlag::Empty);
    }

    #[tokio::test]
    async fn small_output_file_is_warning_only() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(out_dir.join("report.md"), "tiny").unwrap();

        let config = OutputQualityConfig {
            output_dir: Some(out_dir),
            pattern: "*.md".to_string(),
            sample_size: 5,
        };
        let report = sample_output_dir(&config).await.unwrap();
        assert!(!report.has_critical());
        assert_eq!(report.flags[0].1, OutputFlag::SuspiciouslySmall);
    }
}
