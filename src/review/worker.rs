use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::models::{Decision, IssueDraft, ReviewType};
use crate::store;

/// Inputs for one reviewer invocation. Model and timeout are derived from
/// the review type by the dispatcher.
#[derive(Debug, Clone)]
pub struct ReviewJob {
    pub review_id: i64,
    pub branch: String,
    pub base_branch: String,
    pub commit_sha: String,
    pub review_type: ReviewType,
    pub model: String,
    pub timeout: Duration,
    pub reviewer_cmd: String,
    pub workdir: PathBuf,
    /// Root for the scratch config dir the child gets as HOME, so it never
    /// sees the operator's hooks or session state.
    pub home_root: PathBuf,
}

/// Structured result the reviewer prints as its final stdout line.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub decision: Decision,
    pub summary: String,
    pub issues: Vec<IssueDraft>,
    pub files_reviewed: i64,
    pub lines_analyzed: i64,
    pub cost_usd: f64,
}

#[derive(Debug)]
pub enum WorkerExit {
    Finished(WorkerOutcome),
    Failed(String),
    Cancelled,
}

/// Slot handle for the single in-flight worker of a review. Dropping the
/// handle without signalling leaves the worker running to completion.
pub struct WorkerHandle {
    cancel: Option<oneshot::Sender<()>>,
    pub started_at: String,
}

impl WorkerHandle {
    pub fn signal_stop(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

/// Spawn the reviewer subprocess on its own task. `on_exit` receives the
/// exit, the start stamp, and the wall-clock duration; the review actor
/// uses it to send itself the terminal signal.
pub fn spawn_worker(
    job: ReviewJob,
    on_exit: impl FnOnce(WorkerExit, String, i64) + Send + 'static,
) -> WorkerHandle {
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let started_at = store::now();
    let stamp = started_at.clone();

    tokio::spawn(async move {
        let started = Instant::now();
        let exit = run_reviewer(&job, cancel_rx).await;
        on_exit(exit, stamp, started.elapsed().as_millis() as i64);
    });

    WorkerHandle {
        cancel: Some(cancel_tx),
        started_at,
    }
}

async fn run_reviewer(job: &ReviewJob, cancel_rx: oneshot::Receiver<()>) -> WorkerExit {
    let scratch = job.home_root.join(format!("review-{}", job.review_id));
    if let Err(e) = std::fs::create_dir_all(&scratch) {
        return WorkerExit::Failed(format!("create scratch home: {e}"));
    }

    let mut cmd = Command::new(&job.reviewer_cmd);
    cmd.arg("--branch")
        .arg(&job.branch)
        .arg("--base")
        .arg(&job.base_branch)
        .arg("--commit")
        .arg(&job.commit_sha)
        .arg("--type")
        .arg(job.review_type.as_str())
        .arg("--model")
        .arg(&job.model)
        .current_dir(&job.workdir)
        .env("HOME", &scratch)
        .env("REVIEWER_NO_SESSION", "1")
        .env_remove("REVIEWER_HOOKS_DIR")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return WorkerExit::Failed(format!("spawn {}: {e}", job.reviewer_cmd)),
    };

    let wait = child.wait_with_output();
    tokio::pin!(wait);

    tokio::select! {
        output = &mut wait => match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                match parse_report(&stdout) {
                    Ok(outcome) => WorkerExit::Finished(outcome),
                    Err(reason) => WorkerExit::Failed(reason),
                }
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                WorkerExit::Failed(format!(
                    "reviewer exited with {}: {}",
                    output.status,
                    stderr.chars().take(500).collect::<String>()
                ))
            }
            Err(e) => WorkerExit::Failed(format!("wait on reviewer: {e}")),
        },
        _ = cancel_rx => WorkerExit::Cancelled,
        _ = tokio::time::sleep(job.timeout) => {
            WorkerExit::Failed(format!("reviewer timed out after {:?}", job.timeout))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReviewerReport {
    decision: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    issues: Vec<IssueDraft>,
    #[serde(default)]
    files_reviewed: i64,
    #[serde(default)]
    lines_analyzed: i64,
    #[serde(default)]
    cost_usd: f64,
}

/// The reviewer's report is the last non-empty stdout line, as JSON.
/// Anything before it is progress noise.
fn parse_report(stdout: &str) -> Result<WorkerOutcome, String> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| "reviewer produced no output".to_string())?;
    let report: ReviewerReport =
        serde_json::from_str(line.trim()).map_err(|e| format!("bad reviewer report: {e}"))?;
    let decision = Decision::parse(&report.decision)
        .ok_or_else(|| format!("unknown decision {:?}", report.decision))?;
    Ok(WorkerOutcome {
        decision,
        summary: report.summary,
        issues: report.issues,
        files_reviewed: report.files_reviewed,
        lines_analyzed: report.lines_analyzed,
        cost_usd: report.cost_usd,
    })
}
