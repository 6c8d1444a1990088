//! Result types produced while executing a plan (spec.md §3).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Terminal status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
    Skipped,
    Paused,
    Aborted,
}

/// Machine-readable failure category, present when `status` is `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SpawnError,
    NonZeroExit,
    QcFail,
    Timeout,
}

/// QC verdict (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Unknown,
}

/// Structured output of one quality-control pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcOutcome {
    pub verdict: Verdict,
    pub feedback: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Outcome of running one task to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_number: String,
    pub status: TaskStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub qc_verdict: Option<Verdict>,
    pub attempts: u32,
    pub error_kind: Option<ErrorKind>,
}

impl TaskResult {
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self.status, TaskStatus::Failed | TaskStatus::Aborted)
    }
}

/// Aggregate result of one plan run (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_index: i64,
    pub status: RunStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub duration: Duration,
    pub failed_tasks: Vec<TaskResult>,
    /// Populated when `status == Paused`.
    pub pause_session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
    Paused,
    Cancelled,
}
