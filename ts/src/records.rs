//! Row types exchanged with the telemetry store.

use serde::{Deserialize, Serialize};

/// One row of `task_executions`. Immutable once written (§3 TaskExecutionRecord).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionRecord {
    pub plan_file: String,
    pub run_index: i64,
    pub task_number: String,
    pub task_name: String,
    pub agent: String,
    pub prompt: String,
    pub success: bool,
    pub attempt: u32,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub duration_secs: f64,
    pub qc_verdict: Option<String>,
    pub qc_feedback: Option<String>,
    pub created_at: String,
}

/// A `task_executions` row as read back, with its assigned id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTaskExecution {
    pub id: i64,
    #[serde(flatten)]
    pub record: TaskExecutionRecord,
}

/// Behavioural session metrics, foreign-keyed to a task execution (§3 BehavioralSession).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralSession {
    pub task_execution_id: i64,
    pub started_at: String,
    pub ended_at: String,
    pub tool_call_count: u32,
    pub shell_command_count: u32,
    pub file_op_count: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub context_window_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool_name: String,
    pub started_at: String,
    pub duration_ms: i64,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BashCommand {
    pub command: String,
    pub exit_code: Option<i32>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOperation {
    pub op_kind: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageSnapshot {
    pub snapshot_at: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub context_pct: f64,
}

/// Aggregate stats returned by `GetSummaryStats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_executions: i64,
    pub successful: i64,
    pub failed: i64,
    pub avg_duration_secs: f64,
}

/// Aggregate stats returned by `GetAgentTypeStats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTypeStats {
    pub agent: String,
    pub total: i64,
    pub successful: i64,
}

/// Aggregate stats returned by `GetToolStats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStats {
    pub tool_name: String,
    pub calls: i64,
    pub successes: i64,
}

/// Aggregate stats returned by `GetBashStats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BashStats {
    pub total_commands: i64,
    pub failed_commands: i64,
}

/// A page of recent behavioural sessions, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentSession {
    pub session: BehavioralSession,
    pub task_number: String,
    pub plan_file: String,
}

/// Pagination parameters shared by every read query (§4.9).
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}
