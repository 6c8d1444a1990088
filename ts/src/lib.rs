//! Execution telemetry store for Conductor.
//!
//! A single SQLite file records every task attempt (`task_executions`) and,
//! optionally, the behavioural session metrics an agent invocation produced
//! (`behavioral_sessions` and its child tables). Nothing in this crate
//! decides *when* to record; callers own that policy, this crate only
//! guarantees the write lands atomically and can be queried back.

mod error;
mod migrations;
mod records;
mod store;

pub use error::{StoreError, StoreResult};
pub use records::{
    AgentTypeStats, BashCommand, BashStats, BehavioralSession, FileOperation, Page, RecentSession, StoredTaskExecution,
    SummaryStats, TaskExecutionRecord, TokenUsageSnapshot, ToolExecution, ToolStats,
};
pub use store::Store;
