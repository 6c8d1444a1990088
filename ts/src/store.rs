//! The telemetry `Store`: a single SQLite file holding task execution and
//! behavioural-session history, opened once and shared by every component
//! that records or queries it (§4.9, §9 "centralise store ownership").

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::records::{
    AgentTypeStats, BashCommand, BashStats, BehavioralSession, FileOperation, Page, RecentSession, StoredTaskExecution,
    SummaryStats, TaskExecutionRecord, TokenUsageSnapshot, ToolExecution, ToolStats,
};

/// Handle to the telemetry store.
///
/// Writes funnel through a single mutex-guarded connection (§5 "the store
/// serialises writes internally"); reads open their own short-lived
/// connection in WAL mode so a long write never blocks a short read (§4.9,
/// §5 "a long write must not starve short reads").
pub struct Store {
    path: PathBuf,
    writer: Mutex<Connection>,
}

impl Store {
    /// Open (creating if absent) the telemetry store at `path`, applying any
    /// pending migrations.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }

        let mut conn = Connection::open(&path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        configure(&conn)?;
        migrations::run(&mut conn)?;

        debug!(?path, "Store::open: ready");
        Ok(Self {
            path,
            writer: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory() -> StoreResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        configure(&conn)?;
        migrations::run(&mut conn)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            writer: Mutex::new(conn),
        })
    }

    fn reader(&self) -> StoreResult<Connection> {
        if self.path.as_os_str() == ":memory:" {
            return Err(StoreError::Unavailable(
                "in-memory store has no independent reader connection; use the writer directly in tests".into(),
            ));
        }
        let conn = Connection::open(&self.path)?;
        configure(&conn)?;
        Ok(conn)
    }

    /// Write one `task_executions` row, returning its assigned id (§4.9 RecordExecution).
    pub fn record_execution(&self, record: &TaskExecutionRecord) -> StoreResult<i64> {
        let conn = self.writer.lock().expect("store writer mutex poisoned");
        conn.execute(
            "INSERT INTO task_executions
                (plan_file, run_index, task_number, task_name, agent, prompt, success, attempt,
                 output, error_message, duration_secs, qc_verdict, qc_feedback, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            rusqlite::params![
                record.plan_file,
                record.run_index,
                record.task_number,
                record.task_name,
                record.agent,
                record.prompt,
                record.success,
                record.attempt,
                record.output,
                record.error_message,
                record.duration_secs,
                record.qc_verdict,
                record.qc_feedback,
                record.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Write one behavioural session plus every child row in a single
    /// transaction (§4.9 RecordSessionMetrics: "either fully succeeds or
    /// leaves the store unchanged").
    pub fn record_session_metrics(
        &self,
        session: &BehavioralSession,
        tools: &[ToolExecution],
        bashes: &[BashCommand],
        files: &[FileOperation],
        tokens: &[TokenUsageSnapshot],
    ) -> StoreResult<i64> {
        let mut conn = self.writer.lock().expect("store writer mutex poisoned");
        let tx = conn.transaction()?;

        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM task_executions WHERE id = ?1",
            [session.task_execution_id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(StoreError::ConstraintViolation(format!(
                "no task_executions row with id {}",
                session.task_execution_id
            )));
        }

        tx.execute(
            "INSERT INTO behavioral_sessions
                (task_execution_id, started_at, ended_at, tool_call_count, shell_command_count,
                 file_op_count, input_tokens, output_tokens, context_window_pct)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            rusqlite::params![
                session.task_execution_id,
                session.started_at,
                session.ended_at,
                session.tool_call_count,
                session.shell_command_count,
                session.file_op_count,
                session.input_tokens,
                session.output_tokens,
                session.context_window_pct,
            ],
        )?;
        let session_id = tx.last_insert_rowid();

        for tool in tools {
            tx.execute(
                "INSERT INTO tool_executions (session_id, tool_name, started_at, duration_ms, success)
                 VALUES (?1,?2,?3,?4,?5)",
                rusqlite::params![session_id, tool.tool_name, tool.started_at, tool.duration_ms, tool.success],
            )?;
        }
        for bash in bashes {
            tx.execute(
                "INSERT INTO bash_commands (session_id, command, exit_code, duration_ms)
                 VALUES (?1,?2,?3,?4)",
                rusqlite::params![session_id, bash.command, bash.exit_code, bash.duration_ms],
            )?;
        }
        for file_op in files {
            tx.execute(
                "INSERT INTO file_operations (session_id, op_kind, path) VALUES (?1,?2,?3)",
                rusqlite::params![session_id, file_op.op_kind, file_op.path],
            )?;
        }
        for snapshot in tokens {
            tx.execute(
                "INSERT INTO token_usage (session_id, snapshot_at, input_tokens, output_tokens, context_pct)
                 VALUES (?1,?2,?3,?4,?5)",
                rusqlite::params![
                    session_id,
                    snapshot.snapshot_at,
                    snapshot.input_tokens,
                    snapshot.output_tokens,
                    snapshot.context_pct
                ],
            )?;
        }

        tx.commit()?;
        Ok(session_id)
    }

    /// All executions recorded for a plan file, most recent first.
    pub fn get_executions(&self, plan_file: &str, page: Page) -> StoreResult<Vec<StoredTaskExecution>> {
        let conn = self.reader_or_writer()?;
        let mut stmt = conn.prepare(
            "SELECT id, plan_file, run_index, task_number, task_name, agent, prompt, success, attempt,
                    output, error_message, duration_secs, qc_verdict, qc_feedback, created_at
             FROM task_executions WHERE plan_file = ?1
             ORDER BY id DESC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![plan_file, page.limit, page.offset], row_to_stored)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every attempt recorded for a single task Number across all runs of a plan file.
    pub fn get_execution_history(
        &self,
        plan_file: &str,
        task_number: &str,
        page: Page,
    ) -> StoreResult<Vec<StoredTaskExecution>> {
        let conn = self.reader_or_writer()?;
        let mut stmt = conn.prepare(
            "SELECT id, plan_file, run_index, task_number, task_name, agent, prompt, success, attempt,
                    output, error_message, duration_secs, qc_verdict, qc_feedback, created_at
             FROM task_executions WHERE plan_file = ?1 AND task_number = ?2
             ORDER BY run_index ASC, attempt ASC LIMIT ?3 OFFSET ?4",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![plan_file, task_number, page.limit, page.offset], row_to_stored)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Aggregate success/failure/duration stats, optionally scoped to one plan file.
    pub fn get_summary_stats(&self, plan_file: Option<&str>) -> StoreResult<SummaryStats> {
        let conn = self.reader_or_writer()?;
        let (sql, param): (&str, Option<&str>) = match plan_file {
            Some(p) => (
                "SELECT COUNT(*), SUM(success), AVG(duration_secs) FROM task_executions WHERE plan_file = ?1",
                Some(p),
            ),
            None => ("SELECT COUNT(*), SUM(success), AVG(duration_secs) FROM task_executions", None),
        };
        let mut stmt = conn.prepare(sql)?;
        let (total, successful, avg_duration): (i64, Option<i64>, Option<f64>) = match param {
            Some(p) => stmt.query_row([p], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?,
            None => stmt.query_row([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?,
        };
        let successful = successful.unwrap_or(0);
        Ok(SummaryStats {
            total_executions: total,
            successful,
            failed: total - successful,
            avg_duration_secs: avg_duration.unwrap_or(0.0),
        })
    }

    /// Per-agent-persona totals and success counts.
    pub fn get_agent_type_stats(&self) -> StoreResult<Vec<AgentTypeStats>> {
        let conn = self.reader_or_writer()?;
        let mut stmt =
            conn.prepare("SELECT agent, COUNT(*), SUM(success) FROM task_executions GROUP BY agent ORDER BY agent")?;
        let rows = stmt
            .query_map([], |row| {
                let successful: Option<i64> = row.get(2)?;
                Ok(AgentTypeStats {
                    agent: row.get(0)?,
                    total: row.get(1)?,
                    successful: successful.unwrap_or(0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Per-tool call counts and success counts across all recorded sessions.
    pub fn get_tool_stats(&self) -> StoreResult<Vec<ToolStats>> {
        let conn = self.reader_or_writer()?;
        let mut stmt = conn.prepare(
            "SELECT tool_name, COUNT(*), SUM(success) FROM tool_executions GROUP BY tool_name ORDER BY tool_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let successes: Option<i64> = row.get(2)?;
                Ok(ToolStats {
                    tool_name: row.get(0)?,
                    calls: row.get(1)?,
                    successes: successes.unwrap_or(0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Aggregate bash-command totals across all recorded sessions.
    pub fn get_bash_stats(&self) -> StoreResult<BashStats> {
        let conn = self.reader_or_writer()?;
        let (total, failed): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), SUM(CASE WHEN exit_code IS NOT NULL AND exit_code != 0 THEN 1 ELSE 0 END)
             FROM bash_commands",
            [],
            |row| {
                let failed: Option<i64> = row.get(1)?;
                Ok((row.get(0)?, failed.unwrap_or(0)))
            },
        )?;
        Ok(BashStats {
            total_commands: total,
            failed_commands: failed,
        })
    }

    /// Most recently started behavioural sessions, newest first.
    pub fn get_recent_sessions(&self, page: Page) -> StoreResult<Vec<RecentSession>> {
        let conn = self.reader_or_writer()?;
        let mut stmt = conn.prepare(
            "SELECT s.task_execution_id, s.started_at, s.ended_at, s.tool_call_count, s.shell_command_count,
                    s.file_op_count, s.input_tokens, s.output_tokens, s.context_window_pct,
                    t.task_number, t.plan_file
             FROM behavioral_sessions s JOIN task_executions t ON t.id = s.task_execution_id
             ORDER BY s.id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![page.limit, page.offset], |row| {
                Ok(RecentSession {
                    session: BehavioralSession {
                        task_execution_id: row.get(0)?,
                        started_at: row.get(1)?,
                        ended_at: row.get(2)?,
                        tool_call_count: row.get(3)?,
                        shell_command_count: row.get(4)?,
                        file_op_count: row.get(5)?,
                        input_tokens: row.get(6)?,
                        output_tokens: row.get(7)?,
                        context_window_pct: row.get(8)?,
                    },
                    task_number: row.get(9)?,
                    plan_file: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete task executions (and their behavioural data, via cascading
    /// deletes of dependent rows) older than `older_than_rfc3339`. Explicit
    /// maintenance operation; never called automatically (§3 lifetime note).
    pub fn purge_older_than(&self, older_than_rfc3339: &str) -> StoreResult<usize> {
        let conn = self.writer.lock().expect("store writer mutex poisoned");
        let ids: Vec<i64> = {
            let mut stmt = conn.prepare("SELECT id FROM task_executions WHERE created_at < ?1")?;
            stmt.query_map([older_than_rfc3339], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?
        };
        if ids.is_empty() {
            return Ok(0);
        }
        for id in &ids {
            let session_ids: Vec<i64> = {
                let mut stmt = conn.prepare("SELECT id FROM behavioral_sessions WHERE task_execution_id = ?1")?;
                stmt.query_map([id], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?
            };
            for sid in session_ids {
                conn.execute("DELETE FROM tool_executions WHERE session_id = ?1", [sid])?;
                conn.execute("DELETE FROM bash_commands WHERE session_id = ?1", [sid])?;
                conn.execute("DELETE FROM file_operations WHERE session_id = ?1", [sid])?;
                conn.execute("DELETE FROM token_usage WHERE session_id = ?1", [sid])?;
            }
            conn.execute("DELETE FROM behavioral_sessions WHERE task_execution_id = ?1", [id])?;
            conn.execute("DELETE FROM task_executions WHERE id = ?1", [id])?;
        }
        warn!(count = ids.len(), older_than_rfc3339, "purged telemetry rows");
        Ok(ids.len())
    }

    /// Use a real reader connection when backed by a file; fall back to the
    /// writer connection for the in-memory test-only store.
    fn reader_or_writer(&self) -> StoreResult<ReaderHandle<'_>> {
        if self.path.as_os_str() == ":memory:" {
            Ok(ReaderHandle::Writer(self.writer.lock().expect("store writer mutex poisoned")))
        } else {
            Ok(ReaderHandle::Owned(self.reader()?))
        }
    }
}

/// Either a freshly opened read-only-ish connection, or (in tests) a lock on
/// the shared in-memory writer connection. Both deref to `Connection`.
enum ReaderHandle<'a> {
    Owned(Connection),
    Writer(std::sync::MutexGuard<'a, Connection>),
}

impl std::ops::Deref for ReaderHandle<'_> {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        match self {
            ReaderHandle::Owned(c) => c,
            ReaderHandle::Writer(g) => g,
        }
    }
}

fn configure(conn: &Connection) -> StoreResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5_000)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}

fn row_to_stored(row: &rusqlite::Row) -> rusqlite::Result<StoredTaskExecution> {
    Ok(StoredTaskExecution {
        id: row.get(0)?,
        record: TaskExecutionRecord {
            plan_file: row.get(1)?,
            run_index: row.get(2)?,
            task_number: row.get(3)?,
            task_name: row.get(4)?,
            agent: row.get(5)?,
            prompt: row.get(6)?,
            success: row.get(7)?,
            attempt: row.get(8)?,
            output: row.get(9)?,
            error_message: row.get(10)?,
            duration_secs: row.get(11)?,
            qc_verdict: row.get(12)?,
            qc_feedback: row.get(13)?,
            created_at: row.get(14)?,
        },
    })
}
