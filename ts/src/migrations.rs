//! Embedded schema migrations, applied idempotently on `Store::open`.
//!
//! Each migration is a plain SQL batch plus a name. Migrations run inside a
//! single transaction and are recorded in `schema_migrations`; a migration
//! whose version is already present in that table is skipped, which is what
//! makes repeated `open()` calls against the same file idempotent.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_task_executions",
        sql: r#"
            CREATE TABLE task_executions (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                plan_file       TEXT NOT NULL,
                run_index       INTEGER NOT NULL,
                task_number     TEXT NOT NULL,
                task_name       TEXT NOT NULL,
                agent           TEXT NOT NULL,
                prompt          TEXT NOT NULL,
                success         INTEGER NOT NULL,
                attempt         INTEGER NOT NULL,
                output          TEXT,
                error_message   TEXT,
                duration_secs   REAL NOT NULL,
                qc_verdict      TEXT,
                qc_feedback     TEXT,
                created_at      TEXT NOT NULL
            );
            CREATE INDEX idx_task_executions_plan ON task_executions(plan_file, task_number);
            CREATE INDEX idx_task_executions_run ON task_executions(plan_file, run_index);
        "#,
    },
    Migration {
        version: 2,
        name: "create_behavioral_sessions",
        sql: r#"
            CREATE TABLE behavioral_sessions (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                task_execution_id   INTEGER NOT NULL REFERENCES task_executions(id),
                started_at          TEXT NOT NULL,
                ended_at            TEXT NOT NULL,
                tool_call_count     INTEGER NOT NULL,
                shell_command_count INTEGER NOT NULL,
                file_op_count       INTEGER NOT NULL,
                input_tokens        INTEGER NOT NULL,
                output_tokens       INTEGER NOT NULL,
                context_window_pct  REAL NOT NULL
            );
            CREATE INDEX idx_behavioral_sessions_exec ON behavioral_sessions(task_execution_id);
        "#,
    },
    Migration {
        version: 3,
        name: "create_child_tables",
        sql: r#"
            CREATE TABLE tool_executions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id  INTEGER NOT NULL REFERENCES behavioral_sessions(id),
                tool_name   TEXT NOT NULL,
                started_at  TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                success     INTEGER NOT NULL
            );
            CREATE TABLE bash_commands (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id  INTEGER NOT NULL REFERENCES behavioral_sessions(id),
                command     TEXT NOT NULL,
                exit_code   INTEGER,
                duration_ms INTEGER NOT NULL
            );
            CREATE TABLE file_operations (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id  INTEGER NOT NULL REFERENCES behavioral_sessions(id),
                op_kind     TEXT NOT NULL,
                path        TEXT NOT NULL
            );
            CREATE TABLE token_usage (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id      INTEGER NOT NULL REFERENCES behavioral_sessions(id),
                snapshot_at     TEXT NOT NULL,
                input_tokens    INTEGER NOT NULL,
                output_tokens   INTEGER NOT NULL,
                context_pct     REAL NOT NULL
            );
            CREATE INDEX idx_tool_executions_session ON tool_executions(session_id);
            CREATE INDEX idx_bash_commands_session ON bash_commands(session_id);
            CREATE INDEX idx_file_operations_session ON file_operations(session_id);
            CREATE INDEX idx_token_usage_session ON token_usage(session_id);
        "#,
    },
];

/// Run every migration that has not already been recorded.
pub fn run(conn: &mut Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            name        TEXT NOT NULL,
            applied_at  TEXT NOT NULL
        )",
    )?;

    let applied: i64 = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
        row.get(0)
    })?;
    debug!(applied, "migrations::run: highest applied version");

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql).map_err(|e| {
            StoreError::SchemaMismatch(format!("migration {} ({}) failed: {e}", migration.version, migration.name))
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.name, chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        info!(version = migration.version, name = migration.name, "applied migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);
    }

    #[test]
    fn all_tables_exist_after_run() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();

        for table in [
            "task_executions",
            "behavioral_sessions",
            "tool_executions",
            "bash_commands",
            "file_operations",
            "token_usage",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
