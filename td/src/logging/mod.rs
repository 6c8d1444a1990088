//! Logger fan-out (C10, spec.md §4.10): forwards log events to zero or more
//! sinks. Errors from individual sinks never abort the caller; the first
//! observed error is returned from `log_task_result` for inspection.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use conductor_store::{Store, TaskExecutionRecord};

use crate::domain::TaskResult;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("log sink io error: {0}")]
    Io(String),
}

#[async_trait]
pub trait LoggerSink: Send + Sync {
    async fn log_wave_start(&self, wave_index: usize, task_numbers: &[&str]) -> Result<(), LogError>;
    async fn log_wave_complete(&self, wave_index: usize, duration: Duration) -> Result<(), LogError>;
    async fn log_task_result(&self, result: &TaskResult) -> Result<(), LogError>;
    async fn log_summary(&self, summary: &str) -> Result<(), LogError>;
}

/// Plain `tracing`-backed sink. No colour or table formatting, that lives
/// in the external display component.
pub struct ConsoleSink;

#[async_trait]
impl LoggerSink for ConsoleSink {
    async fn log_wave_start(&self, wave_index: usize, task_numbers: &[&str]) -> Result<(), LogError> {
        info!(wave_index, ?task_numbers, "wave started");
        Ok(())
    }

    async fn log_wave_complete(&self, wave_index: usize, duration: Duration) -> Result<(), LogError> {
        info!(wave_index, ?duration, "wave complete");
        Ok(())
    }

    async fn log_task_result(&self, result: &TaskResult) -> Result<(), LogError> {
        info!(task = %result.task_number, status = ?result.status, attempts = result.attempts, "task result");
        Ok(())
    }

    async fn log_summary(&self, summary: &str) -> Result<(), LogError> {
        info!(%summary, "run summary");
        Ok(())
    }
}

/// JSONL sink, one file per run directory.
pub struct FileSink {
    log_path: PathBuf,
    writer: Mutex<std::io::BufWriter<std::fs::File>>,
}

impl FileSink {
    pub fn new(run_dir: impl AsRef<Path>) -> Result<Self, LogError> {
        let run_dir = run_dir.as_ref();
        fs::create_dir_all(run_dir).map_err(|e| LogError::Io(e.to_string()))?;
        let log_path = run_dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| LogError::Io(e.to_string()))?;
        Ok(Self {
            log_path,
            writer: Mutex::new(std::io::BufWriter::new(file)),
        })
    }

    fn write_line(&self, json: &str) -> Result<(), LogError> {
        let mut writer = self.writer.lock().expect("file sink writer mutex poisoned");
        writeln!(writer, "{json}").map_err(|e| LogError::Io(e.to_string()))?;
        writer.flush().map_err(|e| LogError::Io(e.to_string()))
    }
}

#[async_trait]
impl LoggerSink for FileSink {
    async fn log_wave_start(&self, wave_index: usize, task_numbers: &[&str]) -> Result<(), LogError> {
        let json = serde_json::json!({"event": "wave_start", "wave_index": wave_index, "tasks": task_numbers});
        self.write_line(&json.to_string())
    }

    async fn log_wave_complete(&self, wave_index: usize, duration: Duration) -> Result<(), LogError> {
        let json = serde_json::json!({"event": "wave_complete", "wave_index": wave_index, "duration_secs": duration.as_secs_f64()});
        self.write_line(&json.to_string())
    }

    async fn log_task_result(&self, result: &TaskResult) -> Result<(), LogError> {
        let json = serde_json::json!({
            "event": "task_result",
            "task_number": result.task_number,
            "status": format!("{:?}", result.status),
            "attempts": result.attempts,
        });
        self.write_line(&json.to_string())
    }

    async fn log_summary(&self, summary: &str) -> Result<(), LogError> {
        let json = serde_json::json!({"event": "summary", "text": summary});
        self.write_line(&json.to_string())
    }
}

impl FileSink {
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

/// Writes a lightweight log-event row to the telemetry store, so `run
/// history` queries see wave boundaries and the run summary alongside task
/// attempts, not just the attempts themselves (spec.md §4.10).
///
/// Events share the `task_executions` table under a synthetic task number
/// (`_wave`, `_summary`) rather than a dedicated table; the store has no
/// other event log, and this keeps one writer path instead of two.
pub struct TelemetrySink {
    store: Arc<Store>,
    plan_file: String,
    run_index: i64,
}

impl TelemetrySink {
    pub fn new(store: Arc<Store>, plan_file: impl Into<String>, run_index: i64) -> Self {
        Self { store, plan_file: plan_file.into(), run_index }
    }

    fn record(&self, task_number: &str, task_name: &str, output: String) -> Result<(), LogError> {
        let record = TaskExecutionRecord {
            plan_file: self.plan_file.clone(),
            run_index: self.run_index,
            task_number: task_number.to_string(),
            task_name: task_name.to_string(),
            agent: "conductor".to_string(),
            prompt: String::new(),
            success: true,
            attempt: 0,
            output: Some(output),
            error_message: None,
            duration_secs: 0.0,
            qc_verdict: None,
            qc_feedback: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.store.record_execution(&record).map_err(|e| LogError::Io(e.to_string())).map(|_| ())
    }
}

#[async_trait]
impl LoggerSink for TelemetrySink {
    async fn log_wave_start(&self, wave_index: usize, task_numbers: &[&str]) -> Result<(), LogError> {
        self.record("_wave", "wave started", format!("wave {wave_index} tasks={task_numbers:?}"))
    }

    async fn log_wave_complete(&self, wave_index: usize, duration: Duration) -> Result<(), LogError> {
        self.record("_wave", "wave complete", format!("wave {wave_index} duration_secs={}", duration.as_secs_f64()))
    }

    async fn log_task_result(&self, result: &TaskResult) -> Result<(), LogError> {
        self.record(
            &result.task_number,
            "task result logged",
            format!("status={:?} attempts={}", result.status, result.attempts),
        )
    }

    async fn log_summary(&self, summary: &str) -> Result<(), LogError> {
        self.record("_summary", "run summary", summary.to_string())
    }
}

/// Fans each call out to every configured sink (spec.md §4.10).
pub struct LogFanout {
    sinks: Vec<Box<dyn LoggerSink>>,
}

impl LogFanout {
    pub fn new(sinks: Vec<Box<dyn LoggerSink>>) -> Self {
        Self { sinks }
    }

    pub async fn log_wave_start(&self, wave_index: usize, task_numbers: &[&str]) -> Result<(), LogError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.log_wave_start(wave_index, task_numbers).await {
                warn!(error = %e, "logging::LogFanout: sink failed on log_wave_start");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub async fn log_wave_complete(&self, wave_index: usize, duration: Duration) -> Result<(), LogError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.log_wave_complete(wave_index, duration).await {
                warn!(error = %e, "logging::LogFanout: sink failed on log_wave_complete");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Collects `Result<(), LogError>` from every sink; logs failures at
    /// `warn!` and returns the first observed error to the caller.
    pub async fn log_task_result(&self, result: &TaskResult) -> Result<(), LogError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.log_task_result(result).await {
                warn!(error = %e, task = %result.task_number, "logging::LogFanout: sink failed on log_task_result");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub async fn log_summary(&self, summary: &str) -> Result<(), LogError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.log_summary(summary).await {
                warn!(error = %e, "logging::LogFanout: sink failed on log_summary");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
