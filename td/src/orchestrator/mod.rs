//! Top-level driver (C7, spec.md §4.7): iterates waves in order, honours the
//! overall deadline, and engages the pause/resume subsystem on rate limit.

pub mod cancellation;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use conductor_store::Store;

use crate::domain::{ExecutionResult, Plan, RunStatus, TaskResult, TaskStatus};
use crate::error::ConductorError;
use crate::executor::wave::{self, WaveOutcome};
use crate::graph::DependencyGraph;
use crate::invoker::AgentInvoker;
use crate::logging::LogFanout;
use crate::pause::{PauseState, PauseStore};
use crate::wave::{calculate_waves, validate_registry_prerequisites};

use cancellation::CancellationToken;

/// Everything the orchestrator needs to drive a plan, assembled once by the
/// caller (CLI entry point) and threaded through (spec.md §9 "centralise
/// store ownership").
pub struct Orchestrator {
    invoker: Arc<dyn AgentInvoker>,
    store: Arc<Store>,
    pause_store: PauseStore,
    logger: LogFanout,
    working_dir: PathBuf,
    default_max_concurrency: usize,
    attempt_timeout: Duration,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        invoker: Arc<dyn AgentInvoker>,
        store: Arc<Store>,
        pause_store: PauseStore,
        logger: LogFanout,
        working_dir: PathBuf,
        default_max_concurrency: usize,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            invoker,
            store,
            pause_store,
            logger,
            working_dir,
            default_max_concurrency,
            attempt_timeout,
        }
    }

    /// Validates the plan and computes its wave schedule without spawning
    /// any agent (the `--dry-run` contract, spec.md §6).
    pub fn plan_waves(&self, plan: &Plan) -> Result<Vec<crate::wave::Wave>, ConductorError> {
        let graph = crate::graph::build_and_validate(plan)?;
        validate_registry_prerequisites(plan, &graph)?;
        calculate_waves(plan, &graph)
    }

    /// Drives `plan` to completion (spec.md §4.7).
    pub async fn execute(&self, plan: &Plan, run_index: i64) -> Result<ExecutionResult, ConductorError> {
        self.execute_with_cancel(plan, run_index, None).await
    }

    /// As [`Self::execute`], but cancelling `external` (e.g. on operator
    /// SIGINT) cancels every in-flight task through the same parent/child
    /// propagation the wave executor itself uses (spec.md §5, §8
    /// "Cancellation propagation").
    pub async fn execute_with_cancel(
        &self,
        plan: &Plan,
        run_index: i64,
        external: Option<&CancellationToken>,
    ) -> Result<ExecutionResult, ConductorError> {
        let graph: DependencyGraph = crate::graph::build_and_validate(plan)?;
        validate_registry_prerequisites(plan, &graph)?;
        let waves = calculate_waves(plan, &graph)?;

        let overall_deadline = plan.timeout_secs.map(Duration::from_secs);
        let cancel = match external {
            Some(parent) => parent.child(overall_deadline),
            None => CancellationToken::new(overall_deadline),
        };
        let start = Instant::now();

        let mut completed_numbers: Vec<String> = Vec::new();
        let mut all_results: Vec<TaskResult> = Vec::new();

        for (index, wave) in waves.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(self.cancelled_result(run_index, plan, &all_results, start.elapsed()));
            }

            let task_numbers = wave.task_numbers();
            let _ = self.logger.log_wave_start(index, &task_numbers).await;
            debug!(wave_index = index, task_count = task_numbers.len(), "orchestrator::execute: starting wave");

            let wave_start = Instant::now();
            let outcome = wave::execute_wave(
                self.invoker.clone(),
                self.store.clone(),
                wave,
                plan,
                run_index,
                &self.working_dir,
                self.default_max_concurrency,
                &cancel,
                self.attempt_timeout,
            )
            .await;
            let _ = self.logger.log_wave_complete(index, wave_start.elapsed()).await;

            match outcome {
                WaveOutcome::Completed(results) => {
                    for result in &results {
                        let _ = self.logger.log_task_result(result).await;
                        if result.status == TaskStatus::Completed {
                            completed_numbers.push(result.task_number.clone());
                        }
                    }
                    let any_terminal_failure = results.iter().any(|r| r.is_terminal_failure());
                    all_results.extend(results);

                    if any_terminal_failure && !plan.continue_on_error {
                        return Ok(self.failed_result(run_index, plan, &waves, index, &all_results, start.elapsed()));
                    }
                }
                WaveOutcome::Paused { completed, pending, rate_limit } => {
                    for result in &completed {
                        let _ = self.logger.log_task_result(result).await;
                        if result.status == TaskStatus::Completed {
                            completed_numbers.push(result.task_number.clone());
                        }
                    }
                    all_results.extend(completed);

                    let mut all_pending = pending;
                    for remaining_wave in &waves[index + 1..] {
                        all_pending.extend(remaining_wave.task_numbers().into_iter().map(String::from));
                    }

                    let state = PauseState::new(plan.plan_file.clone(), &rate_limit, all_pending, completed_numbers.clone());
                    let session_id = state.session_id.clone();
                    if let Err(e) = self.pause_store.save(&state) {
                        warn!(error = %e, "orchestrator::execute: failed to persist pause checkpoint");
                    }

                    info!(session_id = %session_id, resume_at = %state.resume_at, "orchestrator::execute: run paused by rate limit");

                    return Ok(ExecutionResult {
                        run_index,
                        status: RunStatus::Paused,
                        total: plan.tasks.len(),
                        completed: completed_numbers.len(),
                        failed: 0,
                        duration: start.elapsed(),
                        failed_tasks: vec![],
                        pause_session_id: Some(session_id),
                    });
                }
            }
        }

        let failed: Vec<TaskResult> = all_results.iter().filter(|r| r.is_terminal_failure()).cloned().collect();
        let status = if failed.is_empty() { RunStatus::Completed } else { RunStatus::Failed };
        let summary = format!(
            "{} total, {} completed, {} failed, {:?} elapsed",
            plan.tasks.len(),
            completed_numbers.len(),
            failed.len(),
            start.elapsed()
        );
        let _ = self.logger.log_summary(&summary).await;

        Ok(ExecutionResult {
            run_index,
            status,
            total: plan.tasks.len(),
            completed: completed_numbers.len(),
            failed: failed.len(),
            duration: start.elapsed(),
            failed_tasks: failed,
            pause_session_id: None,
        })
    }

    fn cancelled_result(&self, run_index: i64, plan: &Plan, results: &[TaskResult], duration: Duration) -> ExecutionResult {
        ExecutionResult {
            run_index,
            status: RunStatus::Cancelled,
            total: plan.tasks.len(),
            completed: results.iter().filter(|r| r.status == TaskStatus::Completed).count(),
            failed: results.iter().filter(|r| r.is_terminal_failure()).count(),
            duration,
            failed_tasks: results.iter().filter(|r| r.is_terminal_failure()).cloned().collect(),
            pause_session_id: None,
        }
    }

    fn failed_result(
        &self,
        run_index: i64,
        plan: &Plan,
        waves: &[crate::wave::Wave],
        failed_wave_index: usize,
        results: &[TaskResult],
        duration: Duration,
    ) -> ExecutionResult {
        let mut failed_tasks: Vec<TaskResult> = results.iter().filter(|r| r.is_terminal_failure()).cloned().collect();

        for remaining_wave in &waves[failed_wave_index + 1..] {
            for number in remaining_wave.task_numbers() {
                failed_tasks.push(TaskResult {
                    task_number: number.to_string(),
                    status: TaskStatus::Skipped,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: Duration::default(),
                    qc_verdict: None,
                    attempts: 0,
                    error_kind: None,
                });
            }
        }

        ExecutionResult {
            run_index,
            status: RunStatus::Failed,
            total: plan.tasks.len(),
            completed: results.iter().filter(|r| r.status == TaskStatus::Completed).count(),
            failed: failed_tasks.iter().filter(|r| r.status != TaskStatus::Skipped).count(),
            duration,
            failed_tasks,
            pause_session_id: None,
        }
    }
}
