//! Task executor (C5, spec.md §4.5): drives one task through its
//! work/QC/retry state machine to a terminal `TaskResult`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use conductor_store::{Store, TaskExecutionRecord};

use crate::domain::{ErrorKind, Plan, QcOutcome, Task, TaskResult, TaskStatus, Verdict};
use crate::invoker::{AgentInvocation, AgentInvoker, InvokerError};
use crate::orchestrator::cancellation::CancellationToken;
use crate::quality;

/// Bubbled out of `execute` when the invoker reports a rate limit, so the
/// wave executor can engage the pause/resume subsystem without treating it
/// as a per-task failure (spec.md §4.5, §4.6).
pub enum TaskOutcome {
    Result(TaskResult),
    RateLimited(crate::invoker::RateLimitInfo),
}

/// Renders the task's prompt, optionally embedding QC feedback from a prior
/// attempt so the worker can self-correct (spec.md §4.5).
fn render_prompt(task: &Task, prior_feedback: Option<&str>) -> String {
    match prior_feedback {
        Some(feedback) if !feedback.is_empty() => {
            format!("{}\n\n# Reviewer feedback from previous attempt\n{}", task.prompt, feedback)
        }
        _ => task.prompt.clone(),
    }
}

/// Drives `task` to a terminal state (spec.md §4.5's state machine).
/// `attempt_timeout` is the per-attempt deadline from `Config.agent`
/// (spec.md §4.5: "Enforces a per-attempt timeout derived from plan
/// policy; timeouts count as a Fail and consume one retry").
pub async fn execute(
    invoker: &dyn AgentInvoker,
    store: &Store,
    task: &Task,
    plan: &Plan,
    run_index: i64,
    working_dir: &Path,
    cancel: &CancellationToken,
    attempt_timeout: Duration,
) -> TaskOutcome {
    let max_attempts = task.max_attempts(plan).max(1);
    let agent = task.resolved_agent(plan).unwrap_or("default").to_string();
    let mut prior_feedback: Option<String> = None;

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return TaskOutcome::Result(terminal(task, TaskStatus::Aborted, attempt, None, None));
        }

        let attempt_start = Instant::now();
        let attempt_cancel = cancel.child(Some(attempt_timeout));

        let prompt = render_prompt(task, prior_feedback.as_deref());
        let invocation = AgentInvocation {
            persona: agent.clone(),
            prompt: prompt.clone(),
            working_dir: working_dir.to_path_buf(),
        };

        debug!(task = %task.number, attempt, "executor::task::execute: invoking worker");
        let invoke_result = invoker.invoke(&invocation, &attempt_cancel, Arc::new(|_| {})).await;

        let (status, stdout, stderr, qc_verdict, error_kind, error_message) = match invoke_result {
            Ok(output) => {
                if plan.quality.enabled {
                    if let Some(reviewer) = task.qc.reviewer_persona.clone().or_else(|| plan.quality.reviewer_persona.clone()) {
                        let outcome: QcOutcome =
                            quality::review(invoker, task, &output.stdout, &reviewer, working_dir, &attempt_cancel).await;
                        if quality::should_retry(outcome.verdict, plan.quality.strictness) && attempt < max_attempts {
                            record_attempt(
                                store,
                                plan,
                                task,
                                run_index,
                                attempt,
                                false,
                                Some(&output.stdout),
                                Some(&outcome.feedback),
                                Some(outcome.verdict),
                                attempt_start.elapsed(),
                            );
                            prior_feedback = Some(outcome.feedback);
                            continue;
                        }
                        if quality::should_retry(outcome.verdict, plan.quality.strictness) {
                            (
                                TaskStatus::Failed,
                                output.stdout,
                                output.stderr,
                                Some(outcome.verdict),
                                Some(ErrorKind::QcFail),
                                Some(outcome.feedback),
                            )
                        } else {
                            (TaskStatus::Completed, output.stdout, output.stderr, Some(outcome.verdict), None, None)
                        }
                    } else {
                        (TaskStatus::Completed, output.stdout, output.stderr, None, None, None)
                    }
                } else {
                    (TaskStatus::Completed, output.stdout, output.stderr, None, None, None)
                }
            }
            Err(InvokerError::RateLimited(info)) => {
                debug!(task = %task.number, "executor::task::execute: rate limited, bubbling without consuming retries");
                return TaskOutcome::RateLimited(info);
            }
            Err(InvokerError::Cancelled) => {
                return TaskOutcome::Result(terminal(task, TaskStatus::Aborted, attempt, None, None));
            }
            Err(InvokerError::Timeout) => (
                TaskStatus::Failed,
                String::new(),
                String::new(),
                None,
                Some(ErrorKind::Timeout),
                Some(format!("attempt exceeded the {:.0}s per-attempt timeout", attempt_timeout.as_secs_f64())),
            ),
            Err(InvokerError::Spawn { message, .. }) => (
                TaskStatus::Failed,
                String::new(),
                String::new(),
                None,
                Some(ErrorKind::SpawnError),
                Some(message),
            ),
            Err(InvokerError::NonZeroExit { stderr_head, .. }) => (
                TaskStatus::Failed,
                String::new(),
                stderr_head.clone(),
                None,
                Some(ErrorKind::NonZeroExit),
                Some(stderr_head),
            ),
        };

        record_attempt(
            store,
            plan,
            task,
            run_index,
            attempt,
            status == TaskStatus::Completed,
            Some(&stdout),
            error_message.as_deref(),
            qc_verdict,
            attempt_start.elapsed(),
        );

        let retryable = status == TaskStatus::Failed && error_kind != Some(ErrorKind::SpawnError) && attempt < max_attempts;
        if retryable {
            prior_feedback = error_message.clone();
            continue;
        }

        return TaskOutcome::Result(TaskResult {
            task_number: task.number.clone(),
            status,
            stdout,
            stderr,
            duration: attempt_start.elapsed(),
            qc_verdict,
            attempts: attempt,
            error_kind,
        });
    }

    unreachable!("loop always returns before exhausting max_attempts iterations")
}

fn terminal(task: &Task, status: TaskStatus, attempts: u32, qc_verdict: Option<Verdict>, error_kind: Option<ErrorKind>) -> TaskResult {
    TaskResult {
        task_number: task.number.clone(),
        status,
        stdout: String::new(),
        stderr: String::new(),
        duration: std::time::Duration::default(),
        qc_verdict,
        attempts,
        error_kind,
    }
}

/// Writes a TaskExecutionRecord after every attempt, success or failure
/// (spec.md §4.5). Store failures are logged but do not abort execution:
/// telemetry is best-effort from the task executor's perspective, and the
/// orchestrator factory is responsible for failing fast if the store can't
/// be opened at all.
#[allow(clippy::too_many_arguments)]
fn record_attempt(
    store: &Store,
    plan: &Plan,
    task: &Task,
    run_index: i64,
    attempt: u32,
    success: bool,
    output: Option<&str>,
    error_message: Option<&str>,
    qc_verdict: Option<Verdict>,
    duration: std::time::Duration,
) {
    let record = TaskExecutionRecord {
        plan_file: plan.plan_file.clone(),
        run_index,
        task_number: task.number.clone(),
        task_name: task.name.clone(),
        agent: task.resolved_agent(plan).unwrap_or("default").to_string(),
        prompt: task.prompt.clone(),
        success,
        attempt,
        output: output.map(|s| s.to_string()),
        error_message: error_message.map(|s| s.to_string()),
        duration_secs: duration.as_secs_f64(),
        qc_verdict: qc_verdict.map(|v| format!("{v:?}").to_lowercase()),
        qc_feedback: None,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    if let Err(e) = store.record_execution(&record) {
        warn!(task = %task.number, attempt, error = %e, "executor::task::record_attempt: failed to persist telemetry");
    }
}
