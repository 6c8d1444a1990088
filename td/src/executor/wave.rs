//! Wave executor (C6, spec.md §4.6): runs one wave's tasks under bounded
//! concurrency, with first-failure cancellation and rate-limit pause
//! detection.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::debug;

use conductor_store::Store;

use crate::domain::{Plan, Task, TaskResult};
use crate::invoker::{AgentInvoker, RateLimitInfo};
use crate::orchestrator::cancellation::CancellationToken;
use crate::wave::Wave;

use super::task::{self, TaskOutcome};

/// Outcome of running one wave to completion.
pub enum WaveOutcome {
    /// Every task in the wave reached a terminal, non-paused state.
    Completed(Vec<TaskResult>),
    /// A task reported `RateLimited`; `completed` holds results gathered
    /// before the pause, `pending` lists task Numbers still outstanding in
    /// this wave (spec.md §4.6).
    Paused {
        completed: Vec<TaskResult>,
        pending: Vec<String>,
        rate_limit: RateLimitInfo,
    },
}

/// Runs `wave`'s tasks concurrently under a semaphore sized to
/// `min(wave.max_concurrency, plan.max_concurrency, default)` (spec.md §4.6).
pub async fn execute_wave(
    invoker: Arc<dyn AgentInvoker>,
    store: Arc<Store>,
    wave: &Wave,
    plan: &Plan,
    run_index: i64,
    working_dir: &Path,
    default_max_concurrency: usize,
    cancel: &CancellationToken,
    attempt_timeout: Duration,
) -> WaveOutcome {
    let bound = [wave.max_concurrency, plan.max_concurrency, Some(default_max_concurrency)]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(default_max_concurrency)
        .max(1);

    let task_numbers: Vec<String> = wave.task_numbers().into_iter().map(String::from).collect();
    let by_number: HashMap<&str, &Task> = plan.tasks.iter().map(|t| (t.number.as_str(), t)).collect();

    debug!(task_count = task_numbers.len(), bound, "executor::wave::execute_wave: starting wave");

    let semaphore = Arc::new(Semaphore::new(bound));
    let wave_cancel = cancel.child(None);

    let mut handles = Vec::with_capacity(task_numbers.len());
    for number in &task_numbers {
        let task = (*by_number.get(number.as_str()).expect("wave task must exist in plan")).clone();
        let invoker = invoker.clone();
        let store = store.clone();
        let plan = plan.clone();
        let semaphore = semaphore.clone();
        let working_dir = working_dir.to_path_buf();
        let task_cancel = wave_cancel.child(None);

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("wave semaphore never closed");
            task::execute(invoker.as_ref(), &store, &task, &plan, run_index, &working_dir, &task_cancel, attempt_timeout).await
        }));
    }

    let mut results_by_number: HashMap<String, TaskResult> = HashMap::new();
    let mut rate_limited: Option<RateLimitInfo> = None;

    for (number, handle) in task_numbers.iter().zip(handles) {
        match handle.await {
            Ok(TaskOutcome::Result(result)) => {
                let is_failure = result.is_terminal_failure();
                results_by_number.insert(number.clone(), result);
                if is_failure && !plan.continue_on_error && rate_limited.is_none() {
                    wave_cancel.cancel();
                }
            }
            Ok(TaskOutcome::RateLimited(info)) => {
                if rate_limited.is_none() {
                    rate_limited = Some(info);
                    wave_cancel.cancel();
                }
            }
            Err(join_err) => {
                debug!(%number, error = %join_err, "executor::wave::execute_wave: task join error, treating as aborted");
            }
        }
    }

    if let Some(rate_limit) = rate_limited {
        let completed: Vec<TaskResult> = task_numbers
            .iter()
            .filter_map(|n| results_by_number.remove(n))
            .collect();
        let pending: Vec<String> = task_numbers
            .iter()
            .filter(|n| !completed.iter().any(|r| &r.task_number == *n))
            .cloned()
            .collect();
        return WaveOutcome::Paused { completed, pending, rate_limit };
    }

    // Aggregation preserves the wave's original task-list order regardless
    // of completion order (spec.md §4.6).
    let results = task_numbers
        .iter()
        .map(|n| {
            results_by_number.remove(n).unwrap_or_else(|| TaskResult {
                task_number: n.clone(),
                status: crate::domain::TaskStatus::Aborted,
                stdout: String::new(),
                stderr: String::new(),
                duration: std::time::Duration::default(),
                qc_verdict: None,
                attempts: 0,
                error_kind: None,
            })
        })
        .collect();

    WaveOutcome::Completed(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Plan, Task, TaskQcOverride, TaskStatus};
    use crate::invoker::{AgentInvocation, AgentOutput, InvokerError, LineSink};
    use crate::wave::TaskBundle;
    use async_trait::async_trait;

    struct AlwaysSucceeds;

    #[async_trait]
    impl AgentInvoker for AlwaysSucceeds {
        async fn invoke(&self, _: &AgentInvocation, _: &CancellationToken, _: LineSink) -> Result<AgentOutput, InvokerError> {
            Ok(AgentOutput {
                stdout: "ok".into(),
                stderr: String::new(),
                exit_code: 0,
                duration: std::time::Duration::from_millis(1),
            })
        }
    }

    struct OneFails {
        failing_number: String,
    }

    #[async_trait]
    impl AgentInvoker for OneFails {
        async fn invoke(
            &self,
            invocation: &AgentInvocation,
            _: &CancellationToken,
            _: LineSink,
        ) -> Result<AgentOutput, InvokerError> {
            if invocation.persona == self.failing_number {
                return Err(InvokerError::NonZeroExit { code: 1, stderr_head: "boom".into() });
            }
            Ok(AgentOutput {
                stdout: "ok".into(),
                stderr: String::new(),
                exit_code: 0,
                duration: std::time::Duration::from_millis(1),
            })
        }
    }

    fn task(number: &str) -> Task {
        Task {
            number: number.into(),
            name: "name".into(),
            prompt: "prompt".into(),
            files: vec![],
            deps: vec![],
            agent: Some(number.into()),
            worktree_group: None,
            priority: Default::default(),
            qc: TaskQcOverride::default(),
            inputs: vec![],
            outputs: vec![],
        }
    }

    fn plan(tasks: Vec<Task>, continue_on_error: bool) -> Plan {
        Plan {
            plan_file: "plan.yml".into(),
            tasks,
            default_agent: None,
            quality: Default::default(),
            worktree_groups: vec![],
            timeout_secs: None,
            continue_on_error,
            max_concurrency: None,
        }
    }

    fn wave(numbers: &[&str]) -> Wave {
        Wave {
            bundles: vec![TaskBundle {
                tasks: numbers.iter().map(|s| s.to_string()).collect(),
            }],
            max_concurrency: None,
        }
    }

    #[tokio::test]
    async fn all_succeed_preserves_order() {
        let p = plan(vec![task("A"), task("B"), task("C")], false);
        let w = wave(&["A", "B", "C"]);
        let store = Arc::new(Store::open_in_memory().unwrap());
        let cancel = CancellationToken::new(None);

        let outcome = execute_wave(Arc::new(AlwaysSucceeds), store, &w, &p, 1, Path::new("/tmp"), 4, &cancel, Duration::from_secs(60)).await;
        match outcome {
            WaveOutcome::Completed(results) => {
                assert_eq!(results.len(), 3);
                assert_eq!(results[0].task_number, "A");
                assert_eq!(results[1].task_number, "B");
                assert_eq!(results[2].task_number, "C");
                assert!(results.iter().all(|r| r.status == TaskStatus::Completed));
            }
            WaveOutcome::Paused { .. } => panic!("expected Completed"),
        }
    }

    #[tokio::test]
    async fn first_failure_cancels_remaining_tasks() {
        let p = plan(vec![task("A"), task("B")], false);
        let w = wave(&["A", "B"]);
        let store = Arc::new(Store::open_in_memory().unwrap());
        let cancel = CancellationToken::new(None);

        let outcome = execute_wave(
            Arc::new(OneFails { failing_number: "A".into() }),
            store,
            &w,
            &p,
            1,
            Path::new("/tmp"),
            4,
            &cancel,
            Duration::from_secs(60),
        )
        .await;
        match outcome {
            WaveOutcome::Completed(results) => {
                let a = results.iter().find(|r| r.task_number == "A").unwrap();
                assert_eq!(a.status, TaskStatus::Failed);
            }
            WaveOutcome::Paused { .. } => panic!("expected Completed"),
        }
    }
}
