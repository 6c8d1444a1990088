//! Integration tests for Conductor
//!
//! These tests drive the orchestrator end to end against scripted
//! `AgentInvoker` implementations, without spawning a real agent binary.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;

use conductor::domain::{Plan, QualityPolicy, RunStatus, Task, TaskQcOverride};
use conductor::invoker::{AgentInvocation, AgentInvoker, AgentOutput, InvokerError, LimitKind, LineSink, RateLimitInfo};
use conductor::logging::{ConsoleSink, LogFanout};
use conductor::orchestrator::Orchestrator;
use conductor::pause::PauseStore;
use conductor_store::{Page, Store};

fn task(number: &str, deps: &[&str], files: &[&str]) -> Task {
    Task {
        number: number.into(),
        name: format!("Task {number}"),
        prompt: "do the thing".into(),
        files: files.iter().map(|s| s.to_string()).collect(),
        deps: deps.iter().map(|s| s.to_string()).collect(),
        agent: Some(number.into()),
        worktree_group: None,
        priority: Default::default(),
        qc: TaskQcOverride::default(),
        inputs: vec![],
        outputs: vec![],
    }
}

fn plan(tasks: Vec<Task>) -> Plan {
    Plan {
        plan_file: "plan.yml".into(),
        tasks,
        default_agent: Some("builder".into()),
        quality: Default::default(),
        worktree_groups: vec![],
        timeout_secs: None,
        continue_on_error: false,
        max_concurrency: None,
    }
}

fn orchestrator(invoker: Arc<dyn AgentInvoker>, store: Arc<Store>, dir: &std::path::Path) -> Orchestrator {
    Orchestrator::new(
        invoker,
        store,
        PauseStore::new(dir.join("pause")),
        LogFanout::new(vec![Box::new(ConsoleSink)]),
        dir.to_path_buf(),
        4,
        Duration::from_secs(60),
    )
}

// =============================================================================
// Scenario 5: rate limit mid-wave pauses the run and covers every remaining
// task, in this wave and in later waves.
// =============================================================================

struct RateLimitsOnePersona {
    persona: String,
}

#[async_trait]
impl AgentInvoker for RateLimitsOnePersona {
    async fn invoke(&self, invocation: &AgentInvocation, _cancel: &conductor::orchestrator::cancellation::CancellationToken, _on_line: LineSink) -> Result<AgentOutput, InvokerError> {
        if invocation.persona == self.persona {
            return Err(InvokerError::RateLimited(RateLimitInfo {
                kind: LimitKind::DailyQuota,
                resume_at: chrono::Utc::now() + chrono::Duration::hours(1),
                raw_message: "daily quota exceeded for this account".into(),
            }));
        }
        Ok(AgentOutput {
            stdout: "ok".into(),
            stderr: String::new(),
            exit_code: 0,
            duration: Duration::from_millis(1),
        })
    }
}

#[tokio::test]
async fn rate_limit_mid_wave_pauses_and_covers_remaining_waves() {
    let dir = tempdir().unwrap();
    // Wave 1: just A, which rate-limits. Wave 2: B, which depends on A and
    // so never gets a chance to run.
    let p = plan(vec![task("A", &[], &[]), task("B", &["A"], &[])]);

    let invoker: Arc<dyn AgentInvoker> = Arc::new(RateLimitsOnePersona { persona: "A".into() });
    let orch = orchestrator(invoker, Arc::new(Store::open_in_memory().unwrap()), dir.path());

    let result = orch.execute(&p, 1).await.unwrap();
    assert_eq!(result.status, RunStatus::Paused);
    assert_eq!(result.completed, 0);

    let session_id = result.pause_session_id.expect("paused run must record a session id");
    let pause_store = PauseStore::new(dir.path().join("pause"));
    let state = pause_store.load(&session_id).unwrap();

    // Both the rate-limited task's own wave and every task in the wave
    // behind it must show up as pending, so resume can pick up the whole
    // remainder of the plan.
    let mut pending = state.pending_task_numbers.clone();
    pending.sort();
    assert_eq!(pending, vec!["A".to_string(), "B".to_string()]);
    assert!(state.completed_task_numbers.is_empty());
}

// =============================================================================
// Scenario 6: QC fail, fail, pass consumes two retries before the task
// reaches Completed on its third attempt.
// =============================================================================

struct FlakyReviewer {
    reviewer_persona: String,
    review_calls: AtomicU32,
}

#[async_trait]
impl AgentInvoker for FlakyReviewer {
    async fn invoke(&self, invocation: &AgentInvocation, _cancel: &conductor::orchestrator::cancellation::CancellationToken, _on_line: LineSink) -> Result<AgentOutput, InvokerError> {
        if invocation.persona != self.reviewer_persona {
            return Ok(AgentOutput {
                stdout: "implemented the feature".into(),
                stderr: String::new(),
                exit_code: 0,
                duration: Duration::from_millis(1),
            });
        }

        let call = self.review_calls.fetch_add(1, Ordering::SeqCst);
        let verdict = if call < 2 { "fail" } else { "pass" };
        Ok(AgentOutput {
            stdout: format!("```verdict\n{{\"verdict\": \"{verdict}\", \"feedback\": \"attempt {call}\"}}\n```"),
            stderr: String::new(),
            exit_code: 0,
            duration: Duration::from_millis(1),
        })
    }
}

#[tokio::test]
async fn qc_fail_fail_pass_reaches_completed_on_third_attempt() {
    let dir = tempdir().unwrap();
    let mut t = task("T1", &[], &[]);
    t.qc.max_attempts = Some(3);
    t.qc.reviewer_persona = Some("reviewer".into());

    let mut p = plan(vec![t]);
    p.quality = QualityPolicy {
        enabled: true,
        reviewer_persona: None,
        strictness: Default::default(),
        default_max_attempts: Some(3),
    };

    let invoker: Arc<dyn AgentInvoker> =
        Arc::new(FlakyReviewer { reviewer_persona: "reviewer".into(), review_calls: AtomicU32::new(0) });
    let store = Arc::new(Store::open_in_memory().unwrap());
    let orch = orchestrator(invoker, store.clone(), dir.path());

    let result = orch.execute(&p, 1).await.unwrap();
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.completed, 1);

    let history = store.get_execution_history(&p.plan_file, "T1", Page::default()).unwrap();
    assert_eq!(history.len(), 3, "fail, fail, pass should record exactly three attempts");
    assert!(!history[0].record.success);
    assert!(!history[1].record.success);
    assert!(history[2].record.success);
}

// =============================================================================
// File-conflict safety: two tasks touching the same file, in the same
// topological layer, must never run concurrently.
// =============================================================================

struct TracksConcurrency {
    active: AtomicUsize,
    max_observed: AtomicUsize,
    hold: Duration,
}

#[async_trait]
impl AgentInvoker for TracksConcurrency {
    async fn invoke(&self, _invocation: &AgentInvocation, _cancel: &conductor::orchestrator::cancellation::CancellationToken, _on_line: LineSink) -> Result<AgentOutput, InvokerError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_observed.fetch_max(now_active, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(AgentOutput {
            stdout: "ok".into(),
            stderr: String::new(),
            exit_code: 0,
            duration: self.hold,
        })
    }
}

#[tokio::test]
async fn conflicting_tasks_in_one_layer_never_run_concurrently() {
    let dir = tempdir().unwrap();
    // A and B have no dependency between them (same layer) but touch the
    // same file, so the wave planner must place them in separate bundles
    // and the orchestrator must run those bundles as separate waves.
    let p = plan(vec![task("A", &[], &["shared.rs"]), task("B", &[], &["shared.rs"])]);

    let tracker = Arc::new(TracksConcurrency {
        active: AtomicUsize::new(0),
        max_observed: AtomicUsize::new(0),
        hold: Duration::from_millis(30),
    });
    let invoker: Arc<dyn AgentInvoker> = tracker.clone();
    let orch = orchestrator(invoker, Arc::new(Store::open_in_memory().unwrap()), dir.path());

    let waves = orch.plan_waves(&p).unwrap();
    assert_eq!(waves.len(), 2, "file-conflicting tasks in one layer must split into separate waves");

    let result = orch.execute(&p, 1).await.unwrap();
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.completed, 2);
    assert_eq!(tracker.max_observed.load(Ordering::SeqCst), 1, "conflicting tasks overlapped in time");
}
