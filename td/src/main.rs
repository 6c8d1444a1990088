//! Conductor entry point: parses the CLI surface, assembles an
//! `Orchestrator` from configuration, and maps its outcome to the process
//! exit codes spec.md §6/§7 document.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};

use conductor::cli::{BudgetCommand, Cli, Command, RunArgs};
use conductor::config::Config;
use conductor::domain::Plan;
use conductor::error::{ConductorError, ConductorResult};
use conductor::invoker::{AgentInvoker, ProcessInvoker};
use conductor::logging::{ConsoleSink, FileSink, LogFanout, LoggerSink, TelemetrySink};
use conductor::orchestrator::Orchestrator;
use conductor::orchestrator::cancellation::CancellationToken;
use conductor::pause::PauseStore;
use conductor::plan_io;

use clap::Parser;
use conductor_store::{Page, Store};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(verbose_flag(&cli.command));

    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Budget { action } => budget(action).await,
    };

    match result {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            error!(error = %e, "conductor: run failed");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn verbose_flag(command: &Command) -> bool {
    match command {
        Command::Run(args) => args.verbose,
        Command::Budget { action: BudgetCommand::Resume { verbose, .. } } => *verbose,
        Command::Budget { action: BudgetCommand::ListPaused { .. } } => false,
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::new(filter)).init();
}

async fn run(args: RunArgs) -> ConductorResult<i32> {
    let config = Config::load(args.config.as_ref()).map_err(|e| ConductorError::InvalidPlan(e.to_string()))?;

    let store = Arc::new(Store::open(config.home_dir().join("store.db"))?);
    let mut plan: Plan = plan_io::load_yaml(&args.plan_file)?;

    if let Some(max_concurrency) = args.max_concurrency {
        plan.max_concurrency = (max_concurrency != 0).then_some(max_concurrency);
    }
    if let Some(timeout) = args.timeout {
        plan.timeout_secs = Some(timeout.as_secs());
    }
    if args.skip_completed {
        skip_completed_tasks(&mut plan, &store)?;
    } else if args.retry_failed {
        retry_failed_tasks_only(&mut plan, &store)?;
    }

    let run_index = next_run_index(&store, &plan.plan_file)?;

    let invoker: Arc<dyn AgentInvoker> =
        Arc::new(ProcessInvoker::new(config.agent_bin(), config.agent.termination_grace()));
    let pause_store = PauseStore::new(config.home_dir().join("pause"));

    let mut sinks: Vec<Box<dyn LoggerSink>> = vec![Box::new(ConsoleSink)];
    if let Some(log_dir) = &args.log_dir {
        sinks.push(Box::new(FileSink::new(log_dir).map_err(|e| ConductorError::StoreUnavailable(e.to_string()))?));
    }
    sinks.push(Box::new(TelemetrySink::new(store.clone(), plan.plan_file.clone(), run_index)));
    let logger = LogFanout::new(sinks);

    let working_dir = args
        .plan_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let orchestrator = Orchestrator::new(
        invoker,
        store.clone(),
        pause_store,
        logger,
        working_dir,
        config.concurrency.default_max_concurrency,
        config.agent.attempt_timeout(),
    );

    if args.dry_run {
        let waves = orchestrator.plan_waves(&plan)?;
        println!("plan valid: {} task(s) across {} wave(s)", plan.tasks.len(), waves.len());
        for (index, wave) in waves.iter().enumerate() {
            println!("  wave {index}: {:?}", wave.task_numbers());
        }
        return Ok(0);
    }

    let cancel = CancellationToken::new(None);
    let sigint_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("conductor: received interrupt, cancelling in-flight tasks");
            sigint_cancel.cancel();
        }
    });

    let result = orchestrator.execute_with_cancel(&plan, run_index, Some(&cancel)).await?;

    print_outcome(&result);

    Ok(match result.status {
        conductor::domain::RunStatus::Completed => 0,
        conductor::domain::RunStatus::Failed => 1,
        conductor::domain::RunStatus::Paused => 3,
        conductor::domain::RunStatus::Cancelled => 4,
    })
}

async fn budget(action: BudgetCommand) -> ConductorResult<i32> {
    match action {
        BudgetCommand::Resume { session_id, config, verbose: _ } => resume(session_id, config).await,
        BudgetCommand::ListPaused { config } => list_paused(config),
    }
}

async fn resume(session_id: Option<String>, config_path: Option<PathBuf>) -> ConductorResult<i32> {
    let config = Config::load(config_path.as_ref()).map_err(|e| ConductorError::InvalidPlan(e.to_string()))?;
    let pause_store = PauseStore::new(config.home_dir().join("pause"));

    let state = match session_id {
        Some(id) => pause_store.load(&id).map_err(|e| ConductorError::InvalidPlan(e.to_string()))?,
        None => {
            let mut ready = pause_store.list_ready().map_err(|e| ConductorError::InvalidPlan(e.to_string()))?;
            ready.sort_by_key(|s| s.resume_at);
            ready
                .into_iter()
                .next()
                .ok_or_else(|| ConductorError::InvalidPlan("no ready checkpoint to resume".into()))?
        }
    };

    if !state.is_ready(std::time::SystemTime::now()) {
        return Err(ConductorError::RateLimited {
            message: format!("session {} is not ready until {}", state.session_id, state.resume_at),
        });
    }

    let store = Arc::new(Store::open(config.home_dir().join("store.db"))?);
    let mut plan: Plan = plan_io::load_yaml(std::path::Path::new(&state.plan_file))?;
    let pending: std::collections::HashSet<String> = state.pending_task_numbers.iter().cloned().collect();
    plan.tasks.retain(|t| pending.contains(&t.number));
    for task in &mut plan.tasks {
        task.deps.retain(|d| pending.contains(d));
    }

    let run_index = next_run_index(&store, &plan.plan_file)?;
    let invoker: Arc<dyn AgentInvoker> =
        Arc::new(ProcessInvoker::new(config.agent_bin(), config.agent.termination_grace()));
    let logger = LogFanout::new(vec![
        Box::new(ConsoleSink),
        Box::new(TelemetrySink::new(store.clone(), plan.plan_file.clone(), run_index)),
    ]);
    let orchestrator = Orchestrator::new(
        invoker,
        store.clone(),
        PauseStore::new(config.home_dir().join("pause")),
        logger,
        PathBuf::from("."),
        config.concurrency.default_max_concurrency,
        config.agent.attempt_timeout(),
    );

    let result = orchestrator.execute(&plan, run_index).await?;
    print_outcome(&result);

    if result.status != conductor::domain::RunStatus::Paused {
        pause_store.delete(&state.session_id).ok();
    }

    Ok(match result.status {
        conductor::domain::RunStatus::Completed => 0,
        conductor::domain::RunStatus::Failed => 1,
        conductor::domain::RunStatus::Paused => 3,
        conductor::domain::RunStatus::Cancelled => 4,
    })
}

fn list_paused(config_path: Option<PathBuf>) -> ConductorResult<i32> {
    let config = Config::load(config_path.as_ref()).map_err(|e| ConductorError::InvalidPlan(e.to_string()))?;
    let pause_store = PauseStore::new(config.home_dir().join("pause"));
    let states = pause_store.list_paused().map_err(|e| ConductorError::InvalidPlan(e.to_string()))?;

    if states.is_empty() {
        println!("no paused runs");
    }
    for state in states {
        println!(
            "{}  plan={}  resume_at={}  pending={}",
            state.session_id,
            state.plan_file,
            state.resume_at,
            state.pending_task_numbers.len()
        );
    }
    Ok(0)
}

fn print_outcome(result: &conductor::domain::ExecutionResult) {
    match result.status {
        conductor::domain::RunStatus::Completed => {
            println!("completed: {}/{} tasks in {:?}", result.completed, result.total, result.duration);
        }
        conductor::domain::RunStatus::Failed => {
            println!("failed: {}/{} tasks completed, {} failed", result.completed, result.total, result.failed);
            for task in &result.failed_tasks {
                let head = task.stderr.lines().next().unwrap_or("");
                println!("  {} [{:?}]: {head}", task.task_number, task.status);
            }
        }
        conductor::domain::RunStatus::Paused => {
            if let Some(session_id) = &result.pause_session_id {
                println!("paused by rate limit. resume with: conductor budget resume {session_id}");
            }
        }
        conductor::domain::RunStatus::Cancelled => {
            println!("cancelled: {}/{} tasks completed before interruption", result.completed, result.total);
        }
    }
}

/// One past the highest `run_index` recorded for `plan_file`, or `1` if the
/// plan has never been run (spec.md §3 RunIndex).
fn next_run_index(store: &Store, plan_file: &str) -> ConductorResult<i64> {
    let rows = store.get_executions(plan_file, Page { limit: 1, offset: 0 })?;
    Ok(rows.first().map(|r| r.record.run_index + 1).unwrap_or(1))
}

/// Removes tasks with a prior successful attempt for this plan file, and
/// strips them from any remaining task's `deps` since their dependency is
/// already satisfied (`--skip-completed`, spec.md §6).
fn skip_completed_tasks(plan: &mut Plan, store: &Store) -> ConductorResult<()> {
    let completed = last_attempt_outcomes(store, &plan.plan_file)?
        .into_iter()
        .filter(|(_, success)| *success)
        .map(|(number, _)| number)
        .collect::<std::collections::HashSet<_>>();

    info!(count = completed.len(), "conductor: skip-completed eliding already-successful tasks");
    plan.tasks.retain(|t| !completed.contains(&t.number));
    for task in &mut plan.tasks {
        task.deps.retain(|d| !completed.contains(d));
    }
    Ok(())
}

/// Keeps only tasks whose most recent recorded attempt for this plan file
/// failed; tasks that succeeded or were never run are dropped, and
/// satisfied dependencies are stripped the same way `--skip-completed` does
/// (`--retry-failed`, spec.md §6).
fn retry_failed_tasks_only(plan: &mut Plan, store: &Store) -> ConductorResult<()> {
    let outcomes = last_attempt_outcomes(store, &plan.plan_file)?;
    let failed = outcomes
        .iter()
        .filter(|(_, success)| !*success)
        .map(|(number, _)| number.clone())
        .collect::<std::collections::HashSet<_>>();
    let known = outcomes.into_iter().map(|(number, _)| number).collect::<std::collections::HashSet<_>>();

    info!(count = failed.len(), "conductor: retry-failed restricting run to previously-failed tasks");
    plan.tasks.retain(|t| failed.contains(&t.number));
    for task in &mut plan.tasks {
        task.deps.retain(|d| !known.contains(d) || failed.contains(d));
    }
    Ok(())
}

/// The most recent recorded success flag per task number for `plan_file`,
/// scanning back far enough to cover every task the plan could name.
fn last_attempt_outcomes(store: &Store, plan_file: &str) -> ConductorResult<HashMap<String, bool>> {
    let rows = store.get_executions(plan_file, Page { limit: 10_000, offset: 0 })?;
    let mut latest: HashMap<String, bool> = HashMap::new();
    // `get_executions` orders newest-first; keep only the first (most
    // recent) row seen per task number.
    for row in rows {
        latest.entry(row.record.task_number).or_insert(row.record.success);
    }
    Ok(latest)
}
