//! Command-line argument surface (spec.md §6).
//!
//! This module only maps flags to the values `main` needs to build an
//! `Orchestrator` request; the broader CLI "product" (colour, tables,
//! interactive prompts) lives outside the core per spec.md §1 Non-goals.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(author, version = env!("GIT_DESCRIBE"), about = "Autonomous orchestrator for multi-agent implementation plans", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a plan file
    Run(RunArgs),

    /// Inspect and manage rate-limit pause checkpoints
    Budget {
        #[command(subcommand)]
        action: BudgetCommand,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the plan file
    pub plan_file: PathBuf,

    /// Validate the plan and compute its wave schedule without spawning any agent
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum concurrent agent invocations per wave (0 = unlimited)
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Overall run deadline, e.g. "2h", "30m", "45s"
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Consult telemetry and elide tasks already recorded as successful for this plan
    #[arg(long, conflicts_with = "retry_failed")]
    pub skip_completed: bool,

    /// Re-run only the tasks telemetry recorded as failed for this plan
    #[arg(long, conflicts_with = "skip_completed")]
    pub retry_failed: bool,

    /// Path to a conductor.yml config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory to write a JSONL run log to, in addition to console output
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Verbose (debug-level) logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum BudgetCommand {
    /// Resume a paused run (the most recent ready checkpoint if no session-id is given)
    Resume {
        session_id: Option<String>,

        /// Path to a conductor.yml config file
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        verbose: bool,
    },

    /// List paused checkpoints that are not yet ready to resume
    ListPaused {
        /// Path to a conductor.yml config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Parses a duration given as a bare integer (seconds) or an integer
/// suffixed with `s`, `m`, or `h`.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit) = match raw.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&raw[..raw.len() - 1], c),
        _ => (raw, 's'),
    };
    let value: u64 = digits.parse().map_err(|_| format!("invalid duration {raw:?}: expected e.g. \"2h\", \"30m\", \"45s\""))?;
    let secs = match unit {
        's' => value,
        'm' => value * 60,
        'h' => value * 3600,
        other => return Err(format!("invalid duration unit {other:?}: expected one of s, m, h")),
    };
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_seconds() {
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn parses_minutes_and_hours() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(30 * 60));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(2 * 3600));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_duration("5x").is_err());
    }

    #[test]
    fn run_and_budget_subcommands_parse() {
        let cli = Cli::parse_from(["conductor", "run", "plan.yml", "--dry-run", "--max-concurrency", "2"]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.plan_file, PathBuf::from("plan.yml"));
                assert!(args.dry_run);
                assert_eq!(args.max_concurrency, Some(2));
            }
            Command::Budget { .. } => panic!("expected Run"),
        }

        let cli = Cli::parse_from(["conductor", "budget", "list-paused"]);
        assert!(matches!(cli.command, Command::Budget { action: BudgetCommand::ListPaused { .. } }));
    }

    #[test]
    fn skip_completed_and_retry_failed_are_mutually_exclusive() {
        let result = Cli::try_parse_from(["conductor", "run", "plan.yml", "--skip-completed", "--retry-failed"]);
        assert!(result.is_err());
    }
}
