//! Maintenance CLI for the telemetry store: inspect aggregates and run the
//! explicit purge operation. Conductor itself talks to `Store` as a library;
//! this binary exists for operators poking at a `.conductor/store.db` file
//! directly.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use tracing::info;

use conductor_store::{Page, Store};

#[derive(Parser, Debug)]
#[command(name = "conductor-store")]
#[command(author, version, about = "Inspect and maintain a Conductor telemetry store", long_about = None)]
struct Cli {
    /// Path to the SQLite telemetry database
    #[arg(short, long, default_value = ".conductor/store.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show overall (or per-plan) success/failure counts
    Summary {
        /// Restrict to a single plan file
        #[arg(short, long)]
        plan_file: Option<String>,
    },

    /// List executions recorded for a plan file
    Executions {
        /// Plan file to list
        #[arg(required = true)]
        plan_file: String,

        /// Maximum rows to return
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Show every attempt recorded for a single task number
    History {
        /// Plan file the task belongs to
        #[arg(required = true)]
        plan_file: String,

        /// Task number, e.g. "3.2"
        #[arg(required = true)]
        task_number: String,
    },

    /// Per-agent-persona totals
    AgentStats,

    /// Per-tool call totals
    ToolStats,

    /// Aggregate bash-command totals
    BashStats,

    /// Most recently started behavioural sessions
    Recent {
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Delete rows older than an RFC-3339 timestamp
    Purge {
        /// Cutoff timestamp; rows created before this are removed
        #[arg(required = true)]
        older_than: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let store = Store::open(&cli.db).context("failed to open telemetry store")?;
    info!(db = ?cli.db, "conductor-store: opened");

    match cli.command {
        Command::Summary { plan_file } => {
            let stats = store.get_summary_stats(plan_file.as_deref())?;
            println!("{stats:#?}");
        }
        Command::Executions { plan_file, limit } => {
            let rows = store.get_executions(&plan_file, Page { limit, offset: 0 })?;
            for row in rows {
                println!("{row:?}");
            }
        }
        Command::History { plan_file, task_number } => {
            let rows = store.get_execution_history(&plan_file, &task_number, Page::default())?;
            for row in rows {
                println!("{row:?}");
            }
        }
        Command::AgentStats => {
            for stat in store.get_agent_type_stats()? {
                println!("{stat:?}");
            }
        }
        Command::ToolStats => {
            for stat in store.get_tool_stats()? {
                println!("{stat:?}");
            }
        }
        Command::BashStats => {
            println!("{:?}", store.get_bash_stats()?);
        }
        Command::Recent { limit } => {
            for session in store.get_recent_sessions(Page { limit, offset: 0 })? {
                println!("{session:?}");
            }
        }
        Command::Purge { older_than } => {
            let purged = store.purge_older_than(&older_than)?;
            println!("purged {purged} row(s)");
        }
    }

    Ok(())
}
