//! Conductor: an autonomous orchestrator that executes developer-authored
//! implementation plans by spawning and coordinating external LLM-coding-
//! agent subprocesses.
//!
//! # Modules
//!
//! - [`domain`] - Plan/Task/TaskResult/ExecutionResult data model
//! - [`graph`] - Dependency graph and topological layering (C1)
//! - [`wave`] - Wave planning over file-conflict-safe bundles (C2)
//! - [`invoker`] - Agent subprocess spawning and rate-limit detection (C3)
//! - [`quality`] - Reviewer-agent quality control (C4)
//! - [`executor`] - Task and wave execution (C5, C6)
//! - [`orchestrator`] - Top-level plan driver (C7)
//! - [`pause`] - Rate-limit pause/resume checkpoints (C8)
//! - [`logging`] - Logger fan-out (C10)
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line argument surface
//! - [`plan_io`] - Plan ingestion point

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod graph;
pub mod invoker;
pub mod logging;
pub mod orchestrator;
pub mod pause;
pub mod plan_io;
pub mod quality;
pub mod wave;

pub use error::{ConductorError, ConductorResult};
