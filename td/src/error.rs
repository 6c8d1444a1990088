//! Conductor's error taxonomy.
//!
//! Component-local errors (`WorktreeError`-style) stay idiomatic within their
//! own module; they converge into `ConductorError` only at the C5/C6/C7 seams
//! the orchestration contract names, via `From` impls.

use thiserror::Error;

/// Errors that can terminate or redirect a plan run.
#[derive(Debug, Error)]
pub enum ConductorError {
    /// Cycles, missing dependencies, undefined agent persona. Surfaced
    /// pre-execution, before any wave starts.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Agent binary missing or not executable.
    #[error("failed to spawn agent for task {task}: {message}")]
    SpawnError { task: String, message: String },

    /// Non-zero exit, QC fail after retries, or per-attempt timeout exceeded.
    #[error("task {task} failed: {message}")]
    TaskFailed { task: String, message: String },

    /// Upstream rate-limit signature detected in agent output.
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// Context deadline or user signal (SIGINT/equivalent).
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The telemetry store could not be opened.
    #[error("telemetry store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ConductorError {
    /// Process exit code per spec.md §7.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidPlan(_) => 2,
            Self::SpawnError { .. } | Self::TaskFailed { .. } => 1,
            Self::RateLimited { .. } => 3,
            Self::Cancelled(_) => 4,
            Self::StoreUnavailable(_) => 1,
        }
    }
}

impl From<conductor_store::StoreError> for ConductorError {
    fn from(e: conductor_store::StoreError) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

pub type ConductorResult<T> = Result<T, ConductorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(ConductorError::InvalidPlan("x".into()).exit_code(), 2);
        assert_eq!(
            ConductorError::RateLimited { message: "x".into() }.exit_code(),
            3
        );
        assert_eq!(ConductorError::Cancelled("x".into()).exit_code(), 4);
        assert_eq!(
            ConductorError::TaskFailed {
                task: "T1".into(),
                message: "x".into()
            }
            .exit_code(),
            1
        );
    }
}
