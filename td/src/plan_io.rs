//! Plan ingestion point (spec.md §6): the core never parses plan-file
//! surface syntax (Markdown/YAML) itself; it consumes a normalised
//! in-memory `Plan`. `PlanSource` is the seam an external parser implements;
//! `load_yaml` is a thin convenience for the common case of a plan already
//! expressed in the structured-YAML surface syntax spec.md §6 names.

use std::fs;
use std::path::Path;

use crate::domain::Plan;
use crate::error::ConductorError;

/// Implemented by external plan-file parsers; the core only ever consumes
/// the resulting `Plan` value.
pub trait PlanSource {
    fn load(&self, path: &Path) -> Result<Plan, ConductorError>;
}

/// Reads a structured-YAML plan file and validates it (spec.md §3
/// invariants). Does not perform graph/cycle validation; that's C1's job.
pub fn load_yaml(path: &Path) -> Result<Plan, ConductorError> {
    let content = fs::read_to_string(path)
        .map_err(|e| ConductorError::InvalidPlan(format!("failed to read plan file {}: {e}", path.display())))?;

    let mut plan: Plan = serde_yaml::from_str(&content)
        .map_err(|e| ConductorError::InvalidPlan(format!("failed to parse plan file {}: {e}", path.display())))?;

    if plan.plan_file.is_empty() {
        plan.plan_file = path.display().to_string();
    }

    plan.validate()?;
    Ok(plan)
}
