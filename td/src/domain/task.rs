//! Task and Plan domain types (spec.md §3).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::priority::Priority;
use crate::error::ConductorError;

/// Quality-control parameters scoped to a single task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskQcOverride {
    /// Retry budget override; falls back to `Plan.quality.default_max_attempts`
    pub max_attempts: Option<u32>,

    /// Reviewer persona override; falls back to `Plan.quality.reviewer_persona`
    pub reviewer_persona: Option<String>,
}

/// One unit of agent work. Identity is the opaque, author-chosen `number`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable, plan-author-chosen identifier. Not necessarily numeric despite
    /// the name; treated as an opaque string throughout (spec.md §9).
    pub number: String,

    pub name: String,
    pub prompt: String,

    /// Relative paths this task will modify.
    pub files: Vec<String>,

    /// Numbers of tasks this one depends on.
    #[serde(default)]
    pub deps: Vec<String>,

    /// Agent persona id; falls back to `Plan.default_agent` when absent.
    #[serde(default)]
    pub agent: Option<String>,

    /// Tag exempting this task from file-conflict bundling against other
    /// tasks sharing the same tag (spec.md §4.2).
    #[serde(default)]
    pub worktree_group: Option<String>,

    /// Same-wave scheduling tie-break only; never affects wave placement.
    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub qc: TaskQcOverride,

    /// Data-flow inputs this task declares it consumes, for
    /// `ValidateRegistryPrerequisites` (spec.md §4.2).
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Data-flow outputs this task declares it produces.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl Task {
    pub fn file_set(&self) -> HashSet<&str> {
        self.files.iter().map(String::as_str).collect()
    }

    pub fn conflicts_with(&self, other: &Task) -> bool {
        self.file_set().intersection(&other.file_set()).next().is_some()
    }

    pub fn shares_worktree_group(&self, other: &Task) -> bool {
        matches!((&self.worktree_group, &other.worktree_group), (Some(a), Some(b)) if a == b)
    }

    pub fn resolved_agent<'a>(&'a self, plan: &'a Plan) -> Option<&'a str> {
        self.agent.as_deref().or(plan.default_agent.as_deref())
    }

    pub fn max_attempts(&self, plan: &Plan) -> u32 {
        self.qc
            .max_attempts
            .or(plan.quality.default_max_attempts)
            .unwrap_or(1)
    }
}

/// Plan-level quality-control policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityPolicy {
    pub enabled: bool,
    pub reviewer_persona: Option<String>,
    pub strictness: Strictness,
    pub default_max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    Low,
    #[default]
    Normal,
    High,
}

/// An ordered list of Tasks plus plan-level settings (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Plan {
    /// Path of the plan file this Plan was parsed from, used to scope
    /// telemetry queries and `--skip-completed`/`--retry-failed`.
    pub plan_file: String,

    pub tasks: Vec<Task>,
    pub default_agent: Option<String>,
    pub quality: QualityPolicy,

    /// Names of worktree groups declared at plan level (informational; the
    /// scheduler only cares about the tag on each Task).
    pub worktree_groups: Vec<String>,

    /// Overall wall-clock timeout override, plan setting form of the
    /// `--timeout` CLI flag.
    pub timeout_secs: Option<u64>,

    /// Flips first-failure cancellation off (spec.md §4.6).
    pub continue_on_error: bool,

    /// Wave-level and plan-level max-concurrency override; `None` defers to
    /// `Config.concurrency.default_max_concurrency`.
    pub max_concurrency: Option<usize>,
}

impl Plan {
    /// Validate the structural invariants spec.md §3 names: Number
    /// uniqueness, dependency resolution, non-empty name/prompt. Does not
    /// check acyclicity; that is `DependencyGraph::build`'s job.
    pub fn validate(&self) -> Result<(), ConductorError> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.number.as_str()) {
                return Err(ConductorError::InvalidPlan(format!(
                    "duplicate task number: {}",
                    task.number
                )));
            }
            if task.name.trim().is_empty() {
                return Err(ConductorError::InvalidPlan(format!("task {} has an empty name", task.number)));
            }
            if task.prompt.trim().is_empty() {
                return Err(ConductorError::InvalidPlan(format!(
                    "task {} has an empty prompt",
                    task.number
                )));
            }
        }

        let numbers: HashSet<&str> = self.tasks.iter().map(|t| t.number.as_str()).collect();
        for task in &self.tasks {
            for dep in &task.deps {
                if !numbers.contains(dep.as_str()) {
                    return Err(ConductorError::InvalidPlan(format!(
                        "task {} depends on unknown task {}",
                        task.number, dep
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn task(&self, number: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.number == number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(number: &str, files: &[&str], deps: &[&str]) -> Task {
        Task {
            number: number.into(),
            name: format!("Task {number}"),
            prompt: "do it".into(),
            files: files.iter().map(|s| s.to_string()).collect(),
            deps: deps.iter().map(|s| s.to_string()).collect(),
            agent: None,
            worktree_group: None,
            priority: Priority::default(),
            qc: TaskQcOverride::default(),
            inputs: vec![],
            outputs: vec![],
        }
    }

    #[test]
    fn validate_rejects_duplicate_numbers() {
        let plan = Plan {
            tasks: vec![task("T1", &["a"], &[]), task("T1", &["b"], &[])],
            ..Default::default()
        };
        assert!(matches!(plan.validate(), Err(ConductorError::InvalidPlan(_))));
    }

    #[test]
    fn validate_rejects_unknown_dependency() {
        let plan = Plan {
            tasks: vec![task("T1", &["a"], &["missing"])],
            ..Default::default()
        };
        assert!(matches!(plan.validate(), Err(ConductorError::InvalidPlan(_))));
    }

    #[test]
    fn validate_rejects_empty_name_or_prompt() {
        let mut t = task("T1", &["a"], &[]);
        t.prompt = "   ".into();
        let plan = Plan {
            tasks: vec![t],
            ..Default::default()
        };
        assert!(plan.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_plan() {
        let plan = Plan {
            tasks: vec![task("T1", &["a"], &[]), task("T2", &["b"], &["T1"])],
            ..Default::default()
        };
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn conflicts_with_detects_file_overlap() {
        let a = task("A", &["x", "y"], &[]);
        let b = task("B", &["y", "z"], &[]);
        let c = task("C", &["z"], &[]);
        assert!(a.conflicts_with(&b));
        assert!(!a.conflicts_with(&c));
    }

    #[test]
    fn worktree_group_exempts_file_conflicts() {
        let mut a = task("A", &["x"], &[]);
        let mut b = task("B", &["x"], &[]);
        a.worktree_group = Some("group-1".into());
        b.worktree_group = Some("group-1".into());
        assert!(a.shares_worktree_group(&b));
    }
}
