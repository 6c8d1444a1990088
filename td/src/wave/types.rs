//! Wave and bundle types (spec.md §3).

use crate::domain::Task;

/// A disjoint subset of a layer, safe to run fully in parallel.
#[derive(Debug, Clone)]
pub struct TaskBundle {
    pub tasks: Vec<String>,
}

/// An ordered sequence of disjoint task bundles.
#[derive(Debug, Clone)]
pub struct Wave {
    pub bundles: Vec<TaskBundle>,
    /// Optional max-concurrency override for this wave.
    pub max_concurrency: Option<usize>,
}

impl Wave {
    pub fn task_numbers(&self) -> Vec<&str> {
        self.bundles.iter().flat_map(|b| b.tasks.iter().map(String::as_str)).collect()
    }
}

/// File-set placement test used by the bin-packing rule in spec.md §4.2.
pub(super) fn fits_in_bundle(task: &Task, bundle_tasks: &[&Task]) -> bool {
    let disjoint = bundle_tasks.iter().all(|other| !task.conflicts_with(other));
    let all_same_worktree_group = !bundle_tasks.is_empty() && bundle_tasks.iter().all(|other| task.shares_worktree_group(other));
    disjoint || all_same_worktree_group
}
