//! `CalculateWaves` and `ValidateRegistryPrerequisites` (spec.md §4.2).

use std::collections::HashMap;

use tracing::debug;

use super::types::{TaskBundle, Wave, fits_in_bundle};
use crate::domain::{Plan, Task};
use crate::error::ConductorError;
use crate::graph::DependencyGraph;

/// Refine topological layers into waves: within each layer, first-fit a task
/// into an existing bundle if its file set is disjoint from the bundle (or it
/// shares a worktree group with every occupant); otherwise open a new bundle.
pub fn calculate_waves(plan: &Plan, graph: &DependencyGraph) -> Result<Vec<Wave>, ConductorError> {
    let layers = graph.topological_layers()?;
    let by_number: HashMap<&str, &Task> = plan.tasks.iter().map(|t| (t.number.as_str(), t)).collect();

    let mut waves = Vec::new();
    for layer in &layers {
        let mut bundles: Vec<Vec<&str>> = Vec::new();

        for number in layer {
            let task = by_number[number.as_str()];
            let placed = bundles.iter_mut().find(|bundle| {
                let bundle_tasks: Vec<&Task> = bundle.iter().map(|n| by_number[*n]).collect();
                fits_in_bundle(task, &bundle_tasks)
            });

            match placed {
                Some(bundle) => bundle.push(number.as_str()),
                None => bundles.push(vec![number.as_str()]),
            }
        }

        debug!(layer_size = layer.len(), bundle_count = bundles.len(), "calculate_waves: layer bundled");

        // One Wave per bundle, not per layer: bundles within a layer run as
        // successive waves so file-conflicting tasks never share a
        // concurrency window, while tasks inside one bundle (one Wave) still
        // run concurrently under the orchestrator's per-wave semaphore.
        for tasks in bundles {
            waves.push(Wave {
                bundles: vec![TaskBundle {
                    tasks: tasks.into_iter().map(String::from).collect(),
                }],
                max_concurrency: plan.max_concurrency,
            });
        }
    }

    Ok(waves)
}

/// Rejects a task whose declared `inputs` are not produced by any task
/// reachable via its dependency chain. A no-op for plans that don't declare
/// data-flow bindings.
pub fn validate_registry_prerequisites(plan: &Plan, graph: &DependencyGraph) -> Result<(), ConductorError> {
    let by_number: HashMap<&str, &Task> = plan.tasks.iter().map(|t| (t.number.as_str(), t)).collect();

    for task in &plan.tasks {
        if task.inputs.is_empty() {
            continue;
        }

        let reachable = reachable_predecessors(task.number.as_str(), graph);
        for input in &task.inputs {
            let produced = reachable
                .iter()
                .filter_map(|n| by_number.get(n.as_str()))
                .any(|t| t.outputs.iter().any(|o| o == input));
            if !produced {
                return Err(ConductorError::InvalidPlan(format!(
                    "task {} declares input '{}' not produced by any predecessor",
                    task.number, input
                )));
            }
        }
    }

    Ok(())
}

fn reachable_predecessors(number: &str, graph: &DependencyGraph) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut stack = vec![number.to_string()];
    let mut result = Vec::new();

    while let Some(current) = stack.pop() {
        for pred in graph.predecessors_of(&current) {
            if seen.insert(pred.clone()) {
                result.push(pred.clone());
                stack.push(pred.clone());
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskQcOverride;

    fn task(number: &str, files: &[&str], deps: &[&str]) -> Task {
        Task {
            number: number.into(),
            name: "name".into(),
            prompt: "prompt".into(),
            files: files.iter().map(|s| s.to_string()).collect(),
            deps: deps.iter().map(|s| s.to_string()).collect(),
            agent: None,
            worktree_group: None,
            priority: Default::default(),
            qc: TaskQcOverride::default(),
            inputs: vec![],
            outputs: vec![],
        }
    }

    fn plan(tasks: Vec<Task>) -> Plan {
        Plan {
            tasks,
            ..Default::default()
        }
    }

    #[test]
    fn conflict_in_layer_splits_into_successive_bundles() {
        let p = plan(vec![task("A", &["x", "y"], &[]), task("B", &["y", "z"], &[])]);
        let graph = DependencyGraph::build(&p.tasks).unwrap();
        let waves = calculate_waves(&p, &graph).unwrap();
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0].bundles.len(), 1);
        assert_eq!(waves[0].bundles[0].tasks, vec!["A"]);
        assert_eq!(waves[1].bundles[0].tasks, vec!["B"]);
    }

    #[test]
    fn disjoint_files_share_one_bundle() {
        let p = plan(vec![task("A", &["x"], &[]), task("B", &["y"], &[]), task("C", &["z"], &[])]);
        let graph = DependencyGraph::build(&p.tasks).unwrap();
        let waves = calculate_waves(&p, &graph).unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].bundles.len(), 1);
        assert_eq!(waves[0].bundles[0].tasks, vec!["A", "B", "C"]);
    }

    #[test]
    fn diamond_produces_three_waves() {
        let p = plan(vec![
            task("A", &["a"], &[]),
            task("B", &["b"], &["A"]),
            task("C", &["c"], &["A"]),
            task("D", &["d"], &["B", "C"]),
        ]);
        let graph = DependencyGraph::build(&p.tasks).unwrap();
        let waves = calculate_waves(&p, &graph).unwrap();
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[1].bundles[0].tasks, vec!["B", "C"]);
    }

    #[test]
    fn worktree_group_exempts_conflicting_files_from_split() {
        let mut a = task("A", &["shared"], &[]);
        let mut b = task("B", &["shared"], &[]);
        a.worktree_group = Some("wt1".into());
        b.worktree_group = Some("wt1".into());
        let p = plan(vec![a, b]);
        let graph = DependencyGraph::build(&p.tasks).unwrap();
        let waves = calculate_waves(&p, &graph).unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].bundles.len(), 1);
    }

    #[test]
    fn registry_prerequisites_reject_unproduced_input() {
        let mut consumer = task("B", &["b"], &["A"]);
        consumer.inputs = vec!["schema".into()];
        let producer = task("A", &["a"], &[]);
        let p = plan(vec![producer, consumer]);
        let graph = DependencyGraph::build(&p.tasks).unwrap();
        assert!(validate_registry_prerequisites(&p, &graph).is_err());
    }

    #[test]
    fn registry_prerequisites_accept_produced_input() {
        let mut producer = task("A", &["a"], &[]);
        producer.outputs = vec!["schema".into()];
        let mut consumer = task("B", &["b"], &["A"]);
        consumer.inputs = vec!["schema".into()];
        let p = plan(vec![producer, consumer]);
        let graph = DependencyGraph::build(&p.tasks).unwrap();
        assert!(validate_registry_prerequisites(&p, &graph).is_ok());
    }
}
