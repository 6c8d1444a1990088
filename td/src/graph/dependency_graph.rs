//! Adjacency-list dependency graph over a Plan's tasks (spec.md §4.1).

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::domain::{Plan, Task};
use crate::error::ConductorError;

/// Directed graph over task Numbers: an edge `u -> v` means `v` depends on `u`.
pub struct DependencyGraph {
    /// Original author order, used to break ties within a layer.
    order: HashMap<String, usize>,
    successors: HashMap<String, Vec<String>>,
    predecessors: HashMap<String, Vec<String>>,
    indegree: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Build the graph from a task list. Fails with `InvalidPlan` if any
    /// dependency Number does not resolve within the same plan.
    pub fn build(tasks: &[Task]) -> Result<Self, ConductorError> {
        debug!(task_count = tasks.len(), "DependencyGraph::build: called");
        let numbers: HashSet<&str> = tasks.iter().map(|t| t.number.as_str()).collect();

        let mut order = HashMap::new();
        let mut successors: HashMap<String, Vec<String>> = HashMap::new();
        let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
        let mut indegree: HashMap<String, usize> = HashMap::new();

        for (idx, task) in tasks.iter().enumerate() {
            order.insert(task.number.clone(), idx);
            successors.entry(task.number.clone()).or_default();
            predecessors.entry(task.number.clone()).or_default();
            indegree.entry(task.number.clone()).or_insert(0);
        }

        for task in tasks {
            for dep in &task.deps {
                if !numbers.contains(dep.as_str()) {
                    debug!(task = %task.number, %dep, "DependencyGraph::build: unresolved dependency");
                    return Err(ConductorError::InvalidPlan(format!(
                        "task {} depends on unknown task {}",
                        task.number, dep
                    )));
                }
                successors.get_mut(dep).unwrap().push(task.number.clone());
                predecessors.get_mut(&task.number).unwrap().push(dep.clone());
                *indegree.get_mut(&task.number).unwrap() += 1;
            }
        }

        Ok(Self {
            order,
            successors,
            predecessors,
            indegree,
        })
    }

    pub fn predecessors_of(&self, number: &str) -> &[String] {
        self.predecessors.get(number).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn successors_of(&self, number: &str) -> &[String] {
        self.successors.get(number).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True iff DFS from some node revisits a node still on the recursion
    /// stack (a grey node); see spec.md §8 "cycle detection soundness".
    pub fn has_cycle(&self) -> bool {
        let mut visited = HashSet::new();
        let mut in_stack = HashSet::new();

        for node in self.order.keys() {
            if !visited.contains(node.as_str()) && self.has_cycle_dfs(node, &mut visited, &mut in_stack) {
                return true;
            }
        }
        false
    }

    fn has_cycle_dfs<'a>(&'a self, node: &'a str, visited: &mut HashSet<&'a str>, in_stack: &mut HashSet<&'a str>) -> bool {
        visited.insert(node);
        in_stack.insert(node);

        for succ in self.successors_of(node) {
            if !visited.contains(succ.as_str()) {
                if self.has_cycle_dfs(succ, visited, in_stack) {
                    return true;
                }
            } else if in_stack.contains(succ.as_str()) {
                return true;
            }
        }

        in_stack.remove(node);
        false
    }

    /// Kahn's algorithm: Numbers with indegree 0 form layer 0; remove them and
    /// repeat. Ties within a layer break by the task's original author order.
    pub fn topological_layers(&self) -> Result<Vec<Vec<String>>, ConductorError> {
        debug!("DependencyGraph::topological_layers: called");
        let mut indegree = self.indegree.clone();
        let mut layers = Vec::new();
        let mut remaining = self.order.len();

        loop {
            let mut layer: Vec<String> = indegree
                .iter()
                .filter(|(_, &deg)| deg == 0)
                .map(|(n, _)| n.clone())
                .collect();

            if layer.is_empty() {
                break;
            }

            layer.sort_by_key(|n| self.order[n]);
            for node in &layer {
                indegree.remove(node);
                remaining -= 1;
                for succ in self.successors_of(node) {
                    if let Some(deg) = indegree.get_mut(succ) {
                        *deg -= 1;
                    }
                }
            }
            layers.push(layer);
        }

        if remaining != 0 {
            debug!(remaining, "DependencyGraph::topological_layers: cycle detected");
            return Err(ConductorError::InvalidPlan(
                "dependency graph contains a cycle".to_string(),
            ));
        }

        debug!(layer_count = layers.len(), "DependencyGraph::topological_layers: complete");
        Ok(layers)
    }
}

/// Convenience wrapper used by the orchestrator factory: builds the graph and
/// validates the plan's structural invariants in one call.
pub fn build_and_validate(plan: &Plan) -> Result<DependencyGraph, ConductorError> {
    plan.validate()?;
    let graph = DependencyGraph::build(&plan.tasks)?;
    if graph.has_cycle() {
        return Err(ConductorError::InvalidPlan(
            "dependency graph contains a cycle".to_string(),
        ));
    }
    Ok(graph)
}
