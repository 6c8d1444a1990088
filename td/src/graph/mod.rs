//! Dependency graph construction and topological layering (C1).

mod dependency_graph;

pub use dependency_graph::{DependencyGraph, build_and_validate};
