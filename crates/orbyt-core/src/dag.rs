// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Workflow DAG construction and ordering.
//!
//! The graph is immutable after [`WorkflowDag::build`]: edges run from a
//! dependency to its dependent, so entry points have in-degree zero.
//! Cycle detection walks dependency edges with an explicit stack so the
//! offending path can be reported verbatim.

use crate::diagnostics::{codes, suggest, Diagnostic, DiagnosticList};
use crate::plan::PlannedStep;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};

/// Directed acyclic graph over planned steps.
#[derive(Debug, Clone)]
pub struct WorkflowDag {
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
}

impl WorkflowDag {
    /// Builds the DAG, rejecting duplicate ids, self-dependencies and
    /// references to undeclared steps. All problems are aggregated.
    pub fn build(steps: &[PlannedStep]) -> Result<Self, DiagnosticList> {
        let mut diagnostics = DiagnosticList::new();
        let mut graph = DiGraph::new();
        let mut indices: HashMap<String, NodeIndex> = HashMap::with_capacity(steps.len());

        for (position, step) in steps.iter().enumerate() {
            if indices.contains_key(&step.id) {
                diagnostics.push(
                    Diagnostic::error(
                        codes::GRAPH_DUPLICATE_ID,
                        format!("duplicate step id `{}`", step.id),
                    )
                    .with_path(format!("steps[{position}].id")),
                );
                continue;
            }
            let index = graph.add_node(step.id.clone());
            indices.insert(step.id.clone(), index);
        }

        let declared: Vec<&str> = indices.keys().map(String::as_str).collect();
        for (position, step) in steps.iter().enumerate() {
            let Some(&dependent) = indices.get(&step.id) else {
                continue;
            };
            for need in &step.needs {
                if *need == step.id {
                    diagnostics.push(
                        Diagnostic::error(
                            codes::GRAPH_SELF_DEPENDENCY,
                            format!("step `{}` depends on itself", step.id),
                        )
                        .with_path(format!("steps[{position}].needs")),
                    );
                    continue;
                }
                match indices.get(need) {
                    Some(&dependency) => {
                        graph.add_edge(dependency, dependent, ());
                    }
                    None => {
                        let mut diagnostic = Diagnostic::error(
                            codes::GRAPH_MISSING_DEPENDENCY,
                            format!("step `{}` needs unknown step `{need}`", step.id),
                        )
                        .with_path(format!("steps[{position}].needs"));
                        if let Some(candidate) = suggest(need, declared.iter().copied()) {
                            diagnostic =
                                diagnostic.with_hint(format!("did you mean `{candidate}`?"));
                        }
                        diagnostics.push(diagnostic);
                    }
                }
            }
        }

        if diagnostics.has_errors() {
            return Err(diagnostics);
        }

        Ok(Self { graph, indices })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.indices.contains_key(id)
    }

    /// Direct dependencies (`needs`) of a step.
    pub fn deps(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct dependents of a step.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&str> {
        let Some(&index) = self.indices.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(index, direction)
            .map(|n| self.graph[n].as_str())
            .collect()
    }

    /// Number of direct dependencies of a step.
    pub fn in_degree(&self, id: &str) -> usize {
        self.deps(id).len()
    }

    /// Steps with no dependencies, in lexicographic order.
    pub fn entry_points(&self) -> Vec<&str> {
        self.boundary(Direction::Incoming)
    }

    /// Steps with no dependents, in lexicographic order.
    pub fn exit_points(&self) -> Vec<&str> {
        self.boundary(Direction::Outgoing)
    }

    fn boundary(&self, direction: Direction) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .graph
            .node_indices()
            .filter(|&n| self.graph.neighbors_directed(n, direction).next().is_none())
            .map(|n| self.graph[n].as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Every step transitively downstream of `id` (excluding `id`).
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let Some(&start) = self.indices.get(id) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.graph.node_count()];
        let mut queue = VecDeque::from([start]);
        let mut downstream = Vec::new();
        while let Some(node) = queue.pop_front() {
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if !seen[next.index()] {
                    seen[next.index()] = true;
                    downstream.push(self.graph[next].clone());
                    queue.push_back(next);
                }
            }
        }
        downstream
    }

    /// Detects a dependency cycle, returning its path verbatim
    /// (`[a, b, a]` for `a → b → a`).
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors = vec![Color::White; self.graph.node_count()];
        let mut starts: Vec<NodeIndex> = self.graph.node_indices().collect();
        starts.sort_by(|&a, &b| self.graph[a].cmp(&self.graph[b]));

        for start in starts {
            if colors[start.index()] != Color::White {
                continue;
            }
            // Explicit stack of (node, dependency cursor); `path` mirrors
            // the gray chain so the cycle can be sliced out directly.
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
            let mut path: Vec<NodeIndex> = Vec::new();

            colors[start.index()] = Color::Gray;
            path.push(start);
            let deps: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(start, Direction::Incoming)
                .collect();
            stack.push((start, deps, 0));

            loop {
                let next = match stack.last_mut() {
                    Some((_, deps, cursor)) if *cursor < deps.len() => {
                        let next = deps[*cursor];
                        *cursor += 1;
                        Some(next)
                    }
                    Some(_) => None,
                    None => break,
                };
                match next {
                    Some(next) => match colors[next.index()] {
                        Color::White => {
                            colors[next.index()] = Color::Gray;
                            path.push(next);
                            let next_deps: Vec<NodeIndex> = self
                                .graph
                                .neighbors_directed(next, Direction::Incoming)
                                .collect();
                            stack.push((next, next_deps, 0));
                        }
                        Color::Gray => {
                            let first = path
                                .iter()
                                .position(|&n| n == next)
                                .expect("gray node is on the path");
                            let mut cycle: Vec<String> = path[first..]
                                .iter()
                                .map(|&n| self.graph[n].clone())
                                .collect();
                            cycle.push(self.graph[next].clone());
                            return Some(cycle);
                        }
                        Color::Black => {}
                    },
                    None => {
                        let (node, _, _) = stack.pop().expect("non-empty stack");
                        colors[node.index()] = Color::Black;
                        path.pop();
                    }
                }
            }
        }
        None
    }

    /// Kahn layering: each layer is the set of steps whose dependencies
    /// are all in earlier layers, lexicographically ordered within the
    /// layer.
    pub fn layers(&self) -> Result<Vec<Vec<String>>, Diagnostic> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| {
                (
                    n,
                    self.graph.neighbors_directed(n, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut layers = Vec::new();
        let mut remaining = self.graph.node_count();
        let mut ready: Vec<NodeIndex> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&n, _)| n)
            .collect();

        while !ready.is_empty() {
            let mut layer: Vec<String> = ready.iter().map(|&n| self.graph[n].clone()).collect();
            layer.sort_unstable();
            remaining -= ready.len();

            let mut next_ready = Vec::new();
            for node in ready.drain(..) {
                for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                    let degree = in_degree.get_mut(&dependent).expect("known node");
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(dependent);
                    }
                }
            }
            layers.push(layer);
            ready = next_ready;
        }

        if remaining != 0 {
            return Err(Diagnostic::error(
                codes::GRAPH_INCOMPLETE_ORDER,
                format!("topological order omitted {remaining} step(s)"),
            ));
        }
        Ok(layers)
    }

    /// Flattened topological order (layers concatenated).
    pub fn execution_order(&self) -> Result<Vec<String>, Diagnostic> {
        Ok(self.layers()?.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{AdapterKind, PlannedStep};
    use std::collections::HashMap;

    fn step(id: &str, needs: &[&str]) -> PlannedStep {
        PlannedStep {
            id: id.to_string(),
            name: None,
            action: "noop.run".to_string(),
            adapter_kind: AdapterKind::Plugin,
            input: HashMap::new(),
            needs: needs.iter().map(|n| n.to_string()).collect(),
            when: None,
            continue_on_error: false,
            retry: None,
            timeout_ms: None,
            env: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    #[test]
    fn test_build_diamond() {
        let steps = [step("a", &[]), step("b", &["a"]), step("c", &["a"]), step("d", &["b", "c"])];
        let dag = WorkflowDag::build(&steps).unwrap();
        assert_eq!(dag.len(), 4);
        assert_eq!(dag.entry_points(), vec!["a"]);
        assert_eq!(dag.exit_points(), vec!["d"]);
        assert_eq!(dag.in_degree("d"), 2);
        let mut deps = dag.deps("d");
        deps.sort_unstable();
        assert_eq!(deps, vec!["b", "c"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let steps = [step("a", &[]), step("a", &[])];
        let err = WorkflowDag::build(&steps).unwrap_err();
        assert!(err.iter().any(|d| d.code == codes::GRAPH_DUPLICATE_ID));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let steps = [step("a", &["a"])];
        let err = WorkflowDag::build(&steps).unwrap_err();
        assert!(err.iter().any(|d| d.code == codes::GRAPH_SELF_DEPENDENCY));
    }

    #[test]
    fn test_dangling_need_gets_suggestion() {
        let steps = [step("fetch-data", &[]), step("b", &["fetch-dta"])];
        let err = WorkflowDag::build(&steps).unwrap_err();
        let entry = err
            .iter()
            .find(|d| d.code == codes::GRAPH_MISSING_DEPENDENCY)
            .unwrap();
        assert_eq!(entry.hint.as_deref(), Some("did you mean `fetch-data`?"));
    }

    #[test]
    fn test_cycle_path_reconstruction() {
        let steps = [step("a", &["b"]), step("b", &["a"])];
        let dag = WorkflowDag::build(&steps).unwrap();
        let cycle = dag.detect_cycle().unwrap();
        assert_eq!(cycle, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_longer_cycle_detected() {
        let steps = [
            step("a", &[]),
            step("b", &["a", "d"]),
            step("c", &["b"]),
            step("d", &["c"]),
        ];
        let dag = WorkflowDag::build(&steps).unwrap();
        let cycle = dag.detect_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.len() == 4);
    }

    #[test]
    fn test_acyclic_has_no_cycle() {
        let steps = [step("a", &[]), step("b", &["a"])];
        let dag = WorkflowDag::build(&steps).unwrap();
        assert!(dag.detect_cycle().is_none());
    }

    #[test]
    fn test_layers_deterministic() {
        let steps = [
            step("z", &[]),
            step("a", &[]),
            step("m", &["a", "z"]),
            step("k", &["a"]),
        ];
        let dag = WorkflowDag::build(&steps).unwrap();
        let layers = dag.layers().unwrap();
        assert_eq!(layers, vec![vec!["a", "z"], vec!["k", "m"]]);
    }

    #[test]
    fn test_execution_order_respects_needs() {
        let steps = [step("a", &[]), step("b", &["a"]), step("c", &["b"])];
        let dag = WorkflowDag::build(&steps).unwrap();
        assert_eq!(dag.execution_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_transitive_dependents() {
        let steps = [step("a", &[]), step("b", &["a"]), step("c", &["b"]), step("x", &[])];
        let dag = WorkflowDag::build(&steps).unwrap();
        let mut downstream = dag.transitive_dependents("a");
        downstream.sort_unstable();
        assert_eq!(downstream, vec!["b", "c"]);
        assert!(dag.transitive_dependents("x").is_empty());
    }
}
