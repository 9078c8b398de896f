//! Pure graph algorithms over a workflow snapshot.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use reconcore::{Connection, NodeId, NodeStatus, WorkflowError, WorkflowGraph};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Ordered list of phases; every phase may run concurrently.
pub type Phases = Vec<Vec<NodeId>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionStats {
    pub total_nodes: usize,
    pub phases: usize,
    pub max_parallelism: usize,
    pub avg_parallelism: f64,
    pub critical_path: Vec<NodeId>,
}

/// Dependency graph keyed by node id, built with node insertion order.
struct DependencyGraph {
    graph: DiGraph<NodeId, ()>,
    index: HashMap<NodeId, NodeIndex>,
}

impl DependencyGraph {
    fn build<'a>(
        workflow: &WorkflowGraph,
        connections: impl IntoIterator<Item = &'a Connection>,
    ) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node in &workflow.nodes {
            let idx = graph.add_node(node.id.clone());
            index.insert(node.id.clone(), idx);
        }

        for conn in connections {
            let from = index
                .get(&conn.source)
                .ok_or_else(|| WorkflowError::NodeNotFound(conn.source.clone()))?;
            let to = index
                .get(&conn.target)
                .ok_or_else(|| WorkflowError::NodeNotFound(conn.target.clone()))?;
            graph.add_edge(*from, *to, ());
        }

        Ok(Self { graph, index })
    }

    fn check_cycles(&self) -> Result<Vec<NodeIndex>, WorkflowError> {
        toposort(&self.graph, None)
            .map_err(|cycle| WorkflowError::CyclicDependency(self.graph[cycle.node_id()].clone()))
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<NodeId> {
        let Some(idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut ids: Vec<NodeId> = self
            .graph
            .neighbors_directed(*idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        // petgraph walks edges newest first
        ids.reverse();
        ids
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphResolver;

impl GraphResolver {
    pub fn new() -> Self {
        Self
    }

    /// Fail with the id of a node on a cycle, if there is one.
    pub fn check_cycles(&self, workflow: &WorkflowGraph) -> Result<(), WorkflowError> {
        DependencyGraph::build(workflow, &workflow.connections)?
            .check_cycles()
            .map(|_| ())
    }

    /// Phased topological order over the non-skipped nodes.
    ///
    /// Each phase holds every node whose dependencies all ran in earlier
    /// phases, in insertion order. A node that can never become ready (it
    /// depends on a skipped node) makes the whole resolution fail.
    pub fn resolve_execution_order(&self, workflow: &WorkflowGraph) -> Result<Phases, WorkflowError> {
        let deps = DependencyGraph::build(workflow, &workflow.connections)?;
        deps.check_cycles()?;

        let mut remaining: Vec<&NodeId> = workflow
            .nodes
            .iter()
            .filter(|n| n.status != NodeStatus::Skipped)
            .map(|n| &n.id)
            .collect();
        let mut scheduled: HashSet<NodeId> = HashSet::new();
        let mut phases = Phases::new();

        while !remaining.is_empty() {
            let ready: Vec<NodeId> = remaining
                .iter()
                .filter(|id| {
                    deps.index.get(id.as_str()).is_some_and(|idx| {
                        deps.graph
                            .neighbors_directed(*idx, Direction::Incoming)
                            .all(|dep| scheduled.contains(&deps.graph[dep]))
                    })
                })
                .map(|id| (*id).clone())
                .collect();

            if ready.is_empty() {
                break;
            }

            remaining.retain(|id| !ready.contains(id));
            scheduled.extend(ready.iter().cloned());
            phases.push(ready);
        }

        if !remaining.is_empty() {
            return Err(WorkflowError::Unschedulable(
                remaining.into_iter().cloned().collect(),
            ));
        }

        Ok(phases)
    }

    /// Would adding `candidate` make the graph cyclic?
    pub fn would_create_cycle(
        &self,
        workflow: &WorkflowGraph,
        candidate: &Connection,
    ) -> Result<bool, WorkflowError> {
        if candidate.source == candidate.target {
            return Ok(true);
        }
        let deps = DependencyGraph::build(
            workflow,
            workflow.connections.iter().chain(std::iter::once(candidate)),
        )?;
        match deps.check_cycles() {
            Ok(_) => Ok(false),
            Err(WorkflowError::CyclicDependency(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Direct upstream nodes of `node_id`.
    pub fn dependencies(&self, workflow: &WorkflowGraph, node_id: &str) -> Vec<NodeId> {
        workflow.incoming(node_id).map(|c| c.source.clone()).collect()
    }

    /// Direct downstream nodes of `node_id`.
    pub fn dependents(&self, workflow: &WorkflowGraph, node_id: &str) -> Vec<NodeId> {
        workflow.outgoing(node_id).map(|c| c.target.clone()).collect()
    }

    /// Every simple path from `start` to `end`, both ends included.
    pub fn find_paths(&self, workflow: &WorkflowGraph, start: &str, end: &str) -> Vec<Vec<NodeId>> {
        let Ok(deps) = DependencyGraph::build(workflow, &workflow.connections) else {
            return Vec::new();
        };
        if !deps.index.contains_key(start) {
            return Vec::new();
        }

        let mut paths = Vec::new();
        let mut path = vec![start.to_string()];
        let mut on_path: HashSet<NodeId> = HashSet::from([start.to_string()]);
        walk_paths(&deps, start, end, &mut path, &mut on_path, &mut paths);
        paths
    }

    /// Longest root-to-leaf chain of nodes.
    pub fn critical_path(&self, workflow: &WorkflowGraph) -> Result<Vec<NodeId>, WorkflowError> {
        let deps = DependencyGraph::build(workflow, &workflow.connections)?;
        let order = deps.check_cycles()?;

        // length of the longest chain ending at each node, and its predecessor
        let mut best: HashMap<NodeIndex, (usize, Option<NodeIndex>)> = HashMap::new();
        for idx in &order {
            let entry = deps
                .graph
                .neighbors_directed(*idx, Direction::Incoming)
                .filter_map(|p| best.get(&p).map(|(len, _)| (*len, p)))
                .max_by_key(|(len, _)| *len)
                .map(|(len, p)| (len + 1, Some(p)))
                .unwrap_or((1, None));
            best.insert(*idx, entry);
        }

        // first node in insertion order wins ties
        let mut tail: Option<(usize, NodeIndex)> = None;
        for idx in deps.graph.node_indices() {
            if let Some((len, _)) = best.get(&idx) {
                if tail.map(|(l, _)| *len > l).unwrap_or(true) {
                    tail = Some((*len, idx));
                }
            }
        }

        let mut path = Vec::new();
        let mut cursor = tail.map(|(_, idx)| idx);
        while let Some(idx) = cursor {
            path.push(deps.graph[idx].clone());
            cursor = best.get(&idx).and_then(|(_, prev)| *prev);
        }
        path.reverse();
        Ok(path)
    }

    pub fn execution_stats(&self, workflow: &WorkflowGraph) -> Result<ExecutionStats, WorkflowError> {
        let phases = self.resolve_execution_order(workflow)?;
        let total_nodes = workflow.nodes.len();
        let max_parallelism = phases.iter().map(Vec::len).max().unwrap_or(0);
        let avg_parallelism = if phases.is_empty() {
            0.0
        } else {
            (total_nodes as f64 / phases.len() as f64 * 100.0).round() / 100.0
        };

        Ok(ExecutionStats {
            total_nodes,
            phases: phases.len(),
            max_parallelism,
            avg_parallelism,
            critical_path: self.critical_path(workflow)?,
        })
    }
}

fn walk_paths(
    deps: &DependencyGraph,
    current: &str,
    end: &str,
    path: &mut Vec<NodeId>,
    on_path: &mut HashSet<NodeId>,
    paths: &mut Vec<Vec<NodeId>>,
) {
    if current == end {
        paths.push(path.clone());
        return;
    }
    for next in deps.neighbors(current, Direction::Outgoing) {
        if on_path.contains(&next) {
            continue;
        }
        on_path.insert(next.clone());
        path.push(next.clone());
        walk_paths(deps, &next, end, path, on_path, paths);
        path.pop();
        on_path.remove(&next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcore::WorkflowNode;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new("test");
        for id in nodes {
            graph.add_node(WorkflowNode::new(*id, "noop")).unwrap();
        }
        for (from, to) in edges {
            graph.connect(Connection::new(*from, *to)).unwrap();
        }
        graph
    }

    #[test]
    fn test_linear_chain_has_one_node_per_phase() {
        let g = graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("c", "d")]);
        let phases = GraphResolver::new().resolve_execution_order(&g).unwrap();
        assert_eq!(phases, vec![vec!["a"], vec!["b"], vec!["c"], vec!["d"]]);
    }

    #[test]
    fn test_independent_roots_share_one_phase() {
        let g = graph(&["a", "b", "c"], &[]);
        let phases = GraphResolver::new().resolve_execution_order(&g).unwrap();
        assert_eq!(phases, vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn test_cycle_is_rejected_without_partial_phases() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "a")]);
        let err = GraphResolver::new().resolve_execution_order(&g).unwrap_err();
        assert!(matches!(err, WorkflowError::CyclicDependency(_)));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_phases_form_topological_order() {
        let g = graph(
            &["e", "d", "c", "b", "a"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d"), ("d", "e")],
        );
        let phases = GraphResolver::new().resolve_execution_order(&g).unwrap();
        let order: Vec<&str> = phases.iter().flatten().map(String::as_str).collect();
        assert_eq!(order.len(), 5);
        for conn in &g.connections {
            let from = order.iter().position(|id| *id == conn.source).unwrap();
            let to = order.iter().position(|id| *id == conn.target).unwrap();
            assert!(from < to, "{} must precede {}", conn.source, conn.target);
        }
        assert_eq!(phases[1], vec!["c", "b"]);
    }

    #[test]
    fn test_dependency_on_skipped_node_is_unschedulable() {
        let mut g = graph(&["a", "b", "c"], &[("a", "b")]);
        g.find_node_mut("a").unwrap().status = NodeStatus::Skipped;
        let err = GraphResolver::new().resolve_execution_order(&g).unwrap_err();
        assert_eq!(err, WorkflowError::Unschedulable(vec!["b".into()]));
    }

    #[test]
    fn test_would_create_cycle() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let resolver = GraphResolver::new();
        assert!(resolver.would_create_cycle(&g, &Connection::new("c", "a")).unwrap());
        assert!(!resolver.would_create_cycle(&g, &Connection::new("a", "c")).unwrap());
        assert!(resolver.would_create_cycle(&g, &Connection::new("zz", "a")).is_err());
    }

    #[test]
    fn test_paths_and_neighbours() {
        let g = graph(&["a", "b", "c", "d"], &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]);
        let resolver = GraphResolver::new();
        let paths = resolver.find_paths(&g, "a", "d");
        assert_eq!(paths, vec![vec!["a", "b", "d"], vec!["a", "c", "d"]]);
        assert_eq!(resolver.dependencies(&g, "d"), vec!["b", "c"]);
        assert_eq!(resolver.dependents(&g, "a"), vec!["b", "c"]);
    }

    #[test]
    fn test_stats_and_critical_path() {
        let g = graph(&["a", "b", "c", "x"], &[("a", "b"), ("b", "c")]);
        let stats = GraphResolver::new().execution_stats(&g).unwrap();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.phases, 3);
        assert_eq!(stats.max_parallelism, 2);
        assert_eq!(stats.avg_parallelism, 1.33);
        assert_eq!(stats.critical_path, vec!["a", "b", "c"]);
    }
}
