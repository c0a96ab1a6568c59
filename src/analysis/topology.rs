use crate::graph::{DependencyGraph, NodeId};
use std::collections::{HashMap, HashSet, VecDeque};

/// Performs a Topological Sort using Depth-First Search (DFS).
///
/// Returns a list of NodeIds where every dependency appears before its consumer.
/// Roots of the DFS are visited in ascending id order, so the result is
/// deterministic for a given graph.
pub fn sort(graph: &DependencyGraph) -> Result<Vec<NodeId>, String> {
    let ids = graph.node_ids();
    let mut order = Vec::with_capacity(ids.len());
    let mut state: HashMap<NodeId, VisitState> = HashMap::with_capacity(ids.len());

    for id in ids {
        if !state.contains_key(&id) {
            visit(id, graph, &mut state, &mut order)?;
        }
    }

    Ok(order)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting, // Used for cycle detection
    Visited,
}

fn visit(
    node: NodeId,
    graph: &DependencyGraph,
    state: &mut HashMap<NodeId, VisitState>,
    order: &mut Vec<NodeId>,
) -> Result<(), String> {
    match state.get(&node) {
        Some(VisitState::Visited) => return Ok(()),
        Some(VisitState::Visiting) => return Err(format!("Cycle detected involving node {}", node.index())),
        None => {
            state.insert(node, VisitState::Visiting);
        }
    }

    for dependency in graph.dependencies(node) {
        visit(dependency, graph, state, order)?;
    }

    state.insert(node, VisitState::Visited);
    order.push(node);
    Ok(())
}

/// Identifies all nodes downstream from the given start nodes (inclusive).
/// Used for failure propagation.
pub fn downstream_from(graph: &DependencyGraph, start_nodes: &[NodeId]) -> HashSet<NodeId> {
    walk(start_nodes, |id| graph.dependents(id))
}

/// Identifies all nodes the given start nodes depend on (inclusive).
/// Used for pruning nodes no root needs.
pub fn upstream_from(graph: &DependencyGraph, start_nodes: &[NodeId]) -> HashSet<NodeId> {
    walk(start_nodes, |id| graph.dependencies(id))
}

fn walk<F>(start_nodes: &[NodeId], next: F) -> HashSet<NodeId>
where
    F: Fn(NodeId) -> Vec<NodeId>,
{
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        if visited.insert(node) {
            queue.extend(next(node));
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{CompilationContext, MockFunction};
    use crate::graph::build_graph;
    use crate::store::FunctionRepository;
    use crate::target::{ComputationTargetSpecification, TargetType};
    use crate::value::{ValueProperties, ValueRequirement};
    use chrono::Utc;

    /// Diamond: A feeds B and C, B and C feed D.
    fn diamond() -> DependencyGraph {
        let repo = FunctionRepository::new();
        let none = ValueProperties::none;
        repo.register(MockFunction::for_type("FA", TargetType::Primitive).producing("A", none(), 1.0).into_arc())
            .unwrap();
        for (id, name) in [("FB", "B"), ("FC", "C")] {
            repo.register(
                MockFunction::for_type(id, TargetType::Primitive)
                    .producing(name, none(), 1.0)
                    .requiring_on_target("A", none())
                    .into_arc(),
            )
            .unwrap();
        }
        repo.register(
            MockFunction::for_type("FD", TargetType::Primitive)
                .producing("D", none(), 1.0)
                .requiring_on_target("B", none())
                .requiring_on_target("C", none())
                .into_arc(),
        )
        .unwrap();

        let ctx = CompilationContext::new(Utc::now());
        let compiled = repo.compile(&ctx);
        build_graph(&compiled, &ctx, [ValueRequirement::new("D", ComputationTargetSpecification::primitive("Id", "1"))])
    }

    fn find(graph: &DependencyGraph, function: &str) -> NodeId {
        graph.nodes().find(|(_, n)| n.function_id().as_str() == function).map(|(id, _)| id).unwrap()
    }

    #[test]
    fn test_sort_diamond_dependency() {
        let graph = diamond();
        let (a, b, c, d) = (find(&graph, "FA"), find(&graph, "FB"), find(&graph, "FC"), find(&graph, "FD"));

        let res = sort(&graph).expect("Sort failed");
        assert_eq!(res.len(), 4);

        let pos = |id: NodeId| res.iter().position(|&x| x == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(d));
        assert!(pos(c) < pos(d));
    }

    #[test]
    fn test_downstream_and_upstream() {
        let graph = diamond();
        let (a, b, c, d) = (find(&graph, "FA"), find(&graph, "FB"), find(&graph, "FC"), find(&graph, "FD"));

        assert_eq!(downstream_from(&graph, &[b]), HashSet::from([b, d]));
        assert_eq!(downstream_from(&graph, &[a]).len(), 4);
        assert_eq!(upstream_from(&graph, &[c]), HashSet::from([a, c]));
        assert_eq!(upstream_from(&graph, &[d]).len(), 4);
    }
}
