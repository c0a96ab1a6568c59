//! dag.rs
//! The resolved dependency graph: nodes are function invocations, edges carry
//! the value specification flowing from producer to consumer.

use super::failure::ResolutionFailure;
use super::node::{DependencyNode, NodeId};
use crate::value::{ValueRequirement, ValueSpecification};
use chrono::{DateTime, Utc};
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// How one root requirement was resolved.
#[derive(Debug, Clone)]
pub struct RootResolution {
    pub requirement: ValueRequirement,
    pub outcome: Result<ValueSpecification, Arc<ResolutionFailure>>,
}

impl RootResolution {
    pub fn is_resolved(&self) -> bool { self.outcome.is_ok() }
}

/// An acyclic graph of `DependencyNode`s built for one valuation time.
///
/// Immutable once built; share it across executions behind an `Arc`.
#[derive(Debug)]
pub struct DependencyGraph {
    pub(crate) graph: StableDiGraph<DependencyNode, ValueSpecification>,
    pub(crate) producers: HashMap<ValueSpecification, NodeId>,
    pub(crate) roots: Vec<RootResolution>,
    pub(crate) required_live_data: BTreeSet<ValueSpecification>,
    valuation_time: DateTime<Utc>,
}

impl DependencyGraph {
    pub(crate) fn new(valuation_time: DateTime<Utc>) -> Self {
        Self {
            graph: StableDiGraph::new(),
            producers: HashMap::new(),
            roots: Vec::new(),
            required_live_data: BTreeSet::new(),
            valuation_time,
        }
    }

    pub fn valuation_time(&self) -> DateTime<Utc> { self.valuation_time }
    pub fn node_count(&self) -> usize { self.graph.node_count() }
    pub fn edge_count(&self) -> usize { self.graph.edge_count() }
    pub fn is_empty(&self) -> bool { self.graph.node_count() == 0 }

    pub fn node(&self, id: NodeId) -> Option<&DependencyNode> { self.graph.node_weight(id) }

    /// Every node id, in ascending index order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.graph.node_indices().collect();
        ids.sort();
        ids
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &DependencyNode)> {
        self.graph.node_indices().filter_map(move |id| self.graph.node_weight(id).map(|n| (id, n)))
    }

    /// Root requirements in the order they were added.
    pub fn roots(&self) -> &[RootResolution] { &self.roots }

    pub fn root(&self, requirement: &ValueRequirement) -> Option<&RootResolution> {
        self.roots.iter().find(|r| &r.requirement == requirement)
    }

    /// The specifications that must be supplied externally before execution.
    pub fn required_live_data(&self) -> &BTreeSet<ValueSpecification> { &self.required_live_data }

    /// The node producing `specification`.
    pub fn producer_of(&self, specification: &ValueSpecification) -> Option<NodeId> {
        self.producers.get(specification).copied()
    }

    /// The distinct nodes `id` consumes from, in ascending order.
    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbours(id, Direction::Incoming)
    }

    /// The distinct nodes consuming from `id`, in ascending order.
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbours(id, Direction::Outgoing)
    }

    /// The (consumer, specification) pairs fed by `id`.
    pub fn consumers(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &ValueSpecification)> {
        self.graph.edges_directed(id, Direction::Outgoing).map(|e| (e.target(), e.weight()))
    }

    fn neighbours(&self, id: NodeId, direction: Direction) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.graph.neighbors_directed(id, direction).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    // --- Construction (graph builder only) ---

    pub(crate) fn add_node(&mut self, node: DependencyNode) -> NodeId {
        self.graph.add_node(node)
    }

    pub(crate) fn add_edge(&mut self, producer: NodeId, consumer: NodeId, specification: ValueSpecification) {
        let exists = self
            .graph
            .edges_directed(producer, Direction::Outgoing)
            .any(|e| e.target() == consumer && e.weight() == &specification);
        if !exists {
            self.graph.add_edge(producer, consumer, specification);
        }
    }

    pub(crate) fn add_output(&mut self, id: NodeId, specification: ValueSpecification) {
        if let Some(node) = self.graph.node_weight_mut(id) {
            node.outputs.insert(specification.clone());
            if node.live_data {
                self.required_live_data.insert(specification.clone());
            }
        }
        self.producers.insert(specification, id);
    }

    /// Drops nodes not upstream of a resolved root and outputs nobody reads.
    pub(crate) fn prune(&mut self) {
        let root_specs: BTreeSet<ValueSpecification> =
            self.roots.iter().filter_map(|r| r.outcome.as_ref().ok().cloned()).collect();
        let root_nodes: Vec<NodeId> = root_specs.iter().filter_map(|s| self.producer_of(s)).collect();
        let keep = crate::analysis::topology::upstream_from(self, &root_nodes);

        let doomed: Vec<NodeId> = self.graph.node_indices().filter(|id| !keep.contains(id)).collect();
        for id in &doomed {
            self.graph.remove_node(*id);
        }

        let mut needed = root_specs;
        needed.extend(self.graph.edge_indices().filter_map(|e| self.graph.edge_weight(e)).cloned());
        for id in self.graph.node_indices().collect::<Vec<_>>() {
            if let Some(node) = self.graph.node_weight_mut(id) {
                node.outputs.retain(|s| needed.contains(s));
            }
        }
        let graph = &self.graph;
        self.producers.retain(|spec, id| needed.contains(spec) && graph.contains_node(*id));
        self.required_live_data.retain(|spec| needed.contains(spec));

        if !doomed.is_empty() {
            log::debug!("Pruned {} unused nodes", doomed.len());
        }
    }
}
