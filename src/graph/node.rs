//! Defines the `DependencyNode`: one function invocation in a resolved graph.

use crate::function::{Function, FunctionId};
use crate::target::{ComputationTarget, ComputationTargetSpecification};
use crate::value::ValueSpecification;
use petgraph::stable_graph::NodeIndex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A stable identifier for a node within one `DependencyGraph`.
///
/// Alias of the petgraph index; indices stay valid when unused nodes are
/// pruned at the end of a build.
pub type NodeId = NodeIndex;

/// A chosen function applied to a target, with its concrete inputs and outputs.
///
/// Created by the graph builder; immutable once the graph is handed out.
pub struct DependencyNode {
    pub(crate) function: Arc<dyn Function>,
    pub(crate) target: ComputationTarget,
    pub(crate) inputs: BTreeSet<ValueSpecification>,
    pub(crate) outputs: BTreeSet<ValueSpecification>,
    pub(crate) live_data: bool,
}

impl DependencyNode {
    pub(crate) fn new(function: Arc<dyn Function>, target: ComputationTarget, inputs: BTreeSet<ValueSpecification>) -> Self {
        let live_data = function.is_live_data_source();
        Self { function, target, inputs, outputs: BTreeSet::new(), live_data }
    }

    pub fn function(&self) -> &Arc<dyn Function> { &self.function }
    pub fn function_id(&self) -> &FunctionId { self.function.id() }
    pub fn target(&self) -> &ComputationTarget { &self.target }
    pub fn target_specification(&self) -> &ComputationTargetSpecification { self.target.to_specification() }
    pub fn inputs(&self) -> &BTreeSet<ValueSpecification> { &self.inputs }
    pub fn outputs(&self) -> &BTreeSet<ValueSpecification> { &self.outputs }

    /// True for leaves whose values are supplied externally.
    pub fn is_live_data(&self) -> bool { self.live_data }
}

impl fmt::Debug for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyNode")
            .field("function", self.function.id())
            .field("target", self.target.to_specification())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("live_data", &self.live_data)
            .finish()
    }
}

impl fmt::Display for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.function.short_name(), self.target.to_specification())
    }
}
