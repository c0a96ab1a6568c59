//! ledger.rs
//! The per-run computed-value table and node states.
//!
//! Owned by one run. Each specification is written at most once; later
//! writes are ignored so dependents always observe the first result.

use super::error::ExecutionFailure;
use crate::graph::NodeId;
use crate::value::{ComputedValue, ValueSpecification};
use std::collections::HashMap;
use std::sync::Arc;

pub type ValueResult = Result<ComputedValue, Arc<ExecutionFailure>>;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed(Arc<ExecutionFailure>),
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Succeeded | NodeState::Failed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    states: HashMap<NodeId, NodeState>,
    values: HashMap<ValueSpecification, ValueResult>,
}

impl Ledger {
    pub fn new() -> Self { Self::default() }

    pub fn state(&self, node: NodeId) -> Option<&NodeState> { self.states.get(&node) }

    pub fn set_state(&mut self, node: NodeId, state: NodeState) {
        self.states.insert(node, state);
    }

    pub fn is_terminal(&self, node: NodeId) -> bool {
        self.states.get(&node).map_or(false, NodeState::is_terminal)
    }

    pub fn get(&self, specification: &ValueSpecification) -> Option<&ValueResult> {
        self.values.get(specification)
    }

    pub fn value(&self, specification: &ValueSpecification) -> Option<&ComputedValue> {
        self.values.get(specification)?.as_ref().ok()
    }

    /// Records the result for `specification` unless one is already present.
    pub fn insert(&mut self, specification: ValueSpecification, result: ValueResult) {
        if self.values.contains_key(&specification) {
            log::debug!("Ignoring second result for '{}'", specification);
            return;
        }
        self.values.insert(specification, result);
    }

    pub fn states(&self) -> impl Iterator<Item = (NodeId, &NodeState)> {
        self.states.iter().map(|(id, s)| (*id, s))
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}
