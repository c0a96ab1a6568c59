//! builder.rs
//! Depth-first requirement resolution with memoization.
//!
//! Each requirement is matched against the applicable functions in priority
//! order; the first candidate whose own inputs all resolve wins. Results are
//! cached per build, so a value needed by many consumers resolves once and is
//! shared by every one of them.

use super::dag::{DependencyGraph, RootResolution};
use super::failure::{RejectedCandidate, RejectionReason, ResolutionFailure};
use super::node::{DependencyNode, NodeId};
use crate::function::{CompilationContext, Function, FunctionId, RequirementsError, ResultTemplate};
use crate::store::CompiledFunctions;
use crate::target::{ComputationTarget, ComputationTargetSpecification};
use crate::value::{ValueRequirement, ValueSpecification};
use smallvec::SmallVec;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_MAX_DEPTH: usize = 256;

type Resolution = Result<(ValueSpecification, NodeId), Arc<ResolutionFailure>>;

/// A memoized resolution. A failure that ran into a cycle stays valid only
/// while every requirement it was blocked on is still being resolved.
struct CacheEntry {
    result: Resolution,
    blocked_on: Vec<ValueRequirement>,
}

/// Bookkeeping for one requirement on the active path.
#[derive(Default)]
struct Frame {
    blocked_on: HashSet<ValueRequirement>,
    depth_limited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    function: FunctionId,
    target: ComputationTargetSpecification,
    inputs: BTreeSet<ValueSpecification>,
}

/// Builds one `DependencyGraph`. Single-threaded; owns its resolution cache.
pub struct GraphBuilder<'a> {
    functions: &'a CompiledFunctions,
    context: &'a CompilationContext,
    max_depth: usize,
    prune: bool,
    graph: DependencyGraph,
    resolved: HashMap<ValueRequirement, CacheEntry>,
    // The active recursion path, as a set for lookup and a stack for reporting.
    active: HashSet<ValueRequirement>,
    path: Vec<ValueRequirement>,
    frames: Vec<Frame>,
    interned: HashMap<NodeKey, NodeId>,
    targets: HashMap<ComputationTargetSpecification, Option<ComputationTarget>>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(functions: &'a CompiledFunctions, context: &'a CompilationContext) -> Self {
        Self {
            functions,
            context,
            max_depth: DEFAULT_MAX_DEPTH,
            prune: true,
            graph: DependencyGraph::new(context.valuation_time()),
            resolved: HashMap::new(),
            active: HashSet::new(),
            path: Vec::new(),
            frames: Vec::new(),
            interned: HashMap::new(),
            targets: HashMap::new(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Whether `build` drops nodes and outputs no root needs. On by default.
    pub fn with_pruning(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Resolves a root requirement and records its outcome.
    ///
    /// A failure only affects this root; sibling roots resolve independently.
    pub fn add_root(&mut self, requirement: ValueRequirement) -> Result<ValueSpecification, Arc<ResolutionFailure>> {
        let outcome = self.resolve(&requirement).map(|(spec, _)| spec);
        match &outcome {
            Ok(spec) => log::debug!("Resolved root '{}' to '{}'", requirement, spec),
            Err(failure) => log::warn!("Root '{}' is unresolvable: {}", requirement, failure),
        }
        self.graph.roots.push(RootResolution { requirement, outcome: outcome.clone() });
        outcome
    }

    /// Resolves `requirement` to the specification and node that will produce it.
    ///
    /// Repeated calls within one build return the same node.
    pub fn resolve(&mut self, requirement: &ValueRequirement) -> Resolution {
        if let Some(hit) = self.cached(requirement) {
            return hit;
        }

        if self.active.contains(requirement) {
            let start = self.path.iter().position(|r| r == requirement).unwrap_or(0);
            let mut cycle = self.path[start..].to_vec();
            cycle.push(requirement.clone());
            log::debug!("Cycle detected at '{}'", requirement);
            if let Some(frame) = self.frames.last_mut() {
                frame.blocked_on.insert(requirement.clone());
            }
            return Err(Arc::new(ResolutionFailure::Cyclic { requirement: requirement.clone(), path: cycle }));
        }

        if self.path.len() >= self.max_depth {
            if let Some(frame) = self.frames.last_mut() {
                frame.depth_limited = true;
            }
            return Err(Arc::new(ResolutionFailure::DepthExceeded {
                requirement: requirement.clone(),
                max_depth: self.max_depth,
            }));
        }

        self.active.insert(requirement.clone());
        self.path.push(requirement.clone());
        self.frames.push(Frame::default());
        let result = self.resolve_candidates(requirement);
        let mut frame = self.frames.pop().unwrap_or_default();
        self.path.pop();
        self.active.remove(requirement);

        if result.is_ok() {
            self.resolved.insert(requirement.clone(), CacheEntry { result: result.clone(), blocked_on: Vec::new() });
            return result;
        }

        // Cycles closed at this requirement no longer constrain the failure.
        frame.blocked_on.remove(requirement);
        if let Some(parent) = self.frames.last_mut() {
            parent.depth_limited |= frame.depth_limited;
            parent.blocked_on.extend(frame.blocked_on.iter().cloned());
        }
        if !frame.depth_limited {
            let blocked_on = frame.blocked_on.into_iter().collect();
            self.resolved.insert(requirement.clone(), CacheEntry { result: result.clone(), blocked_on });
        }
        result
    }

    /// A memoized resolution still valid on the current path.
    fn cached(&mut self, requirement: &ValueRequirement) -> Option<Resolution> {
        let entry = self.resolved.get(requirement)?;
        if !entry.blocked_on.iter().all(|r| self.active.contains(r)) {
            self.resolved.remove(requirement);
            return None;
        }
        let result = entry.result.clone();
        let blocked_on = entry.blocked_on.clone();
        if let Some(frame) = self.frames.last_mut() {
            frame.blocked_on.extend(blocked_on);
        }
        Some(result)
    }

    /// Finishes the build, pruning if enabled.
    pub fn build(mut self) -> DependencyGraph {
        if self.prune {
            self.graph.prune();
        }
        log::info!(
            "Built dependency graph: {} nodes, {} edges, {} roots, {} live data inputs",
            self.graph.node_count(),
            self.graph.edge_count(),
            self.graph.roots.len(),
            self.graph.required_live_data.len()
        );
        self.graph
    }

    fn resolve_target(&mut self, specification: &ComputationTargetSpecification) -> Option<ComputationTarget> {
        let context = self.context;
        self.targets
            .entry(specification.clone())
            .or_insert_with(|| context.resolve_target(specification))
            .clone()
    }

    fn resolve_candidates(&mut self, requirement: &ValueRequirement) -> Resolution {
        let Some(target) = self.resolve_target(&requirement.target) else {
            return Err(Arc::new(ResolutionFailure::TargetNotFound { requirement: requirement.clone() }));
        };

        let mut rejected = Vec::new();
        for function in self.functions.applicable_functions(self.context, &target) {
            let templates = function
                .get_results(self.context, &target)
                .into_iter()
                .filter(|t| t.value_name == requirement.value_name);
            for template in templates {
                match self.try_candidate(&function, &target, requirement, &template) {
                    Ok(resolved) => return Ok(resolved),
                    Err(reason) => {
                        log::trace!("Rejected '{}' for '{}': {}", function.id(), requirement, reason);
                        rejected.push(RejectedCandidate { function: function.id().clone(), reason });
                    }
                }
            }
        }

        Err(Arc::new(ResolutionFailure::Unresolvable { requirement: requirement.clone(), rejected }))
    }

    fn try_candidate(
        &mut self,
        function: &Arc<dyn Function>,
        target: &ComputationTarget,
        requirement: &ValueRequirement,
        template: &ResultTemplate,
    ) -> Result<(ValueSpecification, NodeId), RejectionReason> {
        let properties = template
            .properties
            .resolve_against(&requirement.constraints)
            .map_err(RejectionReason::PropertyMismatch)?;
        let output = ValueSpecification::compose(requirement, function.id().clone(), properties)
            .map_err(|e| RejectionReason::InvalidOutput(e.to_string()))?;

        // Wildcards the requirement leaves open stay open until refinement;
        // only a committed specification may reuse a producer or become a leaf.
        let committed = requirement.is_satisfied_by(&output);
        if committed {
            if let Some(node) = self.graph.producer_of(&output) {
                return Ok((output, node));
            }
        }

        if function.is_live_data_source() {
            if !committed {
                return Err(RejectionReason::InvalidOutput(format!(
                    "live data '{}' does not satisfy '{}'",
                    output, requirement
                )));
            }
            let node = self.intern(function, target, BTreeSet::new());
            self.graph.add_output(node, output.clone());
            return Ok((output, node));
        }

        let inputs = function
            .get_requirements(self.context, target, requirement, &output)
            .map_err(|e| match e {
                RequirementsError::Unsatisfiable(reason) => RejectionReason::Unsatisfiable(reason),
                RequirementsError::Internal(reason) => RejectionReason::Internal(reason),
            })?;

        let mut resolved: SmallVec<[(ValueSpecification, NodeId); 4]> = SmallVec::with_capacity(inputs.len());
        for input in &inputs {
            let found = self.resolve(input).map_err(RejectionReason::InputFailed)?;
            resolved.push(found);
        }

        let input_specs: Vec<ValueSpecification> = resolved.iter().map(|(spec, _)| spec.clone()).collect();
        let output = function.refine_output(self.context, target, output, &input_specs);
        if output.function_id != *function.id() || !output.properties.is_concrete() || !requirement.is_satisfied_by(&output) {
            return Err(RejectionReason::InvalidOutput(format!(
                "refined output '{}' no longer satisfies '{}'",
                output, requirement
            )));
        }
        if let Some(node) = self.graph.producer_of(&output) {
            return Ok((output, node));
        }

        let node = self.intern(function, target, input_specs.into_iter().collect());
        for (spec, producer) in resolved {
            self.graph.add_edge(producer, node, spec);
        }
        self.graph.add_output(node, output.clone());
        Ok((output, node))
    }

    /// One node per (function, target, concrete inputs).
    fn intern(&mut self, function: &Arc<dyn Function>, target: &ComputationTarget, inputs: BTreeSet<ValueSpecification>) -> NodeId {
        let key = NodeKey {
            function: function.id().clone(),
            target: target.to_specification().clone(),
            inputs: inputs.clone(),
        };
        if let Some(&id) = self.interned.get(&key) {
            return id;
        }
        let id = self.graph.add_node(DependencyNode::new(function.clone(), target.clone(), inputs));
        self.interned.insert(key, id);
        id
    }
}

/// Builds a graph for `roots` in one call.
pub fn build_graph<I>(functions: &CompiledFunctions, context: &CompilationContext, roots: I) -> DependencyGraph
where
    I: IntoIterator<Item = ValueRequirement>,
{
    let mut builder = GraphBuilder::new(functions, context);
    for root in roots {
        // Failures are recorded on the graph's root list.
        let _ = builder.add_root(root);
    }
    builder.build()
}
