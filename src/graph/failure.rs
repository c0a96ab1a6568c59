//! Resolution diagnostics.
//!
//! A requirement that cannot be resolved carries the chain of rejected
//! candidates and, for each, the reason it was rejected, down to the deepest
//! sub-requirement that blocked it.

use crate::function::FunctionId;
use crate::value::{PropertyMismatch, ValueRequirement};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionFailure {
    #[error("Target of '{requirement}' could not be resolved")]
    TargetNotFound { requirement: ValueRequirement },

    #[error("No function can satisfy '{requirement}' ({} candidates rejected)", rejected.len())]
    Unresolvable { requirement: ValueRequirement, rejected: Vec<RejectedCandidate> },

    #[error("'{requirement}' depends on itself")]
    Cyclic { requirement: ValueRequirement, path: Vec<ValueRequirement> },

    #[error("Resolution of '{requirement}' exceeded the maximum depth of {max_depth}")]
    DepthExceeded { requirement: ValueRequirement, max_depth: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedCandidate {
    pub function: FunctionId,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    /// The candidate's result cannot meet the requirement's constraints.
    PropertyMismatch(PropertyMismatch),
    /// The candidate applies but declared it cannot satisfy the constraints.
    Unsatisfiable(String),
    /// The candidate failed internally while declaring its requirements.
    Internal(String),
    /// The candidate produced an output that is not a valid commitment.
    InvalidOutput(String),
    /// One of the candidate's own inputs could not be resolved.
    InputFailed(Arc<ResolutionFailure>),
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::PropertyMismatch(m) => write!(f, "{}", m),
            RejectionReason::Unsatisfiable(reason) => write!(f, "cannot satisfy constraints: {}", reason),
            RejectionReason::Internal(reason) => write!(f, "internal error: {}", reason),
            RejectionReason::InvalidOutput(reason) => write!(f, "invalid output: {}", reason),
            RejectionReason::InputFailed(failure) => write!(f, "input failed: {}", failure),
        }
    }
}

impl ResolutionFailure {
    pub fn requirement(&self) -> &ValueRequirement {
        match self {
            ResolutionFailure::TargetNotFound { requirement }
            | ResolutionFailure::Unresolvable { requirement, .. }
            | ResolutionFailure::Cyclic { requirement, .. }
            | ResolutionFailure::DepthExceeded { requirement, .. } => requirement,
        }
    }

    pub fn rejected(&self) -> &[RejectedCandidate] {
        match self {
            ResolutionFailure::Unresolvable { rejected, .. } => rejected,
            _ => &[],
        }
    }

    /// True when the failure depends on the recursion path it was found on
    /// (a cycle or the depth guard somewhere in the chain). Such failures are
    /// not memoized: the same requirement may resolve from another path.
    pub fn is_path_dependent(&self) -> bool {
        match self {
            ResolutionFailure::Cyclic { .. } | ResolutionFailure::DepthExceeded { .. } => true,
            ResolutionFailure::TargetNotFound { .. } => false,
            ResolutionFailure::Unresolvable { rejected, .. } => rejected.iter().any(|c| match &c.reason {
                RejectionReason::InputFailed(inner) => inner.is_path_dependent(),
                _ => false,
            }),
        }
    }

    /// The first cycle found in the chain, as the list of requirements
    /// from the repeated requirement back to itself.
    pub fn cycle(&self) -> Option<&[ValueRequirement]> {
        match self {
            ResolutionFailure::Cyclic { path, .. } => Some(path),
            ResolutionFailure::Unresolvable { rejected, .. } => rejected.iter().find_map(|c| match &c.reason {
                RejectionReason::InputFailed(inner) => inner.cycle(),
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn is_cyclic(&self) -> bool {
        self.cycle().is_some()
    }

    /// The deepest sub-requirement that blocked resolution.
    pub fn deepest_blocker(&self) -> &ValueRequirement {
        self.deepest(0).1
    }

    fn deepest(&self, depth: usize) -> (usize, &ValueRequirement) {
        let mut best = (depth, self.requirement());
        for candidate in self.rejected() {
            if let RejectionReason::InputFailed(inner) = &candidate.reason {
                let found = inner.deepest(depth + 1);
                if found.0 > best.0 {
                    best = found;
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::ComputationTargetSpecification;
    use crate::value::PropertyValues;

    fn req(name: &str) -> ValueRequirement {
        ValueRequirement::new(name, ComputationTargetSpecification::primitive("Id", "E1"))
    }

    #[test]
    fn test_deepest_blocker_walks_chain() {
        let leaf = Arc::new(ResolutionFailure::Unresolvable { requirement: req("Curve"), rejected: vec![] });
        let mid = Arc::new(ResolutionFailure::Unresolvable {
            requirement: req("Price"),
            rejected: vec![RejectedCandidate { function: FunctionId::new("PriceFn"), reason: RejectionReason::InputFailed(leaf) }],
        });
        let root = ResolutionFailure::Unresolvable {
            requirement: req("Return"),
            rejected: vec![
                RejectedCandidate {
                    function: FunctionId::new("Other"),
                    reason: RejectionReason::PropertyMismatch(PropertyMismatch {
                        property: "Currency".into(),
                        required: PropertyValues::single("USD"),
                        offered: Some(PropertyValues::single("EUR")),
                    }),
                },
                RejectedCandidate { function: FunctionId::new("ReturnFn"), reason: RejectionReason::InputFailed(mid) },
            ],
        };
        assert_eq!(root.deepest_blocker().value_name, "Curve");
        assert!(!root.is_path_dependent());
        assert!(!root.is_cyclic());
    }

    #[test]
    fn test_cycle_is_found_through_chain() {
        let cyclic = Arc::new(ResolutionFailure::Cyclic { requirement: req("A"), path: vec![req("A"), req("B"), req("A")] });
        let root = ResolutionFailure::Unresolvable {
            requirement: req("A"),
            rejected: vec![RejectedCandidate { function: FunctionId::new("FA"), reason: RejectionReason::InputFailed(cyclic) }],
        };
        assert!(root.is_cyclic());
        assert!(root.is_path_dependent());
        assert_eq!(root.cycle().unwrap().len(), 3);
    }
}
