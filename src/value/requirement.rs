//! A *desired* output: value name, target and property constraints.

use super::properties::ValueProperties;
use super::specification::ValueSpecification;
use crate::target::ComputationTargetSpecification;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable and hashable; used both as a search key during graph building
/// and as the key of the result map handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueRequirement {
    pub value_name: String,
    pub target: ComputationTargetSpecification,
    pub constraints: ValueProperties,
}

impl ValueRequirement {
    pub fn new(value_name: impl Into<String>, target: ComputationTargetSpecification) -> Self {
        Self { value_name: value_name.into(), target, constraints: ValueProperties::none() }
    }

    pub fn with_constraints(mut self, constraints: ValueProperties) -> Self {
        self.constraints = constraints;
        self
    }

    /// True when `specification` names the same value on the same target and
    /// its concrete properties meet every constraint.
    pub fn is_satisfied_by(&self, specification: &ValueSpecification) -> bool {
        self.value_name == specification.value_name
            && self.target == specification.target
            && self.constraints.is_satisfied_by(&specification.properties)
    }
}

impl fmt::Display for ValueRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.value_name, self.target)?;
        if !self.constraints.is_empty() {
            write!(f, " {}", self.constraints)?;
        }
        Ok(())
    }
}

pub fn requirement_satisfied_by(requirement: &ValueRequirement, specification: &ValueSpecification) -> bool {
    requirement.is_satisfied_by(specification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionId;

    fn spec(name: &str, props: ValueProperties) -> ValueSpecification {
        ValueSpecification::compose(
            &ValueRequirement::new(name, ComputationTargetSpecification::primitive("Id", "E1")),
            FunctionId::new("F1"),
            props,
        )
        .unwrap()
    }

    #[test]
    fn test_zero_constraints_accept_any_specification_of_same_name_and_target() {
        let req = ValueRequirement::new("Price", ComputationTargetSpecification::primitive("Id", "E1"));
        assert!(requirement_satisfied_by(&req, &spec("Price", ValueProperties::none().with("Currency", "USD"))));
        assert!(!req.is_satisfied_by(&spec("Return", ValueProperties::none())));

        let other_target = ValueRequirement::new("Price", ComputationTargetSpecification::primitive("Id", "E2"));
        assert!(!other_target.is_satisfied_by(&spec("Price", ValueProperties::none())));
    }

    #[test]
    fn test_constraints_checked() {
        let req = ValueRequirement::new("Price", ComputationTargetSpecification::primitive("Id", "E1"))
            .with_constraints(ValueProperties::none().with("Currency", "USD"));
        assert!(req.is_satisfied_by(&spec("Price", ValueProperties::none().with("Currency", "USD"))));
        assert!(!req.is_satisfied_by(&spec("Price", ValueProperties::none().with("Currency", "EUR"))));
        assert_eq!(req.to_string(), "Price on PRIMITIVE:Id~E1 {Currency=USD}");
    }
}
