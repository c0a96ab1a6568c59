//! The *concrete* identity of a producible value; the node identity in the graph.

use super::properties::ValueProperties;
use super::requirement::ValueRequirement;
use crate::function::FunctionId;
use crate::target::ComputationTargetSpecification;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("Specification properties for '{value_name}' must be concrete, got {properties}")]
    NotConcrete { value_name: String, properties: ValueProperties },
}

/// Value name + target + producing function + concrete properties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueSpecification {
    pub value_name: String,
    pub target: ComputationTargetSpecification,
    pub function_id: FunctionId,
    pub properties: ValueProperties,
}

impl ValueSpecification {
    /// Commits `producer` to produce `requirement` with `properties`.
    ///
    /// Fails if `properties` contains a wildcard or a multi-valued property.
    pub fn compose(
        requirement: &ValueRequirement,
        producer: FunctionId,
        properties: ValueProperties,
    ) -> Result<Self, ValueError> {
        if !properties.is_concrete() {
            return Err(ValueError::NotConcrete {
                value_name: requirement.value_name.clone(),
                properties,
            });
        }
        Ok(Self {
            value_name: requirement.value_name.clone(),
            target: requirement.target.clone(),
            function_id: producer,
            properties,
        })
    }

    /// A requirement that this exact specification (and anything equivalent) satisfies.
    pub fn to_requirement(&self) -> ValueRequirement {
        ValueRequirement::new(self.value_name.clone(), self.target.clone()).with_constraints(self.properties.clone())
    }
}

impl fmt::Display for ValueSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {} by {}", self.value_name, self.target, self.function_id)?;
        if !self.properties.is_empty() {
            write!(f, " {}", self.properties)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_rejects_wildcards() {
        let req = ValueRequirement::new("Price", ComputationTargetSpecification::primitive("Id", "E1"));
        let err = ValueSpecification::compose(&req, FunctionId::new("F1"), ValueProperties::none().with_any("Currency"))
            .unwrap_err();
        assert!(matches!(err, ValueError::NotConcrete { .. }));

        let err = ValueSpecification::compose(
            &req,
            FunctionId::new("F1"),
            ValueProperties::none().with_values("Currency", ["USD", "EUR"]),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_round_trip_through_requirement() {
        let req = ValueRequirement::new("Price", ComputationTargetSpecification::primitive("Id", "E1"));
        let spec = ValueSpecification::compose(&req, FunctionId::new("F1"), ValueProperties::none().with("Currency", "USD"))
            .unwrap();
        assert!(spec.to_requirement().is_satisfied_by(&spec));
        assert!(req.is_satisfied_by(&spec));
    }
}
