//! The function contract.
//!
//! Concrete analytics live outside this crate; the engine only sees the
//! capability set below: test applicability, declare requirements, declare
//! produced results, and execute. Functions are registered explicitly with a
//! `FunctionRepository`; nothing is discovered at run time.

pub mod context;
pub mod live_data;
pub mod mock;

use crate::target::{ComputationTarget, TargetScope};
use crate::value::{ComputedValue, Value, ValueProperties, ValueRequirement, ValueSpecification};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use context::{CompilationContext, ExecutionContext, Extensions};
pub use live_data::{FixedAvailability, LiveDataSourcingFunction, MarketDataAvailability, NoMarketData};
pub use mock::MockFunction;

/// Unique identifier of a registered function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(String);

impl FunctionId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// A result a function can produce for a target: a value name and the
/// properties it can offer. Properties may be wildcards or value sets; they
/// are made concrete against a requirement's constraints during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultTemplate {
    pub value_name: String,
    pub properties: ValueProperties,
}

impl ResultTemplate {
    pub fn new(value_name: impl Into<String>, properties: ValueProperties) -> Self {
        Self { value_name: value_name.into(), properties }
    }
}

/// The interval of valuation times for which a function may be used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

impl Validity {
    pub fn always() -> Self { Self::default() }

    pub fn between(earliest: DateTime<Utc>, latest: DateTime<Utc>) -> Self {
        Self { earliest: Some(earliest), latest: Some(latest) }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.earliest.map_or(true, |e| at >= e) && self.latest.map_or(true, |l| at <= l)
    }
}

/// Why a function cannot supply inputs for a requested output.
///
/// "Does not apply" is expressed by `can_apply_to` returning false; these
/// variants separate "applies but cannot satisfy the constraints" from a
/// genuine fault in the function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequirementsError {
    #[error("cannot satisfy constraints: {0}")]
    Unsatisfiable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// A failure raised by `Function::execute`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FunctionError {
    #[error("{0}")]
    Failed(String),
    #[error("missing input '{0}'")]
    MissingInput(String),
    #[error("service '{0}' is not available in the execution context")]
    MissingService(String),
}

impl FunctionError {
    pub fn failed(msg: impl Into<String>) -> Self { Self::Failed(msg.into()) }
}

/// The computed inputs handed to `Function::execute`.
#[derive(Debug, Clone, Default)]
pub struct FunctionInputs {
    values: Vec<ComputedValue>,
}

impl FunctionInputs {
    pub fn new(values: Vec<ComputedValue>) -> Self { Self { values } }

    pub fn is_empty(&self) -> bool { self.values.is_empty() }
    pub fn len(&self) -> usize { self.values.len() }
    pub fn iter(&self) -> impl Iterator<Item = &ComputedValue> { self.values.iter() }

    /// The first input with the given value name.
    pub fn get(&self, value_name: &str) -> Option<&ComputedValue> {
        self.values.iter().find(|v| v.specification.value_name == value_name)
    }

    /// The first input satisfying `requirement`.
    pub fn find(&self, requirement: &ValueRequirement) -> Option<&ComputedValue> {
        self.values.iter().find(|v| requirement.is_satisfied_by(&v.specification))
    }

    pub fn value(&self, value_name: &str) -> Result<&Value, FunctionError> {
        self.get(value_name)
            .map(|v| &v.value)
            .ok_or_else(|| FunctionError::MissingInput(value_name.to_string()))
    }

    pub fn scalar(&self, value_name: &str) -> Result<f64, FunctionError> {
        self.value(value_name)?
            .as_scalar()
            .ok_or_else(|| FunctionError::failed(format!("input '{}' is not a scalar", value_name)))
    }
}

/// A unit of computation the graph builder can choose and the scheduler can run.
///
/// `execute` must be a pure function of its declared inputs and the supplied
/// execution context, returning the subset of `desired` it could compute.
pub trait Function: Send + Sync {
    fn id(&self) -> &FunctionId;

    fn short_name(&self) -> String {
        self.id().to_string()
    }

    /// The targets the function is indexed under in the repository.
    fn target_scope(&self) -> TargetScope {
        TargetScope::Anything
    }

    /// Higher priorities are tried first; ties keep registration order.
    fn priority(&self) -> i32 {
        0
    }

    /// The valuation times this function may be compiled for. Compiled
    /// indexes are shared by every context with the same valuation time.
    fn validity(&self) -> Validity {
        Validity::always()
    }

    /// Marks the designated live-data sourcing function. Requirements it
    /// resolves become leaves supplied externally at execution time.
    fn is_live_data_source(&self) -> bool {
        false
    }

    /// Must be side-effect free and stable for the duration of one build.
    fn can_apply_to(&self, context: &CompilationContext, target: &ComputationTarget) -> bool;

    fn get_results(&self, context: &CompilationContext, target: &ComputationTarget) -> Vec<ResultTemplate>;

    /// The inputs needed to produce `output` (already committed against
    /// `desired.constraints`).
    fn get_requirements(
        &self,
        context: &CompilationContext,
        target: &ComputationTarget,
        desired: &ValueRequirement,
        output: &ValueSpecification,
    ) -> Result<Vec<ValueRequirement>, RequirementsError>;

    /// Narrows an output once the concrete inputs are known.
    fn refine_output(
        &self,
        _context: &CompilationContext,
        _target: &ComputationTarget,
        output: ValueSpecification,
        _inputs: &[ValueSpecification],
    ) -> ValueSpecification {
        output
    }

    fn execute(
        &self,
        context: &ExecutionContext,
        inputs: &FunctionInputs,
        target: &ComputationTarget,
        desired: &[ValueSpecification],
    ) -> Result<Vec<ComputedValue>, FunctionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::ComputationTargetSpecification;
    use chrono::TimeZone;

    #[test]
    fn test_validity_window() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        let v = Validity::between(start, end);
        assert!(v.contains(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()));
        assert!(!v.contains(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
        assert!(Validity::always().contains(end));
    }

    #[test]
    fn test_inputs_lookup() {
        let req = ValueRequirement::new("Price", ComputationTargetSpecification::primitive("Id", "E1"));
        let spec = ValueSpecification::compose(&req, FunctionId::new("F1"), ValueProperties::none()).unwrap();
        let inputs = FunctionInputs::new(vec![ComputedValue::new(spec, 101.5)]);

        assert_eq!(inputs.scalar("Price").unwrap(), 101.5);
        assert!(inputs.find(&req).is_some());
        assert_eq!(inputs.value("Volume").unwrap_err(), FunctionError::MissingInput("Volume".into()));
    }
}
