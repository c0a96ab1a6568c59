//! The live-data sourcing boundary.
//!
//! Requirements resolved by `LiveDataSourcingFunction` become graph leaves;
//! their values are supplied by the caller before execution.

use super::{CompilationContext, ExecutionContext, Function, FunctionError, FunctionId, FunctionInputs, RequirementsError, ResultTemplate};
use crate::target::{ComputationTarget, ComputationTargetSpecification, TargetScope};
use crate::value::{ComputedValue, ValueProperties, ValueRequirement, ValueSpecification};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Which values the market-data collaborator can supply for a target.
pub trait MarketDataAvailability: Send + Sync {
    fn available_values(&self, target: &ComputationTargetSpecification) -> Vec<ResultTemplate>;
}

/// No market data at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMarketData;

impl MarketDataAvailability for NoMarketData {
    fn available_values(&self, _target: &ComputationTargetSpecification) -> Vec<ResultTemplate> {
        Vec::new()
    }
}

/// A fixed table of available values per target.
#[derive(Debug, Default)]
pub struct FixedAvailability {
    values: RwLock<HashMap<ComputationTargetSpecification, Vec<ResultTemplate>>>,
}

impl FixedAvailability {
    pub fn new() -> Self { Self::default() }

    pub fn add(&self, target: ComputationTargetSpecification, value_name: impl Into<String>, properties: ValueProperties) {
        self.values
            .write()
            .entry(target)
            .or_default()
            .push(ResultTemplate::new(value_name, properties));
    }
}

impl MarketDataAvailability for FixedAvailability {
    fn available_values(&self, target: &ComputationTargetSpecification) -> Vec<ResultTemplate> {
        self.values.read().get(target).cloned().unwrap_or_default()
    }
}

pub const LIVE_DATA_FUNCTION_ID: &str = "LiveDataSourcingFunction";

/// The designated function producing externally supplied values.
#[derive(Debug, Clone)]
pub struct LiveDataSourcingFunction {
    id: FunctionId,
    priority: i32,
}

impl LiveDataSourcingFunction {
    /// Tried before ordinary functions unless overridden with `with_priority`.
    pub const DEFAULT_PRIORITY: i32 = 1_000;

    pub fn new() -> Self {
        Self { id: FunctionId::new(LIVE_DATA_FUNCTION_ID), priority: Self::DEFAULT_PRIORITY }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Default for LiveDataSourcingFunction {
    fn default() -> Self { Self::new() }
}

impl Function for LiveDataSourcingFunction {
    fn id(&self) -> &FunctionId { &self.id }

    fn short_name(&self) -> String { "Live data".to_string() }

    fn target_scope(&self) -> TargetScope { TargetScope::Anything }

    fn priority(&self) -> i32 { self.priority }

    fn is_live_data_source(&self) -> bool { true }

    fn can_apply_to(&self, context: &CompilationContext, target: &ComputationTarget) -> bool {
        !context.market_data().available_values(target.to_specification()).is_empty()
    }

    fn get_results(&self, context: &CompilationContext, target: &ComputationTarget) -> Vec<ResultTemplate> {
        context.market_data().available_values(target.to_specification())
    }

    fn get_requirements(
        &self,
        _context: &CompilationContext,
        _target: &ComputationTarget,
        _desired: &ValueRequirement,
        _output: &ValueSpecification,
    ) -> Result<Vec<ValueRequirement>, RequirementsError> {
        Ok(Vec::new())
    }

    fn execute(
        &self,
        _context: &ExecutionContext,
        _inputs: &FunctionInputs,
        _target: &ComputationTarget,
        _desired: &[ValueSpecification],
    ) -> Result<Vec<ComputedValue>, FunctionError> {
        Err(FunctionError::failed("live data is supplied externally and is never executed"))
    }
}
