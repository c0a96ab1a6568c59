//! Requirement resolution and dependency-graph execution.
//!
//! Callers register `Function`s with a `FunctionRepository`, ask for values as
//! `ValueRequirement`s, and get back one outcome per requirement: the computed
//! value or a typed failure with its reason chain. The `Calculator` ties the
//! two phases together: a dry-run graph build, then a parallel run.

pub mod calculator;
pub mod compute;
pub mod config;
pub mod error;
pub mod function;
pub mod graph;
pub mod store;
pub mod target;
pub mod value;

pub mod analysis {
    pub mod topology;
}

pub mod display {
    pub mod trace;
}

pub use calculator::{Calculator, FailureKind, RootResult, ValueFailure, ValueOutcome, ViewResults};
pub use compute::{CancellationToken, ExecutionFailure, ExecutionStatistics, RunResults, Scheduler};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use function::{CompilationContext, ExecutionContext, Function, FunctionId, FunctionInputs, MockFunction};
pub use graph::{DependencyGraph, GraphBuilder, ResolutionFailure};
pub use store::FunctionRepository;
pub use target::{ComputationTarget, ComputationTargetSpecification, TargetType, UniqueId};
pub use value::{ComputedValue, Value, ValueProperties, ValueRequirement, ValueSpecification};
