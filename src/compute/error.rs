//! Run-time failures.

use crate::function::{FunctionError, FunctionId};
use crate::target::ComputationTargetSpecification;
use crate::value::ValueSpecification;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionFailure {
    #[error("Function '{function}' failed on {target}: {error}")]
    FunctionFailed { function: FunctionId, target: ComputationTargetSpecification, error: FunctionError },

    #[error("Function '{function}' panicked on {target}: {message}")]
    Panicked { function: FunctionId, target: ComputationTargetSpecification, message: String },

    #[error("Function '{function}' on {target} timed out after {timeout:?}")]
    TimedOut { function: FunctionId, target: ComputationTargetSpecification, timeout: Duration },

    #[error("Live data '{specification}' was not supplied")]
    MissingLiveData { specification: ValueSpecification },

    #[error("Function '{function}' did not produce '{specification}'")]
    MissingOutput { function: FunctionId, specification: ValueSpecification },

    /// A dependency failed; `origin` is the failure that started the chain.
    #[error("Function '{function}' was not executed: {origin}")]
    Upstream { function: FunctionId, origin: Arc<ExecutionFailure> },

    #[error("Run was cancelled")]
    Cancelled,
}

impl ExecutionFailure {
    /// Wraps `cause` for a dependent that will not run. Chains stay one level
    /// deep: the origin is always the failure that did not come from upstream.
    pub fn upstream(function: FunctionId, cause: &Arc<ExecutionFailure>) -> Self {
        let origin = match cause.as_ref() {
            ExecutionFailure::Upstream { origin, .. } => origin.clone(),
            _ => cause.clone(),
        };
        ExecutionFailure::Upstream { function, origin }
    }

    /// The originating failure.
    pub fn origin(&self) -> &ExecutionFailure {
        match self {
            ExecutionFailure::Upstream { origin, .. } => origin,
            other => other,
        }
    }

    /// The function the failure is attributed to, if any.
    pub fn function(&self) -> Option<&FunctionId> {
        match self {
            ExecutionFailure::FunctionFailed { function, .. }
            | ExecutionFailure::Panicked { function, .. }
            | ExecutionFailure::TimedOut { function, .. }
            | ExecutionFailure::MissingOutput { function, .. }
            | ExecutionFailure::Upstream { function, .. } => Some(function),
            ExecutionFailure::MissingLiveData { .. } | ExecutionFailure::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.origin(), ExecutionFailure::Cancelled)
    }
}

/// Failures that prevent a run from starting at all.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Graph is not acyclic: {0}")]
    NotAcyclic(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_chain_keeps_origin() {
        let target = ComputationTargetSpecification::primitive("Id", "E1");
        let root = Arc::new(ExecutionFailure::FunctionFailed {
            function: FunctionId::new("F1"),
            target,
            error: FunctionError::failed("boom"),
        });
        let first = Arc::new(ExecutionFailure::upstream(FunctionId::new("F2"), &root));
        let second = ExecutionFailure::upstream(FunctionId::new("F3"), &first);

        assert_eq!(second.function(), Some(&FunctionId::new("F3")));
        assert_eq!(second.origin().function(), Some(&FunctionId::new("F1")));
        assert!(second.to_string().contains("boom"));
        assert!(!second.is_cancelled());
    }
}
