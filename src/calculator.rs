//! calculator.rs
//! The top-level facade: compile root requirements into a dependency graph,
//! execute it, and report one outcome per root.

use crate::compute::{CancellationToken, ExecutionFailure, ExecutionStatistics, RunResults, Scheduler};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::function::{CompilationContext, ExecutionContext};
use crate::graph::{DependencyGraph, GraphBuilder, ResolutionFailure};
use crate::store::FunctionRepository;
use crate::value::{ComputedValue, ValueRequirement};
use std::fmt;
use std::sync::Arc;

/// The user-visible failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Unresolvable,
    Cyclic,
    ExecutionFailure,
    /// Distinct from `ExecutionFailure` so callers can decide whether to retry.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueFailure {
    /// Never reached the scheduler.
    Resolution(Arc<ResolutionFailure>),
    Execution(Arc<ExecutionFailure>),
}

impl ValueFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            ValueFailure::Resolution(f) if f.is_cyclic() => FailureKind::Cyclic,
            ValueFailure::Resolution(_) => FailureKind::Unresolvable,
            ValueFailure::Execution(f) if f.is_cancelled() => FailureKind::Cancelled,
            ValueFailure::Execution(_) => FailureKind::ExecutionFailure,
        }
    }
}

impl fmt::Display for ValueFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueFailure::Resolution(failure) => write!(f, "{}", failure),
            ValueFailure::Execution(failure) => write!(f, "{}", failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueOutcome {
    Computed(ComputedValue),
    Failed(ValueFailure),
}

impl ValueOutcome {
    pub fn value(&self) -> Option<&ComputedValue> {
        match self {
            ValueOutcome::Computed(v) => Some(v),
            ValueOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ValueFailure> {
        match self {
            ValueOutcome::Computed(_) => None,
            ValueOutcome::Failed(f) => Some(f),
        }
    }

    pub fn is_computed(&self) -> bool { matches!(self, ValueOutcome::Computed(_)) }
}

#[derive(Debug, Clone)]
pub struct RootResult {
    pub requirement: ValueRequirement,
    pub outcome: ValueOutcome,
}

/// One outcome per root requirement, in the order the roots were given.
#[derive(Debug, Clone)]
pub struct ViewResults {
    results: Vec<RootResult>,
    run: RunResults,
}

impl ViewResults {
    pub fn results(&self) -> &[RootResult] { &self.results }
    pub fn run(&self) -> &RunResults { &self.run }
    pub fn statistics(&self) -> &ExecutionStatistics { self.run.statistics() }
    pub fn len(&self) -> usize { self.results.len() }
    pub fn is_empty(&self) -> bool { self.results.is_empty() }

    pub fn get(&self, requirement: &ValueRequirement) -> Option<&ValueOutcome> {
        self.results.iter().find(|r| &r.requirement == requirement).map(|r| &r.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ValueRequirement, &ValueFailure)> {
        self.results.iter().filter_map(|r| r.outcome.failure().map(|f| (&r.requirement, f)))
    }
}

/// Owns the scheduler; shares the repository with other calculators.
pub struct Calculator {
    repository: Arc<FunctionRepository>,
    scheduler: Scheduler,
    config: EngineConfig,
}

impl Calculator {
    pub fn new(repository: Arc<FunctionRepository>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let scheduler = Scheduler::new(&config)?;
        Ok(Self { repository, scheduler, config })
    }

    pub fn repository(&self) -> &FunctionRepository { &self.repository }
    pub fn config(&self) -> &EngineConfig { &self.config }

    /// Resolves `roots` into a graph. A dry run: nothing executes.
    pub fn compile<I>(&self, context: &CompilationContext, roots: I) -> DependencyGraph
    where
        I: IntoIterator<Item = ValueRequirement>,
    {
        let functions = self.repository.compile(context);
        let mut builder = GraphBuilder::new(&functions, context)
            .with_max_depth(self.config.max_resolution_depth)
            .with_pruning(self.config.prune_unused_nodes);
        for root in roots {
            // Failures are kept on the graph and surface in `execute`.
            let _ = builder.add_root(root);
        }
        builder.build()
    }

    /// Runs `graph` and maps every root to its outcome. Unresolved roots
    /// report their resolution failure without reaching the scheduler.
    pub fn execute(
        &self,
        graph: &DependencyGraph,
        context: Arc<ExecutionContext>,
        live_data: &[ComputedValue],
        cancel: &CancellationToken,
    ) -> Result<ViewResults> {
        let run = self.scheduler.execute(graph, context, live_data, cancel)?;

        let results = graph
            .roots()
            .iter()
            .map(|root| {
                let outcome = match &root.outcome {
                    Err(failure) => ValueOutcome::Failed(ValueFailure::Resolution(failure.clone())),
                    Ok(spec) => match run.get(spec) {
                        Some(Ok(value)) => ValueOutcome::Computed(value.clone()),
                        Some(Err(failure)) => ValueOutcome::Failed(ValueFailure::Execution(failure.clone())),
                        None => ValueOutcome::Failed(ValueFailure::Execution(Arc::new(ExecutionFailure::MissingOutput {
                            function: spec.function_id.clone(),
                            specification: spec.clone(),
                        }))),
                    },
                };
                RootResult { requirement: root.requirement.clone(), outcome }
            })
            .collect();

        Ok(ViewResults { results, run })
    }

    /// `compile` then `execute` with no live data and no cancellation.
    pub fn calculate<I>(&self, compilation: &CompilationContext, execution: Arc<ExecutionContext>, roots: I) -> Result<ViewResults>
    where
        I: IntoIterator<Item = ValueRequirement>,
    {
        let graph = self.compile(compilation, roots);
        self.execute(&graph, execution, &[], &CancellationToken::new())
    }
}
