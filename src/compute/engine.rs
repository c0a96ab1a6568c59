//! engine.rs
//! Executes a `DependencyGraph` on a bounded worker pool.
//!
//! The calling thread owns the run: it tracks node states in the `Ledger`,
//! dispatches READY nodes to the pool up to the concurrency limit and waits
//! on a channel for completions. Functions never see shared mutable state;
//! each job receives owned inputs and sends its outputs back.

use super::cancel::CancellationToken;
use super::error::{ExecutionFailure, SchedulerError};
use super::ledger::{Ledger, NodeState, ValueResult};
use crate::analysis::topology;
use crate::config::EngineConfig;
use crate::function::{ExecutionContext, Function, FunctionError, FunctionId, FunctionInputs};
use crate::graph::{DependencyGraph, NodeId};
use crate::target::ComputationTarget;
use crate::value::{ComputedValue, ValueSpecification};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on how long the dispatcher sleeps before re-checking
/// cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Per-function timing, the equivalent of a metrics proxy around `execute`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FunctionStatistics {
    pub invocations: u64,
    pub failures: u64,
    pub total_time: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionStatistics {
    pub functions: BTreeMap<FunctionId, FunctionStatistics>,
    pub succeeded: usize,
    /// Nodes that failed themselves (error, panic, timeout, missing data or output).
    pub failed: usize,
    /// Nodes never executed because a dependency failed.
    pub skipped: usize,
    pub cancelled: usize,
    pub elapsed: Duration,
}

impl ExecutionStatistics {
    fn record(&mut self, function: &FunctionId, elapsed: Duration, failed: bool) {
        let entry = self.functions.entry(function.clone()).or_default();
        entry.invocations += 1;
        entry.total_time += elapsed;
        if failed {
            entry.failures += 1;
        }
    }
}

/// The outcome of one run.
#[derive(Debug, Clone)]
pub struct RunResults {
    ledger: Ledger,
    statistics: ExecutionStatistics,
    cancelled: bool,
}

impl RunResults {
    /// The value (or failure) recorded for `specification`.
    pub fn get(&self, specification: &ValueSpecification) -> Option<&ValueResult> { self.ledger.get(specification) }
    pub fn value(&self, specification: &ValueSpecification) -> Option<&ComputedValue> { self.ledger.value(specification) }
    pub fn node_state(&self, node: NodeId) -> Option<&NodeState> { self.ledger.state(node) }
    pub fn statistics(&self) -> &ExecutionStatistics { &self.statistics }
    pub fn was_cancelled(&self) -> bool { self.cancelled }
    pub fn ledger(&self) -> &Ledger { &self.ledger }
}

enum JobOutcome {
    Completed(Vec<ComputedValue>),
    Failed(FunctionError),
    Panicked(String),
    /// The job saw the cancellation token before starting.
    Cancelled,
}

struct Completion {
    node: NodeId,
    outcome: JobOutcome,
    elapsed: Duration,
}

enum Message {
    /// A worker picked the job up; its timeout runs from `at`.
    Started { node: NodeId, at: Instant },
    Finished(Completion),
}

/// Everything a worker needs, owned so the job can outlive the dispatcher.
struct NodeJob {
    node: NodeId,
    function: Arc<dyn Function>,
    target: ComputationTarget,
    inputs: FunctionInputs,
    desired: Vec<ValueSpecification>,
    context: Arc<ExecutionContext>,
    cancel: CancellationToken,
}

impl NodeJob {
    fn run(self, tx: Sender<Message>) {
        if self.cancel.is_cancelled() {
            let cancelled = Completion { node: self.node, outcome: JobOutcome::Cancelled, elapsed: Duration::ZERO };
            let _ = tx.send(Message::Finished(cancelled));
            return;
        }
        let started = Instant::now();
        let _ = tx.send(Message::Started { node: self.node, at: started });
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.function.execute(&self.context, &self.inputs, &self.target, &self.desired)
        }));
        let outcome = match result {
            Ok(Ok(values)) => JobOutcome::Completed(values),
            Ok(Err(error)) => JobOutcome::Failed(error),
            Err(payload) => JobOutcome::Panicked(panic_message(payload.as_ref())),
        };
        // The receiver is gone if the run was cancelled or finished without us.
        let _ = tx.send(Message::Finished(Completion { node: self.node, outcome, elapsed: started.elapsed() }));
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs dependency graphs. One scheduler (and its pool) may serve many runs.
pub struct Scheduler {
    pool: rayon::ThreadPool,
    max_concurrency: usize,
    node_timeout: Option<Duration>,
}

impl Scheduler {
    pub fn new(config: &EngineConfig) -> Result<Self, SchedulerError> {
        let prefix = config.thread_name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_concurrency.max(1))
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .build()?;
        Ok(Self { pool, max_concurrency: config.max_concurrency.max(1), node_timeout: config.node_timeout() })
    }

    pub fn max_concurrency(&self) -> usize { self.max_concurrency }

    /// Executes every node of `graph`.
    ///
    /// `live_data` must supply a value for each of `graph.required_live_data()`;
    /// a missing one fails its leaf and whatever needs it.
    pub fn execute(
        &self,
        graph: &DependencyGraph,
        context: Arc<ExecutionContext>,
        live_data: &[ComputedValue],
        cancel: &CancellationToken,
    ) -> Result<RunResults, SchedulerError> {
        let order = topology::sort(graph).map_err(SchedulerError::NotAcyclic)?;
        let (tx, rx) = mpsc::channel();
        let mut run = Run {
            graph,
            context,
            cancel: cancel.clone(),
            rank: order.iter().enumerate().map(|(i, id)| (*id, i)).collect(),
            remaining: HashMap::with_capacity(order.len()),
            ready: BTreeSet::new(),
            running: HashMap::new(),
            ledger: Ledger::new(),
            statistics: ExecutionStatistics::default(),
            tx,
            timeout: self.node_timeout,
        };
        let started = Instant::now();
        log::info!("Executing {} nodes with up to {} in flight", order.len(), self.max_concurrency);

        run.seed(&order, live_data);
        let cancelled = run.drive(&self.pool, &rx, self.max_concurrency);

        let mut statistics = run.statistics;
        for (_, state) in run.ledger.states() {
            match state {
                NodeState::Succeeded => statistics.succeeded += 1,
                NodeState::Failed(f) => match f.as_ref() {
                    ExecutionFailure::Cancelled => statistics.cancelled += 1,
                    ExecutionFailure::Upstream { .. } => statistics.skipped += 1,
                    _ => statistics.failed += 1,
                },
                _ => {}
            }
        }
        statistics.elapsed = started.elapsed();
        log::info!(
            "Run finished in {:?}: {} succeeded, {} failed, {} skipped, {} cancelled",
            statistics.elapsed,
            statistics.succeeded,
            statistics.failed,
            statistics.skipped,
            statistics.cancelled
        );

        Ok(RunResults { ledger: run.ledger, statistics, cancelled })
    }
}

/// The mutable state of one run; lives on the dispatching thread.
struct Run<'g> {
    graph: &'g DependencyGraph,
    context: Arc<ExecutionContext>,
    cancel: CancellationToken,
    /// Position in topological order; READY nodes dispatch lowest rank first.
    rank: HashMap<NodeId, usize>,
    /// Unfinished dependencies per pending node.
    remaining: HashMap<NodeId, usize>,
    ready: BTreeSet<(usize, NodeId)>,
    /// Dispatched nodes and their deadlines. A job still queued in the pool
    /// has no deadline yet.
    running: HashMap<NodeId, Option<Instant>>,
    ledger: Ledger,
    statistics: ExecutionStatistics,
    tx: Sender<Message>,
    timeout: Option<Duration>,
}

impl<'g> Run<'g> {
    /// Marks every node PENDING, settles live-data leaves and queues the
    /// nodes with no dependencies.
    fn seed(&mut self, order: &[NodeId], live_data: &[ComputedValue]) {
        let supplied: HashMap<&ValueSpecification, &ComputedValue> =
            live_data.iter().map(|v| (&v.specification, v)).collect();

        for &id in order {
            self.ledger.set_state(id, NodeState::Pending);
            self.remaining.insert(id, self.graph.dependencies(id).len());
        }

        let graph = self.graph;
        for &id in order {
            let Some(node) = graph.node(id) else { continue };
            if node.is_live_data() {
                let mut missing = None;
                for spec in node.outputs() {
                    match supplied.get(spec) {
                        Some(value) => self.ledger.insert(spec.clone(), Ok((*value).clone())),
                        None => {
                            log::warn!("Live data '{}' was not supplied", spec);
                            let failure = Arc::new(ExecutionFailure::MissingLiveData { specification: spec.clone() });
                            self.ledger.insert(spec.clone(), Err(failure.clone()));
                            missing.get_or_insert(failure);
                        }
                    }
                }
                self.settle(id, missing);
            } else if self.remaining.get(&id) == Some(&0) && !self.ledger.is_terminal(id) {
                self.make_ready(id);
            }
        }
    }

    /// Runs the dispatch loop until every node is terminal or the run is
    /// cancelled. Returns true if cancelled.
    fn drive(&mut self, pool: &rayon::ThreadPool, rx: &Receiver<Message>, limit: usize) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                self.cancel_remaining();
                return true;
            }

            while self.running.len() < limit {
                let Some(&(rank, id)) = self.ready.iter().next() else { break };
                self.ready.remove(&(rank, id));
                self.dispatch(pool, id);
            }

            if self.running.is_empty() {
                return false;
            }

            let now = Instant::now();
            let wait = self
                .running
                .values()
                .flatten()
                .map(|deadline| deadline.saturating_duration_since(now))
                .min()
                .map_or(POLL_INTERVAL, |d| d.min(POLL_INTERVAL));

            match rx.recv_timeout(wait) {
                Ok(Message::Started { node, at }) => self.start(node, at),
                Ok(Message::Finished(completion)) => self.complete(completion),
                Err(RecvTimeoutError::Timeout) => {}
                // The run holds a sender, so the channel cannot disconnect.
                Err(RecvTimeoutError::Disconnected) => return false,
            }
            self.expire(Instant::now());
        }
    }

    fn make_ready(&mut self, id: NodeId) {
        let rank = self.rank.get(&id).copied().unwrap_or(usize::MAX);
        self.ledger.set_state(id, NodeState::Ready);
        self.ready.insert((rank, id));
    }

    /// Checks inputs and either starts the node or fails it without executing.
    fn dispatch(&mut self, pool: &rayon::ThreadPool, id: NodeId) {
        let graph = self.graph;
        let Some(node) = graph.node(id) else { return };

        let mut values = Vec::with_capacity(node.inputs().len());
        for spec in node.inputs() {
            match self.ledger.get(spec) {
                Some(Ok(value)) => values.push(value.clone()),
                Some(Err(cause)) => {
                    let cause = cause.clone();
                    let failure = Arc::new(ExecutionFailure::upstream(node.function_id().clone(), &cause));
                    self.fail(id, failure);
                    return;
                }
                None => {
                    let failure = Arc::new(ExecutionFailure::MissingOutput {
                        function: node.function_id().clone(),
                        specification: spec.clone(),
                    });
                    self.fail(id, Arc::new(ExecutionFailure::upstream(node.function_id().clone(), &failure)));
                    return;
                }
            }
        }

        let job = NodeJob {
            node: id,
            function: node.function().clone(),
            target: node.target().clone(),
            inputs: FunctionInputs::new(values),
            desired: node.outputs().iter().cloned().collect(),
            context: self.context.clone(),
            cancel: self.cancel.clone(),
        };
        log::debug!("Dispatching {}", node);
        self.ledger.set_state(id, NodeState::Running);
        self.running.insert(id, None);
        let tx = self.tx.clone();
        pool.spawn(move || job.run(tx));
    }

    fn start(&mut self, id: NodeId, at: Instant) {
        let timeout = self.timeout;
        if let Some(deadline) = self.running.get_mut(&id) {
            *deadline = timeout.map(|t| at + t);
        }
    }

    fn complete(&mut self, completion: Completion) {
        let Completion { node: id, outcome, elapsed } = completion;
        if self.running.remove(&id).is_none() {
            log::warn!("Discarding late result for node {}", id.index());
            return;
        }
        let graph = self.graph;
        let Some(node) = graph.node(id) else { return };
        let function = node.function_id().clone();
        let target = node.target_specification().clone();

        match outcome {
            JobOutcome::Completed(values) => {
                let mut produced: HashMap<ValueSpecification, ComputedValue> =
                    values.into_iter().map(|v| (v.specification.clone(), v)).collect();
                let mut missing = None;
                for spec in node.outputs() {
                    match produced.remove(spec) {
                        Some(value) => self.ledger.insert(spec.clone(), Ok(value)),
                        None => {
                            let failure = Arc::new(ExecutionFailure::MissingOutput {
                                function: function.clone(),
                                specification: spec.clone(),
                            });
                            self.ledger.insert(spec.clone(), Err(failure.clone()));
                            missing.get_or_insert(failure);
                        }
                    }
                }
                if !produced.is_empty() {
                    log::debug!("'{}' returned {} values nobody asked for", function, produced.len());
                }
                self.statistics.record(&function, elapsed, missing.is_some());
                self.settle(id, missing);
            }
            JobOutcome::Failed(error) => {
                log::warn!("'{}' failed on {}: {}", function, target, error);
                self.statistics.record(&function, elapsed, true);
                self.fail(id, Arc::new(ExecutionFailure::FunctionFailed { function, target, error }));
            }
            JobOutcome::Panicked(message) => {
                log::warn!("'{}' panicked on {}: {}", function, target, message);
                self.statistics.record(&function, elapsed, true);
                self.fail(id, Arc::new(ExecutionFailure::Panicked { function, target, message }));
            }
            JobOutcome::Cancelled => self.fail(id, Arc::new(ExecutionFailure::Cancelled)),
        }
    }

    /// Fails every running node whose deadline has passed.
    fn expire(&mut self, now: Instant) {
        let expired: Vec<NodeId> = self
            .running
            .iter()
            .filter(|(_, deadline)| deadline.map_or(false, |d| d <= now))
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            self.running.remove(&id);
            let graph = self.graph;
            let Some(node) = graph.node(id) else { continue };
            let timeout = self.timeout.unwrap_or_default();
            log::warn!("{} timed out after {:?}", node, timeout);
            self.statistics.record(node.function_id(), timeout, true);
            self.fail(
                id,
                Arc::new(ExecutionFailure::TimedOut {
                    function: node.function_id().clone(),
                    target: node.target_specification().clone(),
                    timeout,
                }),
            );
        }
    }

    /// Terminal state after outputs were recorded individually. A node with
    /// missing outputs is FAILED, but dependents that only read its other
    /// outputs still run.
    fn settle(&mut self, id: NodeId, missing: Option<Arc<ExecutionFailure>>) {
        let state = match missing {
            Some(failure) => NodeState::Failed(failure),
            None => NodeState::Succeeded,
        };
        self.ledger.set_state(id, state);
        self.release_dependents(id);
    }

    /// Fails the whole node and, without executing them, every transitive
    /// dependent.
    fn fail(&mut self, id: NodeId, failure: Arc<ExecutionFailure>) {
        let graph = self.graph;
        self.fail_outputs(id, &failure);
        self.ledger.set_state(id, NodeState::Failed(failure.clone()));

        for dependent in topology::downstream_from(graph, &[id]) {
            if dependent == id || self.ledger.is_terminal(dependent) || self.running.contains_key(&dependent) {
                continue;
            }
            let Some(node) = graph.node(dependent) else { continue };
            let cascaded = Arc::new(ExecutionFailure::upstream(node.function_id().clone(), &failure));
            self.fail_outputs(dependent, &cascaded);
            if let Some(rank) = self.rank.get(&dependent) {
                self.ready.remove(&(*rank, dependent));
            }
            self.ledger.set_state(dependent, NodeState::Failed(cascaded));
        }
    }

    fn fail_outputs(&mut self, id: NodeId, failure: &Arc<ExecutionFailure>) {
        if let Some(node) = self.graph.node(id) {
            for spec in node.outputs() {
                self.ledger.insert(spec.clone(), Err(failure.clone()));
            }
        }
    }

    fn release_dependents(&mut self, id: NodeId) {
        for dependent in self.graph.dependents(id) {
            if self.ledger.is_terminal(dependent) {
                continue;
            }
            let Some(left) = self.remaining.get_mut(&dependent) else { continue };
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.make_ready(dependent);
            }
        }
    }

    /// Fails every node that has not finished. In-flight results arriving
    /// later are dropped with the receiver.
    fn cancel_remaining(&mut self) {
        let cancelled = Arc::new(ExecutionFailure::Cancelled);
        let open: Vec<NodeId> = self
            .ledger
            .states()
            .filter(|(_, state)| !state.is_terminal())
            .map(|(id, _)| id)
            .collect();
        log::warn!("Run cancelled; abandoning {} unfinished nodes ({} in flight)", open.len(), self.running.len());
        for id in open {
            self.fail_outputs(id, &cancelled);
            self.ledger.set_state(id, NodeState::Failed(cancelled.clone()));
        }
        self.ready.clear();
        self.running.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{CompilationContext, MockFunction};
    use crate::graph::build_graph;
    use crate::store::FunctionRepository;
    use crate::target::{ComputationTargetSpecification, TargetType};
    use crate::value::{Value, ValueProperties, ValueRequirement};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn e1() -> ComputationTargetSpecification { ComputationTargetSpecification::primitive("Id", "E1") }

    fn none() -> ValueProperties { ValueProperties::none() }

    fn graph_for(repo: &FunctionRepository, roots: &[&str]) -> DependencyGraph {
        let ctx = CompilationContext::new(Utc::now());
        let compiled = repo.compile(&ctx);
        build_graph(&compiled, &ctx, roots.iter().map(|name| ValueRequirement::new(*name, e1())))
    }

    fn run(graph: &DependencyGraph, config: &EngineConfig, cancel: &CancellationToken) -> RunResults {
        let scheduler = Scheduler::new(config).unwrap();
        scheduler.execute(graph, Arc::new(ExecutionContext::new(Utc::now())), &[], cancel).unwrap()
    }

    fn root_result<'a>(graph: &DependencyGraph, results: &'a RunResults, index: usize) -> &'a ValueResult {
        let spec = graph.roots()[index].outcome.as_ref().unwrap();
        results.get(spec).unwrap()
    }

    #[test]
    fn test_chain_executes_in_dependency_order() {
        let repo = FunctionRepository::new();
        repo.register(MockFunction::for_type("F1", TargetType::Primitive).producing("Price", none(), 100.0).into_arc())
            .unwrap();
        repo.register(
            MockFunction::for_type("F2", TargetType::Primitive)
                .computing("Return", none(), |inputs| Ok(Value::Scalar(inputs.scalar("Price")? / 200.0)))
                .requiring_on_target("Price", none())
                .into_arc(),
        )
        .unwrap();
        let graph = graph_for(&repo, &["Return"]);
        let results = run(&graph, &EngineConfig::default(), &CancellationToken::new());

        let value = root_result(&graph, &results, 0).as_ref().unwrap();
        assert_eq!(value.value.as_scalar(), Some(0.5));
        assert_eq!(value.specification.function_id, FunctionId::new("F2"));
        assert_eq!(results.statistics().succeeded, 2);
        assert_eq!(results.statistics().functions[&FunctionId::new("F1")].invocations, 1);

        let exported = serde_json::to_value(results.statistics()).unwrap();
        assert_eq!(exported["succeeded"], 2);
        assert_eq!(exported["functions"]["F2"]["invocations"], 1);
    }

    #[test]
    fn test_failure_propagates_without_executing_dependents() {
        let repo = FunctionRepository::new();
        let f1 = MockFunction::for_type("F1", TargetType::Primitive).producing("Price", none(), 1.0).failing("no quote").into_arc();
        let f2 = MockFunction::for_type("F2", TargetType::Primitive)
            .producing("Return", none(), 1.0)
            .requiring_on_target("Price", none())
            .into_arc();
        let f3 = MockFunction::for_type("F3", TargetType::Primitive)
            .producing("Sharpe", none(), 1.0)
            .requiring_on_target("Return", none())
            .into_arc();
        repo.register_all([f1.clone() as Arc<dyn Function>, f2.clone(), f3.clone()]).unwrap();
        let graph = graph_for(&repo, &["Sharpe"]);
        let results = run(&graph, &EngineConfig::default(), &CancellationToken::new());

        assert_eq!(f1.invocation_count(), 1);
        assert_eq!(f2.invocation_count(), 0);
        assert_eq!(f3.invocation_count(), 0);

        let failure = root_result(&graph, &results, 0).as_ref().unwrap_err();
        assert!(matches!(failure.as_ref(), ExecutionFailure::Upstream { .. }));
        assert_eq!(failure.origin().function(), Some(&FunctionId::new("F1")));
        assert_eq!(results.statistics().failed, 1);
        assert_eq!(results.statistics().skipped, 2);
    }

    #[test]
    fn test_failure_does_not_spread_sideways() {
        let repo = FunctionRepository::new();
        repo.register(MockFunction::for_type("Bad", TargetType::Primitive).producing("Delta", none(), 1.0).failing("x").into_arc())
            .unwrap();
        repo.register(MockFunction::for_type("Good", TargetType::Primitive).producing("Price", none(), 7.0).into_arc())
            .unwrap();
        let graph = graph_for(&repo, &["Delta", "Price"]);
        let results = run(&graph, &EngineConfig::default(), &CancellationToken::new());

        assert!(root_result(&graph, &results, 0).is_err());
        assert_eq!(root_result(&graph, &results, 1).as_ref().unwrap().value.as_scalar(), Some(7.0));
    }

    #[test]
    fn test_panic_is_contained() {
        let repo = FunctionRepository::new();
        repo.register(MockFunction::for_type("F1", TargetType::Primitive).producing("Price", none(), 1.0).panicking("kaboom").into_arc())
            .unwrap();
        let graph = graph_for(&repo, &["Price"]);
        let results = run(&graph, &EngineConfig::default(), &CancellationToken::new());

        match root_result(&graph, &results, 0).as_ref().unwrap_err().as_ref() {
            ExecutionFailure::Panicked { message, .. } => assert_eq!(message, "kaboom"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_output_fails_only_that_value() {
        let repo = FunctionRepository::new();
        repo.register(MockFunction::for_type("F1", TargetType::Primitive).producing("Price", none(), 1.0).producing_nothing().into_arc())
            .unwrap();
        let graph = graph_for(&repo, &["Price"]);
        let results = run(&graph, &EngineConfig::default(), &CancellationToken::new());

        let failure = root_result(&graph, &results, 0).as_ref().unwrap_err();
        assert!(matches!(failure.as_ref(), ExecutionFailure::MissingOutput { .. }));
    }

    #[test]
    fn test_timeout_fails_node_and_dependents() {
        let repo = FunctionRepository::new();
        let slow = MockFunction::for_type("Slow", TargetType::Primitive)
            .producing("Price", none(), 1.0)
            .with_delay(Duration::from_millis(300))
            .into_arc();
        let after = MockFunction::for_type("After", TargetType::Primitive)
            .producing("Return", none(), 1.0)
            .requiring_on_target("Price", none())
            .into_arc();
        repo.register_all([slow as Arc<dyn Function>, after.clone()]).unwrap();
        let graph = graph_for(&repo, &["Return"]);
        let config = EngineConfig::default().with_node_timeout(Duration::from_millis(30));
        let results = run(&graph, &config, &CancellationToken::new());

        let failure = root_result(&graph, &results, 0).as_ref().unwrap_err();
        assert!(matches!(failure.origin(), ExecutionFailure::TimedOut { .. }));
        assert_eq!(after.invocation_count(), 0);
    }

    #[test]
    fn test_timeout_counts_from_start_not_from_queueing() {
        let repo = FunctionRepository::new();
        let slow = MockFunction::for_type("Slow", TargetType::Primitive)
            .producing("Price", none(), 1.0)
            .with_delay(Duration::from_millis(400))
            .into_arc();
        let quick = MockFunction::for_type("Quick", TargetType::Primitive)
            .producing("Vega", none(), 2.0)
            .with_delay(Duration::from_millis(5))
            .into_arc();
        repo.register_all([slow as Arc<dyn Function>, quick.clone()]).unwrap();
        let graph = graph_for(&repo, &["Price", "Vega"]);
        let config = EngineConfig::default()
            .with_max_concurrency(1)
            .with_node_timeout(Duration::from_millis(100));
        let results = run(&graph, &config, &CancellationToken::new());

        let price = root_result(&graph, &results, 0).as_ref().unwrap_err();
        assert!(matches!(price.origin(), ExecutionFailure::TimedOut { .. }));
        // Quick may wait behind Slow's worker, but its own execution is brief.
        let vega = root_result(&graph, &results, 1).as_ref().unwrap();
        assert_eq!(vega.value.as_scalar(), Some(2.0));
        assert_eq!(quick.invocation_count(), 1);
    }

    #[test]
    fn test_cancelled_before_start_runs_nothing() {
        let repo = FunctionRepository::new();
        let f1 = MockFunction::for_type("F1", TargetType::Primitive).producing("Price", none(), 1.0).into_arc();
        repo.register(f1.clone()).unwrap();
        let graph = graph_for(&repo, &["Price"]);
        let token = CancellationToken::new();
        token.cancel();
        let results = run(&graph, &EngineConfig::default(), &token);

        assert!(results.was_cancelled());
        assert_eq!(f1.invocation_count(), 0);
        assert!(root_result(&graph, &results, 0).as_ref().unwrap_err().is_cancelled());
        assert_eq!(results.statistics().cancelled, 1);
    }

    #[test]
    fn test_cancel_during_run_discards_in_flight_and_skips_rest() {
        let repo = FunctionRepository::new();
        let f1 = MockFunction::for_type("F1", TargetType::Primitive)
            .producing("Price", none(), 1.0)
            .with_delay(Duration::from_millis(200))
            .into_arc();
        let f2 = MockFunction::for_type("F2", TargetType::Primitive)
            .producing("Return", none(), 1.0)
            .requiring_on_target("Price", none())
            .into_arc();
        repo.register_all([f1 as Arc<dyn Function>, f2.clone()]).unwrap();
        let graph = graph_for(&repo, &["Return"]);

        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                token.cancel();
            })
        };
        let results = run(&graph, &EngineConfig::default(), &token);
        canceller.join().unwrap();

        assert!(results.was_cancelled());
        assert_eq!(f2.invocation_count(), 0);
        assert!(root_result(&graph, &results, 0).as_ref().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_concurrency_limit_is_respected() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let repo = FunctionRepository::new();
        for name in ["A", "B", "C", "D", "E", "F"] {
            let (current, peak) = (current.clone(), peak.clone());
            repo.register(
                MockFunction::for_type(format!("F{}", name), TargetType::Primitive)
                    .computing(name, none(), move |_| {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok(Value::Scalar(1.0))
                    })
                    .into_arc(),
            )
            .unwrap();
        }
        let graph = graph_for(&repo, &["A", "B", "C", "D", "E", "F"]);
        let results = run(&graph, &EngineConfig::default().with_max_concurrency(2), &CancellationToken::new());

        assert_eq!(results.statistics().succeeded, 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_missing_live_data_fails_leaf_and_dependents() {
        use crate::function::{FixedAvailability, LiveDataSourcingFunction};

        let availability = Arc::new(FixedAvailability::new());
        availability.add(e1(), "Spot", none());
        availability.add(e1(), "Rate", none());
        let ctx = CompilationContext::new(Utc::now()).with_market_data(availability);

        let repo = FunctionRepository::new();
        repo.register(Arc::new(LiveDataSourcingFunction::new())).unwrap();
        let pricer = MockFunction::for_type("Pricer", TargetType::Primitive)
            .computing("Price", none(), |inputs| Ok(Value::Scalar(inputs.scalar("Spot")? * 2.0)))
            .requiring_on_target("Spot", none())
            .into_arc();
        let discounter = MockFunction::for_type("Discounter", TargetType::Primitive)
            .producing("Discount", none(), 0.9)
            .requiring_on_target("Rate", none())
            .into_arc();
        repo.register_all([pricer as Arc<dyn Function>, discounter.clone()]).unwrap();

        let compiled = repo.compile(&ctx);
        let graph = build_graph(
            &compiled,
            &ctx,
            [ValueRequirement::new("Price", e1()), ValueRequirement::new("Discount", e1())],
        );
        assert_eq!(graph.required_live_data().len(), 2);

        let spot = graph.required_live_data().iter().find(|s| s.value_name == "Spot").unwrap().clone();
        let supplied = vec![ComputedValue::new(spot, 50.0)];
        let scheduler = Scheduler::new(&EngineConfig::default()).unwrap();
        let results = scheduler
            .execute(&graph, Arc::new(ExecutionContext::new(Utc::now())), &supplied, &CancellationToken::new())
            .unwrap();

        assert_eq!(root_result(&graph, &results, 0).as_ref().unwrap().value.as_scalar(), Some(100.0));
        let failure = root_result(&graph, &results, 1).as_ref().unwrap_err();
        assert!(matches!(failure.origin(), ExecutionFailure::MissingLiveData { .. }));
        assert_eq!(discounter.invocation_count(), 0);
    }
}
