//! A configurable function for tests and demonstrations.
//!
//! Produces fixed (or input-derived) results, declares fixed requirements,
//! and can be told to fail, panic or stall so scheduler behaviour can be
//! exercised. Counts its invocations so tests can assert that a function
//! downstream of a failure never ran.

use super::{CompilationContext, ExecutionContext, Function, FunctionError, FunctionId, FunctionInputs, RequirementsError, ResultTemplate, Validity};
use crate::target::{ComputationTarget, ComputationTargetSpecification, TargetScope, TargetType};
use crate::value::{ComputedValue, Value, ValueProperties, ValueRequirement, ValueSpecification};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Compute = Arc<dyn Fn(&FunctionInputs) -> Result<Value, FunctionError> + Send + Sync>;

#[derive(Clone)]
enum Producer {
    Constant(Value),
    Computed(Compute),
}

#[derive(Clone)]
struct MockResult {
    template: ResultTemplate,
    producer: Producer,
}

#[derive(Debug, Clone)]
enum Input {
    Fixed(ValueRequirement),
    /// A value on whatever target the function is applied to.
    SameTarget { value_name: String, constraints: ValueProperties },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehaviour {
    Succeed,
    Fail(String),
    Panic(String),
    /// Returns no values at all.
    ProduceNothing,
}

pub struct MockFunction {
    id: FunctionId,
    scope: TargetScope,
    priority: i32,
    validity: Validity,
    results: Vec<MockResult>,
    inputs: Vec<Input>,
    refusal: Option<String>,
    behaviour: MockBehaviour,
    delay: Option<Duration>,
    invocations: AtomicUsize,
}

impl MockFunction {
    /// Applies to exactly one target.
    pub fn new(id: impl Into<String>, target: ComputationTargetSpecification) -> Self {
        Self::with_scope(id, TargetScope::Instance(target))
    }

    /// Applies to every target of `target_type`.
    pub fn for_type(id: impl Into<String>, target_type: TargetType) -> Self {
        Self::with_scope(id, TargetScope::OfType(target_type))
    }

    pub fn with_scope(id: impl Into<String>, scope: TargetScope) -> Self {
        Self {
            id: FunctionId::new(id),
            scope,
            priority: 0,
            validity: Validity::always(),
            results: Vec::new(),
            inputs: Vec::new(),
            refusal: None,
            behaviour: MockBehaviour::Succeed,
            delay: None,
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn producing(mut self, value_name: &str, properties: ValueProperties, value: impl Into<Value>) -> Self {
        self.results.push(MockResult {
            template: ResultTemplate::new(value_name, properties),
            producer: Producer::Constant(value.into()),
        });
        self
    }

    /// Produces `value_name` by applying `compute` to the inputs.
    pub fn computing<F>(mut self, value_name: &str, properties: ValueProperties, compute: F) -> Self
    where
        F: Fn(&FunctionInputs) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        self.results.push(MockResult {
            template: ResultTemplate::new(value_name, properties),
            producer: Producer::Computed(Arc::new(compute)),
        });
        self
    }

    pub fn requiring(mut self, requirement: ValueRequirement) -> Self {
        self.inputs.push(Input::Fixed(requirement));
        self
    }

    /// Requires `value_name` on the target being resolved.
    pub fn requiring_on_target(mut self, value_name: &str, constraints: ValueProperties) -> Self {
        self.inputs.push(Input::SameTarget { value_name: value_name.to_string(), constraints });
        self
    }

    /// Makes `get_requirements` report the constraints as unsatisfiable.
    pub fn refusing(mut self, reason: &str) -> Self {
        self.refusal = Some(reason.to_string());
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.behaviour = MockBehaviour::Fail(message.to_string());
        self
    }

    pub fn panicking(mut self, message: &str) -> Self {
        self.behaviour = MockBehaviour::Panic(message.to_string());
        self
    }

    pub fn producing_nothing(mut self) -> Self {
        self.behaviour = MockBehaviour::ProduceNothing;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_validity(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<Self> { Arc::new(self) }
}

impl fmt::Debug for MockFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockFunction")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("results", &self.results.iter().map(|r| &r.template).collect::<Vec<_>>())
            .field("inputs", &self.inputs)
            .field("behaviour", &self.behaviour)
            .finish()
    }
}

impl Function for MockFunction {
    fn id(&self) -> &FunctionId { &self.id }

    fn short_name(&self) -> String { format!("Mock {}", self.id) }

    fn target_scope(&self) -> TargetScope { self.scope.clone() }

    fn priority(&self) -> i32 { self.priority }

    fn validity(&self) -> Validity { self.validity }

    fn can_apply_to(&self, _context: &CompilationContext, target: &ComputationTarget) -> bool {
        self.scope.contains(target.to_specification())
    }

    fn get_results(&self, _context: &CompilationContext, _target: &ComputationTarget) -> Vec<ResultTemplate> {
        self.results.iter().map(|r| r.template.clone()).collect()
    }

    fn get_requirements(
        &self,
        _context: &CompilationContext,
        target: &ComputationTarget,
        _desired: &ValueRequirement,
        _output: &ValueSpecification,
    ) -> Result<Vec<ValueRequirement>, RequirementsError> {
        if let Some(reason) = &self.refusal {
            return Err(RequirementsError::Unsatisfiable(reason.clone()));
        }
        Ok(self
            .inputs
            .iter()
            .map(|input| match input {
                Input::Fixed(req) => req.clone(),
                Input::SameTarget { value_name, constraints } => {
                    ValueRequirement::new(value_name.clone(), target.to_specification().clone())
                        .with_constraints(constraints.clone())
                }
            })
            .collect())
    }

    fn execute(
        &self,
        _context: &ExecutionContext,
        inputs: &FunctionInputs,
        _target: &ComputationTarget,
        desired: &[ValueSpecification],
    ) -> Result<Vec<ComputedValue>, FunctionError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match &self.behaviour {
            MockBehaviour::Succeed => {}
            MockBehaviour::Fail(message) => return Err(FunctionError::failed(message.clone())),
            MockBehaviour::Panic(message) => panic!("{}", message),
            MockBehaviour::ProduceNothing => return Ok(Vec::new()),
        }

        let mut computed = Vec::with_capacity(desired.len());
        for spec in desired {
            let Some(result) = self.results.iter().find(|r| r.template.value_name == spec.value_name) else {
                continue;
            };
            let value = match &result.producer {
                Producer::Constant(v) => v.clone(),
                Producer::Computed(compute) => compute(inputs)?,
            };
            computed.push(ComputedValue::new(spec.clone(), value));
        }
        Ok(computed)
    }
}
