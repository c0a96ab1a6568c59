//! registry.rs
//! The function repository and its per-valuation-time compiled index.
//!
//! Registration is rare and takes an exclusive lock; it replaces the whole
//! function list (copy-on-write), so a graph build holding a compiled index
//! never observes a partially registered or removed function.

use crate::function::{CompilationContext, Function, FunctionId};
use crate::target::{ComputationTarget, TargetType};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Compiled indexes kept per repository, most recently used last.
const COMPILED_CACHE_CAPACITY: usize = 8;

type CompileKey = (u64, DateTime<Utc>);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Function '{0}' is already registered")]
    DuplicateFunction(FunctionId),
}

#[derive(Clone, Default)]
struct Snapshot {
    generation: u64,
    functions: Arc<Vec<Arc<dyn Function>>>,
}

/// Holds every registered function definition.
#[derive(Default)]
pub struct FunctionRepository {
    snapshot: RwLock<Snapshot>,
    // Keyed by (generation, valuation time) so a compile racing a registration
    // can never publish a stale index under the new generation.
    compiled: Mutex<VecDeque<(CompileKey, Arc<CompiledFunctions>)>>,
}

impl FunctionRepository {
    pub fn new() -> Self { Self::default() }

    /// Registers a function. Ids must be unique.
    pub fn register(&self, function: Arc<dyn Function>) -> Result<(), RegistryError> {
        let mut snapshot = self.snapshot.write();
        if snapshot.functions.iter().any(|f| f.id() == function.id()) {
            return Err(RegistryError::DuplicateFunction(function.id().clone()));
        }
        log::debug!("Registering function '{}'", function.id());

        let mut functions = Vec::with_capacity(snapshot.functions.len() + 1);
        functions.extend(snapshot.functions.iter().cloned());
        functions.push(function);
        snapshot.functions = Arc::new(functions);
        snapshot.generation += 1;
        drop(snapshot);

        self.compiled.lock().clear();
        Ok(())
    }

    pub fn register_all<I>(&self, functions: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = Arc<dyn Function>>,
    {
        for f in functions {
            self.register(f)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize { self.snapshot.read().functions.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn get(&self, id: &FunctionId) -> Option<Arc<dyn Function>> {
        self.snapshot.read().functions.iter().find(|f| f.id() == id).cloned()
    }

    /// The compiled index for the context's valuation time, built once per
    /// (registry generation, valuation time) and shared afterwards. Only the
    /// most recently used valuation times stay cached.
    pub fn compile(&self, context: &CompilationContext) -> Arc<CompiledFunctions> {
        let snapshot = self.snapshot.read().clone();
        let key = (snapshot.generation, context.valuation_time());

        {
            let mut cache = self.compiled.lock();
            if let Some(pos) = cache.iter().position(|(k, _)| *k == key) {
                if let Some(entry) = cache.remove(pos) {
                    let hit = entry.1.clone();
                    cache.push_back(entry);
                    return hit;
                }
            }
        }

        let compiled = Arc::new(CompiledFunctions::build(&snapshot.functions, context));
        log::debug!(
            "Compiled {} of {} functions for {}",
            compiled.len(),
            snapshot.functions.len(),
            context.valuation_time()
        );
        let mut cache = self.compiled.lock();
        // Another thread may have compiled the same key meanwhile.
        if let Some((_, existing)) = cache.iter().find(|(k, _)| *k == key) {
            return existing.clone();
        }
        cache.retain(|((generation, _), _)| *generation >= key.0);
        cache.push_back((key, compiled.clone()));
        while cache.len() > COMPILED_CACHE_CAPACITY {
            cache.pop_front();
        }
        compiled
    }

    /// Convenience lookup: compile for `context` and filter for `target`.
    pub fn get_applicable_functions(&self, context: &CompilationContext, target: &ComputationTarget) -> Vec<Arc<dyn Function>> {
        self.compile(context).applicable_functions(context, target)
    }
}

impl fmt::Debug for FunctionRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot.read();
        f.debug_struct("FunctionRepository")
            .field("generation", &snapshot.generation)
            .field("functions", &snapshot.functions.iter().map(|f| f.id().clone()).collect::<Vec<_>>())
            .finish()
    }
}

/// The functions valid at one valuation time, in priority order and indexed
/// by the target type they can handle.
pub struct CompiledFunctions {
    valuation_time: DateTime<Utc>,
    /// Sorted by priority (descending), ties in registration order.
    functions: Vec<Arc<dyn Function>>,
    by_type: HashMap<TargetType, Vec<usize>>,
    universal: Vec<usize>,
}

impl CompiledFunctions {
    fn build(registered: &[Arc<dyn Function>], context: &CompilationContext) -> Self {
        let at = context.valuation_time();
        let mut functions: Vec<Arc<dyn Function>> = registered
            .iter()
            .filter(|f| f.validity().contains(at))
            .cloned()
            .collect();
        // Stable sort keeps registration order between equal priorities.
        functions.sort_by_key(|f| std::cmp::Reverse(f.priority()));

        let mut by_type: HashMap<TargetType, Vec<usize>> = HashMap::new();
        let mut universal = Vec::new();
        for (i, f) in functions.iter().enumerate() {
            match f.target_scope().index_type() {
                Some(t) => by_type.entry(t.clone()).or_default().push(i),
                None => universal.push(i),
            }
        }

        Self { valuation_time: at, functions, by_type, universal }
    }

    pub fn valuation_time(&self) -> DateTime<Utc> { self.valuation_time }
    pub fn len(&self) -> usize { self.functions.len() }
    pub fn is_empty(&self) -> bool { self.functions.is_empty() }

    /// Candidates for `target` in deterministic priority order.
    ///
    /// Only functions indexed under the target's type (or applicable to
    /// anything) are inspected.
    pub fn applicable_functions(&self, context: &CompilationContext, target: &ComputationTarget) -> Vec<Arc<dyn Function>> {
        let typed = self.by_type.get(target.target_type()).map(Vec::as_slice).unwrap_or(&[]);
        let mut indices: Vec<usize> = typed.iter().chain(self.universal.iter()).copied().collect();
        indices.sort_unstable();

        indices
            .into_iter()
            .map(|i| &self.functions[i])
            .filter(|f| f.target_scope().contains(target.to_specification()))
            .filter(|f| f.can_apply_to(context, target))
            .cloned()
            .collect()
    }
}

impl fmt::Debug for CompiledFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFunctions")
            .field("valuation_time", &self.valuation_time)
            .field("functions", &self.functions.iter().map(|f| f.id().clone()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{MockFunction, Validity};
    use crate::target::{ComputationTargetSpecification, TargetType};
    use crate::value::ValueProperties;
    use chrono::TimeZone;

    fn ctx() -> CompilationContext {
        CompilationContext::new(Utc.with_ymd_and_hms(2024, 6, 28, 0, 0, 0).unwrap())
    }

    fn ids(functions: &[Arc<dyn Function>]) -> Vec<String> {
        functions.iter().map(|f| f.id().to_string()).collect()
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let repo = FunctionRepository::new();
        repo.register(MockFunction::for_type("F1", TargetType::Security).into_arc()).unwrap();
        let err = repo.register(MockFunction::for_type("F1", TargetType::Position).into_arc()).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateFunction(FunctionId::new("F1")));
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_applicable_functions_by_type_and_instance() {
        let aapl = ComputationTargetSpecification::security("Ticker", "AAPL");
        let msft = ComputationTargetSpecification::security("Ticker", "MSFT");
        let repo = FunctionRepository::new();
        repo.register(MockFunction::for_type("AllSecurities", TargetType::Security).into_arc()).unwrap();
        repo.register(MockFunction::new("OnlyAapl", aapl.clone()).into_arc()).unwrap();
        repo.register(MockFunction::for_type("Positions", TargetType::Position).into_arc()).unwrap();

        let ctx = ctx();
        let compiled = repo.compile(&ctx);
        assert_eq!(ids(&compiled.applicable_functions(&ctx, &ComputationTarget::new(aapl))), ["AllSecurities", "OnlyAapl"]);
        assert_eq!(ids(&compiled.applicable_functions(&ctx, &ComputationTarget::new(msft))), ["AllSecurities"]);
    }

    #[test]
    fn test_priority_then_registration_order() {
        let target = ComputationTargetSpecification::primitive("Id", "E1");
        let repo = FunctionRepository::new();
        repo.register(MockFunction::new("Low", target.clone()).into_arc()).unwrap();
        repo.register(MockFunction::new("High", target.clone()).with_priority(10).into_arc()).unwrap();
        repo.register(MockFunction::new("LowToo", target.clone()).into_arc()).unwrap();

        let ctx = ctx();
        let found = repo.get_applicable_functions(&ctx, &ComputationTarget::new(target));
        assert_eq!(ids(&found), ["High", "Low", "LowToo"]);
    }

    #[test]
    fn test_compile_filters_by_validity_and_caches() {
        let target = ComputationTargetSpecification::primitive("Id", "E1");
        let expired = Validity::between(
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
        );
        let repo = FunctionRepository::new();
        repo.register(MockFunction::new("Current", target.clone()).producing("V", ValueProperties::none(), 1.0).into_arc())
            .unwrap();
        repo.register(MockFunction::new("Expired", target).with_validity(expired).into_arc()).unwrap();

        let ctx = ctx();
        let first = repo.compile(&ctx);
        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first, &repo.compile(&ctx)));

        // Registration invalidates the cache.
        repo.register(MockFunction::for_type("Later", TargetType::Primitive).into_arc()).unwrap();
        let second = repo.compile(&ctx);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_compile_cache_is_bounded() {
        let repo = FunctionRepository::new();
        repo.register(MockFunction::for_type("F1", TargetType::Primitive).into_arc()).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 6, 28, 0, 0, 0).unwrap();

        for minute in 0..500 {
            repo.compile(&CompilationContext::new(start + chrono::Duration::minutes(minute)));
        }
        assert_eq!(repo.compiled.lock().len(), COMPILED_CACHE_CAPACITY);

        // The latest valuation time is still served from the cache.
        let latest = CompilationContext::new(start + chrono::Duration::minutes(499));
        assert!(Arc::ptr_eq(&repo.compile(&latest), &repo.compile(&latest)));
    }
}
