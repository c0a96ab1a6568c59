//! Contextual accessors handed to functions.
//!
//! The core never mutates either context. Both carry a typed extension map
//! so hosts can inject runtime services (security lookups, market-data
//! accessors, clocks) that functions read by key.

use super::live_data::{MarketDataAvailability, NoMarketData};
use crate::target::{ComputationTarget, ComputationTargetSpecification, DefaultTargetResolver, TargetResolver};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Typed extension map for non-serializable services.
#[derive(Default)]
pub struct Extensions {
    inner: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self { Self::default() }

    /// Inserts a value under `key`, replacing any previous value.
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.inner.insert(key.to_string(), Box::new(value));
    }

    /// `None` if the key is absent or holds a different type.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.inner.get(key).and_then(|v| v.downcast_ref())
    }

    pub fn has(&self, key: &str) -> bool { self.inner.contains_key(key) }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.inner.keys().collect();
        keys.sort();
        f.debug_struct("Extensions").field("keys", &keys).finish()
    }
}

/// Input to graph building: as-of time, reference-data and market-data lookups.
pub struct CompilationContext {
    valuation_time: DateTime<Utc>,
    target_resolver: Arc<dyn TargetResolver>,
    market_data: Arc<dyn MarketDataAvailability>,
    extensions: Extensions,
}

impl CompilationContext {
    pub fn new(valuation_time: DateTime<Utc>) -> Self {
        Self {
            valuation_time,
            target_resolver: Arc::new(DefaultTargetResolver),
            market_data: Arc::new(NoMarketData),
            extensions: Extensions::new(),
        }
    }

    pub fn with_target_resolver(mut self, resolver: Arc<dyn TargetResolver>) -> Self {
        self.target_resolver = resolver;
        self
    }

    pub fn with_market_data(mut self, availability: Arc<dyn MarketDataAvailability>) -> Self {
        self.market_data = availability;
        self
    }

    pub fn with_extension<T: Send + Sync + 'static>(mut self, key: &str, value: T) -> Self {
        self.extensions.set(key, value);
        self
    }

    pub fn valuation_time(&self) -> DateTime<Utc> { self.valuation_time }
    pub fn market_data(&self) -> &dyn MarketDataAvailability { self.market_data.as_ref() }
    pub fn extensions(&self) -> &Extensions { &self.extensions }

    pub fn resolve_target(&self, specification: &ComputationTargetSpecification) -> Option<ComputationTarget> {
        self.target_resolver.resolve(specification)
    }
}

impl fmt::Debug for CompilationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationContext")
            .field("valuation_time", &self.valuation_time)
            .field("extensions", &self.extensions)
            .finish()
    }
}

/// Input to execution. Shared read-only by every node of a run.
#[derive(Debug)]
pub struct ExecutionContext {
    valuation_time: DateTime<Utc>,
    extensions: Extensions,
}

impl ExecutionContext {
    pub fn new(valuation_time: DateTime<Utc>) -> Self {
        Self { valuation_time, extensions: Extensions::new() }
    }

    pub fn with_extension<T: Send + Sync + 'static>(mut self, key: &str, value: T) -> Self {
        self.extensions.set(key, value);
        self
    }

    pub fn valuation_time(&self) -> DateTime<Utc> { self.valuation_time }
    pub fn extensions(&self) -> &Extensions { &self.extensions }

    pub fn service<T: Send + Sync + 'static>(&self, key: &str) -> Result<&T, super::FunctionError> {
        self.extensions
            .get(key)
            .ok_or_else(|| super::FunctionError::MissingService(key.to_string()))
    }
}
