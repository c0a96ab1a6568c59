//! Computed results: a specification paired with its payload.

use super::specification::ValueSpecification;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The payload of a computed value.
///
/// Numeric payloads keep the scalar/series split so scalar math does not
/// allocate; structured analytics results travel as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Scalar(f64),
    /// Shared reference to a vector (time series, curve nodes, ...).
    Series(Arc<Vec<f64>>),
    Text(String),
    Json(serde_json::Value),
}

impl Value {
    pub fn series(values: Vec<f64>) -> Self { Value::Series(Arc::new(values)) }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(s) => Some(*s),
            Value::Series(v) if v.len() == 1 => v.first().copied(),
            _ => None,
        }
    }

    /// Converts numeric payloads to a vector; `None` for text and JSON.
    pub fn to_vec(&self) -> Option<Vec<f64>> {
        match self {
            Value::Scalar(s) => Some(vec![*s]),
            Value::Series(s) => Some(s.to_vec()),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Scalar(v) }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self { Value::series(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::Text(v.to_string()) }
}

/// Produced only by execution (or supplied as live data), never by graph building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedValue {
    pub specification: ValueSpecification,
    pub value: Value,
}

impl ComputedValue {
    pub fn new(specification: ValueSpecification, value: impl Into<Value>) -> Self {
        Self { specification, value: value.into() }
    }
}
