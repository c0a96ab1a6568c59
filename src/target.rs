//! Identifies *what* a computed value is about.
//!
//! A target is a type tag plus an identity. Requirements and specifications
//! only carry the lightweight `ComputationTargetSpecification`; the graph
//! builder resolves it to a full `ComputationTarget` (children, attributes)
//! through a `TargetResolver` before asking functions whether they apply.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Classification of a target, used to index functions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetType {
    /// No target at all (e.g. a global value).
    Null,
    Primitive,
    Security,
    Position,
    Trade,
    PortfolioNode,
    Other(String),
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Null => write!(f, "NULL"),
            TargetType::Primitive => write!(f, "PRIMITIVE"),
            TargetType::Security => write!(f, "SECURITY"),
            TargetType::Position => write!(f, "POSITION"),
            TargetType::Trade => write!(f, "TRADE"),
            TargetType::PortfolioNode => write!(f, "PORTFOLIO_NODE"),
            TargetType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A scheme-qualified, optionally versioned identifier (`Scheme~Value~Version`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueId {
    pub scheme: String,
    pub value: String,
    pub version: Option<String>,
}

impl UniqueId {
    pub fn of(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self { scheme: scheme.into(), value: value.into(), version: None }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Parses `Scheme~Value` or `Scheme~Value~Version`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split('~');
        let scheme = parts.next().filter(|s| !s.is_empty())?;
        let value = parts.next().filter(|s| !s.is_empty())?;
        let version = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return None;
        }
        Some(Self { scheme: scheme.to_string(), value: value.to_string(), version })
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}~{}~{}", self.scheme, self.value, v),
            None => write!(f, "{}~{}", self.scheme, self.value),
        }
    }
}

/// The canonical key of a target: type plus identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComputationTargetSpecification {
    pub target_type: TargetType,
    pub unique_id: Option<UniqueId>,
}

impl ComputationTargetSpecification {
    pub fn new(target_type: TargetType, unique_id: UniqueId) -> Self {
        Self { target_type, unique_id: Some(unique_id) }
    }

    pub fn null() -> Self {
        Self { target_type: TargetType::Null, unique_id: None }
    }

    pub fn primitive(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(TargetType::Primitive, UniqueId::of(scheme, value))
    }

    pub fn security(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(TargetType::Security, UniqueId::of(scheme, value))
    }
}

impl fmt::Display for ComputationTargetSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.unique_id {
            Some(id) => write!(f, "{}:{}", self.target_type, id),
            None => write!(f, "{}", self.target_type),
        }
    }
}

/// A resolved target.
///
/// Equality and hashing only consider the specification: two targets are the
/// same iff type and identity match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationTarget {
    specification: ComputationTargetSpecification,
    /// Derived targets, e.g. the positions under a portfolio node.
    pub children: Vec<ComputationTargetSpecification>,
    /// Reference data a function may consult in `can_apply_to`.
    pub attributes: BTreeMap<String, String>,
}

impl ComputationTarget {
    pub fn new(specification: ComputationTargetSpecification) -> Self {
        Self { specification, children: Vec::new(), attributes: BTreeMap::new() }
    }

    pub fn of(target_type: TargetType, unique_id: UniqueId) -> Self {
        Self::new(ComputationTargetSpecification::new(target_type, unique_id))
    }

    pub fn with_child(mut self, child: ComputationTargetSpecification) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn target_type(&self) -> &TargetType { &self.specification.target_type }
    pub fn unique_id(&self) -> Option<&UniqueId> { self.specification.unique_id.as_ref() }
    pub fn attribute(&self, name: &str) -> Option<&str> { self.attributes.get(name).map(String::as_str) }

    /// The canonical key used for graph-node caching.
    pub fn to_specification(&self) -> &ComputationTargetSpecification { &self.specification }
}

impl PartialEq for ComputationTarget {
    fn eq(&self, other: &Self) -> bool { self.specification == other.specification }
}

impl Eq for ComputationTarget {}

impl Hash for ComputationTarget {
    fn hash<H: Hasher>(&self, state: &mut H) { self.specification.hash(state) }
}

/// Which targets a function declares itself eligible for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetScope {
    Anything,
    /// All targets of one type.
    OfType(TargetType),
    /// One specific target.
    Instance(ComputationTargetSpecification),
}

impl TargetScope {
    pub fn contains(&self, target: &ComputationTargetSpecification) -> bool {
        match self {
            TargetScope::Anything => true,
            TargetScope::OfType(t) => &target.target_type == t,
            TargetScope::Instance(spec) => spec == target,
        }
    }

    /// The type this scope is indexed under; `None` for `Anything`.
    pub fn index_type(&self) -> Option<&TargetType> {
        match self {
            TargetScope::Anything => None,
            TargetScope::OfType(t) => Some(t),
            TargetScope::Instance(spec) => Some(&spec.target_type),
        }
    }
}

/// Resolves a target specification to the full target (an external lookup).
pub trait TargetResolver: Send + Sync {
    fn resolve(&self, specification: &ComputationTargetSpecification) -> Option<ComputationTarget>;
}

/// Resolves every specification to a bare target with no children or attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTargetResolver;

impl TargetResolver for DefaultTargetResolver {
    fn resolve(&self, specification: &ComputationTargetSpecification) -> Option<ComputationTarget> {
        Some(ComputationTarget::new(specification.clone()))
    }
}

/// Resolves only targets that were explicitly added.
#[derive(Debug, Default)]
pub struct InMemoryTargetResolver {
    targets: RwLock<HashMap<ComputationTargetSpecification, ComputationTarget>>,
}

impl InMemoryTargetResolver {
    pub fn new() -> Self { Self::default() }

    pub fn add(&self, target: ComputationTarget) {
        self.targets.write().insert(target.to_specification().clone(), target);
    }
}

impl TargetResolver for InMemoryTargetResolver {
    fn resolve(&self, specification: &ComputationTargetSpecification) -> Option<ComputationTarget> {
        self.targets.read().get(specification).cloned()
    }
}
