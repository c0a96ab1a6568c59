//! properties.rs
//! The property-constraint language shared by requirements and specifications.
//!
//! A requirement's properties are a *constraint*: each named property maps to
//! either a finite set of acceptable values or a wildcard. A specification's
//! properties are *concrete*: every present property has exactly one value.
//! Properties absent from a map are unconstrained.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The acceptable values for a single property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyValues {
    /// Any single value is accepted.
    Any,
    /// One of a finite, non-empty set of values.
    OneOf(BTreeSet<String>),
}

impl PropertyValues {
    pub fn single(value: impl Into<String>) -> Self {
        Self::OneOf(BTreeSet::from([value.into()]))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, PropertyValues::Any)
    }

    /// The value if exactly one is present.
    pub fn single_value(&self) -> Option<&str> {
        match self {
            PropertyValues::OneOf(set) if set.len() == 1 => set.iter().next().map(String::as_str),
            _ => None,
        }
    }

    /// True when `self`, read as a constraint, accepts some value offered by `offered`.
    fn accepts(&self, offered: &PropertyValues) -> bool {
        match (self, offered) {
            (PropertyValues::Any, _) => true,
            // A wildcard offer is not a concrete value.
            (PropertyValues::OneOf(_), PropertyValues::Any) => false,
            (PropertyValues::OneOf(accepted), PropertyValues::OneOf(values)) => {
                values.iter().any(|v| accepted.contains(v))
            }
        }
    }

    fn union(&self, other: &PropertyValues) -> PropertyValues {
        match (self, other) {
            (PropertyValues::OneOf(a), PropertyValues::OneOf(b)) => {
                PropertyValues::OneOf(a.union(b).cloned().collect())
            }
            _ => PropertyValues::Any,
        }
    }

    fn intersect(&self, other: &PropertyValues) -> Option<PropertyValues> {
        match (self, other) {
            (PropertyValues::Any, v) | (v, PropertyValues::Any) => Some(v.clone()),
            (PropertyValues::OneOf(a), PropertyValues::OneOf(b)) => {
                let common: BTreeSet<String> = a.intersection(b).cloned().collect();
                if common.is_empty() {
                    None
                } else {
                    Some(PropertyValues::OneOf(common))
                }
            }
        }
    }
}

impl fmt::Display for PropertyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValues::Any => write!(f, "*"),
            PropertyValues::OneOf(values) => {
                let joined: Vec<&str> = values.iter().map(String::as_str).collect();
                if joined.len() == 1 {
                    write!(f, "{}", joined[0])
                } else {
                    write!(f, "[{}]", joined.join(","))
                }
            }
        }
    }
}

/// Why a result template could not be committed to a requirement's constraints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyMismatch {
    pub property: String,
    pub required: PropertyValues,
    /// What the producer offers; `None` when it does not produce the property at all.
    pub offered: Option<PropertyValues>,
}

impl fmt::Display for PropertyMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.offered {
            Some(offered) => write!(
                f,
                "property '{}' requires {} but producer offers {}",
                self.property, self.required, offered
            ),
            None => write!(
                f,
                "property '{}' requires {} but producer does not define it",
                self.property, self.required
            ),
        }
    }
}

/// An immutable map from property name to acceptable values.
///
/// Backed by a `BTreeMap` so equality, hashing and ordering are structural
/// and iteration is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueProperties {
    props: BTreeMap<String, PropertyValues>,
}

impl ValueProperties {
    /// The empty property set: constrains nothing.
    pub fn none() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.props.is_empty() }
    pub fn len(&self) -> usize { self.props.len() }

    pub fn get(&self, name: &str) -> Option<&PropertyValues> {
        self.props.get(name)
    }

    /// The concrete value of `name`, if it has exactly one.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.props.get(name).and_then(PropertyValues::single_value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.props.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValues)> {
        self.props.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Adds or overrides `name` with a single value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(name.into(), PropertyValues::single(value));
        self
    }

    /// Adds or overrides `name` with a set of acceptable values.
    ///
    /// An empty iterator declares the property as a wildcard.
    pub fn with_values<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        let values = if set.is_empty() { PropertyValues::Any } else { PropertyValues::OneOf(set) };
        self.props.insert(name.into(), values);
        self
    }

    /// Declares `name` as a wildcard.
    pub fn with_any(mut self, name: impl Into<String>) -> Self {
        self.props.insert(name.into(), PropertyValues::Any);
        self
    }

    pub fn without(mut self, name: &str) -> Self {
        self.props.remove(name);
        self
    }

    /// Every property of either side; values of shared properties are merged.
    pub fn union(&self, other: &ValueProperties) -> ValueProperties {
        let mut props = self.props.clone();
        for (name, values) in &other.props {
            props
                .entry(name.clone())
                .and_modify(|existing| *existing = existing.union(values))
                .or_insert_with(|| values.clone());
        }
        ValueProperties { props }
    }

    /// Properties present on both sides with their common values.
    /// Properties with no common value are dropped.
    pub fn intersect(&self, other: &ValueProperties) -> ValueProperties {
        let props = self
            .props
            .iter()
            .filter_map(|(name, values)| {
                let theirs = other.props.get(name)?;
                values.intersect(theirs).map(|common| (name.clone(), common))
            })
            .collect();
        ValueProperties { props }
    }

    /// True when every property is present with exactly one value.
    pub fn is_concrete(&self) -> bool {
        self.props.values().all(|v| v.single_value().is_some())
    }

    /// Reads `self` as a constraint and checks whether `offered` satisfies it.
    ///
    /// For every property P present here, `offered` must have P, and its value
    /// must be acceptable (a wildcard here accepts any concrete value).
    pub fn is_satisfied_by(&self, offered: &ValueProperties) -> bool {
        self.first_unsatisfied(offered).is_none()
    }

    /// The first constraint `offered` fails, if any.
    pub fn first_unsatisfied(&self, offered: &ValueProperties) -> Option<PropertyMismatch> {
        self.props.iter().find_map(|(name, required)| match offered.props.get(name) {
            Some(values) if required.accepts(values) => None,
            other => Some(PropertyMismatch {
                property: name.clone(),
                required: required.clone(),
                offered: other.cloned(),
            }),
        })
    }

    /// Commits a result template (`self`) to a requirement's `constraints`.
    ///
    /// Returns concrete properties: every template property with a finite set
    /// is narrowed by the constraint and its smallest value chosen; wildcard
    /// template properties take the smallest constrained value, or are left
    /// out when the constraint does not mention them. A constrained property
    /// the template lacks, or an empty narrowing, is a mismatch.
    pub fn resolve_against(&self, constraints: &ValueProperties) -> Result<ValueProperties, PropertyMismatch> {
        let mut props = BTreeMap::new();

        for (name, offered) in &self.props {
            let chosen = match (offered, constraints.props.get(name)) {
                (PropertyValues::OneOf(values), Some(PropertyValues::OneOf(accepted))) => {
                    values.iter().find(|v| accepted.contains(*v)).cloned()
                }
                (PropertyValues::OneOf(values), _) => values.iter().next().cloned(),
                (PropertyValues::Any, Some(PropertyValues::OneOf(accepted))) => accepted.iter().next().cloned(),
                (PropertyValues::Any, _) => continue,
            };
            match chosen {
                Some(value) => {
                    props.insert(name.clone(), PropertyValues::single(value));
                }
                None => {
                    return Err(PropertyMismatch {
                        property: name.clone(),
                        required: constraints.props.get(name).cloned().unwrap_or(PropertyValues::Any),
                        offered: Some(offered.clone()),
                    })
                }
            }
        }

        for (name, required) in &constraints.props {
            if !self.props.contains_key(name) {
                return Err(PropertyMismatch {
                    property: name.clone(),
                    required: required.clone(),
                    offered: None,
                });
            }
        }

        Ok(ValueProperties { props })
    }
}

impl fmt::Display for ValueProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, values)) in self.props.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, values)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn usd() -> ValueProperties { ValueProperties::none().with("Currency", "USD") }

    #[rstest]
    #[case::unconstrained(ValueProperties::none(), usd(), true)]
    #[case::exact(usd(), usd(), true)]
    #[case::wildcard(ValueProperties::none().with_any("Currency"), usd(), true)]
    #[case::in_set(ValueProperties::none().with_values("Currency", ["EUR", "USD"]), usd(), true)]
    #[case::wrong_value(ValueProperties::none().with("Currency", "EUR"), usd(), false)]
    #[case::missing(ValueProperties::none().with_any("Curve"), usd(), false)]
    fn test_satisfaction(#[case] required: ValueProperties, #[case] offered: ValueProperties, #[case] expected: bool) {
        assert_eq!(required.is_satisfied_by(&offered), expected);
    }

    #[test]
    fn test_wildcard_offer_never_satisfies_finite_constraint() {
        let offered = ValueProperties::none().with_any("Currency");
        assert!(!usd().is_satisfied_by(&offered));
    }

    #[test]
    fn test_union_and_intersect() {
        let a = ValueProperties::none().with("Currency", "USD").with("Curve", "Discount");
        let b = ValueProperties::none().with("Currency", "EUR").with_any("Method");

        let union = a.union(&b);
        assert_eq!(union.get("Currency"), Some(&PropertyValues::OneOf(BTreeSet::from(["EUR".into(), "USD".into()]))));
        assert_eq!(union.get("Method"), Some(&PropertyValues::Any));
        assert_eq!(union.len(), 3);

        // Currency has no common value and is dropped; Curve/Method are one-sided.
        assert!(a.intersect(&b).is_empty());

        let c = ValueProperties::none().with_values("Currency", ["USD", "GBP"]);
        assert_eq!(a.intersect(&c).value("Currency"), Some("USD"));
    }

    #[test]
    fn test_with_overrides_and_without() {
        let props = usd().with("Currency", "JPY").with_any("Curve").without("Curve");
        assert_eq!(props.value("Currency"), Some("JPY"));
        assert!(props.get("Curve").is_none());
        assert!(props.is_concrete());
        assert!(!usd().with_any("Curve").is_concrete());
    }

    #[test]
    fn test_resolve_against_picks_deterministic_concrete_values() {
        let template = ValueProperties::none()
            .with_values("Currency", ["USD", "EUR"])
            .with_any("Curve")
            .with_any("Method");
        let constraints = ValueProperties::none().with("Currency", "USD").with_values("Curve", ["Forward", "Discount"]);

        let resolved = template.resolve_against(&constraints).unwrap();
        assert_eq!(resolved.value("Currency"), Some("USD"));
        assert_eq!(resolved.value("Curve"), Some("Discount"));
        // Unconstrained wildcards cannot be made concrete and are left out.
        assert!(resolved.get("Method").is_none());
        assert!(resolved.is_concrete());
        assert!(constraints.is_satisfied_by(&resolved));
    }

    #[test]
    fn test_resolve_against_reports_mismatch() {
        let template = ValueProperties::none().with("Currency", "EUR");
        let err = template.resolve_against(&usd()).unwrap_err();
        assert_eq!(err.property, "Currency");
        assert_eq!(err.offered, Some(PropertyValues::single("EUR")));

        let err = ValueProperties::none().resolve_against(&usd()).unwrap_err();
        assert_eq!(err.offered, None);
        assert!(err.to_string().contains("does not define"));
    }

    #[test]
    fn test_display() {
        let props = ValueProperties::none().with("Currency", "USD").with_any("Curve");
        assert_eq!(props.to_string(), "{Currency=USD, Curve=*}");
    }
}
