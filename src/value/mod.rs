//! The value model: what is wanted (`ValueRequirement`), what will be
//! produced (`ValueSpecification`), and what was computed (`ComputedValue`).
pub mod computed;
pub mod properties;
pub mod requirement;
pub mod specification;

pub use computed::{ComputedValue, Value};
pub use properties::{PropertyMismatch, PropertyValues, ValueProperties};
pub use requirement::{requirement_satisfied_by, ValueRequirement};
pub use specification::{ValueError, ValueSpecification};
