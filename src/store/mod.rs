//! Process-scoped storage of function definitions.
pub mod registry;

pub use registry::{CompiledFunctions, FunctionRepository, RegistryError};
