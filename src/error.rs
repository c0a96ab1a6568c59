//! Crate-level error for the setup paths (registration, configuration,
//! scheduler construction). Resolution and execution failures are reported
//! per root value instead, see `calculator::ValueFailure`.

use crate::compute::SchedulerError;
use crate::config::ConfigError;
use crate::store::RegistryError;
use crate::value::ValueError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Value(#[from] ValueError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
