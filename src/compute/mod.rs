//! Execution of resolved graphs.
pub mod cancel;
pub mod engine;
pub mod error;
pub mod ledger;

pub use cancel::CancellationToken;
pub use engine::{ExecutionStatistics, FunctionStatistics, RunResults, Scheduler};
pub use error::{ExecutionFailure, SchedulerError};
pub use ledger::{Ledger, NodeState, ValueResult};
