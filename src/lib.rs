//! A Tokio-based bounded-concurrency scheduler: runs a batch of futures with a
//! limit on outstanding executions, collects their outcomes in submission order,
//! and supports a cooperative stop.

mod error;
mod execution;
mod handle;
mod notifier;
mod result_set;
mod scheduler;
mod state;
mod task;

pub use error::{SchedulerError, TaskFailure};
pub use handle::PendingOutcome;
pub use notifier::{EventKind, SchedulerEvent};
pub use result_set::{ResultSet, Slot};
pub use scheduler::{Scheduler, StopMode};
pub use state::RunState;
pub use task::{Operation, TaskBatch, TaskOutput, TaskToExecute, TaskValue};
