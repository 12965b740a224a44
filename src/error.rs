use crate::state::RunState;

use thiserror::Error;

/// Errors returned by the `Scheduler` lifecycle operations.
///
/// Task failures never show up here; they are recorded in the `ResultSet`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
  #[error("Scheduler is in an invalid state for this operation: {0}")]
  InvalidState(RunState),

  #[error("Malformed task batch: {operations} operations but {arguments} argument sets")]
  MismatchedBatch { operations: usize, arguments: usize },

  #[error("Run was dropped before it concluded, no results are available")]
  RunAborted,
}

/// The failure recorded for a single task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure<E> {
  /// The operation reported a failure, either synchronously or from its future.
  #[error("Task failed: {0:?}")]
  Failed(E),

  /// The operation panicked while being invoked or while its future was polled.
  #[error("Task panicked: {0}")]
  Panicked(String),
}

impl<E> TaskFailure<E> {
  /// Returns the operation's own error, if the task did not panic.
  pub fn as_failed(&self) -> Option<&E> {
    match self {
      TaskFailure::Failed(e) => Some(e),
      TaskFailure::Panicked(_) => None,
    }
  }

  pub fn is_panic(&self) -> bool {
    matches!(self, TaskFailure::Panicked(_))
  }

  pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "non-string panic payload".to_string()
    };
    TaskFailure::Panicked(message)
  }
}
