use crate::error::TaskFailure;
use crate::task::TaskValue;

use std::fmt;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

pub(crate) type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, TaskFailure<E>>>>;

/// A handle to the eventual outcome of an outstanding task execution.
///
/// Delivered with the `running` notification. Any number of clones may await
/// the outcome; awaiting does not interfere with the scheduler, and a handle
/// still resolves for executions a stop has detached.
pub struct PendingOutcome<T, E> {
  pub(crate) index: usize,
  pub(crate) execution_id: u64,
  pub(crate) outcome: SharedOutcome<T, E>,
}

impl<T, E> Clone for PendingOutcome<T, E> {
  fn clone(&self) -> Self {
    Self {
      index: self.index,
      execution_id: self.execution_id,
      outcome: self.outcome.clone(),
    }
  }
}

impl<T, E> fmt::Debug for PendingOutcome<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PendingOutcome")
      .field("index", &self.index)
      .field("execution_id", &self.execution_id)
      .finish_non_exhaustive()
  }
}

impl<T: TaskValue, E: TaskValue> PendingOutcome<T, E> {
  /// Index of the task this execution belongs to.
  pub fn index(&self) -> usize {
    self.index
  }

  /// Process-unique identity of the execution.
  pub fn execution_id(&self) -> u64 {
    self.execution_id
  }

  /// Returns the outcome if the execution has already settled.
  pub fn peek(&self) -> Option<Result<T, TaskFailure<E>>> {
    self.outcome.peek().cloned()
  }

  /// Awaits the execution's outcome.
  ///
  /// If nothing else polls the execution (for example it was dropped by a
  /// `StopMode::Cancel` stop), awaiting drives it from here.
  pub async fn wait(self) -> Result<T, TaskFailure<E>> {
    tracing::trace!(index = self.index, execution_id = self.execution_id, "PendingOutcome: awaiting outcome.");
    self.outcome.await
  }

  pub(crate) fn into_shared(self) -> SharedOutcome<T, E> {
    self.outcome
  }

  pub(crate) fn new(index: usize, execution_id: u64, outcome: BoxFuture<'static, Result<T, TaskFailure<E>>>) -> Self {
    Self {
      index,
      execution_id,
      outcome: outcome.shared(),
    }
  }
}
