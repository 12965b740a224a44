use crate::error::TaskFailure;
use crate::handle::PendingOutcome;
use crate::task::{Operation, TaskOutput, TaskValue};

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tracing::{info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_EXECUTION_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// The settled outcome of one execution, tagged with where it came from.
#[derive(Debug)]
pub(crate) struct Settlement<A, T, E> {
  pub(crate) execution_id: u64,
  pub(crate) index: usize,
  pub(crate) operation: Operation<A, T, E>,
  pub(crate) arguments: A,
  pub(crate) outcome: Result<T, TaskFailure<E>>,
}

/// One invocation of a task's operation.
pub(crate) struct TaskExecution<A, T, E> {
  pub(crate) execution_id: u64,
  pub(crate) index: usize,
  pub(crate) operation: Operation<A, T, E>,
}

impl<A: TaskValue, T: TaskValue, E: TaskValue> TaskExecution<A, T, E> {
  pub(crate) fn new(index: usize, operation: Operation<A, T, E>) -> Self {
    Self {
      execution_id: NEXT_EXECUTION_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
      index,
      operation,
    }
  }

  /// Invokes the operation exactly once.
  ///
  /// Returns the handle to the eventual outcome together with the future the
  /// scheduler races; that future resolves exactly once with a `Settlement`.
  /// A panic during invocation, a `Ready(Err)` and a failed `Deferred` future all
  /// settle as failures.
  pub(crate) fn start(
    self,
    arguments: A,
    scheduler_name: &str,
  ) -> (PendingOutcome<T, E>, BoxFuture<'static, Settlement<A, T, E>>) {
    let Self {
      execution_id,
      index,
      operation,
    } = self;

    let invoked = std::panic::catch_unwind(AssertUnwindSafe(|| operation.invoke(arguments.clone())));

    let outcome_future: BoxFuture<'static, Result<T, TaskFailure<E>>> = match invoked {
      Ok(TaskOutput::Ready(result)) => {
        trace!(index, execution_id, "Operation returned a ready outcome.");
        future::ready(result.map_err(TaskFailure::Failed)).boxed()
      }
      Ok(TaskOutput::Deferred(task_future)) => {
        let span = info_span!("task_execution", scheduler = %scheduler_name, index, execution_id);
        AssertUnwindSafe(task_future)
          .catch_unwind()
          .map(move |polled| match polled {
            Ok(result) => result.map_err(TaskFailure::Failed),
            Err(panic_payload) => {
              warn!(index, execution_id, "Task future panicked during execution.");
              Err(TaskFailure::from_panic(panic_payload))
            }
          })
          .instrument(span)
          .boxed()
      }
      Err(panic_payload) => {
        warn!(index, execution_id, "Operation panicked while being invoked.");
        future::ready(Err(TaskFailure::from_panic(panic_payload))).boxed()
      }
    };

    let pending = PendingOutcome::new(index, execution_id, outcome_future);
    let shared = pending.clone().into_shared();
    let settlement = async move {
      let outcome = shared.await;
      Settlement {
        execution_id,
        index,
        operation,
        arguments,
        outcome,
      }
    }
    .boxed();

    (pending, settlement)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  type Op = Operation<u32, u32, String>;

  #[tokio::test]
  async fn test_ready_value_settles_as_success() {
    let op = Op::from_fn(|x| Ok(x + 1));
    let (pending, settlement) = TaskExecution::new(4, op).start(41, "test");
    let settled = settlement.await;
    assert_eq!(settled.index, 4);
    assert_eq!(settled.arguments, 41);
    assert_eq!(settled.outcome, Ok(42));
    assert_eq!(pending.peek(), Some(Ok(42)));
  }

  #[tokio::test]
  async fn test_sync_error_and_async_error_are_both_failures() {
    let sync_op = Op::from_fn(|_| Err("sync".to_string()));
    let async_op = Op::from_async(|_| async {
      tokio::time::sleep(Duration::from_millis(5)).await;
      Err("async".to_string())
    });

    let (_, s1) = TaskExecution::new(0, sync_op).start(0, "test");
    let (_, s2) = TaskExecution::new(1, async_op).start(0, "test");
    assert_eq!(s1.await.outcome, Err(TaskFailure::Failed("sync".to_string())));
    assert_eq!(s2.await.outcome, Err(TaskFailure::Failed("async".to_string())));
  }

  #[tokio::test]
  async fn test_panics_are_contained() {
    let panics_on_call = Op::new(|_| panic!("invoke boom"));
    let panics_in_future = Op::from_async(|x| async move {
      if x == 0 {
        panic!("poll boom");
      }
      Ok(x)
    });

    let (_, s1) = TaskExecution::new(0, panics_on_call).start(0, "test");
    let (_, s2) = TaskExecution::new(1, panics_in_future).start(0, "test");
    assert_eq!(s1.await.outcome, Err(TaskFailure::Panicked("invoke boom".to_string())));
    assert_eq!(s2.await.outcome, Err(TaskFailure::Panicked("poll boom".to_string())));
  }

  #[tokio::test]
  async fn test_operation_invoked_exactly_once_at_start() {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let op = Op::from_async(move |x| {
      calls_clone.fetch_add(1, AtomicOrdering::SeqCst);
      async move { Ok(x) }
    });

    let (pending, settlement) = TaskExecution::new(0, op).start(9, "test");
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1, "invocation happens before the first poll");
    assert_eq!(settlement.await.outcome, Ok(9));
    assert_eq!(pending.wait().await, Ok(9));
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
  }

  #[test]
  fn test_execution_ids_are_unique() {
    let op = Op::from_fn(Ok);
    let a = TaskExecution::new(0, op.clone());
    let b = TaskExecution::new(0, op);
    assert_ne!(a.execution_id, b.execution_id);
  }
}
