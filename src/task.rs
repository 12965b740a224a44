use crate::error::SchedulerError;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The type of future an operation may hand back for asynchronous work.
/// It must be `Send` and `'static`, and produce a result of type `R`.
pub type TaskToExecute<R> = Pin<Box<dyn Future<Output = R> + Send + 'static>>;

/// Bounds shared by task arguments, values and errors. They are cloned into
/// notifications and may cross to the notification worker.
pub trait TaskValue: Clone + Send + Sync + 'static {}

impl<X: Clone + Send + Sync + 'static> TaskValue for X {}

/// What an operation returns when invoked.
pub enum TaskOutput<T, E> {
  /// The outcome is already known (a plain value or a synchronous failure).
  Ready(Result<T, E>),
  /// The outcome is produced by an asynchronous computation.
  Deferred(TaskToExecute<Result<T, E>>),
}

impl<T, E> TaskOutput<T, E> {
  pub fn ok(value: T) -> Self {
    TaskOutput::Ready(Ok(value))
  }

  pub fn err(error: E) -> Self {
    TaskOutput::Ready(Err(error))
  }

  pub fn deferred<F>(future: F) -> Self
  where
    F: Future<Output = Result<T, E>> + Send + 'static,
  {
    TaskOutput::Deferred(Box::pin(future))
  }
}

impl<T, E> From<Result<T, E>> for TaskOutput<T, E> {
  fn from(result: Result<T, E>) -> Self {
    TaskOutput::Ready(result)
  }
}

impl<T, E> fmt::Debug for TaskOutput<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TaskOutput::Ready(r) => f.write_str(if r.is_ok() { "Ready(Ok(..))" } else { "Ready(Err(..))" }),
      TaskOutput::Deferred(_) => f.write_str("Deferred(..)"),
    }
  }
}

type OperationFn<A, T, E> = dyn Fn(A) -> TaskOutput<T, E> + Send + Sync + 'static;

/// A shareable reference to a callable unit of work.
///
/// Cloning is cheap; clones compare equal under [`Operation::ptr_eq`].
pub struct Operation<A, T, E> {
  inner: Arc<OperationFn<A, T, E>>,
}

impl<A, T, E> Clone for Operation<A, T, E> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<A, T, E> fmt::Debug for Operation<A, T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Operation")
      .field("ptr", &Arc::as_ptr(&self.inner).cast::<()>())
      .finish()
  }
}

impl<A, T, E> Operation<A, T, E>
where
  A: 'static,
  T: 'static,
  E: 'static,
{
  /// Wraps a callable that decides per invocation whether it completes
  /// immediately or defers to a future.
  pub fn new<F>(f: F) -> Self
  where
    F: Fn(A) -> TaskOutput<T, E> + Send + Sync + 'static,
  {
    Self { inner: Arc::new(f) }
  }

  /// Wraps a synchronous callable.
  pub fn from_fn<F>(f: F) -> Self
  where
    F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
  {
    Self::new(move |args| TaskOutput::Ready(f(args)))
  }

  /// Wraps a callable returning a future.
  pub fn from_async<F, Fut>(f: F) -> Self
  where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    Self::new(move |args| TaskOutput::Deferred(Box::pin(f(args))))
  }
}

impl<A, T, E> Operation<A, T, E> {
  pub(crate) fn invoke(&self, args: A) -> TaskOutput<T, E> {
    (self.inner)(args)
  }

  /// `true` if both references point at the same callable.
  pub fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

/// A single task of a batch: the operation and the argument bound to it.
pub(crate) struct PlannedTask<A, T, E> {
  pub(crate) operation: Operation<A, T, E>,
  pub(crate) arguments: A,
}

/// An ordered batch of tasks. The position of a task is its index in the
/// resulting `ResultSet`.
pub struct TaskBatch<A, T, E> {
  tasks: Vec<PlannedTask<A, T, E>>,
}

impl<A, T, E> fmt::Debug for TaskBatch<A, T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskBatch").field("len", &self.tasks.len()).finish()
  }
}

impl<A, T, E> TaskBatch<A, T, E> {
  /// One operation applied independently to each argument set.
  pub fn map(operation: Operation<A, T, E>, arguments: impl IntoIterator<Item = A>) -> Self {
    let tasks = arguments
      .into_iter()
      .map(|arguments| PlannedTask {
        operation: operation.clone(),
        arguments,
      })
      .collect();
    Self { tasks }
  }

  /// Each operation paired with its own argument set.
  ///
  /// # Errors
  /// Returns `SchedulerError::MismatchedBatch` if the two lists differ in length.
  pub fn zip(operations: Vec<Operation<A, T, E>>, arguments: Vec<A>) -> Result<Self, SchedulerError> {
    if operations.len() != arguments.len() {
      return Err(SchedulerError::MismatchedBatch {
        operations: operations.len(),
        arguments: arguments.len(),
      });
    }
    let tasks = operations
      .into_iter()
      .zip(arguments)
      .map(|(operation, arguments)| PlannedTask { operation, arguments })
      .collect();
    Ok(Self { tasks })
  }

  /// Every operation receives its own clone of the same argument set.
  pub fn broadcast(operations: Vec<Operation<A, T, E>>, arguments: A) -> Self
  where
    A: Clone,
  {
    let tasks = operations
      .into_iter()
      .map(|operation| PlannedTask {
        operation,
        arguments: arguments.clone(),
      })
      .collect();
    Self { tasks }
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  pub(crate) fn into_tasks(self) -> Vec<PlannedTask<A, T, E>> {
    self.tasks
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_zip_rejects_mismatched_lengths() {
    let op = Operation::<u32, u32, String>::from_fn(Ok);
    let result = TaskBatch::zip(vec![op.clone(), op], vec![1, 2, 3]);
    assert_eq!(
      result.unwrap_err(),
      SchedulerError::MismatchedBatch {
        operations: 2,
        arguments: 3
      }
    );
  }

  #[test]
  fn test_map_and_broadcast_bind_arguments_in_order() {
    let op = Operation::<u32, u32, String>::from_fn(|x| Ok(x * 2));
    let batch = TaskBatch::map(op.clone(), vec![1, 2, 3]);
    let args: Vec<u32> = batch.into_tasks().into_iter().map(|t| t.arguments).collect();
    assert_eq!(args, vec![1, 2, 3]);

    let other = Operation::<u32, u32, String>::from_fn(|x| Ok(x + 1));
    let batch = TaskBatch::broadcast(vec![op.clone(), other.clone()], 7);
    let tasks = batch.into_tasks();
    assert_eq!(tasks.len(), 2);
    assert!(tasks[0].operation.ptr_eq(&op));
    assert!(tasks[1].operation.ptr_eq(&other));
    assert!(tasks.iter().all(|t| t.arguments == 7));
  }

  #[test]
  fn test_operation_constructors_produce_expected_output_kind() {
    let sync_op = Operation::<(), u8, ()>::from_fn(|_| Ok(1));
    assert!(matches!(sync_op.invoke(()), TaskOutput::Ready(Ok(1))));

    let async_op = Operation::<(), u8, ()>::from_async(|_| async { Ok(1) });
    assert!(matches!(async_op.invoke(()), TaskOutput::Deferred(_)));
  }
}
