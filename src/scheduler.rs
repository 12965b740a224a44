use crate::error::SchedulerError;
use crate::execution::{Settlement, TaskExecution};
use crate::notifier::{EventKind, EventNotifier, SchedulerEvent};
use crate::result_set::ResultSet;
use crate::state::RunState;
use crate::task::{Operation, TaskBatch, PlannedTask, TaskValue};

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

type Window<A, T, E> = FuturesUnordered<BoxFuture<'static, Settlement<A, T, E>>>;

/// What happens to executions still in flight when a stop ends the run.
///
/// Their outcomes are never recorded in the `ResultSet` either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
  /// Moves them onto the runtime so they run to completion; outcomes are discarded.
  #[default]
  Detach,
  /// Drops them immediately, cancelling the underlying futures.
  Cancel,
}

struct Control<T, E> {
  state: RunState,
  concurrency_limit: usize,
  stop_mode: StopMode,
  stop_waiter: Option<oneshot::Sender<Arc<ResultSet<T, E>>>>,
}

/// Runs a batch of operations with a bounded number of outstanding executions
/// and collects their outcomes by task index.
///
/// A scheduler performs a single run. `stop` may be called from another task
/// while `run` is in progress, which is why `new` hands out an `Arc`.
pub struct Scheduler<A: TaskValue, T: TaskValue, E: TaskValue> {
  name: Arc<String>,
  control: Mutex<Control<T, E>>,
  stop_token: CancellationToken,
  outstanding: DashMap<u64, usize>,
  notifier: EventNotifier<A, T, E>,
  tokio_handle: TokioHandle,
}

impl<A: TaskValue, T: TaskValue, E: TaskValue> std::fmt::Debug for Scheduler<A, T, E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Scheduler")
      .field("name", &self.name)
      .field("state", &self.status())
      .field("concurrency_limit", &self.concurrency_limit())
      .field("outstanding", &self.outstanding.len())
      .field("notifier", &self.notifier)
      .finish()
  }
}

impl<A: TaskValue, T: TaskValue, E: TaskValue> Scheduler<A, T, E> {
  /// Creates a scheduler. A `concurrency_limit` of `0` means unlimited.
  ///
  /// `tokio_handle` hosts the notification worker and executions detached by a stop.
  pub fn new(concurrency_limit: usize, tokio_handle: TokioHandle, name: &str) -> Arc<Self> {
    let name = Arc::new(name.to_string());
    debug!(scheduler = %name, concurrency_limit, "Creating scheduler.");
    Arc::new(Self {
      name: name.clone(),
      control: Mutex::new(Control {
        state: RunState::Created,
        concurrency_limit,
        stop_mode: StopMode::default(),
        stop_waiter: None,
      }),
      stop_token: CancellationToken::new(),
      outstanding: DashMap::new(),
      notifier: EventNotifier::new(tokio_handle.clone(), name),
      tokio_handle,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn status(&self) -> RunState {
    self.control.lock().state
  }

  pub fn status_code(&self) -> u8 {
    self.status().code()
  }

  pub fn concurrency_limit(&self) -> usize {
    self.control.lock().concurrency_limit
  }

  pub fn stop_mode(&self) -> StopMode {
    self.control.lock().stop_mode
  }

  /// Number of executions currently in the admission window.
  pub fn outstanding_count(&self) -> usize {
    self.outstanding.len()
  }

  /// Task indices of the executions currently in the admission window, ascending.
  pub fn outstanding_indices(&self) -> Vec<usize> {
    let mut indices: Vec<usize> = self.outstanding.iter().map(|entry| *entry.value()).collect();
    indices.sort_unstable();
    indices
  }

  pub fn is_stop_requested(&self) -> bool {
    self.stop_token.is_cancelled()
  }

  /// Changes the concurrency limit (`0` = unlimited). Only allowed before the run starts.
  pub fn set_concurrency_limit(&self, concurrency_limit: usize) -> Result<(), SchedulerError> {
    let mut control = self.control.lock();
    if control.state != RunState::Created {
      return Err(SchedulerError::InvalidState(control.state));
    }
    control.concurrency_limit = concurrency_limit;
    Ok(())
  }

  /// Chooses how a stop treats in-flight executions. Only allowed before the run starts.
  pub fn set_stop_mode(&self, stop_mode: StopMode) -> Result<(), SchedulerError> {
    let mut control = self.control.lock();
    if control.state != RunState::Created {
      return Err(SchedulerError::InvalidState(control.state));
    }
    control.stop_mode = stop_mode;
    Ok(())
  }

  /// Registers a subscriber for every notification.
  pub fn subscribe(&self, handler: impl Fn(&SchedulerEvent<A, T, E>) + Send + Sync + 'static) {
    self.notifier.add_handler(None, handler);
  }

  /// Registers a subscriber for one kind of notification.
  pub fn subscribe_to(&self, kind: EventKind, handler: impl Fn(&SchedulerEvent<A, T, E>) + Send + Sync + 'static) {
    self.notifier.add_handler(Some(kind), handler);
  }

  /// Runs `operation` once per argument set.
  pub async fn run_map(
    &self,
    operation: Operation<A, T, E>,
    arguments: impl IntoIterator<Item = A>,
  ) -> Result<Arc<ResultSet<T, E>>, SchedulerError> {
    self.run(TaskBatch::map(operation, arguments)).await
  }

  /// Runs each operation with its own argument set.
  ///
  /// # Errors
  /// `SchedulerError::MismatchedBatch` if the lengths differ; nothing is dispatched
  /// and the scheduler stays in `created`.
  pub async fn run_zip(
    &self,
    operations: Vec<Operation<A, T, E>>,
    arguments: Vec<A>,
  ) -> Result<Arc<ResultSet<T, E>>, SchedulerError> {
    let batch = TaskBatch::zip(operations, arguments)?;
    self.run(batch).await
  }

  /// Runs each operation with a clone of the same argument set.
  pub async fn run_broadcast(
    &self,
    operations: Vec<Operation<A, T, E>>,
    arguments: A,
  ) -> Result<Arc<ResultSet<T, E>>, SchedulerError> {
    self.run(TaskBatch::broadcast(operations, arguments)).await
  }

  /// Runs the batch until every task settled or a stop was honored.
  ///
  /// Task failures are recorded in the returned `ResultSet`, never returned as errors.
  ///
  /// # Errors
  /// `SchedulerError::InvalidState` if this scheduler already ran or is running.
  pub async fn run(&self, batch: TaskBatch<A, T, E>) -> Result<Arc<ResultSet<T, E>>, SchedulerError> {
    let (concurrency_limit, stop_mode) = {
      let mut control = self.control.lock();
      if control.state != RunState::Created {
        warn!(scheduler = %self.name, state = %control.state, "Run: rejected, scheduler is not in created state.");
        return Err(SchedulerError::InvalidState(control.state));
      }
      control.state = RunState::Running;
      (control.concurrency_limit, control.stop_mode)
    };

    let mut guard = RunGuard {
      scheduler: self,
      armed: true,
    };

    let results = self
      .run_loop(batch, concurrency_limit, stop_mode)
      .instrument(info_span!("scheduler_run", scheduler = %self.name))
      .await;

    let results = Arc::new(results);
    let (final_state, stop_waiter) = {
      let mut control = self.control.lock();
      control.state = if control.state == RunState::Stopping {
        RunState::Stopped
      } else {
        RunState::Done
      };
      (control.state, control.stop_waiter.take())
    };
    guard.armed = false;
    self.outstanding.clear();

    info!(
      scheduler = %self.name,
      state = %final_state,
      succeeded = results.success_count(),
      failed = results.error_count(),
      unsettled = results.stop_count(),
      "Run finished."
    );

    let event_results = results.clone();
    self
      .notifier
      .emit_with(move || match final_state {
        RunState::Stopped => SchedulerEvent::Stop { results: event_results },
        _ => SchedulerEvent::Done { results: event_results },
      })
      .await;

    if let Some(waiter) = stop_waiter {
      if waiter.send(results.clone()).is_err() {
        debug!(scheduler = %self.name, "Stop caller went away before the run finished.");
      }
    }

    Ok(results)
  }

  /// Requests the active run to stop admitting tasks and waits for its loop to exit.
  ///
  /// Executions already outstanding are not cancelled; the run records the next
  /// settlement and then ends. See `StopMode` for what happens to the rest.
  ///
  /// # Errors
  /// `SchedulerError::InvalidState` unless the scheduler is `running`.
  /// `SchedulerError::RunAborted` if the run future was dropped before finishing.
  pub async fn stop(&self) -> Result<Arc<ResultSet<T, E>>, SchedulerError> {
    let waiter = {
      let mut control = self.control.lock();
      if control.state != RunState::Running {
        warn!(scheduler = %self.name, state = %control.state, "Stop: rejected, no active run.");
        return Err(SchedulerError::InvalidState(control.state));
      }
      control.state = RunState::Stopping;
      let (tx, rx) = oneshot::channel();
      control.stop_waiter = Some(tx);
      self.stop_token.cancel();
      rx
    };

    info!(scheduler = %self.name, outstanding = self.outstanding.len(), "Stop requested. Waiting for the run loop to exit.");
    waiter.await.map_err(|_| SchedulerError::RunAborted)
  }

  /// Closes the notification feed and waits until every queued event reached
  /// its subscribers. Events emitted afterwards are dropped.
  pub async fn shutdown(&self) {
    info!(scheduler = %self.name, "Shutting down notification feed.");
    self.notifier.close();
    self.notifier.await_shutdown().await;
  }

  async fn run_loop(&self, batch: TaskBatch<A, T, E>, concurrency_limit: usize, stop_mode: StopMode) -> ResultSet<T, E> {
    let tasks = batch.into_tasks();
    let total = tasks.len();
    let mut results = ResultSet::new(total);
    let mut pending = tasks.into_iter().enumerate();
    let mut window: Window<A, T, E> = FuturesUnordered::new();

    info!(scheduler = %self.name, total, concurrency_limit, "Run started.");
    self.notifier.emit_with(|| SchedulerEvent::Start { length: total }).await;

    for _ in 0..total {
      // A stop may land from another thread between two admissions.
      while !self.stop_token.is_cancelled() && (concurrency_limit == 0 || window.len() < concurrency_limit) {
        let Some((index, planned)) = pending.next() else {
          break;
        };
        self.admit(index, planned, &mut window).await;
      }

      let Some(settlement) = window.next().await else {
        if self.stop_token.is_cancelled() {
          info!(scheduler = %self.name, "Stop observed before any execution was outstanding.");
        } else {
          error!(scheduler = %self.name, "Admission window drained with tasks still unsettled.");
        }
        break;
      };
      self.absorb(settlement, &mut results).await;

      if self.stop_token.is_cancelled() {
        info!(scheduler = %self.name, "Stop observed. No further tasks will be admitted.");
        break;
      }
    }

    if !window.is_empty() {
      self.abandon(window, stop_mode);
    }
    results
  }

  async fn admit(&self, index: usize, planned: PlannedTask<A, T, E>, window: &mut Window<A, T, E>) {
    let PlannedTask { operation, arguments } = planned;

    self
      .notifier
      .emit_with(|| SchedulerEvent::Run {
        index,
        operation: operation.clone(),
        arguments: arguments.clone(),
      })
      .await;

    let execution = TaskExecution::new(index, operation.clone());
    let execution_id = execution.execution_id;
    debug!(scheduler = %self.name, index, execution_id, "Dispatching task.");

    let (pending, settlement) = execution.start(arguments.clone(), &self.name);
    self.outstanding.insert(execution_id, index);
    window.push(settlement);
    trace!(scheduler = %self.name, index, execution_id, outstanding = window.len(), "Task outstanding.");

    self
      .notifier
      .emit_with(|| SchedulerEvent::Running {
        index,
        operation,
        arguments,
        pending,
      })
      .await;
  }

  async fn absorb(&self, settlement: Settlement<A, T, E>, results: &mut ResultSet<T, E>) {
    let Settlement {
      execution_id,
      index,
      operation,
      arguments,
      outcome,
    } = settlement;
    self.outstanding.remove(&execution_id);

    let event = match &outcome {
      Ok(value) => {
        debug!(scheduler = %self.name, index, execution_id, "Task settled successfully.");
        self.notifier.is_listening().then(|| SchedulerEvent::Result {
          index,
          operation,
          arguments,
          value: value.clone(),
        })
      }
      Err(failure) => {
        debug!(scheduler = %self.name, index, execution_id, panicked = failure.is_panic(), "Task settled with a failure.");
        self.notifier.is_listening().then(|| SchedulerEvent::Error {
          index,
          operation,
          arguments,
          failure: failure.clone(),
        })
      }
    };

    if !results.record(index, outcome) {
      error!(scheduler = %self.name, index, execution_id, "Result slot was already settled; outcome ignored.");
    }
    if let Some(event) = event {
      self.notifier.emit(event).await;
    }
  }

  fn abandon(&self, window: Window<A, T, E>, stop_mode: StopMode) {
    let abandoned = window.len();
    match stop_mode {
      StopMode::Detach => {
        info!(scheduler = %self.name, abandoned, "Detaching in-flight executions; their outcomes will not be recorded.");
        for settlement in window {
          let name = self.name.clone();
          self.tokio_handle.spawn(async move {
            let settled = settlement.await;
            debug!(
              scheduler = %name,
              index = settled.index,
              execution_id = settled.execution_id,
              succeeded = settled.outcome.is_ok(),
              "Detached execution settled after stop; outcome discarded."
            );
          });
        }
      }
      StopMode::Cancel => {
        info!(scheduler = %self.name, abandoned, "Dropping in-flight executions.");
        drop(window);
      }
    }
  }
}

/// Leaves the scheduler in `stopped` if the run future is dropped mid-run.
struct RunGuard<'a, A: TaskValue, T: TaskValue, E: TaskValue> {
  scheduler: &'a Scheduler<A, T, E>,
  armed: bool,
}

impl<A: TaskValue, T: TaskValue, E: TaskValue> Drop for RunGuard<'_, A, T, E> {
  fn drop(&mut self) {
    if !self.armed {
      return;
    }
    let mut control = self.scheduler.control.lock();
    warn!(
      scheduler = %self.scheduler.name,
      state = %control.state,
      "Run future dropped before completion. Marking scheduler stopped."
    );
    control.state = RunState::Stopped;
    // Dropping the waiter makes a pending `stop` return `RunAborted`.
    control.stop_waiter = None;
    drop(control);
    self.scheduler.stop_token.cancel();
    self.scheduler.outstanding.clear();
  }
}

