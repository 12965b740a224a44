use crate::error::TaskFailure;
use crate::handle::PendingOutcome;
use crate::result_set::ResultSet;
use crate::task::{Operation, TaskValue};

use fibre::mpsc::{self, AsyncReceiver, AsyncSender};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use tokio::runtime::Handle as TokioHandle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

// --- Public Event Types for Subscribers ---

/// Names of the notifications a scheduler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Start,
  Run,
  Running,
  Result,
  Error,
  Stop,
  Done,
}

impl EventKind {
  pub fn name(self) -> &'static str {
    match self {
      EventKind::Start => "start",
      EventKind::Run => "run",
      EventKind::Running => "running",
      EventKind::Result => "result",
      EventKind::Error => "error",
      EventKind::Stop => "stop",
      EventKind::Done => "done",
    }
  }
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// A lifecycle or per-task notification.
///
/// Events are advisory: they are delivered asynchronously on a worker task and
/// may reach subscribers after `run` has already returned.
#[derive(Debug, Clone)]
pub enum SchedulerEvent<A, T, E> {
  /// A run began with `length` tasks.
  Start { length: usize },
  /// Task `index` is about to be dispatched.
  Run {
    index: usize,
    operation: Operation<A, T, E>,
    arguments: A,
  },
  /// Task `index` is now outstanding.
  Running {
    index: usize,
    operation: Operation<A, T, E>,
    arguments: A,
    pending: PendingOutcome<T, E>,
  },
  /// Task `index` settled successfully.
  Result {
    index: usize,
    operation: Operation<A, T, E>,
    arguments: A,
    value: T,
  },
  /// Task `index` settled with a failure.
  Error {
    index: usize,
    operation: Operation<A, T, E>,
    arguments: A,
    failure: TaskFailure<E>,
  },
  /// The run ended because of a stop request.
  Stop { results: Arc<ResultSet<T, E>> },
  /// The run ended after every task settled.
  Done { results: Arc<ResultSet<T, E>> },
}

impl<A, T, E> SchedulerEvent<A, T, E> {
  pub fn kind(&self) -> EventKind {
    match self {
      SchedulerEvent::Start { .. } => EventKind::Start,
      SchedulerEvent::Run { .. } => EventKind::Run,
      SchedulerEvent::Running { .. } => EventKind::Running,
      SchedulerEvent::Result { .. } => EventKind::Result,
      SchedulerEvent::Error { .. } => EventKind::Error,
      SchedulerEvent::Stop { .. } => EventKind::Stop,
      SchedulerEvent::Done { .. } => EventKind::Done,
    }
  }

  /// Task index for per-task events.
  pub fn index(&self) -> Option<usize> {
    match self {
      SchedulerEvent::Run { index, .. }
      | SchedulerEvent::Running { index, .. }
      | SchedulerEvent::Result { index, .. }
      | SchedulerEvent::Error { index, .. } => Some(*index),
      _ => None,
    }
  }
}

// --- EventNotifier Struct ---

type EventHandler<A, T, E> = Arc<dyn Fn(&SchedulerEvent<A, T, E>) + Send + Sync + 'static>;

struct Subscription<A, T, E> {
  filter: Option<EventKind>,
  handler: EventHandler<A, T, E>,
}

impl<A, T, E> Clone for Subscription<A, T, E> {
  fn clone(&self) -> Self {
    Self {
      filter: self.filter,
      handler: self.handler.clone(),
    }
  }
}

struct NotifierInternalState<A: TaskValue, T: TaskValue, E: TaskValue> {
  internal_rx_for_init: Option<AsyncReceiver<SchedulerEvent<A, T, E>>>,
  tokio_handle: TokioHandle,
  scheduler_name: Arc<String>,
  worker_join_handle: Option<JoinHandle<()>>,
}

/// One-to-many feed of `SchedulerEvent`s.
///
/// The delivery worker is spawned with the first subscription. Until then no
/// event is built or queued.
pub(crate) struct EventNotifier<A: TaskValue, T: TaskValue, E: TaskValue> {
  handlers: Arc<RwLock<Vec<Subscription<A, T, E>>>>,
  listening: AtomicBool,
  tx: AsyncSender<SchedulerEvent<A, T, E>>,
  init_once: Once,
  internal_state_for_init: Mutex<NotifierInternalState<A, T, E>>,
}

impl<A: TaskValue, T: TaskValue, E: TaskValue> fmt::Debug for EventNotifier<A, T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EventNotifier")
      .field("handler_count", &self.handlers.read().len())
      .field("initialized", &self.init_once.is_completed())
      .finish_non_exhaustive()
  }
}

impl<A: TaskValue, T: TaskValue, E: TaskValue> EventNotifier<A, T, E> {
  pub(crate) fn new(tokio_handle: TokioHandle, scheduler_name: Arc<String>) -> Self {
    let (tx, rx) = mpsc::unbounded_async();
    Self {
      handlers: Arc::new(RwLock::new(Vec::new())),
      listening: AtomicBool::new(false),
      tx,
      init_once: Once::new(),
      internal_state_for_init: Mutex::new(NotifierInternalState {
        internal_rx_for_init: Some(rx),
        tokio_handle,
        scheduler_name,
        worker_join_handle: None,
      }),
    }
  }

  fn ensure_worker_initialized(&self) {
    self.init_once.call_once(|| {
      let mut state_guard = self.internal_state_for_init.lock();
      if let Some(rx_to_use) = state_guard.internal_rx_for_init.take() {
        info!(scheduler = %*state_guard.scheduler_name, "First subscriber added. Initializing notification worker.");

        let worker_handlers = self.handlers.clone();
        let worker_name = state_guard.scheduler_name.clone();
        let worker_jh = state_guard.tokio_handle.spawn(
          Self::run_notification_worker_loop(rx_to_use, worker_handlers)
            .instrument(info_span!("notification_worker_loop", scheduler = %*worker_name)),
        );
        state_guard.worker_join_handle = Some(worker_jh);
      } else {
        warn!(scheduler = %*state_guard.scheduler_name, "Notifier initialization: receiver already taken.");
      }
    });
  }

  pub(crate) fn add_handler(
    &self,
    filter: Option<EventKind>,
    handler: impl Fn(&SchedulerEvent<A, T, E>) + Send + Sync + 'static,
  ) {
    self.ensure_worker_initialized();

    let mut handlers_guard = self.handlers.write();
    handlers_guard.push(Subscription {
      filter,
      handler: Arc::new(handler),
    });
    self.listening.store(true, Ordering::Release);
    debug!(
      filter = ?filter.map(EventKind::name),
      "Notifier: Added new subscriber. Total subscribers: {}",
      handlers_guard.len()
    );
  }

  /// `true` once somebody subscribed. Callers use it to skip building events.
  pub(crate) fn is_listening(&self) -> bool {
    self.listening.load(Ordering::Acquire)
  }

  pub(crate) async fn emit(&self, event: SchedulerEvent<A, T, E>) {
    let kind = event.kind();
    if self.tx.send(event).await.is_err() {
      trace!(event = %kind, "Notification feed closed, dropping event.");
    }
  }

  /// Builds and queues an event only if there is a subscriber.
  pub(crate) async fn emit_with(&self, build: impl FnOnce() -> SchedulerEvent<A, T, E>) {
    if self.is_listening() {
      self.emit(build()).await;
    }
  }

  fn dispatch(handlers_list: &RwLock<Vec<Subscription<A, T, E>>>, event: &SchedulerEvent<A, T, E>) {
    // Snapshot so a handler may subscribe without deadlocking on the lock.
    let subscriptions: Vec<Subscription<A, T, E>> = handlers_list.read().clone();
    let kind = event.kind();
    trace!(event = %kind, index = ?event.index(), "Dispatching notification to {} subscribers.", subscriptions.len());

    for subscription in subscriptions.iter().filter(|s| s.filter.map_or(true, |k| k == kind)) {
      let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        (subscription.handler)(event);
      }));
      if result.is_err() {
        error!(event = %kind, index = ?event.index(), "A subscriber panicked while handling a notification.");
      }
    }
  }

  async fn run_notification_worker_loop(
    mut queue_rx: AsyncReceiver<SchedulerEvent<A, T, E>>,
    handlers_list_arc: Arc<RwLock<Vec<Subscription<A, T, E>>>>,
  ) {
    info!("Notification worker started. Will process events until its input queue is closed.");

    loop {
      match queue_rx.recv().await {
        Ok(event) => Self::dispatch(&handlers_list_arc, &event),
        Err(_) => {
          // Only returned once the queue is closed and drained.
          info!("Notification worker: event queue closed. Terminating.");
          break;
        }
      }
    }

    info!("Notification worker stopped (input queue fully closed and processed).");
  }

  /// Closes the feed. Events emitted afterwards are dropped.
  pub(crate) fn close(&self) {
    let _ = self.tx.close();
  }

  /// Waits for the worker to deliver everything queued before `close`.
  pub(crate) async fn await_shutdown(&self) {
    let (handle_option, scheduler_name) = {
      let mut guard = self.internal_state_for_init.lock();
      (guard.worker_join_handle.take(), guard.scheduler_name.clone())
    };

    if let Some(handle) = handle_option {
      info!(scheduler = %*scheduler_name, "Notifier: Waiting for notification worker loop to join.");
      if let Err(e) = handle.await {
        error!(scheduler = %*scheduler_name, "Notifier: Error joining notification worker: {:?}", e);
      } else {
        debug!(scheduler = %*scheduler_name, "Notifier: Notification worker loop successfully joined.");
      }
    } else {
      trace!(scheduler = %*scheduler_name, "Notifier: Worker was not initialized or already joined.");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  type Notifier = EventNotifier<u32, u32, String>;

  #[tokio::test]
  async fn test_events_not_built_without_subscribers() {
    let notifier = Notifier::new(TokioHandle::current(), Arc::new("quiet".to_string()));
    let built = AtomicUsize::new(0);
    notifier
      .emit_with(|| {
        built.fetch_add(1, Ordering::SeqCst);
        SchedulerEvent::Start { length: 1 }
      })
      .await;
    assert_eq!(built.load(Ordering::SeqCst), 0);
    assert!(!notifier.is_listening());
    notifier.close();
    notifier.await_shutdown().await;
  }

  #[tokio::test]
  async fn test_filtered_and_unfiltered_subscribers() {
    let notifier = Notifier::new(TokioHandle::current(), Arc::new("filters".to_string()));
    let all = Arc::new(Mutex::new(Vec::new()));
    let only_done = Arc::new(AtomicUsize::new(0));

    let all_clone = all.clone();
    notifier.add_handler(None, move |event| all_clone.lock().push(event.kind()));
    let done_clone = only_done.clone();
    notifier.add_handler(Some(EventKind::Done), move |_| {
      done_clone.fetch_add(1, Ordering::SeqCst);
    });

    notifier.emit(SchedulerEvent::Start { length: 0 }).await;
    notifier
      .emit(SchedulerEvent::Done {
        results: Arc::new(ResultSet::new(0)),
      })
      .await;
    notifier.close();
    notifier.await_shutdown().await;

    assert_eq!(*all.lock(), vec![EventKind::Start, EventKind::Done]);
    assert_eq!(only_done.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_panicking_subscriber_does_not_block_others() {
    let notifier = Notifier::new(TokioHandle::current(), Arc::new("panics".to_string()));
    let received = Arc::new(AtomicUsize::new(0));

    notifier.add_handler(None, |_| panic!("subscriber boom"));
    let received_clone = received.clone();
    notifier.add_handler(None, move |_| {
      received_clone.fetch_add(1, Ordering::SeqCst);
    });

    for length in 0..3 {
      notifier.emit(SchedulerEvent::Start { length }).await;
    }
    notifier.close();
    notifier.await_shutdown().await;

    assert_eq!(received.load(Ordering::SeqCst), 3);
  }
}
