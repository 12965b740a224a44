use futures_concurrent::{EventKind, Operation, Scheduler, SchedulerEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn my_notified_task(id: usize, delay_ms: u64, should_fail: bool) -> Result<String, String> {
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  if should_fail {
    return Err(format!("NotifiedTask {} failed", id));
  }
  Ok(format!("NotifiedTask {} finished successfully after {}ms", id, delay_ms))
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Event Subscription Example ---");

  let scheduler = Scheduler::new(2, Handle::current(), "notifier_example_scheduler");

  // Handler 1: Simple logger for every event
  scheduler.subscribe(|event: &SchedulerEvent<(usize, u64, bool), String, String>| match event {
    SchedulerEvent::Start { length } => info!("[Logger] Run started with {} tasks", length),
    SchedulerEvent::Run { index, arguments, .. } => info!("[Logger] Dispatching task {} with {:?}", index, arguments),
    SchedulerEvent::Running { index, .. } => info!("[Logger] Task {} outstanding", index),
    SchedulerEvent::Result { index, value, .. } => info!("[Logger] Task {} -> {}", index, value),
    SchedulerEvent::Error { index, failure, .. } => info!("[Logger] Task {} failed: {}", index, failure),
    SchedulerEvent::Stop { results } => info!("[Logger] Run stopped, {} unsettled", results.stop_count()),
    SchedulerEvent::Done { results } => info!("[Logger] Run done, {} succeeded", results.success_count()),
  });

  // Handler 2: Counter for failures only
  let failed_tasks_count = Arc::new(AtomicUsize::new(0));
  let f_clone = failed_tasks_count.clone();
  scheduler.subscribe_to(EventKind::Error, move |_| {
    f_clone.fetch_add(1, Ordering::Relaxed);
  });

  let operation = Operation::from_async(|(id, delay_ms, should_fail): (usize, u64, bool)| {
    my_notified_task(id, delay_ms, should_fail)
  });
  let arguments = vec![(0, 300, false), (1, 100, true), (2, 200, false), (3, 50, true)];
  let results = scheduler
    .run_map(operation, arguments)
    .await
    .expect("Scheduler was freshly created");

  // Notifications are delivered asynchronously; drain them before reading the counter.
  scheduler.shutdown().await;
  info!(
    "Run returned {} errors, failure handler counted {}",
    results.error_count(),
    failed_tasks_count.load(Ordering::Relaxed)
  );
  info!("--- Event Subscription Example End ---");
}
