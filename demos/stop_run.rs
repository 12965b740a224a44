use futures_concurrent::{Operation, Scheduler, StopMode};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn work_task_fn(id: usize, duration_ms: u64) -> Result<usize, String> {
  info!("Task {} starting (will run for {}ms)", id, duration_ms);
  tokio::time::sleep(Duration::from_millis(duration_ms)).await;
  info!("Task {} finished after {}ms", id, duration_ms);
  Ok(id)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Stop Example ---");

  let scheduler = Scheduler::new(2, Handle::current(), "stop_scheduler");
  scheduler
    .set_stop_mode(StopMode::Detach)
    .expect("Stop mode can be changed before the run starts");

  // Tasks 0 and 1 start immediately; the rest wait for a free slot.
  let run_handle = tokio::spawn({
    let scheduler = scheduler.clone();
    async move {
      let operation = Operation::from_async(|id: usize| work_task_fn(id, 300 + id as u64 * 200));
      scheduler.run_map(operation, 0..6).await
    }
  });

  tokio::time::sleep(Duration::from_millis(100)).await;
  info!(
    "Requesting stop. Status: {}, outstanding: {}",
    scheduler.status(),
    scheduler.outstanding_count()
  );

  let results = scheduler.stop().await.expect("A run is active");
  info!(
    "Stopped. Status: {}, succeeded: {:?}, never settled: {:?}",
    scheduler.status(),
    results.success_indices(),
    results.unset_indices()
  );

  let _ = run_handle.await;
  // Task 1 was detached by the stop and still finishes in the background.
  tokio::time::sleep(Duration::from_millis(600)).await;
  info!("--- Stop Example End ---");
}
