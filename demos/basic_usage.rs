use futures_concurrent::{Operation, Scheduler, Slot};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn my_task_fn(id: usize, delay_ms: u64) -> Result<String, String> {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  if id == 3 {
    return Err(format!("Task {} gave up after {}ms", id, delay_ms));
  }
  let result = format!("Task {} finished successfully after {}ms", id, delay_ms);
  info!("{}", result);
  Ok(result)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let scheduler = Scheduler::new(
    2, // Concurrency limit
    Handle::current(),
    "basic_scheduler",
  );

  let operation = Operation::from_async(|(id, delay_ms): (usize, u64)| my_task_fn(id, delay_ms));
  // Alternate sleep times so completion order differs from submission order.
  let arguments: Vec<(usize, u64)> = (0..5).map(|i| (i, 500 + (i as u64 % 3 * 250))).collect();

  let results = scheduler
    .run_map(operation, arguments)
    .await
    .expect("Scheduler was freshly created");

  for (index, slot) in results.slots().iter().enumerate() {
    match slot {
      Slot::Success(value) => info!("Result for task {}: {}", index, value),
      Slot::Failure(failure) => info!("Error for task {}: {}", index, failure),
      Slot::Unset => info!("Task {} never settled", index),
    }
  }
  info!(
    "Succeeded: {}, failed: {}, all succeeded: {}",
    results.success_count(),
    results.error_count(),
    results.all_succeed()
  );
  info!("--- Basic Usage Example End ---");
}
