use futures_concurrent::{Operation, Scheduler};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::info;

async fn long_task_fn(id: usize) -> Result<String, String> {
  info!("Task {} starting (concurrency test - should take 1s)", id);
  tokio::time::sleep(Duration::from_secs(1)).await;
  let result = format!("Task {} finished", id);
  info!("{}", result);
  Ok(result)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Concurrency Limit Example (Limit: 2) ---");

  let concurrency_limit = 2;
  let scheduler = Scheduler::new(concurrency_limit, Handle::current(), "concurrency_scheduler");

  let num_tasks = 5;
  info!(
    "Running {} tasks, each takes 1 sec. With concurrency {}, this should take ~{} secs.",
    num_tasks,
    concurrency_limit,
    (num_tasks as f32 / concurrency_limit as f32).ceil()
  );

  let started = Instant::now();
  let results = scheduler
    .run_map(Operation::from_async(long_task_fn), 0..num_tasks)
    .await
    .expect("Scheduler was freshly created");

  info!(
    "All {} tasks settled in {:.2?}. Results in submission order: {:?}",
    results.len(),
    started.elapsed(),
    results.successes()
  );
  info!("--- Concurrency Limit Example End ---");
}
