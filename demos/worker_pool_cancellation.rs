use futures_ensemble::{reassemble, run_pool, worker_pool_with_cancel, CancelSignal, EnsembleError, PoolConfig};
use std::time::Duration;
use tracing::info;

async fn slow_double(value: i64) -> Result<i64, EnsembleError> {
  info!("Job {} starting", value);
  tokio::time::sleep(Duration::from_millis(100 + (value as u64 % 3) * 50)).await;
  Ok(value * 2)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Worker Pool Cancellation Example ---");

  // A batch that runs to completion.
  let signal = CancelSignal::new();
  match worker_pool_with_cancel(&signal, &[1, 2, 3, 4, 5], 2).await {
    Ok(results) => info!("Completed batch: {:?}", results),
    Err(interrupted) => info!("Unexpected interruption: {}", interrupted),
  }

  // A longer batch, cancelled from another task part-way through.
  let signal = CancelSignal::new();
  let canceller = signal.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(250)).await;
    info!("Requesting cancellation.");
    canceller.cancel();
  });

  let jobs: Vec<i64> = (1..=20).collect();
  let config = PoolConfig::new(3).with_name("cancel_example");
  match run_pool(jobs, config, &signal, slow_double).await {
    Ok(results) => info!("Batch finished before cancellation: {} results", results.len()),
    Err(interrupted) => {
      info!("Batch interrupted: {}", interrupted);
      for result in reassemble(interrupted.partial) {
        info!("  job #{} -> {:?}", result.index, result.outcome);
      }
    }
  }

  // A batch bounded by a deadline instead of an explicit cancel.
  let signal = CancelSignal::with_timeout(Duration::from_millis(150));
  match run_pool((1..=10).collect(), PoolConfig::new(2), &signal, slow_double).await {
    Ok(results) => info!("Deadline batch finished: {} results", results.len()),
    Err(interrupted) => info!("Deadline batch stopped: {}", interrupted),
  }

  info!("--- Worker Pool Cancellation Example End ---");
}
