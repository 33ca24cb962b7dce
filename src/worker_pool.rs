//! Fixed-size worker pools over a known job list.

use crate::config::PoolConfig;
use crate::distributor::{PoolOutcome, WorkDistributor};
use crate::error::{EnsembleError, Interrupted};
use crate::job::PartialResult;
use crate::signal::CancelSignal;

use std::fmt;
use std::future::Future;

/// The transform every worker applies in [`worker_pool`].
pub fn double(value: i64) -> i64 {
  value.wrapping_mul(2)
}

/// Runs `work` over `jobs` with the pool described by `config`.
///
/// This is the engine behind [`worker_pool`] and [`worker_pool_with_cancel`],
/// exposed for callers with their own unit of work. Results carry their input
/// index; use [`reassemble`](crate::reassemble) to restore input order.
pub async fn run_pool<J, R, F, Fut>(jobs: Vec<J>, config: PoolConfig, signal: &CancelSignal, work: F) -> PoolOutcome<R>
where
  J: Send + 'static,
  R: Send + fmt::Debug + 'static,
  F: Fn(J) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<R, EnsembleError>> + Send + 'static,
{
  WorkDistributor::new(config).run(jobs, signal, work).await
}

/// Doubles every job on `num_workers` workers. Output order is unspecified.
///
/// `num_workers <= 0` yields an empty result without spawning anything.
pub async fn worker_pool(jobs: &[i64], num_workers: i32) -> Vec<i64> {
  let config = PoolConfig::new(num_workers).with_name("worker_pool");
  // This signal is never tripped, so the batch cannot be interrupted.
  let signal = CancelSignal::new();
  match run_pool(jobs.to_vec(), config, &signal, |value| async move { Ok::<_, EnsembleError>(double(value)) }).await {
    Ok(results) => successful_values(results),
    Err(interrupted) => successful_values(interrupted.partial),
  }
}

/// Like [`worker_pool`], but stops early when `signal` trips.
///
/// Workers check the signal before pulling and before processing each job. On
/// cancellation the unclaimed jobs are abandoned and the doubled values gathered
/// so far are returned inside [`Interrupted`]. A signal that has already tripped
/// on entry processes nothing.
pub async fn worker_pool_with_cancel(
  signal: &CancelSignal,
  jobs: &[i64],
  num_workers: i32,
) -> Result<Vec<i64>, Interrupted<i64>> {
  let config = PoolConfig::new(num_workers).with_name("worker_pool_with_cancel");
  match run_pool(jobs.to_vec(), config, signal, |value| async move { Ok::<_, EnsembleError>(double(value)) }).await {
    Ok(results) => Ok(successful_values(results)),
    Err(interrupted) => Err(Interrupted::new(successful_values(interrupted.partial), interrupted.error)),
  }
}

fn successful_values<R>(results: Vec<PartialResult<R>>) -> Vec<R> {
  results.into_iter().filter_map(PartialResult::value).collect()
}
