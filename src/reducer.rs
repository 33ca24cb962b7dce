//! Chunked parallel reductions over integer slices.

use crate::barrier::CompletionBarrier;
use crate::config::effective_workers;
use crate::queue::result_queue;

use tracing::{debug, trace, trace_span, Instrument};

/// Sum of `numbers`, computed in up to `workers` contiguous chunks.
///
/// Empty input or `workers <= 0` yields 0 without spawning anything. Arithmetic
/// wraps on overflow, so the call has no failure path.
pub async fn parallel_sum(numbers: &[i64], workers: i32) -> i64 {
  reduce_in_chunks(numbers, workers, "parallel_sum", |value| value).await
}

/// Sum of squares of `numbers`, computed like [`parallel_sum`].
pub async fn square_sum(numbers: &[i64], workers: i32) -> i64 {
  reduce_in_chunks(numbers, workers, "square_sum", |value| value.wrapping_mul(value)).await
}

/// Splits `numbers` into at most `workers` chunks of `ceil(len / workers)`
/// elements, reduces each chunk in its own task and sums the partials.
///
/// Partials travel through a channel and are summed here, after the barrier has
/// released, so no accumulator is ever shared between tasks.
async fn reduce_in_chunks(numbers: &[i64], workers: i32, reducer: &'static str, map: fn(i64) -> i64) -> i64 {
  let worker_count = effective_workers(workers, numbers.len());
  if worker_count == 0 {
    trace!(reducer, requested = workers, len = numbers.len(), "Nothing to reduce.");
    return 0;
  }
  let chunk_size = numbers.len().div_ceil(worker_count);

  let (partials_tx, partials_rx) = result_queue::<i64>();
  let barrier = CompletionBarrier::new();

  for (chunk_index, chunk) in numbers.chunks(chunk_size).enumerate() {
    let guard = barrier.enter();
    let owned_chunk = chunk.to_vec();
    let partials = partials_tx.clone();
    tokio::spawn(
      async move {
        let _guard = guard;
        let partial = owned_chunk
          .iter()
          .fold(0i64, |acc, &value| acc.wrapping_add(map(value)));
        if partials.deliver(partial).await.is_err() {
          debug!("Partial dropped; collector is gone.");
        }
      }
      .instrument(trace_span!("reduce_chunk", reducer, chunk_index)),
    );
  }

  barrier.wait().await;
  drop(partials_tx);

  let partials = partials_rx.collect().await;
  debug!(reducer, chunks = partials.len(), "Partials collected.");
  partials.into_iter().fold(0i64, i64::wrapping_add)
}
