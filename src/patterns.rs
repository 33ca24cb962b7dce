//! Corrected forms of classic concurrency mistakes, each as a small standalone call:
//! forgotten completion waits, loop-variable capture, unclosed channels, racy
//! counters, leaked producers, unbounded selects and circular waits.

use crate::barrier::CompletionBarrier;
use crate::error::EnsembleError;
use crate::job::{reassemble, PartialResult};
use crate::queue::result_queue;
use crate::stream::handoff;

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinError;
use tracing::{debug, trace, trace_span, warn, Instrument};

/// Squares every number in its own task and returns the squares in input order.
///
/// Each task receives its own copy of the value and index when it is spawned,
/// and the call waits for every task before assembling the output.
pub async fn squares_of(numbers: &[i64]) -> Vec<i64> {
  let (tx, rx) = result_queue::<PartialResult<i64>>();
  let barrier = CompletionBarrier::new();

  for (index, &value) in numbers.iter().enumerate() {
    let guard = barrier.enter();
    let results = tx.clone();
    tokio::spawn(async move {
      let _guard = guard;
      if results.deliver(PartialResult::ok(index, value.wrapping_mul(value))).await.is_err() {
        debug!(index, "Square dropped; collector is gone.");
      }
    });
  }

  barrier.wait().await;
  drop(tx);
  reassemble(rx.collect().await)
    .into_iter()
    .filter_map(PartialResult::value)
    .collect()
}

/// Sums `numbers` streamed through a channel by a producer task.
///
/// The producer owns the only sender and drops it when done, which is what ends
/// the consumer's loop.
pub async fn sum_channel(numbers: &[i64]) -> i64 {
  let (tx, mut stream) = handoff();
  let values = numbers.to_vec();
  tokio::spawn(
    async move {
      for value in values {
        if tx.send(value).await.is_err() {
          return;
        }
      }
    }
    .instrument(trace_span!("sum_channel_producer")),
  );

  let mut sum = 0i64;
  while let Some(value) = stream.recv().await {
    sum = sum.wrapping_add(value);
  }
  sum
}

/// Increments one counter from `n` tasks. Always returns exactly `n`.
pub async fn concurrent_counter(n: usize) -> usize {
  let counter = Arc::new(Mutex::new(0usize));
  let barrier = CompletionBarrier::new();

  for _ in 0..n {
    let guard = barrier.enter();
    let counter = counter.clone();
    tokio::spawn(async move {
      let _guard = guard;
      *counter.lock() += 1;
    });
  }

  barrier.wait().await;
  let total = *counter.lock();
  total
}

/// Takes only the first doubled value of `data` and walks away from the rest.
///
/// The producer notices the closed channel on its next send and exits; this
/// call waits for it to do so, so no task outlives it.
pub async fn first_doubled(data: &[i64]) -> Option<i64> {
  let (tx, mut stream) = handoff();
  let values = data.to_vec();
  let producer = tokio::spawn(
    async move {
      let mut sent = 0usize;
      for value in values {
        if tx.send(value.wrapping_mul(2)).await.is_err() {
          debug!(sent, "Consumer left early; producer exiting.");
          break;
        }
        sent += 1;
      }
      sent
    }
    .instrument(trace_span!("first_doubled_producer")),
  );

  let first = stream.recv().await;
  drop(stream);

  match producer.await {
    Ok(sent) => trace!(sent, "Producer finished."),
    Err(err) => warn!("Producer task failed: {}", err),
  }
  first
}

/// Collects values from `input` until it ends or `duration` elapses, whichever is first.
pub async fn monitor_channel<S>(mut input: S, duration: Duration) -> Vec<S::Item>
where
  S: Stream + Unpin,
{
  let deadline = tokio::time::sleep(duration);
  tokio::pin!(deadline);
  let mut collected = Vec::new();

  loop {
    tokio::select! {
      biased;
      next = input.next() => match next {
        Some(value) => collected.push(value),
        None => break,
      },
      _ = &mut deadline => {
        trace!(collected = collected.len(), "Monitoring window elapsed.");
        break;
      }
    }
  }
  collected
}

/// Swaps two values between two tasks over two channels.
///
/// The tasks order their operations asymmetrically (the first sends then
/// receives, the second receives then sends), so neither can wait on the
/// other in a cycle. Returns `(value seen by the first task, value seen by the second)`.
pub async fn exchange(a: i64, b: i64) -> Result<(i64, i64), EnsembleError> {
  let (to_second, mut second_inbox) = handoff();
  let (to_first, mut first_inbox) = handoff();

  let first = tokio::spawn(
    async move {
      if to_second.send(a).await.is_err() {
        debug!("Second party is gone before receiving.");
      }
      first_inbox.recv().await
    }
    .instrument(trace_span!("exchange_party", party = "first")),
  );
  let second = tokio::spawn(
    async move {
      let received = second_inbox.recv().await;
      if to_first.send(b).await.is_err() {
        debug!("First party is gone before receiving.");
      }
      received
    }
    .instrument(trace_span!("exchange_party", party = "second")),
  );

  let seen_by_first = received_by(first.await)?;
  let seen_by_second = received_by(second.await)?;
  Ok((seen_by_first, seen_by_second))
}

fn received_by(joined: Result<Option<i64>, JoinError>) -> Result<i64, EnsembleError> {
  match joined {
    Ok(Some(value)) => Ok(value),
    Ok(None) => Err(EnsembleError::QueueClosed),
    Err(err) => {
      warn!("Exchange party failed: {}", err);
      Err(EnsembleError::TaskPanicked)
    }
  }
}
