use crate::error::EnsembleError;

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace_span, Instrument};

/// Simulated cost of processing one item in [`process_with_timeout`].
pub const ITEM_PROCESSING_COST: Duration = Duration::from_millis(1);

/// Processes (counts) every item in `data`, racing `timeout`.
///
/// Returns the count if processing finishes first, and
/// [`EnsembleError::TimeoutExceeded`] otherwise. Empty input succeeds with 0
/// immediately.
pub async fn process_with_timeout(data: &[i64], timeout: Duration) -> Result<usize, EnsembleError> {
  count_within_deadline(data.to_vec(), timeout, |_item| tokio::time::sleep(ITEM_PROCESSING_COST)).await
}

/// Runs `process` over each item in order on a background task and returns how
/// many items it handled, unless `timeout` elapses first.
///
/// On timeout the background task is not aborted. It is told to stop at its next
/// item boundary and whatever it would have produced is discarded.
pub async fn count_within_deadline<T, F, Fut>(items: Vec<T>, timeout: Duration, process: F) -> Result<usize, EnsembleError>
where
  T: Send + 'static,
  F: Fn(T) -> Fut + Send + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  if items.is_empty() {
    return Ok(0);
  }
  let total = items.len();

  let stop = CancellationToken::new();
  // Trips the stop token on every exit path of this call.
  let _stop_on_return = stop.clone().drop_guard();
  let (done_tx, done_rx) = oneshot::channel();

  tokio::spawn(
    async move {
      let mut processed = 0usize;
      for item in items {
        tokio::select! {
          biased;
          _ = stop.cancelled() => {
            debug!(processed, "Deadline passed; abandoning remaining items.");
            return;
          }
          _ = process(item) => {}
        }
        processed += 1;
      }
      // The caller may already have given up; the count is then simply discarded.
      let _ = done_tx.send(processed);
    }
    .instrument(trace_span!("deadline_worker", total)),
  );

  tokio::select! {
    biased;
    done = done_rx => done.map_err(|_| EnsembleError::TaskPanicked),
    _ = tokio::time::sleep(timeout) => {
      info!(?timeout, total, "Processing did not finish before the deadline.");
      Err(EnsembleError::TimeoutExceeded(timeout))
    }
  }
}
