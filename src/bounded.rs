use crate::barrier::CompletionBarrier;
use crate::fetch::{is_success_status, Fetcher};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, error, trace_span, Instrument};

/// "Downloads" every URL with at most `max_concurrent` downloads in flight, and
/// returns how many succeeded (answered with a 2xx status).
///
/// A permit is acquired *before* each task is spawned and moves into the task,
/// so it is released on every exit path. `max_concurrent <= 0` attempts
/// nothing and returns 0.
pub async fn concurrent_downloader<F: Fetcher>(fetcher: Arc<F>, urls: &[String], max_concurrent: i32) -> usize {
  if max_concurrent <= 0 || urls.is_empty() {
    return 0;
  }
  let permits = (max_concurrent as usize).min(urls.len()).min(Semaphore::MAX_PERMITS);
  let semaphore = Arc::new(Semaphore::new(permits));
  let successes = Arc::new(Mutex::new(0usize));
  let barrier = CompletionBarrier::new();

  for (index, url) in urls.iter().enumerate() {
    let permit = match semaphore.clone().acquire_owned().await {
      Ok(permit) => permit,
      Err(_) => {
        error!("Download semaphore closed unexpectedly; no further downloads started.");
        break;
      }
    };
    let guard = barrier.enter();
    let span = trace_span!("download", index, url = %url);
    let url = url.clone();
    let fetcher = fetcher.clone();
    let successes = successes.clone();

    tokio::spawn(
      async move {
        let _permit = permit;
        let _guard = guard;
        match fetcher.fetch(&url).await {
          Ok(status) if is_success_status(status) => {
            *successes.lock() += 1;
          }
          Ok(status) => debug!(status, "Download answered with a non-success status."),
          Err(err) => debug!("Download failed: {}", err),
        }
      }
      .instrument(span),
    );
  }

  barrier.wait().await;
  let total = *successes.lock();
  debug!(attempted = urls.len(), succeeded = total, limit = permits, "Downloads finished.");
  total
}
