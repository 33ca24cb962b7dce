//! Concurrent fetching against an abstract [`Fetcher`], with retries.

use crate::barrier::CompletionBarrier;
use crate::config::RetryPolicy;
use crate::error::EnsembleError;
use crate::queue::result_queue;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, trace_span, warn, Instrument};

/// The network capability the fetching primitives depend on:
/// `fetch(url) -> status code`, possibly after a delay.
///
/// Implementations are shared between tasks as `Arc<F>`.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(&self, url: &str) -> impl Future<Output = Result<u16, EnsembleError>> + Send;
}

/// Whether `status` counts as a successful download.
pub fn is_success_status(status: u16) -> bool {
  (200..300).contains(&status)
}

/// Fetches every URL concurrently (one task per URL) and maps each URL to its status.
///
/// A URL whose fetch fails is left out of the map. A single deadline covers the
/// whole batch: if it passes first, the call fails with
/// [`EnsembleError::TimeoutExceeded`] and no partial map is returned. Fetches
/// still in flight at that point are told to stop.
///
/// Duplicate URLs are each fetched; the map keeps one entry per distinct URL.
pub async fn fetch_urls<F: Fetcher>(
  fetcher: Arc<F>,
  urls: &[String],
  timeout: Duration,
) -> Result<HashMap<String, u16>, EnsembleError> {
  if urls.is_empty() {
    return Ok(HashMap::new());
  }
  let deadline = Instant::now().checked_add(timeout);

  let stop = CancellationToken::new();
  // Stops every in-flight fetch on whichever path this call returns by.
  let _stop_on_return = stop.clone().drop_guard();
  let (outcome_tx, outcome_rx) = result_queue::<(String, Result<u16, EnsembleError>)>();
  let barrier = CompletionBarrier::new();

  for url in urls {
    let guard = barrier.enter();
    let span = trace_span!("fetch_url", url = %url);
    let url = url.clone();
    let fetcher = fetcher.clone();
    let outcomes = outcome_tx.clone();
    let stop = stop.clone();
    tokio::spawn(
      async move {
        let _guard = guard;
        let outcome = tokio::select! {
          biased;
          _ = stop.cancelled() => {
            trace!("Batch gave up; abandoning fetch.");
            return;
          }
          outcome = fetcher.fetch(&url) => outcome,
        };
        if outcomes.deliver((url, outcome)).await.is_err() {
          trace!("Collector is gone; outcome discarded.");
        }
      }
      .instrument(span),
    );
  }

  let coordinator_barrier = barrier.clone();
  tokio::spawn(async move {
    coordinator_barrier.wait().await;
    drop(outcome_tx);
  });

  let collect = async {
    let mut statuses = HashMap::with_capacity(urls.len());
    while let Some((url, outcome)) = outcome_rx.next().await {
      match outcome {
        Ok(status) => {
          statuses.insert(url, status);
        }
        Err(err) => warn!(url = %url, "Fetch failed; leaving it out of the batch: {}", err),
      }
    }
    statuses
  };

  // The timer wheel rounds up to whole milliseconds, so a batch that finishes
  // after a shorter deadline is still a timeout.
  let finished = match deadline {
    Some(deadline) => match tokio::time::timeout_at(deadline, collect).await {
      Ok(statuses) if Instant::now() < deadline => Some(statuses),
      _ => None,
    },
    None => Some(collect.await),
  };

  match finished {
    Some(statuses) => {
      debug!(requested = urls.len(), fetched = statuses.len(), "Batch fetch complete.");
      Ok(statuses)
    }
    None => {
      info!(?timeout, requested = urls.len(), "Batch fetch timed out.");
      Err(EnsembleError::TimeoutExceeded(timeout))
    }
  }
}

/// Fetches one URL, retrying retryable failures with exponential backoff.
///
/// Returns the first successful status. A status of 500 or above counts as a
/// retryable failure; any other status is returned as-is. After
/// `policy.max_attempts()` failed attempts the last error comes back wrapped in
/// [`EnsembleError::RetryExhausted`]. Errors that are not retryable are returned
/// immediately.
pub async fn fetch_with_retry<F: Fetcher>(fetcher: &F, url: &str, policy: &RetryPolicy) -> Result<u16, EnsembleError> {
  let max_attempts = policy.max_attempts();
  let mut attempt = 0u32;

  loop {
    let error = match fetch_once(fetcher, url, policy.attempt_timeout()).await {
      Ok(status) => {
        if attempt > 0 {
          debug!(url, attempt = attempt + 1, status, "Fetch succeeded after retrying.");
        }
        return Ok(status);
      }
      Err(error) => error,
    };
    attempt += 1;

    if !error.is_retryable() {
      return Err(error);
    }
    if attempt >= max_attempts {
      warn!(url, attempts = attempt, "Giving up: {}", error);
      return Err(EnsembleError::RetryExhausted {
        attempts: attempt,
        last: Box::new(error),
      });
    }

    let delay = policy.backoff(attempt - 1);
    debug!(url, attempt, ?delay, "Attempt failed ({}); backing off.", error);
    tokio::time::sleep(delay).await;
  }
}

async fn fetch_once<F: Fetcher>(fetcher: &F, url: &str, attempt_timeout: Option<Duration>) -> Result<u16, EnsembleError> {
  let status = match attempt_timeout {
    Some(limit) => tokio::time::timeout(limit, fetcher.fetch(url))
      .await
      .map_err(|_| EnsembleError::TimeoutExceeded(limit))??,
    None => fetcher.fetch(url).await?,
  };
  if status >= 500 {
    return Err(EnsembleError::ServerStatus {
      url: url.to_string(),
      status,
    });
  }
  Ok(status)
}

/// In-memory [`Fetcher`] for tests and demos.
///
/// Every URL answers 200 unless configured otherwise. All configuration lives in
/// concurrent maps, so a shared instance can be reconfigured between calls.
/// Call counts and in-flight concurrency (current and peak) are recorded.
#[derive(Debug, Default)]
pub struct MockFetcher {
  statuses: DashMap<String, u16>,
  delays: DashMap<String, Duration>,
  unreachable: DashMap<String, String>,
  scripted_failures: DashMap<String, usize>,
  default_delay: Duration,
  calls: AtomicUsize,
  in_flight: AtomicUsize,
  peak_in_flight: AtomicUsize,
}

impl MockFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Delay applied to every URL without its own delay.
  pub fn with_default_delay(mut self, delay: Duration) -> Self {
    self.default_delay = delay;
    self
  }

  pub fn set_status(&self, url: &str, status: u16) {
    self.statuses.insert(url.to_string(), status);
  }

  pub fn set_delay(&self, url: &str, delay: Duration) {
    self.delays.insert(url.to_string(), delay);
  }

  /// Every fetch of `url` fails with [`EnsembleError::RemoteUnavailable`].
  pub fn set_unreachable(&self, url: &str, reason: &str) {
    self.unreachable.insert(url.to_string(), reason.to_string());
  }

  /// The next `failures` fetches of `url` fail with [`EnsembleError::RemoteUnavailable`].
  pub fn fail_first(&self, url: &str, failures: usize) {
    self.scripted_failures.insert(url.to_string(), failures);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn in_flight(&self) -> usize {
    self.in_flight.load(Ordering::SeqCst)
  }

  /// Highest number of fetches that were ever running at the same time.
  pub fn peak_in_flight(&self) -> usize {
    self.peak_in_flight.load(Ordering::SeqCst)
  }

  fn respond(&self, url: &str) -> Result<u16, EnsembleError> {
    if let Some(reason) = self.unreachable.get(url) {
      return Err(EnsembleError::RemoteUnavailable {
        url: url.to_string(),
        reason: reason.clone(),
      });
    }
    if let Some(mut remaining) = self.scripted_failures.get_mut(url) {
      if *remaining > 0 {
        *remaining -= 1;
        return Err(EnsembleError::RemoteUnavailable {
          url: url.to_string(),
          reason: "scripted failure".to_string(),
        });
      }
    }
    Ok(self.statuses.get(url).map(|status| *status).unwrap_or(200))
  }
}

impl Fetcher for MockFetcher {
  fn fetch(&self, url: &str) -> impl Future<Output = Result<u16, EnsembleError>> + Send {
    async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);

      let delay = self
        .delays
        .get(url)
        .map(|delay| *delay)
        .unwrap_or(self.default_delay);
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      self.respond(url)
    }
  }
}

struct InFlight<'a> {
  current: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
  fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
    peak.fetch_max(now, Ordering::SeqCst);
    Self { current }
  }
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.current.fetch_sub(1, Ordering::SeqCst);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_mock_defaults_to_ok() {
    let fetcher = MockFetcher::new();
    assert_eq!(fetcher.fetch("http://example.com").await, Ok(200));
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(fetcher.in_flight(), 0);
  }

  #[tokio::test]
  async fn test_mock_scripted_failures_run_out() {
    let fetcher = MockFetcher::new();
    fetcher.fail_first("http://flaky.test", 2);
    assert!(fetcher.fetch("http://flaky.test").await.is_err());
    assert!(fetcher.fetch("http://flaky.test").await.is_err());
    assert_eq!(fetcher.fetch("http://flaky.test").await, Ok(200));
  }

  #[tokio::test]
  async fn test_server_status_is_retryable_failure() {
    let fetcher = MockFetcher::new();
    fetcher.set_status("http://broken.test", 503);
    fetcher.set_status("http://missing.test", 404);

    let broken = fetch_once(&fetcher, "http://broken.test", None).await;
    assert!(matches!(broken, Err(EnsembleError::ServerStatus { status: 503, .. })));
    assert_eq!(fetch_once(&fetcher, "http://missing.test", None).await, Ok(404));
  }

  #[tokio::test]
  async fn test_attempt_timeout() {
    let fetcher = MockFetcher::new();
    fetcher.set_delay("http://slow.test", Duration::from_millis(300));
    let limit = Duration::from_millis(20);
    assert_eq!(
      fetch_once(&fetcher, "http://slow.test", Some(limit)).await,
      Err(EnsembleError::TimeoutExceeded(limit))
    );
  }
}
