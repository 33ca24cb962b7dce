use futures_ensemble::{concurrent_downloader, fetch_urls, fetch_with_retry, EnsembleError, MockFetcher, RetryPolicy};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

// Helper to initialize tracing for tests (call once per test run, not per test function)
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,futures_ensemble=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

fn urls(count: usize) -> Vec<String> {
  (0..count).map(|i| format!("http://host-{}.test/resource", i)).collect()
}

#[tokio::test]
async fn test_fetch_urls_empty_batch() {
  setup_tracing_for_test();
  let fetcher = Arc::new(MockFetcher::new());
  let statuses = fetch_urls(fetcher.clone(), &[], Duration::from_secs(1)).await.unwrap();
  assert!(statuses.is_empty());
  assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_fetch_urls_maps_every_reachable_url() {
  setup_tracing_for_test();
  let fetcher = Arc::new(MockFetcher::new());
  fetcher.set_status("http://host-1.test/resource", 404);
  let batch = urls(3);

  let statuses = fetch_urls(fetcher.clone(), &batch, Duration::from_secs(1)).await.unwrap();
  assert_eq!(statuses.len(), 3);
  assert_eq!(statuses["http://host-0.test/resource"], 200);
  assert_eq!(statuses["http://host-1.test/resource"], 404);
  assert_eq!(statuses["http://host-2.test/resource"], 200);
}

#[tokio::test]
async fn test_fetch_urls_omits_failed_urls() {
  setup_tracing_for_test();
  let fetcher = Arc::new(MockFetcher::new());
  fetcher.set_unreachable("invalid-url", "no such host");
  let batch = vec!["http://example.com".to_string(), "invalid-url".to_string()];

  let statuses = fetch_urls(fetcher, &batch, Duration::from_secs(1)).await.unwrap();
  assert_eq!(statuses.len(), 1);
  assert_eq!(statuses.get("http://example.com"), Some(&200));
  assert!(!statuses.contains_key("invalid-url"));
}

#[tokio::test]
async fn test_fetch_urls_duplicates_collapse() {
  setup_tracing_for_test();
  let fetcher = Arc::new(MockFetcher::new());
  let batch = vec!["http://same.test".to_string(); 4];

  let statuses = fetch_urls(fetcher.clone(), &batch, Duration::from_secs(1)).await.unwrap();
  assert_eq!(statuses.len(), 1);
  assert_eq!(fetcher.calls(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fetch_urls_runs_concurrently() {
  setup_tracing_for_test();
  let fetcher = Arc::new(MockFetcher::new().with_default_delay(Duration::from_millis(100)));
  let batch = urls(10);

  let started = Instant::now();
  let statuses = fetch_urls(fetcher.clone(), &batch, Duration::from_secs(2)).await.unwrap();
  let elapsed = started.elapsed();

  assert_eq!(statuses.len(), 10);
  assert!(elapsed < Duration::from_millis(600), "Fetches ran serially: {:?}", elapsed);
  assert!(fetcher.peak_in_flight() > 1);
}

#[tokio::test]
async fn test_fetch_urls_batch_timeout_is_all_or_nothing() {
  setup_tracing_for_test();
  let fetcher = Arc::new(MockFetcher::new());
  fetcher.set_delay("http://slow.test", Duration::from_millis(300));
  let batch = vec!["http://fast.test".to_string(), "http://slow.test".to_string()];
  let limit = Duration::from_millis(20);

  let started = Instant::now();
  let outcome = fetch_urls(fetcher.clone(), &batch, limit).await;
  assert_eq!(outcome, Err(EnsembleError::TimeoutExceeded(limit)));
  assert!(started.elapsed() < Duration::from_millis(250));

  // The abandoned fetch is told to stop rather than left running.
  sleep(Duration::from_millis(50)).await;
  assert_eq!(fetcher.in_flight(), 0);
}

#[tokio::test]
async fn test_fetch_urls_sub_millisecond_deadline_times_out() {
  setup_tracing_for_test();
  let fetcher = Arc::new(MockFetcher::new());
  let batch = vec!["http://example.com".to_string()];
  let limit = Duration::from_nanos(1);

  let outcome = fetch_urls(fetcher, &batch, limit).await;
  assert_eq!(outcome, Err(EnsembleError::TimeoutExceeded(limit)));
}

#[tokio::test]
async fn test_fetch_with_retry_recovers_from_transient_failures() {
  setup_tracing_for_test();
  let fetcher = MockFetcher::new();
  fetcher.fail_first("http://flaky.test", 2);
  let policy = RetryPolicy::new(3).with_base_delay(Duration::from_millis(10));

  let started = Instant::now();
  let status = fetch_with_retry(&fetcher, "http://flaky.test", &policy).await;
  assert_eq!(status, Ok(200));
  assert_eq!(fetcher.calls(), 3);
  // Two backoffs: 10ms then 20ms.
  assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_fetch_with_retry_gives_up_after_max_attempts() {
  setup_tracing_for_test();
  let fetcher = MockFetcher::new();
  fetcher.set_unreachable("http://down.test", "connection refused");
  let policy = RetryPolicy::new(3).with_base_delay(Duration::from_millis(1));

  let outcome = fetch_with_retry(&fetcher, "http://down.test", &policy).await;
  match outcome {
    Err(EnsembleError::RetryExhausted { attempts, last }) => {
      assert_eq!(attempts, 3);
      assert!(matches!(*last, EnsembleError::RemoteUnavailable { .. }));
    }
    other => panic!("Expected RetryExhausted, got {:?}", other),
  }
  assert_eq!(fetcher.calls(), 3);
}

#[tokio::test]
async fn test_fetch_with_retry_retries_server_errors_only() {
  setup_tracing_for_test();
  let fetcher = MockFetcher::new();
  fetcher.set_status("http://broken.test", 503);
  fetcher.set_status("http://missing.test", 404);
  let policy = RetryPolicy::new(2).with_base_delay(Duration::from_millis(1));

  let broken = fetch_with_retry(&fetcher, "http://broken.test", &policy).await;
  assert!(matches!(
    broken,
    Err(EnsembleError::RetryExhausted { attempts: 2, ref last }) if matches!(**last, EnsembleError::ServerStatus { status: 503, .. })
  ));

  assert_eq!(fetch_with_retry(&fetcher, "http://missing.test", &policy).await, Ok(404));
  assert_eq!(fetcher.calls(), 3);
}

#[tokio::test]
async fn test_fetch_with_retry_attempt_timeout() {
  setup_tracing_for_test();
  let fetcher = MockFetcher::new();
  fetcher.set_delay("http://slow.test", Duration::from_millis(200));
  let limit = Duration::from_millis(20);
  let policy = RetryPolicy::new(2)
    .with_base_delay(Duration::from_millis(1))
    .with_attempt_timeout(limit);

  let outcome = fetch_with_retry(&fetcher, "http://slow.test", &policy).await;
  match outcome {
    Err(EnsembleError::RetryExhausted { attempts, last }) => {
      assert_eq!(attempts, 2);
      assert_eq!(*last, EnsembleError::TimeoutExceeded(limit));
    }
    other => panic!("Expected RetryExhausted, got {:?}", other),
  }
}

#[tokio::test]
async fn test_concurrent_downloader_counts_successes() {
  setup_tracing_for_test();
  let fetcher = Arc::new(MockFetcher::new());
  fetcher.set_unreachable("invalid-url", "no such host");
  fetcher.set_status("http://example.com/missing", 404);

  let cases: Vec<(&str, Vec<String>, i32, usize)> = vec![
    ("empty urls", vec![], 2, 0),
    ("single url", vec!["http://example.com".to_string()], 1, 1),
    (
      "multiple urls",
      vec!["http://example.com".to_string(), "http://golang.org".to_string()],
      2,
      2,
    ),
    (
      "invalid url",
      vec!["http://example.com".to_string(), "invalid-url".to_string()],
      2,
      1,
    ),
    (
      "non-success status",
      vec!["http://example.com".to_string(), "http://example.com/missing".to_string()],
      2,
      1,
    ),
    ("zero limit", urls(3), 0, 0),
    ("negative limit", urls(3), -1, 0),
    ("more urls than limit", urls(50), 5, 50),
    ("limit above url count", urls(3), 100, 3),
  ];

  for (name, batch, limit, expected) in cases {
    let succeeded = tokio::time::timeout(
      Duration::from_secs(2),
      concurrent_downloader(fetcher.clone(), &batch, limit),
    )
    .await
    .unwrap_or_else(|_| panic!("{}: downloader timed out", name));
    assert_eq!(succeeded, expected, "{}", name);
  }
}

#[tokio::test]
async fn test_concurrent_downloader_non_positive_limit_attempts_nothing() {
  setup_tracing_for_test();
  let fetcher = Arc::new(MockFetcher::new());
  assert_eq!(concurrent_downloader(fetcher.clone(), &urls(5), 0).await, 0);
  assert_eq!(fetcher.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_downloader_never_exceeds_limit() {
  setup_tracing_for_test();
  let fetcher = Arc::new(MockFetcher::new());
  let batch = urls(30);
  {
    let mut rng = rand::rng();
    for url in &batch {
      fetcher.set_delay(url, Duration::from_millis(rng.random_range(5..30)));
    }
  }

  let succeeded = concurrent_downloader(fetcher.clone(), &batch, 3).await;

  assert_eq!(succeeded, 30);
  assert_eq!(fetcher.calls(), 30);
  assert_eq!(fetcher.in_flight(), 0);
  let peak = fetcher.peak_in_flight();
  assert!((1..=3).contains(&peak), "Observed {} downloads in flight", peak);
}
