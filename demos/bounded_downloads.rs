use futures_ensemble::{concurrent_downloader, fetch_urls, fetch_with_retry, MockFetcher, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Bounded Downloads Example ---");

  let fetcher = Arc::new(MockFetcher::new().with_default_delay(Duration::from_millis(50)));
  fetcher.set_status("http://example.com/missing", 404);
  fetcher.set_unreachable("http://offline.test", "connection refused");
  fetcher.fail_first("http://flaky.test", 2);

  let urls: Vec<String> = (0..12)
    .map(|i| format!("http://mirror-{}.test/file", i))
    .chain(["http://example.com/missing".to_string(), "http://offline.test".to_string()])
    .collect();

  let succeeded = concurrent_downloader(fetcher.clone(), &urls, 4).await;
  info!(
    "{} of {} downloads succeeded; at most {} ran at once",
    succeeded,
    urls.len(),
    fetcher.peak_in_flight()
  );

  match fetch_urls(fetcher.clone(), &urls[..3], Duration::from_secs(1)).await {
    Ok(statuses) => info!("Batch statuses: {:?}", statuses),
    Err(e) => info!("Batch failed: {}", e),
  }

  let policy = RetryPolicy::new(4).with_base_delay(Duration::from_millis(20));
  match fetch_with_retry(&*fetcher, "http://flaky.test", &policy).await {
    Ok(status) => info!("Flaky endpoint answered {} after retrying", status),
    Err(e) => info!("Flaky endpoint gave up: {}", e),
  }

  info!("--- Bounded Downloads Example End ---");
}
