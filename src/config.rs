use std::sync::Arc;
use std::time::Duration;

pub(crate) const DEFAULT_POOL_NAME: &str = "ensemble";
pub(crate) const DEFAULT_JOB_QUEUE_CAPACITY: usize = 64;

/// Worker count and queue sizing for a single pool invocation.
///
/// The worker count is signed on purpose: zero or negative counts are a policy
/// no-op (empty result), not an error.
#[derive(Debug, Clone)]
pub struct PoolConfig {
  workers: i32,
  job_queue_capacity: usize,
  name: Arc<str>,
}

impl PoolConfig {
  pub fn new(workers: i32) -> Self {
    Self {
      workers,
      job_queue_capacity: DEFAULT_JOB_QUEUE_CAPACITY,
      name: Arc::from(DEFAULT_POOL_NAME),
    }
  }

  /// Bound on jobs buffered between the producer and the workers. Clamped to at least 1.
  pub fn with_job_queue_capacity(mut self, capacity: usize) -> Self {
    self.job_queue_capacity = capacity.max(1);
    self
  }

  /// Name recorded on every tracing span the pool opens.
  pub fn with_name(mut self, name: &str) -> Self {
    self.name = Arc::from(name);
    self
  }

  pub fn workers(&self) -> i32 {
    self.workers
  }

  pub fn job_queue_capacity(&self) -> usize {
    self.job_queue_capacity
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn shared_name(&self) -> Arc<str> {
    self.name.clone()
  }

  /// Number of workers actually worth spawning for `job_count` jobs.
  pub fn effective_workers(&self, job_count: usize) -> usize {
    effective_workers(self.workers, job_count)
  }
}

/// Clamps a requested signed worker count to `0..=job_count`.
pub(crate) fn effective_workers(requested: i32, job_count: usize) -> usize {
  if requested <= 0 {
    return 0;
  }
  (requested as usize).min(job_count)
}

/// Exponential backoff policy for retrying a single unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  max_attempts: u32,
  base_delay: Duration,
  max_delay: Duration,
  attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::new(3)
  }
}

impl RetryPolicy {
  /// `max_attempts` counts the first try; zero is treated as one attempt.
  pub fn new(max_attempts: u32) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      base_delay: Duration::from_millis(100),
      max_delay: Duration::from_secs(5),
      attempt_timeout: None,
    }
  }

  pub fn with_base_delay(mut self, delay: Duration) -> Self {
    self.base_delay = delay;
    self
  }

  pub fn with_max_delay(mut self, delay: Duration) -> Self {
    self.max_delay = delay;
    self
  }

  /// Upper bound on a single attempt; an attempt that runs past it counts as a retryable failure.
  pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
    self.attempt_timeout = Some(timeout);
    self
  }

  pub fn max_attempts(&self) -> u32 {
    self.max_attempts
  }

  pub fn attempt_timeout(&self) -> Option<Duration> {
    self.attempt_timeout
  }

  /// Delay to wait after the failed attempt number `attempt` (zero-based):
  /// `base_delay * 2^attempt`, capped at `max_delay`.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    self.base_delay.saturating_mul(factor).min(self.max_delay)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_effective_workers_clamps() {
    assert_eq!(effective_workers(0, 10), 0);
    assert_eq!(effective_workers(-3, 10), 0);
    assert_eq!(effective_workers(4, 10), 4);
    assert_eq!(effective_workers(10, 3), 3);
    assert_eq!(effective_workers(5, 0), 0);
  }

  #[test]
  fn test_queue_capacity_is_at_least_one() {
    let config = PoolConfig::new(2).with_job_queue_capacity(0);
    assert_eq!(config.job_queue_capacity(), 1);
  }

  #[test]
  fn test_backoff_doubles_and_caps() {
    let policy = RetryPolicy::new(5)
      .with_base_delay(Duration::from_millis(10))
      .with_max_delay(Duration::from_millis(50));
    assert_eq!(policy.backoff(0), Duration::from_millis(10));
    assert_eq!(policy.backoff(1), Duration::from_millis(20));
    assert_eq!(policy.backoff(2), Duration::from_millis(40));
    assert_eq!(policy.backoff(3), Duration::from_millis(50));
    assert_eq!(policy.backoff(40), Duration::from_millis(50));
  }

  #[test]
  fn test_zero_attempts_means_one() {
    assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
  }
}
