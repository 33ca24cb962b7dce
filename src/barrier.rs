use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::trace;

struct BarrierInner {
  outstanding: AtomicUsize,
  all_done: Notify,
}

/// Tracks a set of outstanding tasks and lets a coordinator wait until every one
/// of them has finished.
///
/// A slot is taken with [`enter`](Self::enter) *before* the task is spawned, and
/// the returned [`CompletionGuard`] is moved into the task. The slot is released
/// when the guard drops, which happens on every exit path of the task: normal
/// return, early return, panic unwind, or the task future being dropped.
#[derive(Clone)]
pub struct CompletionBarrier {
  inner: Arc<BarrierInner>,
}

impl fmt::Debug for CompletionBarrier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompletionBarrier")
      .field("outstanding", &self.outstanding())
      .finish()
  }
}

impl Default for CompletionBarrier {
  fn default() -> Self {
    Self::new()
  }
}

impl CompletionBarrier {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(BarrierInner {
        outstanding: AtomicUsize::new(0),
        all_done: Notify::new(),
      }),
    }
  }

  /// Registers one outstanding task.
  #[must_use = "dropping the guard immediately releases the slot"]
  pub fn enter(&self) -> CompletionGuard {
    self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
    CompletionGuard {
      inner: self.inner.clone(),
    }
  }

  pub fn outstanding(&self) -> usize {
    self.inner.outstanding.load(Ordering::Acquire)
  }

  /// Waits until the outstanding count reaches zero. Returns immediately if no
  /// task is registered.
  pub async fn wait(&self) {
    loop {
      let notified = self.inner.all_done.notified();
      tokio::pin!(notified);
      // Register interest before checking, so a release racing this check is not missed.
      notified.as_mut().enable();
      if self.outstanding() == 0 {
        return;
      }
      notified.await;
    }
  }
}

/// Releases one barrier slot when dropped.
pub struct CompletionGuard {
  inner: Arc<BarrierInner>,
}

impl fmt::Debug for CompletionGuard {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompletionGuard").finish_non_exhaustive()
  }
}

impl Drop for CompletionGuard {
  fn drop(&mut self) {
    let previous = self.inner.outstanding.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(previous > 0, "completion barrier released more often than entered");
    if previous == 1 {
      trace!("Completion barrier drained.");
      self.inner.all_done.notify_waiters();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn test_wait_without_tasks_returns_immediately() {
    let barrier = CompletionBarrier::new();
    tokio::time::timeout(Duration::from_millis(50), barrier.wait())
      .await
      .expect("empty barrier should not block");
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_wait_blocks_until_all_guards_drop() {
    let barrier = CompletionBarrier::new();
    for i in 0..8u64 {
      let guard = barrier.enter();
      tokio::spawn(async move {
        let _guard = guard;
        tokio::time::sleep(Duration::from_millis(10 + i * 5)).await;
      });
    }
    assert_eq!(barrier.outstanding(), 8);

    tokio::time::timeout(Duration::from_secs(2), barrier.wait())
      .await
      .expect("barrier should release after all tasks finish");
    assert_eq!(barrier.outstanding(), 0);
  }

  #[tokio::test]
  async fn test_panicking_task_still_releases() {
    let barrier = CompletionBarrier::new();
    let guard = barrier.enter();
    let handle = tokio::spawn(async move {
      let _guard = guard;
      panic!("unit of work failed");
    });
    assert!(handle.await.is_err());

    tokio::time::timeout(Duration::from_millis(200), barrier.wait())
      .await
      .expect("panic unwind should drop the guard");
  }

  #[tokio::test]
  async fn test_aborted_task_still_releases() {
    let barrier = CompletionBarrier::new();
    let guard = barrier.enter();
    let handle = tokio::spawn(async move {
      let _guard = guard;
      std::future::pending::<()>().await;
    });
    handle.abort();
    let _ = handle.await;

    tokio::time::timeout(Duration::from_millis(200), barrier.wait())
      .await
      .expect("dropping the task future should drop the guard");
  }
}
