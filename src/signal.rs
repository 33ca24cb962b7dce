use crate::error::EnsembleError;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const EXPIRED: u8 = 2;

/// Observable state of a [`CancelSignal`]. Transitions only ever leave `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
  Active,
  Cancelled,
  Expired,
}

#[derive(Debug)]
struct SignalInner {
  state: AtomicU8,
  token: CancellationToken,
  deadline: Option<Instant>,
}

/// A broadcastable, one-shot cancellation signal with an optional deadline.
///
/// Clones share the same state. Workers observe the signal; only the caller that
/// created it (or whoever it hands a clone to) is expected to trip it. Once the
/// signal leaves [`SignalState::Active`] it never returns to it.
#[derive(Debug, Clone)]
pub struct CancelSignal {
  inner: Arc<SignalInner>,
}

impl Default for CancelSignal {
  fn default() -> Self {
    Self::new()
  }
}

impl CancelSignal {
  /// A signal that only trips when [`cancel`](Self::cancel) is called.
  pub fn new() -> Self {
    Self::build(None)
  }

  /// A signal that expires on its own once `timeout` has elapsed.
  pub fn with_timeout(timeout: Duration) -> Self {
    Self::build(Instant::now().checked_add(timeout))
  }

  /// A signal that expires on its own at `deadline`.
  pub fn with_deadline(deadline: Instant) -> Self {
    Self::build(Some(deadline))
  }

  fn build(deadline: Option<Instant>) -> Self {
    Self {
      inner: Arc::new(SignalInner {
        state: AtomicU8::new(ACTIVE),
        token: CancellationToken::new(),
        deadline,
      }),
    }
  }

  /// Requests cancellation. Has no effect if the signal already tripped,
  /// including a deadline that has passed without anyone observing it.
  pub fn cancel(&self) {
    self.check_deadline();
    self.transition(CANCELLED);
  }

  pub fn deadline(&self) -> Option<Instant> {
    self.inner.deadline
  }

  pub fn state(&self) -> SignalState {
    self.check_deadline();
    match self.inner.state.load(Ordering::Acquire) {
      ACTIVE => SignalState::Active,
      CANCELLED => SignalState::Cancelled,
      _ => SignalState::Expired,
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.state() != SignalState::Active
  }

  /// The error a batch call should surface for the current state, if any.
  pub fn error(&self) -> Option<EnsembleError> {
    match self.state() {
      SignalState::Active => None,
      SignalState::Cancelled => Some(EnsembleError::Cancelled),
      SignalState::Expired => Some(EnsembleError::DeadlineExceeded),
    }
  }

  /// Completes once the signal has been cancelled or its deadline has passed.
  ///
  /// Safe to race inside `tokio::select!`: dropping the future has no side effects.
  pub async fn cancelled(&self) {
    match self.inner.deadline {
      Some(deadline) => {
        tokio::select! {
          biased;
          _ = self.inner.token.cancelled() => {}
          _ = tokio::time::sleep_until(deadline) => self.transition(EXPIRED),
        }
      }
      None => self.inner.token.cancelled().await,
    }
  }

  fn check_deadline(&self) {
    if let Some(deadline) = self.inner.deadline {
      if Instant::now() >= deadline {
        self.transition(EXPIRED);
      }
    }
  }

  fn transition(&self, to: u8) {
    if self
      .inner
      .state
      .compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      debug!(expired = to == EXPIRED, "Cancellation signal tripped.");
    }
    // Idempotent; also covers the loser of a concurrent transition.
    self.inner.token.cancel();
  }
}
