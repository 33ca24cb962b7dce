use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur within a `futures_ensemble` call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnsembleError {
  #[error("Deadline of {0:?} elapsed before the batch completed")]
  TimeoutExceeded(Duration),

  #[error("Operation was cancelled")]
  Cancelled,

  #[error("Cancellation signal deadline expired")]
  DeadlineExceeded,

  #[error("Remote unavailable for {url}: {reason}")]
  RemoteUnavailable { url: String, reason: String },

  #[error("Remote {url} answered with server status {status}")]
  ServerStatus { url: String, status: u16 },

  #[error("Gave up after {attempts} attempts: {last}")]
  RetryExhausted { attempts: u32, last: Box<EnsembleError> },

  #[error("Unit of work panicked")]
  TaskPanicked,

  #[error("Queue was closed before the value could be delivered")]
  QueueClosed,
}

impl EnsembleError {
  /// Whether a retry of the same unit of work can reasonably succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      EnsembleError::TimeoutExceeded(_) | EnsembleError::RemoteUnavailable { .. } | EnsembleError::ServerStatus { .. }
    )
  }

  /// Whether this error was caused by a cancellation signal rather than the work itself.
  pub fn is_cancellation(&self) -> bool {
    matches!(self, EnsembleError::Cancelled | EnsembleError::DeadlineExceeded)
  }
}

/// Error returned by cancellable batch calls, carrying whatever was completed
/// before the batch was interrupted.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error} ({} results gathered before interruption)", .partial.len())]
pub struct Interrupted<T: fmt::Debug> {
  pub partial: Vec<T>,
  #[source]
  pub error: EnsembleError,
}

impl<T: fmt::Debug> Interrupted<T> {
  pub fn new(partial: Vec<T>, error: EnsembleError) -> Self {
    Self { partial, error }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_classification() {
    assert!(EnsembleError::Cancelled.is_cancellation());
    assert!(EnsembleError::DeadlineExceeded.is_cancellation());
    assert!(!EnsembleError::TaskPanicked.is_cancellation());

    assert!(EnsembleError::TimeoutExceeded(Duration::from_millis(1)).is_retryable());
    assert!(EnsembleError::ServerStatus {
      url: "http://broken.test".to_string(),
      status: 503
    }
    .is_retryable());
    assert!(!EnsembleError::Cancelled.is_retryable());
    assert!(!EnsembleError::QueueClosed.is_retryable());
  }

  #[test]
  fn test_interrupted_reports_partial_count() {
    let interrupted = Interrupted::new(vec![1, 2], EnsembleError::Cancelled);
    assert_eq!(interrupted.to_string(), "Operation was cancelled (2 results gathered before interruption)");
  }
}
