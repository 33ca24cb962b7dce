use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

/// Capacity of every single-producer/single-consumer handoff. One slot keeps
/// stages in lockstep: a producer can run at most one value ahead of its consumer.
pub(crate) const HANDOFF_CAPACITY: usize = 1;

pub(crate) fn handoff<T>() -> (mpsc::Sender<T>, HandoffStream<T>) {
  let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
  (tx, HandoffStream { rx })
}

/// The consuming end of a single-producer stage.
///
/// The stream is finite and single-pass: it ends once its producer task has
/// dropped the sender. Dropping the stream early is always safe; the producer's
/// next send fails and the producer task exits.
pub struct HandoffStream<T> {
  rx: mpsc::Receiver<T>,
}

impl<T> fmt::Debug for HandoffStream<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HandoffStream").finish_non_exhaustive()
  }
}

impl<T> HandoffStream<T> {
  /// A stream that is already closed.
  pub(crate) fn closed() -> Self {
    let (_, stream) = handoff();
    stream
  }

  /// Next value, or `None` once the producer is done.
  pub async fn recv(&mut self) -> Option<T> {
    self.rx.recv().await
  }

  /// Consumes the whole stream.
  pub async fn drain(mut self) -> Vec<T> {
    let mut values = Vec::new();
    while let Some(value) = self.rx.recv().await {
      values.push(value);
    }
    values
  }
}

impl<T> Stream for HandoffStream<T> {
  type Item = T;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
    self.rx.poll_recv(cx)
  }
}
