use crate::error::EnsembleError;
use crate::job::Job;
use crate::signal::CancelSignal;

use fibre::mpsc::{self as fibre_mpsc, AsyncReceiver, AsyncSender};
use futures_intrusive::channel::shared::{self as intrusive, Receiver, Sender};
use std::fmt;

/// A bounded, multi-consumer queue of jobs with exactly one producer.
///
/// The producer half is not `Clone`, and closing consumes it, so the queue can
/// only ever be closed by the one party that fills it, after it has stopped
/// filling it.
pub(crate) struct JobQueue<J: 'static> {
  tx: Sender<Job<J>>,
  rx: Receiver<Job<J>>,
  capacity: usize,
}

impl<J: Send + 'static> JobQueue<J> {
  pub(crate) fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    let (tx, rx) = intrusive::channel(capacity);
    Self { tx, rx, capacity }
  }

  /// Splits the queue into its single producer and a cloneable consumer.
  pub(crate) fn split(self) -> (JobProducer<J>, JobConsumer<J>) {
    (
      JobProducer {
        tx: self.tx,
        capacity: self.capacity,
      },
      JobConsumer { rx: self.rx },
    )
  }
}

/// The sole producer (and sole closer) of a [`JobQueue`].
pub(crate) struct JobProducer<J: 'static> {
  tx: Sender<Job<J>>,
  capacity: usize,
}

impl<J: 'static> fmt::Debug for JobProducer<J> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JobProducer")
      .field("capacity", &self.capacity)
      .finish_non_exhaustive()
  }
}

impl<J: 'static> JobProducer<J> {
  /// Enqueues a job, waiting for room if the queue is full.
  ///
  /// The wait races the cancellation signal, so a producer stuck behind workers
  /// that stopped on cancellation is released instead of blocking forever.
  pub(crate) async fn push(&self, job: Job<J>, signal: &CancelSignal) -> Result<(), EnsembleError> {
    if let Some(err) = signal.error() {
      return Err(err);
    }
    tokio::select! {
      biased;
      _ = signal.cancelled() => Err(signal.error().unwrap_or(EnsembleError::Cancelled)),
      sent = self.tx.send(job) => sent.map_err(|_| EnsembleError::QueueClosed),
    }
  }

  /// Closes the queue. Consumers drain whatever is buffered, then observe the end.
  pub(crate) fn close(self) {
    let _ = self.tx.close();
  }
}

/// A consumer handle for a [`JobQueue`]; clone one per worker.
pub(crate) struct JobConsumer<J: 'static> {
  rx: Receiver<Job<J>>,
}

impl<J: 'static> Clone for JobConsumer<J> {
  fn clone(&self) -> Self {
    Self { rx: self.rx.clone() }
  }
}

impl<J: 'static> fmt::Debug for JobConsumer<J> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JobConsumer").finish_non_exhaustive()
  }
}

impl<J: 'static> JobConsumer<J> {
  /// Claims the next job, or `None` once the queue is closed and drained.
  pub(crate) async fn pull(&self) -> Option<Job<J>> {
    self.rx.receive().await
  }
}

/// Creates an unbounded many-producer, single-consumer result queue.
///
/// The queue closes once every [`ResultSender`] has been dropped. Pools hand one
/// clone to each worker and keep the original in a coordinator that drops it
/// only after all workers have finished, so the consumer never sees the end of
/// the queue while a worker might still write to it.
pub(crate) fn result_queue<R: Send>() -> (ResultSender<R>, ResultReceiver<R>) {
  let (tx, rx) = fibre_mpsc::unbounded_async();
  (ResultSender { tx }, ResultReceiver { rx })
}

pub(crate) struct ResultSender<R: Send> {
  tx: AsyncSender<R>,
}

impl<R: Send> Clone for ResultSender<R> {
  fn clone(&self) -> Self {
    Self { tx: self.tx.clone() }
  }
}

impl<R: Send> ResultSender<R> {
  /// Delivers one result. Fails only when the consumer has gone away.
  pub(crate) async fn deliver(&self, value: R) -> Result<(), EnsembleError> {
    self
      .tx
      .send(value)
      .await
      .map_err(|_| EnsembleError::QueueClosed)
  }
}

pub(crate) struct ResultReceiver<R: Send> {
  rx: AsyncReceiver<R>,
}

impl<R: Send> ResultReceiver<R> {
  /// Next result, or `None` once every sender is gone and the queue is drained.
  pub(crate) async fn next(&self) -> Option<R> {
    self.rx.recv().await.ok()
  }

  /// Drains the queue until it closes.
  pub(crate) async fn collect(self) -> Vec<R> {
    let mut results = Vec::new();
    while let Some(value) = self.next().await {
      results.push(value);
    }
    results
  }
}
