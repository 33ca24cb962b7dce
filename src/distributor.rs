use crate::barrier::{CompletionBarrier, CompletionGuard};
use crate::config::PoolConfig;
use crate::error::{EnsembleError, Interrupted};
use crate::job::{enumerate_jobs, PartialResult};
use crate::queue::{result_queue, JobConsumer, JobQueue, ResultSender};
use crate::signal::CancelSignal;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Outcome of one distributed batch: every job's result, or whatever was
/// gathered before the batch was interrupted.
pub type PoolOutcome<R> = Result<Vec<PartialResult<R>>, Interrupted<PartialResult<R>>>;

/// Runs a fixed list of jobs on a fixed number of workers.
///
/// Layout of one run:
/// - a producer task owns the job queue, enqueues every job, then closes it;
/// - `workers` tasks pull jobs, apply the unit of work and push index-tagged results;
/// - a coordinator task waits on a [`CompletionBarrier`] for all workers and only
///   then drops the last result sender, which closes the result queue;
/// - the caller drains the result queue, racing the cancellation signal.
///
/// No state survives the call.
#[derive(Debug, Clone)]
pub struct WorkDistributor {
  config: PoolConfig,
}

impl WorkDistributor {
  pub fn new(config: PoolConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &PoolConfig {
    &self.config
  }

  /// Distributes `jobs` and collects one [`PartialResult`] per processed job.
  ///
  /// A panic inside `work` is contained to that job and reported as
  /// [`EnsembleError::TaskPanicked`]. If `signal` trips, unclaimed jobs are
  /// abandoned and the results gathered so far come back inside [`Interrupted`].
  pub async fn run<J, R, F, Fut>(&self, jobs: Vec<J>, signal: &CancelSignal, work: F) -> PoolOutcome<R>
  where
    J: Send + 'static,
    R: Send + fmt::Debug + 'static,
    F: Fn(J) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, EnsembleError>> + Send + 'static,
  {
    let pool_name = self.config.shared_name();

    if let Some(error) = signal.error() {
      info!(pool_name = %pool_name, "Signal already tripped on entry; no jobs will run.");
      return Err(Interrupted::new(Vec::new(), error));
    }

    let job_count = jobs.len();
    let worker_count = self.config.effective_workers(job_count);
    if worker_count == 0 {
      debug!(pool_name = %pool_name, requested = self.config.workers(), job_count, "Nothing to distribute.");
      return Ok(Vec::new());
    }
    debug!(pool_name = %pool_name, worker_count, job_count, "Distributing jobs.");

    let (producer, consumer) = JobQueue::new(self.config.job_queue_capacity()).split();
    let (result_tx, result_rx) = result_queue::<PartialResult<R>>();
    let barrier = CompletionBarrier::new();
    let work = Arc::new(work);

    let producer_signal = signal.clone();
    let job_list = enumerate_jobs(jobs);
    tokio::spawn(
      async move {
        for job in job_list {
          let index = job.index;
          if let Err(err) = producer.push(job, &producer_signal).await {
            debug!(index, "Producer stopped before enqueueing every job: {}", err);
            break;
          }
        }
        producer.close();
        trace!("Job queue closed by its producer.");
      }
      .instrument(info_span!("job_producer", pool_name = %pool_name)),
    );

    for worker in 0..worker_count {
      let guard = barrier.enter();
      tokio::spawn(
        Self::run_worker(consumer.clone(), result_tx.clone(), signal.clone(), work.clone(), guard)
          .instrument(info_span!("pool_worker", pool_name = %pool_name, worker)),
      );
    }
    drop(consumer);

    let coordinator_barrier = barrier.clone();
    tokio::spawn(
      async move {
        coordinator_barrier.wait().await;
        // Last sender; the result queue closes here and nowhere else.
        drop(result_tx);
        trace!("All workers finished; result queue closed.");
      }
      .instrument(info_span!("result_coordinator", pool_name = %pool_name)),
    );

    let mut results = Vec::with_capacity(job_count);
    loop {
      tokio::select! {
        biased;

        next = result_rx.next() => match next {
          Some(result) => results.push(result),
          None => break,
        },

        _ = signal.cancelled() => {
          let error = signal.error().unwrap_or(EnsembleError::Cancelled);
          info!(pool_name = %pool_name, gathered = results.len(), job_count, "Batch interrupted: {}", error);
          return Err(Interrupted::new(results, error));
        }
      }
    }

    debug!(pool_name = %pool_name, gathered = results.len(), "Batch complete.");
    Ok(results)
  }

  async fn run_worker<J, R, F, Fut>(
    consumer: JobConsumer<J>,
    results: ResultSender<PartialResult<R>>,
    signal: CancelSignal,
    work: Arc<F>,
    guard: CompletionGuard,
  ) where
    J: Send + 'static,
    R: Send + 'static,
    F: Fn(J) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, EnsembleError>> + Send + 'static,
  {
    let _guard = guard;
    let mut processed = 0usize;

    loop {
      let job = tokio::select! {
        biased;
        _ = signal.cancelled() => {
          debug!("Cancellation observed while waiting for a job.");
          break;
        }
        next = consumer.pull() => match next {
          Some(job) => job,
          None => break,
        },
      };

      if signal.is_cancelled() {
        debug!(index = job.index, "Job claimed as the signal tripped; abandoning it.");
        break;
      }

      let index = job.index;
      let unit = work.clone();
      let outcome = match AssertUnwindSafe(async move { unit(job.value).await }).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_panic_payload) => {
          warn!(index, "Unit of work panicked; contained to this job.");
          Err(EnsembleError::TaskPanicked)
        }
      };

      if results.deliver(PartialResult { index, outcome }).await.is_err() {
        debug!(index, "Result receiver dropped; worker exiting.");
        break;
      }
      processed += 1;
    }

    trace!(processed, "Worker stopped.");
  }
}
