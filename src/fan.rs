//! Fan-out across workers with private output streams, fan-in through a merge stage.

use crate::barrier::CompletionBarrier;
use crate::config::PoolConfig;
use crate::job::enumerate_jobs;
use crate::queue::{JobConsumer, JobQueue};
use crate::signal::CancelSignal;
use crate::stream::{handoff, HandoffStream};

use tracing::{debug, trace, trace_span, Instrument};

/// The transform every worker applies in [`fan_out_fan_in`].
pub fn triple(value: i64) -> i64 {
  value.wrapping_mul(3)
}

/// Triples every number on `num_workers` workers and merges their outputs.
///
/// Workers claim numbers from one shared queue and each writes to its own
/// stream; [`merge`] folds those streams into one. Output order is unspecified.
/// `num_workers <= 0` yields an empty result.
pub async fn fan_out_fan_in(numbers: &[i64], num_workers: i32) -> Vec<i64> {
  let config = PoolConfig::new(num_workers).with_name("fan_out_fan_in");
  let worker_count = config.effective_workers(numbers.len());
  if worker_count == 0 {
    return Vec::new();
  }

  let (producer, consumer) = JobQueue::new(config.job_queue_capacity()).split();
  let jobs = enumerate_jobs(numbers.iter().copied());
  tokio::spawn(
    async move {
      // Never tripped: the whole input is always enqueued.
      let signal = CancelSignal::new();
      for job in jobs {
        if producer.push(job, &signal).await.is_err() {
          debug!("All workers are gone; producer stopping.");
          break;
        }
      }
      producer.close();
    }
    .instrument(trace_span!("fan_out_producer", pool_name = config.name())),
  );

  let outputs: Vec<HandoffStream<i64>> = (0..worker_count)
    .map(|worker| spawn_fan_out_worker(worker, consumer.clone()))
    .collect();
  drop(consumer);

  merge(outputs).drain().await
}

fn spawn_fan_out_worker(worker: usize, consumer: JobConsumer<i64>) -> HandoffStream<i64> {
  let (tx, output) = handoff();
  tokio::spawn(
    async move {
      let mut processed = 0usize;
      while let Some(job) = consumer.pull().await {
        if tx.send(triple(job.value)).await.is_err() {
          debug!(index = job.index, "Merge stage is gone; worker stopping.");
          break;
        }
        processed += 1;
      }
      trace!(processed, "Fan-out worker finished.");
    }
    .instrument(trace_span!("fan_out_worker", worker)),
  );
  output
}

/// Merges several streams into one.
///
/// One forwarder task per input copies values into the merged stream. A
/// coordinator holds the merged sender and drops it only after every forwarder
/// has finished, so the merged stream ends exactly when all inputs have ended.
/// Values from one input keep their relative order; interleaving across inputs
/// is unspecified.
///
/// Spawns onto the current Tokio runtime and panics if called outside of one.
pub fn merge<T: Send + 'static>(inputs: Vec<HandoffStream<T>>) -> HandoffStream<T> {
  let (merged_tx, merged) = handoff();
  let barrier = CompletionBarrier::new();

  for (source, mut input) in inputs.into_iter().enumerate() {
    let guard = barrier.enter();
    let tx = merged_tx.clone();
    tokio::spawn(
      async move {
        let _guard = guard;
        while let Some(value) = input.recv().await {
          if tx.send(value).await.is_err() {
            debug!("Merged stream abandoned; forwarder stopping.");
            return;
          }
        }
      }
      .instrument(trace_span!("fan_in_forwarder", source)),
    );
  }

  tokio::spawn(async move {
    barrier.wait().await;
    drop(merged_tx);
    trace!("All forwarders finished; merged stream closed.");
  });

  merged
}
