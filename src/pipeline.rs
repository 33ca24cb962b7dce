//! Three-stage streaming pipeline: `generate -> square -> filter_even`.
//!
//! Every stage runs in its own task, owns its output sender outright, and drops
//! it only once its input has ended. The downstream consumer therefore always
//! sees the end of the stream, and no stage can close a stream it does not own.
//!
//! All functions here spawn onto the current Tokio runtime and panic if called
//! outside of one.

use crate::stream::{handoff, HandoffStream};

use tracing::{debug, trace, trace_span, Instrument};

/// Streams `1..=n` in order. `n <= 0` yields a stream that is already closed.
pub fn generate(n: i64) -> HandoffStream<i64> {
  if n <= 0 {
    return HandoffStream::closed();
  }
  let (tx, output) = handoff();
  tokio::spawn(
    async move {
      for value in 1..=n {
        if tx.send(value).await.is_err() {
          debug!(value, "Consumer abandoned the stream; generator stopping.");
          return;
        }
      }
      trace!("Generator exhausted.");
    }
    .instrument(trace_span!("pipeline_stage", stage = "generate")),
  );
  output
}

/// Squares every value, preserving order.
pub fn square(input: HandoffStream<i64>) -> HandoffStream<i64> {
  spawn_stage(input, "square", |value| Some(value.wrapping_mul(value)))
}

/// Forwards only even values, preserving order.
pub fn filter_even(input: HandoffStream<i64>) -> HandoffStream<i64> {
  spawn_stage(input, "filter_even", |value| (value % 2 == 0).then_some(value))
}

/// `filter_even(square(generate(n)))`: the even squares among `1²..=n²`, ascending.
pub fn process_pipeline(n: i64) -> HandoffStream<i64> {
  filter_even(square(generate(n)))
}

fn spawn_stage<F>(mut input: HandoffStream<i64>, stage: &'static str, mut step: F) -> HandoffStream<i64>
where
  F: FnMut(i64) -> Option<i64> + Send + 'static,
{
  let (tx, output) = handoff();
  tokio::spawn(
    async move {
      loop {
        let value = tokio::select! {
          biased;
          _ = tx.closed() => {
            debug!("Downstream abandoned the stream; stage stopping.");
            break;
          }
          next = input.recv() => match next {
            Some(value) => value,
            None => break,
          },
        };
        if let Some(out) = step(value) {
          if tx.send(out).await.is_err() {
            debug!("Downstream abandoned the stream; stage stopping.");
            break;
          }
        }
      }
      // `input` drops with this task, which in turn lets the upstream stage observe the end.
      trace!("Stage finished.");
    }
    .instrument(trace_span!("pipeline_stage", stage)),
  );
  output
}
