use crate::stream::{handoff, HandoffStream};

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, trace_span, Instrument};

/// Spacing between items for a target of `max_per_second`; `None` means unpaced.
pub fn pacing_interval(max_per_second: i32) -> Option<Duration> {
  if max_per_second <= 0 {
    return None;
  }
  let period = Duration::from_secs(1) / max_per_second as u32;
  Some(period.max(Duration::from_nanos(1)))
}

/// Streams `items` in order, at most `max_per_second` per second.
///
/// The first item is emitted immediately and each following one a full interval
/// later, so `n` items take at least `(n - 1) / max_per_second` seconds.
/// `max_per_second <= 0` disables pacing; an empty input yields a stream that is
/// already closed.
///
/// The pacer lives inside the producer task and is dropped with it: when the
/// input is exhausted, or as soon as the consumer drops the stream (even while
/// the producer is waiting for the next tick).
///
/// Spawns onto the current Tokio runtime and panics if called outside of one.
pub fn rate_limited_processor<T: Send + 'static>(items: Vec<T>, max_per_second: i32) -> HandoffStream<T> {
  if items.is_empty() {
    return HandoffStream::closed();
  }
  let period = pacing_interval(max_per_second);
  let (tx, output) = handoff();

  tokio::spawn(
    async move {
      let mut pacer = period.map(|period| {
        let mut pacer = interval(period);
        pacer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        pacer
      });

      for (index, item) in items.into_iter().enumerate() {
        if let Some(pacer) = pacer.as_mut() {
          tokio::select! {
            biased;
            _ = tx.closed() => {
              debug!(index, "Consumer abandoned the stream while waiting for a tick.");
              return;
            }
            _ = pacer.tick() => {}
          }
        }
        if tx.send(item).await.is_err() {
          debug!(index, "Consumer abandoned the stream.");
          return;
        }
      }
      trace!("Rate limited input exhausted.");
    }
    .instrument(trace_span!("rate_limiter", max_per_second)),
  );

  output
}
