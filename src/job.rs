use crate::error::EnsembleError;

/// An input value together with its position in the original collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job<J> {
  pub index: usize,
  pub value: J,
}

/// The outcome of one job, produced by exactly one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult<R> {
  pub index: usize,
  pub outcome: Result<R, EnsembleError>,
}

impl<R> PartialResult<R> {
  pub(crate) fn ok(index: usize, value: R) -> Self {
    Self {
      index,
      outcome: Ok(value),
    }
  }

  pub fn value(self) -> Option<R> {
    self.outcome.ok()
  }
}

/// Tags every input with its index.
pub(crate) fn enumerate_jobs<J>(values: impl IntoIterator<Item = J>) -> Vec<Job<J>> {
  values
    .into_iter()
    .enumerate()
    .map(|(index, value)| Job { index, value })
    .collect()
}

/// Restores input order for results gathered from concurrent workers.
pub fn reassemble<R>(mut results: Vec<PartialResult<R>>) -> Vec<PartialResult<R>> {
  results.sort_by_key(|result| result.index);
  results
}
