//! Tokio-based primitives for running a known collection of independent units
//! of work under bounded concurrency, with explicit policies for cancellation,
//! deadlines, rate pacing, retries and result aggregation.
//!
//! Every entry point is a plain async function (or a function returning a
//! stream) from an input collection to a result; nothing is kept between calls.

mod barrier;
mod bounded;
mod config;
mod deadline;
mod distributor;
mod error;
mod fan;
mod fetch;
mod job;
pub mod patterns;
mod pipeline;
mod queue;
mod rate;
mod reducer;
mod signal;
mod stream;
mod worker_pool;

pub use barrier::{CompletionBarrier, CompletionGuard};
pub use bounded::concurrent_downloader;
pub use config::{PoolConfig, RetryPolicy};
pub use deadline::{count_within_deadline, process_with_timeout, ITEM_PROCESSING_COST};
pub use distributor::{PoolOutcome, WorkDistributor};
pub use error::{EnsembleError, Interrupted};
pub use fan::{fan_out_fan_in, merge, triple};
pub use fetch::{fetch_urls, fetch_with_retry, is_success_status, Fetcher, MockFetcher};
pub use job::{reassemble, Job, PartialResult};
pub use pipeline::{filter_even, generate, process_pipeline, square};
pub use rate::{pacing_interval, rate_limited_processor};
pub use reducer::{parallel_sum, square_sum};
pub use signal::{CancelSignal, SignalState};
pub use stream::HandoffStream;
pub use worker_pool::{double, run_pool, worker_pool, worker_pool_with_cancel};
