//! URL-processing pipeline
//!
//! ```text
//! [Producer] → [BoundedWorkQueue] → [Worker Pool] → fetch → top-K → [Reply + Stats]
//! ```
//!
//! The dispatcher admits units into the bounded queue (rejecting, not
//! blocking, when full); a fixed pool of workers pulls them, fetches the
//! URL through a [`Fetcher`], reduces the body to its top-K word
//! frequencies, and reports the outcome back on the originating
//! connection. Shutdown drains cooperatively through stop markers.

pub mod fetch;
pub mod queue;
pub mod stats;
pub mod topk;
pub mod worker;

pub use fetch::{
    CachedFetcher, Fetcher, HttpFetcher, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_CONTENT_LENGTH,
};
pub use queue::{BoundedWorkQueue, Item};
pub use stats::{run_stats_reporter, PipelineStats, StatsSnapshot};
pub use topk::top_k_words;
pub use worker::{WorkerConfig, WorkerPool};

use tokio::net::TcpStream;

/// One unit of work flowing through the pipeline
///
/// Created by the dispatcher, owned by the queue while in transit, owned
/// by exactly one worker during processing, and discarded after the
/// outcome is reported.
#[derive(Debug)]
pub struct WorkUnit {
    /// The URL to process
    pub url: String,
    /// Originating connection to answer on, if any
    pub conn: Option<TcpStream>,
}

impl WorkUnit {
    /// A unit with no originating connection (internal or test use)
    pub fn detached(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            conn: None,
        }
    }
}

/// Terminal disposition of one processing attempt
#[derive(Debug)]
pub enum Outcome {
    /// Top-K token counts, most frequent first
    Success(Vec<(String, u64)>),
    /// Terminal failure description
    Error(String),
    /// Transient failure; the unit should be re-queued
    Retry,
}
