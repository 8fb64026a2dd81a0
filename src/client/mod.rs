//! Client/producer side of the pipeline
//!
//! Streams URLs from a source into a bounded queue (so a slow server
//! backpressures the feeder) and runs a fixed set of producer tasks.
//! Each producer connects, sends one URL, half-closes, and reads the
//! JSON response.
//!
//! Transient failures (connect refused, timeouts) re-enqueue the unit at
//! the tail after a fixed delay; the retry ceiling is configurable and
//! unbounded by default. Malformed responses are logged and dropped.
//! Cancellation drains the queue without processing and returns
//! promptly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{BusyPolicy, ClientConfig};
use crate::error::{Error, NetworkError};
use crate::pipeline::{BoundedWorkQueue, Item};
use crate::protocol::Response;

/// Upper bound on one response payload
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Final accounting for one client run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientSummary {
    /// Units answered with a success outcome
    pub completed: u64,
    /// Units answered with an error outcome
    pub failed: u64,
    /// Units dropped: malformed responses, exhausted retries, busy drops,
    /// and units flushed at cancellation
    pub dropped: u64,
}

/// One queued request with its attempt count
#[derive(Debug)]
struct Job {
    url: String,
    attempts: u32,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Disposition of one delivery attempt
enum Delivery {
    Done,
    Transient(String),
    Dropped,
}

/// URL-processing client
#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
}

impl Client {
    /// Create a client, validating the configuration
    ///
    /// # Errors
    ///
    /// Fails fast on non-positive producer count or queue depth.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Process `urls`, returning the final accounting
    ///
    /// Runs until the source is exhausted or `shutdown_rx` fires; on
    /// cancellation the remaining queue is flushed unprocessed.
    pub async fn run(
        &self,
        urls: Vec<String>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<ClientSummary, Error> {
        let queue = Arc::new(BoundedWorkQueue::new(self.config.queue_depth)?);
        let counters = Arc::new(Counters::default());

        let feeder = {
            let queue = Arc::clone(&queue);
            let producers = self.config.producers;
            let mut shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                for url in urls {
                    let url = url.trim().to_string();
                    if url.is_empty() {
                        continue;
                    }
                    let job = Job { url, attempts: 0 };
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = queue.put(job) => {},
                    }
                }
                for _ in 0..producers {
                    queue.put_stop();
                }
            })
        };

        let mut producers = Vec::with_capacity(self.config.producers);
        for id in 0..self.config.producers {
            let worker = ProducerTask {
                id,
                config: self.config.clone(),
                queue: Arc::clone(&queue),
                counters: Arc::clone(&counters),
            };
            producers.push(tokio::spawn(worker.run(shutdown_rx.resubscribe())));
        }

        let _ = feeder.await;
        for producer in producers {
            let _ = producer.await;
        }

        // Cancellation may leave units (and stop markers) behind; flush
        // them so the accounting is complete.
        let leftover = queue.flush();
        if !leftover.is_empty() {
            info!(count = leftover.len(), "Flushed unprocessed units at shutdown");
            counters
                .dropped
                .fetch_add(leftover.len() as u64, Ordering::Relaxed);
        }
        queue.join().await;

        Ok(ClientSummary {
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
        })
    }
}

/// One producer task
struct ProducerTask {
    id: usize,
    config: ClientConfig,
    queue: Arc<BoundedWorkQueue<Job>>,
    counters: Arc<Counters>,
}

impl ProducerTask {
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!(producer = self.id, "Producer started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(producer = self.id, "Producer observed shutdown signal");
                    break;
                }
                item = self.queue.get() => match item {
                    Item::Stop => {
                        self.queue.task_done();
                        break;
                    },
                    Item::Unit(job) => {
                        self.handle(job).await;
                        self.queue.task_done();
                    },
                }
            }
        }
        debug!(producer = self.id, "Producer exiting");
    }

    async fn handle(&self, mut job: Job) {
        job.attempts += 1;
        match self.deliver(&job.url).await {
            Delivery::Done => {},
            Delivery::Dropped => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            },
            Delivery::Transient(reason) => {
                if self.config.retry.allows(job.attempts) {
                    warn!(
                        producer = self.id,
                        url = %job.url,
                        attempt = job.attempts,
                        reason = %reason,
                        "Transient failure, retrying after delay"
                    );
                    tokio::time::sleep(self.config.retry.delay()).await;
                    // requeue, not put: a producer blocking on its own
                    // full queue would never drain it.
                    self.queue.requeue(job);
                } else {
                    warn!(
                        producer = self.id,
                        url = %job.url,
                        attempts = job.attempts,
                        "Retry ceiling reached, dropping unit"
                    );
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
        }
    }

    /// One request/response round trip
    async fn deliver(&self, url: &str) -> Delivery {
        let payload = match self.exchange(url).await {
            Ok(bytes) => bytes,
            Err(e) => return Delivery::Transient(e.to_string()),
        };

        match Response::decode(&payload) {
            Ok(Response::Success { result }) => {
                info!(producer = self.id, url = %url, result = ?result, "URL processed");
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                Delivery::Done
            },
            Ok(Response::Error { error }) => {
                warn!(producer = self.id, url = %url, error = %error, "Server reported error");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Delivery::Done
            },
            Ok(Response::Retry { error }) => match self.config.busy_policy {
                BusyPolicy::Requeue => Delivery::Transient(error),
                BusyPolicy::Drop => {
                    warn!(producer = self.id, url = %url, "Server busy, dropping unit");
                    Delivery::Dropped
                },
            },
            Err(e) => {
                // Unparseable responses are not retried.
                warn!(producer = self.id, url = %url, error = %e, "Malformed response, dropping unit");
                Delivery::Dropped
            },
        }
    }

    /// Connect, send the URL, half-close, read the full response
    async fn exchange(&self, url: &str) -> Result<Vec<u8>, NetworkError> {
        let addr = self.config.server_addr();
        let connect = TcpStream::connect(&addr);
        let mut stream = tokio::time::timeout(self.config.connect_timeout(), connect)
            .await
            .map_err(|_| NetworkError::Timeout {
                duration_ms: self.config.connect_timeout().as_millis() as u64,
            })??;

        stream.write_all(url.as_bytes()).await?;
        // Half-close delimits the request for the server.
        stream.shutdown().await?;

        let mut payload = Vec::new();
        let mut limited = (&mut stream).take(MAX_RESPONSE_BYTES as u64);
        let read = limited.read_to_end(&mut payload);
        tokio::time::timeout(self.config.response_timeout(), read)
            .await
            .map_err(|_| NetworkError::Timeout {
                duration_ms: self.config.response_timeout().as_millis() as u64,
            })??;

        if payload.is_empty() {
            return Err(NetworkError::ConnectionClosed);
        }
        Ok(payload)
    }
}

/// Read newline-separated URLs from a file, skipping blank lines
///
/// # Errors
///
/// Returns an IO error when the file cannot be read.
pub fn read_url_file(path: impl AsRef<std::path::Path>) -> Result<Vec<String>, Error> {
    let text = std::fs::read_to_string(path.as_ref())?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
