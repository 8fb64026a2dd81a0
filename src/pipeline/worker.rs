//! Worker tasks
//!
//! Each worker loops over the shared queue: dequeue, validate, fetch,
//! reduce, report, acknowledge. Per-unit failures are isolated to the
//! unit's own outcome; a worker never terminates the pool because one
//! unit went bad. Workers block on the queue raced against the shutdown
//! broadcast, so a stop signal is observed without polling.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::queue::{BoundedWorkQueue, Item};
use super::stats::PipelineStats;
use super::topk::top_k_words;
use super::{Outcome, WorkUnit};
use crate::config::TransientPolicy;
use crate::pipeline::fetch::Fetcher;
use crate::protocol::Response;

/// Per-worker settings, fixed at pool construction
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of top tokens to report per URL
    pub top_k: usize,
    /// How to handle transient fetch failures
    pub transient_policy: TransientPolicy,
    /// Timeout for writing a reply back to the requester
    pub reply_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            transient_policy: TransientPolicy::Report,
            reply_timeout: Duration::from_secs(5),
        }
    }
}

/// A single worker
struct Worker {
    id: usize,
    config: WorkerConfig,
    queue: Arc<BoundedWorkQueue<WorkUnit>>,
    fetcher: Arc<dyn Fetcher>,
    stats: Arc<PipelineStats>,
}

impl Worker {
    /// Pull and process units until a stop marker or shutdown signal
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!(worker = self.id, "Worker started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(worker = self.id, "Worker observed shutdown signal");
                    break;
                }
                item = self.queue.get() => match item {
                    Item::Stop => {
                        self.queue.task_done();
                        debug!(worker = self.id, "Worker observed stop marker");
                        break;
                    },
                    Item::Unit(unit) => {
                        self.process(unit).await;
                        self.queue.task_done();
                    },
                }
            }
        }
        debug!(worker = self.id, "Worker exiting");
    }

    /// Fetch, reduce, and report one unit
    async fn process(&self, unit: WorkUnit) {
        let WorkUnit { url, conn } = unit;

        let outcome = match self.fetcher.fetch(&url).await {
            Ok(body) => Outcome::Success(top_k_words(&body, self.config.top_k)),
            Err(e) if e.is_transient() => match self.config.transient_policy {
                TransientPolicy::Report => Outcome::Error(e.to_string()),
                TransientPolicy::Requeue => Outcome::Retry,
            },
            Err(e) => Outcome::Error(e.to_string()),
        };

        match outcome {
            Outcome::Retry => {
                warn!(worker = self.id, url = %url, "Transient failure, re-queueing unit");
                // requeue, not put: a worker blocking on its own full
                // queue would never drain it.
                self.queue.requeue(WorkUnit { url, conn });
            },
            Outcome::Success(counts) => {
                info!(worker = self.id, url = %url, "URL processed");
                self.stats.record_processed();
                self.reply(conn, &url, Response::success(counts)).await;
            },
            Outcome::Error(message) => {
                warn!(worker = self.id, url = %url, error = %message, "URL failed");
                self.stats.record_error();
                self.reply(conn, &url, Response::error(message)).await;
            },
        }
    }

    /// Deliver the response on the originating connection, if any
    ///
    /// Delivery failure is logged, never escalated: one bad client must
    /// not take down the pool.
    async fn reply(&self, conn: Option<tokio::net::TcpStream>, url: &str, response: Response) {
        let Some(mut stream) = conn else {
            return;
        };

        let write = async {
            stream.write_all(&response.encode()).await?;
            stream.shutdown().await
        };
        match tokio::time::timeout(self.config.reply_timeout, write).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                warn!(worker = self.id, url = %url, error = %e, "Failed to send response");
            },
            Err(_) => {
                warn!(worker = self.id, url = %url, "Response delivery timed out");
            },
        }
    }
}

/// Fixed pool of workers over a shared queue
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers
    ///
    /// # Errors
    ///
    /// Fails fast with a configuration error when `count` is zero; no
    /// workers are spawned.
    pub fn spawn(
        count: usize,
        config: WorkerConfig,
        queue: Arc<BoundedWorkQueue<WorkUnit>>,
        fetcher: Arc<dyn Fetcher>,
        stats: Arc<PipelineStats>,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> Result<Self, crate::error::Error> {
        if count == 0 {
            return Err(crate::error::Error::Configuration(
                "worker count must be positive".to_string(),
            ));
        }

        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let worker = Worker {
                id,
                config: config.clone(),
                queue: Arc::clone(&queue),
                fetcher: Arc::clone(&fetcher),
                stats: Arc::clone(&stats),
            };
            handles.push(tokio::spawn(worker.run(shutdown_tx.subscribe())));
        }

        info!(workers = count, "Worker pool started");
        Ok(Self { handles })
    }

    /// Number of workers in the pool
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool holds no workers
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit, bounded by `timeout`
    ///
    /// Workers still running when the bound expires are aborted.
    pub async fn shutdown(self, timeout: Duration) {
        for mut handle in self.handles {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(_) => {},
                Err(_) => {
                    warn!("Worker did not exit within shutdown timeout");
                    handle.abort();
                },
            }
        }
    }
}
