//! Master/dispatcher: TCP accept loop, admission control, worker pool
//!
//! The server accepts one URL request per connection, admits it into the
//! bounded work queue, and lets the worker pool answer on the same
//! connection. A full queue yields an immediate "Server busy" retry
//! response; the accept loop never blocks on admission.
//!
//! Shutdown is cooperative and idempotent: stop accepting, enqueue one
//! stop marker per worker, wait (bounded) for admitted work to drain,
//! release the listener. The worker broadcast fires only after the
//! bounded wait expires; until then workers keep answering the
//! connections already admitted.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, NetworkError};
use crate::pipeline::{
    run_stats_reporter, BoundedWorkQueue, CachedFetcher, Fetcher, HttpFetcher, PipelineStats,
    StatsSnapshot, WorkUnit, WorkerConfig, WorkerPool,
};
use crate::protocol::{parse_request, Response};

/// Upper bound on one request payload; URLs are short
const MAX_REQUEST_BYTES: usize = 4096;

/// Shared dispatcher state
struct ServerInner {
    config: ServerConfig,
    queue: Arc<BoundedWorkQueue<WorkUnit>>,
    stats: Arc<PipelineStats>,
    /// Escape hatch for workers still running after the bounded drain
    shutdown_tx: broadcast::Sender<()>,
    /// Wakes the accept loop; `notify_one` stores a permit, so a signal
    /// sent before the loop waits is not lost
    accept_stop: Notify,
    shutting_down: AtomicBool,
}

impl ServerInner {
    /// Signal shutdown once; later calls are no-ops
    fn signal_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Shutting down server");
            self.accept_stop.notify_one();
        }
    }
}

/// Handle for stopping a running server from another task
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<ServerInner>,
}

impl ServerHandle {
    /// Request a graceful shutdown; idempotent
    pub fn shutdown(&self) {
        self.inner.signal_shutdown();
    }

    /// Current statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}

/// The URL-processing server
pub struct Server {
    inner: Arc<ServerInner>,
    listener: TcpListener,
    local_addr: SocketAddr,
    pool: WorkerPool,
    stats_task: JoinHandle<()>,
}

impl Server {
    /// Bind the listener and start the worker pool
    ///
    /// Uses the default HTTP fetcher, wrapped in an LRU body cache when
    /// `cache_capacity` is configured.
    ///
    /// # Errors
    ///
    /// Fails fast on invalid configuration or bind failure; no partial
    /// server starts.
    pub async fn bind(config: ServerConfig) -> Result<Self, Error> {
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(
            config.fetch_timeout(),
            config.max_content_length,
        )?);
        Self::bind_with_fetcher(config, fetcher).await
    }

    /// Bind with a caller-supplied fetcher (tests inject mocks here)
    ///
    /// # Errors
    ///
    /// Same as [`Server::bind`].
    pub async fn bind_with_fetcher(
        config: ServerConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let fetcher: Arc<dyn Fetcher> = match config.cache_capacity {
            Some(capacity) => Arc::new(CachedFetcher::new(fetcher, capacity)?),
            None => fetcher,
        };

        let addr = resolve_addr(&config.listen_addr())?;
        let listener = bind_listener(addr)?;
        let local_addr = listener.local_addr().map_err(NetworkError::Io)?;

        let queue = Arc::new(BoundedWorkQueue::new(config.queue_depth)?);
        let stats = Arc::new(PipelineStats::new());
        let (shutdown_tx, _) = broadcast::channel(1);

        let pool = WorkerPool::spawn(
            config.workers,
            WorkerConfig {
                top_k: config.top_k,
                transient_policy: config.transient_policy,
                reply_timeout: config.request_timeout(),
            },
            Arc::clone(&queue),
            fetcher,
            Arc::clone(&stats),
            &shutdown_tx,
        )?;

        let stats_task = tokio::spawn(run_stats_reporter(
            Arc::clone(&stats),
            config.stats_interval(),
            shutdown_tx.subscribe(),
        ));

        info!(
            addr = %local_addr,
            workers = config.workers,
            queue_depth = config.queue_depth,
            "Server listening"
        );

        Ok(Self {
            inner: Arc::new(ServerInner {
                config,
                queue,
                stats,
                shutdown_tx,
                accept_stop: Notify::new(),
                shutting_down: AtomicBool::new(false),
            }),
            listener,
            local_addr,
            pool,
            stats_task,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for stopping the server from another task
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Run the accept loop until shutdown, then drain
    ///
    /// Returns the final statistics snapshot.
    pub async fn run(self) -> StatsSnapshot {
        loop {
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = self.inner.accept_stop.notified() => break,
                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Connection accepted");
                        let inner = Arc::clone(&self.inner);
                        tokio::spawn(async move {
                            handle_connection(inner, stream, peer).await;
                        });
                    },
                    Err(e) => {
                        // Common causes: EMFILE, ENOMEM. Keep accepting,
                        // but pause briefly to avoid a tight loop.
                        error!(error = %e, "Accept error");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    },
                }
            }
        }

        self.drain().await
    }

    /// Stop accepting and wait (bounded) for admitted work to drain
    ///
    /// Stop markers sit behind every admitted unit, so workers answer
    /// everything already in the queue before exiting. The broadcast is
    /// sent only if the bounded wait expires.
    async fn drain(self) -> StatsSnapshot {
        self.inner.signal_shutdown();
        drop(self.listener);

        for _ in 0..self.pool.len() {
            self.inner.queue.put_stop();
        }

        let timeout = self.inner.config.shutdown_timeout();
        if tokio::time::timeout(timeout, self.inner.queue.join())
            .await
            .is_err()
        {
            warn!("Queue did not drain within shutdown timeout, aborting in-flight work");
            let _ = self.inner.shutdown_tx.send(());
        }
        self.pool.shutdown(timeout).await;
        self.stats_task.abort();

        let snapshot = self.inner.stats.snapshot();
        info!(
            processed = snapshot.processed,
            errors = snapshot.errors,
            rejected = snapshot.rejected,
            "Final count: {} URLs processed",
            snapshot.processed
        );
        snapshot
    }
}

/// Read one request, admit it or reject it
async fn handle_connection(inner: Arc<ServerInner>, mut stream: TcpStream, peer: SocketAddr) {
    let request = match read_request(&mut stream, inner.config.request_timeout()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(peer = %peer, error = %e, "Failed to read request");
            return;
        },
    };

    let url = match parse_request(&request) {
        Ok(url) => url,
        Err(e) => {
            debug!(peer = %peer, error = %e, "Malformed request");
            respond(&mut stream, Response::error(e.to_string())).await;
            return;
        },
    };

    let unit = WorkUnit {
        url,
        conn: Some(stream),
    };
    match inner.queue.try_put(unit) {
        Ok(()) => {
            inner.stats.record_accepted();
            debug!(peer = %peer, "Request accepted");
        },
        Err(rejected) => {
            inner.stats.record_rejected();
            warn!(peer = %peer, url = %rejected.url, "Queue full, request rejected");
            if let Some(mut conn) = rejected.conn {
                respond(&mut conn, Response::busy()).await;
            }
        },
    }
}

/// Read the request payload until EOF or timeout
///
/// Clients half-close after sending; a client that does not is served
/// with whatever arrived before the timeout.
async fn read_request(
    stream: &mut TcpStream,
    timeout: Duration,
) -> Result<Vec<u8>, NetworkError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    let read_all = async {
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            if buffer.len() + n > MAX_REQUEST_BYTES {
                return Err(NetworkError::InvalidRequest(format!(
                    "request exceeds {MAX_REQUEST_BYTES} bytes"
                )));
            }
            buffer.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    };

    match tokio::time::timeout(timeout, read_all).await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => return Err(e),
        Err(_) if !buffer.is_empty() => {},
        Err(_) => {
            return Err(NetworkError::Timeout {
                duration_ms: timeout.as_millis() as u64,
            })
        },
    }

    if buffer.is_empty() {
        return Err(NetworkError::ConnectionClosed);
    }
    Ok(buffer)
}

/// Best-effort reply; failures are logged by callers where they matter
async fn respond(stream: &mut TcpStream, response: Response) {
    if let Err(e) = stream.write_all(&response.encode()).await {
        debug!(error = %e, "Failed to send response");
    }
    let _ = stream.shutdown().await;
}

/// Resolve `host:port` to a socket address
fn resolve_addr(addr: &str) -> Result<SocketAddr, Error> {
    use std::net::ToSocketAddrs;
    addr.to_socket_addrs()
        .map_err(|e| Error::Configuration(format!("cannot resolve {addr}: {e}")))?
        .next()
        .ok_or_else(|| Error::Configuration(format!("cannot resolve {addr}")))
}

/// Bind with SO_REUSEADDR so restarts do not trip over TIME_WAIT
fn bind_listener(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let bind_err = |e: std::io::Error| NetworkError::BindFailed {
        addr,
        reason: e.to_string(),
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(128).map_err(bind_err)?;

    let std_listener: std::net::TcpListener = socket.into();
    std_listener.set_nonblocking(true).map_err(bind_err)?;
    TcpListener::from_std(std_listener).map_err(bind_err)
}
