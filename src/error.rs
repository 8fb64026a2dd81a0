//! Error types for the cache and the URL-processing pipeline

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Work queue error
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Fetch error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias for results using the crate error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by [`crate::cache::LruCache`] construction
///
/// Cache lookups never error: a miss is a normal `None` result, not an
/// error condition.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CacheError {
    /// Capacity must be a positive integer
    #[error("Cache capacity must be positive, got {0}")]
    InvalidCapacity(usize),
}

/// Errors raised by [`crate::pipeline::BoundedWorkQueue`]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// Maximum depth must be a positive integer
    #[error("Queue depth must be positive, got {0}")]
    InvalidDepth(usize),
}

/// Errors raised while fetching a URL
///
/// The transient/content split drives retry policy: transient failures
/// (timeout, connection) become a `Retry` outcome, everything else is a
/// terminal `Error` outcome for the unit.
#[derive(Error, Debug)]
pub enum FetchError {
    /// URL failed scheme/host validation
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),

    /// Request did not complete within the configured timeout
    #[error("Fetch timed out after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Server answered with a non-success status code
    #[error("HTTP error: status {0}")]
    Status(u16),

    /// Response body exceeds the configured size cap
    #[error("Content too large: {size} > {max} bytes")]
    TooLarge {
        /// Observed (or declared) body size in bytes
        size: usize,
        /// Maximum allowed body size in bytes
        max: usize,
    },

    /// Response body could not be read
    #[error("Failed to read body: {0}")]
    Body(String),
}

impl FetchError {
    /// Whether this failure is worth retrying
    ///
    /// Connection errors and timeouts are transient; validation and
    /// content errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout { .. } | FetchError::Connect(_))
    }
}

/// Network layer errors for the dispatcher and the client
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Bind failed at startup
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed {
        /// Address that failed to bind
        addr: SocketAddr,
        /// Reason for the bind failure
        reason: String,
    },

    /// Operation timed out
    #[error("Timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Peer closed the connection before a full message arrived
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Request was not valid UTF-8 or was empty
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Response was not a valid protocol message
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// IO error (connecting, accepting, reading, writing)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
