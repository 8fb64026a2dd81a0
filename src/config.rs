//! Configuration for the server and the client
//!
//! Both sides load an optional TOML file and apply CLI overrides on top;
//! every field has a sensible default. `validate()` fails fast on
//! non-positive counts and depths so no partially configured process
//! ever starts.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How workers handle transient fetch failures (timeout, connection)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransientPolicy {
    /// Answer the requester with an error outcome (the requester owns the
    /// retry decision)
    #[default]
    Report,
    /// Re-append the unit at the queue tail and keep the requester
    /// waiting
    Requeue,
}

/// How the client handles a "Server busy" (retry-status) response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Treat busy like a transient failure: delay, then re-enqueue
    #[default]
    Requeue,
    /// Drop the unit and move on
    Drop,
}

/// Server (dispatcher + worker pool) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen host
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker tasks
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Number of top tokens to report per URL
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Maximum work-queue depth before admission control rejects
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Per-fetch timeout in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Response-size cap in bytes
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Timeout for reading one request off an accepted connection,
    /// seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Optional LRU cache over fetched bodies (entries); disabled when
    /// absent
    #[serde(default)]
    pub cache_capacity: Option<usize>,

    /// Transient-failure handling in the workers
    #[serde(default)]
    pub transient_policy: TransientPolicy,

    /// Interval between statistics log lines, seconds
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    /// Bound on waiting for in-flight work during shutdown, seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            top_k: default_top_k(),
            queue_depth: default_queue_depth(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_content_length: default_max_content_length(),
            request_timeout_secs: default_request_timeout_secs(),
            cache_capacity: None,
            transient_policy: TransientPolicy::default(),
            stats_interval_secs: default_stats_interval_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the file cannot be read or
    /// parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&text).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Validate the configuration, failing fast on invalid values
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first offending field.
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::Configuration("workers must be > 0".to_string()));
        }
        if self.top_k == 0 {
            return Err(Error::Configuration("top_k must be > 0".to_string()));
        }
        if self.queue_depth == 0 {
            return Err(Error::Configuration("queue_depth must be > 0".to_string()));
        }
        if self.max_content_length == 0 {
            return Err(Error::Configuration(
                "max_content_length must be > 0".to_string(),
            ));
        }
        if self.cache_capacity == Some(0) {
            return Err(Error::Configuration(
                "cache_capacity must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Listen address as `host:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-fetch timeout
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Request read timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Statistics reporting interval
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Shutdown wait bound
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Fixed-delay retry policy for the client
///
/// `max_attempts` of `None` retries without a ceiling; set one
/// explicitly where an unreachable server must not stall a batch
/// forever.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RetryPolicy {
    /// Fixed delay between attempts, milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,

    /// Maximum attempts per unit; `None` means unbounded
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay_ms: default_retry_delay_ms(),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay between attempts
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Whether another attempt is allowed after `attempts` tries
    pub fn allows(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }
}

/// Client (producer) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Server host
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of concurrent producer tasks
    #[serde(default = "default_producers")]
    pub producers: usize,

    /// Depth of the client-side work queue (backpressure on the feeder)
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Connect timeout, seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Response read timeout, seconds
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Handling of "Server busy" responses
    #[serde(default)]
    pub busy_policy: BusyPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            producers: default_producers(),
            queue_depth: default_queue_depth(),
            connect_timeout_secs: default_connect_timeout_secs(),
            response_timeout_secs: default_response_timeout_secs(),
            retry: RetryPolicy::default(),
            busy_policy: BusyPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Validate the configuration, failing fast on invalid values
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first offending field.
    pub fn validate(&self) -> Result<(), Error> {
        if self.producers == 0 {
            return Err(Error::Configuration("producers must be > 0".to_string()));
        }
        if self.queue_depth == 0 {
            return Err(Error::Configuration("queue_depth must be > 0".to_string()));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(Error::Configuration(
                "retry.max_attempts must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Server address as `host:port`
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Response read timeout
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_workers() -> usize {
    4
}

fn default_top_k() -> usize {
    10
}

fn default_queue_depth() -> usize {
    100
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_max_content_length() -> usize {
    2 * 1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_stats_interval_secs() -> u64 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_producers() -> usize {
    1
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_response_timeout_secs() -> u64 {
    10
}

fn default_retry_delay_ms() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ServerConfig::default().validate().is_ok());
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_server_rejects_zero_fields() {
        let mut config = ServerConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.queue_depth = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.cache_capacity = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_rejects_zero_fields() {
        let mut config = ClientConfig::default();
        config.producers = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.retry.max_attempts = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_ceiling() {
        let unbounded = RetryPolicy::default();
        assert!(unbounded.allows(0));
        assert!(unbounded.allows(1_000_000));

        let capped = RetryPolicy {
            delay_ms: 10,
            max_attempts: Some(3),
        };
        assert!(capped.allows(2));
        assert!(!capped.allows(3));
    }

    #[test]
    fn test_toml_with_partial_fields() {
        let config: ServerConfig = toml::from_str(
            r#"
            port = 6000
            workers = 8
            transient_policy = "requeue"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.workers, 8);
        assert_eq!(config.transient_policy, TransientPolicy::Requeue);
        // Unspecified fields take defaults.
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.top_k, 10);
    }

    #[test]
    fn test_listen_addr_format() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
    }
}
