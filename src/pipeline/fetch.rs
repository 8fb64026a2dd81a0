//! URL content retrieval
//!
//! [`Fetcher`] is the seam between the worker pool and the network: the
//! real [`HttpFetcher`] performs bounded HTTP GETs, tests substitute
//! mocks, and [`CachedFetcher`] decorates any fetcher with an LRU cache
//! over fetched bodies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};
use url::Url;

use crate::cache::LruCache;
use crate::error::{CacheError, FetchError};

/// Default per-request timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default response-size cap (2 MiB)
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 2 * 1024 * 1024;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64)";

/// Retrieves the textual content behind a URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` and return its body as text
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Validate minimal URL shape: http/https scheme and a host
///
/// # Errors
///
/// Returns [`FetchError::InvalidUrl`] otherwise.
pub fn validate_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
    let scheme_ok = matches!(parsed.scheme(), "http" | "https");
    if !scheme_ok || parsed.host_str().is_none() {
        return Err(FetchError::InvalidUrl(url.to_string()));
    }
    Ok(parsed)
}

/// HTTP fetcher with a bounded timeout and a response-size cap
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_content_length: usize,
}

impl HttpFetcher {
    /// Build a fetcher
    ///
    /// # Arguments
    ///
    /// * `timeout` - total per-request timeout
    /// * `max_content_length` - reject bodies larger than this many bytes
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Connect`] if the underlying client cannot be
    /// constructed (TLS backend initialization).
    pub fn new(timeout: Duration, max_content_length: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            max_content_length,
        })
    }

    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                duration_ms: self.timeout.as_millis() as u64,
            }
        } else if error.is_connect() {
            FetchError::Connect(error.to_string())
        } else {
            FetchError::Body(error.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = validate_url(url)?;
        trace!(url = %parsed, "Fetching");

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        // Reject early on a declared oversize body, then enforce the cap
        // while streaming in case Content-Length was absent or lied.
        if let Some(declared) = response.content_length() {
            if declared as usize > self.max_content_length {
                return Err(FetchError::TooLarge {
                    size: declared as usize,
                    max: self.max_content_length,
                });
            }
        }

        let mut body: Vec<u8> = Vec::new();
        let mut response = response;
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(e))? {
            if body.len() + chunk.len() > self.max_content_length {
                return Err(FetchError::TooLarge {
                    size: body.len() + chunk.len(),
                    max: self.max_content_length,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %url, bytes = body.len(), "Fetched");
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Fetcher decorator caching bodies in a bounded LRU cache
///
/// The cache is single-owner by design, so the decorator guards it with a
/// mutex; lookups and inserts are short critical sections around the
/// (unlocked) network fetch.
pub struct CachedFetcher {
    inner: Arc<dyn Fetcher>,
    cache: Mutex<LruCache<String, String>>,
}

impl CachedFetcher {
    /// Wrap `inner` with a cache of at most `capacity` bodies
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidCapacity`] if `capacity` is zero.
    pub fn new(inner: Arc<dyn Fetcher>, capacity: usize) -> Result<Self, CacheError> {
        Ok(Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)?),
        })
    }
}

#[async_trait]
impl Fetcher for CachedFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        if let Some(body) = self.cache.lock().get(&url.to_string()).cloned() {
            debug!(url = %url, "Cache hit");
            return Ok(body);
        }

        let body = self.inner.fetch(url).await?;
        self.cache.lock().set(url.to_string(), body.clone());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("body of {url}"))
        }
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("http://example.com/page").is_ok());
        assert!(validate_url("https://example.com").is_ok());

        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("example.com").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("http://").is_err());
    }

    #[tokio::test]
    async fn test_cached_fetcher_skips_repeat_fetches() {
        let counting = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedFetcher::new(counting.clone(), 2).unwrap();

        let first = cached.fetch("http://example.com/a").await.unwrap();
        let second = cached.fetch("http://example.com/a").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_fetcher_evicts_lru() {
        let counting = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedFetcher::new(counting.clone(), 2).unwrap();

        cached.fetch("http://example.com/a").await.unwrap();
        cached.fetch("http://example.com/b").await.unwrap();
        cached.fetch("http://example.com/c").await.unwrap(); // evicts /a
        cached.fetch("http://example.com/a").await.unwrap(); // refetch

        assert_eq!(counting.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cached_fetcher_zero_capacity() {
        let counting = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        assert!(CachedFetcher::new(counting, 0).is_err());
    }
}
