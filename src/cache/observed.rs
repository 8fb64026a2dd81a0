//! Observable LRU cache
//!
//! Wraps [`LruCache`] with structured event emission: every hit, miss,
//! insertion, update, eviction, and promotion produces one [`CacheEvent`]
//! delivered to a consumer-supplied [`EventSink`]. Emission never alters
//! the cache's returned values or invariants; with a discarding sink the
//! wrapper behaves exactly like the plain cache.
//!
//! Sinks are explicit values passed at construction, not global logger
//! state. Filtering composes at the call site: wrap any sink in
//! [`FilteredSink`] with a predicate over the rendered message text.

use std::fmt::Display;
use std::hash::Hash;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::lru::LruCache;
use crate::error::CacheError;

/// Cache operation that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    /// Key found on `get`
    Hit,
    /// Key absent on `get`
    Miss,
    /// New key inserted
    Insert,
    /// Existing key's value replaced
    Update,
    /// Tail entry removed at capacity
    Evict,
    /// Entry moved to the head of the recency list
    Promote,
    /// Debug snapshot of the list order after a state change
    Snapshot,
}

/// Severity of an event, mirrored onto `tracing` levels by [`TracingSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    /// Promotions and snapshots
    Debug,
    /// Hits, insertions, updates
    Info,
    /// Misses and evictions
    Warn,
}

/// One structured cache event
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Operation that produced the event
    pub op: CacheOp,
    /// Severity
    pub level: EventLevel,
    /// Rendered key
    pub key: String,
    /// Rendered value, where the operation carries one
    pub value: Option<String>,
    /// Head-to-tail list summary (`k:v -> k:v`), debug events only
    pub snapshot: Option<String>,
}

impl CacheEvent {
    /// Render the event as a single log line
    pub fn render(&self) -> String {
        match self.op {
            CacheOp::Hit => format!(
                "Got key '{}' with value '{}'",
                self.key,
                self.value.as_deref().unwrap_or("")
            ),
            CacheOp::Miss => format!("Key '{}' not found in cache", self.key),
            CacheOp::Insert => format!(
                "Added new key '{}' with value '{}'",
                self.key,
                self.value.as_deref().unwrap_or("")
            ),
            CacheOp::Update => format!(
                "Updated key '{}' with value '{}'",
                self.key,
                self.value.as_deref().unwrap_or("")
            ),
            CacheOp::Evict => format!(
                "Cache limit reached, evicted node with key '{}'",
                self.key
            ),
            CacheOp::Promote => format!("Moved node with key '{}' to head", self.key),
            CacheOp::Snapshot => format!(
                "Cache state after '{}': {}",
                self.key,
                self.snapshot.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Consumer-supplied destination for cache events
pub trait EventSink: Send + Sync {
    /// Deliver one event
    fn emit(&self, event: &CacheEvent);
}

/// Sink that forwards events to `tracing` at their level
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &CacheEvent) {
        let message = event.render();
        match event.level {
            EventLevel::Debug => debug!(op = ?event.op, key = %event.key, "{message}"),
            EventLevel::Info => info!(op = ?event.op, key = %event.key, "{message}"),
            EventLevel::Warn => warn!(op = ?event.op, key = %event.key, "{message}"),
        }
    }
}

/// Sink that captures events in memory, for tests and inspection
#[derive(Debug, Default)]
pub struct VecSink {
    events: Mutex<Vec<CacheEvent>>,
}

impl VecSink {
    /// Create an empty capture sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain and return all captured events
    pub fn take(&self) -> Vec<CacheEvent> {
        std::mem::take(&mut self.events.lock())
    }

    /// Snapshot of captured events
    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for VecSink {
    fn emit(&self, event: &CacheEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Sink decorator applying a predicate over the rendered message text
///
/// Events whose rendered text fails the predicate are dropped before
/// reaching the inner sink. Filtering never affects cache semantics.
pub struct FilteredSink<S> {
    inner: S,
    predicate: Box<dyn Fn(&str) -> bool + Send + Sync>,
}

impl<S: EventSink> FilteredSink<S> {
    /// Wrap `inner`, forwarding only events whose rendered text passes
    /// `predicate`
    pub fn new(inner: S, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner,
            predicate: Box::new(predicate),
        }
    }

    /// Access the wrapped sink
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: EventSink> EventSink for FilteredSink<S> {
    fn emit(&self, event: &CacheEvent) {
        if (self.predicate)(&event.render()) {
            self.inner.emit(event);
        }
    }
}

impl<S: EventSink> std::fmt::Debug for FilteredSink<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilteredSink").finish_non_exhaustive()
    }
}

/// LRU cache with structured event emission
///
/// Same contract as [`LruCache`]; see the module docs for the event
/// model. Keys and values must render with `Display` so events and
/// snapshots can carry them.
#[derive(Debug)]
pub struct ObservedLruCache<K, V, S> {
    inner: LruCache<K, V>,
    sink: S,
}

impl<K, V, S> ObservedLruCache<K, V, S>
where
    K: Eq + Hash + Clone + Display,
    V: Display,
    S: EventSink,
{
    /// Create a cache with the given capacity and event sink
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize, sink: S) -> Result<Self, CacheError> {
        Ok(Self {
            inner: LruCache::new(capacity)?,
            sink,
        })
    }

    /// Look up a key, promoting it on a hit
    ///
    /// Emits `Miss` on absence; `Promote` (when the entry actually moved),
    /// `Hit`, and a `Snapshot` on presence.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if !self.inner.contains(key) {
            self.emit(CacheOp::Miss, EventLevel::Warn, key.to_string(), None);
            return None;
        }

        let was_head = self.inner.is_head(key);
        // Split borrows: render the value before handing out the reference.
        let rendered = self.inner.get(key).map(|v| v.to_string());
        if !was_head {
            self.emit(
                CacheOp::Promote,
                EventLevel::Debug,
                key.to_string(),
                None,
            );
        }
        self.emit(CacheOp::Hit, EventLevel::Info, key.to_string(), rendered);
        self.snapshot(format!("get {key}"));

        self.inner.get(key)
    }

    /// Insert or update a key
    ///
    /// Emits `Update` for existing keys; `Evict` (when capacity forced
    /// one out) and `Insert` for new keys; always followed by a
    /// `Snapshot`.
    pub fn set(&mut self, key: K, value: V) {
        let rendered = value.to_string();
        if self.inner.contains(&key) {
            self.inner.set(key.clone(), value);
            self.emit(
                CacheOp::Update,
                EventLevel::Info,
                key.to_string(),
                Some(rendered),
            );
            self.snapshot(format!("update {key}"));
            return;
        }

        let evicted = self.inner.set(key.clone(), value);
        if let Some((old_key, _)) = evicted {
            self.emit(
                CacheOp::Evict,
                EventLevel::Warn,
                old_key.to_string(),
                None,
            );
        }
        self.emit(
            CacheOp::Insert,
            EventLevel::Info,
            key.to_string(),
            Some(rendered),
        );
        self.snapshot(format!("add {key}"));
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Access the event sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Render the list order head to tail as `k:v -> k:v`
    pub fn state(&self) -> String {
        self.inner
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    fn emit(&self, op: CacheOp, level: EventLevel, key: String, value: Option<String>) {
        self.sink.emit(&CacheEvent {
            op,
            level,
            key,
            value,
            snapshot: None,
        });
    }

    fn snapshot(&self, context: String) {
        self.sink.emit(&CacheEvent {
            op: CacheOp::Snapshot,
            level: EventLevel::Debug,
            key: context,
            value: None,
            snapshot: Some(self.state()),
        });
    }
}
