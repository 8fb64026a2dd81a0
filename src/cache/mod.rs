//! Bounded LRU caching
//!
//! [`LruCache`] is the plain engine: a hash index over an arena-backed
//! doubly linked list with O(1) get/set/evict and strict recency
//! ordering. [`ObservedLruCache`] layers structured event emission on top
//! of the same engine without changing its semantics.

mod lru;
mod observed;

pub use lru::LruCache;
pub use observed::{
    CacheEvent, CacheOp, EventLevel, EventSink, FilteredSink, ObservedLruCache, TracingSink,
    VecSink,
};
