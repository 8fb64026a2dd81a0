//! Arena-backed LRU cache
//!
//! A bounded cache with O(1) get/set/evict built on a doubly linked list
//! stored in a slot arena. Links are arena indices rather than pointers,
//! which keeps ownership flat: the arena owns every node, the key index
//! maps keys to slots, and evicted slots are recycled through a free list.
//!
//! # Recency order
//!
//! The list head is the most recently used entry, the tail the least.
//! `get` and `set` both promote the touched entry to the head; eviction
//! always removes the tail.
//!
//! # Thread safety
//!
//! `LruCache` is a single-owner type: all operations take `&mut self` and
//! it performs no internal locking. Sharing one instance across threads
//! requires an external lock (see `CachedFetcher` for a
//! `parking_lot::Mutex` wrapping).

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::CacheError;

/// Index into the node arena
type NodeIndex = usize;

/// Sentinel for "no predecessor/successor"
const NIL: NodeIndex = usize::MAX;

/// A node in the recency list
///
/// Owned exclusively by the cache; never exposed outside the cache
/// boundary.
#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    /// Index of the previous (more recently used) node
    prev: NodeIndex,
    /// Index of the next (less recently used) node
    next: NodeIndex,
}

/// Bounded LRU cache with strict recency ordering
///
/// # Example
///
/// ```
/// use wordtop::cache::LruCache;
///
/// let mut cache = LruCache::new(2).unwrap();
/// cache.set("k1", 1);
/// cache.set("k2", 2);
/// cache.get(&"k1");
/// cache.set("k3", 3); // evicts k2: k1 was touched after it
/// assert_eq!(cache.get(&"k2"), None);
/// assert_eq!(cache.get(&"k1"), Some(&1));
/// ```
#[derive(Debug)]
pub struct LruCache<K, V> {
    /// Node arena; `None` slots are on the free list
    slots: Vec<Option<Node<K, V>>>,
    /// Recycled slot indices
    free: Vec<NodeIndex>,
    /// Key to slot index
    index: HashMap<K, NodeIndex>,
    /// Most recently used node, NIL when empty
    head: NodeIndex,
    /// Least recently used node, NIL when empty
    tail: NodeIndex,
    /// Maximum number of entries
    capacity: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache with the given capacity
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidCapacity`] if `capacity` is zero; no
    /// cache instance is created.
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::InvalidCapacity(capacity));
        }
        Ok(Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
            capacity,
        })
    }

    /// Look up a key, promoting it to most recently used on a hit
    ///
    /// A miss returns `None` and does not mutate the cache.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.move_to_head(idx);
        self.node(idx).map(|n| &n.value)
    }

    /// Insert or update a key
    ///
    /// Updating an existing key replaces the value in place and promotes
    /// the entry; the size never changes and nothing is evicted. Inserting
    /// a new key at capacity evicts exactly the tail entry first; the
    /// evicted pair is returned.
    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(node) = self.slots[idx].as_mut() {
                node.value = value;
            }
            self.move_to_head(idx);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.evict_tail()
        } else {
            None
        };

        let idx = self.alloc(Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        });
        self.index.insert(key, idx);
        self.push_head(idx);

        evicted
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a key is present, without touching recency order
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Whether a key currently sits at the head of the recency list
    pub fn is_head(&self, key: &K) -> bool {
        match self.index.get(key) {
            Some(&idx) => self.head == idx,
            None => false,
        }
    }

    /// Iterate entries from most to least recently used
    ///
    /// Iteration does not affect recency order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            cache: self,
            cursor: self.head,
        }
    }

    fn node(&self, idx: NodeIndex) -> Option<&Node<K, V>> {
        self.slots.get(idx).and_then(|s| s.as_ref())
    }

    /// Allocate a slot from the free list or by growing the arena
    fn alloc(&mut self, node: Node<K, V>) -> NodeIndex {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(node);
            idx
        } else {
            self.slots.push(Some(node));
            self.slots.len() - 1
        }
    }

    /// Unlink a node from the list without freeing its slot
    fn detach(&mut self, idx: NodeIndex) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(n) => (n.prev, n.next),
            None => return,
        };

        if prev != NIL {
            if let Some(p) = self.slots[prev].as_mut() {
                p.next = next;
            }
        } else {
            self.head = next;
        }

        if next != NIL {
            if let Some(n) = self.slots[next].as_mut() {
                n.prev = prev;
            }
        } else {
            self.tail = prev;
        }

        if let Some(n) = self.slots[idx].as_mut() {
            n.prev = NIL;
            n.next = NIL;
        }
    }

    /// Link a detached node in at the head
    fn push_head(&mut self, idx: NodeIndex) {
        let old_head = self.head;
        if let Some(n) = self.slots[idx].as_mut() {
            n.prev = NIL;
            n.next = old_head;
        }
        if old_head != NIL {
            if let Some(h) = self.slots[old_head].as_mut() {
                h.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    /// Promote a node to the head; no-op when it already is the head
    fn move_to_head(&mut self, idx: NodeIndex) {
        if self.head == idx {
            return;
        }
        self.detach(idx);
        self.push_head(idx);
    }

    /// Remove the least recently used entry
    ///
    /// The node is detached, its slot recycled, and it is never touched
    /// again.
    fn evict_tail(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        self.detach(idx);
        let node = self.slots[idx].take()?;
        self.index.remove(&node.key);
        self.free.push(idx);
        Some((node.key, node.value))
    }
}

/// Head-to-tail iterator over cache entries
#[derive(Debug)]
pub struct Iter<'a, K, V> {
    cache: &'a LruCache<K, V>,
    cursor: NodeIndex,
}

impl<'a, K, V> Iterator for Iter<'a, K, V>
where
    K: Eq + Hash + Clone,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let node = self.cache.node(self.cursor)?;
        self.cursor = node.next;
        Some((&node.key, &node.value))
    }
}
