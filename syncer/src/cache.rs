//! Bounded cache with combined recency and age eviction.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

const NIL: usize = usize::MAX;

struct Entry<K, V> {
    key: K,
    value: V,
    /// Set on insert and on value update, not on read.
    written: Instant,
    prev: usize,
    next: usize,
}

struct Inner<K, V> {
    capacity: usize,
    ttl: Option<Duration>,
    index: HashMap<K, usize>,
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

/// LRU cache with an optional time-to-live.
///
/// Entries live in a slot arena linked into a recency list (head = most
/// recently used) with a hash index for O(1) lookup. Expiry is checked
/// lazily on read; there is no background sweeper. All operations
/// serialize on one internal lock.
pub struct Cache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> Cache<K, V> {
    /// A `ttl` of zero disables age-based expiry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");
        Cache {
            inner: Mutex::new(Inner {
                capacity,
                ttl: (!ttl.is_zero()).then_some(ttl),
                index: HashMap::new(),
                slots: Vec::new(),
                free: Vec::new(),
                head: NIL,
                tail: NIL,
            }),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let slot = *inner.index.get(key)?;
        if inner.is_expired(slot) {
            inner.evict(slot);
            return None;
        }
        inner.unlink(slot);
        inner.push_front(slot);
        inner.slots[slot].as_ref().map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        if let Some(&slot) = inner.index.get(&key) {
            if let Some(entry) = inner.slots[slot].as_mut() {
                entry.value = value;
                entry.written = Instant::now();
            }
            inner.unlink(slot);
            inner.push_front(slot);
            return;
        }

        let entry = Entry {
            key: key.clone(),
            value,
            written: Instant::now(),
            prev: NIL,
            next: NIL,
        };
        let slot = match inner.free.pop() {
            Some(slot) => {
                inner.slots[slot] = Some(entry);
                slot
            }
            None => {
                inner.slots.push(Some(entry));
                inner.slots.len() - 1
            }
        };
        inner.index.insert(key, slot);
        inner.push_front(slot);

        if inner.index.len() > inner.capacity {
            let tail = inner.tail;
            inner.evict(tail);
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let slot = *inner.index.get(key)?;
        inner.unlink(slot);
        inner.index.remove(key);
        inner.free.push(slot);
        inner.slots[slot].take().map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Hash + Eq, V> Inner<K, V> {
    fn is_expired(&self, slot: usize) -> bool {
        match (self.ttl, &self.slots[slot]) {
            (Some(ttl), Some(entry)) => entry.written.elapsed() > ttl,
            _ => false,
        }
    }

    /// Detach a slot from the recency list without touching the index.
    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match &self.slots[slot] {
            Some(entry) => (entry.prev, entry.next),
            None => return,
        };
        if prev == NIL {
            self.head = next;
        } else if let Some(entry) = self.slots[prev].as_mut() {
            entry.next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else if let Some(entry) = self.slots[next].as_mut() {
            entry.prev = prev;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.prev = NIL;
            entry.next = old_head;
        }
        if old_head != NIL {
            if let Some(entry) = self.slots[old_head].as_mut() {
                entry.prev = slot;
            }
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    /// Remove a slot entirely: list, index and arena.
    fn evict(&mut self, slot: usize) {
        if slot == NIL {
            return;
        }
        self.unlink(slot);
        if let Some(entry) = self.slots[slot].take() {
            self.index.remove(&entry.key);
        }
        self.free.push(slot);
    }
}
