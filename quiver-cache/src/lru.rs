//! Byte-accounted LRU recency index.
//!
//! This layer only tracks keys and byte sizes; it is wrapped by
//! [`MemoryCache`](crate::MemoryCache), which stores the actual payloads.
//!
//! Recency is kept in an intrusive doubly linked list threaded through a slab
//! of nodes, with a key -> slot map beside it, so promote, insert, remove and
//! evict are all O(1) amortized.

use std::collections::HashMap;
use std::hash::Hash;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node<K> {
    key: K,
    size: usize,
    /// Towards the most recently used end.
    prev: usize,
    /// Towards the least recently used end.
    next: usize,
}

/// Result of asking the index to admit a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission<K> {
    /// The key is resident; these keys were evicted to make room, oldest first.
    Admitted { evicted: Vec<K> },
    /// The entry alone is larger than the whole ceiling; nothing changed.
    Rejected,
}

/// LRU index over keys with byte sizes, bounded by `max_bytes`.
#[derive(Debug)]
pub struct LruIndex<K> {
    /// Maximum resident size in bytes.
    max_bytes: usize,
    /// Current resident size in bytes.
    current_bytes: usize,

    nodes: Vec<Node<K>>,
    free: Vec<usize>,
    /// Most recently used slot.
    head: usize,
    /// Least recently used slot.
    tail: usize,

    slots: HashMap<K, usize>,
}

impl<K> LruIndex<K>
where
    K: Eq + Hash + Clone,
{
    /// Create an index with the given byte ceiling.
    ///
    /// A ceiling of 0 rejects every non-empty entry.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            current_bytes: 0,
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            slots: HashMap::new(),
        }
    }

    /// Returns the configured capacity in bytes.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Returns current resident size in bytes.
    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Size recorded for a resident key.
    pub fn size_of(&self, key: &K) -> Option<usize> {
        self.slots.get(key).map(|&idx| self.nodes[idx].size)
    }

    /// Promote a resident key to most recently used. Returns false if absent.
    pub fn touch(&mut self, key: &K) -> bool {
        match self.slots.get(key).copied() {
            Some(idx) => {
                if self.head != idx {
                    self.unlink(idx);
                    self.push_front(idx);
                }
                true
            }
            None => false,
        }
    }

    /// Insert or re-insert a key as most recently used.
    ///
    /// Least recently used keys are evicted until the new total fits. An entry
    /// larger than the whole ceiling is rejected without evicting anything
    /// else; a previous entry under the same key is dropped, since it no
    /// longer matches what was last stored.
    pub fn insert(&mut self, key: K, size_bytes: usize) -> Admission<K> {
        if size_bytes > self.max_bytes {
            self.remove(&key);
            return Admission::Rejected;
        }

        // Re-insert: drop the old accounting first so it never counts twice.
        self.remove(&key);

        let mut evicted = Vec::new();
        while self.current_bytes + size_bytes > self.max_bytes {
            match self.evict_lru() {
                Some(victim) => evicted.push(victim),
                None => break,
            }
        }

        let node = Node {
            key: key.clone(),
            size: size_bytes,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.push_front(idx);
        self.slots.insert(key, idx);
        self.current_bytes += size_bytes;

        Admission::Admitted { evicted }
    }

    /// Remove a key completely (if present) and return its size.
    pub fn remove(&mut self, key: &K) -> Option<usize> {
        let idx = self.slots.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        let size = self.nodes[idx].size;
        self.current_bytes -= size;
        Some(size)
    }

    /// Evict and return the least recently used key.
    pub fn evict_lru(&mut self) -> Option<K> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        let key = self.nodes[idx].key.clone();
        self.remove(&key);
        Some(key)
    }

    /// The key that would be evicted next.
    pub fn peek_lru(&self) -> Option<&K> {
        (self.tail != NIL).then(|| &self.nodes[self.tail].key)
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while cursor != NIL {
            let node = &self.nodes[cursor];
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }

    /// Forget every key.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.slots.clear();
        self.head = NIL;
        self.tail = NIL;
        self.current_bytes = 0;
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = &self.nodes[idx];
            (node.prev, node.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }
        let node = &mut self.nodes[idx];
        node.prev = NIL;
        node.next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = &mut self.nodes[idx];
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head == NIL {
            self.tail = idx;
        } else {
            self.nodes[old_head].prev = idx;
        }
        self.head = idx;
    }
}
