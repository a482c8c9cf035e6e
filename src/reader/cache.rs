//! # LRU Cache
//!
//! A fixed-capacity least-recently-used cache backing the reader's decoded
//! dirents and decompressed clusters. The order list is an intrusive doubly
//! linked list over a slab of nodes, indexed by a `hashbrown` map, so every
//! operation is O(1):
//!
//! - `get` moves the entry to the MRU position and returns a clone of the
//!   value (values are cheap `Arc` handles in practice);
//! - `put` inserts at MRU, overwriting any existing entry for the key;
//! - on overflow the LRU entry is evicted.
//!
//! A lookup miss is an ordinary `None`, never an error; resident-set
//! contents after any access sequence are exactly the last `capacity`
//! distinct keys touched.
//!
//! The cache itself is not synchronized; callers wrap it in a mutex.

use hashbrown::HashMap;

const NIL: usize = usize::MAX;

struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

pub struct LruCache<K, V> {
    map: HashMap<K, usize>,
    nodes: Vec<Node<K, V>>,
    head: usize,
    tail: usize,
    capacity: usize,
}

impl<K, V> LruCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be at least 1");
        Self {
            map: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Looks up `key`, promoting it to most-recently-used on a hit.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let idx = *self.map.get(key)?;
        self.detach(idx);
        self.push_front(idx);
        Some(self.nodes[idx].value.clone())
    }

    /// Inserts or overwrites `key`, promoting it to most-recently-used and
    /// evicting the least-recently-used entry on overflow.
    pub fn put(&mut self, key: K, value: V) {
        if let Some(&idx) = self.map.get(&key) {
            self.nodes[idx].value = value;
            self.detach(idx);
            self.push_front(idx);
            return;
        }

        if self.map.len() == self.capacity {
            let lru = self.tail;
            self.detach(lru);
            self.map.remove(&self.nodes[lru].key);
            self.nodes[lru].key = key.clone();
            self.nodes[lru].value = value;
            self.map.insert(key, lru);
            self.push_front(lru);
            return;
        }

        let idx = self.nodes.len();
        self.nodes.push(Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        });
        self.map.insert(key, idx);
        self.push_front(idx);
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }
}
