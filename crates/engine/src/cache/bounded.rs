//! Generic bounded identity map.
//!
//! Backs the high-churn caches (tickets, ticket balances). Each entry
//! remembers the last level it was touched at; once occupancy crosses
//! 90% of the ceiling, one batched trim evicts the least-recently
//! touched half of the capacity.

use std::collections::HashMap;
use std::hash::Hash;

use tzmirror_types::Level;

/// Occupancy fraction (percent) above which a trim is due.
const TRIM_THRESHOLD_PERCENT: usize = 90;

/// Bounded identity map with level-based recency eviction.
pub struct BoundedCache<K, V> {
    capacity: usize,
    map: HashMap<K, V>,
    touched: HashMap<K, Level>,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    /// Creates a cache with the given entry ceiling.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            touched: HashMap::new(),
        }
    }

    /// Inserts or overwrites an entry, touching it at `level`.
    pub fn insert(&mut self, key: K, value: V, level: Level) {
        self.touched.insert(key.clone(), level);
        self.map.insert(key, value);
    }

    /// Returns the cached entry without touching it.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Returns the cached entry mutably, touching it at `level`.
    pub fn get_mut(&mut self, key: &K, level: Level) -> Option<&mut V> {
        if let Some(value) = self.map.get_mut(key) {
            self.touched.insert(key.clone(), level);
            Some(value)
        } else {
            None
        }
    }

    /// Removes an entry.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.touched.remove(key);
        self.map.remove(key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Evicts the least-recently-touched half of the capacity once
    /// occupancy exceeds the trim threshold. Batched so the cost is paid
    /// once per overflow, not per insert.
    pub fn trim(&mut self) {
        if self.map.len() * 100 < self.capacity * TRIM_THRESHOLD_PERCENT {
            return;
        }
        let mut by_recency: Vec<(K, Level)> = self
            .touched
            .iter()
            .map(|(k, &level)| (k.clone(), level))
            .collect();
        by_recency.sort_by_key(|&(_, level)| level);
        let evict = self.capacity / 2;
        for (key, _) in by_recency.into_iter().take(evict) {
            self.map.remove(&key);
            self.touched.remove(&key);
        }
    }

    /// Drops every entry.
    pub fn reset(&mut self) {
        self.map.clear();
        self.touched.clear();
    }
}
