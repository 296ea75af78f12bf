//! Bounded read-through cache for folded entities.
//!
//! A cached entry is a snapshot at some sequence. Readers must always top it
//! up from the log (`sequence > cached.sequence`) before trusting it; the
//! cache only saves replay work.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 1024 }
    }
}

/// Minimal get/put contract used by repositories.
pub trait EntityCache<V>: Send + Sync {
    fn get(&self, id: &str) -> Option<V>;
    fn put(&self, id: &str, value: V);
}

#[derive(Debug)]
struct Entries<V> {
    values: HashMap<String, V>,
    // Least recently used first.
    order: VecDeque<String>,
}

/// In-process LRU cache with a fixed capacity.
#[derive(Debug)]
pub struct BoundedCache<V> {
    capacity: usize,
    entries: Mutex<Entries<V>>,
}

impl<V> BoundedCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            capacity: config.max_entries.max(1),
            entries: Mutex::new(Entries {
                values: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Entries<V> {
    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            if let Some(key) = self.order.remove(pos) {
                self.order.push_back(key);
            }
        }
    }
}

impl<V: Clone + Send> EntityCache<V> for BoundedCache<V> {
    fn get(&self, id: &str) -> Option<V> {
        // A poisoned cache behaves like a miss; the log stays authoritative.
        let mut entries = self.entries.lock().ok()?;
        let value = entries.values.get(id).cloned()?;
        entries.touch(id);
        Some(value)
    }

    fn put(&self, id: &str, value: V) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.values.insert(id.to_string(), value).is_some() {
            entries.touch(id);
            return;
        }
        entries.order.push_back(id.to_string());
        while entries.values.len() > self.capacity {
            let Some(evicted) = entries.order.pop_front() else {
                break;
            };
            trace!(id = %evicted, "evicting cache entry");
            entries.values.remove(&evicted);
        }
    }
}
