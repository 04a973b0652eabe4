//! Bounded result caches keyed by input fingerprints.
//!
//! Eviction is FIFO by insertion order: the map holds the entries, a queue
//! holds the keys in the order they were first inserted.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

/// Number of leading samples copied verbatim into a fingerprint.
const HEAD_SAMPLES: usize = 4;

/// Content fingerprint of a sample buffer or matrix.
///
/// Carries the shape and a few leading values alongside a hash over every
/// value's bit pattern, so buffers sharing a prefix and length still differ.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    rows: usize,
    cols: usize,
    head: [u32; HEAD_SAMPLES],
    hash: u64,
}

impl Fingerprint {
    pub fn of_samples(samples: &[f32]) -> Self {
        let mut hasher = DefaultHasher::new();
        for s in samples {
            s.to_bits().hash(&mut hasher);
        }
        Self {
            rows: 1,
            cols: samples.len(),
            head: head_bits(samples),
            hash: hasher.finish(),
        }
    }

    pub fn of_matrix(rows: &[Vec<f32>]) -> Self {
        let mut hasher = DefaultHasher::new();
        for row in rows {
            row.len().hash(&mut hasher);
            for v in row {
                v.to_bits().hash(&mut hasher);
            }
        }
        Self {
            rows: rows.len(),
            cols: rows.first().map_or(0, Vec::len),
            head: rows.first().map_or([0; HEAD_SAMPLES], |r| head_bits(r)),
            hash: hasher.finish(),
        }
    }
}

fn head_bits(samples: &[f32]) -> [u32; HEAD_SAMPLES] {
    let mut head = [0u32; HEAD_SAMPLES];
    for (dst, s) in head.iter_mut().zip(samples) {
        *dst = s.to_bits();
    }
    head
}

/// Hit/miss/eviction counters of a cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Fixed-capacity map with deterministic FIFO eviction.
///
/// Not synchronized; owners keep it behind their cache lock.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    stats: CacheStats,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            stats: CacheStats::default(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.entries.get(key) {
            Some(v) => {
                self.stats.hits += 1;
                Some(v.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert or replace. Replacing keeps the entry's original queue position.
    pub fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                    self.stats.evictions += 1;
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
