//! Cache Metrics System
//!
//! Every counter the cache keeps is split by [`Category`]: hits, misses,
//! evictions and live bytes. Counters are lock-free atomics; the arrays that
//! hold them grow by copy-and-swap when a category beyond the current length
//! shows up, so late-registered categories are counted without any setup.
//!
//! Readers get plain `Vec<u64>` snapshots through the accessors on
//! [`BlockCache`](crate::BlockCache), or a [`CacheStats`] bundling them all.
//!
//! # Why BTreeMap for reporting?
//!
//! [`CacheMetrics::metrics`] returns a `BTreeMap` so the keys always come out
//! in the same order, which keeps logs and test output reproducible.

use crate::key::Category;
use arc_swap::ArcSwap;
use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A growable array of per-category counters.
///
/// Growing copies the `Arc`s of the existing cells into a longer array, so an
/// increment that raced with a grow still lands in the live cell.
pub(crate) struct Counters {
    cells: ArcSwap<Vec<Arc<AtomicU64>>>,
}

impl Counters {
    pub(crate) fn new() -> Self {
        let cells = (0..Category::KNOWN).map(|_| Arc::default()).collect();
        Self {
            cells: ArcSwap::from_pointee(cells),
        }
    }

    fn with<R>(&self, category: Category, f: impl FnOnce(&AtomicU64) -> R) -> R {
        let idx = category.index();
        {
            let cells = self.cells.load();
            if let Some(cell) = cells.get(idx) {
                return f(cell);
            }
        }
        loop {
            let cur = self.cells.load_full();
            if let Some(cell) = cur.get(idx) {
                return f(cell);
            }
            let mut grown: Vec<Arc<AtomicU64>> = Vec::with_capacity(idx + 1);
            grown.extend(cur.iter().cloned());
            grown.resize_with(idx + 1, Arc::default);
            self.cells.compare_and_swap(&cur, Arc::new(grown));
        }
    }

    #[inline]
    pub(crate) fn incr(&self, category: Category) {
        self.add(category, 1);
    }

    #[inline]
    pub(crate) fn add(&self, category: Category, n: u64) {
        self.with(category, |c| c.fetch_add(n, Ordering::Relaxed));
    }

    #[inline]
    pub(crate) fn sub(&self, category: Category, n: u64) {
        self.with(category, |c| c.fetch_sub(n, Ordering::Relaxed));
    }

    /// Applies a signed adjustment.
    pub(crate) fn adjust(&self, category: Category, delta: i64) {
        if delta >= 0 {
            self.add(category, delta as u64);
        } else {
            self.sub(category, delta.unsigned_abs());
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, category: Category) -> u64 {
        self.cells
            .load()
            .get(category.index())
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub(crate) fn values(&self) -> Vec<u64> {
        self.cells
            .load()
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    pub(crate) fn sum(&self) -> u64 {
        self.cells
            .load()
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }
}

/// The four counter families the cache maintains.
pub(crate) struct Stats {
    pub(crate) hit: Counters,
    pub(crate) miss: Counters,
    pub(crate) evict: Counters,
    /// Only modified while the clock lock is held.
    pub(crate) live_bytes: Counters,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self {
            hit: Counters::new(),
            miss: Counters::new(),
            evict: Counters::new(),
            live_bytes: Counters::new(),
        }
    }

    pub(crate) fn snapshot(&self, max_bytes: u64) -> CacheStats {
        CacheStats {
            current_size: self.live_bytes.values(),
            hits: self.hit.values(),
            misses: self.miss.values(),
            evictions: self.evict.values(),
            max_bytes,
        }
    }
}

/// Hit + miss per category.
pub(crate) fn total_requests(hits: &[u64], misses: &[u64]) -> Vec<u64> {
    let mut cnt = vec![0u64; hits.len().max(misses.len())];
    for (i, h) in hits.iter().enumerate() {
        cnt[i] += h;
    }
    for (i, m) in misses.iter().enumerate() {
        cnt[i] += m;
    }
    cnt
}

/// Integer hit percentage per category.
///
/// A category known only to the hit counters reports 100, one known only to
/// the miss counters reports 0.
pub(crate) fn hit_ratios(hits: &[u64], misses: &[u64]) -> Vec<u64> {
    (0..hits.len().max(misses.len()))
        .map(|i| match (hits.get(i), misses.get(i)) {
            (None, _) => 0,
            (Some(_), None) => 100,
            (Some(&h), Some(&m)) => {
                let total = h + m;
                if total == 0 {
                    0
                } else {
                    h * 100 / total
                }
            }
        })
        .collect()
}

/// Point-in-time copy of every per-category counter.
///
/// Vectors are indexed by [`Category::index`]. Their lengths may differ if a
/// category was first seen between two reads.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Bytes currently held.
    pub current_size: Vec<u64>,
    /// Requests served from the cache.
    pub hits: Vec<u64>,
    /// Requests that had to load.
    pub misses: Vec<u64>,
    /// Entries evicted to make room.
    pub evictions: Vec<u64>,
    /// Configured limit.
    pub max_bytes: u64,
}

impl CacheStats {
    /// Hits plus misses per category.
    pub fn requests(&self) -> Vec<u64> {
        total_requests(&self.hits, &self.misses)
    }

    /// Hit percentage (0..=100) per category.
    pub fn hit_ratio(&self) -> Vec<u64> {
        hit_ratios(&self.hits, &self.misses)
    }

    /// Bytes held across all categories.
    pub fn total_size(&self) -> u64 {
        self.current_size.iter().sum()
    }

    /// Hits across all categories.
    pub fn total_hits(&self) -> u64 {
        self.hits.iter().sum()
    }

    /// Misses across all categories.
    pub fn total_misses(&self) -> u64 {
        self.misses.iter().sum()
    }

    /// Evictions across all categories.
    pub fn total_evictions(&self) -> u64 {
        self.evictions.iter().sum()
    }

    /// Overall hit rate between 0.0 and 1.0.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.total_hits() + self.total_misses();
        if requests > 0 {
            self.total_hits() as f64 / requests as f64
        } else {
            0.0
        }
    }

    /// Fraction of the limit in use. Can exceed 1.0 because the limit is soft.
    pub fn utilization(&self) -> f64 {
        if self.max_bytes > 0 {
            self.total_size() as f64 / self.max_bytes as f64
        } else {
            0.0
        }
    }

    /// Aggregate and per-category metrics in deterministic order.
    ///
    /// Per-category keys are suffixed with the category name, e.g.
    /// `cache_hits.pack`.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("cache_hits".to_string(), self.total_hits() as f64);
        metrics.insert("cache_misses".to_string(), self.total_misses() as f64);
        metrics.insert("evictions".to_string(), self.total_evictions() as f64);
        metrics.insert(
            "requests".to_string(),
            (self.total_hits() + self.total_misses()) as f64,
        );
        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("cache_size_bytes".to_string(), self.total_size() as f64);
        metrics.insert("max_cache_size_bytes".to_string(), self.max_bytes as f64);
        metrics.insert("cache_utilization".to_string(), self.utilization());

        let per_category = [
            ("cache_hits", &self.hits),
            ("cache_misses", &self.misses),
            ("evictions", &self.evictions),
            ("cache_size_bytes", &self.current_size),
        ];
        for (name, values) in per_category {
            for (i, v) in values.iter().enumerate() {
                if *v == 0 {
                    continue;
                }
                let category = Category::new(i as u8);
                metrics.insert(format!("{name}.{category}"), *v as f64);
            }
        }

        metrics
    }
}

/// Uniform metrics reporting.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Name identifying the cache implementation.
    fn algorithm_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counters_start_at_known_length() {
        let c = Counters::new();
        assert_eq!(c.values().len(), Category::KNOWN);
        assert_eq!(c.sum(), 0);
    }

    #[test]
    fn test_counters_grow_for_late_category() {
        let c = Counters::new();
        c.incr(Category::PACK);
        c.add(Category::new(20), 5);
        let values = c.values();
        assert_eq!(values.len(), 21);
        assert_eq!(values[0], 1);
        assert_eq!(values[20], 5);
        assert_eq!(c.get(Category::new(20)), 5);
        assert_eq!(c.get(Category::new(99)), 0);
    }

    #[test]
    fn test_adjust_signed() {
        let c = Counters::new();
        c.adjust(Category::INDEX, 100);
        c.adjust(Category::INDEX, -30);
        assert_eq!(c.get(Category::INDEX), 70);
    }

    #[test]
    fn test_concurrent_grow_loses_no_increments() {
        let c = Arc::new(Counters::new());
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for i in 0..1000u32 {
                        c.incr(Category::new(((i % 4) as u8) * 10 + t));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.sum(), 8000);
    }

    #[test]
    fn test_hit_ratio_uneven_lengths() {
        assert_eq!(hit_ratios(&[3, 0], &[1, 0, 4]), vec![75, 0, 0]);
        assert_eq!(hit_ratios(&[1, 2], &[1]), vec![50, 100]);
        assert_eq!(total_requests(&[1, 2], &[3]), vec![4, 2]);
    }

    #[test]
    fn test_stats_btreemap() {
        let stats = CacheStats {
            current_size: vec![64, 0],
            hits: vec![1, 0],
            misses: vec![3, 0],
            evictions: vec![1, 0],
            max_bytes: 128,
        };
        let m = stats.to_btreemap();
        assert_eq!(m["cache_hits"], 1.0);
        assert_eq!(m["requests"], 4.0);
        assert_eq!(m["hit_rate"], 0.25);
        assert_eq!(m["cache_utilization"], 0.5);
        assert_eq!(m["cache_misses.pack"], 3.0);
        assert!(!m.contains_key("cache_hits.idx"));
    }
}
