//! Index load and eviction events.
//!
//! Index and bitmap objects are expensive to rebuild, so callers can watch
//! how often they are requested and evicted by installing an
//! [`IndexEventListener`] in the [`BlockCacheConfig`](crate::BlockCacheConfig).
//! Only [`Category::INDEX`] and [`Category::BITMAP_INDEX`] entries produce
//! events.

use crate::entry::ClockEntry;
use crate::key::{Category, StreamKey};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;

#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// Receives events about index and bitmap objects.
///
/// `since_last_eviction` is the time since the same `(stream, position)` was
/// last evicted, or zero if it never was. Eviction times are only recorded
/// when [`reports_evictions`](Self::reports_evictions) returns `true`.
pub trait IndexEventListener: Send + Sync {
    /// Called for every object request through
    /// [`get_or_load_ref`](crate::BlockCache::get_or_load_ref).
    fn on_requested(
        &self,
        category: Category,
        cache_hit: bool,
        load_micros: u64,
        bytes: u64,
        since_last_eviction: Duration,
    );

    /// Called when an object is evicted.
    fn on_evicted(
        &self,
        category: Category,
        bytes: u64,
        total_hits: u32,
        since_last_eviction: Duration,
    ) {
        let _ = (category, bytes, total_hits, since_last_eviction);
    }

    /// Whether [`on_evicted`](Self::on_evicted) should be called at all.
    fn reports_evictions(&self) -> bool {
        false
    }
}

pub(crate) struct IndexEvents {
    listener: Arc<dyn IndexEventListener>,
    evicted_at: Mutex<HashMap<(StreamKey, u64), Instant>>,
}

impl IndexEvents {
    pub(crate) fn new(listener: Arc<dyn IndexEventListener>) -> Self {
        Self {
            listener,
            evicted_at: Mutex::new(HashMap::new()),
        }
    }

    fn since_eviction(&self, key: &StreamKey, position: u64, now: Instant) -> Duration {
        self.evicted_at
            .lock()
            .get(&(key.clone(), position))
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(*t))
    }

    pub(crate) fn requested(&self, e: &dyn ClockEntry, cache_hit: bool, start: Instant) {
        let category = e.key().category();
        if !category.is_index_or_bitmap() {
            return;
        }
        let now = Instant::now();
        let since = self.since_eviction(e.key(), e.position(), now);
        let micros = u64::try_from(now.duration_since(start).as_micros()).unwrap_or(u64::MAX);
        self.listener
            .on_requested(category, cache_hit, micros, e.size(), since);
    }

    pub(crate) fn evicted(&self, e: &dyn ClockEntry) {
        let category = e.key().category();
        if !category.is_index_or_bitmap() || !self.listener.reports_evictions() {
            return;
        }
        let now = Instant::now();
        let prev = self
            .evicted_at
            .lock()
            .insert((e.key().clone(), e.position()), now);
        let since = prev.map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
        self.listener
            .on_evicted(category, e.size(), e.total_hits(), since);
    }
}
