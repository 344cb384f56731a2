//! Cache Entry Type
//!
//! [`CacheRef<V>`] is the record the cache keeps for every block or object it
//! holds. It is shared through `Arc` between the hash table (for lookup), the
//! clock ring (for eviction) and callers that obtained it from
//! [`get_or_load_ref`](crate::BlockCache::get_or_load_ref).
//!
//! # Lifecycle
//!
//! ```text
//!   miss ──▶ new (cold) ──▶ published in table + ring
//!                               │
//!                    hit ◀──────┤ get(): hot_count += 1 (capped)
//!                               │
//!                 sweep visit ──┤ hot: hot_count -= 1
//!                               │ cold: value cleared, unlinked
//!                               ▼
//!                             dead ── never resurrected; the next load
//!                                     creates a fresh CacheRef
//! ```
//!
//! The payload sits behind an `ArcSwapOption`, so a reader that already took
//! a snapshot of the value keeps it valid even if the entry is evicted a
//! moment later.
//!
//! # Memory Layout
//!
//! - `key: StreamKey` - hash, category and shared name
//! - `position: u64` - aligned offset within the stream
//! - `size: u64` - bytes charged against the cache limit
//! - `value` - one atomic pointer
//! - `hot_count`, `hot_limit`, `total_hits` - 12 bytes

use crate::key::StreamKey;
use arc_swap::ArcSwapOption;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A cached value together with its placement and hotness.
pub struct CacheRef<V> {
    key: StreamKey,
    position: u64,
    size: u64,
    value: ArcSwapOption<V>,
    hot_count: AtomicU32,
    hot_limit: u32,
    total_hits: AtomicU32,
}

impl<V> CacheRef<V> {
    /// Creates a live, cold entry.
    pub(crate) fn new(key: StreamKey, position: u64, size: u64, value: Arc<V>, hot_limit: u32) -> Self {
        Self {
            key,
            position,
            size,
            value: ArcSwapOption::new(Some(value)),
            hot_count: AtomicU32::new(0),
            hot_limit,
            total_hits: AtomicU32::new(0),
        }
    }

    /// Stream the value belongs to.
    #[inline]
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Offset of the value within its stream.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes charged against the cache limit.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the value, or `None` if it has been evicted.
    ///
    /// A successful read counts as an access and warms the entry.
    pub fn get(&self) -> Option<Arc<V>> {
        let v = self.value.load_full();
        if v.is_some() {
            self.mark_hotter();
        }
        v
    }

    /// Returns the value without touching hotness.
    #[inline]
    pub(crate) fn peek(&self) -> Option<Arc<V>> {
        self.value.load_full()
    }

    /// Returns `true` while the value has not been evicted.
    #[inline]
    pub fn has(&self) -> bool {
        self.value.load().is_some()
    }

    /// Current hotness, `0..=hot_limit`.
    #[inline]
    pub fn hot_count(&self) -> u32 {
        self.hot_count.load(Ordering::Relaxed)
    }

    /// Number of successful reads over the entry's lifetime.
    #[inline]
    pub fn total_hits(&self) -> u32 {
        self.total_hits.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_hotter(&self) {
        let cap = self.hot_limit;
        let _ = self
            .hot_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                (c < cap).then_some(c + 1)
            });
        self.total_hits.fetch_add(1, Ordering::Relaxed);
    }
}

/// The view of an entry the clock ring needs, independent of its payload.
///
/// Block entries and object entries live in different tables but share one
/// ring, so the ring stores them as `Arc<dyn ClockEntry>`.
pub(crate) trait ClockEntry: Send + Sync {
    fn key(&self) -> &StreamKey;
    fn position(&self) -> u64;
    fn size(&self) -> u64;
    fn is_hot(&self) -> bool;
    fn mark_colder(&self);
    /// Drops the payload. The entry is dead from here on.
    fn evict(&self);
    fn total_hits(&self) -> u32;
}

impl<V: Send + Sync> ClockEntry for CacheRef<V> {
    #[inline]
    fn key(&self) -> &StreamKey {
        &self.key
    }

    #[inline]
    fn position(&self) -> u64 {
        self.position
    }

    #[inline]
    fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    fn is_hot(&self) -> bool {
        self.hot_count.load(Ordering::Relaxed) > 0
    }

    fn mark_colder(&self) {
        let _ = self
            .hot_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1));
    }

    fn evict(&self) {
        self.value.store(None);
    }

    #[inline]
    fn total_hits(&self) -> u32 {
        CacheRef::total_hits(self)
    }
}

impl<V> fmt::Debug for CacheRef<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRef")
            .field("key", &self.key)
            .field("position", &self.position)
            .field("size", &self.size)
            .field("live", &self.has())
            .field("hot_count", &self.hot_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Category;

    fn entry(limit: u32) -> CacheRef<u64> {
        CacheRef::new(
            StreamKey::new("pack-1.idx", Category::INDEX),
            0,
            8,
            Arc::new(7),
            limit,
        )
    }

    #[test]
    fn test_new_entry_is_cold_and_live() {
        let e = entry(1);
        assert!(e.has());
        assert!(!e.is_hot());
        assert_eq!(e.total_hits(), 0);
    }

    #[test]
    fn test_get_warms_up_to_limit() {
        let e = entry(3);
        for _ in 0..5 {
            assert_eq!(e.get().as_deref(), Some(&7));
        }
        assert_eq!(e.hot_count(), 3);
        assert_eq!(e.total_hits(), 5);
    }

    #[test]
    fn test_peek_does_not_warm() {
        let e = entry(1);
        assert!(e.peek().is_some());
        assert_eq!(e.hot_count(), 0);
    }

    #[test]
    fn test_mark_colder_saturates_at_zero() {
        let e = entry(2);
        e.get();
        e.mark_colder();
        e.mark_colder();
        assert_eq!(e.hot_count(), 0);
        assert!(!e.is_hot());
    }

    #[test]
    fn test_evicted_value_survives_in_reader() {
        let e = entry(1);
        let held = e.get().unwrap();
        e.evict();
        assert!(!e.has());
        assert!(e.get().is_none());
        assert_eq!(*held, 7);
    }
}
