//! Clock Ring and Space Accounting
//!
//! Every live entry, block or object, sits in one ring ordered by insertion.
//! The front of the ring is the slot just past the clock hand. A sweep pops
//! entries off the front:
//!
//! ```text
//!   hand ─▶ [A hot] [B cold] [C cold] ...
//!
//!   visit A: hot_count -= 1, rotate to back      (second chance)
//!   visit B: value cleared, bytes released       (evicted)
//!   stop once live + reserved <= max
//! ```
//!
//! One mutex guards the ring together with the per-category live byte
//! counters, so the sum of live bytes is exact while it is held. The lock is
//! never held across a load.
//!
//! # Soft limit
//!
//! If a sweep visits every entry in a row without evicting one (all hot), or
//! a single reservation exceeds the limit on its own, the reservation is
//! admitted anyway and the cache runs over its limit until later sweeps
//! catch up.

use crate::entry::ClockEntry;
use crate::key::Category;
use crate::metrics::Stats;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) struct Clock {
    ring: Mutex<VecDeque<Arc<dyn ClockEntry>>>,
    max_bytes: u64,
}

impl Clock {
    pub(crate) fn new(max_bytes: u64) -> Self {
        Self {
            ring: Mutex::new(VecDeque::new()),
            max_bytes,
        }
    }

    /// Charges `bytes` to `category`, evicting cold entries first if the
    /// charge would push the cache over its limit.
    ///
    /// `on_evict` is called for every evicted entry while the lock is held.
    pub(crate) fn reserve(
        &self,
        bytes: u64,
        category: Category,
        stats: &Stats,
        mut on_evict: impl FnMut(&dyn ClockEntry),
    ) {
        let mut ring = self.ring.lock();
        let mut live = stats.live_bytes.sum() + bytes;

        if live > self.max_bytes {
            let mut idle = 0;
            let mut evicted = 0u64;
            let mut freed = 0u64;

            while live > self.max_bytes && idle < ring.len() {
                let Some(e) = ring.pop_front() else { break };
                if e.is_hot() {
                    e.mark_colder();
                    ring.push_back(e);
                    idle += 1;
                    continue;
                }

                e.evict();
                let c = e.key().category();
                stats.live_bytes.sub(c, e.size());
                stats.evict.incr(c);
                live -= e.size();
                freed += e.size();
                evicted += 1;
                idle = 0;
                on_evict(&*e);
            }

            if evicted > 0 && tracing::enabled!(tracing::Level::TRACE) {
                trace!(evicted, freed, live, max = self.max_bytes, "clock sweep");
            }
            if live > self.max_bytes && tracing::enabled!(tracing::Level::DEBUG) {
                debug!(
                    live,
                    max = self.max_bytes,
                    requested = bytes,
                    ring = ring.len(),
                    "reservation overflows cache limit"
                );
            }
        }

        stats.live_bytes.add(category, bytes);
    }

    /// Returns a reservation that will not be used.
    pub(crate) fn credit(&self, bytes: u64, category: Category, stats: &Stats) {
        let _ring = self.ring.lock();
        stats.live_bytes.sub(category, bytes);
    }

    /// Puts a freshly published entry into the ring.
    ///
    /// `reserved` is what was charged before the entry's real size was known;
    /// the difference is settled here.
    pub(crate) fn add(&self, entry: Arc<dyn ClockEntry>, reserved: u64, stats: &Stats) {
        let mut ring = self.ring.lock();
        let delta = entry.size() as i64 - reserved as i64;
        if delta != 0 {
            stats.live_bytes.adjust(entry.key().category(), delta);
        }
        ring.push_back(entry);
    }

    /// Takes `entry` out of the ring and releases its bytes so a replacement
    /// can be published under the same key.
    ///
    /// Returns `false`, leaving the entry alone, if it is not in the ring.
    pub(crate) fn retire(&self, entry: &dyn ClockEntry, stats: &Stats) -> bool {
        let mut ring = self.ring.lock();
        let target = entry as *const _ as *const ();
        let Some(i) = ring
            .iter()
            .position(|e| Arc::as_ptr(e) as *const () == target)
        else {
            return false;
        };
        if let Some(e) = ring.remove(i) {
            e.evict();
            stats.live_bytes.sub(e.key().category(), e.size());
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.ring.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheRef;
    use crate::key::StreamKey;

    fn entry(pos: u64, size: u64) -> Arc<CacheRef<u64>> {
        let key = StreamKey::new("pack-1.pack", Category::PACK);
        Arc::new(CacheRef::new(key, pos, size, Arc::new(pos), 1))
    }

    fn admit(clock: &Clock, stats: &Stats, e: &Arc<CacheRef<u64>>) {
        clock.reserve(e.size(), Category::PACK, stats, |_| {});
        clock.add(Arc::clone(e) as Arc<dyn ClockEntry>, e.size(), stats);
    }

    #[test]
    fn test_reserve_within_limit_evicts_nothing() {
        let clock = Clock::new(100);
        let stats = Stats::new();
        let a = entry(0, 40);
        let b = entry(40, 60);
        admit(&clock, &stats, &a);
        admit(&clock, &stats, &b);
        assert_eq!(stats.live_bytes.sum(), 100);
        assert_eq!(stats.evict.sum(), 0);
        assert!(a.has() && b.has());
    }

    #[test]
    fn test_hot_entry_gets_second_chance() {
        let clock = Clock::new(100);
        let stats = Stats::new();
        let a = entry(0, 50);
        let b = entry(50, 50);
        admit(&clock, &stats, &a);
        admit(&clock, &stats, &b);
        a.get();

        let mut seen = Vec::new();
        clock.reserve(50, Category::PACK, &stats, |e| seen.push(e.position()));
        assert_eq!(seen, vec![50]);
        assert!(a.has());
        assert!(!b.has());
        assert_eq!(a.hot_count(), 0);
        assert_eq!(stats.live_bytes.sum(), 100);
        assert_eq!(stats.evict.get(Category::PACK), 1);
        assert_eq!(clock.len(), 1);
    }

    #[test]
    fn test_all_hot_ring_overflows_softly() {
        let clock = Clock::new(100);
        let stats = Stats::new();
        let a = entry(0, 50);
        let b = entry(50, 50);
        admit(&clock, &stats, &a);
        admit(&clock, &stats, &b);
        a.get();
        b.get();

        clock.reserve(50, Category::PACK, &stats, |_| {});
        assert!(a.has() && b.has());
        assert_eq!(stats.live_bytes.sum(), 150);
        assert_eq!(stats.evict.sum(), 0);
        assert!(!a.is_hot() && !b.is_hot());
    }

    #[test]
    fn test_oversized_reservation_on_empty_ring() {
        let clock = Clock::new(100);
        let stats = Stats::new();
        clock.reserve(500, Category::INDEX, &stats, |_| {});
        assert_eq!(stats.live_bytes.get(Category::INDEX), 500);
        clock.credit(500, Category::INDEX, &stats);
        assert_eq!(stats.live_bytes.sum(), 0);
    }

    #[test]
    fn test_retire_releases_bytes_without_counting_eviction() {
        let clock = Clock::new(1000);
        let stats = Stats::new();
        let a = entry(0, 40);
        let b = entry(40, 60);
        admit(&clock, &stats, &a);
        admit(&clock, &stats, &b);

        assert!(clock.retire(&*a, &stats));
        assert!(!a.has());
        assert_eq!(stats.live_bytes.sum(), 60);
        assert_eq!(stats.evict.sum(), 0);
        assert_eq!(clock.len(), 1);

        let stray = entry(100, 10);
        assert!(!clock.retire(&*stray, &stats));
        assert!(stray.has());
    }

    #[test]
    fn test_add_settles_size_delta() {
        let clock = Clock::new(1000);
        let stats = Stats::new();
        clock.reserve(64, Category::PACK, &stats, |_| {});
        clock.add(entry(0, 16) as Arc<dyn ClockEntry>, 64, &stats);
        assert_eq!(stats.live_bytes.sum(), 16);
        clock.reserve(64, Category::PACK, &stats, |_| {});
        clock.add(entry(16, 100) as Arc<dyn ClockEntry>, 64, &stats);
        assert_eq!(stats.live_bytes.sum(), 116);
    }
}
