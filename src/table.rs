//! Lock-Free Hash Table
//!
//! A fixed number of buckets, each holding an immutable singly-linked chain of
//! [`CacheRef`]s. Readers load a bucket head once and walk it to the end
//! without taking any lock; because chains are never modified in place, a
//! walk always sees one consistent snapshot.
//!
//! Writers build a new chain and publish it with compare-and-swap on the
//! bucket slot, retrying on contention:
//!
//! ```text
//!   bucket[s] ──▶ [C] ──▶ [B✝] ──▶ [A] ──▶ ∅          (B evicted)
//!
//!   insert D:   new = [D] ──▶ clean([C] ──▶ [B✝] ──▶ [A])
//!                   = [D] ──▶ [C'] ──▶ [A]           (A shared, C copied)
//!   CAS(bucket[s], old head, new)
//! ```
//!
//! Evicted entries are not unlinked when they die. They are dropped the next
//! time their bucket is rewritten, which keeps eviction itself cheap.

use crate::entry::CacheRef;
use crate::key::StreamKey;
use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// One immutable link in a bucket chain.
pub(crate) struct HashEntry<V> {
    entry: Arc<CacheRef<V>>,
    next: Chain<V>,
}

/// Head of a bucket chain, `None` for an empty bucket.
pub(crate) type Chain<V> = Option<Arc<HashEntry<V>>>;

impl<V> Drop for HashEntry<V> {
    fn drop(&mut self) {
        // Unlink uniquely owned successors one at a time so long chains do
        // not recurse through `Arc::drop`.
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut n) => next = n.next.take(),
                Err(_) => break,
            }
        }
    }
}

pub(crate) struct Table<V> {
    buckets: Box<[ArcSwapOption<HashEntry<V>>]>,
}

impl<V> Table<V> {
    pub(crate) fn new(size: usize) -> Self {
        let buckets: Vec<_> = (0..size).map(|_| ArcSwapOption::empty()).collect();
        Self {
            buckets: buckets.into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Snapshot of the chain in `slot`.
    #[inline]
    pub(crate) fn head(&self, slot: usize) -> Chain<V> {
        self.buckets[slot].load_full()
    }

    /// Returns `true` if both snapshots are the same chain.
    #[inline]
    pub(crate) fn same(a: &Chain<V>, b: &Chain<V>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Finds the entry for `(key, position)` in `chain`.
    ///
    /// Only the first match counts: it is the newest entry for that key. A
    /// dead first match means the key is not cached.
    pub(crate) fn scan(
        chain: &Chain<V>,
        key: &StreamKey,
        position: u64,
    ) -> Option<Arc<CacheRef<V>>> {
        let mut node = chain.as_deref();
        while let Some(n) = node {
            let r = &n.entry;
            if r.position() == position && r.key() == key {
                return r.has().then(|| Arc::clone(r));
            }
            node = n.next.as_deref();
        }
        None
    }

    /// Publishes `entry` at the head of `slot`.
    ///
    /// `current` is the caller's latest snapshot of the bucket. If a live
    /// entry for the same key shows up in the bucket before the swap lands,
    /// nothing is published and that entry is returned instead, so at most
    /// one live entry exists per key.
    pub(crate) fn insert(
        &self,
        slot: usize,
        entry: Arc<CacheRef<V>>,
        mut current: Chain<V>,
    ) -> Result<(), Arc<CacheRef<V>>> {
        let bucket = &self.buckets[slot];
        loop {
            if let Some(existing) = Self::scan(&current, entry.key(), entry.position()) {
                return Err(existing);
            }
            let head = Arc::new(HashEntry {
                entry: Arc::clone(&entry),
                next: Self::clean(&current),
            });
            let prev = bucket.compare_and_swap(&current, Some(head));
            if Self::same(&*prev, &current) {
                return Ok(());
            }
            current = (*prev).clone();
        }
    }

    /// Returns `chain` without its dead entries.
    ///
    /// The longest suffix free of dead entries is shared with the old chain;
    /// live entries in front of the last dead one are copied.
    pub(crate) fn clean(chain: &Chain<V>) -> Chain<V> {
        let mut nodes: Vec<&Arc<HashEntry<V>>> = Vec::new();
        let mut last_dead = None;
        let mut node = chain.as_ref();
        while let Some(n) = node {
            if !n.entry.has() {
                last_dead = Some(nodes.len());
            }
            nodes.push(n);
            node = n.next.as_ref();
        }

        let Some(last_dead) = last_dead else {
            return chain.clone();
        };
        let mut tail = nodes[last_dead].next.clone();
        for n in nodes[..last_dead].iter().rev() {
            if n.entry.has() {
                tail = Some(Arc::new(HashEntry {
                    entry: Arc::clone(&n.entry),
                    next: tail,
                }));
            }
        }
        tail
    }

    /// Calls `f` for every live entry in the table.
    #[cfg(test)]
    pub(crate) fn for_each_live(&self, mut f: impl FnMut(&CacheRef<V>)) {
        for slot in 0..self.buckets.len() {
            let chain = self.head(slot);
            let mut node = chain.as_deref();
            while let Some(n) = node {
                if n.entry.has() {
                    f(&n.entry);
                }
                node = n.next.as_deref();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ClockEntry;
    use crate::key::Category;

    fn key(name: &str) -> StreamKey {
        StreamKey::with_hash(name, 1, Category::PACK)
    }

    fn entry(name: &str, pos: u64) -> Arc<CacheRef<u64>> {
        Arc::new(CacheRef::new(key(name), pos, 8, Arc::new(pos), 1))
    }

    fn chain_len(chain: &Chain<u64>) -> usize {
        let mut n = 0;
        let mut node = chain.as_deref();
        while let Some(e) = node {
            n += 1;
            node = e.next.as_deref();
        }
        n
    }

    #[test]
    fn test_insert_and_scan() {
        let table: Table<u64> = Table::new(4);
        let a = entry("a", 0);
        table.insert(1, Arc::clone(&a), table.head(1)).unwrap();
        let found = Table::scan(&table.head(1), &key("a"), 0).unwrap();
        assert!(Arc::ptr_eq(&found, &a));
        assert!(Table::scan(&table.head(1), &key("a"), 8).is_none());
        assert!(Table::scan(&table.head(1), &key("b"), 0).is_none());
    }

    #[test]
    fn test_insert_with_stale_snapshot_retries() {
        let table: Table<u64> = Table::new(1);
        let stale = table.head(0);
        table.insert(0, entry("a", 0), table.head(0)).unwrap();
        table.insert(0, entry("b", 0), stale).unwrap();
        assert_eq!(chain_len(&table.head(0)), 2);
        assert!(Table::scan(&table.head(0), &key("a"), 0).is_some());
        assert!(Table::scan(&table.head(0), &key("b"), 0).is_some());
    }

    #[test]
    fn test_insert_rejects_duplicate_live_key() {
        let table: Table<u64> = Table::new(1);
        let first = entry("a", 0);
        table.insert(0, Arc::clone(&first), table.head(0)).unwrap();
        let err = table.insert(0, entry("a", 0), table.head(0)).unwrap_err();
        assert!(Arc::ptr_eq(&err, &first));
        assert_eq!(chain_len(&table.head(0)), 1);
    }

    #[test]
    fn test_dead_entry_replaced_on_reinsert() {
        let table: Table<u64> = Table::new(1);
        let first = entry("a", 0);
        table.insert(0, Arc::clone(&first), table.head(0)).unwrap();
        first.evict();
        assert!(Table::scan(&table.head(0), &key("a"), 0).is_none());
        table.insert(0, entry("a", 0), table.head(0)).unwrap();
        assert_eq!(chain_len(&table.head(0)), 1);
        assert!(Table::scan(&table.head(0), &key("a"), 0).is_some());
    }

    #[test]
    fn test_clean_drops_dead_and_keeps_order() {
        let table: Table<u64> = Table::new(1);
        let entries: Vec<_> = (0..6).map(|i| entry("a", i * 8)).collect();
        for e in &entries {
            table.insert(0, Arc::clone(e), table.head(0)).unwrap();
        }
        entries[1].evict();
        entries[4].evict();

        let cleaned = Table::clean(&table.head(0));
        assert_eq!(chain_len(&cleaned), 4);

        let mut positions = Vec::new();
        let mut node = cleaned.as_deref();
        while let Some(n) = node {
            positions.push(n.entry.position());
            node = n.next.as_deref();
        }
        assert_eq!(positions, vec![40, 24, 16, 0]);
    }

    #[test]
    fn test_clean_shares_live_suffix() {
        let table: Table<u64> = Table::new(1);
        let old = entry("a", 0);
        let dead = entry("a", 8);
        table.insert(0, Arc::clone(&old), table.head(0)).unwrap();
        table.insert(0, Arc::clone(&dead), table.head(0)).unwrap();
        dead.evict();

        let before = table.head(0);
        let suffix = before.as_ref().unwrap().next.clone();
        let cleaned = Table::clean(&before);
        assert!(Table::same(&cleaned, &suffix));
    }

    #[test]
    fn test_clean_without_dead_is_identity() {
        let table: Table<u64> = Table::new(1);
        table.insert(0, entry("a", 0), table.head(0)).unwrap();
        table.insert(0, entry("a", 8), table.head(0)).unwrap();
        let head = table.head(0);
        assert!(Table::same(&Table::clean(&head), &head));
    }

    #[test]
    fn test_long_chain_drop_is_iterative() {
        let mut chain: Chain<u64> = None;
        for i in 0..200_000u64 {
            chain = Some(Arc::new(HashEntry {
                entry: entry("a", i),
                next: chain,
            }));
        }
        drop(chain);
    }
}
