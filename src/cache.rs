//! Block Cache
//!
//! [`BlockCache`] caches two kinds of data under one byte budget:
//!
//! - **Blocks**: aligned slices of a backing stream, loaded on demand through
//!   a [`BlockFile`] with [`get_or_load`](BlockCache::get_or_load).
//! - **Objects** (`R`): anything derived from a stream, such as a parsed
//!   index, loaded through a closure with
//!   [`get_or_load_ref`](BlockCache::get_or_load_ref).
//!
//! Both live in their own lock-free table and share one clock ring, so a cold
//! block can be evicted to make room for an object and vice versa.
//!
//! # Request Flow
//!
//! ```text
//!   get_or_load(file, pos)
//!     │
//!     ├─ lock-free scan of bucket ──▶ hit: warm entry, return
//!     │
//!     ├─ reserve block_size           (clock lock, may evict)
//!     ├─ lock load stripe
//!     ├─ bucket changed? rescan ─────▶ hit: credit reservation, return
//!     ├─ read_one_block               (no cache lock but the stripe held)
//!     ├─ publish with CAS, add to ring, settle size delta
//!     └─ unlock stripe
//! ```
//!
//! A loader error credits the reservation back and is returned unchanged.
//!
//! # Capacity
//!
//! The limit is soft. When every entry is hot, or one value is larger than
//! the whole limit, the value is admitted and the cache runs over until later
//! sweeps bring it back down. [`fill_percentage`](BlockCache::fill_percentage)
//! can report more than 100 in that state.
//!
//! # Lock Striping
//!
//! Loads of the same block serialise on the same stripe, so the second
//! caller finds the first caller's result instead of loading again. Unrelated
//! blocks that share a stripe wait for each other; they are not merged.

use crate::block::{Block, BlockFile};
use crate::clock::Clock;
use crate::config::{BlockCacheConfig, ConfigError, WaitTimeConsumer, DEFAULT_HOT_LIMIT};
use crate::entry::{CacheRef, ClockEntry};
use crate::events::IndexEvents;
use crate::key::{Category, StreamKey};
use crate::lock::LockPool;
use crate::metrics::{self, CacheMetrics, CacheStats, Stats};
use crate::table::Table;
use core::fmt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;

#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

const MAX_TABLE_SIZE: u64 = 1 << 22;

/// An object produced by a [`get_or_load_ref`](BlockCache::get_or_load_ref)
/// loader, together with the bytes it should be charged.
#[derive(Debug, Clone)]
pub struct LoadedRef<R> {
    /// The loaded object.
    pub value: R,
    /// Bytes charged against the cache limit.
    pub size: u64,
}

impl<R> LoadedRef<R> {
    /// Pairs `value` with its size.
    pub fn new(value: R, size: u64) -> Self {
        Self { value, size }
    }
}

/// Concurrent clock-evicting cache of stream blocks and derived objects.
///
/// `R` is the object type stored by [`get_or_load_ref`](Self::get_or_load_ref)
/// and [`put_ref`](Self::put_ref). Use `()` when only blocks are cached.
///
/// # Examples
///
/// ```
/// use dfs_block_cache::{Block, BlockCache, BlockCacheConfig, BlockFile, Category, StreamKey, KB};
///
/// struct Zeros(StreamKey);
///
/// impl BlockFile for Zeros {
///     type Error = std::io::Error;
///
///     fn key(&self) -> &StreamKey {
///         &self.0
///     }
///
///     fn read_one_block(&self, pos: u64, size: u32) -> Result<Block, Self::Error> {
///         Ok(Block::new(self.0.clone(), pos, vec![0u8; size as usize]))
///     }
/// }
///
/// let config = BlockCacheConfig {
///     block_limit: 64 * KB,
///     block_size: 4 * KB as u32,
///     ..Default::default()
/// };
/// let cache: BlockCache = BlockCache::new(config).unwrap();
/// let file = Zeros(StreamKey::new("pack-1.pack", Category::PACK));
///
/// let block = cache.get_or_load(&file, 5000).unwrap();
/// assert_eq!(block.start(), 4096);
/// assert!(cache.contains(file.key(), 4096));
/// assert_eq!(cache.miss_count()[Category::PACK.index()], 1);
/// ```
pub struct BlockCache<R = ()> {
    blocks: Table<Block>,
    refs: Table<R>,
    load_locks: LockPool,
    ref_locks: Box<[LockPool]>,
    max_bytes: u64,
    max_stream_through_cache: u64,
    block_size: u32,
    block_size_shift: u32,
    clock: Clock,
    stats: Stats,
    hot_limits: HashMap<Category, u32>,
    ref_lock_wait_time: Option<WaitTimeConsumer>,
    events: Option<IndexEvents>,
}

impl<R: Send + Sync + 'static> BlockCache<R> {
    /// Creates an empty cache.
    ///
    /// # Errors
    ///
    /// Returns the first problem [`BlockCacheConfig::validate`] finds.
    pub fn new(config: BlockCacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let max_bytes = config.block_limit;
        let block_size = config.block_size;
        let blocks_in_limit = max_bytes / u64::from(block_size);
        let table_size = (5 * blocks_in_limit / 2).clamp(1, MAX_TABLE_SIZE) as usize;
        let concurrency = config.concurrency_level as usize;

        debug!(
            max_bytes,
            block_size,
            table_size,
            concurrency,
            "block cache created"
        );

        let ref_locks: Vec<_> = (0..Category::KNOWN)
            .map(|_| LockPool::new(concurrency))
            .collect();

        Ok(Self {
            blocks: Table::new(table_size),
            refs: Table::new(table_size),
            load_locks: LockPool::new(concurrency),
            ref_locks: ref_locks.into_boxed_slice(),
            max_bytes,
            max_stream_through_cache: (max_bytes as f64 * config.stream_ratio) as u64,
            block_size,
            block_size_shift: block_size.trailing_zeros(),
            clock: Clock::new(max_bytes),
            stats: Stats::new(),
            hot_limits: config.hot_limits,
            ref_lock_wait_time: config.ref_lock_wait_time,
            events: config.index_event_listener.map(IndexEvents::new),
        })
    }

    /// Returns the block of `file` holding byte `position`, loading it on a
    /// miss.
    ///
    /// Concurrent callers missing on the same block perform one load between
    /// them. If the file returns a block starting somewhere other than the
    /// aligned position (its native block size differs from the cache's),
    /// the returned start is used as the entry's position. A cached or loaded
    /// block that does not hold byte `position` is never a hit; the request is
    /// retried once against the file's current alignment.
    ///
    /// # Errors
    ///
    /// Whatever [`BlockFile::read_one_block`] returns, unchanged. The bytes
    /// reserved for the load are released first.
    pub fn get_or_load<F>(&self, file: &F, position: u64) -> Result<Arc<Block>, F::Error>
    where
        F: BlockFile + ?Sized,
    {
        let key = file.key();
        let category = key.category();
        let reserved = u64::from(self.block_size);
        let mut retried = false;

        loop {
            let aligned = file.align_to_block(position, self.block_size);
            let hash = self.hash(key.hash_code(), aligned);
            let slot = self.slot(hash);

            let e1 = self.blocks.head(slot);
            let found = Table::scan(&e1, key, aligned).and_then(|r| r.get());
            if let Some(v) = found.filter(|b| b.contains(key, position)) {
                self.stats.hit.incr(category);
                return Ok(v);
            }

            self.reserve(reserved, category);
            let stripe = self.load_locks.stripe(hash).lock();

            let e2 = self.blocks.head(slot);
            if !Table::same(&e2, &e1) {
                let found = Table::scan(&e2, key, aligned).and_then(|r| r.get());
                if let Some(v) = found.filter(|b| b.contains(key, position)) {
                    self.stats.hit.incr(category);
                    drop(stripe);
                    self.clock.credit(reserved, category, &self.stats);
                    return Ok(v);
                }
            }

            self.stats.miss.incr(category);
            let block = match file.read_one_block(aligned, self.block_size) {
                Ok(b) => Arc::new(b),
                Err(e) => {
                    drop(stripe);
                    self.clock.credit(reserved, category, &self.stats);
                    return Err(e);
                }
            };

            let start = block.start();
            let (slot, mut current) = if start == aligned {
                (slot, e2)
            } else {
                let s = self.slot(self.hash(key.hash_code(), start));
                (s, self.blocks.head(s))
            };

            let entry = Arc::new(CacheRef::new(
                key.clone(),
                start,
                block.size(),
                Arc::clone(&block),
                self.hot_limit(category),
            ));
            let block = loop {
                match self.blocks.insert(slot, Arc::clone(&entry), current) {
                    Ok(()) => {
                        self.clock.add(entry, reserved, &self.stats);
                        break block;
                    }
                    Err(existing) => {
                        let cached = existing.get();
                        // A shorter block under the same start gives way to
                        // one that holds the requested byte.
                        let short = cached.as_ref().is_some_and(|b| !b.contains(key, position))
                            && block.contains(key, position);
                        if short && self.clock.retire(&*existing, &self.stats) {
                            current = self.blocks.head(slot);
                            continue;
                        }
                        self.clock.credit(reserved, category, &self.stats);
                        break cached.unwrap_or(block);
                    }
                }
            };
            drop(stripe);

            if block.contains(key, position) || retried {
                return Ok(block);
            }
            retried = true;
        }
    }

    /// Returns the object cached for `(key, position)`, calling `loader` to
    /// produce it on a miss.
    ///
    /// Object loads lock a stripe from a pool private to the key's category,
    /// so slow index loads do not hold up block loads. Space is reserved
    /// after the loader returns, once the object's size is known.
    ///
    /// # Errors
    ///
    /// Whatever `loader` returns, unchanged. Nothing is reserved or cached
    /// for a failed load.
    pub fn get_or_load_ref<E, L>(
        &self,
        key: &StreamKey,
        position: u64,
        loader: L,
    ) -> Result<Arc<CacheRef<R>>, E>
    where
        L: FnOnce() -> Result<LoadedRef<R>, E>,
    {
        let start = Instant::now();
        let category = key.category();
        let hash = self.hash(key.hash_code(), position);
        let slot = self.slot(hash);

        if let Some(r) = Table::scan(&self.refs.head(slot), key, position) {
            r.mark_hotter();
            self.stats.hit.incr(category);
            self.report_requested(&*r, true, start);
            return Ok(r);
        }

        let lock_start = Instant::now();
        let stripe = self.ref_lock(category, hash).lock();
        if let Some(consumer) = &self.ref_lock_wait_time {
            consumer(lock_start.elapsed());
        }

        let current = self.refs.head(slot);
        if let Some(r) = Table::scan(&current, key, position) {
            drop(stripe);
            r.mark_hotter();
            self.stats.hit.incr(category);
            self.report_requested(&*r, true, start);
            return Ok(r);
        }

        self.stats.miss.incr(category);
        let loaded = loader()?;

        self.reserve(loaded.size, category);
        let entry = Arc::new(CacheRef::new(
            key.clone(),
            position,
            loaded.size,
            Arc::new(loaded.value),
            self.hot_limit(category),
        ));
        let entry = match self.refs.insert(slot, Arc::clone(&entry), current) {
            Ok(()) => {
                self.clock.add(Arc::clone(&entry) as Arc<dyn ClockEntry>, loaded.size, &self.stats);
                entry
            }
            Err(existing) => {
                self.clock.credit(loaded.size, category, &self.stats);
                existing
            }
        };
        drop(stripe);

        self.report_requested(&*entry, false, start);
        Ok(entry)
    }

    /// Caches an already loaded block.
    ///
    /// If a live entry for the block's stream and start exists it is kept
    /// and returned instead.
    pub fn put_block(&self, block: Block) -> Arc<CacheRef<Block>> {
        let key = block.stream().clone();
        let start = block.start();
        let size = block.size();
        self.put(&self.blocks, &key, start, size, Arc::new(block))
    }

    /// Caches an already built object at `(key, position)`.
    ///
    /// If a live entry exists it is kept and returned instead.
    pub fn put_ref(&self, key: &StreamKey, position: u64, size: u64, value: R) -> Arc<CacheRef<R>> {
        self.put(&self.refs, key, position, size, Arc::new(value))
    }

    fn put<V: Send + Sync + 'static>(
        &self,
        table: &Table<V>,
        key: &StreamKey,
        position: u64,
        size: u64,
        value: Arc<V>,
    ) -> Arc<CacheRef<V>> {
        let category = key.category();
        let hash = self.hash(key.hash_code(), position);
        let slot = self.slot(hash);

        let e1 = table.head(slot);
        if let Some(r) = Table::scan(&e1, key, position) {
            r.mark_hotter();
            return r;
        }

        self.reserve(size, category);
        let _stripe = self.load_locks.stripe(hash).lock();

        let entry = Arc::new(CacheRef::new(
            key.clone(),
            position,
            size,
            value,
            self.hot_limit(category),
        ));
        match table.insert(slot, Arc::clone(&entry), table.head(slot)) {
            Ok(()) => {
                self.clock.add(Arc::clone(&entry) as Arc<dyn ClockEntry>, size, &self.stats);
                entry
            }
            Err(existing) => {
                self.clock.credit(size, category, &self.stats);
                existing.mark_hotter();
                existing
            }
        }
    }

    /// Looks up a cached block, counting a hit or a miss.
    pub fn get_block(&self, key: &StreamKey, position: u64) -> Option<Arc<Block>> {
        let slot = self.slot(self.hash(key.hash_code(), position));
        let v = Table::scan(&self.blocks.head(slot), key, position).and_then(|r| r.get());
        self.count_lookup(key.category(), v.is_some());
        v
    }

    /// Looks up a cached object, counting a hit or a miss.
    pub fn get_ref(&self, key: &StreamKey, position: u64) -> Option<Arc<CacheRef<R>>> {
        let slot = self.slot(self.hash(key.hash_code(), position));
        let r = Table::scan(&self.refs.head(slot), key, position);
        if let Some(r) = &r {
            r.mark_hotter();
        }
        self.count_lookup(key.category(), r.is_some());
        r
    }

    /// Returns `true` if a block or object is cached at `(key, position)`.
    ///
    /// Does not count as an access.
    pub fn contains(&self, key: &StreamKey, position: u64) -> bool {
        let slot = self.slot(self.hash(key.hash_code(), position));
        Table::scan(&self.blocks.head(slot), key, position).is_some()
            || Table::scan(&self.refs.head(slot), key, position).is_some()
    }

    /// Returns `true` if the first block of `key` is cached.
    pub fn has_block_zero(&self, key: &StreamKey) -> bool {
        let slot = self.slot(self.hash(key.hash_code(), 0));
        Table::scan(&self.blocks.head(slot), key, 0)
            .and_then(|r| r.peek())
            .is_some_and(|b| b.contains(key, 0))
    }

    fn reserve(&self, bytes: u64, category: Category) {
        self.clock
            .reserve(bytes, category, &self.stats, |e| {
                if let Some(events) = &self.events {
                    events.evicted(e);
                }
            });
    }

    fn report_requested(&self, e: &dyn ClockEntry, cache_hit: bool, start: Instant) {
        if let Some(events) = &self.events {
            events.requested(e, cache_hit, start);
        }
    }

    fn ref_lock(&self, category: Category, hash: u32) -> &Mutex<()> {
        self.ref_locks[category.index() % self.ref_locks.len()].stripe(hash)
    }
}

impl<R> BlockCache<R> {
    #[inline]
    fn hash(&self, key_hash: u32, position: u64) -> u32 {
        key_hash.wrapping_add((position >> self.block_size_shift) as u32)
    }

    #[inline]
    fn slot(&self, hash: u32) -> usize {
        (hash >> 1) as usize % self.blocks.len()
    }

    fn hot_limit(&self, category: Category) -> u32 {
        self.hot_limits
            .get(&category)
            .copied()
            .unwrap_or(DEFAULT_HOT_LIMIT)
    }

    fn count_lookup(&self, category: Category, hit: bool) {
        if hit {
            self.stats.hit.incr(category);
        } else {
            self.stats.miss.incr(category);
        }
    }

    /// Configured block size.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Configured byte limit.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Whether a sequential read of `length` bytes should be copied through
    /// the cache rather than streamed past it.
    pub fn should_copy_through_cache(&self, length: u64) -> bool {
        length <= self.max_stream_through_cache
    }

    /// Bytes held, per category.
    pub fn current_size(&self) -> Vec<u64> {
        self.stats.live_bytes.values()
    }

    /// Percentage of the limit in use. May exceed 100.
    pub fn fill_percentage(&self) -> u64 {
        self.stats.live_bytes.sum() * 100 / self.max_bytes
    }

    /// Hits per category.
    pub fn hit_count(&self) -> Vec<u64> {
        self.stats.hit.values()
    }

    /// Misses per category.
    pub fn miss_count(&self) -> Vec<u64> {
        self.stats.miss.values()
    }

    /// Hits plus misses per category.
    pub fn total_request_count(&self) -> Vec<u64> {
        metrics::total_requests(&self.stats.hit.values(), &self.stats.miss.values())
    }

    /// Integer hit percentage per category.
    pub fn hit_ratio(&self) -> Vec<u64> {
        metrics::hit_ratios(&self.stats.hit.values(), &self.stats.miss.values())
    }

    /// Evictions per category.
    pub fn evictions(&self) -> Vec<u64> {
        self.stats.evict.values()
    }

    /// Snapshot of every counter.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.max_bytes)
    }
}

impl<R> CacheMetrics for BlockCache<R> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.stats().to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "Clock"
    }
}

impl<R> fmt::Debug for BlockCache<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCache")
            .field("max_bytes", &self.max_bytes)
            .field("block_size", &self.block_size)
            .field("table_size", &self.blocks.len())
            .field("live_bytes", &self.stats.live_bytes.sum())
            .finish()
    }
}
