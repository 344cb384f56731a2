#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             BlockCache<R>                               │
//! │                                                                         │
//! │   Table<Block>               Table<R>                                   │
//! │   ┌───┬───┬───┬───┐          ┌───┬───┬───┬───┐   lock-free reads,       │
//! │   │ ● │ ∅ │ ● │...│          │ ∅ │ ● │ ∅ │...│   CAS publish            │
//! │   └─┼─┴───┴─┼─┴───┘          └───┴─┼─┴───┴───┘                          │
//! │     ▼       ▼                      ▼                                    │
//! │   [ref]   [ref]──▶[ref✝]         [ref]          immutable chains        │
//! │     │       │                      │                                    │
//! │     └───────┴──────────┬───────────┘                                    │
//! │                        ▼                                                │
//! │          Clock ring (one Mutex): hand ─▶ A ─▶ B ─▶ C ─▶ ...             │
//! │          + live bytes per category                                      │
//! │                                                                         │
//! │   LockPool (load stripes)     LockPool × category (object stripes)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Reference
//!
//! | Operation | Locks | Counts as |
//! |-----------|-------|-----------|
//! | [`BlockCache::get_or_load`] | stripe + clock on miss | hit or miss |
//! | [`BlockCache::get_or_load_ref`] | category stripe + clock on miss | hit or miss |
//! | [`BlockCache::put_block`] / [`BlockCache::put_ref`] | stripe + clock | nothing |
//! | [`BlockCache::get_block`] / [`BlockCache::get_ref`] | none | hit or miss |
//! | [`BlockCache::contains`] / [`BlockCache::has_block_zero`] | none | nothing |
//!
//! ## Objects
//!
//! ```rust
//! use dfs_block_cache::{BlockCache, BlockCacheConfig, Category, LoadedRef, StreamKey};
//!
//! let cache: BlockCache<Vec<u32>> = BlockCache::new(BlockCacheConfig::default()).unwrap();
//! let idx = StreamKey::new("pack-1234.idx", Category::INDEX);
//!
//! let r = cache
//!     .get_or_load_ref(&idx, 0, || Ok::<_, std::io::Error>(LoadedRef::new(vec![1, 2, 3], 12)))
//!     .unwrap();
//! assert_eq!(r.get().unwrap().len(), 3);
//!
//! // Second request is a hit; the loader is not called.
//! let again = cache
//!     .get_or_load_ref(&idx, 0, || -> Result<_, std::io::Error> { unreachable!() })
//!     .unwrap();
//! assert_eq!(again.size(), 12);
//! assert_eq!(cache.hit_ratio()[Category::INDEX.index()], 50);
//! ```
//!
//! ## Modules
//!
//! - [`key`]: stream identity and categories
//! - [`block`]: block payload and the loader trait
//! - [`entry`]: cache entries and hotness
//! - [`config`]: configuration and settings parsing
//! - [`metrics`]: per-category statistics
//! - [`events`]: index load and eviction events

/// Stream identity.
///
/// [`StreamKey`] names a backing stream; [`Category`] says what kind of
/// stream it is.
pub mod key;

/// Block payload and the [`BlockFile`] loader trait.
pub mod block;

/// Cache entry type.
///
/// Provides [`CacheRef`], the shared record for every cached block or
/// object, with its hotness counter.
pub mod entry;

/// Immutable-chain hash table.
pub(crate) mod table;

/// Striped load locks.
pub(crate) mod lock;

/// Clock ring, reservations and the eviction sweep.
pub(crate) mod clock;

/// Cache configuration.
pub mod config;

/// Cache metrics system.
///
/// Per-category counters for hits, misses, evictions and live bytes, and the
/// [`CacheMetrics`] reporting trait.
pub mod metrics;

/// Index and bitmap event reporting.
pub mod events;

/// The block cache itself.
pub mod cache;

/// Swappable cache owner.
pub mod handle;

pub use block::{Block, BlockFile};
pub use cache::{BlockCache, LoadedRef};
pub use config::{BlockCacheConfig, ConfigError, WaitTimeConsumer, DEFAULT_HOT_LIMIT, KB, MB};
pub use entry::CacheRef;
pub use events::IndexEventListener;
pub use handle::BlockCacheHandle;
pub use key::{Category, StreamKey};
pub use metrics::{CacheMetrics, CacheStats};
