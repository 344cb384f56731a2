//! Swappable cache owner.
//!
//! A [`BlockCacheHandle`] is what collaborators hold instead of a global
//! cache. [`reconfigure`](BlockCacheHandle::reconfigure) builds a brand-new
//! empty cache and swaps it in. Blocks and objects callers already hold stay
//! valid, since they are reference counted and immutable, but nothing from
//! the old cache can be found through the handle any more.

use crate::cache::BlockCache;
use crate::config::{BlockCacheConfig, ConfigError};
use arc_swap::ArcSwap;
use core::fmt;
use std::sync::Arc;
use tracing::debug;

/// Shared owner of the current [`BlockCache`].
///
/// # Examples
///
/// ```
/// use dfs_block_cache::{BlockCacheConfig, BlockCacheHandle, MB};
///
/// let handle: BlockCacheHandle = BlockCacheHandle::new(BlockCacheConfig::default()).unwrap();
/// let before = handle.cache();
///
/// handle
///     .reconfigure(BlockCacheConfig {
///         block_limit: 64 * MB,
///         ..Default::default()
///     })
///     .unwrap();
/// assert_eq!(handle.cache().max_bytes(), 64 * MB);
/// assert_eq!(before.max_bytes(), 32 * MB);
/// ```
pub struct BlockCacheHandle<R = ()> {
    current: ArcSwap<BlockCache<R>>,
}

impl<R: Send + Sync + 'static> BlockCacheHandle<R> {
    /// Creates a handle owning a new cache built from `config`.
    pub fn new(config: BlockCacheConfig) -> Result<Self, ConfigError> {
        Ok(Self::from_cache(BlockCache::new(config)?))
    }

    /// Wraps an existing cache.
    pub fn from_cache(cache: BlockCache<R>) -> Self {
        Self {
            current: ArcSwap::from_pointee(cache),
        }
    }

    /// Returns the cache currently in use.
    ///
    /// The returned cache stays usable after a later
    /// [`reconfigure`](Self::reconfigure); it is simply no longer current.
    pub fn cache(&self) -> Arc<BlockCache<R>> {
        self.current.load_full()
    }

    /// Replaces the current cache with an empty one built from `config`.
    ///
    /// On error the current cache is left in place.
    pub fn reconfigure(&self, config: BlockCacheConfig) -> Result<(), ConfigError> {
        let cache = BlockCache::new(config)?;
        debug!(
            max_bytes = cache.max_bytes(),
            block_size = cache.block_size(),
            "block cache reconfigured"
        );
        self.current.store(Arc::new(cache));
        Ok(())
    }
}

impl<R> fmt::Debug for BlockCacheHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCacheHandle")
            .field("current", &*self.current.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KB;
    use crate::key::{Category, StreamKey};

    #[test]
    fn test_reconfigure_invalid_keeps_current() {
        let handle: BlockCacheHandle<u32> = BlockCacheHandle::new(BlockCacheConfig::default()).unwrap();
        let key = StreamKey::new("pack-1.idx", Category::INDEX);
        handle.cache().put_ref(&key, 0, 16, 9);

        let bad = BlockCacheConfig {
            block_size: 1000,
            ..Default::default()
        };
        assert!(handle.reconfigure(bad).is_err());
        assert!(handle.cache().contains(&key, 0));
    }

    #[test]
    fn test_reconfigure_drops_lookups_not_values() {
        let handle: BlockCacheHandle<u32> = BlockCacheHandle::new(BlockCacheConfig::default()).unwrap();
        let key = StreamKey::new("pack-1.idx", Category::INDEX);
        let held = handle.cache().put_ref(&key, 0, 16, 9);

        handle
            .reconfigure(BlockCacheConfig {
                block_limit: 256 * KB,
                ..Default::default()
            })
            .unwrap();
        assert!(!handle.cache().contains(&key, 0));
        assert_eq!(handle.cache().current_size().iter().sum::<u64>(), 0);
        assert_eq!(held.get().as_deref(), Some(&9));
    }
}
