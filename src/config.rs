//! Cache Configuration
//!
//! [`BlockCacheConfig`] has public fields, like the rest of the crate's
//! configuration: build one with struct update syntax over
//! [`Default::default()`] and hand it to [`BlockCache::new`](crate::BlockCache::new),
//! which validates it before allocating anything.
//!
//! # Sizing
//!
//! - **`block_limit`**: bytes of block and object data the cache may hold.
//!   Should be a whole multiple of `block_size`; [`apply_settings`]
//!   enforces that, direct construction only requires `block_limit >=
//!   block_size`.
//! - **`block_size`**: the unit blocks are aligned to when the backing file
//!   has no native size. A power of two, at least 512.
//! - **`concurrency_level`**: number of load lock stripes. More stripes means
//!   fewer unrelated loads waiting on each other.
//!
//! The table gets `2.5 * block_limit / block_size` buckets, capped so that a
//! huge limit with tiny blocks does not allocate an absurd bucket array.
//!
//! # Settings
//!
//! [`apply_settings`] reads the keys a repository config file uses:
//!
//! | Key | Field | Example |
//! |-----|-------|---------|
//! | `core.dfs.blockLimit` | `block_limit` | `256m` |
//! | `core.dfs.blockSize` | `block_size` | `64k` |
//! | `core.dfs.concurrencyLevel` | `concurrency_level` | `32` |
//! | `core.dfs.streamRatio` | `stream_ratio` | `0.30` |
//!
//! Keys are matched case-insensitively. Sizes accept a `k`, `m` or `g`
//! suffix.
//!
//! [`apply_settings`]: BlockCacheConfig::apply_settings
//!
//! # Examples
//!
//! ```
//! use dfs_block_cache::{BlockCacheConfig, MB};
//!
//! let mut config = BlockCacheConfig {
//!     block_limit: 256 * MB,
//!     ..Default::default()
//! };
//! config
//!     .apply_settings([("core.dfs.blockSize", "16k")])
//!     .unwrap();
//! assert_eq!(config.block_size, 16 * 1024);
//! assert!(config.validate().is_ok());
//! ```

use crate::events::IndexEventListener;
use crate::key::Category;
use core::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;

#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// One kibibyte.
pub const KB: u64 = 1024;
/// One mebibyte.
pub const MB: u64 = 1024 * KB;
/// Hotness cap for categories without an explicit entry in
/// [`BlockCacheConfig::hot_limits`].
pub const DEFAULT_HOT_LIMIT: u32 = 1;

const MIN_BLOCK_SIZE: u32 = 512;

/// Callback receiving how long a ref load waited for its lock.
pub type WaitTimeConsumer = Arc<dyn Fn(Duration) + Send + Sync>;

/// Errors reported when a configuration is rejected.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// The byte limit is zero.
    #[error("block limit must be positive")]
    BlockLimitNotPositive,
    /// The block size is not a power of two.
    #[error("block size {0} is not a power of 2")]
    BlockSizeNotPowerOfTwo(u32),
    /// The block size is below the minimum.
    #[error("block size {0} is smaller than 512")]
    BlockSizeTooSmall(u32),
    /// The limit cannot hold even one block.
    #[error("block limit {limit} is smaller than block size {block_size}")]
    LimitSmallerThanBlockSize {
        /// Configured limit.
        limit: u64,
        /// Configured block size.
        block_size: u32,
    },
    /// The limit is not a whole number of blocks.
    #[error("block limit {limit} must be a multiple of block size {block_size}")]
    LimitNotMultipleOfBlockSize {
        /// Configured limit.
        limit: u64,
        /// Configured block size.
        block_size: u32,
    },
    /// No load lock stripes.
    #[error("concurrency level must be positive")]
    ZeroConcurrencyLevel,
    /// The stream ratio is NaN or outside `0.0..=1.0`.
    #[error("stream ratio {0} is outside 0.0..=1.0")]
    InvalidStreamRatio(f64),
    /// A category was given a hotness cap of zero.
    #[error("hot limit for category {0} must be positive")]
    ZeroHotLimit(Category),
    /// A setting value could not be parsed.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Setting key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// A setting key is not recognised.
    #[error("unknown setting: {0}")]
    UnknownKey(String),
}

/// Configuration for a [`BlockCache`](crate::BlockCache).
#[derive(Clone)]
pub struct BlockCacheConfig {
    /// Maximum bytes of data held. The limit is soft: see
    /// [`BlockCache`](crate::BlockCache).
    pub block_limit: u64,
    /// Default block size used to align positions.
    pub block_size: u32,
    /// Fraction of `block_limit` a single stream read may be to go through
    /// the cache.
    pub stream_ratio: f64,
    /// Number of load lock stripes, also per category for object loads.
    pub concurrency_level: u32,
    /// Hotness cap per category.
    pub hot_limits: HashMap<Category, u32>,
    /// Receives the lock wait time of every object load that missed.
    pub ref_lock_wait_time: Option<WaitTimeConsumer>,
    /// Receives index and bitmap request and eviction events.
    pub index_event_listener: Option<Arc<dyn IndexEventListener>>,
}

impl Default for BlockCacheConfig {
    fn default() -> Self {
        Self {
            block_limit: 32 * MB,
            block_size: 64 * KB as u32,
            stream_ratio: 0.30,
            concurrency_level: 32,
            hot_limits: HashMap::new(),
            ref_lock_wait_time: None,
            index_event_listener: None,
        }
    }
}

impl BlockCacheConfig {
    /// Hotness cap for `category`.
    pub fn hot_limit(&self, category: Category) -> u32 {
        self.hot_limits
            .get(&category)
            .copied()
            .unwrap_or(DEFAULT_HOT_LIMIT)
    }

    /// Checks every field. Called by [`BlockCache::new`](crate::BlockCache::new).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_limit == 0 {
            return Err(ConfigError::BlockLimitNotPositive);
        }
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(ConfigError::BlockSizeTooSmall(self.block_size));
        }
        if !self.block_size.is_power_of_two() {
            return Err(ConfigError::BlockSizeNotPowerOfTwo(self.block_size));
        }
        if self.block_limit < u64::from(self.block_size) {
            return Err(ConfigError::LimitSmallerThanBlockSize {
                limit: self.block_limit,
                block_size: self.block_size,
            });
        }
        if self.concurrency_level == 0 {
            return Err(ConfigError::ZeroConcurrencyLevel);
        }
        if !(0.0..=1.0).contains(&self.stream_ratio) {
            return Err(ConfigError::InvalidStreamRatio(self.stream_ratio));
        }
        if let Some((c, _)) = self.hot_limits.iter().find(|(_, v)| **v == 0) {
            return Err(ConfigError::ZeroHotLimit(*c));
        }
        Ok(())
    }

    /// Applies `core.dfs.*` settings on top of the current values.
    ///
    /// Settings that are absent keep their current value. After all settings
    /// are applied the limit must be a whole multiple of the block size.
    pub fn apply_settings<'a, I>(&mut self, settings: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in settings {
            let invalid = || ConfigError::InvalidValue {
                key: key.into(),
                value: value.into(),
            };
            match key.to_ascii_lowercase().as_str() {
                "core.dfs.blocklimit" => {
                    self.block_limit = parse_size(value).ok_or_else(invalid)?;
                }
                "core.dfs.blocksize" => {
                    self.block_size = parse_size(value)
                        .and_then(|v| u32::try_from(v).ok())
                        .ok_or_else(invalid)?;
                }
                "core.dfs.concurrencylevel" => {
                    self.concurrency_level = parse_size(value)
                        .and_then(|v| u32::try_from(v).ok())
                        .ok_or_else(invalid)?;
                }
                "core.dfs.streamratio" => {
                    self.stream_ratio = value.trim().parse().map_err(|_| invalid())?;
                }
                _ => return Err(ConfigError::UnknownKey(key.into())),
            }
        }

        if self.block_size != 0 && self.block_limit % u64::from(self.block_size) != 0 {
            return Err(ConfigError::LimitNotMultipleOfBlockSize {
                limit: self.block_limit,
                block_size: self.block_size,
            });
        }
        Ok(())
    }
}

/// Parses an integer with an optional `k`, `m` or `g` suffix.
fn parse_size(value: &str) -> Option<u64> {
    let v = value.trim();
    let (digits, unit) = match v.char_indices().last()? {
        (i, 'k' | 'K') => (&v[..i], KB),
        (i, 'm' | 'M') => (&v[..i], MB),
        (i, 'g' | 'G') => (&v[..i], 1024 * MB),
        _ => (v, 1),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(unit)
}

impl fmt::Debug for BlockCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCacheConfig")
            .field("block_limit", &self.block_limit)
            .field("block_size", &self.block_size)
            .field("stream_ratio", &self.stream_ratio)
            .field("concurrency_level", &self.concurrency_level)
            .field("hot_limits", &self.hot_limits)
            .field("ref_lock_wait_time", &self.ref_lock_wait_time.is_some())
            .field("index_event_listener", &self.index_event_listener.is_some())
            .finish()
    }
}
