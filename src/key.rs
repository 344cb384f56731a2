//! Stream Identity
//!
//! Every block or object held by the cache belongs to a logical backing
//! stream: a pack's data, its index, its bitmap index and so on. A
//! [`StreamKey`] names one such stream. It is created once per stream and
//! cloned into every cache entry that belongs to it, so cloning is cheap
//! (a reference count bump on the shared name).
//!
//! # Categories
//!
//! The [`Category`] of a key partitions statistics, hotness caps and the
//! object-load lock pools. The well-known categories mirror the file kinds a
//! pack store keeps next to each other:
//!
//! | Category | Index | Typical content |
//! |----------|-------|-----------------|
//! | `PACK` | 0 | pack data blocks |
//! | `INDEX` | 1 | pack index |
//! | `KEEP` | 2 | keep marker |
//! | `BITMAP_INDEX` | 3 | reachability bitmaps |
//! | `REFTABLE` | 4 | reftable blocks |
//! | `REVERSE_INDEX` | 5 | reverse index |
//! | `COMMIT_GRAPH` | 6 | commit graph |
//! | `OBJECT_SIZE_INDEX` | 7 | object size index |
//!
//! Any other `u8` is accepted; counters grow to make room for it.

use core::fmt;
use core::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;
use std::sync::Arc;

/// Small integer naming the kind of a backing stream.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Category(u8);

impl Category {
    /// Pack data.
    pub const PACK: Category = Category(0);
    /// Pack index.
    pub const INDEX: Category = Category(1);
    /// Keep marker file.
    pub const KEEP: Category = Category(2);
    /// Bitmap index.
    pub const BITMAP_INDEX: Category = Category(3);
    /// Reftable.
    pub const REFTABLE: Category = Category(4);
    /// Reverse index.
    pub const REVERSE_INDEX: Category = Category(5);
    /// Commit graph.
    pub const COMMIT_GRAPH: Category = Category(6);
    /// Object size index.
    pub const OBJECT_SIZE_INDEX: Category = Category(7);

    /// Number of well-known categories. Per-category tables are sized to at
    /// least this many slots.
    pub const KNOWN: usize = 8;

    /// Creates a category from its raw index.
    #[inline]
    pub const fn new(index: u8) -> Self {
        Category(index)
    }

    /// Position of this category in per-category arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether events for this category go to the index event listener.
    #[inline]
    pub(crate) fn is_index_or_bitmap(self) -> bool {
        self == Category::INDEX || self == Category::BITMAP_INDEX
    }

    /// Short name for well-known categories, `None` otherwise.
    pub fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0 => "pack",
            1 => "idx",
            2 => "keep",
            3 => "bitmap",
            4 => "ref",
            5 => "rev",
            6 => "graph",
            7 => "objsize",
            _ => return None,
        })
    }
}

impl fmt::Debug for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "Category({name})"),
            None => write!(f, "Category({})", self.0),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Identity of one logical backing stream.
///
/// Two keys are equal when their hash, category and name are equal. The hash
/// is what places entries into table buckets and lock stripes; the name only
/// disambiguates streams whose hashes collide.
///
/// # Examples
///
/// ```
/// use dfs_block_cache::{Category, StreamKey};
///
/// let pack = StreamKey::new("pack-1234.pack", Category::PACK);
/// let idx = StreamKey::new("pack-1234.idx", Category::INDEX);
/// assert_ne!(pack, idx);
/// assert_eq!(pack, pack.clone());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct StreamKey {
    hash: u32,
    category: Category,
    name: Arc<str>,
}

impl StreamKey {
    /// Creates a key for the named stream, deriving the hash from the name.
    pub fn new(name: impl Into<Arc<str>>, category: Category) -> Self {
        let name = name.into();
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        let h = hasher.finish();
        Self {
            hash: (h ^ (h >> 32)) as u32,
            category,
            name,
        }
    }

    /// Creates a key with an explicit hash.
    ///
    /// Useful when the caller already has a stable hash for the stream, and
    /// for forcing two streams onto the same bucket or lock stripe.
    pub fn with_hash(name: impl Into<Arc<str>>, hash: u32, category: Category) -> Self {
        Self {
            hash,
            category,
            name: name.into(),
        }
    }

    /// Hash used for slot placement.
    #[inline]
    pub fn hash_code(&self) -> u32 {
        self.hash
    }

    /// Category of the stream.
    #[inline]
    pub fn category(&self) -> Category {
        self.category
    }

    /// Name of the stream.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Hash for StreamKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
        self.category.hash(state);
    }
}

impl fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamKey")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("hash", &format_args!("{:#010x}", self.hash))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_per_name() {
        let a = StreamKey::new("pack-a.pack", Category::PACK);
        let b = StreamKey::new("pack-a.pack", Category::PACK);
        assert_eq!(a, b);
        assert_eq!(a.hash_code(), b.hash_code());
    }

    #[test]
    fn test_category_distinguishes_keys() {
        let a = StreamKey::with_hash("pack-a", 7, Category::PACK);
        let b = StreamKey::with_hash("pack-a", 7, Category::INDEX);
        assert_ne!(a, b);
    }

    #[test]
    fn test_colliding_hashes_stay_distinct() {
        let a = StreamKey::with_hash("one", 42, Category::PACK);
        let b = StreamKey::with_hash("two", 42, Category::PACK);
        assert_eq!(a.hash_code(), b.hash_code());
        assert_ne!(a, b);
    }

    #[test]
    fn test_category_names() {
        assert_eq!(Category::BITMAP_INDEX.name(), Some("bitmap"));
        assert_eq!(Category::new(200).name(), None);
        assert_eq!(Category::new(200).index(), 200);
        assert!(Category::INDEX.is_index_or_bitmap());
        assert!(!Category::PACK.is_index_or_bitmap());
    }
}
