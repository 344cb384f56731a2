//! Load Lock Striping
//!
//! Misses are serialised through a fixed pool of mutexes chosen by hashing
//! the key. Two threads missing on the same key meet on the same mutex and
//! the second one finds the first one's result. Two different keys that hash
//! to the same stripe simply load one after the other; the pool size bounds
//! the number of locks no matter how many keys exist.
//!
//! ```text
//!   (key.hash + position / block_size) >> 1  % N
//!                     │
//!      ┌──────────┬───┴──────┬─────┬──────────┐
//!      │ Mutex 0  │ Mutex 1  │ ... │ Mutex N-1│
//!      └──────────┴──────────┴─────┴──────────┘
//! ```

use parking_lot::Mutex;

pub(crate) struct LockPool {
    locks: Box<[Mutex<()>]>,
}

impl LockPool {
    pub(crate) fn new(size: usize) -> Self {
        let locks: Vec<_> = (0..size.max(1)).map(|_| Mutex::new(())).collect();
        Self {
            locks: locks.into_boxed_slice(),
        }
    }

    /// Returns the stripe for a slot hash.
    #[inline]
    pub(crate) fn stripe(&self, hash: u32) -> &Mutex<()> {
        &self.locks[(hash >> 1) as usize % self.locks.len()]
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
