//! Blocks and the Loader Seam
//!
//! A [`Block`] is an immutable, position-aligned slice of a backing stream.
//! Once loaded it is shared through `Arc` with every reader; eviction only
//! drops the cache's own pointer, never the bytes a reader already holds.
//!
//! The cache does not know how to read storage. Whoever owns the backing
//! file implements [`BlockFile`] and the cache calls
//! [`read_one_block`](BlockFile::read_one_block) on a miss.

use crate::key::StreamKey;
use core::fmt;

/// A contiguous, immutable range of bytes from one stream.
pub struct Block {
    stream: StreamKey,
    start: u64,
    data: Box<[u8]>,
}

impl Block {
    /// Creates a block holding `data`, which starts at offset `start` of
    /// `stream`.
    pub fn new(stream: StreamKey, start: u64, data: impl Into<Box<[u8]>>) -> Self {
        Self {
            stream,
            start,
            data: data.into(),
        }
    }

    /// Stream this block belongs to.
    #[inline]
    pub fn stream(&self) -> &StreamKey {
        &self.stream
    }

    /// Offset of the first byte.
    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Offset one past the last byte.
    #[inline]
    pub fn end(&self) -> u64 {
        self.start + self.size()
    }

    /// Number of bytes held.
    #[inline]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Raw bytes of the block.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns `true` if this block holds byte `position` of `key`.
    #[inline]
    pub fn contains(&self, key: &StreamKey, position: u64) -> bool {
        self.start <= position && position < self.end() && self.stream == *key
    }

    /// Copies bytes starting at stream offset `position` into `dst`.
    ///
    /// Returns how many bytes were copied, which is zero when `position` lies
    /// outside the block.
    pub fn copy(&self, position: u64, dst: &mut [u8]) -> usize {
        if position < self.start || position >= self.end() {
            return 0;
        }
        let off = (position - self.start) as usize;
        let n = dst.len().min(self.data.len() - off);
        dst[..n].copy_from_slice(&self.data[off..off + n]);
        n
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("stream", &self.stream)
            .field("start", &self.start)
            .field("size", &self.data.len())
            .finish()
    }
}

/// A block-addressable backing file the cache can load from.
///
/// # Native block sizes
///
/// Storage may have its own natural block size that differs from the cache's
/// configured size. Until the file knows it, [`block_size`](Self::block_size)
/// returns `0` and the cache aligns requests to its own block size. A file
/// that discovers a different size while reading may return a block whose
/// [`start`](Block::start) differs from the requested position; the cache
/// treats the returned start as authoritative and retries the original offset
/// if the block does not cover it.
pub trait BlockFile {
    /// Error produced by a failed read. Returned to the caller unchanged.
    type Error;

    /// Identity of the stream backing this file.
    fn key(&self) -> &StreamKey;

    /// Native block size, or `0` if not yet known.
    fn block_size(&self) -> u32 {
        0
    }

    /// Rounds `position` down to the start of its block.
    fn align_to_block(&self, position: u64, default_block_size: u32) -> u64 {
        let size = match self.block_size() {
            0 => default_block_size,
            native => native,
        } as u64;
        position / size * size
    }

    /// Reads the block starting at `position`.
    ///
    /// `block_size` is the cache's configured size, to be used when the file
    /// has no native size of its own.
    fn read_one_block(&self, position: u64, block_size: u32) -> Result<Block, Self::Error>;
}
