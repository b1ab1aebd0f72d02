//! A block device over a [Source], backed by a bounded in-memory block cache.
//!
//! # Addressing
//!
//! The device exposes `block_size * block_count` bytes, which may exceed the size of the
//! underlying [Source]. Every request must lie entirely within the device and entirely within a
//! single block. Bytes of a request that lie at or beyond the end of the source read as zero (the
//! image is treated as having a sparse tail).
//!
//! # Caching
//!
//! Blocks are fetched from the [Source] whole (or up to the end of the source for the final
//! block) and kept in memory. At most `max_cached_blocks` blocks are cached; when another block
//! must be stored, the block that was inserted first is evicted. Eviction ignores how recently a
//! block was read.
//!
//! # Completion
//!
//! Requests that can be served without touching the [Source] (empty requests, requests entirely
//! past the end of the source, and cache hits) complete the first time the returned future is
//! polled. Only a cache miss waits on the [Source].
//!
//! Validation happens before any state changes: a request that fails the bounds or single-block
//! checks never touches the destination, the cache, or the source. A failed fetch leaves the
//! cache unchanged.
//!
//! # Example
//!
//! ```rust
//! use futures::executor::block_on;
//! use lfsview_storage::{cache::{BlockCache, Config}, memory};
//! use std::num::{NonZeroU64, NonZeroUsize};
//!
//! let source = memory::Source::new(vec![7u8; 100]);
//! let cfg = Config {
//!     block_size: NonZeroUsize::new(64).unwrap(),
//!     block_count: NonZeroU64::new(2).unwrap(),
//!     max_cached_blocks: 2,
//! };
//! let mut cache = BlockCache::new(source, cfg).unwrap();
//!
//! // The second block is only partially backed by the source
//! let mut buf = [0xFFu8; 64];
//! block_on(cache.read(64, &mut buf)).unwrap();
//! assert_eq!(&buf[..36], &[7u8; 36]);
//! assert_eq!(&buf[36..], &[0u8; 28]);
//! ```

use crate::{Error, Source};
use bytes::Bytes;
use std::num::{NonZeroU64, NonZeroUsize};
use tracing::{debug, trace, warn};

mod fifo;
use fifo::Fifo;

/// Configuration for a [BlockCache].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// The size of each block in bytes.
    pub block_size: NonZeroUsize,

    /// The number of blocks in the device.
    pub block_count: NonZeroU64,

    /// The maximum number of blocks held in memory (0 disables caching).
    pub max_cached_blocks: usize,
}

/// A bounds-checked, block-aligned reader over a [Source] that caches fetched blocks.
pub struct BlockCache<S: Source> {
    source: S,

    /// Size of the source, captured at construction.
    size: u64,

    block_size: u64,
    block_count: u64,

    /// `block_size * block_count`.
    capacity: u64,

    blocks: Fifo,

    /// Number of fetches issued to the source.
    fetches: u64,
}

impl<S: Source> BlockCache<S> {
    /// Create a new cache in front of `source`.
    ///
    /// Returns [Error::OffsetOverflow] if the device would not be addressable with 64-bit
    /// offsets.
    pub fn new(source: S, cfg: Config) -> Result<Self, Error> {
        let block_size = cfg.block_size.get() as u64;
        let block_count = cfg.block_count.get();
        let capacity = block_size
            .checked_mul(block_count)
            .ok_or(Error::OffsetOverflow)?;
        let size = source.size();
        if size > capacity {
            warn!(size, capacity, "source is larger than the device, tail is unreachable");
        }
        Ok(Self {
            source,
            size,
            block_size,
            block_count,
            capacity,
            blocks: Fifo::new(cfg.max_cached_blocks),
            fetches: 0,
        })
    }

    /// Validate a request of `len` bytes at `offset`, returning the block it falls in (`None` for
    /// an empty request).
    fn check(&self, offset: u64, len: usize) -> Result<Option<u64>, Error> {
        let end = offset
            .checked_add(len as u64)
            .filter(|end| *end <= self.capacity)
            .ok_or(Error::OutOfBounds {
                offset,
                len,
                capacity: self.capacity,
            })?;
        if len == 0 {
            return Ok(None);
        }
        let block = offset / self.block_size;
        if (end - 1) / self.block_size != block {
            return Err(Error::CrossBlock {
                offset,
                len,
                block_size: self.block_size as usize,
            });
        }
        Ok(Some(block))
    }

    /// Fill `buf` with the `buf.len()` bytes at `offset`.
    pub async fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        let Some(block) = self.check(offset, buf.len())? else {
            return Ok(());
        };

        // Zero-fill whatever lies past the end of the source
        let available = self.size.saturating_sub(offset).min(buf.len() as u64) as usize;
        buf[available..].fill(0);
        if available == 0 {
            trace!(block, offset, "read past end of source");
            return Ok(());
        }
        let offset_in_block = (offset - block * self.block_size) as usize;
        let range = offset_in_block..offset_in_block + available;

        if let Some(data) = self.blocks.get(block) {
            trace!(block, offset, len = buf.len(), "cache hit");
            buf[..available].copy_from_slice(&data[range]);
            return Ok(());
        }

        let data = self.fetch(block).await?;
        self.store(block, data.clone());
        buf[..available].copy_from_slice(&data[range]);
        Ok(())
    }

    /// Fill `destination[destination_offset..destination_offset + len]` with the `len` bytes at
    /// `offset`.
    ///
    /// The request is validated against the device before the destination range is checked.
    pub async fn read_into(
        &mut self,
        offset: u64,
        destination: &mut [u8],
        destination_offset: usize,
        len: usize,
    ) -> Result<(), Error> {
        self.check(offset, len)?;
        let end = destination_offset
            .checked_add(len)
            .filter(|end| *end <= destination.len())
            .ok_or(Error::DestinationTooSmall {
                needed: destination_offset.saturating_add(len),
                available: destination.len(),
            })?;
        self.read(offset, &mut destination[destination_offset..end])
            .await
    }

    /// Fetch `block` (clamped to the end of the source) without caching it.
    async fn fetch(&mut self, block: u64) -> Result<Bytes, Error> {
        let start = block * self.block_size;
        let end = (start + self.block_size).min(self.size);
        trace!(block, start, end, "cache miss");
        self.fetches += 1;
        let data = match self.source.fetch(start..end).await {
            Ok(data) => data,
            Err(err) => {
                warn!(block, ?err, "fetch failed");
                return Err(err);
            }
        };

        let expected = (end - start) as usize;
        if data.len() != expected {
            warn!(block, expected, actual = data.len(), "short fetch");
            return Err(Error::ShortFetch {
                block,
                expected,
                actual: data.len(),
            });
        }
        Ok(data)
    }

    fn store(&mut self, block: u64, data: Bytes) {
        debug!(block, "adding block to cache");
        if let Some(evicted) = self.blocks.insert(block, data) {
            debug!(block = evicted, "evicting block from cache");
        }
    }

    /// Cached block indices, from the next to be evicted to the most recently inserted.
    pub fn cached_blocks(&self) -> Vec<u64> {
        self.blocks.blocks().collect()
    }

    /// Whether `block` is currently cached.
    pub fn is_cached(&self, block: u64) -> bool {
        self.blocks.contains(block)
    }

    /// Number of blocks currently cached.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.len() == 0
    }

    /// Maximum number of blocks that will be cached.
    pub fn capacity(&self) -> usize {
        self.blocks.capacity()
    }

    /// Number of fetches issued to the source so far.
    pub fn fetches(&self) -> u64 {
        self.fetches
    }

    pub fn block_size(&self) -> usize {
        self.block_size as usize
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Size of the addressable space in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    /// Size of the source in bytes.
    pub fn source_size(&self) -> u64 {
        self.size
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}
