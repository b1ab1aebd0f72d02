//! Serve block-aligned reads of a disk image through a bounded block cache.
//!
//! A filesystem decoder expects a block device: fixed-size blocks, a known block count, and a
//! `read(offset, buf)` primitive that never spans two blocks. A disk image, on the other hand, is
//! an opaque [Source] of some arbitrary size whose reads may be slow and asynchronous. This crate
//! bridges the two:
//!
//! - [Source] abstracts over where the image bytes live ([memory::Source] for an image already
//!   held in memory, [file::Source] for an image on disk).
//! - [cache::BlockCache] validates every request against the declared geometry, zero-fills the
//!   part of a request that lies past the end of the image, and keeps a bounded number of
//!   recently fetched blocks in memory (evicting in insertion order).
//! - [geometry] turns the user's (possibly incomplete) options into a validated
//!   [geometry::Geometry].

use bytes::Bytes;
use std::{future::Future, ops::Range};
use thiserror::Error;

pub mod cache;
pub mod file;
pub mod geometry;
pub mod memory;

pub use cache::BlockCache;

/// Errors that can occur when reading from a [Source] or a [BlockCache].
#[derive(Debug, Error)]
pub enum Error {
    #[error("access out of bounds: offset={offset} len={len} capacity={capacity}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        capacity: u64,
    },
    #[error("access across blocks: offset={offset} len={len} block_size={block_size}")]
    CrossBlock {
        offset: u64,
        len: usize,
        block_size: usize,
    },
    #[error("destination too small: need {needed} bytes, have {available}")]
    DestinationTooSmall { needed: usize, available: usize },
    #[error("offset overflow")]
    OffsetOverflow,
    #[error("short fetch of block {block}: expected {expected} bytes, got {actual}")]
    ShortFetch {
        block: u64,
        expected: usize,
        actual: usize,
    },
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A read-only, size-bounded byte blob (typically a disk image).
///
/// Implementations must return exactly the requested range or an error. A [Source] is never
/// asked for bytes at or beyond [Source::size].
pub trait Source: Send + Sync + 'static {
    /// Total size of the blob in bytes.
    fn size(&self) -> u64;

    /// Retrieve the bytes in `range`.
    fn fetch(&self, range: Range<u64>) -> impl Future<Output = Result<Bytes, Error>> + Send;
}
