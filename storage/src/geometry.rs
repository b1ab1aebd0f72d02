//! Resolve user-supplied image options into a validated block geometry.
//!
//! Every option may be left unset (or set to zero, like an empty form field), in which case a
//! default is derived from the image size, the block size and the [Limits] of the decoder.
//! Only the block size is mandatory.

use crate::cache;
use std::num::{NonZeroU64, NonZeroUsize};
use thiserror::Error;
use tracing::debug;

/// Memory budget used to derive the default number of cached blocks.
pub const CACHE_BUDGET: u64 = 1024 * 1024;

/// Errors that can occur when resolving [Options].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("block size must be specified")]
    MissingBlockSize,
    #[error("the disk image has a size of {file_size} bytes, which is larger than {block_count} * {block_size}")]
    ImageTooLarge {
        file_size: u64,
        block_count: u64,
        block_size: u64,
    },
    #[error("the block size must be a multiple of the read size")]
    ReadSizeMisaligned,
    #[error("the cache size must be a multiple of the read size")]
    CacheSizeMisaligned,
    #[error("the block size must be a multiple of the cache size")]
    CacheSizeNotDivisor,
    #[error("the cache size must not exceed {max}")]
    CacheSizeTooLarge { max: u64 },
    #[error("the lookahead size must be a multiple of 8")]
    LookaheadMisaligned,
    #[error("the lookahead size must not exceed {max}")]
    LookaheadTooLarge { max: u64 },
    #[error("geometry overflow")]
    GeometryOverflow,
    #[error("negative values are invalid: {name}")]
    Negative { name: &'static str },
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Upper bounds imposed by the filesystem decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    /// Largest cache size the decoder accepts.
    pub max_cache_size: u64,

    /// Largest lookahead size the decoder accepts.
    pub max_lookahead_size: u64,
}

/// Options as entered by the user. `None` and `Some(0)` both mean "use the default".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Options {
    /// Size of a filesystem block in bytes (mandatory).
    pub block_size: Option<u64>,

    /// Number of blocks in the filesystem.
    pub block_count: Option<u64>,

    /// Minimum read granularity of the decoder.
    pub read_size: Option<u64>,

    /// Size of the decoder's own block cache.
    pub cache_size: Option<u64>,

    /// Size of the decoder's allocation lookahead buffer.
    pub lookahead_size: Option<u64>,

    /// Maximum number of blocks kept by the [crate::BlockCache].
    pub max_cached_blocks: Option<u64>,
}

/// A fully resolved and validated geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub block_size: NonZeroUsize,
    pub block_count: NonZeroU64,
    pub read_size: NonZeroU64,
    pub cache_size: u64,
    pub lookahead_size: u64,
    pub max_cached_blocks: usize,
}

/// Parse one textual option: surrounding whitespace is ignored and an empty value is unset.
pub fn parse_value(name: &'static str, raw: &str) -> Result<Option<u64>, Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Some(magnitude) = raw.strip_prefix('-') {
        if magnitude.parse::<u64>().is_ok() {
            return Err(Error::Negative { name });
        }
    }
    raw.parse::<u64>().map(Some).map_err(|_| Error::Invalid {
        name,
        value: raw.to_string(),
    })
}

/// Treat zero the same as an unset value.
fn set(value: Option<u64>) -> Option<u64> {
    value.filter(|value| *value != 0)
}

/// The smallest power of two `n` such that `n * block_size >= file_size`.
fn default_block_count(file_size: u64, block_size: u64) -> Result<u64, Error> {
    let count = file_size
        .div_ceil(block_size)
        .max(1)
        .checked_next_power_of_two()
        .ok_or(Error::GeometryOverflow)?;
    count
        .checked_mul(block_size)
        .ok_or(Error::GeometryOverflow)?;
    Ok(count)
}

impl Options {
    /// Apply defaults and validate the options against an image of `file_size` bytes.
    pub fn resolve(&self, file_size: u64, limits: Limits) -> Result<Geometry, Error> {
        let block_size = set(self.block_size).ok_or(Error::MissingBlockSize)?;

        let block_count = match set(self.block_count) {
            None => default_block_count(file_size, block_size)?,
            Some(block_count) => {
                let capacity = block_count
                    .checked_mul(block_size)
                    .ok_or(Error::GeometryOverflow)?;
                if capacity < file_size {
                    return Err(Error::ImageTooLarge {
                        file_size,
                        block_count,
                        block_size,
                    });
                }
                block_count
            }
        };

        let read_size = match set(self.read_size) {
            None => 1,
            Some(read_size) if block_size % read_size != 0 => {
                return Err(Error::ReadSizeMisaligned)
            }
            Some(read_size) => read_size,
        };

        let cache_size = match set(self.cache_size) {
            None => {
                let max = block_size.min(limits.max_cache_size);
                read_size * (max / read_size)
            }
            Some(cache_size) if cache_size % read_size != 0 => {
                return Err(Error::CacheSizeMisaligned)
            }
            Some(cache_size) if block_size % cache_size != 0 => {
                return Err(Error::CacheSizeNotDivisor)
            }
            Some(cache_size) if cache_size > limits.max_cache_size => {
                return Err(Error::CacheSizeTooLarge {
                    max: limits.max_cache_size,
                })
            }
            Some(cache_size) => cache_size,
        };

        let lookahead_size = match set(self.lookahead_size) {
            None => limits.max_lookahead_size,
            Some(lookahead_size) if lookahead_size % 8 != 0 => {
                return Err(Error::LookaheadMisaligned)
            }
            Some(lookahead_size) if lookahead_size > limits.max_lookahead_size => {
                return Err(Error::LookaheadTooLarge {
                    max: limits.max_lookahead_size,
                })
            }
            Some(lookahead_size) => lookahead_size,
        };

        let max_cached_blocks = match set(self.max_cached_blocks) {
            None => block_count.min(CACHE_BUDGET / block_size),
            Some(max_cached_blocks) => max_cached_blocks,
        };

        let geometry = Geometry {
            block_size: usize::try_from(block_size)
                .ok()
                .and_then(NonZeroUsize::new)
                .ok_or(Error::GeometryOverflow)?,
            block_count: NonZeroU64::new(block_count).ok_or(Error::GeometryOverflow)?,
            read_size: NonZeroU64::new(read_size).ok_or(Error::GeometryOverflow)?,
            cache_size,
            lookahead_size,
            max_cached_blocks: usize::try_from(max_cached_blocks)
                .map_err(|_| Error::GeometryOverflow)?,
        };
        debug!(?geometry, file_size, "resolved geometry");
        Ok(geometry)
    }
}

impl Geometry {
    /// Size of the addressable space (`block_size * block_count`) in bytes.
    pub fn capacity(&self) -> u64 {
        // Checked during resolution
        self.block_size.get() as u64 * self.block_count.get()
    }

    /// Configuration for a [crate::BlockCache] serving this geometry.
    pub fn cache_config(&self) -> cache::Config {
        cache::Config {
            block_size: self.block_size,
            block_count: self.block_count,
            max_cached_blocks: self.max_cached_blocks,
        }
    }
}
