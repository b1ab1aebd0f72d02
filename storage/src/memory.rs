//! An image held entirely in memory.

use crate::Error;
use bytes::Bytes;
use std::ops::Range;

/// A [crate::Source] backed by an immutable in-memory buffer.
///
/// Fetches are zero-copy slices of the underlying buffer and always complete on first poll.
#[derive(Clone, Debug, Default)]
pub struct Source {
    data: Bytes,
}

impl Source {
    /// Wrap `data` as a source.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// The full contents of the source.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl crate::Source for Source {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn fetch(&self, range: Range<u64>) -> Result<Bytes, Error> {
        let start = usize::try_from(range.start).map_err(|_| Error::OffsetOverflow)?;
        let end = usize::try_from(range.end).map_err(|_| Error::OffsetOverflow)?;
        if start > end || end > self.data.len() {
            return Err(Error::FetchFailed(format!(
                "range {start}..{end} outside of {} bytes",
                self.data.len()
            )));
        }
        Ok(self.data.slice(start..end))
    }
}
