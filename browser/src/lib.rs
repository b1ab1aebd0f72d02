//! Browse a filesystem image through a serialized decoder session.
//!
//! # Overview
//!
//! A filesystem decoder (anything implementing [Filesystem]) reads its image through a
//! [lfsview_storage::BlockCache] and cannot be re-entered: at most one operation may be in flight
//! at a time. [Session] composes the pieces needed to use one safely:
//!
//! 1. The user's [lfsview_storage::geometry::Options] are resolved against the image size and the
//!    decoder's [lfsview_storage::geometry::Limits].
//! 2. A [lfsview_storage::BlockCache] is built over the image and handed to the decoder.
//! 3. The decoder becomes the context of a [lfsview_scheduler::Engine], and every operation is
//!    submitted to it as a named task.
//!
//! The operations themselves (listing directories with partial results, counting children,
//! summarizing block usage, reading files) live in [browse] and can also be used directly with
//! exclusive access to a decoder.

use bytes::Bytes;
use lfsview_storage::geometry::{Geometry, Limits};
use std::future::Future;
use thiserror::Error;

pub mod browse;
mod session;
pub use session::Session;

#[cfg(test)]
pub(crate) mod mocks;

/// Errors that can occur when browsing an image.
#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] lfsview_storage::Error),
    #[error("invalid options: {0}")]
    Geometry(#[from] lfsview_storage::geometry::Error),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] lfsview_scheduler::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupt image: {0}")]
    Corrupt(String),
    #[error("listing failed after {} entries: {source}", .entries.len())]
    Partial {
        entries: Vec<Entry>,
        source: Box<Error>,
    },
}

/// The kind of a directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    /// Interpret the decoder's numeric entry type (2 is a directory, anything else a file).
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            2 => Self::Directory,
            _ => Self::File,
        }
    }
}

/// A single directory entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,

    /// Size in bytes (meaningful for files only).
    pub size: u64,
}

impl Entry {
    pub fn new(name: impl Into<String>, kind: EntryKind, size: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            size,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Whether this is the `.` or `..` entry every directory contains.
    pub fn is_special(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// A non-reentrant filesystem decoder.
///
/// Directory and file access is stateful: `open_dir`/`open_file` position a cursor that
/// `read_dir`/`read_file` advance until the end is reached, after which the cursor is closed. Only
/// one directory and one file may be open at a time.
pub trait Filesystem: Send + 'static {
    /// Bounds on the geometry this decoder accepts.
    const LIMITS: Limits;

    /// Mount the image with the given geometry.
    fn open_image(&mut self, geometry: &Geometry)
        -> impl Future<Output = Result<(), Error>> + Send;

    /// Invoke `visitor` once for every block referenced by the filesystem (a block may be
    /// reported more than once).
    fn traverse(
        &mut self,
        visitor: &mut (dyn FnMut(u64) + Send),
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn open_dir(&mut self, path: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Return the next entry of the open directory, or `None` once all entries were returned.
    fn read_dir(&mut self) -> impl Future<Output = Result<Option<Entry>, Error>> + Send;

    fn close_dir(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    fn open_file(&mut self, path: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Return the next chunk of the open file. An empty chunk marks the end of the file.
    fn read_file(&mut self) -> impl Future<Output = Result<Bytes, Error>> + Send;

    fn close_file(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Count the extended attributes attached to `path`.
    fn count_attributes(&mut self, path: &str)
        -> impl Future<Output = Result<usize, Error>> + Send;
}
