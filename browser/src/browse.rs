//! Operations built on a [Filesystem].
//!
//! Every function here borrows the decoder mutably for its whole duration, so it can be run
//! directly or as a single task on a [lfsview_scheduler::Engine] (see [crate::Session]).

use crate::{Entry, Error, Filesystem};
use bytes::{Bytes, BytesMut};
use std::{collections::BTreeSet, fmt};
use tracing::{debug, warn};

/// Compose the path of `name` inside `dir` (the root directory is the empty string).
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// The last component of `path`.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Format a byte count for display (`B` below 1 KiB, then `KiB` and `MiB` with one decimal).
pub fn format_size(size: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    if size < KIB {
        format!("{size} B")
    } else if size < MIB {
        format!("{:.1} KiB", size as f64 / KIB as f64)
    } else {
        format!("{:.1} MiB", size as f64 / MIB as f64)
    }
}

/// Close the open directory after a failure, keeping the original error.
async fn release_dir<F: Filesystem>(fs: &mut F, path: &str) {
    if let Err(err) = fs.close_dir().await {
        warn!(path, ?err, "failed to close directory");
    }
}

/// Close the open file after a failure, keeping the original error.
async fn release_file<F: Filesystem>(fs: &mut F, path: &str) {
    if let Err(err) = fs.close_file().await {
        warn!(path, ?err, "failed to close file");
    }
}

/// List every entry of the directory at `path` (including `.` and `..`).
///
/// If the directory cannot be opened, that error is returned as is. A failure after the directory
/// was opened is returned as [Error::Partial], carrying the entries read before it. The directory
/// is closed either way.
pub async fn list_dir<F: Filesystem>(fs: &mut F, path: &str) -> Result<Vec<Entry>, Error> {
    fs.open_dir(path).await?;
    let mut entries = Vec::new();
    let result = loop {
        match fs.read_dir().await {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => break fs.close_dir().await,
            Err(err) => {
                release_dir(fs, path).await;
                break Err(err);
            }
        }
    };
    match result {
        Ok(()) => {
            debug!(path, entries = entries.len(), "listed directory");
            Ok(entries)
        }
        Err(err) => {
            warn!(path, entries = entries.len(), ?err, "listing failed");
            Err(Error::Partial {
                entries,
                source: Box::new(err),
            })
        }
    }
}

/// Number of entries in the directory at `path`, not counting `.` and `..`.
pub async fn child_count<F: Filesystem>(fs: &mut F, path: &str) -> Result<usize, Error> {
    let entries = list_dir(fs, path).await?;
    Ok(entries.iter().filter(|entry| !entry.is_special()).count())
}

/// Which of the image's blocks are referenced by the filesystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockUsage {
    used: BTreeSet<u64>,
    total: u64,
}

impl BlockUsage {
    /// Number of distinct blocks in use.
    pub fn in_use(&self) -> usize {
        self.used.len()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_used(&self, block: u64) -> bool {
        self.used.contains(&block)
    }

    /// Used block indices in ascending order.
    pub fn blocks(&self) -> impl Iterator<Item = u64> + '_ {
        self.used.iter().copied()
    }

    /// Share of blocks in use, as a percentage.
    pub fn percent(&self) -> f64 {
        100.0 * self.used.len() as f64 / self.total as f64
    }
}

impl fmt::Display for BlockUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} blocks are in use ({:.1}%)",
            self.in_use(),
            self.total,
            self.percent()
        )
    }
}

/// Traverse the filesystem and collect the blocks it references out of `total`.
///
/// Block indices at or beyond `total` are ignored.
pub async fn block_usage<F: Filesystem>(fs: &mut F, total: u64) -> Result<BlockUsage, Error> {
    let mut used = BTreeSet::new();
    let mut ignored = 0usize;
    let mut visit = |block: u64| {
        if block < total {
            used.insert(block);
        } else {
            ignored += 1;
        }
    };
    fs.traverse(&mut visit).await?;
    if ignored > 0 {
        warn!(ignored, total, "traversal reported blocks out of range");
    }

    let usage = BlockUsage { used, total };
    debug!(in_use = usage.in_use(), total, "collected block usage");
    Ok(usage)
}

/// Read the whole file at `path`. `size_hint` (typically the size from its directory entry) is
/// used to preallocate the buffer.
///
/// The file is closed even if a read fails part-way.
pub async fn read_file<F: Filesystem>(
    fs: &mut F,
    path: &str,
    size_hint: usize,
) -> Result<Bytes, Error> {
    fs.open_file(path).await?;
    let mut buffer = BytesMut::with_capacity(size_hint);
    let result = loop {
        match fs.read_file().await {
            Ok(chunk) if chunk.is_empty() => break Ok(()),
            Ok(chunk) => buffer.extend_from_slice(&chunk),
            Err(err) => break Err(err),
        }
    };
    if let Err(err) = result {
        warn!(path, read = buffer.len(), ?err, "reading file failed");
        release_file(fs, path).await;
        return Err(err);
    }
    fs.close_file().await?;
    debug!(path, len = buffer.len(), "read file");
    Ok(buffer.freeze())
}

/// Read the first chunk of the file at `path` (for previews).
pub async fn peek_file<F: Filesystem>(fs: &mut F, path: &str) -> Result<Bytes, Error> {
    fs.open_file(path).await?;
    let chunk = match fs.read_file().await {
        Ok(chunk) => chunk,
        Err(err) => {
            release_file(fs, path).await;
            return Err(err);
        }
    };
    fs.close_file().await?;
    Ok(chunk)
}
