//! An image stored in a file on disk.

use crate::Error;
use bytes::{Bytes, BytesMut};
use std::{
    io::SeekFrom,
    ops::Range,
    path::{Path, PathBuf},
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    sync::Mutex,
};
use tracing::{debug, trace};

/// A [crate::Source] that reads ranges of a file with positional (seek + read) IO.
///
/// The size of the file is captured when it is opened. Growth or truncation afterwards is not
/// observed, matching a file handle selected once by the user.
pub struct Source {
    path: PathBuf,
    size: u64,
    file: Mutex<File>,
}

impl Source {
    /// Open the image at `path` for reading.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let size = file.metadata().await?.len();
        debug!(path = %path.display(), size, "opened image");
        Ok(Self {
            path,
            size,
            file: Mutex::new(file),
        })
    }

    /// Location of the image.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl crate::Source for Source {
    fn size(&self) -> u64 {
        self.size
    }

    async fn fetch(&self, range: Range<u64>) -> Result<Bytes, Error> {
        let len = range
            .end
            .checked_sub(range.start)
            .ok_or(Error::OffsetOverflow)?;
        let len = usize::try_from(len).map_err(|_| Error::OffsetOverflow)?;
        if range.end > self.size {
            return Err(Error::FetchFailed(format!(
                "range {}..{} outside of {} bytes",
                range.start, range.end, self.size
            )));
        }
        trace!(start = range.start, len, "reading image");

        // Seek and read under the lock so concurrent fetches cannot interleave
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut buf = BytesMut::zeroed(len);
        file.read_exact(&mut buf).await?;
        Ok(buf.freeze())
    }
}
