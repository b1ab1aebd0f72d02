//! A scripted [Filesystem] for tests.
//!
//! The image is a plain byte buffer holding a magic header and the contents of two files. The
//! directory tree, attribute counts and block references are scripted, but every mount, traversal
//! and file read goes through the [BlockCache] like a real decoder's would.

use crate::{Entry, EntryKind, Error, Filesystem};
use bytes::Bytes;
use lfsview_storage::{
    geometry::{Geometry, Limits, Options},
    memory, BlockCache,
};
use std::collections::HashMap;

pub const BLOCK_SIZE: usize = 64;
pub const IMAGE_SIZE: usize = 350;
pub const MAGIC: &[u8; 8] = b"lfsmock\0";

const HELLO: (u64, u64) = (64, 150);
const TAIL: (u64, u64) = (320, 60);

/// Contents of `hello.txt` (spans blocks 1 through 3).
pub fn hello() -> Bytes {
    (0..HELLO.1).map(|i| b'a' + (i % 26) as u8).collect()
}

/// Contents of `logs/tail.bin` (the last 30 bytes lie past the end of the image).
pub fn tail() -> Bytes {
    let mut data = vec![0xA5; 30];
    data.resize(TAIL.1 as usize, 0);
    data.into()
}

/// The image bytes.
pub fn image() -> Bytes {
    let mut image = vec![0; IMAGE_SIZE];
    image[..MAGIC.len()].copy_from_slice(MAGIC);
    let (offset, len) = (HELLO.0 as usize, HELLO.1 as usize);
    image[offset..offset + len].copy_from_slice(&hello());
    let offset = TAIL.0 as usize;
    image[offset..].copy_from_slice(&tail()[..IMAGE_SIZE - offset]);
    image.into()
}

pub fn options() -> Options {
    Options {
        block_size: Some(BLOCK_SIZE as u64),
        max_cached_blocks: Some(2),
        ..Default::default()
    }
}

pub fn geometry() -> Geometry {
    options()
        .resolve(IMAGE_SIZE as u64, Mock::LIMITS)
        .unwrap()
}

/// A mock over [image], not yet mounted.
pub fn filesystem() -> Mock {
    let cache = BlockCache::new(memory::Source::new(image()), geometry().cache_config()).unwrap();
    Mock::new(cache)
}

pub async fn mount(fs: &mut Mock) -> Result<(), Error> {
    fs.open_image(&geometry()).await
}

struct DirCursor {
    path: String,
    entries: Vec<Entry>,
    position: usize,

    /// Number of entries returned before the directory reports corruption.
    fail_at: Option<usize>,
}

struct FileCursor {
    offset: u64,
    remaining: u64,

    /// Offset at which the file reports corruption.
    fail_at: Option<u64>,
}

pub struct Mock {
    cache: BlockCache<memory::Source>,
    dirs: HashMap<&'static str, Vec<Entry>>,
    files: HashMap<&'static str, (u64, u64)>,
    attributes: HashMap<&'static str, usize>,
    broken: HashMap<&'static str, usize>,
    torn: HashMap<&'static str, u64>,
    used: Vec<u64>,

    mounted: bool,
    dir: Option<DirCursor>,
    file: Option<FileCursor>,

    /// Every operation issued, in order.
    pub log: Vec<String>,
}

fn specials() -> Vec<Entry> {
    vec![
        Entry::new(".", EntryKind::Directory, 0),
        Entry::new("..", EntryKind::Directory, 0),
    ]
}

impl Mock {
    pub fn new(cache: BlockCache<memory::Source>) -> Self {
        let mut root = specials();
        root.push(Entry::new("hello.txt", EntryKind::File, HELLO.1));
        root.push(Entry::new("logs", EntryKind::Directory, 0));
        root.push(Entry::new("empty", EntryKind::Directory, 0));
        let mut logs = specials();
        logs.push(Entry::new("tail.bin", EntryKind::File, TAIL.1));

        Self {
            cache,
            dirs: HashMap::from([
                ("", root),
                ("logs", logs),
                ("empty", specials()),
                ("broken", specials()),
            ]),
            files: HashMap::from([
                ("hello.txt", HELLO),
                ("logs/tail.bin", TAIL),
                ("torn.bin", HELLO),
                ("unreadable.bin", HELLO),
            ]),
            attributes: HashMap::from([("hello.txt", 2), ("logs", 1)]),
            broken: HashMap::from([("broken", 2)]),
            // Unlisted files whose reads fail at the given offset
            torn: HashMap::from([("torn.bin", 128), ("unreadable.bin", 64)]),
            used: vec![0, 1, 1, 2, 3, 5, 0],
            mounted: false,
            dir: None,
            file: None,
            log: Vec::new(),
        }
    }

    pub fn cache(&self) -> &BlockCache<memory::Source> {
        &self.cache
    }

    pub fn dir_open(&self) -> bool {
        self.dir.is_some()
    }

    pub fn file_open(&self) -> bool {
        self.file.is_some()
    }

    fn ensure_mounted(&self) -> Result<(), Error> {
        if !self.mounted {
            return Err(Error::Corrupt("not mounted".into()));
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.dirs.contains_key(path) || self.files.contains_key(path)
    }
}

impl Filesystem for Mock {
    const LIMITS: Limits = Limits {
        max_cache_size: 512,
        max_lookahead_size: 64,
    };

    async fn open_image(&mut self, geometry: &Geometry) -> Result<(), Error> {
        self.log.push("open_image".into());
        if geometry.block_size.get() != self.cache.block_size() {
            return Err(Error::Corrupt("block size mismatch".into()));
        }
        let mut magic = [0; MAGIC.len()];
        self.cache.read(0, &mut magic).await?;
        if &magic != MAGIC {
            return Err(Error::Corrupt("bad magic".into()));
        }
        self.mounted = true;
        Ok(())
    }

    async fn traverse(&mut self, visitor: &mut (dyn FnMut(u64) + Send)) -> Result<(), Error> {
        self.log.push("traverse".into());
        self.ensure_mounted()?;

        // Touch every referenced block that exists in the device
        let mut byte = [0; 1];
        for &block in &self.used {
            if block < self.cache.block_count() {
                self.cache
                    .read(block * BLOCK_SIZE as u64, &mut byte)
                    .await?;
            }
            visitor(block);
        }
        visitor(self.cache.block_count() + 1);
        Ok(())
    }

    async fn open_dir(&mut self, path: &str) -> Result<(), Error> {
        self.log.push(format!("open_dir {path}"));
        self.ensure_mounted()?;
        if path == "explode" {
            panic!("decoder fault");
        }
        if self.dir.is_some() {
            return Err(Error::Corrupt("directory already open".into()));
        }
        let entries = self
            .dirs
            .get(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?
            .clone();
        self.dir = Some(DirCursor {
            path: path.to_string(),
            entries,
            position: 0,
            fail_at: self.broken.get(path).copied(),
        });
        Ok(())
    }

    async fn read_dir(&mut self) -> Result<Option<Entry>, Error> {
        let cursor = self
            .dir
            .as_mut()
            .ok_or_else(|| Error::Corrupt("no open directory".into()))?;
        if cursor.fail_at == Some(cursor.position) {
            return Err(Error::Corrupt(format!("bad tag in {}", cursor.path)));
        }
        let entry = cursor.entries.get(cursor.position).cloned();
        cursor.position += 1;
        Ok(entry)
    }

    async fn close_dir(&mut self) -> Result<(), Error> {
        self.dir
            .take()
            .ok_or_else(|| Error::Corrupt("no open directory".into()))?;
        Ok(())
    }

    async fn open_file(&mut self, path: &str) -> Result<(), Error> {
        self.log.push(format!("open_file {path}"));
        self.ensure_mounted()?;
        if self.file.is_some() {
            return Err(Error::Corrupt("file already open".into()));
        }
        let &(offset, remaining) = self
            .files
            .get(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        self.file = Some(FileCursor {
            offset,
            remaining,
            fail_at: self.torn.get(path).copied(),
        });
        Ok(())
    }

    async fn read_file(&mut self) -> Result<Bytes, Error> {
        let cursor = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Corrupt("no open file".into()))?;
        if cursor.remaining == 0 {
            return Ok(Bytes::new());
        }
        if cursor.fail_at == Some(cursor.offset) {
            return Err(Error::Corrupt(format!("bad block at {}", cursor.offset)));
        }

        // Never read across a block boundary
        let block_size = BLOCK_SIZE as u64;
        let len = cursor.remaining.min(block_size - cursor.offset % block_size);
        let mut chunk = vec![0; len as usize];
        self.cache.read(cursor.offset, &mut chunk).await?;
        cursor.offset += len;
        cursor.remaining -= len;
        Ok(chunk.into())
    }

    async fn close_file(&mut self) -> Result<(), Error> {
        self.file
            .take()
            .ok_or_else(|| Error::Corrupt("no open file".into()))?;
        Ok(())
    }

    async fn count_attributes(&mut self, path: &str) -> Result<usize, Error> {
        self.log.push(format!("count_attributes {path}"));
        self.ensure_mounted()?;
        if !self.exists(path) {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(self.attributes.get(path).copied().unwrap_or(0))
    }
}
