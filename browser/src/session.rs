use crate::{
    browse::{self, BlockUsage},
    Entry, Error, Filesystem,
};
use bytes::Bytes;
use futures::FutureExt;
use lfsview_scheduler::{Engine, Handle, Mailbox};
use lfsview_storage::{
    geometry::{Geometry, Options},
    BlockCache, Source,
};
use std::future::Future;
use tracing::info;

/// Flatten a task's outcome into the crate [Error].
async fn settle<T>(handle: Handle<Result<T, Error>>) -> Result<T, Error> {
    handle.await?
}

/// A mounted (or mountable) image: the resolved geometry plus the mailbox of the [Engine] that
/// owns the decoder.
///
/// Every method submits one named task when it is called and returns a future resolving to its
/// outcome. Tasks run in the order the methods were called, regardless of the order in which the
/// returned futures are awaited.
pub struct Session<F: Filesystem> {
    geometry: Geometry,
    mailbox: Mailbox<F>,
}

impl<F: Filesystem> Session<F> {
    /// Resolve `options` against `source`, put a [BlockCache] in front of it and construct the
    /// decoder with `build`.
    ///
    /// Returns the session and the [Engine] that must be run (or started) for any submitted task
    /// to make progress. The engine stops once the session (and every clone of it) is dropped.
    pub fn new<S: Source>(
        source: S,
        options: &Options,
        build: impl FnOnce(BlockCache<S>) -> F,
    ) -> Result<(Self, Engine<F>), Error> {
        let size = source.size();
        let geometry = options.resolve(size, F::LIMITS)?;
        let cache = BlockCache::new(source, geometry.cache_config())?;
        info!(
            size,
            block_size = geometry.block_size.get(),
            block_count = geometry.block_count.get(),
            max_cached_blocks = geometry.max_cached_blocks,
            "opened session"
        );

        let (engine, mailbox) = Engine::new(build(cache));
        Ok((Self { geometry, mailbox }, engine))
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Number of submitted tasks that have not yet settled.
    pub fn pending(&self) -> usize {
        self.mailbox.pending()
    }

    /// Mount the image.
    pub fn mount(&self) -> impl Future<Output = Result<(), Error>> {
        let geometry = self.geometry;
        let handle = self.mailbox.submit("Mount", move |fs: &mut F| {
            async move { fs.open_image(&geometry).await }.boxed()
        });
        settle(handle)
    }

    /// Collect the blocks referenced by the filesystem.
    pub fn block_usage(&self) -> impl Future<Output = Result<BlockUsage, Error>> {
        let total = self.geometry.block_count.get();
        let handle = self
            .mailbox
            .submit("Listing used file system blocks", move |fs: &mut F| {
                browse::block_usage(fs, total).boxed()
            });
        settle(handle)
    }

    /// List the directory at `dir` (the root is the empty string).
    pub fn list_dir(&self, dir: &str) -> impl Future<Output = Result<Vec<Entry>, Error>> {
        let dir = dir.to_string();
        let handle = self
            .mailbox
            .submit(format!("Listing contents of {dir}"), move |fs: &mut F| {
                async move { browse::list_dir(fs, &dir).await }.boxed()
            });
        settle(handle)
    }

    /// Count the entries of the directory at `path`, excluding `.` and `..`.
    pub fn child_count(&self, path: &str) -> impl Future<Output = Result<usize, Error>> {
        let path = path.to_string();
        let handle = self
            .mailbox
            .submit(format!("Listing contents of {path}"), move |fs: &mut F| {
                async move { browse::child_count(fs, &path).await }.boxed()
            });
        settle(handle)
    }

    pub fn count_attributes(&self, path: &str) -> impl Future<Output = Result<usize, Error>> {
        let path = path.to_string();
        let handle = self
            .mailbox
            .submit(format!("Listing attributes of {path}"), move |fs: &mut F| {
                async move { fs.count_attributes(&path).await }.boxed()
            });
        settle(handle)
    }

    /// Read the whole file at `path` (`size_hint` is usually the size from its [Entry]).
    pub fn read_file(
        &self,
        path: &str,
        size_hint: usize,
    ) -> impl Future<Output = Result<Bytes, Error>> {
        let path = path.to_string();
        let name = format!("Preparing download: {}", browse::file_name(&path));
        let handle = self.mailbox.submit(name, move |fs: &mut F| {
            async move { browse::read_file(fs, &path, size_hint).await }.boxed()
        });
        settle(handle)
    }

    /// Read the first chunk of the file at `path`.
    pub fn peek_file(&self, path: &str) -> impl Future<Output = Result<Bytes, Error>> {
        let path = path.to_string();
        let name = format!("Opening {}", browse::file_name(&path));
        let handle = self.mailbox.submit(name, move |fs: &mut F| {
            async move { browse::peek_file(fs, &path).await }.boxed()
        });
        settle(handle)
    }
}

impl<F: Filesystem> Clone for Session<F> {
    fn clone(&self) -> Self {
        Self {
            geometry: self.geometry,
            mailbox: self.mailbox.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{self, Mock};
    use futures::{executor::block_on, join};
    use lfsview_macros::test_traced;
    use lfsview_storage::{geometry, memory};

    fn session(image: Bytes) -> (Session<Mock>, Engine<Mock>) {
        Session::new(memory::Source::new(image), &mocks::options(), Mock::new).unwrap()
    }

    #[test_traced]
    fn test_new_resolves_geometry() {
        let (session, _engine) = session(mocks::image());
        let geometry = session.geometry();
        assert_eq!(geometry.block_size.get(), mocks::BLOCK_SIZE);
        assert_eq!(geometry.block_count.get(), 8);
        assert_eq!(geometry.max_cached_blocks, 2);
        assert_eq!(*geometry, mocks::geometry());
    }

    #[test_traced]
    fn test_new_rejects_missing_block_size() {
        let result = Session::new(
            memory::Source::new(mocks::image()),
            &Options::default(),
            Mock::new,
        );
        assert!(matches!(
            result,
            Err(Error::Geometry(geometry::Error::MissingBlockSize))
        ));
    }

    #[test_traced]
    fn test_browse_image() {
        let (session, engine) = session(mocks::image());
        let client = async move {
            session.mount().await.unwrap();

            // Queue everything up front, as a directory view does
            let usage = session.block_usage();
            let root = session.list_dir("");
            let logs = session.child_count("logs");
            let attributes = session.count_attributes("hello.txt");
            let download = session.read_file("hello.txt", 150);
            let preview = session.peek_file("logs/tail.bin");
            assert_eq!(session.pending(), 6);
            join!(usage, root, logs, attributes, download, preview)
        };

        let (fs, (usage, root, logs, attributes, download, preview)) =
            block_on(async { join!(engine.run(), client) });
        assert_eq!(
            usage.unwrap().to_string(),
            "5 of 8 blocks are in use (62.5%)"
        );
        assert_eq!(root.unwrap().len(), 5);
        assert_eq!(logs.unwrap(), 1);
        assert_eq!(attributes.unwrap(), 2);
        assert_eq!(download.unwrap(), mocks::hello());
        assert_eq!(preview.unwrap(), mocks::tail());

        // Operations reached the decoder in submission order
        let fs = fs.unwrap();
        assert_eq!(
            fs.log,
            vec![
                "open_image",
                "traverse",
                "open_dir ",
                "open_dir logs",
                "count_attributes hello.txt",
                "open_file hello.txt",
                "open_file logs/tail.bin",
            ]
        );
        assert!(fs.cache().len() <= 2);
    }

    #[test_traced]
    fn test_futures_awaited_out_of_order() {
        let (session, engine) = session(mocks::image());
        let client = async move {
            let mount = session.mount();
            let download = session.read_file("hello.txt", 0);
            let count = session.child_count("");
            let count = count.await.unwrap();
            let download = download.await.unwrap();
            mount.await.unwrap();
            (count, download)
        };

        let (fs, (count, download)) = block_on(async { join!(engine.run(), client) });
        assert_eq!(count, 3);
        assert_eq!(download, mocks::hello());
        assert_eq!(
            fs.unwrap().log,
            vec!["open_image", "open_file hello.txt", "open_dir "]
        );
    }

    #[test_traced]
    fn test_partial_listing() {
        let (session, engine) = session(mocks::image());
        let client = async move {
            session.mount().await.unwrap();
            let broken = session.list_dir("broken").await;
            let root = session.child_count("").await;
            (broken, root)
        };

        let (_, (broken, root)) = block_on(async { join!(engine.run(), client) });
        let Err(Error::Partial { entries, .. }) = broken else {
            panic!("expected partial result");
        };
        assert_eq!(entries.len(), 2);

        // The failed listing left the decoder usable
        assert_eq!(root.unwrap(), 3);
    }

    #[test_traced]
    fn test_mount_failure() {
        let mut image = mocks::image().to_vec();
        image[0] ^= 0xFF;
        let (session, engine) = session(image.into());
        let client = async move {
            let mount = session.mount();
            let list = session.list_dir("");
            join!(mount, list)
        };

        let (_, (mount, list)) = block_on(async { join!(engine.run(), client) });
        assert!(matches!(mount, Err(Error::Corrupt(reason)) if reason == "bad magic"));
        assert!(matches!(list, Err(Error::Corrupt(reason)) if reason == "not mounted"));
    }

    #[test_traced("INFO")]
    fn test_decoder_panic() {
        let (session, engine) = session(mocks::image());
        let client = async move {
            session.mount().await.unwrap();
            let explode = session.list_dir("explode");
            let attributes = session.count_attributes("logs");
            join!(explode, attributes)
        };

        let (fs, (explode, attributes)) = block_on(async { join!(engine.run(), client) });
        assert!(matches!(
            explode,
            Err(Error::Scheduler(lfsview_scheduler::Error::Canceled(name)))
                if name == "Listing contents of explode"
        ));
        assert_eq!(attributes.unwrap(), 1);
        assert!(fs.is_ok());
    }

    #[test_traced]
    fn test_session_clones_share_engine() {
        let (session, engine) = session(mocks::image());
        let other = session.clone();
        let client = async move {
            let mount = session.mount();
            let count = other.count_attributes("");
            drop(session);
            let (mount, count) = join!(mount, count);
            mount.unwrap();
            count.unwrap()
        };

        let (_, count) = block_on(async { join!(engine.run(), client) });
        assert_eq!(count, 0);
    }
}
