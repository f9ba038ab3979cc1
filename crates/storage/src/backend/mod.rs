//! Where package artifacts live.
//!
//! The index only needs a handful of operations from a blob store: put a
//! stream under a path, stream it back out, delete it, and enumerate what is
//! there when no metadata database is configured. [`StorageBackend`] is that
//! contract; paths are opaque to every implementation.

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use async_trait::async_trait;
use exn::ResultExt;
use futures::io::{AsyncRead, AsyncReadExt, Cursor};
use futures::{Stream, TryStreamExt};
use std::collections::BTreeSet;
use std::path::{Component, Path};
use std::pin::Pin;

pub type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;
/// Owned, sendable byte stream used for both uploads and downloads.
pub type ByteReader = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// A blob store holding package artifacts.
///
/// Paths are relative to the backend's root and pass through
/// [`validate_path`](crate::validate_path) before touching storage, so `..`
/// can never reach outside it.
///
/// ```
/// use std::path::Path;
/// use wheelhouse_storage::{backend::StorageBackend, error::Result};
///
/// /// Re-home an artifact, for example when moving to another bucket.
/// async fn mirror(source: &dyn StorageBackend, target: &dyn StorageBackend, path: &Path) -> Result<u64> {
///     let reader = source.reader(path).await?;
///     target.write_stream(path, reader).await
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Label for log lines.
    fn name(&self) -> &str;

    /// [`list_stream()`](Self::list_stream), collected.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Every blob below `prefix` (matched per path component, so `foo` does
    /// not select `foobar/...`), in no particular order. An unknown prefix
    /// yields nothing.
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use wheelhouse_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut blobs = backend.list_stream(Some(Path::new("requests")));
    /// while let Some(blob) = blobs.try_next().await? {
    ///     println!("{}\t{}", blob.path.display(), blob.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Names of the directories directly under the storage root, sorted.
    ///
    /// Without a metadata database each top-level directory is a package.
    /// Backends without real directories derive them from object paths.
    async fn list_top_level_directories(&self) -> Result<Vec<String>> {
        let files = self.list(None).await?;
        let directories: BTreeSet<String> = files
            .iter()
            .filter(|info| info.path.components().count() > 1)
            .filter_map(|info| match info.path.components().next() {
                Some(Component::Normal(name)) => name.to_str().map(ToString::to_string),
                _ => None,
            })
            .collect();
        Ok(directories.into_iter().collect())
    }

    /// Names of the files directly inside `directory` (not recursive), sorted.
    ///
    /// A missing directory is an empty listing.
    async fn list_files_under(&self, directory: &Path) -> Result<Vec<String>> {
        let directory = crate::validate_path(directory)?;
        let files = self.list(Some(&directory)).await?;
        let mut names: Vec<String> = files
            .iter()
            .filter(|info| info.path.parent() == Some(directory.as_path()))
            .filter_map(|info| info.file_name().map(ToString::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Whether a blob is stored at `path`.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Streams a blob out, for downloads.
    ///
    /// A missing blob is reported here as
    /// [`NotFound`](crate::error::ErrorKind::NotFound), never on the first
    /// read.
    ///
    /// ```no_run
    /// use futures::AsyncReadExt;
    /// use std::path::Path;
    /// # use wheelhouse_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut reader = backend.reader(Path::new("requests/0b0f0c7e")).await?;
    /// let mut head = [0u8; 4];
    /// reader.read_exact(&mut head).await.unwrap();
    /// assert_eq!(&head, b"PK\x03\x04");
    /// # Ok(())
    /// # }
    /// ```
    async fn reader(&self, path: &Path) -> Result<ByteReader>;

    /// A whole blob in memory.
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let mut reader = self.reader(path).await?;
        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .await
            .or_raise(|| ErrorKind::BackendError(format!("failed to read {}", path.display())))?;
        Ok(buffer)
    }

    /// Stores everything `content` yields at `path` and returns its size.
    ///
    /// Existing blobs are replaced. When `content` fails part-way nothing is
    /// left at `path`. Intermediate directories are the backend's concern.
    async fn write_stream(&self, path: &Path, content: ByteReader) -> Result<u64>;

    /// [`write_stream()`](Self::write_stream) from a slice.
    ///
    /// ```no_run
    /// use std::path::Path;
    /// # use wheelhouse_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// backend.write(Path::new("demo/readme.txt"), b"hello").await?;
    /// # Ok(())
    /// # }
    /// ```
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.write_stream(path, Box::pin(Cursor::new(data.to_vec()))).await?;
        Ok(())
    }

    /// Removes a blob; [`NotFound`](crate::error::ErrorKind::NotFound) if
    /// there was none.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Size and modification time of a blob, without reading it.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
