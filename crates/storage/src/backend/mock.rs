//! In-memory blob store for tests.

use super::{ByteReader, FileInfoStream};
use crate::error::{Error, ErrorKind, Result};
use crate::models::FileInfo;
use crate::{StorageBackend, validate_path};
use async_trait::async_trait;
use exn::ResultExt;
use futures::StreamExt;
use futures::io::{AsyncReadExt, Cursor};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

#[derive(Clone)]
struct Blob {
    stored_at: OffsetDateTime,
    bytes: Vec<u8>,
}
impl Blob {
    fn new(bytes: Vec<u8>) -> Self {
        Self { stored_at: OffsetDateTime::now_utc(), bytes }
    }

    fn info(&self, path: &Path) -> FileInfo {
        FileInfo::new(path, self.bytes.len() as u64, self.stored_at)
    }
}

/// Blobs held in memory, keyed by validated path.
///
/// Writes and deletes can be switched to fail with
/// [`PermissionDenied`](ErrorKind::PermissionDenied), so callers can test
/// how they recover from a storage outage halfway through an upload.
///
/// ```
/// use wheelhouse_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("requests/requests-2.32.3.tar.gz", b"..."),
/// ]);
/// assert!(backend.exists(Path::new("requests/requests-2.32.3.tar.gz")).await?);
///
/// backend.deny_writes(true);
/// assert!(backend.write(Path::new("flask/flask-3.0.0.tar.gz"), b"...").await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockBackend {
    blobs: RwLock<BTreeMap<PathBuf, Blob>>,
    deny_writes: AtomicBool,
    deny_deletes: AtomicBool,
}

impl MockBackend {
    /// Panics on a path that fails validation: a broken fixture should fail
    /// the test using it.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let blobs = files
            .into_iter()
            .map(|(path, bytes)| {
                let path = path.into();
                match validate_path(&path) {
                    Ok(validated) => (validated, Blob::new(bytes.into())),
                    Err(_) => panic!("MockBackend::with_files: invalid path {}", path.display()),
                }
            })
            .collect();
        Self { blobs: RwLock::new(blobs), ..Self::default() }
    }

    pub fn deny_writes(&self, deny: bool) {
        self.deny_writes.store(deny, Ordering::SeqCst);
    }

    pub fn deny_deletes(&self, deny: bool) {
        self.deny_deletes.store(deny, Ordering::SeqCst);
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    fn check(flag: &AtomicBool, path: &Path) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::PermissionDenied(path.to_path_buf()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let listing = async move {
            let prefix = prefix.map(validate_path).transpose()?;
            let blobs = self.blobs.read().await;
            let matching: Vec<Result<FileInfo>> = blobs
                .iter()
                .filter(|(path, _)| prefix.as_ref().is_none_or(|prefix| path.starts_with(prefix)))
                .map(|(path, blob)| Ok(blob.info(path)))
                .collect();
            Ok::<_, Error>(matching)
        };
        // The lock is released before the first item is yielded.
        Box::pin(futures::stream::once(listing).flat_map(|listing| {
            futures::stream::iter(listing.unwrap_or_else(|err| vec![Err(err)]))
        }))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.blobs.read().await.contains_key(&path))
    }

    async fn reader(&self, path: &Path) -> Result<ByteReader> {
        let path = validate_path(path)?;
        let Some(blob) = self.blobs.read().await.get(&path).cloned() else {
            exn::bail!(ErrorKind::NotFound(path));
        };
        Ok(Box::pin(Cursor::new(blob.bytes)))
    }

    async fn write_stream(&self, path: &Path, mut content: ByteReader) -> Result<u64> {
        let path = validate_path(path)?;
        Self::check(&self.deny_writes, &path)?;
        let mut bytes = Vec::new();
        content
            .read_to_end(&mut bytes)
            .await
            .or_raise(|| ErrorKind::BackendError(format!("upload to {} was interrupted", path.display())))?;
        let written = bytes.len() as u64;
        self.blobs.write().await.insert(path, Blob::new(bytes));
        Ok(written)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        Self::check(&self.deny_deletes, &path)?;
        match self.blobs.write().await.remove(&path) {
            Some(_) => Ok(()),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        match self.blobs.read().await.get(&path) {
            Some(blob) => Ok(blob.info(&path)),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }
}
