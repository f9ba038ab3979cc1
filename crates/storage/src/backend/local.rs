//! Blob store rooted in a local directory.
//!
//! Uploaded artifacts live at `{root}/{package}/{blob}`. Read-only indexes
//! point the root at an existing tree of `{package}/{file}` artifacts, so
//! the layout on disk is the package layout.

use crate::backend::{ByteReader, FileInfoStream};
use crate::error::{ErrorKind, Result};
use crate::{FileInfo, StorageBackend, validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::{Exn, ResultExt};
use std::ffi::OsString;
use std::fs::{FileType, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::compat::{FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use tracing::{debug, warn};

/// Marks an upload still being written; such files are invisible.
const PARTIAL_SUFFIX: &str = ".part";

/// Outcome of looking at one directory entry during a listing.
enum Visit {
    Blob(FileInfo),
    Directory(PathBuf),
    Ignored,
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ErrorKind + '_ {
    move |err| match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
        _ => ErrorKind::Io(err),
    }
}

fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX))
}

/// `foo/1234` is written as `foo/.1234.part` and renamed when complete.
fn partial_sibling(target: &Path) -> Result<PathBuf> {
    let Some(file_name) = target.file_name() else {
        exn::bail!(ErrorKind::InvalidPath(target.to_path_buf()));
    };
    let mut partial = OsString::from(".");
    partial.push(file_name);
    partial.push(PARTIAL_SUFFIX);
    Ok(target.with_file_name(partial))
}

fn blob_info(relative: &Path, metadata: &Metadata) -> Result<FileInfo> {
    let modified = metadata.modified().map_err(ErrorKind::Io)?;
    Ok(FileInfo::new(relative, metadata.len(), modified.into()))
}

/// Package blobs on the local filesystem.
///
/// ```no_run
/// use wheelhouse_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/srv/wheelhouse/data")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Opens the blob store at `root`, creating the directory if it is
    /// missing.
    ///
    /// # Errors
    ///
    /// [`InvalidPath`](ErrorKind::InvalidPath) when `root` is relative or
    /// names something other than a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let usable = root.is_absolute() && (!root.exists() || root.is_dir());
        if !usable {
            exn::bail!(ErrorKind::InvalidPath(root.to_path_buf()));
        }
        // Blocking is fine here, backends are built once at startup.
        std::fs::create_dir_all(root).map_err(io_error(root))?;
        Ok(Self { name: name.into(), root: root.to_path_buf() })
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(path)?))
    }

    fn strip_root(&self, absolute: &Path) -> Result<PathBuf> {
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("{} escaped storage root {}", absolute.display(), self.root.display()))
        })?;
        validate_path(relative)
    }

    /// Decides what a listing does with `absolute`. Called from inside the
    /// stream, where errors are yielded rather than propagated.
    async fn visit(&self, absolute: PathBuf, prefix: Option<&Path>) -> Result<Visit> {
        let relative = self.strip_root(&absolute)?;
        // Symlinks are neither blobs nor directories, so the walk cannot loop.
        let metadata = fs::symlink_metadata(&absolute).await.map_err(io_error(&absolute))?;
        let Some(prefix) = prefix else {
            return Ok(match metadata.is_dir() {
                true => Visit::Directory(absolute),
                false if metadata.is_file() && !is_partial(&relative) => Visit::Blob(blob_info(&relative, &metadata)?),
                false => Visit::Ignored,
            });
        };
        if metadata.is_dir() && (prefix.starts_with(&relative) || relative.starts_with(prefix)) {
            return Ok(Visit::Directory(absolute));
        }
        if metadata.is_file() && relative.starts_with(prefix) && !is_partial(&relative) {
            return Ok(Visit::Blob(blob_info(&relative, &metadata)?));
        }
        Ok(Visit::Ignored)
    }

    /// Sorted names of the entries of `directory` accepted by `keep`. A
    /// missing directory has no entries.
    async fn entries_of(&self, directory: &Path, keep: impl Fn(FileType, &OsString) -> bool) -> Result<Vec<String>> {
        let mut read_dir = match fs::read_dir(directory).await {
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            other => other.map_err(io_error(directory))?,
        };
        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(io_error(directory))? {
            let file_type = entry.file_type().await.map_err(io_error(directory))?;
            let file_name = entry.file_name();
            if keep(file_type, &file_name) {
                match file_name.into_string() {
                    Ok(name) => names.push(name),
                    Err(raw) => debug!(directory = %directory.display(), name = ?raw, "skipping non UTF-8 entry"),
                }
            }
        }
        names.sort_unstable();
        Ok(names)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let prefix = match prefix.map(validate_path).transpose() {
            Ok(prefix) => prefix,
            Err(err) => return Box::pin(futures::stream::once(async move { Err(err) })),
        };
        Box::pin(stream! {
            // Depth-first from the root; `visit` prunes directories off the prefix.
            let mut pending = vec![self.root.clone()];
            while let Some(directory) = pending.pop() {
                let mut read_dir = match fs::read_dir(&directory).await {
                    Ok(read_dir) => read_dir,
                    // Like an object store: an absent prefix lists nothing.
                    Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(Exn::from(io_error(&directory)(err)));
                        continue;
                    },
                };
                loop {
                    let entry = match read_dir.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(err) => {
                            yield Err(Exn::from(io_error(&directory)(err)));
                            break;
                        },
                    };
                    match self.visit(entry.path(), prefix.as_deref()).await {
                        Ok(Visit::Blob(info)) => yield Ok(info),
                        Ok(Visit::Directory(child)) => pending.push(child),
                        Ok(Visit::Ignored) => {},
                        // Deleted between reading the directory and looking at it.
                        Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => {},
                        Err(err) => yield Err(err),
                    }
                }
            }
        })
    }

    async fn list_top_level_directories(&self) -> Result<Vec<String>> {
        // Read the directories themselves: an empty package directory still
        // names a package.
        self.entries_of(&self.root, |file_type, _| file_type.is_dir()).await
    }

    async fn list_files_under(&self, directory: &Path) -> Result<Vec<String>> {
        let absolute = self.resolve(directory)?;
        self.entries_of(&absolute, |file_type, name| file_type.is_file() && !is_partial(Path::new(name)))
            .await
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let absolute = self.resolve(path)?;
        Ok(fs::try_exists(&absolute).await.map_err(ErrorKind::Io)?)
    }

    async fn reader(&self, path: &Path) -> Result<ByteReader> {
        let absolute = self.resolve(path)?;
        let file = fs::File::open(&absolute).await.map_err(io_error(path))?;
        Ok(Box::pin(file.compat()))
    }

    async fn write_stream(&self, path: &Path, content: ByteReader) -> Result<u64> {
        let target = self.resolve(path)?;
        let partial = partial_sibling(&target)?;
        if let Some(package_dir) = target.parent() {
            fs::create_dir_all(package_dir).await.map_err(io_error(path))?;
        }

        let mut file = fs::File::create(&partial).await.map_err(io_error(path))?;
        let copied = async {
            let written = tokio::io::copy(&mut content.compat(), &mut file).await?;
            file.sync_all().await?;
            Ok::<_, io::Error>(written)
        }
        .await;
        drop(file);

        let written = match copied {
            Ok(written) => written,
            Err(err) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    warn!(path = %partial.display(), error = %cleanup, "left a partial upload behind");
                }
                exn::bail!(io_error(path)(err));
            },
        };
        fs::rename(&partial, &target).await.map_err(io_error(path))?;
        debug!(backend = %self.name, path = %path.display(), bytes = written, "blob written");
        Ok(written)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let absolute = self.resolve(path)?;
        fs::remove_file(&absolute).await.map_err(io_error(path))?;
        debug!(backend = %self.name, path = %path.display(), "blob deleted");
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let absolute = self.resolve(path)?;
        let metadata = fs::metadata(&absolute).await.map_err(io_error(path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        blob_info(path, &metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::AsyncReadExt;
    use rstest::{fixture, rstest};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;

    const SDIST: &[u8] = b"\x1f\x8b\x08\x00sdist";
    const WHEEL: &[u8] = b"PK\x03\x04wheel";

    struct Store {
        dir: TempDir,
        backend: LocalBackend,
    }
    impl Store {
        fn on_disk(&self, relative: &str) -> PathBuf {
            self.dir.path().join(relative)
        }
    }

    #[fixture]
    fn store() -> Store {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("local", dir.path()).unwrap();
        Store { dir, backend }
    }

    /// A client that drops the connection after the first chunk.
    struct DroppedUpload {
        sent: bool,
    }
    impl futures::io::AsyncRead for DroppedUpload {
        fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
            if std::mem::replace(&mut self.sent, true) {
                return Poll::Ready(Err(io::Error::other("connection reset by peer")));
            }
            buf[..4].copy_from_slice(&WHEEL[..4]);
            Poll::Ready(Ok(4))
        }
    }

    #[test]
    fn test_root_must_be_an_absolute_directory() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("registry.sqlite3");
        std::fs::write(&not_a_dir, b"").unwrap();

        assert!(LocalBackend::new("local", dir.path().join("fresh/data")).is_ok());
        assert!(dir.path().join("fresh/data").is_dir());
        for root in [Path::new("data"), Path::new("./data"), not_a_dir.as_path()] {
            let err = LocalBackend::new("local", root).err().unwrap();
            assert!(matches!(&*err, ErrorKind::InvalidPath(_)), "{root:?} accepted");
        }
    }

    #[rstest]
    #[case("/srv/data/foo/0f6f1b5f", "/srv/data/foo/.0f6f1b5f.part")]
    #[case("/srv/data/foo-1.0.tar.gz", "/srv/data/.foo-1.0.tar.gz.part")]
    fn test_partial_sibling(#[case] target: &str, #[case] expected: &str) {
        let partial = partial_sibling(Path::new(target)).unwrap();
        assert_eq!(partial, Path::new(expected));
        assert!(is_partial(&partial));
        assert!(!is_partial(Path::new(target)));
    }

    #[rstest]
    #[tokio::test]
    async fn test_upload_is_readable_in_chunks(store: Store) {
        let path = Path::new("foo/0f6f1b5f");
        let written = store.backend.write_stream(path, Box::pin(futures::io::Cursor::new(WHEEL))).await.unwrap();
        assert_eq!(written, WHEEL.len() as u64);

        let mut reader = store.backend.reader(path).await.unwrap();
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).await.unwrap();
        assert_eq!(&magic, b"PK\x03\x04");
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"wheel");
        assert!(!store.on_disk("foo/.0f6f1b5f.part").exists());
    }

    #[rstest]
    #[tokio::test]
    async fn test_dropped_upload_leaves_nothing(store: Store) {
        let path = Path::new("foo/0f6f1b5f");
        let err = store.backend.write_stream(path, Box::pin(DroppedUpload { sent: false })).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Io(_)));
        assert!(!store.backend.exists(path).await.unwrap());
        assert!(!store.on_disk("foo/.0f6f1b5f.part").exists());
        assert!(store.backend.list_files_under(Path::new("foo")).await.unwrap().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_stat_and_delete(store: Store) {
        let path = Path::new("foo/foo-1.0.tar.gz");
        store.backend.write(path, SDIST).await.unwrap();
        let info = store.backend.stat(path).await.unwrap();
        assert_eq!(info.path, path);
        assert_eq!(info.size, SDIST.len() as u64);
        assert_eq!(info.file_name(), Some("foo-1.0.tar.gz"));

        // A package directory is not a blob.
        assert!(matches!(&*store.backend.stat(Path::new("foo")).await.unwrap_err(), ErrorKind::NotFound(_)));

        store.backend.delete(path).await.unwrap();
        assert!(!store.backend.exists(path).await.unwrap());
        assert!(matches!(&*store.backend.delete(path).await.unwrap_err(), ErrorKind::NotFound(_)));
        assert!(matches!(&*store.backend.reader(path).await.err().unwrap(), ErrorKind::NotFound(_)));
    }

    #[rstest]
    #[case::everything(None, &["bar/bar-0.1.tar.gz", "foo/foo-1.0.tar.gz", "foo/foo-1.1-py3-none-any.whl", "foobar/foobar-2.0.tar.gz"])]
    #[case::package(Some("foo"), &["foo/foo-1.0.tar.gz", "foo/foo-1.1-py3-none-any.whl"])]
    #[case::trailing_slash(Some("foo/"), &["foo/foo-1.0.tar.gz", "foo/foo-1.1-py3-none-any.whl"])]
    #[case::single_file(Some("bar/bar-0.1.tar.gz"), &["bar/bar-0.1.tar.gz"])]
    #[case::unknown(Some("baz"), &[])]
    #[tokio::test]
    async fn test_listing(store: Store, #[case] prefix: Option<&str>, #[case] expected: &[&str]) {
        for path in ["foo/foo-1.0.tar.gz", "foo/foo-1.1-py3-none-any.whl", "foobar/foobar-2.0.tar.gz", "bar/bar-0.1.tar.gz"] {
            store.backend.write(Path::new(path), SDIST).await.unwrap();
        }
        std::fs::write(store.on_disk("foo/.0f6f1b5f.part"), b"half").unwrap();

        let mut listed: Vec<PathBuf> =
            store.backend.list(prefix.map(Path::new)).await.unwrap().into_iter().map(|info| info.path).collect();
        listed.sort();
        assert_eq!(listed, expected.iter().map(PathBuf::from).collect::<Vec<_>>());
    }

    #[rstest]
    #[tokio::test]
    async fn test_package_directories(store: Store) {
        store.backend.write(Path::new("zope-interface/zope.interface-6.0.tar.gz"), SDIST).await.unwrap();
        store.backend.write(Path::new("attrs/nested/attrs-23.1.0.tar.gz"), SDIST).await.unwrap();
        store.backend.write(Path::new("index.html"), b"<html/>").await.unwrap();
        std::fs::create_dir(store.on_disk("empty")).unwrap();
        assert_eq!(store.backend.list_top_level_directories().await.unwrap(), ["attrs", "empty", "zope-interface"]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_package_files_are_direct_children(store: Store) {
        store.backend.write(Path::new("foo/foo-1.0.tar.gz"), SDIST).await.unwrap();
        store.backend.write(Path::new("foo/foo-0.9-py3-none-any.whl"), WHEEL).await.unwrap();
        store.backend.write(Path::new("foo/old/foo-0.1.tar.gz"), SDIST).await.unwrap();
        std::fs::write(store.on_disk("foo/.foo-1.1.tar.gz.part"), b"half").unwrap();
        assert_eq!(
            store.backend.list_files_under(Path::new("foo")).await.unwrap(),
            ["foo-0.9-py3-none-any.whl", "foo-1.0.tar.gz"]
        );
        assert!(store.backend.list_files_under(Path::new("bar")).await.unwrap().is_empty());
    }

    #[rstest]
    #[case("../registry.sqlite3")]
    #[case("foo/../../etc/passwd")]
    #[case("..")]
    #[tokio::test]
    async fn test_paths_cannot_leave_the_root(store: Store, #[case] path: &str) {
        let path = Path::new(path);
        assert!(matches!(&*store.backend.read(path).await.unwrap_err(), ErrorKind::InvalidPath(_)));
        assert!(matches!(&*store.backend.write(path, SDIST).await.unwrap_err(), ErrorKind::InvalidPath(_)));
        assert!(matches!(&*store.backend.delete(path).await.unwrap_err(), ErrorKind::InvalidPath(_)));
        assert!(matches!(&*store.backend.list_files_under(path).await.unwrap_err(), ErrorKind::InvalidPath(_)));
        assert!(store.backend.list(Some(path)).await.is_err());
    }
}
