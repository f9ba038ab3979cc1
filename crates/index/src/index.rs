use crate::error::{ErrorKind, Result};
use crate::form::validate_file_name;
use crate::models::{PackageFile, UploadRequest, UploadedFile};
use exn::ResultExt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use wheelhouse_registry::{NewRelease, Package, Release, ReleaseStore};
use wheelhouse_storage::error::ErrorKind as StorageErrorKind;
use wheelhouse_storage::{BackendHandle, ByteReader};
use wheelhouse_version::{Version, normalize};

/// The entry point request handlers call into.
///
/// Coordinates a blob [storage backend](wheelhouse_storage::StorageBackend)
/// with a [`ReleaseStore`]. Without a release store the index serves a
/// `{package}/{file}` directory tree straight from storage and refuses
/// uploads.
#[derive(Clone)]
pub struct PackageIndex {
    storage: BackendHandle,
    store: Option<ReleaseStore>,
}
impl std::fmt::Debug for PackageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageIndex")
            .field("storage", &self.storage.name())
            .field("metadata", &self.store.is_some())
            .finish()
    }
}
impl PackageIndex {
    pub fn new(storage: BackendHandle, store: ReleaseStore) -> Self {
        Self { storage, store: Some(store) }
    }

    /// A read-only index over a plain directory tree.
    pub fn without_metadata(storage: BackendHandle) -> Self {
        info!(backend = storage.name(), "no metadata database, serving storage directly");
        Self { storage, store: None }
    }

    pub fn is_read_only(&self) -> bool {
        self.store.is_none()
    }

    /// Normalized names of every known package, sorted.
    #[instrument(skip(self))]
    pub async fn list_packages(&self) -> Result<Vec<String>> {
        match &self.store {
            Some(store) => store
                .list_package_names()
                .await
                .or_raise(|| ErrorKind::Metadata { operation: "list packages", target: "index".into() }),
            None => {
                let directories = self
                    .storage
                    .list_top_level_directories()
                    .await
                    .or_raise(|| ErrorKind::storage("list packages", self.storage.name()))?;
                let mut names: Vec<String> = directories.iter().map(|d| normalize(d)).collect();
                names.sort();
                names.dedup();
                Ok(names)
            },
        }
    }

    /// The files of a package, each with at most one advertised digest. An
    /// unknown package has no files.
    #[instrument(skip(self))]
    pub async fn list_package_files(&self, package_name: &str) -> Result<Vec<PackageFile>> {
        let package_name = normalize(package_name);
        match &self.store {
            Some(store) => {
                let files = store
                    .list_release_files(&package_name)
                    .await
                    .or_raise(|| ErrorKind::Metadata { operation: "list files", target: package_name.clone() })?;
                debug!(count = files.len(), "listed release files");
                Ok(files.into_iter().map(PackageFile::from).collect())
            },
            None => {
                let Some(directory) = self.package_directory(&package_name).await? else {
                    return Ok(Vec::new());
                };
                let files = self
                    .storage
                    .list_files_under(Path::new(&directory))
                    .await
                    .or_raise(|| ErrorKind::storage("list files", &directory))?;
                Ok(files.into_iter().map(PackageFile::bare).collect())
            },
        }
    }

    /// Opens a file for reading. `None` when the package or the file is
    /// unknown.
    ///
    /// A file recorded in the metadata but missing from storage is an error,
    /// not `None`.
    #[instrument(skip(self))]
    pub async fn download_file(&self, package_name: &str, file_name: &str) -> Result<Option<ByteReader>> {
        let package_name = normalize(package_name);
        if validate_file_name(file_name).is_err() {
            return Ok(None);
        }
        let path = match &self.store {
            Some(store) => {
                let file = store
                    .get_release_file(&package_name, file_name)
                    .await
                    .or_raise(|| ErrorKind::Metadata { operation: "download", target: format!("{package_name}/{file_name}") })?;
                match file {
                    Some(file) => PathBuf::from(file.storage_path),
                    None => return Ok(None),
                }
            },
            None => match self.package_directory(&package_name).await? {
                Some(directory) => Path::new(&directory).join(file_name),
                None => return Ok(None),
            },
        };
        debug!(path = %path.display(), "opening blob");
        match self.storage.reader(&path).await {
            Ok(reader) => Ok(Some(reader)),
            // Without metadata a missing blob simply means an unknown file.
            Err(e) if self.store.is_none() && matches!(e.deref(), StorageErrorKind::NotFound(_)) => Ok(None),
            Err(e) => Err(e).or_raise(|| ErrorKind::storage("download", path.display().to_string())),
        }
    }

    /// Stores an artifact and records its metadata.
    ///
    /// The blob is written under a fresh `{package}/{uuid}` path first, then
    /// the release is recorded. If recording fails the blob is deleted again
    /// (best effort: a failed delete is only logged) and the metadata error is
    /// returned. Nothing is retried.
    #[instrument(skip(self, request, content), fields(package = %request.package_name, version = %request.version, file = %request.file_name))]
    pub async fn upload_file(&self, request: &UploadRequest, content: ByteReader) -> Result<UploadedFile> {
        let Some(store) = &self.store else {
            exn::bail!(ErrorKind::ReadOnly);
        };
        let version = request
            .version
            .parse::<Version>()
            .or_raise(|| ErrorKind::InvalidInput(format!("invalid version {:?}", request.version)))?;
        validate_file_name(&request.file_name)?;
        let package_name = normalize(&request.package_name);
        if package_name.is_empty() {
            exn::bail!(ErrorKind::InvalidInput("empty package name".into()));
        }

        let storage_path = format!("{package_name}/{}", uuid::Uuid::new_v4());
        debug!(path = %storage_path, "writing blob");
        let size = self
            .storage
            .write_stream(Path::new(&storage_path), content)
            .await
            .or_raise(|| ErrorKind::storage("upload", &storage_path))?;

        let release = NewRelease {
            package_name: request.package_name.clone(),
            version: request.version.clone(),
            metadata_version: request.metadata_version.clone(),
            summary: request.summary.clone(),
            description: request.description.clone(),
            description_content_type: request.description_content_type.clone(),
            file_name: request.file_name.clone(),
            file_type: request.file_type.clone(),
            storage_path: storage_path.clone(),
            pyversion: request.pyversion.clone(),
            requires_python: request.requires_python.clone(),
            requires_dist: request.requires_dist.clone(),
            digests: request.digests.clone(),
        };
        match store.create_release(&release).await {
            Ok(created) => {
                info!(size, latest = %created.latest_version, new_package = created.new_package, "upload recorded");
                Ok(UploadedFile {
                    package_name: created.package_name,
                    version: created.version,
                    file_name: request.file_name.clone(),
                    storage_path,
                    size,
                })
            },
            Err(e) => {
                if let Err(delete) = self.storage.delete(Path::new(&storage_path)).await {
                    warn!(path = %storage_path, error = ?delete, "failed to delete blob after metadata failure");
                }
                let kind = ErrorKind::metadata(e.deref(), "upload", format!("{package_name}=={version}"));
                Err(e).or_raise(|| kind)
            },
        }
    }

    /// Package metadata. Always `None` without a metadata database.
    #[instrument(skip(self))]
    pub async fn package(&self, package_name: &str) -> Result<Option<Package>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        store
            .get_package_by_name(package_name)
            .await
            .or_raise(|| ErrorKind::Metadata { operation: "get package", target: normalize(package_name) })
    }

    /// A single release, or every release of the package, oldest first.
    #[instrument(skip(self))]
    pub async fn releases(&self, package_name: &str, version: Option<&str>) -> Result<Vec<Release>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        let target = normalize(package_name);
        let releases = match version {
            Some(version) => store.get_release(package_name, version).await.map(|r| r.into_iter().collect()),
            None => store.list_releases(package_name).await,
        };
        match releases {
            Ok(releases) => Ok(releases),
            Err(e) => {
                let kind = ErrorKind::metadata(e.deref(), "get release", target);
                Err(e).or_raise(|| kind)
            },
        }
    }

    /// The storage directory holding a package, matched by normalized name.
    async fn package_directory(&self, normalized_name: &str) -> Result<Option<String>> {
        let directories = self
            .storage
            .list_top_level_directories()
            .await
            .or_raise(|| ErrorKind::storage("list packages", self.storage.name()))?;
        Ok(directories.into_iter().find(|directory| normalize(directory) == normalized_name))
    }
}
