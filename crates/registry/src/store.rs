//! Release store: packages, releases and release files.
//!
//! The three record kinds are only ever written together, by
//! [`ReleaseStore::create_release`], inside a single transaction.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::locks::PackageLocks;
use crate::models::{
    FileListing, FileListingRow, NewRelease, Package, PackageRow, Release, ReleaseFile, ReleaseFileRow, ReleaseRow,
};
use exn::ResultExt;
use sqlx::SqlitePool;
use std::sync::Arc;
use time::UtcDateTime;
use tracing::{debug, instrument};
use wheelhouse_version::{Version, normalize};

/// Outcome of a successful [`ReleaseStore::create_release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRelease {
    pub package_name: String,
    /// Canonical form of the uploaded version.
    pub version: String,
    /// Whether this upload created the package.
    pub new_package: bool,
    /// The package's latest version after the upload.
    pub latest_version: String,
}

/// Transactional access to release metadata.
///
/// Cheap to clone. The connection pool and the per-package locks belong to
/// the [`Database`], so uploads of the same package are serialized across
/// every store built from it.
#[derive(Debug, Clone)]
pub struct ReleaseStore {
    pool: SqlitePool,
    locks: Arc<PackageLocks>,
}
impl From<&Database> for ReleaseStore {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone(), locks: Arc::clone(db.locks()) }
    }
}
impl ReleaseStore {
    fn now() -> i64 {
        UtcDateTime::now().unix_timestamp()
    }

    // =========================================================================
    // Packages
    // =========================================================================

    /// Look up a package by (any spelling of) its name.
    #[instrument(skip(self))]
    pub async fn get_package_by_name(&self, name: &str) -> Result<Option<Package>> {
        let row: Option<PackageRow> = sqlx::query_as(include_str!("../queries/get_package_by_name.sql"))
            .bind(normalize(name))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Package::try_from).transpose()
    }

    /// Normalized names of every package, sorted.
    #[instrument(skip(self))]
    pub async fn list_package_names(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_package_names.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(names)
    }

    // =========================================================================
    // Releases
    // =========================================================================

    /// Record an upload: package, release and file, atomically.
    ///
    /// 1. The package is inserted if absent (with this upload's version as
    ///    its latest version).
    /// 2. The release is inserted, or its metadata overwritten.
    /// 3. The file is inserted. A file name that already exists for the
    ///    package is a [`Conflict`](ErrorKind::Conflict).
    /// 4. For an existing package, the latest version and summary advance
    ///    only if the uploaded version is strictly greater than the stored
    ///    one (or the stored one no longer parses).
    ///
    /// Any failure rolls back every step. Uploads for the same package are
    /// serialized.
    #[instrument(skip(self, release), fields(package = %release.package_name, version = %release.version, file = %release.file_name))]
    pub async fn create_release(&self, release: &NewRelease) -> Result<CreatedRelease> {
        let version = release
            .version
            .parse::<Version>()
            .or_raise(|| ErrorKind::InvalidVersion(release.version.clone()))?;
        let canonical = version.to_string();
        let package_name = normalize(&release.package_name);
        let now = Self::now();

        let _guard = self.locks.acquire(&package_name).await;
        // Dropping an uncommitted transaction rolls it back.
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;

        debug!("inserting package if absent");
        let new_package = sqlx::query(include_str!("../queries/insert_package.sql"))
            .bind(&package_name)
            .bind(&release.package_name)
            .bind(&canonical)
            .bind(&release.summary)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| ErrorKind::from_sqlx(e, package_name.clone()))?
            .rows_affected()
            == 1;

        debug!(new_package, "upserting release");
        sqlx::query(include_str!("../queries/upsert_release.sql"))
            .bind(&package_name)
            .bind(&canonical)
            .bind(&release.metadata_version)
            .bind(&release.summary)
            .bind(&release.description)
            .bind(&release.description_content_type)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| ErrorKind::from_sqlx(e, format!("{package_name}=={canonical}")))?;

        debug!("inserting release file");
        let requires_dist =
            serde_json::to_string(&release.requires_dist).or_raise(|| ErrorKind::InvalidData("requires_dist"))?;
        sqlx::query(include_str!("../queries/insert_release_file.sql"))
            .bind(&package_name)
            .bind(&canonical)
            .bind(&release.file_name)
            .bind(&release.file_type)
            .bind(&release.storage_path)
            .bind(&release.pyversion)
            .bind(&release.requires_python)
            .bind(requires_dist)
            .bind(&release.digests.md5)
            .bind(&release.digests.sha256)
            .bind(&release.digests.blake2_256)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| ErrorKind::from_sqlx(e, format!("{package_name}/{}", release.file_name)))?;

        let latest_version = match new_package {
            true => canonical.clone(),
            false => {
                let current: Option<PackageRow> = sqlx::query_as(include_str!("../queries/get_package_by_name.sql"))
                    .bind(&package_name)
                    .fetch_optional(&mut *tx)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
                let current = current.map(Package::try_from).transpose()?.and_then(|p| p.latest_version);
                // A stored version that no longer parses is always replaced.
                let advance = match current.as_deref().map(str::parse::<Version>) {
                    Some(Ok(stored)) => version > stored,
                    Some(Err(_)) | None => true,
                };
                debug!(current = ?current, advance, "comparing with latest version");
                match (advance, current) {
                    (false, Some(current)) => current,
                    _ => {
                        sqlx::query(include_str!("../queries/update_package_latest.sql"))
                            .bind(&canonical)
                            .bind(&release.summary)
                            .bind(now)
                            .bind(&package_name)
                            .execute(&mut *tx)
                            .await
                            .or_raise(|| ErrorKind::Database)?;
                        canonical.clone()
                    },
                }
            },
        };

        debug!("committing");
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(CreatedRelease {
            package_name,
            version: canonical,
            new_package,
            latest_version,
        })
    }

    /// Look up a release. The version is matched by its canonical form, so
    /// `1.0.0RC1` finds the release stored as `1.0.0rc1`.
    #[instrument(skip(self))]
    pub async fn get_release(&self, package_name: &str, version: &str) -> Result<Option<Release>> {
        let version = version.parse::<Version>().or_raise(|| ErrorKind::InvalidVersion(version.to_string()))?;
        let row: Option<ReleaseRow> = sqlx::query_as(include_str!("../queries/get_release.sql"))
            .bind(normalize(package_name))
            .bind(version.to_string())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Release::try_from).transpose()
    }

    /// Every release of a package, oldest first.
    #[instrument(skip(self))]
    pub async fn list_releases(&self, package_name: &str) -> Result<Vec<Release>> {
        let rows: Vec<ReleaseRow> = sqlx::query_as(include_str!("../queries/list_releases.sql"))
            .bind(normalize(package_name))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Release::try_from).collect()
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Listing entries for every file of a package, in upload order.
    #[instrument(skip(self))]
    pub async fn list_release_files(&self, package_name: &str) -> Result<Vec<FileListing>> {
        let rows: Vec<FileListingRow> = sqlx::query_as(include_str!("../queries/list_release_files.sql"))
            .bind(normalize(package_name))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(FileListing::from).collect())
    }

    #[instrument(skip(self))]
    pub async fn get_release_file(&self, package_name: &str, file_name: &str) -> Result<Option<ReleaseFile>> {
        let row: Option<ReleaseFileRow> = sqlx::query_as(include_str!("../queries/get_release_file.sql"))
            .bind(normalize(package_name))
            .bind(file_name)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(ReleaseFile::try_from).transpose()
    }
}
