//! Release metadata models, and the database rows they are stored as.

use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use time::UtcDateTime;

/// A package known to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Name as supplied by the first upload.
    pub name: String,
    pub normalized_name: String,
    /// Canonical form of the highest version uploaded so far.
    pub latest_version: Option<String>,
    /// Summary of the release that holds `latest_version`.
    pub summary: Option<String>,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

/// A single version of a package. Several files may belong to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub package_name: String,
    /// Canonical version string.
    pub version: String,
    pub metadata_version: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub description_content_type: Option<String>,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

/// Optional digests supplied by the uploader, hex encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Digests {
    pub md5: Option<String>,
    pub sha256: Option<String>,
    pub blake2_256: Option<String>,
}

/// An uploaded artifact. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFile {
    pub package_name: String,
    pub version: String,
    pub file_name: String,
    /// e.g. `sdist` or `bdist_wheel`.
    pub file_type: String,
    /// Opaque blob address in the storage backend.
    pub storage_path: String,
    pub pyversion: Option<String>,
    pub requires_python: Option<String>,
    pub requires_dist: Vec<String>,
    pub digests: Digests,
    pub created_at: UtcDateTime,
}

/// The slice of a [`ReleaseFile`] needed to render a package's file listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileListing {
    pub version: String,
    pub file_name: String,
    pub file_type: String,
    pub requires_python: Option<String>,
    pub digests: Digests,
}

/// Everything recorded by a single upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRelease {
    pub package_name: String,
    /// Version as supplied; canonicalized before storage.
    pub version: String,
    pub metadata_version: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub description_content_type: Option<String>,
    pub file_name: String,
    pub file_type: String,
    pub storage_path: String,
    pub pyversion: Option<String>,
    pub requires_python: Option<String>,
    pub requires_dist: Vec<String>,
    pub digests: Digests,
}

fn timestamp(value: i64, field: &'static str) -> Result<UtcDateTime, Error> {
    UtcDateTime::from_unix_timestamp(value).or_raise(|| ErrorKind::InvalidData(field))
}

#[derive(sqlx::FromRow)]
pub(crate) struct PackageRow {
    normalized_name: String,
    name: String,
    latest_version: Option<String>,
    summary: Option<String>,
    created_at: i64,
    updated_at: i64,
}
impl TryFrom<PackageRow> for Package {
    type Error = Error;
    fn try_from(row: PackageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            name: row.name,
            normalized_name: row.normalized_name,
            latest_version: row.latest_version,
            summary: row.summary,
            created_at: timestamp(row.created_at, "package creation date")?,
            updated_at: timestamp(row.updated_at, "package update date")?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ReleaseRow {
    package_name: String,
    version: String,
    metadata_version: String,
    summary: Option<String>,
    description: Option<String>,
    description_content_type: Option<String>,
    created_at: i64,
    updated_at: i64,
}
impl TryFrom<ReleaseRow> for Release {
    type Error = Error;
    fn try_from(row: ReleaseRow) -> Result<Self, Self::Error> {
        Ok(Self {
            package_name: row.package_name,
            version: row.version,
            metadata_version: row.metadata_version,
            summary: row.summary,
            description: row.description,
            description_content_type: row.description_content_type,
            created_at: timestamp(row.created_at, "release creation date")?,
            updated_at: timestamp(row.updated_at, "release update date")?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ReleaseFileRow {
    package_name: String,
    version: String,
    file_name: String,
    file_type: String,
    storage_path: String,
    pyversion: Option<String>,
    requires_python: Option<String>,
    requires_dist: String,
    md5_digest: Option<String>,
    sha256_digest: Option<String>,
    blake2_256_digest: Option<String>,
    created_at: i64,
}
impl TryFrom<ReleaseFileRow> for ReleaseFile {
    type Error = Error;
    fn try_from(row: ReleaseFileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            package_name: row.package_name,
            version: row.version,
            file_name: row.file_name,
            file_type: row.file_type,
            storage_path: row.storage_path,
            pyversion: row.pyversion,
            requires_python: row.requires_python,
            requires_dist: serde_json::from_str(&row.requires_dist)
                .or_raise(|| ErrorKind::InvalidData("requires_dist"))?,
            digests: Digests {
                md5: row.md5_digest,
                sha256: row.sha256_digest,
                blake2_256: row.blake2_256_digest,
            },
            created_at: timestamp(row.created_at, "file creation date")?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct FileListingRow {
    version: String,
    file_name: String,
    file_type: String,
    requires_python: Option<String>,
    md5_digest: Option<String>,
    sha256_digest: Option<String>,
    blake2_256_digest: Option<String>,
}
impl From<FileListingRow> for FileListing {
    fn from(row: FileListingRow) -> Self {
        Self {
            version: row.version,
            file_name: row.file_name,
            file_type: row.file_type,
            requires_python: row.requires_python,
            digests: Digests {
                md5: row.md5_digest,
                sha256: row.sha256_digest,
                blake2_256: row.blake2_256_digest,
            },
        }
    }
}
