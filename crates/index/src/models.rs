use derive_more::Display;
use wheelhouse_registry::{Digests, FileListing};

/// Digest algorithms a simple-index link fragment can carry.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    #[display("md5")]
    Md5,
    #[display("sha256")]
    Sha256,
    #[display("blake2_256")]
    Blake2_256,
}

/// The digest advertised for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    pub hash_type: HashType,
    pub value: String,
}
impl FileHash {
    /// Picks one digest, first match wins: md5, then sha256, then blake2_256.
    pub fn select(digests: &Digests) -> Option<Self> {
        [
            (HashType::Md5, &digests.md5),
            (HashType::Sha256, &digests.sha256),
            (HashType::Blake2_256, &digests.blake2_256),
        ]
        .into_iter()
        .find_map(|(hash_type, value)| value.as_ref().map(|value| Self { hash_type, value: value.clone() }))
    }
}

/// One entry of a package's file listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    pub file_name: String,
    /// Empty when served without a metadata database.
    pub file_type: String,
    pub hash: Option<FileHash>,
    pub requires_python: Option<String>,
    /// Signatures are never stored.
    pub has_gpg_signature: bool,
}
impl From<FileListing> for PackageFile {
    fn from(listing: FileListing) -> Self {
        Self {
            hash: FileHash::select(&listing.digests),
            file_name: listing.file_name,
            file_type: listing.file_type,
            requires_python: listing.requires_python,
            has_gpg_signature: false,
        }
    }
}
impl PackageFile {
    pub(crate) fn bare(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            file_type: String::new(),
            hash: None,
            requires_python: None,
            has_gpg_signature: false,
        }
    }
}

/// Metadata accompanying an uploaded artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRequest {
    pub package_name: String,
    pub version: String,
    pub file_name: String,
    pub file_type: String,
    pub metadata_version: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub description_content_type: Option<String>,
    pub pyversion: Option<String>,
    pub requires_python: Option<String>,
    pub requires_dist: Vec<String>,
    pub digests: Digests,
}

/// Where an accepted upload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub package_name: String,
    /// Canonical version.
    pub version: String,
    pub file_name: String,
    pub storage_path: String,
    pub size: u64,
}
