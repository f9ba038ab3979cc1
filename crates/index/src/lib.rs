//! Package index core: ingestion, listings and downloads.
//!
//! [`PackageIndex`] ties a blob storage backend to the release metadata
//! store. [`UploadForm`] validates legacy upload requests and
//! [`SimpleRenderer`] produces the PEP 503 pages.

pub mod error;
mod form;
mod index;
mod models;
mod simple;

pub use crate::form::UploadForm;
pub use crate::index::PackageIndex;
pub use crate::models::{FileHash, HashType, PackageFile, UploadRequest, UploadedFile};
pub use crate::simple::SimpleRenderer;
