//! Release metadata for wheelhouse, stored in SQLite.
//!
//! [`Database`] owns the connection pool and schema; [`ReleaseStore`] is the
//! query surface on top of it.

mod db;
pub mod error;
mod locks;
mod models;
mod store;

pub use db::Database;
pub use models::{Digests, FileListing, NewRelease, Package, Release, ReleaseFile};
pub use store::{CreatedRelease, ReleaseStore};
