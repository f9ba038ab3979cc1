//! SQLite connection pool for the release metadata.

use crate::error::{ErrorKind, Result};
use crate::locks::PackageLocks;
use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Listings are served concurrently; uploads queue for the one WAL writer.
const MAX_CONNECTIONS: u32 = 5;
/// How long an upload waits for the writer lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The metadata database.
///
/// Owns the pool and the schema: migrations run before [`connect`](Self::connect)
/// returns, so a `Database` is always ready for a
/// [`ReleaseStore`](crate::ReleaseStore).
///
/// Every store built from one `Database` (or its clones) shares the same
/// per-package upload locks.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    locks: Arc<PackageLocks>,
}

impl Database {
    /// Opens (creating if needed) the database file at `path` and brings its
    /// schema up to date.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::options().filename(path.as_ref()).create_if_missing(true);
        Self::open(options, MAX_CONNECTIONS).await
    }

    /// A private in-memory database, for tests.
    ///
    /// Each SQLite in-memory connection is a separate database, so the pool
    /// holds exactly one connection.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::open(Self::options().filename(":memory:"), 1).await
    }

    fn options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // Release files must belong to a release, releases to a package.
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .auto_vacuum(SqliteAutoVacuum::None)
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .after_connect(|conn, meta| Box::pin(async move { Self::tune(conn, meta).await }))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        debug!("running migrations");
        MIGRATOR.run(&pool).await.or_raise(|| ErrorKind::Migration)?;
        Ok(Self { pool, locks: Arc::default() })
    }

    /// Per-connection settings with no [`SqliteConnectOptions`] setter.
    async fn tune(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA temp_store = MEMORY;
                PRAGMA cache_size = -4096;
                PRAGMA wal_autocheckpoint = 1000;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn locks(&self) -> &Arc<PackageLocks> {
        &self.locks
    }

    /// Waits for checked-out connections to come back, then closes the pool.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_created() {
        let db = Database::connect_in_memory().await.unwrap();
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '%sqlx%' AND name NOT LIKE 'sqlite%' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(tables, ["packages", "release_files", "releases"]);
        db.close().await;
    }

    #[tokio::test]
    async fn test_reopening_a_file_keeps_its_schema() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("registry.sqlite3");
        let db = Database::connect(&path).await.unwrap();
        sqlx::query("INSERT INTO packages VALUES ('foo', 'Foo', '1.0', NULL, 0, 0)").execute(db.pool()).await.unwrap();
        db.close().await;
        assert!(path.exists());

        let db = Database::connect(&path).await.unwrap();
        let name: String = sqlx::query_scalar("SELECT name FROM packages").fetch_one(db.pool()).await.unwrap();
        assert_eq!(name, "Foo");
        db.close().await;
    }

    #[tokio::test]
    async fn test_orphaned_release_is_rejected() {
        let db = Database::connect_in_memory().await.unwrap();
        let result =
            sqlx::query("INSERT INTO releases VALUES ('ghost', '1.0', '2.1', NULL, NULL, NULL, 0, 0)").execute(db.pool()).await;
        assert!(result.is_err(), "foreign keys should be enforced");
        db.close().await;
    }

    #[tokio::test]
    async fn test_busy_timeout_is_set() {
        let db = Database::connect_in_memory().await.unwrap();
        let timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout").fetch_one(db.pool()).await.unwrap();
        assert_eq!(timeout, 5000);
        db.close().await;
    }
}
