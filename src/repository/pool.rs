//! SQLite connection factory.
//!
//! SQLite connections are cheap and file-based, so connections are opened
//! per operation rather than pooled. `SyncConnectionWrapper` runs the
//! blocking driver on tokio's blocking pool.

use std::path::Path;

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::util::to_diesel_error;

/// Diesel error type alias.
pub type DbError = diesel::result::Error;

/// Filesystem path of a `sqlite:` / `sqlite://` URL; bare paths pass through.
pub(crate) fn sqlite_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
}

/// Async SQLite connection type.
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// Wait this long on a locked database before failing a write.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// SQLite connection pool (creates connections on demand).
#[derive(Clone, Debug)]
pub struct SqlitePool {
    database_url: String,
}

impl SqlitePool {
    /// Create a new SQLite pool.
    pub fn new(database_url: &str) -> Self {
        Self {
            database_url: sqlite_path(database_url).to_string(),
        }
    }

    /// Create pool from a file path.
    pub fn from_path(path: &Path) -> Self {
        Self::new(&path.display().to_string())
    }

    /// Get a connection.
    pub async fn get(&self) -> Result<SqliteConn, DbError> {
        let mut conn = SqliteConn::establish(&self.database_url)
            .await
            .map_err(to_diesel_error)?;
        // Several extractor processes may share one database file.
        diesel::sql_query(format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
            .execute(&mut conn)
            .await?;
        Ok(conn)
    }

    /// Get the database URL.
    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_stripping() {
        assert_eq!(SqlitePool::new("sqlite:/tmp/a.db").database_url(), "/tmp/a.db");
        assert_eq!(SqlitePool::new("sqlite:///tmp/a.db").database_url(), "/tmp/a.db");
        assert_eq!(SqlitePool::new("/tmp/a.db").database_url(), "/tmp/a.db");
        assert_eq!(sqlite_path("sqlite://rel.db"), "rel.db");
        assert_eq!(sqlite_path("sqlite:rel.db"), "rel.db");
    }
}
