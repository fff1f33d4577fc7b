//! SQLite persistence for PQR records and run history.

mod migrations;
mod models;
mod pool;
mod pqr;
mod runs;
mod util;

use chrono::{DateTime, Utc};

pub use migrations::{applied_migrations, run_migrations};
pub use pool::{DbError, SqliteConn, SqlitePool};
pub use pqr::DieselPqrRepository;
pub use runs::DieselRunRepository;
pub use util::{is_unique_violation, to_diesel_error};

/// Parse a datetime string from the database.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Open the database at `database_url`, creating and migrating it as needed.
pub async fn open(database_url: &str) -> Result<(DieselPqrRepository, DieselRunRepository), DbError> {
    run_migrations(database_url).await?;
    let pool = SqlitePool::new(database_url);
    Ok((
        DieselPqrRepository::new(pool.clone()),
        DieselRunRepository::new(pool),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datetime_fallback() {
        assert_eq!(parse_datetime("garbage"), DateTime::UNIX_EPOCH);
        let parsed = parse_datetime("2024-03-01T10:00:00+00:00");
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }
}
