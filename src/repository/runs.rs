//! Extraction run history.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{ExtractionRunRow, NewExtractionRun};
use super::pool::{DbError, SqlitePool};
use crate::models::RunSummary;
use crate::schema::extraction_runs;

/// Stores one row per finished run.
#[derive(Clone)]
pub struct DieselRunRepository {
    pool: SqlitePool,
}

impl DieselRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Save a run summary.
    pub async fn save(&self, summary: &RunSummary) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;
        let row = NewExtractionRun::from_summary(summary)?;

        diesel::replace_into(extraction_runs::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Latest runs, newest first, optionally for one company.
    pub async fn recent(
        &self,
        company: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RunSummary>, DbError> {
        let mut conn = self.pool.get().await?;

        let mut query = extraction_runs::table
            .order(extraction_runs::started_at.desc())
            .limit(limit)
            .into_boxed();
        if let Some(company) = company {
            query = query.filter(extraction_runs::company.eq(company.to_string()));
        }

        query
            .load::<ExtractionRunRow>(&mut conn)
            .await
            .map(|rows| rows.into_iter().map(RunSummary::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::{ExtractionRunStats, StopReason};
    use crate::repository::run_migrations;

    fn summary(id: &str, company: &str, offset_secs: i64) -> RunSummary {
        let started = Utc::now() + Duration::seconds(offset_secs);
        RunSummary {
            run_id: id.to_string(),
            company: company.to_string(),
            stats: ExtractionRunStats {
                records_inserted: 2,
                records_failed: 1,
                ..Default::default()
            },
            stopped_because: StopReason::CycleDetected,
            errors_by_category: BTreeMap::from([("navigation".to_string(), 1)]),
            started_at: started,
            finished_at: started + Duration::seconds(5),
        }
    }

    #[tokio::test]
    async fn test_save_and_recent() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("runs.db").display());
        run_migrations(&url).await.unwrap();
        let repo = DieselRunRepository::new(SqlitePool::new(&url));

        repo.save(&summary("a", "afinia", 0)).await.unwrap();
        repo.save(&summary("b", "afinia", 10)).await.unwrap();
        repo.save(&summary("c", "aire", 20)).await.unwrap();

        let afinia = repo.recent(Some("afinia"), 10).await.unwrap();
        assert_eq!(afinia.len(), 2);
        assert_eq!(afinia[0].run_id, "b");
        assert_eq!(afinia[0].stopped_because, StopReason::CycleDetected);
        assert_eq!(afinia[0].stats.records_inserted, 2);
        assert_eq!(afinia[0].errors_by_category.get("navigation"), Some(&1));

        assert_eq!(repo.recent(None, 1).await.unwrap()[0].run_id, "c");
    }
}
