//! Diesel-based PQR record repository.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{NewPqrRecord, PqrRecordRow};
use super::pool::{DbError, SqlitePool};
use crate::models::PqrRecord;
use crate::pipeline::RecordStore;
use crate::schema::pqr_records;

/// PQR record repository backed by SQLite.
#[derive(Clone)]
pub struct DieselPqrRepository {
    pool: SqlitePool,
}

impl DieselPqrRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a record by row id.
    pub async fn get(&self, id: &str) -> Result<Option<PqrRecord>, DbError> {
        let mut conn = self.pool.get().await?;

        pqr_records::table
            .find(id)
            .first::<PqrRecordRow>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(PqrRecord::from))
    }

    /// Number of stored records for a company.
    pub async fn count_by_company(&self, company: &str) -> Result<u64, DbError> {
        let mut conn = self.pool.get().await?;

        let count: i64 = pqr_records::table
            .filter(pqr_records::company.eq(company))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Per-company record counts.
    pub async fn counts(&self) -> Result<Vec<(String, u64)>, DbError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<(String, i64)> = pqr_records::table
            .group_by(pqr_records::company)
            .select((pqr_records::company, diesel::dsl::count_star()))
            .order(pqr_records::company.asc())
            .load(&mut conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(company, n)| (company, n.max(0) as u64))
            .collect())
    }

    /// Most recently created records for a company.
    pub async fn list_recent(&self, company: &str, limit: i64) -> Result<Vec<PqrRecord>, DbError> {
        let mut conn = self.pool.get().await?;

        pqr_records::table
            .filter(pqr_records::company.eq(company))
            .order(pqr_records::created_at.desc())
            .limit(limit)
            .load::<PqrRecordRow>(&mut conn)
            .await
            .map(|rows| rows.into_iter().map(PqrRecord::from).collect())
    }
}

fn to_json<T: serde::Serialize>(value: &T, fallback: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| fallback.to_string())
}

#[async_trait]
impl RecordStore for DieselPqrRepository {
    async fn find_by_external_id(
        &self,
        company: &str,
        external_id: &str,
    ) -> Result<Option<PqrRecord>, DbError> {
        let mut conn = self.pool.get().await?;

        pqr_records::table
            .filter(pqr_records::company.eq(company))
            .filter(pqr_records::external_id.eq(external_id))
            .first::<PqrRecordRow>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(PqrRecord::from))
    }

    async fn find_by_content_hash(
        &self,
        company: &str,
        content_hash: &str,
    ) -> Result<Option<PqrRecord>, DbError> {
        let mut conn = self.pool.get().await?;

        pqr_records::table
            .filter(pqr_records::company.eq(company))
            .filter(pqr_records::content_hash.eq(content_hash))
            .first::<PqrRecordRow>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(PqrRecord::from))
    }

    async fn insert(&self, record: &PqrRecord) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;

        let fields = to_json(&record.fields, "{}");
        let attachments = to_json(&record.attachments, "[]");
        let created_at = record.created_at.to_rfc3339();
        let updated_at = record.updated_at.to_rfc3339();

        let new_record = NewPqrRecord {
            id: &record.id,
            company: &record.company,
            external_id: record.external_id.as_deref(),
            content_hash: &record.content_hash,
            category: &record.category,
            record_date: record.record_date.as_deref(),
            fields: &fields,
            attachments: &attachments,
            artifact_kind: &record.artifact_kind,
            artifact_key: record.artifact_key.as_deref(),
            source_url: &record.source_url,
            created_at: &created_at,
            updated_at: &updated_at,
        };

        diesel::insert_into(pqr_records::table)
            .values(&new_record)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn update_content(&self, record: &PqrRecord) -> Result<bool, DbError> {
        let mut conn = self.pool.get().await?;

        let fields = to_json(&record.fields, "{}");
        let attachments = to_json(&record.attachments, "[]");
        let updated_at = record.updated_at.to_rfc3339();

        let rows = diesel::update(pqr_records::table.find(&record.id))
            .set((
                pqr_records::content_hash.eq(&record.content_hash),
                pqr_records::category.eq(&record.category),
                pqr_records::record_date.eq(record.record_date.as_deref()),
                pqr_records::fields.eq(&fields),
                pqr_records::attachments.eq(&attachments),
                pqr_records::artifact_kind.eq(&record.artifact_kind),
                pqr_records::artifact_key.eq(record.artifact_key.as_deref()),
                pqr_records::source_url.eq(&record.source_url),
                pqr_records::updated_at.eq(&updated_at),
            ))
            .execute(&mut conn)
            .await?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::repository::{is_unique_violation, run_migrations};

    async fn repo(dir: &tempfile::TempDir) -> DieselPqrRepository {
        let url = format!("sqlite:{}", dir.path().join("pqr.db").display());
        run_migrations(&url).await.unwrap();
        DieselPqrRepository::new(SqlitePool::new(&url))
    }

    fn record(id: &str, external_id: Option<&str>, hash: &str) -> PqrRecord {
        let now = Utc::now();
        PqrRecord {
            id: id.to_string(),
            company: "afinia".to_string(),
            external_id: external_id.map(str::to_string),
            content_hash: hash.to_string(),
            category: "peticion".to_string(),
            record_date: Some("01/03/2024".to_string()),
            fields: BTreeMap::from([("nic".to_string(), "123".to_string())]),
            attachments: Vec::new(),
            artifact_kind: "pdf".to_string(),
            artifact_key: None,
            source_url: "https://portal.test/detalle/1".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;

        repo.insert(&record("r1", Some("PQR-1"), "h1")).await.unwrap();

        let by_id = repo.find_by_external_id("afinia", "PQR-1").await.unwrap().unwrap();
        assert_eq!(by_id.fields.get("nic").map(String::as_str), Some("123"));
        assert!(repo.find_by_content_hash("afinia", "h1").await.unwrap().is_some());
        assert!(repo.find_by_content_hash("aire", "h1").await.unwrap().is_none());
        assert_eq!(repo.count_by_company("afinia").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_external_id_is_unique_violation() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;

        repo.insert(&record("r1", Some("PQR-1"), "h1")).await.unwrap();
        let err = repo.insert(&record("r2", Some("PQR-1"), "h2")).await.unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_records_without_external_id_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;

        repo.insert(&record("r1", None, "h1")).await.unwrap();
        repo.insert(&record("r2", None, "h2")).await.unwrap();
        assert_eq!(repo.count_by_company("afinia").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_content() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir).await;

        let mut rec = record("r1", Some("PQR-1"), "h1");
        repo.insert(&rec).await.unwrap();

        rec.content_hash = "h1b".to_string();
        rec.fields.insert("estado".to_string(), "Cerrada".to_string());
        assert!(repo.update_content(&rec).await.unwrap());

        let stored = repo.get("r1").await.unwrap().unwrap();
        assert_eq!(stored.content_hash, "h1b");
        assert_eq!(stored.fields.len(), 2);

        assert!(!repo.update_content(&record("missing", None, "x")).await.unwrap());
    }
}
