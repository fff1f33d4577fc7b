//! In-memory record store for unit tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use diesel::result::DatabaseErrorKind;

use super::sink::RecordStore;
use crate::models::{ArtifactOutcome, ExtractedRecord, PqrRecord};
use crate::repository::{to_diesel_error, DbError};

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<PqrRecord>>,
    racing: Mutex<Option<PqrRecord>>,
    fail_reads: bool,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn failing_reads() -> Self {
        Self {
            fail_reads: true,
            ..Default::default()
        }
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }

    pub fn rows(&self) -> Vec<PqrRecord> {
        self.rows.lock().unwrap().clone()
    }

    pub fn insert_stored(&self, company: &str, external_id: Option<&str>, hash: &str) {
        self.rows.lock().unwrap().push(row(company, external_id, hash));
    }

    /// The next `insert` finds this row already written by someone else.
    pub fn race_next_insert(&self, company: &str, external_id: Option<&str>, hash: &str) {
        *self.racing.lock().unwrap() = Some(row(company, external_id, hash));
    }
}

fn row(company: &str, external_id: Option<&str>, hash: &str) -> PqrRecord {
    let now = Utc::now();
    PqrRecord {
        id: uuid::Uuid::new_v4().to_string(),
        company: company.to_string(),
        external_id: external_id.map(str::to_string),
        content_hash: hash.to_string(),
        category: "pqr".to_string(),
        record_date: None,
        fields: BTreeMap::new(),
        attachments: Vec::new(),
        artifact_kind: "failed".to_string(),
        artifact_key: None,
        source_url: String::new(),
        created_at: now,
        updated_at: now,
    }
}

/// An extracted record with the given keys and a failed artifact.
pub fn extracted(company: &str, external_id: Option<&str>, hash: &str) -> ExtractedRecord {
    let mut fields = BTreeMap::from([("nic".to_string(), "123".to_string())]);
    if let Some(id) = external_id {
        fields.insert("radicado".to_string(), id.to_string());
    }
    ExtractedRecord {
        company: company.to_string(),
        fields,
        attachments: Vec::new(),
        attachment_failures: 0,
        artifact: ArtifactOutcome::Failed("not rendered".to_string()),
        content_hash: hash.to_string(),
        external_id: external_id.map(str::to_string),
        source_url: "https://portal.test/detalle".to_string(),
        extracted_at: Utc::now(),
        staging_dir: None,
    }
}

fn conflicts(a: &PqrRecord, b: &PqrRecord) -> bool {
    a.company == b.company
        && (a.content_hash == b.content_hash
            || (a.external_id.is_some() && a.external_id == b.external_id))
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_by_external_id(
        &self,
        company: &str,
        external_id: &str,
    ) -> Result<Option<PqrRecord>, DbError> {
        if self.fail_reads {
            return Err(to_diesel_error("database is locked"));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.company == company && r.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn find_by_content_hash(
        &self,
        company: &str,
        content_hash: &str,
    ) -> Result<Option<PqrRecord>, DbError> {
        if self.fail_reads {
            return Err(to_diesel_error("database is locked"));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.company == company && r.content_hash == content_hash)
            .cloned())
    }

    async fn insert(&self, record: &PqrRecord) -> Result<(), DbError> {
        if self.fail_writes {
            return Err(to_diesel_error("disk I/O error"));
        }
        let mut rows = self.rows.lock().unwrap();
        if let Some(other) = self.racing.lock().unwrap().take() {
            rows.push(other);
        }
        if rows.iter().any(|r| conflicts(r, record)) {
            return Err(DbError::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                Box::new("UNIQUE constraint failed: pqr_records".to_string()),
            ));
        }
        rows.push(record.clone());
        Ok(())
    }

    async fn update_content(&self, record: &PqrRecord) -> Result<bool, DbError> {
        if self.fail_writes {
            return Err(to_diesel_error("disk I/O error"));
        }
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
