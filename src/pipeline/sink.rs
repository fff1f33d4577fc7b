//! Idempotent record persistence and artifact upload.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::CompanyProfile;
use crate::events::{Component, EventLog, Severity};
use crate::models::{AttachmentRef, ExtractedRecord, PqrRecord};
use crate::repository::{is_unique_violation, DbError};
use crate::storage::{object_key, ObjectStore, UploadResult};

const DEFAULT_CATEGORY: &str = "pqr";

/// Relational store for PQR rows.
///
/// Implementations must enforce uniqueness of `(company, external_id)` and
/// `(company, content_hash)`; `insert` reports a conflict as a
/// `UniqueViolation` database error.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_external_id(
        &self,
        company: &str,
        external_id: &str,
    ) -> Result<Option<PqrRecord>, DbError>;

    async fn find_by_content_hash(
        &self,
        company: &str,
        content_hash: &str,
    ) -> Result<Option<PqrRecord>, DbError>;

    async fn insert(&self, record: &PqrRecord) -> Result<(), DbError>;

    /// Overwrite the mutable content of the row with `record.id`.
    /// Returns false when no such row exists.
    async fn update_content(&self, record: &PqrRecord) -> Result<bool, DbError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Failed(String),
}

/// Writes extracted records to the record and object stores.
pub struct PersistenceSink {
    company: String,
    store: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    category_field: Option<String>,
    date_field: String,
}

impl PersistenceSink {
    pub fn new(company: &str, store: Arc<dyn RecordStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            company: company.to_string(),
            store,
            objects,
            category_field: None,
            date_field: "fecha_radicacion".to_string(),
        }
    }

    pub fn from_profile(
        profile: &CompanyProfile,
        store: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let mut sink = Self::new(&profile.name, store, objects);
        sink.category_field = profile.category_field.clone();
        sink.date_field = profile.keys.date.clone();
        sink
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    /// Category value for a record; `pqr` when unset.
    pub fn category(&self, record: &ExtractedRecord) -> String {
        self.category_field
            .as_deref()
            .map(|f| record.field(f).trim())
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string()
    }

    fn record_date(&self, record: &ExtractedRecord) -> Option<String> {
        let date = record.field(&self.date_field).trim();
        (!date.is_empty()).then(|| date.to_string())
    }

    /// Upload artifacts then insert or update the row.
    pub async fn upsert(&self, record: &ExtractedRecord, events: &EventLog) -> UpsertOutcome {
        let log_id = record.log_id();
        let category = self.category(record);
        let record_date = self.record_date(record);
        let folder = record
            .external_id
            .clone()
            .or_else(|| record_date.clone())
            .unwrap_or_else(|| record.extracted_at.format("%Y-%m-%d").to_string());

        let artifact_key = match record.artifact.path() {
            Some(path) => match self.upload(&category, &folder, path, events, &log_id).await {
                Ok(key) => Some(key),
                Err(reason) => return UpsertOutcome::Failed(reason),
            },
            None => None,
        };

        let mut attachments: Vec<AttachmentRef> = Vec::with_capacity(record.attachments.len());
        for attachment in &record.attachments {
            let mut stored = attachment.clone();
            if let Some(path) = attachment.local_path.as_deref() {
                match self.upload(&category, &folder, path, events, &log_id).await {
                    Ok(key) => stored.stored_key = Some(key),
                    Err(reason) => return UpsertOutcome::Failed(reason),
                }
            }
            stored.local_path = None;
            attachments.push(stored);
        }

        let now = Utc::now();
        let row = PqrRecord {
            id: uuid::Uuid::new_v4().to_string(),
            company: self.company.clone(),
            external_id: record.external_id.clone(),
            content_hash: record.content_hash.clone(),
            category,
            record_date,
            fields: record.fields.clone(),
            attachments,
            artifact_kind: record.artifact.kind().to_string(),
            artifact_key,
            source_url: record.source_url.clone(),
            created_at: now,
            updated_at: now,
        };

        match self.write(row).await {
            Ok(outcome) => {
                events.record(
                    Component::Sink,
                    Severity::Debug,
                    format!("{:?}", outcome),
                    Some(&log_id),
                );
                outcome
            }
            Err(e) => {
                let reason = format!("database write failed: {}", e);
                events.record(Component::Sink, Severity::Error, reason.clone(), Some(&log_id));
                UpsertOutcome::Failed(reason)
            }
        }
    }

    async fn upload(
        &self,
        category: &str,
        folder: &str,
        path: &Path,
        events: &EventLog,
        log_id: &str,
    ) -> Result<String, String> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let key = object_key(&self.company, category, folder, &filename);

        match self.objects.put_file(&key, path).await {
            Ok(UploadResult::Written) => Ok(key),
            Ok(UploadResult::Unchanged) => {
                events.record(
                    Component::Sink,
                    Severity::Debug,
                    format!("{} unchanged", key),
                    Some(log_id),
                );
                Ok(key)
            }
            Err(e) => {
                let reason = format!("upload of {} failed: {}", key, e);
                events.record(Component::Sink, Severity::Error, reason.clone(), Some(log_id));
                Err(reason)
            }
        }
    }

    /// Update by key if the row exists, else insert. A conflicting insert
    /// means another writer got there first; fall back to updating its row.
    async fn write(&self, row: PqrRecord) -> Result<UpsertOutcome, DbError> {
        if let Some(existing) = self.find_existing(&row, false).await? {
            return self.update(existing, row).await;
        }

        match self.store.insert(&row).await {
            Ok(()) => Ok(UpsertOutcome::Inserted),
            Err(e) if is_unique_violation(&e) => match self.find_existing(&row, true).await? {
                Some(existing) => self.update(existing, row).await,
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn find_existing(
        &self,
        row: &PqrRecord,
        any_key: bool,
    ) -> Result<Option<PqrRecord>, DbError> {
        if let Some(id) = row.external_id.as_deref() {
            let found = self.store.find_by_external_id(&row.company, id).await?;
            if found.is_some() || !any_key {
                return Ok(found);
            }
        }
        self.store
            .find_by_content_hash(&row.company, &row.content_hash)
            .await
    }

    /// Identity (`id`, `created_at`, keys) stays with the stored row.
    async fn update(&self, existing: PqrRecord, incoming: PqrRecord) -> Result<UpsertOutcome, DbError> {
        let merged = PqrRecord {
            id: existing.id,
            company: existing.company,
            external_id: existing.external_id.or(incoming.external_id),
            created_at: existing.created_at,
            ..incoming
        };
        if self.store.update_content(&merged).await? {
            Ok(UpsertOutcome::Updated)
        } else {
            // Row vanished between lookup and update.
            self.store.insert(&merged).await?;
            Ok(UpsertOutcome::Inserted)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::models::ArtifactOutcome;
    use crate::pipeline::testing::{extracted, MemoryStore};
    use crate::storage::FilesystemObjectStore;

    fn sink(store: Arc<MemoryStore>, root: &Path) -> PersistenceSink {
        let mut sink = PersistenceSink::new(
            "afinia",
            store,
            Arc::new(FilesystemObjectStore::new(root.join("objects"))),
        );
        sink.category_field = Some("tipo".to_string());
        sink
    }

    #[tokio::test]
    async fn test_double_upsert_keeps_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let sink = sink(store.clone(), dir.path());
        let events = EventLog::new();

        let rec = extracted("afinia", Some("RAD-1"), "h1");
        assert_eq!(sink.upsert(&rec, &events).await, UpsertOutcome::Inserted);
        let first = store.rows()[0].clone();

        let mut again = rec.clone();
        again.fields.insert("estado".into(), "Cerrada".into());
        assert_eq!(sink.upsert(&again, &events).await, UpsertOutcome::Updated);

        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, first.id);
        assert_eq!(rows[0].created_at, first.created_at);
        assert_eq!(rows[0].fields.get("estado").map(String::as_str), Some("Cerrada"));
    }

    #[tokio::test]
    async fn test_keyless_records_upsert_by_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let sink = sink(store.clone(), dir.path());
        let events = EventLog::new();

        let rec = extracted("afinia", None, "h1");
        assert_eq!(sink.upsert(&rec, &events).await, UpsertOutcome::Inserted);
        assert_eq!(sink.upsert(&rec, &events).await, UpsertOutcome::Updated);
        assert_eq!(store.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_insert_falls_back_to_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        // Another process inserts between our lookup and insert.
        store.race_next_insert("afinia", Some("RAD-1"), "h1");
        let sink = sink(store.clone(), dir.path());

        let rec = extracted("afinia", Some("RAD-1"), "h1");
        assert_eq!(sink.upsert(&rec, &EventLog::new()).await, UpsertOutcome::Updated);
        assert_eq!(store.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_artifact_and_attachments_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let pdf = staging.join("detalle.pdf");
        std::fs::write(&pdf, b"%PDF-1.4").unwrap();
        let att = staging.join("carta.pdf");
        std::fs::write(&att, b"%PDF-1.4 carta").unwrap();

        let store = Arc::new(MemoryStore::default());
        let sink = sink(store.clone(), dir.path());

        let mut rec = extracted("afinia", Some("RAD 7"), "h7");
        rec.fields.insert("tipo".into(), "Queja".into());
        rec.artifact = ArtifactOutcome::Pdf(pdf);
        rec.attachments.push(AttachmentRef {
            url: "https://portal.test/a/carta.pdf".into(),
            filename: "carta.pdf".into(),
            local_path: Some(att),
            size: 14,
            mime_type: Some("application/pdf".into()),
            stored_key: None,
        });

        assert_eq!(sink.upsert(&rec, &EventLog::new()).await, UpsertOutcome::Inserted);
        let row = &store.rows()[0];
        assert_eq!(row.category, "Queja");
        assert_eq!(row.artifact_kind, "pdf");
        assert_eq!(row.artifact_key.as_deref(), Some("afinia/Queja/RAD_7/detalle.pdf"));
        assert_eq!(
            row.attachments[0].stored_key.as_deref(),
            Some("afinia/Queja/RAD_7/carta.pdf")
        );
        assert!(row.attachments[0].local_path.is_none());
        assert!(dir.path().join("objects/afinia/Queja/RAD_7/detalle.pdf").exists());
    }

    #[tokio::test]
    async fn test_upload_failure_fails_only_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let sink = sink(store.clone(), dir.path());

        let mut rec = extracted("afinia", Some("RAD-1"), "h1");
        rec.artifact = ArtifactOutcome::Screenshot(PathBuf::from("/nonexistent/shot.png"));
        assert!(matches!(
            sink.upsert(&rec, &EventLog::new()).await,
            UpsertOutcome::Failed(_)
        ));
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::failing_writes());
        let sink = sink(store, dir.path());

        let outcome = sink
            .upsert(&extracted("afinia", None, "h1"), &EventLog::new())
            .await;
        assert!(matches!(outcome, UpsertOutcome::Failed(r) if r.contains("database")));
    }
}
