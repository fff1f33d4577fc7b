//! Diesel row types for the PQR tables.

use diesel::prelude::*;

use super::{parse_datetime, DbError};
use crate::models::{ExtractionRunStats, PqrRecord, RunSummary, StopReason};
use crate::schema;

/// PQR row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::pqr_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PqrRecordRow {
    pub id: String,
    pub company: String,
    pub external_id: Option<String>,
    pub content_hash: String,
    pub category: String,
    pub record_date: Option<String>,
    pub fields: String,
    pub attachments: String,
    pub artifact_kind: String,
    pub artifact_key: Option<String>,
    pub source_url: String,
    pub created_at: String,
    pub updated_at: String,
}

/// New PQR row for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::pqr_records)]
pub struct NewPqrRecord<'a> {
    pub id: &'a str,
    pub company: &'a str,
    pub external_id: Option<&'a str>,
    pub content_hash: &'a str,
    pub category: &'a str,
    pub record_date: Option<&'a str>,
    pub fields: &'a str,
    pub attachments: &'a str,
    pub artifact_kind: &'a str,
    pub artifact_key: Option<&'a str>,
    pub source_url: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

impl From<PqrRecordRow> for PqrRecord {
    fn from(row: PqrRecordRow) -> Self {
        PqrRecord {
            id: row.id,
            company: row.company,
            external_id: row.external_id,
            content_hash: row.content_hash,
            category: row.category,
            record_date: row.record_date,
            fields: serde_json::from_str(&row.fields).unwrap_or_default(),
            attachments: serde_json::from_str(&row.attachments).unwrap_or_default(),
            artifact_kind: row.artifact_kind,
            artifact_key: row.artifact_key,
            source_url: row.source_url,
            created_at: parse_datetime(&row.created_at),
            updated_at: parse_datetime(&row.updated_at),
        }
    }
}

/// Extraction run row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::extraction_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ExtractionRunRow {
    pub id: String,
    pub company: String,
    pub started_at: String,
    pub finished_at: String,
    pub stopped_because: String,
    pub stats: String,
    pub errors: String,
    pub records_persisted: i32,
    pub records_failed: i32,
}

/// Owned insert form; run rows are written once at the end of a run.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::extraction_runs)]
pub struct NewExtractionRun {
    pub id: String,
    pub company: String,
    pub started_at: String,
    pub finished_at: String,
    pub stopped_because: String,
    pub stats: String,
    pub errors: String,
    pub records_persisted: i32,
    pub records_failed: i32,
}

impl NewExtractionRun {
    pub fn from_summary(summary: &RunSummary) -> Result<Self, DbError> {
        let stats = serde_json::to_string(&summary.stats)
            .map_err(|e| DbError::SerializationError(Box::new(e)))?;
        let errors = serde_json::to_string(&summary.errors_by_category)
            .map_err(|e| DbError::SerializationError(Box::new(e)))?;
        Ok(Self {
            id: summary.run_id.clone(),
            company: summary.company.clone(),
            started_at: summary.started_at.to_rfc3339(),
            finished_at: summary.finished_at.to_rfc3339(),
            stopped_because: summary.stopped_because.as_str().to_string(),
            stats,
            errors,
            records_persisted: clamp_i32(summary.stats.records_persisted()),
            records_failed: clamp_i32(summary.stats.records_failed),
        })
    }
}

fn clamp_i32(n: u64) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

impl From<ExtractionRunRow> for RunSummary {
    fn from(row: ExtractionRunRow) -> Self {
        RunSummary {
            run_id: row.id,
            company: row.company,
            stats: serde_json::from_str::<ExtractionRunStats>(&row.stats).unwrap_or_default(),
            stopped_because: StopReason::from_str(&row.stopped_because)
                .unwrap_or(StopReason::NoNextPage),
            errors_by_category: serde_json::from_str(&row.errors).unwrap_or_default(),
            started_at: parse_datetime(&row.started_at),
            finished_at: parse_datetime(&row.finished_at),
        }
    }
}
