//! PQR record models.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::browser::ElementHandle;

/// A listing row, valid only for the listing DOM generation it came from.
#[derive(Debug, Clone)]
pub struct RecordHandle {
    pub page_generation: u64,
    pub row_index: usize,
    /// The row's "view" control.
    pub control: ElementHandle,
    /// Enclosing row element, when the view control sits inside one.
    pub row: Option<ElementHandle>,
    /// External id read from the listing row, if the company shows it there.
    pub listing_external_id: Option<String>,
}

/// A downloaded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub url: String,
    pub filename: String,
    /// Staging path of the downloaded file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Object-store key once uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_key: Option<String>,
}

/// Result of artifact generation for a record. Never silently absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ArtifactOutcome {
    Pdf(PathBuf),
    Screenshot(PathBuf),
    Failed(String),
}

impl ArtifactOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Pdf(p) | Self::Screenshot(p) => Some(p),
            Self::Failed(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pdf(_) => "pdf",
            Self::Screenshot(_) => "screenshot",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Everything captured for one record; consumed by dedup then persistence.
#[derive(Debug, Clone)]
pub struct ExtractedRecord {
    pub company: String,
    pub fields: BTreeMap<String, String>,
    pub attachments: Vec<AttachmentRef>,
    pub attachment_failures: u32,
    pub artifact: ArtifactOutcome,
    pub content_hash: String,
    pub external_id: Option<String>,
    pub source_url: String,
    pub extracted_at: DateTime<Utc>,
    /// Local directory holding this record's files until persisted.
    pub staging_dir: Option<PathBuf>,
}

impl ExtractedRecord {
    /// Field value, empty when missing.
    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }

    /// Record id for logs: external id, else a hash prefix.
    pub fn log_id(&self) -> String {
        match &self.external_id {
            Some(id) => id.clone(),
            None => format!("#{}", &self.content_hash[..self.content_hash.len().min(12)]),
        }
    }
}

/// A stored PQR row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PqrRecord {
    pub id: String,
    pub company: String,
    pub external_id: Option<String>,
    pub content_hash: String,
    pub category: String,
    pub record_date: Option<String>,
    pub fields: BTreeMap<String, String>,
    pub attachments: Vec<AttachmentRef>,
    pub artifact_kind: String,
    pub artifact_key: Option<String>,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_outcome() {
        let pdf = ArtifactOutcome::Pdf(PathBuf::from("/tmp/a.pdf"));
        assert_eq!(pdf.kind(), "pdf");
        assert_eq!(pdf.path(), Some(Path::new("/tmp/a.pdf")));

        let failed = ArtifactOutcome::Failed("render".into());
        assert!(failed.is_failed());
        assert!(failed.path().is_none());
    }

    #[test]
    fn test_artifact_outcome_serde_shape() {
        let json = serde_json::to_string(&ArtifactOutcome::Failed("timeout".into())).unwrap();
        assert_eq!(json, r#"{"kind":"failed","value":"timeout"}"#);
    }
}
