//! Per-run state shared by the pipeline stages.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::error::ExtractionError;
use crate::events::{Component, EventLog, Severity};
use crate::models::{ExtractionRunStats, RunSummary, StopReason};

/// Everything one run accumulates. Dropping it removes the staging dir.
pub struct RunContext {
    pub run_id: String,
    pub company: String,
    pub stats: ExtractionRunStats,
    pub events: EventLog,
    pub errors_by_category: BTreeMap<String, u64>,
    pub started_at: DateTime<Utc>,
    staging: TempDir,
}

impl RunContext {
    /// Create a context with a fresh staging directory under `staging_root`
    /// (the system temp dir when `None`).
    pub fn new(company: &str, staging_root: Option<&Path>) -> std::io::Result<Self> {
        let prefix = format!("pqr-{}-", company);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let staging = match staging_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        Ok(Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            company: company.to_string(),
            stats: ExtractionRunStats::default(),
            events: EventLog::new(),
            errors_by_category: BTreeMap::new(),
            started_at: Utc::now(),
            staging,
        })
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    /// Count a classified failure and journal it.
    pub fn record_error(&mut self, error: &ExtractionError, record_id: Option<&str>) {
        *self
            .errors_by_category
            .entry(error.category().to_string())
            .or_insert(0) += 1;
        let component = match error {
            ExtractionError::Persistence(_) => Component::Sink,
            ExtractionError::FatalSetup(_) => Component::Orchestrator,
            _ => Component::Detail,
        };
        self.events
            .record(component, Severity::Error, error.to_string(), record_id);
    }

    /// Count a failure category without a typed error.
    pub fn count_error(&mut self, category: &str) {
        *self
            .errors_by_category
            .entry(category.to_string())
            .or_insert(0) += 1;
    }

    pub fn summary(&self, stopped_because: StopReason) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            company: self.company.clone(),
            stats: self.stats.clone(),
            stopped_because,
            errors_by_category: self.errors_by_category.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_dir_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let ctx = RunContext::new("afinia", Some(root.path())).unwrap();
        let staging = ctx.staging_dir().to_path_buf();
        assert!(staging.starts_with(root.path()));
        assert!(staging.is_dir());
        drop(ctx);
        assert!(!staging.exists());
    }

    #[test]
    fn test_errors_are_counted_by_category() {
        let mut ctx = RunContext::new("aire", None).unwrap();
        ctx.record_error(&ExtractionError::Navigation("404".into()), Some("RAD-1"));
        ctx.record_error(&ExtractionError::Navigation("timeout".into()), None);
        ctx.count_error("persistence");

        let summary = ctx.summary(StopReason::NoNextPage);
        assert_eq!(summary.errors_by_category.get("navigation"), Some(&2));
        assert_eq!(summary.errors_by_category.get("persistence"), Some(&1));
        assert_eq!(ctx.events.for_record("RAD-1").len(), 1);
    }
}
