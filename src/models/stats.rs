//! Run statistics and summaries.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters for one extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRunStats {
    pub popups_handled: u64,
    pub pages_walked: u64,
    pub records_seen: u64,
    pub records_inserted: u64,
    pub records_updated: u64,
    pub records_skipped_duplicate: u64,
    pub records_failed: u64,
    pub attachments_downloaded: u64,
    pub attachments_failed: u64,
    pub artifacts_failed: u64,
    pub filters_applied: bool,
}

impl ExtractionRunStats {
    /// Records that reached the store.
    pub fn records_persisted(&self) -> u64 {
        self.records_inserted + self.records_updated
    }

    /// Records with a final outcome of any kind.
    pub fn records_processed(&self) -> u64 {
        self.records_persisted() + self.records_skipped_duplicate + self.records_failed
    }
}

/// Why the page loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    NoNextPage,
    PaginationDisabled,
    CycleDetected,
    MaxPagesReached,
    RecordLimitReached,
    AdvanceFailed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoNextPage => "no_next_page",
            Self::PaginationDisabled => "pagination_disabled",
            Self::CycleDetected => "cycle_detected",
            Self::MaxPagesReached => "max_pages_reached",
            Self::RecordLimitReached => "record_limit_reached",
            Self::AdvanceFailed => "advance_failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "no_next_page" => Some(Self::NoNextPage),
            "pagination_disabled" => Some(Self::PaginationDisabled),
            "cycle_detected" => Some(Self::CycleDetected),
            "max_pages_reached" => Some(Self::MaxPagesReached),
            "record_limit_reached" => Some(Self::RecordLimitReached),
            "advance_failed" => Some(Self::AdvanceFailed),
            _ => None,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// End-of-run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub company: String,
    pub stats: ExtractionRunStats,
    pub stopped_because: StopReason,
    /// Failure counts keyed by error category.
    pub errors_by_category: BTreeMap<String, u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }

    /// A run with failed records is still a success; this only reports it.
    pub fn is_partial(&self) -> bool {
        self.stats.records_failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processed_counts() {
        let stats = ExtractionRunStats {
            records_inserted: 3,
            records_updated: 1,
            records_skipped_duplicate: 2,
            records_failed: 1,
            ..Default::default()
        };
        assert_eq!(stats.records_persisted(), 4);
        assert_eq!(stats.records_processed(), 7);
    }

    #[test]
    fn test_stop_reason_round_trip_names() {
        for reason in [
            StopReason::NoNextPage,
            StopReason::CycleDetected,
            StopReason::RecordLimitReached,
        ] {
            assert_eq!(StopReason::from_str(reason.as_str()), Some(reason));
        }
        assert_eq!(StopReason::from_str("bogus"), None);
    }
}
