//! Data models for pqracquire.

mod pagination;
mod record;
mod stats;

pub use pagination::PaginationState;
pub use record::{ArtifactOutcome, AttachmentRef, ExtractedRecord, PqrRecord, RecordHandle};
pub use stats::{ExtractionRunStats, RunSummary, StopReason};
