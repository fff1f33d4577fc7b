//! Run orchestration, deduplication and persistence.

mod context;
mod dedup;
mod orchestrator;
mod sink;

#[cfg(test)]
pub(crate) mod testing;

pub use context::RunContext;
pub use dedup::{content_hash, DeduplicationGate, DuplicateReason, Verdict};
pub use orchestrator::{ExtractionOrchestrator, RunOptions};
pub use sink::{PersistenceSink, RecordStore, UpsertOutcome};
