//! Content hashing and duplicate detection.

use std::collections::{BTreeMap, HashSet};

use sha2::{Digest, Sha256};

use super::sink::RecordStore;
use crate::config::KeyFields;
use crate::events::{Component, EventLog, Severity};
use crate::models::ExtractedRecord;
use crate::utils::normalize_key;

/// Why a record was judged a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    /// Same content hash or external id earlier in this run.
    SeenThisRun,
    ContentHashStored,
    ExternalIdStored,
}

impl DuplicateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SeenThisRun => "seen this run",
            Self::ContentHashStored => "content hash already stored",
            Self::ExternalIdStored => "external id already stored",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Unique,
    Duplicate(DuplicateReason),
}

impl Verdict {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// SHA-256 over the normalized key fields, `|`-joined, as lowercase hex.
pub fn content_hash(fields: &BTreeMap<String, String>, keys: &KeyFields) -> String {
    let part = |name: &str| normalize_key(fields.get(name).map(String::as_str).unwrap_or(""));
    let joined = [
        part(&keys.nic),
        part(&keys.date),
        part(&keys.document_id),
        part(&keys.external_id),
    ]
    .join("|");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

/// Per-run duplicate checks against this run and the record store.
pub struct DeduplicationGate {
    company: String,
    seen_hashes: HashSet<String>,
    seen_ids: HashSet<String>,
    check_store: bool,
}

impl DeduplicationGate {
    pub fn new(company: &str) -> Self {
        Self {
            company: company.to_string(),
            seen_hashes: HashSet::new(),
            seen_ids: HashSet::new(),
            check_store: true,
        }
    }

    /// Skip the store checks so stored records are re-extracted and updated.
    pub fn without_store_checks(mut self) -> Self {
        self.check_store = false;
        self
    }

    /// Cheap check on the id shown in the listing row, before opening detail.
    pub async fn precheck(
        &self,
        listing_external_id: &str,
        store: &dyn RecordStore,
        events: &EventLog,
    ) -> Verdict {
        let id = listing_external_id.trim();
        if id.is_empty() {
            return Verdict::Unique;
        }
        if self.seen_ids.contains(&normalize_key(id)) {
            return Verdict::Duplicate(DuplicateReason::SeenThisRun);
        }
        if !self.check_store {
            return Verdict::Unique;
        }
        match store.find_by_external_id(&self.company, id).await {
            Ok(Some(_)) => Verdict::Duplicate(DuplicateReason::ExternalIdStored),
            Ok(None) => Verdict::Unique,
            Err(e) => {
                events.record(
                    Component::Dedup,
                    Severity::Warn,
                    format!("Store lookup failed, treating as unique: {}", e),
                    Some(id),
                );
                Verdict::Unique
            }
        }
    }

    /// Full check. A unique record is remembered for the rest of the run.
    pub async fn check(
        &mut self,
        record: &ExtractedRecord,
        store: &dyn RecordStore,
        events: &EventLog,
    ) -> Verdict {
        let id_key = record.external_id.as_deref().map(normalize_key);

        if self.seen_hashes.contains(&record.content_hash)
            || id_key.as_ref().is_some_and(|k| self.seen_ids.contains(k))
        {
            return Verdict::Duplicate(DuplicateReason::SeenThisRun);
        }

        let verdict = if self.check_store {
            self.check_store(record, store, events).await
        } else {
            Verdict::Unique
        };

        if verdict == Verdict::Unique {
            self.seen_hashes.insert(record.content_hash.clone());
            if let Some(k) = id_key {
                self.seen_ids.insert(k);
            }
        }
        verdict
    }

    async fn check_store(
        &self,
        record: &ExtractedRecord,
        store: &dyn RecordStore,
        events: &EventLog,
    ) -> Verdict {
        let log_id = record.log_id();
        let lookup_failed = |e: &dyn std::fmt::Display| {
            events.record(
                Component::Dedup,
                Severity::Warn,
                format!("Store lookup failed, treating as unique: {}", e),
                Some(&log_id),
            );
        };

        match store
            .find_by_content_hash(&self.company, &record.content_hash)
            .await
        {
            Ok(Some(_)) => return Verdict::Duplicate(DuplicateReason::ContentHashStored),
            Ok(None) => {}
            Err(e) => lookup_failed(&e),
        }

        if let Some(id) = record.external_id.as_deref() {
            match store.find_by_external_id(&self.company, id).await {
                Ok(Some(_)) => return Verdict::Duplicate(DuplicateReason::ExternalIdStored),
                Ok(None) => {}
                Err(e) => lookup_failed(&e),
            }
        }
        Verdict::Unique
    }

    /// Number of distinct records accepted this run.
    pub fn seen(&self) -> usize {
        self.seen_hashes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{extracted, MemoryStore};

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_content_hash_normalizes() {
        let keys = KeyFields::default();
        let a = fields(&[
            ("nic", " 123 "),
            ("fecha_radicacion", "01/03/2024"),
            ("radicado", "RAD  001"),
        ]);
        let b = fields(&[
            ("nic", "123"),
            ("fecha_radicacion", "01/03/2024"),
            ("radicado", "rad 001"),
            ("descripcion", "ignored"),
        ]);
        assert_eq!(content_hash(&a, &keys), content_hash(&b, &keys));
        assert_eq!(content_hash(&a, &keys).len(), 64);

        let c = fields(&[("nic", "124"), ("fecha_radicacion", "01/03/2024")]);
        assert_ne!(content_hash(&a, &keys), content_hash(&c, &keys));
    }

    #[test]
    fn test_content_hash_of_empty_fields_is_stable() {
        let keys = KeyFields::default();
        let empty = content_hash(&BTreeMap::new(), &keys);
        let mut hasher = Sha256::new();
        hasher.update(b"|||");
        assert_eq!(empty, hex::encode(hasher.finalize()));
    }

    #[tokio::test]
    async fn test_same_run_duplicate() {
        let store = MemoryStore::default();
        let events = EventLog::new();
        let mut gate = DeduplicationGate::new("afinia");

        let rec = extracted("afinia", Some("RAD-1"), "h1");
        assert_eq!(gate.check(&rec, &store, &events).await, Verdict::Unique);
        assert_eq!(
            gate.check(&rec, &store, &events).await,
            Verdict::Duplicate(DuplicateReason::SeenThisRun)
        );

        let same_id = extracted("afinia", Some("rad-1"), "h2");
        assert!(gate.check(&same_id, &store, &events).await.is_duplicate());
        assert_eq!(gate.seen(), 1);
    }

    #[tokio::test]
    async fn test_stored_duplicates() {
        let store = MemoryStore::default();
        store.insert_stored("afinia", Some("RAD-9"), "h9");
        let events = EventLog::new();
        let mut gate = DeduplicationGate::new("afinia");

        assert_eq!(
            gate.check(&extracted("afinia", None, "h9"), &store, &events).await,
            Verdict::Duplicate(DuplicateReason::ContentHashStored)
        );
        assert_eq!(
            gate.check(&extracted("afinia", Some("RAD-9"), "other"), &store, &events)
                .await,
            Verdict::Duplicate(DuplicateReason::ExternalIdStored)
        );
        assert_eq!(
            gate.precheck("RAD-9", &store, &events).await,
            Verdict::Duplicate(DuplicateReason::ExternalIdStored)
        );
        assert_eq!(gate.precheck("RAD-10", &store, &events).await, Verdict::Unique);
    }

    #[tokio::test]
    async fn test_store_errors_are_not_duplicates() {
        let store = MemoryStore::failing_reads();
        let events = EventLog::new();
        let mut gate = DeduplicationGate::new("afinia");

        let rec = extracted("afinia", Some("RAD-1"), "h1");
        assert_eq!(gate.check(&rec, &store, &events).await, Verdict::Unique);
        assert_eq!(events.count_at_least(Severity::Warn), 2);
    }

    #[tokio::test]
    async fn test_refresh_skips_store() {
        let store = MemoryStore::default();
        store.insert_stored("afinia", Some("RAD-9"), "h9");
        let events = EventLog::new();
        let mut gate = DeduplicationGate::new("afinia").without_store_checks();

        let rec = extracted("afinia", Some("RAD-9"), "h9");
        assert_eq!(gate.precheck("RAD-9", &store, &events).await, Verdict::Unique);
        assert_eq!(gate.check(&rec, &store, &events).await, Verdict::Unique);
        assert!(gate.check(&rec, &store, &events).await.is_duplicate());
    }
}
