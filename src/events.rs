//! Structured event journal for extraction runs.
//!
//! Every event is mirrored into `tracing` with `component` and `record_id`
//! fields, and kept in a bounded in-memory journal so the end-of-run summary
//! can report warnings and errors per component.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of events retained in memory.
const DEFAULT_CAPACITY: usize = 10_000;

/// Pipeline component that emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Login,
    Resolver,
    Popup,
    Filter,
    Pagination,
    Detail,
    Dedup,
    Sink,
    Orchestrator,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Resolver => "resolver",
            Self::Popup => "popup",
            Self::Filter => "filter",
            Self::Pagination => "pagination",
            Self::Detail => "detail",
            Self::Dedup => "dedup",
            Self::Sink => "sink",
            Self::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub at: DateTime<Utc>,
    pub component: Component,
    pub severity: Severity,
    pub message: String,
    pub record_id: Option<String>,
}

/// Shared, bounded event journal. Cloning shares the same journal.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<Mutex<VecDeque<PipelineEvent>>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    /// Record an event and forward it to `tracing`.
    pub fn record(
        &self,
        component: Component,
        severity: Severity,
        message: impl Into<String>,
        record_id: Option<&str>,
    ) {
        let message = message.into();
        let rid = record_id.unwrap_or("-");
        match severity {
            Severity::Debug => {
                tracing::debug!(component = component.as_str(), record_id = rid, "{}", message)
            }
            Severity::Info => {
                tracing::info!(component = component.as_str(), record_id = rid, "{}", message)
            }
            Severity::Warn => {
                tracing::warn!(component = component.as_str(), record_id = rid, "{}", message)
            }
            Severity::Error => {
                tracing::error!(component = component.as_str(), record_id = rid, "{}", message)
            }
        }

        let event = PipelineEvent {
            at: Utc::now(),
            component,
            severity,
            message,
            record_id: record_id.map(str::to_string),
        };

        let mut events = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn debug(&self, component: Component, message: impl Into<String>) {
        self.record(component, Severity::Debug, message, None);
    }

    pub fn info(&self, component: Component, message: impl Into<String>) {
        self.record(component, Severity::Info, message, None);
    }

    pub fn warn(&self, component: Component, message: impl Into<String>) {
        self.record(component, Severity::Warn, message, None);
    }

    pub fn error(&self, component: Component, message: impl Into<String>) {
        self.record(component, Severity::Error, message, None);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the retained events, oldest first.
    pub fn snapshot(&self) -> Vec<PipelineEvent> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Count retained events at or above a severity.
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.severity >= severity)
            .count()
    }

    /// Retained events for one record.
    pub fn for_record(&self, record_id: &str) -> Vec<PipelineEvent> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.record_id.as_deref() == Some(record_id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_filter() {
        let log = EventLog::new();
        log.info(Component::Popup, "dismissed cookie banner");
        log.record(
            Component::Detail,
            Severity::Warn,
            "missing field 'nic'",
            Some("RAD-001"),
        );
        log.error(Component::Sink, "database locked");

        assert_eq!(log.len(), 3);
        assert_eq!(log.count_at_least(Severity::Warn), 2);
        let rec = log.for_record("RAD-001");
        assert_eq!(rec.len(), 1);
        assert_eq!(rec[0].component, Component::Detail);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let log = EventLog::with_capacity(2);
        log.info(Component::Orchestrator, "one");
        log.info(Component::Orchestrator, "two");
        log.info(Component::Orchestrator, "three");

        let events = log.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "two");
        assert_eq!(events[1].message, "three");
    }

    #[test]
    fn test_clones_share_journal() {
        let log = EventLog::new();
        let other = log.clone();
        other.warn(Component::Pagination, "cycle detected");
        assert_eq!(log.len(), 1);
    }
}
