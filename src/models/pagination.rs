//! Listing pagination counters.

use serde::{Deserialize, Serialize};

/// Counters parsed from a listing page; `None` when unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationState {
    pub range_start: Option<u64>,
    pub range_end: Option<u64>,
    pub total_count: Option<u64>,
    pub current_page: u32,
}

impl PaginationState {
    pub fn unknown(current_page: u32) -> Self {
        Self {
            current_page,
            ..Default::default()
        }
    }

    /// Visited range, when both ends are known.
    pub fn range(&self) -> Option<(u64, u64)> {
        match (self.range_start, self.range_end) {
            (Some(s), Some(e)) => Some((s, e)),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.range().is_some()
    }

    /// Range size fits in the total, when both are known.
    pub fn is_consistent(&self) -> bool {
        match (self.range(), self.total_count) {
            (Some((s, e)), Some(total)) => s <= e && e - s < total.max(1) && e <= total,
            (Some((s, e)), None) => s <= e,
            _ => true,
        }
    }

    /// Whether the counter says this is the last page.
    pub fn is_last_page(&self) -> bool {
        matches!((self.range_end, self.total_count), (Some(e), Some(t)) if e >= t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(s: u64, e: u64, t: Option<u64>) -> PaginationState {
        PaginationState {
            range_start: Some(s),
            range_end: Some(e),
            total_count: t,
            current_page: 1,
        }
    }

    #[test]
    fn test_consistency() {
        assert!(state(1, 25, Some(1204)).is_consistent());
        assert!(state(1201, 1204, Some(1204)).is_consistent());
        assert!(!state(1, 25, Some(10)).is_consistent());
        assert!(!state(30, 25, None).is_consistent());
        assert!(PaginationState::unknown(3).is_consistent());
    }

    #[test]
    fn test_last_page() {
        assert!(state(1201, 1204, Some(1204)).is_last_page());
        assert!(!state(1, 25, Some(1204)).is_last_page());
        assert!(!state(1, 25, None).is_last_page());
    }
}
