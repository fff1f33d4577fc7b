//! Selector candidate sets and the role names the pipeline looks up.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Semantic roles for selector candidate sets.
pub mod roles {
    pub const LISTING_READY: &str = "listing_ready";
    pub const LISTING_ROW: &str = "listing_row";
    pub const VIEW_CONTROL: &str = "view_control";
    pub const ROW_EXTERNAL_ID: &str = "row_external_id";

    pub const START_DATE_INPUT: &str = "start_date_input";
    pub const END_DATE_INPUT: &str = "end_date_input";
    pub const STATUS_FILTER: &str = "status_filter";
    pub const APPLY_FILTER: &str = "apply_filter_button";

    pub const PAGINATION_COUNTER: &str = "pagination_counter";
    pub const NEXT_PAGE: &str = "next_page";
    pub const RELOAD_MARKER: &str = "reload_marker";

    pub const DETAIL_READY: &str = "detail_ready";
    pub const ATTACHMENT_LINKS: &str = "attachment_links";
    /// Tab holding the record's main view; clicked after sub-tab fields.
    pub const DETAIL_MAIN_TAB: &str = "detail_main_tab";

    pub const ACCEPT_BUTTON: &str = "accept_button";
    pub const REJECT_BUTTON: &str = "reject_button";
    pub const CLOSE_BUTTON: &str = "close_button";
    pub const DISMISS_BUTTON: &str = "dismiss_button";

    pub const LOGIN_USERNAME: &str = "login_username";
    pub const LOGIN_PASSWORD: &str = "login_password";
    pub const LOGIN_SUBMIT: &str = "login_submit";
    pub const LOGGED_IN: &str = "logged_in";
    pub const LOGIN_ERROR: &str = "login_error";
}

/// Ordered locator candidates for one role. First visible match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorCandidateSet {
    pub role: String,
    pub candidates: Vec<String>,
}

impl SelectorCandidateSet {
    pub fn new<S: AsRef<str>>(role: &str, candidates: &[S]) -> Self {
        Self {
            role: role.to_string(),
            candidates: candidates.iter().map(|c| c.as_ref().to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }
}

/// Role → candidates map for one company.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorMap(BTreeMap<String, Vec<String>>);

impl SelectorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidate set for `role`; empty when the role is not configured.
    pub fn get(&self, role: &str) -> SelectorCandidateSet {
        SelectorCandidateSet {
            role: role.to_string(),
            candidates: self.0.get(role).cloned().unwrap_or_default(),
        }
    }

    pub fn has(&self, role: &str) -> bool {
        self.0.get(role).is_some_and(|c| !c.is_empty())
    }

    pub fn set<S: AsRef<str>>(&mut self, role: &str, candidates: &[S]) {
        self.0.insert(
            role.to_string(),
            candidates.iter().map(|c| c.as_ref().to_string()).collect(),
        );
    }

    /// Overlay `overrides`: configured roles replace defaults wholesale.
    pub fn merged_with(mut self, overrides: &BTreeMap<String, Vec<String>>) -> Self {
        for (role, candidates) in overrides {
            self.0.insert(role.clone(), candidates.clone());
        }
        self
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_role_is_empty_set() {
        let map = SelectorMap::new();
        let set = map.get(roles::NEXT_PAGE);
        assert_eq!(set.role, "next_page");
        assert!(set.is_empty());
        assert!(!map.has(roles::NEXT_PAGE));
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let mut map = SelectorMap::new();
        map.set(roles::NEXT_PAGE, &["a.next", "text=Siguiente"]);
        map.set(roles::LISTING_ROW, &["tr.row"]);

        let mut overrides = BTreeMap::new();
        overrides.insert("next_page".to_string(), vec!["button.siguiente".to_string()]);
        let merged = map.merged_with(&overrides);

        assert_eq!(merged.get(roles::NEXT_PAGE).candidates, vec!["button.siguiente"]);
        assert_eq!(merged.get(roles::LISTING_ROW).len(), 1);
    }

    #[test]
    fn test_transparent_serde() {
        let map: SelectorMap =
            serde_json::from_str(r#"{"listing_row": ["tr.fila", "tbody tr"]}"#).unwrap();
        assert_eq!(map.get(roles::LISTING_ROW).candidates, vec!["tr.fila", "tbody tr"]);
    }
}
