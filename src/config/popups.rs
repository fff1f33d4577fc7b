//! Popup signatures.

use serde::{Deserialize, Serialize};

use super::selectors::roles;

/// What to do with a matched popup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopupAction {
    Accept,
    Reject,
    Close,
    Dismiss,
    /// Record the match, leave the popup alone.
    Ignore,
    /// Wait for the popup to go away by itself.
    Wait,
    /// Run a script first, then fall back to the strategy chain.
    Custom(String),
}

impl PopupAction {
    /// Selector role of the nested control that performs this action.
    pub fn control_role(&self) -> Option<&'static str> {
        match self {
            Self::Accept => Some(roles::ACCEPT_BUTTON),
            Self::Reject => Some(roles::REJECT_BUTTON),
            Self::Close => Some(roles::CLOSE_BUTTON),
            Self::Dismiss | Self::Custom(_) => Some(roles::DISMISS_BUTTON),
            Self::Ignore | Self::Wait => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Close => "close",
            Self::Dismiss => "dismiss",
            Self::Ignore => "ignore",
            Self::Wait => "wait",
            Self::Custom(_) => "custom",
        }
    }
}

/// Rule for detecting and dismissing one kind of popup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupSignature {
    pub name: String,
    pub selectors: Vec<String>,
    /// Case-insensitive regexes; at least one must match the popup text.
    /// Empty means the selector match alone qualifies.
    #[serde(default)]
    pub text_patterns: Vec<String>,
    pub action: PopupAction,
    /// Lower is handled first.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_popup_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_priority() -> u32 {
    50
}

fn default_popup_timeout_ms() -> u64 {
    3_000
}

impl PopupSignature {
    pub fn new(name: &str, selectors: &[&str], action: PopupAction, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            text_patterns: Vec::new(),
            action,
            priority,
            timeout_ms: default_popup_timeout_ms(),
        }
    }

    pub fn with_patterns(mut self, patterns: &[&str]) -> Self {
        self.text_patterns = patterns.iter().map(|p| p.to_string()).collect();
        self
    }
}

/// Signatures shared by every portal.
pub fn common_signatures() -> Vec<PopupSignature> {
    vec![
        PopupSignature::new(
            "cookie_consent",
            &[
                "#onetrust-banner-sdk",
                ".cookie-consent",
                "#cookie-banner",
                "div[class*='cookie']",
            ],
            PopupAction::Accept,
            10,
        )
        .with_patterns(&["cookie"]),
        PopupSignature::new(
            "satisfaction_survey",
            &[".modal-encuesta", "div[id*='encuesta']", "div[class*='survey']"],
            PopupAction::Reject,
            20,
        )
        .with_patterns(&["encuesta", "survey", "califi"]),
        PopupSignature::new(
            "notice_dialog",
            &[".swal2-popup", ".modal.show", ".modal.in", "div[role='dialog']"],
            PopupAction::Close,
            50,
        ),
        PopupSignature::new(
            "loading_overlay",
            &[".blockUI.blockOverlay", ".loading-overlay", ".cdk-overlay-backdrop-showing"],
            PopupAction::Wait,
            90,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serde() {
        let sig: PopupSignature = serde_json::from_str(
            r##"{"name": "promo", "selectors": ["#promo"], "action": {"custom": "closePromo()"}}"##,
        )
        .unwrap();
        assert_eq!(sig.action, PopupAction::Custom("closePromo()".into()));
        assert_eq!(sig.priority, 50);
        assert!(sig.text_patterns.is_empty());

        let sig: PopupSignature =
            toml::from_str("name = \"c\"\nselectors = [\".c\"]\naction = \"accept\"\npriority = 1")
                .unwrap();
        assert_eq!(sig.action, PopupAction::Accept);
    }

    #[test]
    fn test_control_roles() {
        assert_eq!(PopupAction::Accept.control_role(), Some("accept_button"));
        assert_eq!(PopupAction::Ignore.control_role(), None);
    }

    #[test]
    fn test_common_signatures_are_prioritized() {
        let sigs = common_signatures();
        let mut sorted = sigs.clone();
        sorted.sort_by_key(|s| s.priority);
        assert_eq!(sigs, sorted);
    }
}
