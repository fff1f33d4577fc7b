//! Locator strings.
//!
//! Configured selector candidates are plain strings. Besides CSS, a
//! candidate may filter by visible text:
//!
//! - `div.modal`: CSS
//! - `css=div.modal`: CSS, explicit
//! - `text=Aceptar`: innermost element whose text contains "Aceptar"
//! - `button >> text=Aceptar`: CSS matches whose text contains "Aceptar"

use crate::error::{DriverError, DriverResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    /// CSS part. `None` means "any element" and implies innermost matching.
    pub css: Option<String>,
    /// Case-insensitive text the element must contain.
    pub text: Option<String>,
}

impl Locator {
    pub fn parse(raw: &str) -> DriverResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DriverError::InvalidLocator("empty locator".to_string()));
        }

        let mut css = None;
        let mut text = None;
        for part in raw.split(">>").map(str::trim) {
            if let Some(t) = part.strip_prefix("text=") {
                let t = t.trim().trim_matches('"').trim_matches('\'');
                if t.is_empty() {
                    return Err(DriverError::InvalidLocator(raw.to_string()));
                }
                text = Some(t.to_string());
            } else {
                let c = part.strip_prefix("css=").unwrap_or(part).trim();
                if c.is_empty() || css.is_some() {
                    return Err(DriverError::InvalidLocator(raw.to_string()));
                }
                css = Some(c.to_string());
            }
        }

        Ok(Self { css, text })
    }

    /// CSS selector to run, defaulting to all elements.
    pub fn css_or_any(&self) -> &str {
        self.css.as_deref().unwrap_or("*")
    }

    /// Text-only locators keep only the innermost matches.
    pub fn innermost(&self) -> bool {
        self.css.is_none()
    }

    /// Whether `candidate` satisfies the text filter.
    pub fn matches_text(&self, candidate: &str) -> bool {
        match &self.text {
            Some(needle) => normalize_text(candidate)
                .to_lowercase()
                .contains(&normalize_text(needle).to_lowercase()),
            None => true,
        }
    }
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
