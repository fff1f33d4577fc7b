//! Error types for the extraction pipeline.
//!
//! Driver primitives fail with [`DriverError`]. The pipeline classifies
//! failures into [`ExtractionError`]; only [`ExtractionError::FatalSetup`]
//! is allowed to end a run.

use thiserror::Error;

/// Failure of a single browser-driver primitive.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("Timed out after {0}ms")]
    Timeout(u64),
    #[error("Element not found: {0}")]
    NotFound(String),
    #[error("Element handle is stale (page changed since it was taken)")]
    StaleElement,
    #[error("Element not actionable: {0}")]
    NotActionable(String),
    #[error("Invalid locator: {0}")]
    InvalidLocator(String),
    #[error("Script error: {0}")]
    Script(String),
    #[error("Navigation failed: {0}")]
    Navigation(String),
    #[error("Download failed: {0}")]
    Download(String),
    #[error("Render failed: {0}")]
    Render(String),
    #[error("Unsupported by this driver: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Other(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Classified pipeline failure.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Selector not resolved within its timeout.
    #[error("UI element '{role}' not resolved: {detail}")]
    TransientUi { role: String, detail: String },
    /// Detail page resolved to an error page or could not be opened.
    #[error("Navigation error: {0}")]
    Navigation(String),
    #[error("Attachment download failed for {url}: {reason}")]
    AttachmentDownload { url: String, reason: String },
    #[error("Artifact generation failed: {0}")]
    Artifact(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    /// Cannot authenticate or reach the listing at all.
    #[error("Fatal setup error: {0}")]
    FatalSetup(String),
}

impl ExtractionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalSetup(_))
    }

    /// Short category label used in summaries and the event log.
    pub fn category(&self) -> &'static str {
        match self {
            Self::TransientUi { .. } => "transient_ui",
            Self::Navigation(_) => "navigation",
            Self::AttachmentDownload { .. } => "attachment_download",
            Self::Artifact(_) => "artifact",
            Self::Persistence(_) => "persistence",
            Self::FatalSetup(_) => "fatal_setup",
        }
    }
}

impl From<diesel::result::Error> for ExtractionError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_setup_errors_are_fatal() {
        assert!(ExtractionError::FatalSetup("login".into()).is_fatal());
        assert!(!ExtractionError::Navigation("404".into()).is_fatal());
        assert!(!ExtractionError::Persistence("locked".into()).is_fatal());
    }

    #[test]
    fn test_category_labels() {
        let err = ExtractionError::AttachmentDownload {
            url: "https://portal/a.pdf".into(),
            reason: "HTTP 500".into(),
        };
        assert_eq!(err.category(), "attachment_download");
        assert!(err.to_string().contains("https://portal/a.pdf"));
    }
}
