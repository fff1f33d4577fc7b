//! Browser-driver capability used by the extraction pipeline.
//!
//! The pipeline never talks to a browser directly. Everything goes through
//! [`PageDriver`], which offers the navigate/query/click/fill/wait/evaluate/
//! download/screenshot/pdf primitives the extractors need. Two drivers ship:
//!
//! - [`ChromiumPage`] drives a real Chromium over CDP (`browser` feature).
//! - [`StaticPage`] replays captured HTML snapshots with scripted click
//!   behaviour; used for offline dry runs and the test suite.

pub mod locator;
pub mod static_page;

#[cfg(feature = "browser")]
mod chromium;
#[cfg(feature = "browser")]
mod session;
#[cfg(feature = "browser")]
mod stealth;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

pub use crate::config::browser::BrowserEngineConfig;
pub use crate::error::{DriverError, DriverResult};
pub use locator::Locator;
pub use static_page::{StaticPage, StaticSite, StaticSiteBuilder};

#[cfg(feature = "browser")]
pub use chromium::ChromiumPage;
#[cfg(feature = "browser")]
pub use session::BrowserSession;

/// Opaque reference to an element, valid only for the DOM generation it
/// was taken from. Drivers reject handles from older generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    pub generation: u64,
    pub id: u64,
}

/// How a click is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickMode {
    /// Regular user-like click with actionability checks.
    Normal,
    /// Click that bypasses visibility/actionability checks.
    Force,
    /// Dispatch a synthetic `click` event on the node.
    Synthetic,
}

/// A downloaded file.
#[derive(Debug, Clone)]
pub struct Download {
    pub url: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Browser-automation capability for one tab.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Current DOM generation. Bumped whenever the page navigates.
    fn generation(&self) -> u64;

    async fn url(&self) -> DriverResult<String>;

    async fn goto(&self, url: &str) -> DriverResult<()>;

    /// All elements matching `locator`, optionally inside `scope`.
    async fn query_all(
        &self,
        locator: &str,
        scope: Option<&ElementHandle>,
    ) -> DriverResult<Vec<ElementHandle>>;

    async fn is_visible(&self, element: &ElementHandle) -> DriverResult<bool>;

    async fn is_enabled(&self, element: &ElementHandle) -> DriverResult<bool>;

    /// Visible text of the element, whitespace collapsed.
    async fn text(&self, element: &ElementHandle) -> DriverResult<String>;

    async fn attribute(&self, element: &ElementHandle, name: &str)
        -> DriverResult<Option<String>>;

    /// Lowercase tag name.
    async fn tag_name(&self, element: &ElementHandle) -> DriverResult<String>;

    async fn click(&self, element: &ElementHandle, mode: ClickMode) -> DriverResult<()>;

    async fn fill(&self, element: &ElementHandle, value: &str) -> DriverResult<()>;

    /// Select an option in a `<select>` by value or visible label.
    async fn select_option(&self, element: &ElementHandle, value: &str) -> DriverResult<()>;

    /// Detach the element from the DOM.
    async fn remove(&self, element: &ElementHandle) -> DriverResult<()>;

    async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value>;

    /// Wait until the page has stopped loading resources.
    async fn wait_for_idle(&self, timeout: Duration) -> DriverResult<()>;

    /// Visible text of the whole document.
    async fn body_text(&self) -> DriverResult<String>;

    async fn pdf(&self) -> DriverResult<Vec<u8>>;

    async fn screenshot(&self, full_page: bool) -> DriverResult<Vec<u8>>;

    /// Download a URL within the page's session (cookies included).
    async fn download(&self, url: &str) -> DriverResult<Download>;

    /// Open the element's target in a new tab the way a user would
    /// (context menu / modifier click). `None` when no tab appeared.
    async fn open_in_new_tab(
        &self,
        element: &ElementHandle,
    ) -> DriverResult<Option<Box<dyn PageDriver>>>;

    /// Open `url` in a new tab of the same session.
    async fn open_tab(&self, url: &str) -> DriverResult<Box<dyn PageDriver>>;

    async fn close(&self) -> DriverResult<()>;
}

/// Run a driver future under a deadline, mapping expiry to
/// [`DriverError::Timeout`].
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> DriverResult<T>
where
    F: Future<Output = DriverResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Resolve `href` against the page URL.
pub fn resolve_href(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    match url::Url::parse(base) {
        Ok(base) => base.join(href).ok().map(|u| u.to_string()),
        Err(_) => url::Url::parse(href).ok().map(|u| u.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed() {
        let result: DriverResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(DriverError::Timeout(10))));
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(
            resolve_href("https://portal.test/pqr/listado", "detalle?id=7").as_deref(),
            Some("https://portal.test/pqr/detalle?id=7")
        );
        assert_eq!(
            resolve_href("https://portal.test/a", "/b").as_deref(),
            Some("https://portal.test/b")
        );
        assert_eq!(resolve_href("https://portal.test/a", "#"), None);
        assert_eq!(resolve_href("https://portal.test/a", "javascript:void(0)"), None);
    }
}
