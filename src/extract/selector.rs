//! Ordered-candidate element resolution.

use std::time::Duration;

use tracing::debug;

use crate::browser::{with_timeout, ElementHandle, PageDriver};
use crate::config::SelectorCandidateSet;
use crate::error::DriverResult;

/// Default per-candidate budget.
pub const DEFAULT_CANDIDATE_TIMEOUT: Duration = Duration::from_millis(1_500);

/// Resolves candidate sets against a page: candidates are tried in order
/// and the first one yielding a visible element wins.
///
/// Resolution never mutates the page. A candidate that errors or times out
/// is skipped; total absence is `None`, not an error.
#[derive(Debug, Clone, Copy)]
pub struct SelectorResolver {
    timeout: Duration,
}

impl Default for SelectorResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CANDIDATE_TIMEOUT)
    }
}

impl SelectorResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// First visible element across the candidates.
    pub async fn resolve(
        &self,
        page: &dyn PageDriver,
        set: &SelectorCandidateSet,
        scope: Option<&ElementHandle>,
    ) -> Option<ElementHandle> {
        for candidate in &set.candidates {
            match with_timeout(self.timeout, first_visible(page, candidate, scope)).await {
                Ok(Some(handle)) => {
                    debug!("{}: resolved via '{}'", set.role, candidate);
                    return Some(handle);
                }
                Ok(None) => {}
                Err(e) => debug!("{}: candidate '{}' failed: {}", set.role, candidate, e),
            }
        }
        None
    }

    /// All visible matches of the first candidate that has any.
    pub async fn resolve_all(
        &self,
        page: &dyn PageDriver,
        set: &SelectorCandidateSet,
        scope: Option<&ElementHandle>,
    ) -> Option<(String, Vec<ElementHandle>)> {
        for candidate in &set.candidates {
            match with_timeout(self.timeout, all_visible(page, candidate, scope)).await {
                Ok(handles) if !handles.is_empty() => {
                    debug!(
                        "{}: {} match(es) via '{}'",
                        set.role,
                        handles.len(),
                        candidate
                    );
                    return Some((candidate.clone(), handles));
                }
                Ok(_) => {}
                Err(e) => debug!("{}: candidate '{}' failed: {}", set.role, candidate, e),
            }
        }
        None
    }

    /// Text of the first resolved element, trimmed.
    pub async fn resolve_text(
        &self,
        page: &dyn PageDriver,
        set: &SelectorCandidateSet,
        scope: Option<&ElementHandle>,
    ) -> Option<String> {
        let handle = self.resolve(page, set, scope).await?;
        match with_timeout(self.timeout, page.text(&handle)).await {
            Ok(text) => Some(text.trim().to_string()),
            Err(e) => {
                debug!("{}: text read failed: {}", set.role, e);
                None
            }
        }
    }

    /// Poll [`resolve`](Self::resolve) until something appears or `deadline` passes.
    pub async fn wait_for(
        &self,
        page: &dyn PageDriver,
        set: &SelectorCandidateSet,
        deadline: Duration,
    ) -> Option<ElementHandle> {
        let started = tokio::time::Instant::now();
        loop {
            if let Some(handle) = self.resolve(page, set, None).await {
                return Some(handle);
            }
            if started.elapsed() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(250).min(deadline)).await;
        }
    }
}

async fn first_visible(
    page: &dyn PageDriver,
    locator: &str,
    scope: Option<&ElementHandle>,
) -> DriverResult<Option<ElementHandle>> {
    for handle in page.query_all(locator, scope).await? {
        if page.is_visible(&handle).await? {
            return Ok(Some(handle));
        }
    }
    Ok(None)
}

async fn all_visible(
    page: &dyn PageDriver,
    locator: &str,
    scope: Option<&ElementHandle>,
) -> DriverResult<Vec<ElementHandle>> {
    let mut visible = Vec::new();
    for handle in page.query_all(locator, scope).await? {
        if page.is_visible(&handle).await? {
            visible.push(handle);
        }
    }
    Ok(visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::StaticSite;

    const HTML: &str = r#"<html><body>
        <a id="hidden-next" style="display:none" href="/p2">Siguiente</a>
        <a class="pager-next" href="/p2">Siguiente</a>
        <table><tr class="fila"><td><a class="ver" href="/d/1">Ver</a></td></tr>
               <tr class="fila"><td><a class="ver" href="/d/2">Ver</a></td></tr></table>
    </body></html>"#;

    async fn page() -> crate::browser::StaticPage {
        let site = StaticSite::builder("https://portal.test/")
            .unwrap()
            .page("/", HTML)
            .build();
        site.open("/").await.unwrap()
    }

    #[tokio::test]
    async fn test_skips_invisible_and_invalid_candidates() {
        let page = page().await;
        let set = SelectorCandidateSet::new(
            "next_page",
            &["#hidden-next", "[[bad", "a.pager-next"],
        );
        let resolver = SelectorResolver::default();
        let handle = resolver.resolve(&page, &set, None).await.unwrap();
        assert_eq!(
            page.attribute(&handle, "class").await.unwrap().as_deref(),
            Some("pager-next")
        );
    }

    #[tokio::test]
    async fn test_absence_is_none() {
        let page = page().await;
        let set = SelectorCandidateSet::new("next_page", &["#nope", "text=Anterior"]);
        assert!(SelectorResolver::default().resolve(&page, &set, None).await.is_none());
        let empty = SelectorCandidateSet::new::<&str>("x", &[]);
        assert!(SelectorResolver::default().resolve(&page, &empty, None).await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_all_first_match_wins() {
        let page = page().await;
        let set = SelectorCandidateSet::new("view_control", &["button.ver", "a.ver", "a"]);
        let (selector, handles) = SelectorResolver::default()
            .resolve_all(&page, &set, None)
            .await
            .unwrap();
        assert_eq!(selector, "a.ver");
        assert_eq!(handles.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_text() {
        let page = page().await;
        let set = SelectorCandidateSet::new("next_page", &["a.pager-next"]);
        assert_eq!(
            SelectorResolver::default().resolve_text(&page, &set, None).await.as_deref(),
            Some("Siguiente")
        );
    }
}
