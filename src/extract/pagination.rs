//! Paginated listing traversal.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use sha2::{Digest, Sha256};

use super::selector::SelectorResolver;
use crate::browser::{with_timeout, ClickMode, PageDriver};
use crate::config::{roles, CompanyProfile, SelectorMap};
use crate::events::{Component, EventLog};
use crate::models::PaginationState;

/// Counter number: digit groups joined by `.`, `,`, or (nb)space, or a plain run.
const NUM: &str = r"(\d{1,3}(?:[.,\s\u{00A0}]\d{3})+|\d+)";

static COUNTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(?i){NUM}\s*(?:-|–|—|al|a|to)\s*{NUM}\s*(?:of|de)\s*(?:un\s+total\s+de\s*)?{NUM}"
    );
    Regex::new(&pattern).unwrap()
});

fn parse_number(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Parse a range counter such as `1–25 of 1,204`,
/// `Mostrando registros del 1 al 25 de un total de 1.204` or `1 - 25 de 1204`.
pub fn parse_counter(text: &str) -> Option<(u64, u64, u64)> {
    let caps = COUNTER_RE.captures(text)?;
    let start = parse_number(caps.get(1)?.as_str())?;
    let end = parse_number(caps.get(2)?.as_str())?;
    let total = parse_number(caps.get(3)?.as_str())?;
    Some((start, end, total))
}

/// Why the cycle guard refused a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleVerdict {
    New,
    /// Same range or listing content seen before.
    Repeat,
    /// Range went backwards.
    Regressed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CycleKey {
    Range(u64, u64),
    Rows(String),
}

/// Remembers visited pages so a looping "next" control cannot trap the walk.
#[derive(Debug, Default)]
pub struct CycleGuard {
    visited: HashSet<CycleKey>,
    last_range: Option<(u64, u64)>,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current page. Uses the counter range when known, else the
    /// row fingerprint. Pages with neither are always `New`.
    pub fn visit(&mut self, state: &PaginationState, fingerprint: Option<&str>) -> CycleVerdict {
        let key = match (state.range(), fingerprint) {
            (Some((s, e)), _) => {
                if let Some(last) = self.last_range {
                    if (s, e) < last {
                        return CycleVerdict::Regressed;
                    }
                }
                self.last_range = Some((s, e));
                CycleKey::Range(s, e)
            }
            (None, Some(fp)) => CycleKey::Rows(fp.to_string()),
            (None, None) => return CycleVerdict::New,
        };
        if self.visited.insert(key) {
            CycleVerdict::New
        } else {
            CycleVerdict::Repeat
        }
    }

    pub fn len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }
}

/// Counter reading, next detection and page advance for one listing.
pub struct PaginationWalker {
    resolver: SelectorResolver,
    selectors: SelectorMap,
    advance_timeout: Duration,
    idle_timeout: Duration,
}

impl PaginationWalker {
    pub fn new(
        resolver: SelectorResolver,
        selectors: SelectorMap,
        advance_timeout: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            selectors,
            advance_timeout,
            idle_timeout,
        }
    }

    pub fn from_profile(profile: &CompanyProfile, resolver: SelectorResolver) -> Self {
        Self::new(
            resolver,
            profile.selectors.clone(),
            Duration::from_millis(profile.timeouts.advance_ms),
            Duration::from_millis(profile.timeouts.network_idle_ms),
        )
    }

    /// Read the counter. Anything unparseable or inconsistent is unknown.
    pub async fn extract_pagination_info(
        &self,
        page: &dyn PageDriver,
        current_page: u32,
    ) -> PaginationState {
        let Some(text) = self
            .resolver
            .resolve_text(page, &self.selectors.get(roles::PAGINATION_COUNTER), None)
            .await
        else {
            return PaginationState::unknown(current_page);
        };

        match parse_counter(&text) {
            Some((start, end, total)) => {
                let state = PaginationState {
                    range_start: Some(start),
                    range_end: Some(end),
                    total_count: Some(total),
                    current_page,
                };
                if state.is_consistent() {
                    state
                } else {
                    tracing::debug!("Inconsistent counter '{}'", text);
                    PaginationState::unknown(current_page)
                }
            }
            None => {
                tracing::debug!("Unparseable counter '{}'", text);
                PaginationState::unknown(current_page)
            }
        }
    }

    /// Next control present, visible and enabled.
    pub async fn has_next(&self, page: &dyn PageDriver) -> bool {
        let Some(next) = self
            .resolver
            .resolve(page, &self.selectors.get(roles::NEXT_PAGE), None)
            .await
        else {
            return false;
        };
        let enabled = with_timeout(self.resolver.timeout(), page.is_enabled(&next))
            .await
            .unwrap_or(false);
        let aria_disabled = page
            .attribute(&next, "aria-disabled")
            .await
            .ok()
            .flatten()
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        enabled && !aria_disabled
    }

    /// Hash of the visible listing rows, `None` when no rows resolve.
    pub async fn fingerprint(&self, page: &dyn PageDriver) -> Option<String> {
        let (_, rows) = self
            .resolver
            .resolve_all(page, &self.selectors.get(roles::LISTING_ROW), None)
            .await?;
        let mut hasher = Sha256::new();
        for row in &rows {
            let text = page.text(row).await.unwrap_or_default();
            hasher.update(text.as_bytes());
            hasher.update(b"\n");
        }
        Some(hex::encode(hasher.finalize()))
    }

    async fn counter_text(&self, page: &dyn PageDriver) -> Option<String> {
        self.resolver
            .resolve_text(page, &self.selectors.get(roles::PAGINATION_COUNTER), None)
            .await
    }

    /// Click next and wait for the listing to re-render.
    ///
    /// Success needs evidence: the row fingerprint or counter changed, or a
    /// reload marker showed up, before the advance timeout.
    pub async fn advance(&self, page: &dyn PageDriver, events: &EventLog) -> bool {
        let rows_before = self.fingerprint(page).await;
        let counter_before = self.counter_text(page).await;

        let Some(next) = self
            .resolver
            .resolve(page, &self.selectors.get(roles::NEXT_PAGE), None)
            .await
        else {
            events.warn(Component::Pagination, "Next control vanished before advance");
            return false;
        };

        let clicked = match with_timeout(self.advance_timeout, page.click(&next, ClickMode::Normal)).await {
            Ok(()) => true,
            Err(e) => {
                events.debug(
                    Component::Pagination,
                    format!("Normal next click failed ({}), forcing", e),
                );
                with_timeout(self.advance_timeout, page.click(&next, ClickMode::Force))
                    .await
                    .is_ok()
            }
        };
        if !clicked {
            events.warn(Component::Pagination, "Next control could not be clicked");
            return false;
        }

        if let Err(e) = page.wait_for_idle(self.idle_timeout).await {
            events.debug(Component::Pagination, format!("Network idle wait: {}", e));
        }

        let marker = self.selectors.get(roles::RELOAD_MARKER);
        let started = tokio::time::Instant::now();
        loop {
            if !marker.is_empty() && self.resolver.resolve(page, &marker, None).await.is_some() {
                events.debug(Component::Pagination, "Reload marker seen");
                let _ = page.wait_for_idle(self.idle_timeout).await;
                return true;
            }
            let rows_now = self.fingerprint(page).await;
            if rows_now.is_some() && rows_now != rows_before {
                return true;
            }
            let counter_now = self.counter_text(page).await;
            if counter_now.is_some() && counter_now != counter_before {
                return true;
            }
            if started.elapsed() >= self.advance_timeout {
                events.warn(
                    Component::Pagination,
                    format!(
                        "Listing did not change within {}ms of clicking next",
                        self.advance_timeout.as_millis()
                    ),
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}
