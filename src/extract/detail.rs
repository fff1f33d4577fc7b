//! Per-record detail capture.
//!
//! A detail view is opened in its own tab, validated, and mined for fields,
//! attachments and a rendered artifact. The tab is closed on every path.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::selector::SelectorResolver;
use crate::browser::{resolve_href, with_timeout, ClickMode, ElementHandle, PageDriver};
use crate::config::{roles, CompanyProfile, FieldSpec, KeyFields, SelectorMap, ValidatorConfig};
use crate::error::{DriverResult, ExtractionError};
use crate::events::{Component, EventLog, Severity};
use crate::models::{ArtifactOutcome, AttachmentRef, ExtractedRecord, RecordHandle};
use crate::pipeline::content_hash;
use crate::utils::mime::filename_from_url;
use crate::utils::{detect_mime, mime_to_extension, sanitize_filename, sanitize_segment};

/// Result of checking a detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid { positive_hits: Vec<String> },
    Invalid { indicator: String },
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Rejects error pages. Fail-open: pages without a negative indicator in
/// their headline are valid.
#[derive(Debug, Clone)]
pub struct DetailValidator {
    negative: Vec<String>,
    positive: Vec<String>,
    headline_chars: usize,
}

impl DetailValidator {
    pub fn new(config: &ValidatorConfig) -> Self {
        let lower = |v: &[String]| v.iter().map(|s| s.to_lowercase()).collect();
        Self {
            negative: lower(&config.negative_indicators),
            positive: lower(&config.positive_indicators),
            headline_chars: config.headline_chars.max(1),
        }
    }

    pub fn validate(&self, page_text: &str) -> Validation {
        let headline: String = page_text
            .chars()
            .take(self.headline_chars)
            .collect::<String>()
            .to_lowercase();

        if let Some(indicator) = self.negative.iter().find(|n| headline.contains(n.as_str())) {
            return Validation::Invalid {
                indicator: indicator.clone(),
            };
        }

        let lower = page_text.to_lowercase();
        Validation::Valid {
            positive_hits: self
                .positive
                .iter()
                .filter(|p| lower.contains(p.as_str()))
                .cloned()
                .collect(),
        }
    }
}

/// Owns a detail tab and closes it when dropped.
///
/// Prefer [`TabGuard::close`], which waits for the close; the drop path can
/// only schedule it on the current runtime.
pub struct TabGuard {
    tab: Arc<dyn PageDriver>,
    closed: bool,
}

impl TabGuard {
    pub fn new(tab: Box<dyn PageDriver>) -> Self {
        Self {
            tab: Arc::from(tab),
            closed: false,
        }
    }

    pub fn page(&self) -> &dyn PageDriver {
        self.tab.as_ref()
    }

    pub async fn close(mut self) -> DriverResult<()> {
        self.closed = true;
        self.tab.close().await
    }
}

impl Drop for TabGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let tab = self.tab.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = tab.close().await {
                        tracing::debug!("Deferred tab close failed: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!("Detail tab dropped outside a runtime; left open"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DetailTimeouts {
    open: Duration,
    idle: Duration,
    download: Duration,
    render: Duration,
}

/// Opens and captures record detail views for one company.
pub struct RecordDetailExtractor {
    company: String,
    resolver: SelectorResolver,
    selectors: SelectorMap,
    fields: Vec<FieldSpec>,
    keys: KeyFields,
    validator: DetailValidator,
    timeouts: DetailTimeouts,
}

impl RecordDetailExtractor {
    pub fn from_profile(profile: &CompanyProfile, resolver: SelectorResolver) -> Self {
        let t = &profile.timeouts;
        Self {
            company: profile.name.clone(),
            resolver,
            selectors: profile.selectors.clone(),
            fields: profile.fields.clone(),
            keys: profile.keys.clone(),
            validator: DetailValidator::new(&profile.validator),
            timeouts: DetailTimeouts {
                open: Duration::from_millis(t.detail_ms),
                idle: Duration::from_millis(t.network_idle_ms),
                download: Duration::from_millis(t.download_ms),
                render: Duration::from_millis(t.render_ms),
            },
        }
    }

    /// Capture one record. Attachment and artifact problems are recorded on
    /// the result; only an unopenable or invalid detail view is an error.
    pub async fn extract(
        &self,
        listing: &dyn PageDriver,
        handle: &RecordHandle,
        staging: &Path,
        events: &EventLog,
    ) -> Result<ExtractedRecord, ExtractionError> {
        if handle.page_generation != listing.generation() {
            return Err(ExtractionError::TransientUi {
                role: roles::VIEW_CONTROL.to_string(),
                detail: format!("row {} belongs to a previous listing render", handle.row_index),
            });
        }

        let guard = TabGuard::new(self.open_detail(listing, handle).await?);
        let result = self.capture(guard.page(), handle, staging, events).await;
        if let Err(e) = guard.close().await {
            events.debug(Component::Detail, format!("Tab close failed: {}", e));
        }
        result
    }

    async fn open_detail(
        &self,
        listing: &dyn PageDriver,
        handle: &RecordHandle,
    ) -> Result<Box<dyn PageDriver>, ExtractionError> {
        let base = listing
            .url()
            .await
            .map_err(|e| ExtractionError::Navigation(e.to_string()))?;

        match with_timeout(self.timeouts.open, listing.open_in_new_tab(&handle.control)).await {
            Ok(Some(tab)) => return Ok(tab),
            Ok(None) => {}
            Err(e) => tracing::debug!("Context-menu tab open failed: {}", e),
        }
        self.ensure_listing_kept(listing, handle, &base).await?;
        let mut target = None;
        for element in std::iter::once(&handle.control).chain(handle.row.as_ref()) {
            if let Some(href) = link_of(listing, element).await {
                target = resolve_href(&base, &href);
                if target.is_some() {
                    break;
                }
            }
        }
        let target = target.ok_or_else(|| {
            ExtractionError::Navigation(format!("row {} has no detail link", handle.row_index))
        })?;

        with_timeout(self.timeouts.open, listing.open_tab(&target))
            .await
            .map_err(|e| ExtractionError::Navigation(format!("{}: {}", target, e)))
    }

    /// A control whose handler ignores the new-tab gesture runs in the
    /// listing tab. Put the listing back and fail only this record.
    async fn ensure_listing_kept(
        &self,
        listing: &dyn PageDriver,
        handle: &RecordHandle,
        base: &str,
    ) -> Result<(), ExtractionError> {
        let now = listing.url().await.unwrap_or_default();
        if now != base {
            tracing::warn!("Row {} view control navigated the listing to {}", handle.row_index, now);
            with_timeout(self.timeouts.open, listing.goto(base))
                .await
                .map_err(|e| {
                    ExtractionError::Navigation(format!("listing lost to {} and not restored: {}", now, e))
                })?;
            return Err(ExtractionError::Navigation(format!(
                "row {} view control left the listing for {}",
                handle.row_index, now
            )));
        }
        if listing.generation() != handle.page_generation {
            return Err(ExtractionError::TransientUi {
                role: roles::VIEW_CONTROL.to_string(),
                detail: format!("listing re-rendered while opening row {}", handle.row_index),
            });
        }
        Ok(())
    }

    async fn capture(
        &self,
        tab: &dyn PageDriver,
        handle: &RecordHandle,
        staging: &Path,
        events: &EventLog,
    ) -> Result<ExtractedRecord, ExtractionError> {
        if let Err(e) = tab.wait_for_idle(self.timeouts.idle).await {
            tracing::debug!("Detail idle wait: {}", e);
        }
        let ready = self.selectors.get(roles::DETAIL_READY);
        if !ready.is_empty()
            && self
                .resolver
                .wait_for(tab, &ready, self.timeouts.open)
                .await
                .is_none()
        {
            tracing::debug!("No detail_ready marker on row {}", handle.row_index);
        }

        let text = tab
            .body_text()
            .await
            .map_err(|e| ExtractionError::Navigation(e.to_string()))?;
        match self.validator.validate(&text) {
            Validation::Invalid { indicator } => {
                return Err(ExtractionError::Navigation(format!(
                    "detail page looks like an error page ('{}')",
                    indicator
                )));
            }
            Validation::Valid { positive_hits } => {
                tracing::debug!("Detail page valid, positive hits: {:?}", positive_hits);
            }
        }

        // Sub-tabs may hide the main panel, so attachment links are taken
        // from the main view before any tab is opened.
        let mut fields = self.read_fields(tab, false).await;
        let attachment_urls = self.attachment_urls(tab).await;
        fields.extend(self.read_fields(tab, true).await);
        let external_id = match fields.get(&self.keys.external_id).filter(|v| !v.is_empty()) {
            Some(id) => Some(id.clone()),
            None => {
                let fallback = handle
                    .listing_external_id
                    .clone()
                    .filter(|v| !v.trim().is_empty());
                if let Some(id) = &fallback {
                    fields.insert(self.keys.external_id.clone(), id.clone());
                }
                fallback
            }
        };
        let hash = content_hash(&fields, &self.keys);
        let log_id = external_id
            .clone()
            .unwrap_or_else(|| format!("#{}", &hash[..12]));

        let record_dir = staging.join(sanitize_segment(&log_id));
        tokio::fs::create_dir_all(&record_dir)
            .await
            .map_err(|e| ExtractionError::Artifact(format!("staging dir: {}", e)))?;

        let (attachments, attachment_failures) =
            self.download_attachments(tab, attachment_urls, &record_dir, events, &log_id).await;
        let artifact = self.render_artifact(tab, &record_dir).await;
        if let ArtifactOutcome::Failed(reason) = &artifact {
            events.record(
                Component::Detail,
                Severity::Warn,
                format!("No artifact: {}", reason),
                Some(&log_id),
            );
        }

        Ok(ExtractedRecord {
            company: self.company.clone(),
            fields,
            attachments,
            attachment_failures,
            artifact,
            content_hash: hash,
            external_id,
            source_url: tab.url().await.unwrap_or_default(),
            extracted_at: Utc::now(),
            staging_dir: Some(record_dir),
        })
    }

    /// Configured fields on the main view, or those behind a sub-tab when
    /// `in_tabs`; missing ones are empty strings. Returns to the main tab
    /// after visiting sub-tabs.
    async fn read_fields(&self, tab: &dyn PageDriver, in_tabs: bool) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        let mut active_tab: Option<Vec<String>> = None;

        for spec in self.fields.iter().filter(|f| f.tab_candidates().is_some() == in_tabs) {
            if let Some(tab_set) = spec.tab_candidates() {
                if active_tab.as_ref() != Some(&spec.tab) {
                    self.open_subtab(tab, &tab_set).await;
                    active_tab = Some(spec.tab.clone());
                }
            }

            let value = match self.resolver.resolve(tab, &spec.candidates(), None).await {
                Some(element) => self.read_value(tab, &element, spec).await,
                None => {
                    tracing::debug!("Field '{}' not found", spec.name);
                    String::new()
                }
            };
            fields.insert(spec.name.clone(), value);
        }

        if active_tab.is_some() {
            let main = self.selectors.get(roles::DETAIL_MAIN_TAB);
            if !main.is_empty() {
                self.open_subtab(tab, &main).await;
            }
        }
        fields
    }

    async fn open_subtab(&self, tab: &dyn PageDriver, set: &crate::config::SelectorCandidateSet) {
        let Some(control) = self.resolver.resolve(tab, set, None).await else {
            tracing::debug!("Detail sub-tab '{}' not found", set.role);
            return;
        };
        let budget = self.resolver.timeout();
        if with_timeout(budget, tab.click(&control, ClickMode::Normal))
            .await
            .is_err()
        {
            if let Err(e) = with_timeout(budget, tab.click(&control, ClickMode::Force)).await {
                tracing::debug!("Detail sub-tab '{}' click failed: {}", set.role, e);
                return;
            }
        }
        let _ = tab.wait_for_idle(self.timeouts.idle).await;
    }

    async fn read_value(&self, tab: &dyn PageDriver, element: &ElementHandle, spec: &FieldSpec) -> String {
        let budget = self.resolver.timeout();
        let value = match &spec.attribute {
            Some(attr) => with_timeout(budget, tab.attribute(element, attr))
                .await
                .map(Option::unwrap_or_default),
            None => with_timeout(budget, tab.text(element)).await,
        };
        match value {
            Ok(v) => v.trim().to_string(),
            Err(e) => {
                tracing::debug!("Field '{}' unreadable: {}", spec.name, e);
                String::new()
            }
        }
    }

    /// Absolute, deduplicated attachment URLs visible on the current view.
    async fn attachment_urls(&self, tab: &dyn PageDriver) -> Vec<String> {
        let Some((_, links)) = self
            .resolver
            .resolve_all(tab, &self.selectors.get(roles::ATTACHMENT_LINKS), None)
            .await
        else {
            return Vec::new();
        };

        let base = tab.url().await.unwrap_or_default();
        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        for link in links {
            if let Some(url) = link_of(tab, &link)
                .await
                .and_then(|href| resolve_href(&base, &href))
            {
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }
        urls
    }

    async fn download_attachments(
        &self,
        tab: &dyn PageDriver,
        urls: Vec<String>,
        dir: &Path,
        events: &EventLog,
        log_id: &str,
    ) -> (Vec<AttachmentRef>, u32) {
        let mut taken_names = HashSet::new();
        let mut attachments = Vec::new();
        let mut failures = 0;

        for url in urls {
            match self.download_one(tab, &url, dir, &mut taken_names).await {
                Ok(attachment) => attachments.push(attachment),
                Err(e) => {
                    failures += 1;
                    events.record(Component::Detail, Severity::Warn, e.to_string(), Some(log_id));
                }
            }
        }
        (attachments, failures)
    }

    async fn download_one(
        &self,
        tab: &dyn PageDriver,
        url: &str,
        dir: &Path,
        taken: &mut HashSet<String>,
    ) -> Result<AttachmentRef, ExtractionError> {
        let failed = |reason: String| ExtractionError::AttachmentDownload {
            url: url.to_string(),
            reason,
        };

        let download = with_timeout(self.timeouts.download, tab.download(url))
            .await
            .map_err(|e| failed(e.to_string()))?;
        let mime = detect_mime(&download.data, download.content_type.as_deref());

        let raw_name = download
            .filename
            .clone()
            .or_else(|| filename_from_url(&download.url))
            .unwrap_or_else(|| format!("adjunto-{}.{}", taken.len() + 1, mime_to_extension(&mime)));
        let filename = unique_name(&sanitize_filename(&raw_name), taken);

        let path = dir.join(&filename);
        tokio::fs::write(&path, &download.data)
            .await
            .map_err(|e| failed(format!("write {}: {}", path.display(), e)))?;

        Ok(AttachmentRef {
            url: download.url,
            filename,
            local_path: Some(path),
            size: download.data.len() as u64,
            mime_type: Some(mime),
            stored_key: None,
        })
    }

    /// PDF first, then a full-page screenshot.
    async fn render_artifact(&self, tab: &dyn PageDriver, dir: &Path) -> ArtifactOutcome {
        let pdf_err = match with_timeout(self.timeouts.render, tab.pdf()).await {
            Ok(bytes) => match write_artifact(dir, "detalle.pdf", &bytes).await {
                Ok(path) => return ArtifactOutcome::Pdf(path),
                Err(e) => e,
            },
            Err(e) => e.to_string(),
        };
        tracing::debug!("PDF export failed ({}), trying screenshot", pdf_err);

        let shot_err = match with_timeout(self.timeouts.render, tab.screenshot(true)).await {
            Ok(bytes) => match write_artifact(dir, "detalle.png", &bytes).await {
                Ok(path) => return ArtifactOutcome::Screenshot(path),
                Err(e) => e,
            },
            Err(e) => e.to_string(),
        };
        ArtifactOutcome::Failed(format!("pdf: {}; screenshot: {}", pdf_err, shot_err))
    }
}

async fn write_artifact(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, String> {
    if bytes.is_empty() {
        return Err("empty render".to_string());
    }
    let path = dir.join(name);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| format!("write {}: {}", path.display(), e))?;
    Ok(path)
}

/// `href` or `data-href`, ignoring script and fragment links.
async fn link_of(page: &dyn PageDriver, element: &ElementHandle) -> Option<String> {
    for attr in ["href", "data-href"] {
        if let Ok(Some(href)) = page.attribute(element, attr).await {
            let href = href.trim();
            if !href.is_empty() && !href.starts_with('#') && !href.starts_with("javascript:") {
                return Some(href.to_string());
            }
        }
    }
    None
}

fn unique_name(name: &str, taken: &mut HashSet<String>) -> String {
    let mut candidate = name.to_string();
    let mut n = 1;
    while !taken.insert(candidate.clone()) {
        n += 1;
        candidate = match name.rsplit_once('.') {
            Some((stem, ext)) => format!("{}-{}.{}", stem, n, ext),
            None => format!("{}-{}", name, n),
        };
    }
    candidate
}
