//! One extraction run for one company.
//!
//! ```text
//! login ─► listing ─► popups ─► filters ─► popups ─┐
//!                                                 ▼
//!        ┌──── advance ◄── has_next ◄── rows ◄── cycle guard
//!        └────────────────────────────────────────►┘
//! ```
//!
//! Only setup failures (login, unreachable listing) end a run with an
//! error. Everything that goes wrong for a single record is counted and the
//! walk moves on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};

use super::context::RunContext;
use super::dedup::{DeduplicationGate, Verdict};
use super::sink::{PersistenceSink, RecordStore, UpsertOutcome};
use crate::browser::{with_timeout, ElementHandle, PageDriver};
use crate::config::{roles, CompanyProfile};
use crate::error::ExtractionError;
use crate::events::{Component, Severity};
use crate::extract::{
    CycleGuard, CycleVerdict, DetailValidator, FilterConfigurator, FilterRequest, LoginHandOff,
    PaginationWalker, PopupDismisser, PopupScanReport, RecordDetailExtractor, SelectorResolver,
    Validation,
};
use crate::models::{ExtractedRecord, PaginationState, RecordHandle, RunSummary, StopReason};
use crate::storage::ObjectStore;

/// Per-invocation knobs that are not part of the company profile.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the profile's `max_records`.
    pub max_records: Option<usize>,
    /// Re-extract records already in the store and update them.
    pub refresh_existing: bool,
    /// End of the date filter window; defaults to today.
    pub today: Option<NaiveDate>,
    /// Parent of the run's staging directory.
    pub staging_root: Option<PathBuf>,
}

enum PageOutcome {
    Continue,
    BudgetExhausted,
}

pub struct ExtractionOrchestrator {
    profile: CompanyProfile,
    resolver: SelectorResolver,
    popups: PopupDismisser,
    filters: FilterConfigurator,
    walker: PaginationWalker,
    detail: RecordDetailExtractor,
    login: Option<LoginHandOff>,
    sink: PersistenceSink,
}

impl ExtractionOrchestrator {
    pub fn new(
        profile: CompanyProfile,
        store: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let resolver = SelectorResolver::new(Duration::from_millis(profile.timeouts.selector_ms));
        Self {
            resolver,
            popups: PopupDismisser::from_profile(&profile, resolver),
            filters: FilterConfigurator::from_profile(&profile, resolver),
            walker: PaginationWalker::from_profile(&profile, resolver),
            detail: RecordDetailExtractor::from_profile(&profile, resolver),
            login: LoginHandOff::from_profile(&profile, resolver),
            sink: PersistenceSink::from_profile(&profile, store, objects),
            profile,
        }
    }

    pub fn profile(&self) -> &CompanyProfile {
        &self.profile
    }

    /// Run to completion on `page`.
    pub async fn run(
        &self,
        page: &dyn PageDriver,
        options: &RunOptions,
    ) -> Result<RunSummary, ExtractionError> {
        let mut ctx = RunContext::new(&self.profile.name, options.staging_root.as_deref())
            .map_err(|e| ExtractionError::FatalSetup(format!("staging directory: {}", e)))?;
        ctx.events.info(
            Component::Orchestrator,
            format!("Run {} started for {}", ctx.run_id, self.profile.name),
        );

        if let Err(e) = self.setup(page, &mut ctx, options).await {
            ctx.record_error(&e, None);
            return Err(e);
        }

        let mut gate = DeduplicationGate::new(&self.profile.name);
        if options.refresh_existing {
            gate = gate.without_store_checks();
        }
        let budget = options.max_records.or(self.profile.max_records);

        let stopped_because = self.walk(page, &mut ctx, &mut gate, budget).await;
        let summary = ctx.summary(stopped_because);
        ctx.events.info(
            Component::Orchestrator,
            format!(
                "Run finished ({}): {} inserted, {} updated, {} duplicate, {} failed",
                stopped_because,
                summary.stats.records_inserted,
                summary.stats.records_updated,
                summary.stats.records_skipped_duplicate,
                summary.stats.records_failed
            ),
        );
        Ok(summary)
    }

    /// Login, listing, popups and filters. Errors here are fatal.
    async fn setup(
        &self,
        page: &dyn PageDriver,
        ctx: &mut RunContext,
        options: &RunOptions,
    ) -> Result<(), ExtractionError> {
        let profile = &self.profile;
        let navigation = Duration::from_millis(profile.timeouts.navigation_ms);

        if let Some(login) = &self.login {
            let report = login.perform(page, &self.popups, &ctx.events).await?;
            absorb_popups(ctx, &report);
        }

        with_timeout(navigation, page.goto(&profile.listing_url))
            .await
            .map_err(|e| {
                ExtractionError::FatalSetup(format!(
                    "listing {} unreachable: {}",
                    profile.listing_url, e
                ))
            })?;
        let _ = page
            .wait_for_idle(Duration::from_millis(profile.timeouts.network_idle_ms))
            .await;
        self.check_listing(page, navigation).await?;

        self.scan_popups(page, ctx).await;

        let request = FilterRequest::last_days(
            options.today.unwrap_or_else(|| Local::now().date_naive()),
            profile.days_back,
            profile.status_filter.clone(),
        );
        if profile.days_back > 0 || request.status.is_some() {
            ctx.stats.filters_applied = self.filters.apply(page, &request, &ctx.events).await;
        }

        self.scan_popups(page, ctx).await;
        Ok(())
    }

    /// A listing without its ready marker that reads like an error page is
    /// treated as unreachable.
    async fn check_listing(
        &self,
        page: &dyn PageDriver,
        wait: Duration,
    ) -> Result<(), ExtractionError> {
        let ready = self.profile.selector(roles::LISTING_READY);
        if ready.is_empty() || self.resolver.wait_for(page, &ready, wait).await.is_some() {
            return Ok(());
        }
        let text = page.body_text().await.unwrap_or_default();
        match DetailValidator::new(&self.profile.validator).validate(&text) {
            Validation::Invalid { indicator } => Err(ExtractionError::FatalSetup(format!(
                "listing {} shows an error page ('{}')",
                self.profile.listing_url, indicator
            ))),
            Validation::Valid { .. } => {
                tracing::warn!("Listing ready marker not found; continuing");
                Ok(())
            }
        }
    }

    async fn scan_popups(&self, page: &dyn PageDriver, ctx: &mut RunContext) {
        let report = self.popups.scan(page, &ctx.events).await;
        absorb_popups(ctx, &report);
    }

    async fn walk(
        &self,
        page: &dyn PageDriver,
        ctx: &mut RunContext,
        gate: &mut DeduplicationGate,
        budget: Option<usize>,
    ) -> StopReason {
        let mut guard = CycleGuard::new();
        let mut page_number: u32 = 1;

        loop {
            let state = self.walker.extract_pagination_info(page, page_number).await;
            let fingerprint = self.walker.fingerprint(page).await;
            match guard.visit(&state, fingerprint.as_deref()) {
                CycleVerdict::New => {}
                verdict => {
                    ctx.events.warn(
                        Component::Pagination,
                        format!("Page {} already visited ({:?}); stopping", page_number, verdict),
                    );
                    return StopReason::CycleDetected;
                }
            }

            ctx.stats.pages_walked += 1;
            ctx.events.info(Component::Pagination, describe_page(&state));

            if let PageOutcome::BudgetExhausted = self.process_page(page, ctx, gate, budget).await {
                return StopReason::RecordLimitReached;
            }
            if !self.profile.enable_pagination {
                return StopReason::PaginationDisabled;
            }
            if state.is_last_page() || !self.walker.has_next(page).await {
                return StopReason::NoNextPage;
            }
            if page_number >= self.profile.max_pages {
                return StopReason::MaxPagesReached;
            }
            if !self.walker.advance(page, &ctx.events).await {
                return StopReason::AdvanceFailed;
            }
            page_number += 1;
            self.scan_popups(page, ctx).await;
        }
    }

    async fn process_page(
        &self,
        page: &dyn PageDriver,
        ctx: &mut RunContext,
        gate: &mut DeduplicationGate,
        budget: Option<usize>,
    ) -> PageOutcome {
        let exhausted = |ctx: &RunContext| budget.is_some_and(|max| ctx.stats.records_seen >= max as u64);

        let Some((mut controls, mut rows)) = self.page_rows(page).await else {
            ctx.events.warn(Component::Orchestrator, "No view controls on this page");
            return PageOutcome::Continue;
        };
        let mut generation = page.generation();
        let id_set = self.profile.selector(roles::ROW_EXTERNAL_ID);
        let mut row_index = 0;

        while row_index < controls.len() {
            if exhausted(ctx) {
                return PageOutcome::BudgetExhausted;
            }

            let row = (rows.len() == controls.len()).then(|| rows[row_index]);
            let listing_external_id = match (&row, id_set.is_empty()) {
                (Some(row), false) => self
                    .resolver
                    .resolve_text(page, &id_set, Some(row))
                    .await
                    .filter(|id| !id.is_empty()),
                _ => None,
            };
            let handle = RecordHandle {
                page_generation: generation,
                row_index,
                control: controls[row_index],
                row,
                listing_external_id,
            };

            ctx.stats.records_seen += 1;
            self.process_record(page, &handle, ctx, gate).await;
            self.scan_popups(page, ctx).await;
            row_index += 1;

            // The listing was reloaded; rows are read again and the walk
            // resumes at the same position.
            if page.generation() != generation {
                ctx.events.warn(
                    Component::Orchestrator,
                    format!("Listing reloaded after row {}; re-reading rows", handle.row_index),
                );
                match self.page_rows(page).await {
                    Some((c, r)) => (controls, rows) = (c, r),
                    None => break,
                }
                generation = page.generation();
            }
        }

        if exhausted(ctx) {
            PageOutcome::BudgetExhausted
        } else {
            PageOutcome::Continue
        }
    }

    /// View controls and listing rows on the current render.
    async fn page_rows(&self, page: &dyn PageDriver) -> Option<(Vec<ElementHandle>, Vec<ElementHandle>)> {
        let (_, controls) = self
            .resolver
            .resolve_all(page, &self.profile.selector(roles::VIEW_CONTROL), None)
            .await?;
        let rows = self
            .resolver
            .resolve_all(page, &self.profile.selector(roles::LISTING_ROW), None)
            .await
            .map(|(_, rows)| rows)
            .unwrap_or_default();
        Some((controls, rows))
    }

    /// Extract, dedupe and persist one row. Never fails the run.
    async fn process_record(
        &self,
        page: &dyn PageDriver,
        handle: &RecordHandle,
        ctx: &mut RunContext,
        gate: &mut DeduplicationGate,
    ) {
        let listing_id = handle.listing_external_id.as_deref();

        if let Some(id) = listing_id {
            if let Verdict::Duplicate(reason) = gate.precheck(id, self.sink.store(), &ctx.events).await {
                ctx.stats.records_skipped_duplicate += 1;
                ctx.events.record(
                    Component::Dedup,
                    Severity::Info,
                    format!("Skipped from listing: {}", reason.as_str()),
                    Some(id),
                );
                return;
            }
        }

        let record_timeout = Duration::from_millis(self.profile.timeouts.record_ms);
        let captured = tokio::time::timeout(
            record_timeout,
            self.detail.extract(page, handle, ctx.staging_dir(), &ctx.events),
        )
        .await;
        let extracted = match captured {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                ctx.stats.records_failed += 1;
                ctx.record_error(&e, listing_id);
                return;
            }
            Err(_) => {
                let e = ExtractionError::TransientUi {
                    role: "detail".to_string(),
                    detail: format!("record not captured within {}ms", record_timeout.as_millis()),
                };
                ctx.stats.records_failed += 1;
                ctx.record_error(&e, listing_id);
                return;
            }
        };

        let log_id = extracted.log_id();
        ctx.stats.attachments_downloaded += extracted.attachments.len() as u64;
        ctx.stats.attachments_failed += extracted.attachment_failures as u64;
        for _ in 0..extracted.attachment_failures {
            ctx.count_error("attachment_download");
        }
        if extracted.artifact.is_failed() {
            ctx.stats.artifacts_failed += 1;
            ctx.count_error("artifact");
        }

        if let Verdict::Duplicate(reason) = gate.check(&extracted, self.sink.store(), &ctx.events).await {
            ctx.stats.records_skipped_duplicate += 1;
            ctx.events.record(
                Component::Dedup,
                Severity::Info,
                format!("Skipped: {}", reason.as_str()),
                Some(&log_id),
            );
        } else {
            match self.sink.upsert(&extracted, &ctx.events).await {
                UpsertOutcome::Inserted => ctx.stats.records_inserted += 1,
                UpsertOutcome::Updated => ctx.stats.records_updated += 1,
                UpsertOutcome::Failed(reason) => {
                    ctx.stats.records_failed += 1;
                    ctx.record_error(&ExtractionError::Persistence(reason), Some(&log_id));
                }
            }
        }

        discard_staging(&extracted).await;
    }
}

fn absorb_popups(ctx: &mut RunContext, report: &PopupScanReport) {
    ctx.stats.popups_handled += report.handled.len() as u64;
    for _ in &report.failed {
        ctx.count_error("popup");
    }
}

/// Local files are not kept once a record is decided.
async fn discard_staging(record: &ExtractedRecord) {
    let Some(dir) = &record.staging_dir else {
        return;
    };
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        tracing::debug!("Could not remove staging dir {}: {}", dir.display(), e);
    }
}

fn describe_page(state: &PaginationState) -> String {
    match (state.range(), state.total_count) {
        (Some((s, e)), Some(total)) => {
            format!("Page {}: records {}-{} of {}", state.current_page, s, e, total)
        }
        _ => format!("Page {}: counter unknown", state.current_page),
    }
}
