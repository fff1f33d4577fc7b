//! Extraction run command.

use std::path::PathBuf;
use std::sync::Arc;

use console::style;

use crate::browser::{PageDriver, StaticSite};
use crate::cli::icons::{dim_arrow, error, success, warn};
use crate::config::{Config, Settings};
use crate::error::ExtractionError;
use crate::models::RunSummary;
use crate::pipeline::{ExtractionOrchestrator, RunOptions};
use crate::repository;
use crate::storage::FilesystemObjectStore;

pub struct RunArgs {
    pub company: String,
    pub limit: Option<usize>,
    pub refresh: bool,
    pub snapshots: Option<PathBuf>,
    pub json: bool,
}

/// Run one extraction and record it.
pub async fn cmd_run(settings: &Settings, config: &Config, args: RunArgs) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let profile = config.company_profile(&args.company)?;

    let (records, runs) = repository::open(&settings.database_url()).await?;
    let objects = Arc::new(FilesystemObjectStore::new(&settings.objects_dir));
    let orchestrator = ExtractionOrchestrator::new(profile.clone(), Arc::new(records), objects);
    let options = RunOptions {
        max_records: args.limit,
        refresh_existing: args.refresh,
        today: None,
        staging_root: Some(settings.staging_dir.clone()),
    };

    eprintln!(
        "{} Extracting {} from {}",
        dim_arrow(),
        style(&profile.name).bold(),
        profile.listing_url
    );

    let result = match &args.snapshots {
        Some(dir) => {
            let site = StaticSite::from_dir(&profile.base_url, dir)?;
            let page = site.open(&profile.base_url).await?;
            let result = orchestrator.run(&page, &options).await;
            let _ = page.close().await;
            result
        }
        None => run_live(&orchestrator, config, &options).await?,
    };

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("{} {}", error(), e);
            return Err(e.into());
        }
    };

    if let Err(e) = runs.save(&summary).await {
        eprintln!("{} Run history not saved: {}", warn(), e);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

#[cfg(feature = "browser")]
async fn run_live(
    orchestrator: &ExtractionOrchestrator,
    config: &Config,
    options: &RunOptions,
) -> anyhow::Result<Result<RunSummary, ExtractionError>> {
    let mut session = crate::browser::BrowserSession::new(config.browser.clone());
    let page = session.new_page("about:blank").await?;
    let result = orchestrator.run(page.as_ref(), options).await;
    let _ = page.close().await;
    session.close().await;
    Ok(result)
}

#[cfg(not(feature = "browser"))]
async fn run_live(
    _orchestrator: &ExtractionOrchestrator,
    _config: &Config,
    _options: &RunOptions,
) -> anyhow::Result<Result<RunSummary, ExtractionError>> {
    anyhow::bail!("Built without the browser feature; use --snapshots <dir>")
}

fn print_summary(summary: &RunSummary) {
    let stats = &summary.stats;
    let icon = if summary.is_partial() { warn() } else { success() };

    println!(
        "\n{} {} run finished in {}s ({})",
        icon,
        style(&summary.company).bold(),
        summary.duration_secs(),
        style(summary.stopped_because).cyan()
    );
    println!("{}", "-".repeat(40));
    println!("  Pages walked:        {}", stats.pages_walked);
    println!("  Records seen:        {}", stats.records_seen);
    println!("  Inserted:            {}", style(stats.records_inserted).green());
    println!("  Updated:             {}", stats.records_updated);
    println!("  Duplicates skipped:  {}", stats.records_skipped_duplicate);
    if stats.records_failed > 0 {
        println!("  Failed:              {}", style(stats.records_failed).red());
    }
    println!(
        "  Attachments:         {} ({} failed)",
        stats.attachments_downloaded, stats.attachments_failed
    );
    if stats.artifacts_failed > 0 {
        println!("  Missing artifacts:   {}", style(stats.artifacts_failed).yellow());
    }
    println!("  Popups handled:      {}", stats.popups_handled);
    println!(
        "  Filters applied:     {}",
        if stats.filters_applied { "yes" } else { "no" }
    );

    if !summary.errors_by_category.is_empty() {
        println!("\n  {}", style("Errors by category").bold());
        for (category, count) in &summary.errors_by_category {
            println!("    {} {}: {}", dim_arrow(), category, count);
        }
    }
}
