//! Status command.

use console::style;

use crate::cli::icons::{dim_arrow, warn};
use crate::config::Settings;
use crate::repository;

/// Stored record counts, latest records and recent runs.
pub async fn cmd_status(
    settings: &Settings,
    company: Option<&str>,
    run_limit: i64,
) -> anyhow::Result<()> {
    if !settings.database_exists() {
        println!("{} Not initialized. Run 'pqr init' first.", warn());
        return Ok(());
    }

    let (records, runs) = repository::open(&settings.database_url()).await?;
    let company = company.map(str::to_lowercase);

    println!("\n{}", style("pqracquire status").bold());
    println!("{}", "-".repeat(40));
    println!("  Database: {}", settings.database_path().display());
    println!("  Objects:  {}", settings.objects_dir.display());

    let counts = records.counts().await?;
    println!("\n  {}", style("Records").bold());
    if counts.is_empty() {
        println!("    none yet");
    }
    for (name, count) in counts
        .iter()
        .filter(|(name, _)| company.as_deref().map_or(true, |c| c == name))
    {
        println!("    {:<16} {}", name, count);
    }

    if let Some(name) = company.as_deref() {
        let latest = records.list_recent(name, 5).await?;
        if !latest.is_empty() {
            println!("\n  {}", style("Latest records").bold());
            for record in latest {
                println!(
                    "    {} {} [{}] {} {}",
                    dim_arrow(),
                    record.external_id.as_deref().unwrap_or("-"),
                    record.category,
                    record.record_date.as_deref().unwrap_or(""),
                    style(&record.artifact_kind).dim()
                );
            }
        }
    }

    let recent = runs.recent(company.as_deref(), run_limit).await?;
    println!("\n  {}", style("Recent runs").bold());
    if recent.is_empty() {
        println!("    none yet");
    }
    for run in recent {
        println!(
            "    {} {} {} {:<20} +{} ~{} ={} !{}",
            dim_arrow(),
            run.started_at.format("%Y-%m-%d %H:%M"),
            style(&run.company).bold(),
            run.stopped_because.as_str(),
            run.stats.records_inserted,
            run.stats.records_updated,
            run.stats.records_skipped_duplicate,
            run.stats.records_failed
        );
    }
    Ok(())
}
