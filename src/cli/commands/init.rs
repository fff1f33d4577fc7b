//! Initialize command.

use console::style;

use crate::cli::icons::{dim_arrow, success, warn};
use crate::config::{Config, Settings};
use crate::repository::run_migrations;

/// Create the data directories and migrate the database.
pub async fn cmd_init(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let applied = run_migrations(&settings.database_url()).await?;
    for name in &applied {
        println!("  {} Applied {}", dim_arrow(), name);
    }

    if config.companies.is_empty() {
        println!("{} No companies configured", warn());
        println!("  Add a [companies.<name>] section to pqracquire.toml to get started");
    } else {
        for name in config.companies.keys() {
            match config.company_profile(name) {
                Ok(profile) => println!(
                    "  {} {} ({}) {}",
                    success(),
                    style(&profile.name).bold(),
                    profile.kind,
                    style(&profile.listing_url).dim()
                ),
                Err(e) => println!("  {} {}: {}", warn(), name, e),
            }
        }
    }

    println!(
        "{} Initialized pqracquire in {}",
        success(),
        settings.data_dir.display()
    );
    Ok(())
}
