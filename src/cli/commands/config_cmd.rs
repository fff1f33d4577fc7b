//! Configuration display.

use console::style;

use crate::cli::icons::dim_arrow;
use crate::config::Config;

/// Print the loaded config, or one company's resolved profile.
pub fn cmd_config(config: &Config, company: Option<&str>) -> anyhow::Result<()> {
    let source = config
        .source_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults (no config file found)".to_string());
    eprintln!("  {} Source: {}", dim_arrow(), source);
    eprintln!("  {} Hash: {}", dim_arrow(), &config.hash()[..16]);

    match company {
        Some(name) => {
            let profile = config.company_profile(name)?;
            println!("{}", style(format!("[{}] {}", profile.kind, profile.name)).bold());
            println!("base_url      = {}", profile.base_url);
            println!("listing_url   = {}", profile.listing_url);
            println!("login         = {}", profile.login.is_some());
            println!("max_records   = {:?}", profile.max_records);
            println!(
                "pagination    = {} (max {} pages)",
                profile.enable_pagination, profile.max_pages
            );
            println!("days_back     = {}", profile.days_back);
            let fields: Vec<&str> = profile.fields.iter().map(|f| f.name.as_str()).collect();
            println!("fields        = {}", fields.join(", "));
            let popups: Vec<&str> = profile.popups.iter().map(|p| p.name.as_str()).collect();
            println!("popups        = {}", popups.join(", "));
            for role in profile.selectors.roles() {
                println!("  {:<22} {:?}", role, profile.selectors.get(role).candidates);
            }
        }
        None => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}
