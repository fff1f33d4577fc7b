//! CLI parser and dispatch.

mod config_cmd;
mod init;
mod run;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::load_settings;

#[derive(Parser)]
#[command(name = "pqr")]
#[command(about = "Unattended PQR record acquisition from utility-company portals")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Extract PQR records for a company
    Run {
        /// Company key from the config file (e.g. afinia, aire)
        company: String,
        /// Stop after this many records (overrides config)
        #[arg(short, long)]
        limit: Option<usize>,
        /// Re-extract records already stored and update them
        #[arg(long)]
        refresh: bool,
        /// Replay HTML snapshots from this directory instead of a live browser
        #[arg(long)]
        snapshots: Option<PathBuf>,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show stored records and recent runs
    Status {
        /// Only this company
        company: Option<String>,
        /// Number of recent runs to show
        #[arg(short = 'n', long, default_value = "5")]
        runs: i64,
    },

    /// Show the effective configuration
    Config {
        /// Resolved profile for one company
        company: Option<String>,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut settings, config) = load_settings(cli.config.as_deref()).await?;
    if let Some(dir) = cli.data_dir {
        settings.set_data_dir(dir);
    }

    match cli.command {
        Commands::Init => init::cmd_init(&settings, &config).await,
        Commands::Run {
            company,
            limit,
            refresh,
            snapshots,
            json,
        } => {
            let args = run::RunArgs {
                company,
                limit,
                refresh,
                snapshots,
                json,
            };
            run::cmd_run(&settings, &config, args).await
        }
        Commands::Status { company, runs } => {
            status::cmd_status(&settings, company.as_deref(), runs).await
        }
        Commands::Config { company } => config_cmd::cmd_config(&config, company.as_deref()),
    }
}
