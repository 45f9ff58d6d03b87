mod api;
mod cli;
mod config;
mod db;
mod error;
mod models;
mod services;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "courtside")]
#[command(about = "NBA rolling-form win probabilities for the daily slate")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
    /// Initialize the database
    InitDb,
    /// Fetch and cache season game logs
    Fetch {
        /// Season such as 2024-25, or "current"; defaults to NBA_SEASONS
        #[arg(short, long)]
        season: Option<String>,
    },
    /// Predict a day's slate
    Predict {
        /// YYYY-MM-DD, defaults to today
        #[arg(short, long)]
        date: Option<String>,
        /// Train from the local cache instead of refreshing
        #[arg(long)]
        offline: bool,
    },
    /// Show final scores and grade stored predictions
    Results {
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Query a team's recent form
    Team {
        #[arg(short, long)]
        name: String,
    },
    /// Train and report holdout metrics
    Evaluate {
        #[arg(long)]
        offline: bool,
    },
    /// Export the training matchups as CSV
    Export {
        #[arg(short, long, default_value = "data/exports/matchups.csv")]
        output: String,
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Some(Commands::Serve { port }) => {
            tracing::info!("Starting Courtside API server on port {}", port);
            api::serve(config, port).await?;
        }
        Some(Commands::InitDb) => {
            tracing::info!("Initializing database...");
            db::init_database(&config.database_url).await?;
        }
        Some(Commands::Fetch { season }) => {
            cli::fetch_data(&config, season).await?;
        }
        Some(Commands::Predict { date, offline }) => {
            cli::generate_predictions(&config, date, offline).await?;
        }
        Some(Commands::Results { date }) => {
            cli::show_results(&config, date).await?;
        }
        Some(Commands::Team { name }) => {
            tracing::info!("Querying team: {}", name);
            cli::query_team(&config, &name).await?;
        }
        Some(Commands::Evaluate { offline }) => {
            cli::evaluate_model(&config, offline).await?;
        }
        Some(Commands::Export { output, offline }) => {
            cli::export_dataset(&config, &output, offline).await?;
        }
        None => {
            // Default to serving
            tracing::info!("Starting Courtside API server on port 3000");
            api::serve(config, 3000).await?;
        }
    }

    Ok(())
}
