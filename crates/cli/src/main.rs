//! Flood Forecast Engine CLI
//!
//! A command-line tool for reading and generating flood forecasts,
//! retraining ensemble weights and checking service health.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::ApiError;
use commands::{forecast, retrain, status};
use output::OutputFormat;

/// Flood Forecast Engine CLI
#[derive(Parser)]
#[command(name = "ffc")]
#[command(author, version, about = "CLI for the Flood Forecast Engine", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via FFC_API_URL env var)
    #[arg(long, env = "FFC_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read, generate or preview zone forecasts
    #[command(subcommand)]
    Forecast(ForecastCommands),

    /// Recompute ensemble weights from historical outcomes
    Retrain {
        /// Flood zone ID
        zone: String,
    },

    /// Show service health
    Status,
}

#[derive(Subcommand)]
pub enum ForecastCommands {
    /// Show the latest still-valid stored forecast
    Show {
        /// Flood zone ID
        zone: String,
    },

    /// Generate, validate and store a new forecast
    Generate {
        /// Flood zone ID
        zone: String,

        /// Retrain ensemble weights before generating
        #[arg(long)]
        force_retrain: bool,
    },

    /// Compute a forecast without storing it
    Predict {
        /// Flood zone ID
        zone: String,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let settings = config::Config::load()?;
    let api_url = settings.resolve_api_url(cli.api_url.as_deref());
    let format = cli
        .format
        .or_else(|| settings.default_format.as_deref().and_then(OutputFormat::parse))
        .unwrap_or_default();

    let client = client::ApiClient::new(&api_url)?;

    match cli.command {
        Commands::Forecast(forecast_cmd) => match forecast_cmd {
            ForecastCommands::Show { zone } => {
                forecast::show_forecast(&client, &zone, format).await?;
            }
            ForecastCommands::Generate {
                zone,
                force_retrain,
            } => {
                forecast::generate_forecast(&client, &zone, force_retrain, format).await?;
            }
            ForecastCommands::Predict { zone } => {
                forecast::predict(&client, &zone, format).await?;
            }
        },
        Commands::Retrain { zone } => {
            retrain::retrain(&client, &zone, format).await?;
        }
        Commands::Status => {
            status::show_status(&client, format).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        output::print_error(&format!("{:#}", err));
        if let Some(api_err) = err.downcast_ref::<ApiError>() {
            if api_err.code() == Some("no_valid_forecast") {
                output::print_info("Run `ffc forecast generate <zone>` to produce one");
            }
        }
        std::process::exit(1);
    }
}
