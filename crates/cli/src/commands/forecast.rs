//! Forecast-related CLI commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, ForecastResponse, HorizonForecast, StoredPrediction};
use crate::output::{
    color_confidence, color_severity, color_status, format_level, format_percent, print_info,
    print_json, print_warning, OutputFormat,
};

/// Row for stored forecast records
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Horizon")]
    horizon: String,
    #[tabled(rename = "Risk")]
    risk: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Valid Until")]
    valid_for: String,
}

impl From<&StoredPrediction> for RecordRow {
    fn from(r: &StoredPrediction) -> Self {
        Self {
            horizon: format!("{}h", r.time_horizon),
            risk: format_percent(r.flood_risk),
            severity: color_severity(&r.severity),
            confidence: color_confidence(r.confidence),
            level: format_level(r.water_level),
            valid_for: r.valid_for.format("%Y-%m-%d %H:%M UTC").to_string(),
        }
    }
}

/// Row for an unpersisted prediction
#[derive(Tabled)]
struct HorizonRow {
    #[tabled(rename = "Horizon")]
    horizon: String,
    #[tabled(rename = "Risk")]
    risk: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Level")]
    level: String,
}

impl From<&HorizonForecast> for HorizonRow {
    fn from(h: &HorizonForecast) -> Self {
        Self {
            horizon: format!("{}h", h.time_horizon),
            risk: format_percent(h.flood_risk),
            severity: color_severity(&h.severity),
            confidence: color_confidence(h.confidence),
            level: format_level(h.water_level),
        }
    }
}

fn print_records(forecast: &ForecastResponse) {
    if forecast.records.is_empty() {
        print_warning("No forecast records");
        return;
    }

    let rows: Vec<RecordRow> = forecast.records.iter().map(RecordRow::from).collect();
    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);

    if let Some(first) = forecast.records.first() {
        println!(
            "\nZone: {}  Model: {}  Quality: {}  Generated: {}",
            forecast.zone_id,
            first.model_version,
            first.data_quality,
            first.generated_at.format("%Y-%m-%d %H:%M UTC")
        );
    }
}

/// Show the latest still-valid stored forecast
pub async fn show_forecast(client: &ApiClient, zone_id: &str, format: OutputFormat) -> Result<()> {
    let forecast = client.stored_forecast(zone_id).await?;

    match format {
        OutputFormat::Json => print_json(&forecast)?,
        OutputFormat::Table => print_records(&forecast),
    }

    Ok(())
}

/// Generate a forecast, optionally retraining first
pub async fn generate_forecast(
    client: &ApiClient,
    zone_id: &str,
    force_retrain: bool,
    format: OutputFormat,
) -> Result<()> {
    let forecast = client.generate_forecast(zone_id, force_retrain).await?;

    match format {
        OutputFormat::Json => print_json(&forecast)?,
        OutputFormat::Table => {
            if let Some(source) = &forecast.source {
                print_info(&format!("Source: {}", color_status(source)));
            }
            if let Some(reason) = &forecast.fallback_reason {
                print_warning(&format!("Generation failed, serving stored forecast: {}", reason));
            }
            print_records(&forecast);

            for alert in &forecast.alerts {
                print_warning(&format!(
                    "Alert {} ({}, {}) at {}h: {:.2} >= {:.2}",
                    alert.rule_id,
                    alert.alert_type,
                    alert.severity,
                    alert.time_horizon,
                    alert.observed_value,
                    alert.threshold
                ));
            }
        }
    }

    Ok(())
}

/// Compute a prediction without persisting it
pub async fn predict(client: &ApiClient, zone_id: &str, format: OutputFormat) -> Result<()> {
    let prediction = client.predict(zone_id).await?;

    match format {
        OutputFormat::Json => print_json(&prediction)?,
        OutputFormat::Table => {
            let rows: Vec<HorizonRow> = prediction.per_horizon.iter().map(HorizonRow::from).collect();
            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);

            let weights: Vec<String> = prediction
                .ensemble_weights
                .weights
                .iter()
                .map(|(model, weight)| format!("{}={:.3}", model, weight))
                .collect();
            println!(
                "\nZone: {}  Model: {}  Quality: {}  Readings: {}",
                prediction.flood_zone_id,
                prediction.model_version,
                prediction.data_quality,
                prediction.readings_used
            );
            println!("Weights: {}", weights.join(", "));
        }
    }

    Ok(())
}
