//! Ensemble weight retraining command

use anyhow::Result;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{print_json, print_success, print_warning, OutputFormat};

#[derive(Tabled)]
struct WeightRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Weight")]
    weight: String,
}

pub async fn retrain(client: &ApiClient, zone_id: &str, format: OutputFormat) -> Result<()> {
    let result = client.retrain(zone_id).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            if result.updated {
                print_success(&format!(
                    "Weights for {} updated to version {}",
                    result.zone_id, result.weights.version
                ));
            } else {
                print_warning(&format!(
                    "Weights for {} unchanged (version {}): not enough outcomes or a retrain is in progress",
                    result.zone_id, result.weights.version
                ));
            }

            let rows: Vec<WeightRow> = result
                .weights
                .weights
                .iter()
                .map(|(model, weight)| WeightRow {
                    model: model.clone(),
                    weight: format!("{:.4}", weight),
                })
                .collect();
            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}
