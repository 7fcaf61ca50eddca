use crate::batch::{forecast_many, ForecastJob};
use crate::context::AppContext;
use crate::forecast::ForecastOptions;
use crate::sectors::Sector;
use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde_json::{json, Map as JsonMap, Value};

pub async fn run(app: &AppContext, sector: Sector, horizon_days: usize) -> Result<()> {
    let engine = app.forecast_engine()?;
    let jobs: Vec<ForecastJob> = sector
        .instruments()
        .iter()
        .map(|instrument| ForecastJob {
            instrument: instrument.to_string(),
            options: ForecastOptions {
                horizon_days,
                ..ForecastOptions::default()
            },
        })
        .collect();
    info!(
        "Forecasting {} instrument(s) in sector {} for {} day(s)",
        jobs.len(),
        sector,
        horizon_days
    );

    let pb = ProgressBar::new(jobs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .map_err(|err| anyhow!("invalid progress template: {err}"))?
            .progress_chars("#>-"),
    );

    let results = tokio::task::spawn_blocking({
        let pb = pb.clone();
        move || forecast_many(&engine, &jobs, || pb.inc(1))
    })
    .await?;

    let mut output = JsonMap::new();
    let mut failures = 0usize;
    for (instrument, result) in results {
        match result {
            Ok(forecast) => {
                output.insert(
                    instrument,
                    json!({
                        "historicalPredictions": forecast.historical,
                        "recentPredictions": forecast.recent,
                    }),
                );
            }
            Err(err) => {
                failures += 1;
                warn!("Forecast for {} failed: {}", instrument, err);
                output.insert(
                    instrument,
                    json!({ "status": err.status_code(), "error": err.to_string() }),
                );
            }
        }
    }

    if failures > 0 {
        pb.finish_with_message("Sector forecast completed with errors");
    } else {
        pb.finish_with_message("Sector forecast completed");
    }
    println!("{}", serde_json::to_string_pretty(&Value::Object(output))?);
    Ok(())
}
