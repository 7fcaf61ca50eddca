use crate::api::{handle_forecast_with_timeout, ForecastRequest};
use crate::context::AppContext;
use anyhow::{anyhow, Context, Result};
use log::info;

pub async fn run(
    app: &AppContext,
    instrument: &str,
    horizon_days: usize,
    noise_seed: Option<u64>,
    noise_level: Option<f64>,
) -> Result<()> {
    info!(
        "Received forecast command for {} ({} day horizon)",
        instrument, horizon_days
    );
    let engine = app.forecast_engine()?;
    let request = ForecastRequest {
        instrument_id: instrument.to_string(),
        horizon_days,
        noise_level,
        noise_seed,
    };

    let response = handle_forecast_with_timeout(engine, request)
        .await
        .map_err(|err| anyhow!("forecast failed with status {}: {}", err.status, err.error))?;
    let json =
        serde_json::to_string_pretty(&response).context("Failed to serialize forecast response")?;
    println!("{json}");
    Ok(())
}
