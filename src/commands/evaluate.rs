use crate::context::AppContext;
use crate::evaluation::one_step_backtest;
use crate::models::TrainingWindow;
use crate::sectors;
use anyhow::{anyhow, Result};
use log::info;

pub async fn run(app: &AppContext, instrument: &str, window: TrainingWindow) -> Result<()> {
    let engine = app.forecast_engine()?;
    let instrument = sectors::normalize_instrument(instrument)
        .ok_or_else(|| anyhow!("instrument id must not be empty"))?;
    let sector = sectors::resolve(&instrument)?;
    let model = engine.load_model(sector, window)?;

    let series = engine.raw_series(&instrument)?;
    let rows = engine.feature_table(&instrument, &series)?;
    let metrics = one_step_backtest(&instrument, model.as_ref(), &rows)?;
    info!(
        "{} {} model on {}: MAE={:.4} MSE={:.4} R2={:.4} over {} step(s)",
        sector, window, instrument, metrics.mae, metrics.mse, metrics.r2, metrics.count
    );
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
