use crate::market_data::MarketSnapshot;
use anyhow::Result;
use log::info;
use std::path::Path;

pub async fn run(input: &Path, output: &Path) -> Result<()> {
    info!("Importing price series from {}", input.display());
    let snapshot = MarketSnapshot::from_json_file(input)?;
    snapshot.save_to_file(output)?;
    info!(
        "Market data snapshot with {} instrument(s) written to {}",
        snapshot.series.len(),
        output.display()
    );
    Ok(())
}
