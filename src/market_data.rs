use crate::models::{validate_series, PricePoint};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub const MARKET_SNAPSHOT_VERSION: u32 = 1;

/// Source of raw price history for an instrument. May be slow.
pub trait MarketHistory: Send + Sync {
    fn fetch_raw_series(&self, instrument: &str) -> Result<Vec<PricePoint>>;
}

/// Versioned on-disk bundle of per-instrument price series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub series: BTreeMap<String, Vec<PricePoint>>,
}

impl Default for MarketSnapshot {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

impl MarketSnapshot {
    pub fn new(series: BTreeMap<String, Vec<PricePoint>>) -> Self {
        Self {
            version: MARKET_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            series,
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_SNAPSHOT_VERSION
            ));
        }

        info!(
            "Loaded market data snapshot with {} instrument(s) from {}",
            snapshot.series.len(),
            path.display()
        );
        Ok(snapshot)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    /// Reads `{"AAPL": [{date, open, high, low, close, volume}, ...], ...}`.
    /// Rows are sorted by date and each series must then be strictly
    /// increasing.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read price series from {}", path.display()))?;
        let series: BTreeMap<String, Vec<PricePoint>> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid price series JSON in {}", path.display()))?;

        let mut normalized = BTreeMap::new();
        for (instrument, mut points) in series {
            let instrument = instrument.trim().to_ascii_uppercase();
            points.sort_by_key(|point| point.date);
            validate_series(&instrument, &points)?;
            normalized.insert(instrument, points);
        }

        Ok(Self::new(normalized))
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

/// `MarketHistory` over an in-memory snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHistory {
    snapshot: MarketSnapshot,
}

impl SnapshotHistory {
    pub fn new(snapshot: MarketSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(MarketSnapshot::load_from_file(path)?))
    }

    pub fn insert(&mut self, instrument: &str, series: Vec<PricePoint>) {
        self.snapshot
            .series
            .insert(instrument.trim().to_ascii_uppercase(), series);
    }

    pub fn snapshot(&self) -> &MarketSnapshot {
        &self.snapshot
    }
}

impl MarketHistory for SnapshotHistory {
    fn fetch_raw_series(&self, instrument: &str) -> Result<Vec<PricePoint>> {
        let series = self
            .snapshot
            .series
            .get(instrument)
            .ok_or_else(|| anyhow!("No price history stored for {instrument}"))?;
        debug!(
            "Fetched {} price point(s) for {} from snapshot",
            series.len(),
            instrument
        );
        Ok(series.clone())
    }
}
