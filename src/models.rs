use crate::error::ForecastError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Column order of a transformed feature table. Model feature lists are
/// reindexed against these names.
pub const FEATURE_COLUMNS: [&str; 25] = [
    "Open",
    "High",
    "Low",
    "Close",
    "Volume",
    "MA_10",
    "MA_50",
    "Volatility",
    "RSI",
    "MACD",
    "MACD_Signal",
    "MACD_Hist",
    "Stochastic",
    "Williams %R",
    "BB_Lower",
    "BB_Middle",
    "BB_Upper",
    "EMA_10",
    "EMA_50",
    "Parabolic_SAR",
    "OBV",
    "VWAP",
    "Pivot",
    "R1",
    "S1",
];

/// A price bar enriched with its technical indicators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub price: PricePoint,
    pub ma_10: f64,
    pub ma_50: f64,
    pub volatility: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    pub stochastic: f64,
    pub williams_r: f64,
    pub bb_lower: f64,
    pub bb_middle: f64,
    pub bb_upper: f64,
    pub ema_10: f64,
    pub ema_50: f64,
    pub parabolic_sar: f64,
    pub obv: f64,
    pub vwap: f64,
    pub pivot: f64,
    pub r1: f64,
    pub s1: f64,
}

impl FeatureRow {
    /// Looks a column up by its feature name. Williams %R is also accepted in
    /// the space-less and underscore spellings some model files use.
    pub fn value(&self, name: &str) -> Option<f64> {
        let value = match name.trim() {
            "Open" => self.price.open,
            "High" => self.price.high,
            "Low" => self.price.low,
            "Close" => self.price.close,
            "Volume" => self.price.volume,
            "MA_10" => self.ma_10,
            "MA_50" => self.ma_50,
            "Volatility" => self.volatility,
            "RSI" => self.rsi,
            "MACD" => self.macd,
            "MACD_Signal" => self.macd_signal,
            "MACD_Hist" => self.macd_hist,
            "Stochastic" => self.stochastic,
            "Williams %R" | "Williams%R" | "Williams_%R" => self.williams_r,
            "BB_Lower" => self.bb_lower,
            "BB_Middle" => self.bb_middle,
            "BB_Upper" => self.bb_upper,
            "EMA_10" => self.ema_10,
            "EMA_50" => self.ema_50,
            "Parabolic_SAR" => self.parabolic_sar,
            "OBV" => self.obv,
            "VWAP" => self.vwap,
            "Pivot" => self.pivot,
            "R1" => self.r1,
            "S1" => self.s1,
            _ => return None,
        };
        Some(value)
    }

    /// Builds a model input vector ordered like `feature_names`; unknown
    /// names are filled with 0.
    pub fn to_input_vector<S: AsRef<str>>(&self, feature_names: &[S]) -> Vec<f64> {
        feature_names
            .iter()
            .map(|name| self.value(name.as_ref()).unwrap_or(0.0))
            .collect()
    }

    /// All columns in `FEATURE_COLUMNS` order.
    pub fn values(&self) -> Vec<f64> {
        self.to_input_vector(&FEATURE_COLUMNS)
    }
}

/// Training window of a trained model pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrainingWindow {
    Historical,
    Recent,
}

impl TrainingWindow {
    pub fn all() -> [TrainingWindow; 2] {
        [TrainingWindow::Historical, TrainingWindow::Recent]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingWindow::Historical => "historical",
            TrainingWindow::Recent => "recent",
        }
    }
}

impl fmt::Display for TrainingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrainingWindow {
    type Err = ForecastError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "historical" => Ok(TrainingWindow::Historical),
            "recent" => Ok(TrainingWindow::Recent),
            other => Err(ForecastError::InvalidArgument(format!(
                "training window must be historical or recent (value: {other})"
            ))),
        }
    }
}

/// The two published tracks of one forecast request, in step order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub instrument: String,
    pub horizon_days: usize,
    pub historical: Vec<f64>,
    pub recent: Vec<f64>,
}

/// Checks that dates are strictly increasing.
pub fn validate_series(instrument: &str, series: &[PricePoint]) -> Result<(), ForecastError> {
    for (idx, pair) in series.windows(2).enumerate() {
        if pair[1].date <= pair[0].date {
            return Err(ForecastError::InvalidSeries(format!(
                "{instrument}: date at index {} ({}) does not follow {}",
                idx + 1,
                pair[1].date.to_rfc3339(),
                pair[0].date.to_rfc3339()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn point(day: i64, close: f64) -> PricePoint {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        PricePoint {
            date: base + Duration::days(day),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn validate_series_rejects_duplicate_dates() {
        let series = vec![point(0, 10.0), point(1, 11.0), point(1, 12.0)];
        let err = validate_series("AAPL", &series).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidSeries(_)));
        assert!(validate_series("AAPL", &series[..2]).is_ok());
    }

    #[test]
    fn input_vector_reorders_and_zero_fills() {
        let row = FeatureRow {
            price: point(0, 42.0),
            ma_10: 1.0,
            ma_50: 2.0,
            volatility: 3.0,
            rsi: 4.0,
            macd: 5.0,
            macd_signal: 6.0,
            macd_hist: 7.0,
            stochastic: 8.0,
            williams_r: -9.0,
            bb_lower: 10.0,
            bb_middle: 11.0,
            bb_upper: 12.0,
            ema_10: 13.0,
            ema_50: 14.0,
            parabolic_sar: 15.0,
            obv: 16.0,
            vwap: 17.0,
            pivot: 18.0,
            r1: 19.0,
            s1: 20.0,
        };
        let names = ["RSI", "Close", "Ticker", "Williams_%R"];
        assert_eq!(row.to_input_vector(&names), vec![4.0, 42.0, 0.0, -9.0]);
        assert_eq!(row.values().len(), FEATURE_COLUMNS.len());
    }

    #[test]
    fn training_window_parses_case_insensitively() {
        assert_eq!(
            "Recent".parse::<TrainingWindow>().unwrap(),
            TrainingWindow::Recent
        );
        assert!("weekly".parse::<TrainingWindow>().is_err());
    }
}
