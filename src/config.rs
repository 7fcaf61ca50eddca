use crate::cache::DEFAULT_CACHE_TTL_SECS;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// φ²; keeps perturbations small relative to volatility.
pub const DEFAULT_NOISE_DIVISOR: f64 = 2.618_033_988_749_895;
pub const DEFAULT_MIN_SCALE_FACTOR: f64 = 1.618_033_988_7e-12;
pub const DEFAULT_VOLATILITY_WINDOW: usize = 90;
pub const DEFAULT_VOLATILITY_FLOOR: f64 = 0.01;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MODEL_DIR: &str = "models";
pub const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";

const SETTING_KEYS: [&str; 10] = [
    "FORECAST_MODEL_DIR",
    "FORECAST_MARKET_DATA_FILE",
    "PREDICTION_CACHE_TTL_SECS",
    "SERIES_CACHE_TTL_SECS",
    "VOLATILITY_WINDOW",
    "VOLATILITY_FLOOR",
    "NOISE_DIVISOR",
    "MIN_SCALE_FACTOR",
    "RECOMPUTE_ON_CACHE_CORRUPTION",
    "REQUEST_TIMEOUT_SECS",
];

#[derive(Debug, Clone)]
pub struct ForecastSettings {
    pub model_dir: PathBuf,
    pub market_data_file: PathBuf,
    pub prediction_cache_ttl_secs: i64,
    pub series_cache_ttl_secs: i64,
    pub volatility_window: usize,
    pub volatility_floor: f64,
    pub noise_divisor: f64,
    pub min_scale_factor: f64,
    /// Treat a corrupted transformed-series entry as a miss instead of
    /// failing the request.
    pub recompute_on_cache_corruption: bool,
    pub request_timeout_secs: u64,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            market_data_file: PathBuf::from(DEFAULT_MARKET_DATA_FILE),
            prediction_cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            series_cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            volatility_window: DEFAULT_VOLATILITY_WINDOW,
            volatility_floor: DEFAULT_VOLATILITY_FLOOR,
            noise_divisor: DEFAULT_NOISE_DIVISOR,
            min_scale_factor: DEFAULT_MIN_SCALE_FACTOR,
            recompute_on_cache_corruption: true,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ForecastSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let model_dir = optional_setting(settings, "FORECAST_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_dir);
        let market_data_file = optional_setting(settings, "FORECAST_MARKET_DATA_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.market_data_file);
        let prediction_cache_ttl_secs = optional_setting_i64(settings, "PREDICTION_CACHE_TTL_SECS")?
            .unwrap_or(defaults.prediction_cache_ttl_secs);
        let series_cache_ttl_secs = optional_setting_i64(settings, "SERIES_CACHE_TTL_SECS")?
            .unwrap_or(defaults.series_cache_ttl_secs);
        let volatility_window = optional_setting_usize(settings, "VOLATILITY_WINDOW", 2)?
            .unwrap_or(defaults.volatility_window);
        let volatility_floor =
            optional_setting_f64(settings, "VOLATILITY_FLOOR", Some(f64::MIN_POSITIVE), None)?
                .unwrap_or(defaults.volatility_floor);
        let noise_divisor =
            optional_setting_f64(settings, "NOISE_DIVISOR", Some(f64::MIN_POSITIVE), None)?
                .unwrap_or(defaults.noise_divisor);
        let min_scale_factor = optional_setting_f64(
            settings,
            "MIN_SCALE_FACTOR",
            Some(f64::MIN_POSITIVE),
            Some(1.0),
        )?
        .unwrap_or(defaults.min_scale_factor);
        let recompute_on_cache_corruption =
            optional_setting_bool(settings, "RECOMPUTE_ON_CACHE_CORRUPTION")?
                .unwrap_or(defaults.recompute_on_cache_corruption);
        let request_timeout_secs = optional_setting_usize(settings, "REQUEST_TIMEOUT_SECS", 1)?
            .map(|value| value as u64)
            .unwrap_or(defaults.request_timeout_secs);

        Ok(Self {
            model_dir,
            market_data_file,
            prediction_cache_ttl_secs,
            series_cache_ttl_secs,
            volatility_window,
            volatility_floor,
            noise_divisor,
            min_scale_factor,
            recompute_on_cache_corruption,
            request_timeout_secs,
        })
    }

    /// Reads the known keys from the process environment.
    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = SETTING_KEYS
            .iter()
            .filter_map(|key| env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect();
        Self::from_settings_map(&settings)
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Option<f64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(Some(value))
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<Option<usize>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<usize>()
        .map_err(|_| anyhow!("Setting {} must be a non-negative integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(Some(value))
}

// Negative TTLs are legal and disable caching.
fn optional_setting_i64(settings: &HashMap<String, String>, key: &str) -> Result<Option<i64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    raw.parse::<i64>()
        .map(Some)
        .map_err(|_| anyhow!("Setting {} must be an integer (value: {})", key, raw))
}

fn optional_setting_bool(settings: &HashMap<String, String>, key: &str) -> Result<Option<bool>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(anyhow!("Setting {} must be a boolean (value: {})", key, raw)),
    }
}
