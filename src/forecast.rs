use crate::cache::{self, CacheStore};
use crate::config::ForecastSettings;
use crate::error::ForecastError;
use crate::features;
use crate::indicators;
use crate::market_data::MarketHistory;
use crate::model_store::{ModelStore, RegressionModel};
use crate::models::{validate_series, FeatureRow, Forecast, PricePoint, TrainingWindow};
use crate::sectors::{self, Sector};
use anyhow::{anyhow, Context};
use chrono::Duration;
use log::{debug, info, warn};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use statrs::distribution::Normal;
use std::sync::Arc;
use std::time::Instant;

pub const MIN_HORIZON_DAYS: usize = 1;
pub const MAX_HORIZON_DAYS: usize = 180;
pub const DEFAULT_HORIZON_DAYS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastOptions {
    pub horizon_days: usize,
    pub noise_seed: Option<u64>,
    /// Lower bound of the per-step scale factor draw, in (0, 1].
    pub noise_level: Option<f64>,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        Self {
            horizon_days: DEFAULT_HORIZON_DAYS,
            noise_seed: None,
            noise_level: None,
        }
    }
}

pub fn validate_horizon(horizon_days: usize) -> Result<(), ForecastError> {
    if !(MIN_HORIZON_DAYS..=MAX_HORIZON_DAYS).contains(&horizon_days) {
        return Err(ForecastError::InvalidArgument(format!(
            "horizon must be between {MIN_HORIZON_DAYS} and {MAX_HORIZON_DAYS} days (value: {horizon_days})"
        )));
    }
    Ok(())
}

fn normalized_instrument(instrument: &str) -> Result<String, ForecastError> {
    sectors::normalize_instrument(instrument)
        .ok_or_else(|| ForecastError::InvalidArgument("instrument id must not be empty".into()))
}

/// The model pair used for one request.
#[derive(Clone)]
pub struct TrackModels {
    pub historical: Arc<dyn RegressionModel>,
    pub recent: Arc<dyn RegressionModel>,
}

/// Volatility-scaled zero-mean Gaussian perturbations. Each draw picks a
/// fresh scale factor, so the two tracks never share one.
pub struct NoiseSource {
    rng: StdRng,
    scale: Uniform<f64>,
    divisor: f64,
}

impl NoiseSource {
    pub fn new(
        seed: Option<u64>,
        min_scale: f64,
        divisor: f64,
    ) -> Result<Self, ForecastError> {
        if !(min_scale > 0.0 && min_scale <= 1.0) {
            return Err(ForecastError::InvalidArgument(format!(
                "noise scale lower bound must be in (0, 1] (value: {min_scale})"
            )));
        }
        if !(divisor.is_finite() && divisor > 0.0) {
            return Err(ForecastError::InvalidArgument(format!(
                "noise divisor must be positive (value: {divisor})"
            )));
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            rng,
            scale: Uniform::new_inclusive(min_scale, 1.0),
            divisor,
        })
    }

    pub fn perturbation(&mut self, volatility: f64) -> anyhow::Result<f64> {
        let scale = self.scale.sample(&mut self.rng);
        let std_dev = scale * volatility / self.divisor;
        let normal = Normal::new(0.0, std_dev)
            .map_err(|err| anyhow!("invalid noise distribution (std_dev={std_dev}): {err}"))?;
        Ok(normal.sample(&mut self.rng))
    }
}

/// Accumulator owned by a single forecast invocation.
pub struct ForecastState {
    series: Vec<PricePoint>,
    rows: Vec<FeatureRow>,
    historical: Vec<f64>,
    recent: Vec<f64>,
}

impl ForecastState {
    pub fn new(series: Vec<PricePoint>, rows: Vec<FeatureRow>, horizon_days: usize) -> Self {
        Self {
            series,
            rows,
            historical: Vec::with_capacity(horizon_days),
            recent: Vec::with_capacity(horizon_days),
        }
    }

    /// Trailing sample std of Close, or `floor` when the window is not full
    /// or the series is flat.
    pub fn volatility(&self, window: usize, floor: f64) -> f64 {
        let closes: Vec<f64> = self.series.iter().map(|point| point.close).collect();
        match indicators::trailing_std(&closes, window) {
            Some(value) if value > 0.0 => value,
            _ => floor,
        }
    }

    /// Predict, perturb, append, recompute.
    pub fn step(
        &mut self,
        models: &TrackModels,
        noise: &mut NoiseSource,
        settings: &ForecastSettings,
    ) -> anyhow::Result<()> {
        let latest = self
            .rows
            .last()
            .ok_or_else(|| anyhow!("feature table is empty"))?;

        let historical_input = latest.to_input_vector(models.historical.feature_names());
        let recent_input = latest.to_input_vector(models.recent.feature_names());
        let raw_historical = models
            .historical
            .predict(&historical_input)
            .context("historical model inference failed")?;
        let raw_recent = models
            .recent
            .predict(&recent_input)
            .context("recent model inference failed")?;

        let volatility = self.volatility(settings.volatility_window, settings.volatility_floor);
        let historical = raw_historical + noise.perturbation(volatility)?;
        let recent = raw_recent + noise.perturbation(volatility)?;
        if !historical.is_finite() || !recent.is_finite() {
            return Err(anyhow!(
                "non-finite prediction (historical={historical}, recent={recent})"
            ));
        }

        let last = *self
            .series
            .last()
            .ok_or_else(|| anyhow!("price series is empty"))?;
        // Open/High/Low/Volume are carried forward; Close may end up above High.
        self.series.push(PricePoint {
            date: last.date + Duration::days(1),
            close: historical,
            ..last
        });
        self.rows = features::transform(&self.series).context("feature recomputation failed")?;

        debug!(
            "step {}: raw=({:.6}, {:.6}) volatility={:.6} published=({:.6}, {:.6})",
            self.historical.len() + 1,
            raw_historical,
            raw_recent,
            volatility,
            historical,
            recent
        );
        self.historical.push(historical);
        self.recent.push(recent);
        Ok(())
    }

    pub fn steps_taken(&self) -> usize {
        self.historical.len()
    }

    pub fn series(&self) -> &[PricePoint] {
        &self.series
    }

    pub fn into_tracks(self) -> (Vec<f64>, Vec<f64>) {
        (self.historical, self.recent)
    }
}

/// Recursive multi-step forecaster. Collaborators are injected at
/// construction; the engine itself holds no per-request state.
#[derive(Clone)]
pub struct ForecastEngine {
    cache: Arc<CacheStore>,
    models: Arc<dyn ModelStore>,
    history: Arc<dyn MarketHistory>,
    settings: ForecastSettings,
}

impl ForecastEngine {
    pub fn new(
        cache: Arc<CacheStore>,
        models: Arc<dyn ModelStore>,
        history: Arc<dyn MarketHistory>,
        settings: ForecastSettings,
    ) -> Self {
        Self {
            cache,
            models,
            history,
            settings,
        }
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn forecast(
        &self,
        instrument: &str,
        horizon_days: usize,
        noise_seed: Option<u64>,
    ) -> Result<Forecast, ForecastError> {
        self.forecast_with(
            instrument,
            &ForecastOptions {
                horizon_days,
                noise_seed,
                noise_level: None,
            },
        )
    }

    pub fn forecast_with(
        &self,
        instrument: &str,
        options: &ForecastOptions,
    ) -> Result<Forecast, ForecastError> {
        let started = Instant::now();
        validate_horizon(options.horizon_days)?;
        let instrument = normalized_instrument(instrument)?;
        let sector = sectors::resolve(&instrument)?;
        let models = self.load_models(sector)?;

        let min_scale = match options.noise_level {
            Some(level) => level.clamp(self.settings.min_scale_factor, 1.0),
            None => self.settings.min_scale_factor,
        };
        let mut noise = NoiseSource::new(options.noise_seed, min_scale, self.settings.noise_divisor)?;

        let series = self.raw_series(&instrument)?;
        let rows = self.feature_table(&instrument, &series)?;

        info!(
            "Forecasting {} ({} sector) for {} day(s) from {} price point(s)",
            instrument,
            sector,
            options.horizon_days,
            series.len()
        );

        let mut state = ForecastState::new(series, rows, options.horizon_days);
        for step in 1..=options.horizon_days {
            state
                .step(&models, &mut noise, &self.settings)
                .map_err(|err| ForecastError::execution(&instrument, step, err))?;
        }

        let (historical, recent) = state.into_tracks();
        self.publish_tracks(&instrument, options.horizon_days, &historical, &recent)?;

        info!(
            "Forecast for {} completed in {:.2?} ({} step(s))",
            instrument,
            started.elapsed(),
            options.horizon_days
        );

        Ok(Forecast {
            instrument,
            horizon_days: options.horizon_days,
            historical,
            recent,
        })
    }

    /// Previously published tracks for (instrument, horizon), if both are
    /// still cached.
    pub fn cached_forecast(
        &self,
        instrument: &str,
        horizon_days: usize,
    ) -> Result<Option<Forecast>, ForecastError> {
        validate_horizon(horizon_days)?;
        let instrument = normalized_instrument(instrument)?;

        let historical: Option<Vec<f64>> = self.read_cached(&cache::prediction_key(
            &instrument,
            TrainingWindow::Historical,
            horizon_days,
        ))?;
        let recent: Option<Vec<f64>> = self.read_cached(&cache::prediction_key(
            &instrument,
            TrainingWindow::Recent,
            horizon_days,
        ))?;

        Ok(match (historical, recent) {
            (Some(historical), Some(recent))
                if historical.len() == horizon_days && recent.len() == horizon_days =>
            {
                Some(Forecast {
                    instrument,
                    horizon_days,
                    historical,
                    recent,
                })
            }
            _ => None,
        })
    }

    pub fn load_model(
        &self,
        sector: Sector,
        window: TrainingWindow,
    ) -> Result<Arc<dyn RegressionModel>, ForecastError> {
        self.models.load(sector, window)
    }

    pub fn load_models(&self, sector: Sector) -> Result<TrackModels, ForecastError> {
        Ok(TrackModels {
            historical: self.load_model(sector, TrainingWindow::Historical)?,
            recent: self.load_model(sector, TrainingWindow::Recent)?,
        })
    }

    /// Raw history, from cache when present.
    pub fn raw_series(&self, instrument: &str) -> Result<Vec<PricePoint>, ForecastError> {
        let key = cache::raw_series_key(instrument);
        let series = match self.read_cached::<Vec<PricePoint>>(&key)? {
            Some(series) => series,
            None => {
                info!("Fetching price history for {}", instrument);
                let series = self
                    .history
                    .fetch_raw_series(instrument)
                    .map_err(|err| ForecastError::execution(instrument, 0, err))?;
                validate_series(instrument, &series)?;
                if !series.is_empty() {
                    self.cache
                        .set(&key, &series, self.settings.series_cache_ttl_secs)?;
                }
                series
            }
        };

        if series.is_empty() {
            return Err(ForecastError::InsufficientData(format!(
                "no price history available for {instrument}"
            )));
        }
        Ok(series)
    }

    /// Feature table for `series`, from cache when the stored table has the
    /// same length and ends on the same bar.
    pub fn feature_table(
        &self,
        instrument: &str,
        series: &[PricePoint],
    ) -> Result<Vec<FeatureRow>, ForecastError> {
        let key = cache::transformed_series_key(instrument);
        if let Some(rows) = self.read_cached::<Vec<FeatureRow>>(&key)? {
            let same_tail = rows.last().map(|row| row.price) == series.last().copied();
            if rows.len() == series.len() && same_tail {
                return Ok(rows);
            }
            debug!(
                "Cached feature table for {} does not match its series ({} row(s) vs {}); recomputing",
                instrument,
                rows.len(),
                series.len()
            );
        }

        let rows = features::transform(series)?;
        self.cache
            .set(&key, &rows, self.settings.series_cache_ttl_secs)?;
        Ok(rows)
    }

    /// Writes both tracks or neither. If the recent write fails the
    /// historical entry is removed before the error is returned.
    fn publish_tracks(
        &self,
        instrument: &str,
        horizon_days: usize,
        historical: &[f64],
        recent: &[f64],
    ) -> Result<(), ForecastError> {
        let ttl = self.settings.prediction_cache_ttl_secs;
        let historical_key =
            cache::prediction_key(instrument, TrainingWindow::Historical, horizon_days);
        let recent_key = cache::prediction_key(instrument, TrainingWindow::Recent, horizon_days);

        self.cache.set(&historical_key, historical, ttl)?;
        if let Err(err) = self.cache.set(&recent_key, recent, ttl) {
            if let Err(cleanup) = self.cache.delete(&historical_key) {
                warn!(
                    "Failed to remove {} after partial publish: {}",
                    historical_key, cleanup
                );
            }
            return Err(err);
        }
        Ok(())
    }

    fn read_cached<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ForecastError> {
        match self.cache.get(key) {
            Err(ForecastError::CacheCorruption { key, reason })
                if self.settings.recompute_on_cache_corruption =>
            {
                warn!("Ignoring corrupted cache entry {} ({}); recomputing", key, reason);
                Ok(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::SnapshotHistory;
    use crate::model_store::InMemoryModelStore;
    use chrono::{TimeZone, Utc};

    struct ConstantModel {
        value: f64,
        names: Vec<String>,
    }

    impl RegressionModel for ConstantModel {
        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict(&self, _features: &[f64]) -> anyhow::Result<f64> {
            Ok(self.value)
        }
    }

    struct EchoCloseModel {
        names: Vec<String>,
    }

    impl RegressionModel for EchoCloseModel {
        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict(&self, features: &[f64]) -> anyhow::Result<f64> {
            Ok(features[0] + 1.0)
        }
    }

    fn flat_history(count: usize, close: f64) -> Vec<PricePoint> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|idx| PricePoint {
                date: start + Duration::days(idx as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000.0,
            })
            .collect()
    }

    fn engine_with(models: InMemoryModelStore, history: SnapshotHistory) -> ForecastEngine {
        ForecastEngine::new(
            Arc::new(CacheStore::in_memory()),
            Arc::new(models),
            Arc::new(history),
            ForecastSettings::default(),
        )
    }

    fn constant_pair(sector: Sector, value: f64) -> InMemoryModelStore {
        let store = InMemoryModelStore::new();
        for window in TrainingWindow::all() {
            store.register(
                sector,
                window,
                Arc::new(ConstantModel {
                    value,
                    names: vec!["Close".into(), "RSI".into()],
                }),
            );
        }
        store
    }

    #[test]
    fn volatility_falls_back_to_floor() {
        let rows = features::transform(&flat_history(120, 50.0)).unwrap();
        let state = ForecastState::new(flat_history(120, 50.0), rows, 1);
        assert_eq!(state.volatility(90, 0.01), 0.01);

        let short = flat_history(10, 50.0);
        let rows = features::transform(&short).unwrap();
        let state = ForecastState::new(short, rows, 1);
        assert_eq!(state.volatility(90, 0.25), 0.25);
    }

    #[test]
    fn each_step_appends_one_carried_forward_bar() {
        let series = flat_history(60, 20.0);
        let rows = features::transform(&series).unwrap();
        let mut state = ForecastState::new(series, rows, 3);
        let models = TrackModels {
            historical: Arc::new(ConstantModel {
                value: 25.0,
                names: vec!["Close".into()],
            }),
            recent: Arc::new(ConstantModel {
                value: 15.0,
                names: vec!["Close".into()],
            }),
        };
        let mut noise = NoiseSource::new(Some(4), 1e-12, 2.618).unwrap();
        let settings = ForecastSettings::default();

        for _ in 0..3 {
            state.step(&models, &mut noise, &settings).unwrap();
        }
        assert_eq!(state.steps_taken(), 3);
        assert_eq!(state.series().len(), 63);
        let last = state.series()[62];
        let prior = state.series()[61];
        assert_eq!(last.date - prior.date, Duration::days(1));
        assert_eq!((last.open, last.high, last.low, last.volume), (20.0, 20.0, 20.0, 1_000.0));
        // The appended close comes from the historical track and exceeds High.
        assert!((last.close - 25.0).abs() < 0.05);
        let (historical, recent) = state.into_tracks();
        assert_eq!(historical.last().copied(), Some(last.close));
        assert!(recent.iter().all(|value| (value - 15.0).abs() < 0.05));
    }

    #[test]
    fn seeded_forecasts_are_reproducible() {
        let mut history = SnapshotHistory::default();
        history.insert("MSFT", flat_history(120, 300.0));
        let engine = engine_with(constant_pair(Sector::Tech, 310.0), history);

        let first = engine.forecast("msft", 12, Some(7)).unwrap();
        let second = engine.forecast("MSFT", 12, Some(7)).unwrap();
        assert_eq!(first, second);
        assert_ne!(first.historical, first.recent);
    }

    #[test]
    fn appended_close_feeds_the_next_step() {
        let mut history = SnapshotHistory::default();
        history.insert("JPM", flat_history(60, 100.0));
        let store = InMemoryModelStore::new();
        for window in TrainingWindow::all() {
            store.register(
                Sector::Finance,
                window,
                Arc::new(EchoCloseModel {
                    names: vec!["Close".into()],
                }),
            );
        }
        let engine = engine_with(store, history);

        let forecast = engine.forecast("JPM", 5, Some(1)).unwrap();
        for (idx, value) in forecast.historical.iter().enumerate() {
            let expected = 100.0 + (idx + 1) as f64;
            assert!((value - expected).abs() < 0.1, "step {idx}: {value}");
        }
    }

    #[test]
    fn noise_level_narrows_scale_range() {
        let mut noise = NoiseSource::new(Some(3), 1.0, 1.0).unwrap();
        let draws: Vec<f64> = (0..2_000)
            .map(|_| noise.perturbation(2.0).unwrap())
            .collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / draws.len() as f64;
        assert!(mean.abs() < 0.2, "mean={mean}");
        assert!((var.sqrt() - 2.0).abs() < 0.2, "std={}", var.sqrt());
        assert!(NoiseSource::new(None, 0.0, 1.0).is_err());
    }

    #[test]
    fn cached_forecast_returns_published_tracks() {
        let mut history = SnapshotHistory::default();
        history.insert("PFE", flat_history(80, 40.0));
        let engine = engine_with(constant_pair(Sector::Health, 41.0), history);

        assert!(engine.cached_forecast("PFE", 3).unwrap().is_none());
        let forecast = engine.forecast("PFE", 3, Some(11)).unwrap();
        assert_eq!(engine.cached_forecast("pfe", 3).unwrap(), Some(forecast));
        assert!(engine.cached_forecast("PFE", 4).unwrap().is_none());
    }
}
