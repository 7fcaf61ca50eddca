use crate::error::ForecastError;
use crate::forecast::{validate_horizon, ForecastEngine, ForecastOptions, DEFAULT_HORIZON_DAYS};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_horizon_days() -> usize {
    DEFAULT_HORIZON_DAYS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastRequest {
    pub instrument_id: String,
    #[serde(default = "default_horizon_days")]
    pub horizon_days: usize,
    #[serde(default)]
    pub noise_level: Option<f64>,
    #[serde(default)]
    pub noise_seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResponse {
    pub instrument_id: String,
    pub historical_predictions: Vec<f64>,
    pub recent_predictions: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub status: u16,
    pub error: String,
}

impl From<ForecastError> for ApiError {
    fn from(err: ForecastError) -> Self {
        Self {
            status: err.status_code(),
            error: err.to_string(),
        }
    }
}

impl ForecastRequest {
    pub fn validate(&self) -> Result<ForecastOptions, ForecastError> {
        if self.instrument_id.trim().is_empty() {
            return Err(ForecastError::InvalidArgument(
                "instrumentId must not be empty".to_string(),
            ));
        }
        validate_horizon(self.horizon_days)?;
        if let Some(level) = self.noise_level {
            if !(0.0..=1.0).contains(&level) {
                return Err(ForecastError::InvalidArgument(format!(
                    "noiseLevel must be between 0 and 1 (value: {level})"
                )));
            }
        }
        Ok(ForecastOptions {
            horizon_days: self.horizon_days,
            noise_seed: self.noise_seed,
            noise_level: self.noise_level,
        })
    }
}

pub fn handle_forecast(
    engine: &ForecastEngine,
    request: &ForecastRequest,
) -> Result<ForecastResponse, ApiError> {
    let outcome = request
        .validate()
        .and_then(|options| engine.forecast_with(&request.instrument_id, &options));

    match outcome {
        Ok(forecast) => {
            info!(
                "Returning {} step(s) for {}",
                forecast.horizon_days, forecast.instrument
            );
            Ok(ForecastResponse {
                instrument_id: forecast.instrument,
                historical_predictions: forecast.historical,
                recent_predictions: forecast.recent,
            })
        }
        Err(err) => {
            let api_error = ApiError::from(err);
            if api_error.status >= 500 {
                error!(
                    "Forecast request for {} failed: {}",
                    request.instrument_id, api_error.error
                );
            } else {
                warn!(
                    "Forecast request for {} rejected ({}): {}",
                    request.instrument_id, api_error.status, api_error.error
                );
            }
            Err(api_error)
        }
    }
}

/// Runs the blocking forecast off the async executor and gives up after
/// `REQUEST_TIMEOUT_SECS`. The worker is not cancelled on timeout; its
/// result is dropped.
pub async fn handle_forecast_with_timeout(
    engine: ForecastEngine,
    request: ForecastRequest,
) -> Result<ForecastResponse, ApiError> {
    let timeout = Duration::from_secs(engine.settings().request_timeout_secs);
    let instrument = request.instrument_id.clone();
    let task = tokio::task::spawn_blocking(move || handle_forecast(&engine, &request));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            error!("Forecast worker for {} panicked: {}", instrument, join_err);
            Err(ApiError {
                status: 500,
                error: format!("forecast worker failed: {join_err}"),
            })
        }
        Err(_) => {
            warn!(
                "Forecast request for {} timed out after {:?}",
                instrument, timeout
            );
            Err(ApiError {
                status: 504,
                error: format!("forecast timed out after {}s", timeout.as_secs()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::config::ForecastSettings;
    use crate::market_data::SnapshotHistory;
    use crate::model_store::{InMemoryModelStore, RegressionModel};
    use crate::models::{PricePoint, TrainingWindow};
    use crate::sectors::Sector;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Arc;

    struct Constant(Vec<String>);

    impl RegressionModel for Constant {
        fn feature_names(&self) -> &[String] {
            &self.0
        }

        fn predict(&self, _features: &[f64]) -> anyhow::Result<f64> {
            Ok(25.0)
        }
    }

    fn engine() -> ForecastEngine {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let series: Vec<PricePoint> = (0..100)
            .map(|idx| PricePoint {
                date: start + ChronoDuration::days(idx),
                open: 25.0,
                high: 25.0,
                low: 25.0,
                close: 25.0,
                volume: 10.0,
            })
            .collect();
        let mut history = SnapshotHistory::default();
        history.insert("AAPL", series);

        let models = InMemoryModelStore::new();
        for window in TrainingWindow::all() {
            models.register(
                Sector::Tech,
                window,
                Arc::new(Constant(vec!["Close".to_string()])),
            );
        }

        ForecastEngine::new(
            Arc::new(CacheStore::in_memory()),
            Arc::new(models),
            Arc::new(history),
            ForecastSettings::default(),
        )
    }

    #[test]
    fn request_defaults_and_camel_case_names() {
        let request: ForecastRequest =
            serde_json::from_str(r#"{"instrumentId":"AAPL","noiseLevel":0.5}"#).unwrap();
        assert_eq!(request.horizon_days, 30);
        assert_eq!(request.noise_level, Some(0.5));

        let response = ForecastResponse {
            instrument_id: "AAPL".into(),
            historical_predictions: vec![1.0],
            recent_predictions: vec![2.0],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("historicalPredictions").is_some());
        assert!(json.get("recentPredictions").is_some());
    }

    #[test]
    fn status_codes_reach_the_caller() {
        let engine = engine();
        let request = |id: &str, horizon: usize, noise: Option<f64>| ForecastRequest {
            instrument_id: id.to_string(),
            horizon_days: horizon,
            noise_level: noise,
            noise_seed: Some(1),
        };

        assert_eq!(handle_forecast(&engine, &request("AAPL", 0, None)).unwrap_err().status, 400);
        assert_eq!(handle_forecast(&engine, &request("AAPL", 181, None)).unwrap_err().status, 400);
        assert_eq!(handle_forecast(&engine, &request("AAPL", 5, Some(1.5))).unwrap_err().status, 400);
        assert_eq!(handle_forecast(&engine, &request(" ", 5, None)).unwrap_err().status, 400);
        assert_eq!(handle_forecast(&engine, &request("ZZZZ", 5, None)).unwrap_err().status, 404);
        assert_eq!(handle_forecast(&engine, &request("JPM", 5, None)).unwrap_err().status, 404);
        // Known instrument, model present, but no stored history.
        assert_eq!(handle_forecast(&engine, &request("MSFT", 5, None)).unwrap_err().status, 500);

        let response = handle_forecast(&engine, &request("aapl", 5, Some(0.25))).unwrap();
        assert_eq!(response.instrument_id, "AAPL");
        assert_eq!(response.historical_predictions.len(), 5);
        assert_eq!(response.recent_predictions.len(), 5);
    }

    #[tokio::test]
    async fn async_boundary_returns_the_forecast() {
        let request = ForecastRequest {
            instrument_id: "AAPL".into(),
            horizon_days: 3,
            noise_level: None,
            noise_seed: Some(9),
        };
        let response = handle_forecast_with_timeout(engine(), request).await.unwrap();
        assert_eq!(response.historical_predictions.len(), 3);
        for value in &response.historical_predictions {
            assert!((value - 25.0).abs() < 0.05);
        }
    }
}
