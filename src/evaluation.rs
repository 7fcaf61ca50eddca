use crate::batch::{feature_matrix, predict_batch, DEFAULT_BATCH_SIZE};
use crate::error::ForecastError;
use crate::model_store::RegressionModel;
use crate::models::FeatureRow;
use serde::Serialize;
use statrs::statistics::Statistics;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvaluationMetrics {
    pub count: usize,
    pub mae: f64,
    pub mse: f64,
    pub r2: f64,
}

/// Mean absolute error, mean squared error and coefficient of
/// determination. A constant target scores r2 = 1 when matched exactly and 0
/// otherwise.
pub fn evaluate_predictions(
    y_true: &[f64],
    y_pred: &[f64],
) -> Result<EvaluationMetrics, ForecastError> {
    if y_true.len() != y_pred.len() {
        return Err(ForecastError::InvalidArgument(format!(
            "target and prediction lengths differ ({} vs {})",
            y_true.len(),
            y_pred.len()
        )));
    }
    if y_true.is_empty() {
        return Err(ForecastError::InsufficientData(
            "cannot evaluate an empty prediction set".to_string(),
        ));
    }

    let errors: Vec<f64> = y_true
        .iter()
        .zip(y_pred)
        .map(|(actual, predicted)| actual - predicted)
        .collect();
    let mae = errors.iter().map(|e| e.abs()).mean();
    let mse = errors.iter().map(|e| e * e).mean();

    let target_mean = y_true.iter().mean();
    let ss_tot: f64 = y_true.iter().map(|y| (y - target_mean).powi(2)).sum();
    let ss_res: f64 = errors.iter().map(|e| e * e).sum();
    let r2 = if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    };

    Ok(EvaluationMetrics {
        count: y_true.len(),
        mae,
        mse,
        r2,
    })
}

/// Predicts close[t + 1] from row t over a feature table and scores it.
pub fn one_step_backtest(
    instrument: &str,
    model: &dyn RegressionModel,
    rows: &[FeatureRow],
) -> Result<EvaluationMetrics, ForecastError> {
    if rows.len() < 2 {
        return Err(ForecastError::InsufficientData(format!(
            "{instrument}: need at least 2 rows for a one-step backtest, found {}",
            rows.len()
        )));
    }

    let inputs = feature_matrix(&rows[..rows.len() - 1], model.feature_names());
    let targets: Vec<f64> = rows[1..].iter().map(|row| row.price.close).collect();
    let predictions = predict_batch(model, &inputs, DEFAULT_BATCH_SIZE)
        .map_err(|err| ForecastError::execution(instrument, 0, err))?;
    evaluate_predictions(&targets, &predictions)
}
