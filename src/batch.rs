use crate::error::ForecastError;
use crate::forecast::{ForecastEngine, ForecastOptions};
use crate::model_store::RegressionModel;
use crate::models::{FeatureRow, Forecast};
use anyhow::Result;
use log::debug;
use rayon::prelude::*;

pub const DEFAULT_BATCH_SIZE: usize = 2_000;

/// Scores independent inputs in parallel chunks. Output order matches
/// `inputs`.
pub fn predict_batch(
    model: &dyn RegressionModel,
    inputs: &[Vec<f64>],
    batch_size: usize,
) -> Result<Vec<f64>> {
    let batch_size = batch_size.max(1);
    debug!(
        "Scoring {} input(s) in batches of {}",
        inputs.len(),
        batch_size
    );
    let chunks = inputs
        .par_chunks(batch_size)
        .map(|chunk| {
            chunk
                .iter()
                .map(|row| model.predict(row))
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;
    Ok(chunks.into_iter().flatten().collect())
}

/// One input vector per row, ordered by the model's feature names.
pub fn feature_matrix<S: AsRef<str>>(rows: &[FeatureRow], feature_names: &[S]) -> Vec<Vec<f64>> {
    rows.iter()
        .map(|row| row.to_input_vector(feature_names))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ForecastJob {
    pub instrument: String,
    pub options: ForecastOptions,
}

/// Runs unrelated forecasts on the rayon pool. Each job owns its own
/// state; only the cache is shared. `on_done` fires once per finished job.
pub fn forecast_many<F>(
    engine: &ForecastEngine,
    jobs: &[ForecastJob],
    on_done: F,
) -> Vec<(String, Result<Forecast, ForecastError>)>
where
    F: Fn() + Sync,
{
    jobs.par_iter()
        .map(|job| {
            let result = engine.forecast_with(&job.instrument, &job.options);
            on_done();
            (job.instrument.clone(), result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SumModel {
        names: Vec<String>,
    }

    impl RegressionModel for SumModel {
        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict(&self, features: &[f64]) -> Result<f64> {
            if features.iter().any(|value| *value < 0.0) {
                anyhow::bail!("negative feature");
            }
            Ok(features.iter().sum())
        }
    }

    #[test]
    fn batches_preserve_input_order() {
        let model = SumModel {
            names: vec!["a".into(), "b".into()],
        };
        let inputs: Vec<Vec<f64>> = (0..5_001).map(|i| vec![i as f64, 1.0]).collect();
        let outputs = predict_batch(&model, &inputs, 7).unwrap();
        assert_eq!(outputs.len(), inputs.len());
        for (i, value) in outputs.iter().enumerate() {
            assert_eq!(*value, i as f64 + 1.0);
        }
        assert!(predict_batch(&model, &[], DEFAULT_BATCH_SIZE)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn a_failing_row_fails_the_batch() {
        let model = SumModel {
            names: vec!["a".into()],
        };
        let inputs = vec![vec![1.0], vec![-1.0], vec![2.0]];
        assert!(predict_batch(&model, &inputs, 1).is_err());
    }
}
