use crate::models::TrainingWindow;
use crate::sectors::Sector;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("no {window} model available for sector {sector}")]
    ModelNotFound {
        sector: Sector,
        window: TrainingWindow,
    },

    #[error("failed to load {window} model for sector {sector}: {source:#}")]
    ModelLoad {
        sector: Sector,
        window: TrainingWindow,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid price series: {0}")]
    InvalidSeries(String),

    #[error("corrupted cache entry {key}: {reason}")]
    CacheCorruption { key: String, reason: String },

    #[error("cache backend failure for {key}: {source:#}")]
    CacheUnavailable {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("forecast for {instrument} failed at step {step}: {source:#}")]
    ForecastExecution {
        instrument: String,
        step: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl ForecastError {
    pub fn execution(instrument: &str, step: usize, source: anyhow::Error) -> Self {
        ForecastError::ForecastExecution {
            instrument: instrument.to_string(),
            step,
            source,
        }
    }

    /// HTTP-style status the request layer reports for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            ForecastError::InvalidArgument(_) => 400,
            ForecastError::UnknownInstrument(_) | ForecastError::ModelNotFound { .. } => 404,
            ForecastError::InsufficientData(_)
            | ForecastError::ModelLoad { .. }
            | ForecastError::InvalidSeries(_)
            | ForecastError::CacheCorruption { .. }
            | ForecastError::CacheUnavailable { .. }
            | ForecastError::ForecastExecution { .. } => 500,
        }
    }
}
