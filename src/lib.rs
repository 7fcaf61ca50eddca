pub mod api;
pub mod batch;
pub mod cache;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod forecast;
pub mod indicators;
pub mod market_data;
pub mod model_store;
pub mod models;
pub mod sectors;

pub use error::ForecastError;
pub use forecast::{ForecastEngine, ForecastOptions};
