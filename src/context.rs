use crate::cache::CacheStore;
use crate::config::ForecastSettings;
use crate::forecast::ForecastEngine;
use crate::market_data::SnapshotHistory;
use crate::model_store::FileModelStore;
use anyhow::{anyhow, Result};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Settings plus the path overrides given on the command line.
#[derive(Clone)]
pub struct AppContext {
    settings: ForecastSettings,
}

impl AppContext {
    pub fn initialize(
        mut settings: ForecastSettings,
        data_file: Option<PathBuf>,
        model_dir: Option<PathBuf>,
    ) -> Self {
        if let Some(path) = data_file {
            settings.market_data_file = path;
        }
        if let Some(path) = model_dir {
            settings.model_dir = path;
        }
        Self { settings }
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    pub fn market_data_file(&self) -> &Path {
        &self.settings.market_data_file
    }

    pub fn model_dir(&self) -> &Path {
        &self.settings.model_dir
    }

    pub fn forecast_engine(&self) -> Result<ForecastEngine> {
        let data_file = self.market_data_file();
        if !data_file.exists() {
            return Err(anyhow!(
                "Market data snapshot not found at {}. Generate it with `import-series` before running this command.",
                data_file.display()
            ));
        }
        let history = SnapshotHistory::load(data_file)?;
        info!(
            "Using market data snapshot from {} and models from {}",
            data_file.display(),
            self.model_dir().display()
        );

        Ok(ForecastEngine::new(
            Arc::new(CacheStore::in_memory()),
            Arc::new(FileModelStore::new(self.model_dir())),
            Arc::new(history),
            self.settings.clone(),
        ))
    }
}
