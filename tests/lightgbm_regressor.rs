use chrono::{Duration, TimeZone, Utc};
use forecaster::cache::CacheStore;
use forecaster::config::ForecastSettings;
use forecaster::forecast::ForecastEngine;
use forecaster::market_data::{MarketSnapshot, SnapshotHistory};
use forecaster::model_store::{FileModelStore, LightGbmRegressor, RegressionModel};
use forecaster::models::{PricePoint, TrainingWindow};
use forecaster::sectors::Sector;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

fn regression_model_text(base: f64) -> String {
    format!(
        "tree\nversion=v3\nnum_class=1\nnum_tree_per_iteration=1\nlabel_index=0\nmax_feature_idx=2\nobjective=regression\nfeature_names=Close RSI Williams_%R\n\nTree=0\nnum_leaves=2\nsplit_feature=0\nthreshold=1000000000\nleft_child=-1\nright_child=-2\nleaf_value={base} 0\nshrinkage=1\n\nTree=1\nnum_leaves=2\nsplit_feature=1\nthreshold=50\nleft_child=-1\nright_child=-2\nleaf_value=1.5 -1.5\nshrinkage=0.1\n\nend of trees\n"
    )
}

fn build_series(count: usize) -> Vec<PricePoint> {
    let start = Utc
        .with_ymd_and_hms(2021, 1, 4, 0, 0, 0)
        .single()
        .expect("valid start date");

    (0..count)
        .map(|idx| {
            let t = idx as f64;
            let base = 100.0 + t * 0.05;
            let wiggle = (t / 9.0).sin() * 0.8 + (t / 21.0).cos() * 0.3;
            let close = (base + wiggle).max(1.0);
            let open = (close * (1.0 - 0.002)).max(1.0);
            PricePoint {
                date: start + Duration::days(idx as i64),
                open,
                high: close.max(open) * 1.004,
                low: close.min(open) * 0.996,
                close,
                volume: 1_000_000.0 + t,
            }
        })
        .collect()
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("forecaster-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

#[test]
fn regressor_reads_feature_names_and_sums_trees() {
    let model = LightGbmRegressor::from_model_text(&regression_model_text(120.0))
        .expect("parse regression model");
    assert_eq!(model.num_trees(), 2);
    assert_eq!(model.feature_names(), ["Close", "RSI", "Williams_%R"]);
    assert_eq!(model.predict(&[100.0, 30.0, -20.0]).unwrap(), 121.5);
    assert_eq!(model.predict(&[100.0, 70.0, -20.0]).unwrap(), 118.5);
}

#[test]
fn classification_models_are_refused() {
    let text = "objective=binary sigmoid:1\nnum_class=1\nmax_feature_idx=0\nTree=0\nnum_leaves=2\nsplit_feature=0\nthreshold=0.5\nleft_child=-1\nright_child=-2\nleaf_value=0.1 0.2\nshrinkage=1\n";
    assert!(LightGbmRegressor::from_model_text(text).is_err());
}

#[test]
fn file_models_drive_an_end_to_end_forecast() {
    let dir = scratch_dir("e2e");
    let model_dir = dir.join("models");
    fs::create_dir_all(&model_dir).expect("create model dir");
    let store = FileModelStore::new(&model_dir);
    fs::write(
        store.model_path(Sector::Tech, TrainingWindow::Historical),
        regression_model_text(120.0),
    )
    .expect("write historical model");
    fs::write(
        store.model_path(Sector::Tech, TrainingWindow::Recent),
        regression_model_text(80.0),
    )
    .expect("write recent model");

    let mut series = BTreeMap::new();
    series.insert("NVDA".to_string(), build_series(260));
    let snapshot_path = dir.join("market-data.bin");
    MarketSnapshot::new(series)
        .save_to_file(&snapshot_path)
        .expect("save snapshot");

    let engine = ForecastEngine::new(
        Arc::new(CacheStore::in_memory()),
        Arc::new(store),
        Arc::new(SnapshotHistory::load(&snapshot_path).expect("load snapshot")),
        ForecastSettings::default(),
    );
    let forecast = engine.forecast("NVDA", 10, Some(17)).expect("forecast");

    assert_eq!(forecast.historical.len(), 10);
    assert_eq!(forecast.recent.len(), 10);
    // Tree outputs are base +/- 1.5; noise stays well under the trailing volatility.
    for value in &forecast.historical {
        assert!((value - 120.0).abs() < 10.0, "historical={value}");
    }
    for value in &forecast.recent {
        assert!((value - 80.0).abs() < 10.0, "recent={value}");
    }

    let _ = fs::remove_dir_all(&dir);
}
