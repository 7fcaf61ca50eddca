use crate::error::ForecastError;
use crate::models::TrainingWindow;
use crate::sectors::Sector;
use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Pre-trained regression model predicting the next close.
pub trait RegressionModel: Send + Sync {
    /// Feature names in the order `predict` expects them.
    fn feature_names(&self) -> &[String];
    fn predict(&self, features: &[f64]) -> Result<f64>;
}

/// Source of the (sector, window) model pair.
pub trait ModelStore: Send + Sync {
    fn load(
        &self,
        sector: Sector,
        window: TrainingWindow,
    ) -> Result<Arc<dyn RegressionModel>, ForecastError>;
}

#[derive(Debug)]
struct RegressionTree {
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_values: Vec<f64>,
}

impl RegressionTree {
    fn from_lines(lines: &mut std::iter::Peekable<std::str::Lines<'_>>) -> Result<Self> {
        let mut num_leaves: Option<usize> = None;
        let mut split_features = Vec::new();
        let mut thresholds = Vec::new();
        let mut left_child = Vec::new();
        let mut right_child = Vec::new();
        let mut leaf_values = Vec::new();

        while let Some(peeked) = lines.peek() {
            if peeked.starts_with("Tree=") || peeked.starts_with("end of trees") {
                break;
            }
            let Some(raw) = lines.next() else {
                break;
            };
            let line = raw.trim();

            if line.starts_with("num_leaves=") {
                num_leaves = Some(parse_value(line, "num_leaves=")?);
            } else if line.starts_with("split_feature=") {
                split_features = parse_array(line, "split_feature=")?;
            } else if line.starts_with("threshold=") {
                thresholds = parse_array(line, "threshold=")?;
            } else if line.starts_with("left_child=") {
                left_child = parse_array(line, "left_child=")?;
            } else if line.starts_with("right_child=") {
                right_child = parse_array(line, "right_child=")?;
            } else if line.starts_with("leaf_value=") {
                leaf_values = parse_array(line, "leaf_value=")?;
            }
        }

        let internal_nodes = split_features.len();
        if thresholds.len() != internal_nodes
            || left_child.len() != internal_nodes
            || right_child.len() != internal_nodes
        {
            return Err(anyhow!(
                "LightGBM tree definition invalid: split/child/threshold length mismatch"
            ));
        }
        if leaf_values.is_empty() {
            return Err(anyhow!("LightGBM tree has no leaf values"));
        }

        let declared_leaves = num_leaves.unwrap_or(leaf_values.len());
        if declared_leaves != leaf_values.len() {
            return Err(anyhow!(
                "LightGBM tree leaf count mismatch: expected {declared_leaves}, found {}",
                leaf_values.len()
            ));
        }

        Ok(Self {
            split_features,
            thresholds,
            left_child,
            right_child,
            leaf_values,
        })
    }

    /// Walks at most one visit per internal node, so a child index that
    /// points back up the tree is reported instead of looping.
    fn predict(&self, features: &[f64]) -> Result<f64> {
        if self.split_features.is_empty() {
            return Ok(self.leaf_values[0]);
        }

        let mut node_idx = 0usize;
        for _ in 0..self.split_features.len() {
            let feature_idx = self.split_features[node_idx];
            let threshold = self.thresholds[node_idx];
            let feature_value = features.get(feature_idx).copied().unwrap_or(0.0);
            let child = if feature_value <= threshold {
                self.left_child[node_idx]
            } else {
                self.right_child[node_idx]
            };

            if child < 0 {
                let leaf_idx = (-(child as i64) - 1) as usize;
                return self
                    .leaf_values
                    .get(leaf_idx)
                    .copied()
                    .ok_or_else(|| anyhow!("LightGBM tree references missing leaf {leaf_idx}"));
            }

            node_idx = child as usize;
            if node_idx >= self.split_features.len() {
                return Err(anyhow!("LightGBM tree references missing node {node_idx}"));
            }
        }

        Err(anyhow!(
            "LightGBM tree walk did not reach a leaf within {} node(s)",
            self.split_features.len()
        ))
    }
}

/// LightGBM regression booster read from the text model format.
#[derive(Debug)]
pub struct LightGbmRegressor {
    trees: Vec<RegressionTree>,
    feature_names: Vec<String>,
}

impl LightGbmRegressor {
    pub fn from_model_text(text: &str) -> Result<Self> {
        let mut lines = text.lines().peekable();
        let mut trees = Vec::new();
        let mut max_feature_idx: Option<usize> = None;
        let mut feature_names: Vec<String> = Vec::new();

        while let Some(line) = lines.next() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(objective) = trimmed.strip_prefix("objective=") {
                if objective.starts_with("binary")
                    || objective.starts_with("multiclass")
                    || objective.starts_with("lambdarank")
                {
                    return Err(anyhow!(
                        "LightGBM objective {objective} is not a regression objective"
                    ));
                }
            } else if trimmed.starts_with("max_feature_idx=") {
                max_feature_idx = Some(parse_value(trimmed, "max_feature_idx=")?);
            } else if let Some(names) = trimmed.strip_prefix("feature_names=") {
                feature_names = names.split_whitespace().map(str::to_string).collect();
            } else if trimmed.starts_with("Tree=") {
                trees.push(RegressionTree::from_lines(&mut lines)?);
            }
        }

        if trees.is_empty() {
            return Err(anyhow!("LightGBM model contained no trees"));
        }

        let inferred_count = trees
            .iter()
            .flat_map(|tree| tree.split_features.iter())
            .copied()
            .max()
            .map(|idx| idx + 1)
            .unwrap_or(0);
        let feature_count = max_feature_idx
            .map(|idx| idx + 1)
            .unwrap_or(inferred_count)
            .max(inferred_count);

        if feature_names.is_empty() {
            feature_names = (0..feature_count)
                .map(|idx| format!("Column_{idx}"))
                .collect();
        } else if feature_names.len() < feature_count {
            return Err(anyhow!(
                "LightGBM model lists {} feature name(s) but splits on {} feature(s)",
                feature_names.len(),
                feature_count
            ));
        }

        Ok(Self {
            trees,
            feature_names,
        })
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read LightGBM model {}", path.display()))?;
        Self::from_model_text(&text)
            .with_context(|| format!("Failed to parse LightGBM model {}", path.display()))
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }
}

impl RegressionModel for LightGbmRegressor {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.feature_names.len() {
            return Err(anyhow!(
                "LightGBM model expects {} feature(s), but {} were provided",
                self.feature_names.len(),
                features.len()
            ));
        }

        let mut prediction = 0.0;
        for (idx, tree) in self.trees.iter().enumerate() {
            prediction += tree
                .predict(features)
                .with_context(|| format!("tree {idx} is malformed"))?;
        }
        if !prediction.is_finite() {
            return Err(anyhow!("LightGBM model produced a non-finite prediction"));
        }
        Ok(prediction)
    }
}

fn parse_value<T>(line: &str, prefix: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = line
        .strip_prefix(prefix)
        .ok_or_else(|| anyhow!("Expected prefix {prefix}"))?;
    raw.trim().parse::<T>().map_err(|err| {
        anyhow!(
            "Failed to parse value for {prefix} from \"{line}\" while loading LightGBM model: {err}"
        )
    })
}

fn parse_array<T>(line: &str, prefix: &str) -> Result<Vec<T>>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = line
        .strip_prefix(prefix)
        .ok_or_else(|| anyhow!("Expected prefix {prefix}"))?;
    raw.split_whitespace()
        .map(|token| {
            token
                .parse::<T>()
                .map_err(|err| anyhow!("Failed to parse value {token} for {prefix}: {err}"))
        })
        .collect()
}

/// Reads `lgbm_<sector>_<window>.txt` files from a directory and memoizes
/// what it has loaded.
pub struct FileModelStore {
    model_dir: PathBuf,
    loaded: DashMap<(Sector, TrainingWindow), Arc<dyn RegressionModel>>,
}

impl FileModelStore {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            loaded: DashMap::new(),
        }
    }

    pub fn model_path(&self, sector: Sector, window: TrainingWindow) -> PathBuf {
        self.model_dir
            .join(format!("lgbm_{}_{}.txt", sector.as_str(), window.as_str()))
    }
}

impl ModelStore for FileModelStore {
    fn load(
        &self,
        sector: Sector,
        window: TrainingWindow,
    ) -> Result<Arc<dyn RegressionModel>, ForecastError> {
        if let Some(model) = self.loaded.get(&(sector, window)) {
            return Ok(model.value().clone());
        }

        let path = self.model_path(sector, window);
        if !path.exists() {
            return Err(ForecastError::ModelNotFound { sector, window });
        }

        let model: Arc<dyn RegressionModel> =
            Arc::new(LightGbmRegressor::load_from_path(&path).map_err(|source| {
                ForecastError::ModelLoad {
                    sector,
                    window,
                    source,
                }
            })?);
        info!(
            "Loaded {} model for sector {} from {}",
            window,
            sector,
            path.display()
        );
        Ok(self
            .loaded
            .entry((sector, window))
            .or_insert(model)
            .value()
            .clone())
    }
}

/// Registry of already constructed models.
#[derive(Default)]
pub struct InMemoryModelStore {
    models: DashMap<(Sector, TrainingWindow), Arc<dyn RegressionModel>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        sector: Sector,
        window: TrainingWindow,
        model: Arc<dyn RegressionModel>,
    ) {
        debug!("Registered {} model for sector {}", window, sector);
        self.models.insert((sector, window), model);
    }

    pub fn register_model_text(
        &self,
        sector: Sector,
        window: TrainingWindow,
        text: &str,
    ) -> Result<()> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("LightGBM model text was empty."));
        }
        let model = LightGbmRegressor::from_model_text(trimmed)?;
        self.register(sector, window, Arc::new(model));
        Ok(())
    }
}

impl ModelStore for InMemoryModelStore {
    fn load(
        &self,
        sector: Sector,
        window: TrainingWindow,
    ) -> Result<Arc<dyn RegressionModel>, ForecastError> {
        self.models
            .get(&(sector, window))
            .map(|entry| entry.value().clone())
            .ok_or(ForecastError::ModelNotFound { sector, window })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FEATURE_MODEL: &str = "tree\nversion=v3\nobjective=regression\nmax_feature_idx=1\nfeature_names=Close RSI\n\nTree=0\nnum_leaves=2\nsplit_feature=0\nthreshold=100\nleft_child=-1\nright_child=-2\nleaf_value=90 110\nshrinkage=1\n\nTree=1\nnum_leaves=3\nsplit_feature=1 1\nthreshold=30 70\nleft_child=-1 -2\nright_child=1 -3\nleaf_value=-1 0 1\nshrinkage=0.1\n\nend of trees\n";

    #[test]
    fn sums_tree_outputs() {
        let model = LightGbmRegressor::from_model_text(TWO_FEATURE_MODEL).unwrap();
        assert_eq!(model.num_trees(), 2);
        assert_eq!(model.feature_names(), ["Close", "RSI"]);
        assert_eq!(model.predict(&[95.0, 20.0]).unwrap(), 89.0);
        assert_eq!(model.predict(&[105.0, 50.0]).unwrap(), 110.0);
        assert_eq!(model.predict(&[105.0, 80.0]).unwrap(), 111.0);
    }

    #[test]
    fn cyclic_child_index_fails_instead_of_spinning() {
        let text = "tree\nversion=v3\nobjective=regression\nmax_feature_idx=0\nfeature_names=Close\n\nTree=0\nnum_leaves=2\nsplit_feature=0 0\nthreshold=100 50\nleft_child=1 0\nright_child=-1 -2\nleaf_value=5 7\n\nend of trees\n";
        let model = LightGbmRegressor::from_model_text(text).unwrap();
        assert_eq!(model.predict(&[150.0]).unwrap(), 5.0);

        let err = model.predict(&[10.0]).unwrap_err();
        assert!(format!("{err:#}").contains("did not reach a leaf"), "{err:#}");
    }

    #[test]
    fn rejects_wrong_feature_count() {
        let model = LightGbmRegressor::from_model_text(TWO_FEATURE_MODEL).unwrap();
        assert!(model.predict(&[1.0]).is_err());
    }

    #[test]
    fn rejects_classification_objective() {
        let text = TWO_FEATURE_MODEL.replace("objective=regression", "objective=binary sigmoid:1");
        assert!(LightGbmRegressor::from_model_text(&text).is_err());
    }

    #[test]
    fn in_memory_store_reports_missing_models() {
        let store = InMemoryModelStore::new();
        store
            .register_model_text(Sector::Tech, TrainingWindow::Historical, TWO_FEATURE_MODEL)
            .unwrap();
        assert!(store.load(Sector::Tech, TrainingWindow::Historical).is_ok());
        assert!(matches!(
            store.load(Sector::Tech, TrainingWindow::Recent),
            Err(ForecastError::ModelNotFound {
                sector: Sector::Tech,
                window: TrainingWindow::Recent
            })
        ));
    }

    #[test]
    fn file_store_maps_absent_file_to_not_found() {
        let dir = std::env::temp_dir().join(format!("forecaster-models-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let store = FileModelStore::new(&dir);
        fs::write(
            store.model_path(Sector::Health, TrainingWindow::Historical),
            TWO_FEATURE_MODEL,
        )
        .unwrap();
        fs::write(
            store.model_path(Sector::Health, TrainingWindow::Recent),
            "not a model",
        )
        .unwrap();

        let first = store
            .load(Sector::Health, TrainingWindow::Historical)
            .unwrap();
        let second = store
            .load(Sector::Health, TrainingWindow::Historical)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(
            store.load(Sector::Health, TrainingWindow::Recent),
            Err(ForecastError::ModelLoad { .. })
        ));
        assert!(matches!(
            store.load(Sector::Finance, TrainingWindow::Historical),
            Err(ForecastError::ModelNotFound { .. })
        ));

        let _ = fs::remove_dir_all(&dir);
    }
}
