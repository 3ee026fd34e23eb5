//! SHAP attributions for fitted models.
//!
//! Tree ensembles get exact TreeSHAP; any other `Regressor` falls back to
//! permutation sampling against a background set.

pub mod permutation;
pub mod tree_shap;

pub use permutation::PermutationShap;
pub use tree_shap::TreeShap;

use rand::seq::index;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{Matrix, ModelError, Regressor};
use crate::rng::{RngHierarchy, DEFAULT_SEED};

#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("unknown feature '{0}'")]
    UnknownFeature(String),

    #[error("nothing to explain: {0} is empty")]
    Empty(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapMethod {
    Tree,
    Permutation,
}

/// Attribution matrix aligned with the explained rows.
#[derive(Debug, Clone)]
pub struct ShapValues {
    pub method: ShapMethod,
    /// Expected model output the attributions are measured from.
    pub base_value: f64,
    /// `n × m` attributions, same column names as `data`.
    pub values: Matrix,
    /// The explained feature rows.
    pub data: Matrix,
}

impl ShapValues {
    pub fn feature_names(&self) -> &[String] {
        self.values.names()
    }

    /// Mean |φ| per feature, largest first, truncated to `top_k`.
    pub fn global_importance(&self, top_k: Option<usize>) -> Vec<(String, f64)> {
        let n = self.values.n_rows().max(1) as f64;
        let mut out: Vec<(String, f64)> = self
            .feature_names()
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let mean = self.values.column(j).iter().map(|v| v.abs()).sum::<f64>() / n;
                (name.clone(), mean)
            })
            .collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if let Some(k) = top_k {
            out.truncate(k);
        }
        out
    }

    /// `(feature value, φ)` pairs for one feature.
    pub fn dependence(&self, feature: &str) -> Result<Vec<(f64, f64)>, ExplainError> {
        let j = self
            .values
            .column_index(feature)
            .ok_or_else(|| ExplainError::UnknownFeature(feature.to_string()))?;
        Ok(self.data.column(j).into_iter().zip(self.values.column(j)).collect())
    }

    /// `base_value + Σ φ` for one explained row.
    pub fn reconstruct(&self, row: usize) -> f64 {
        self.base_value + self.values.row(row).iter().sum::<f64>()
    }
}

/// Sampling and fallback settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapConfig {
    /// Rows explained (and used as background), sampled without replacement.
    pub background_size: usize,
    /// Background rows for the permutation fallback.
    pub permutation_background: usize,
    pub n_permutations: usize,
    /// Features kept in importance tables.
    pub max_display: usize,
    pub seed: u64,
}

impl Default for ShapConfig {
    fn default() -> Self {
        Self {
            background_size: 500,
            permutation_background: 50,
            n_permutations: 8,
            max_display: 15,
            seed: DEFAULT_SEED,
        }
    }
}

fn sample_rows(x: &Matrix, size: usize, seeds: &RngHierarchy, key: &str) -> Matrix {
    if x.n_rows() <= size {
        return x.clone();
    }
    let mut picked = index::sample(&mut seeds.rng_for("shap", key, 0), x.n_rows(), size).into_vec();
    picked.sort_unstable();
    x.take_rows(&picked)
}

/// Explain `model` on a seeded sample of `x`.
pub fn compute_shap(model: &dyn Regressor, x: &Matrix, config: &ShapConfig) -> Result<ShapValues, ExplainError> {
    let seeds = RngHierarchy::new(config.seed);
    let x = if model.tolerates_missing() || !x.has_missing() {
        x.clone()
    } else {
        let complete: Vec<usize> = (0..x.n_rows())
            .filter(|&i| x.row(i).iter().all(|v| !v.is_nan()))
            .collect();
        warn!(
            model = model.name(),
            dropped = x.n_rows() - complete.len(),
            "rows with missing inputs left out of SHAP"
        );
        x.take_rows(&complete)
    };
    if x.n_rows() == 0 {
        return Err(ExplainError::Empty("feature matrix".into()));
    }
    let sample = sample_rows(&x, config.background_size, &seeds, "sample");

    match model.as_tree_ensemble() {
        Some(ensemble) => {
            info!(model = model.name(), rows = sample.n_rows(), "TreeSHAP");
            TreeShap::new(ensemble).shap_values(&sample)
        }
        None => {
            info!(
                model = model.name(),
                rows = sample.n_rows(),
                "no tree structure, using permutation SHAP"
            );
            let background = sample_rows(&sample, config.permutation_background, &seeds, "background");
            PermutationShap::new(model, background, config.n_permutations, seeds)?.shap_values(&sample)
        }
    }
}
