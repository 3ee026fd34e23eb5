//! Gradient boosting on histogram trees (squared error).

use rand::seq::index;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tree::{BinMapper, GrowContext, TreeParams, MAX_BINS};
use super::{check_target, Matrix, ModelError, Regressor, TreeEnsemble};
use crate::rng::{RngHierarchy, DEFAULT_SEED};

/// Boosting hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GbmParams {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Shrinkage applied to every leaf
    pub learning_rate: f64,
    /// Depth limit; `None` grows until the leaf limit or no positive gain
    pub max_depth: Option<usize>,
    /// Leaf limit per tree; `None` means unbounded
    pub num_leaves: Option<usize>,
    /// L2 regularisation on leaf weights
    pub lambda: f64,
    /// Minimum hessian sum in a child
    pub min_child_weight: f64,
    /// Minimum number of rows in a child
    pub min_child_samples: usize,
    pub min_split_gain: f64,
    /// Row fraction sampled per tree
    pub subsample: f64,
    /// Feature fraction sampled per tree
    pub colsample_bytree: f64,
    pub max_bins: usize,
    pub seed: u64,
}

impl GbmParams {
    /// XGBoost-style preset: depth-limited trees.
    pub fn xgboost() -> Self {
        Self {
            n_estimators: 800,
            learning_rate: 0.05,
            max_depth: Some(6),
            num_leaves: None,
            lambda: 1.0,
            min_child_weight: 1.0,
            min_child_samples: 1,
            min_split_gain: 0.0,
            subsample: 0.9,
            colsample_bytree: 0.9,
            max_bins: MAX_BINS,
            seed: DEFAULT_SEED,
        }
    }

    /// LightGBM-style preset: leaf-wise trees with a leaf budget.
    pub fn lightgbm() -> Self {
        Self {
            n_estimators: 800,
            learning_rate: 0.03,
            max_depth: None,
            num_leaves: Some(31),
            lambda: 0.0,
            min_child_weight: 1e-3,
            min_child_samples: 20,
            min_split_gain: 0.0,
            subsample: 0.9,
            colsample_bytree: 0.9,
            max_bins: MAX_BINS,
            seed: DEFAULT_SEED,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let bad = |msg: &str| Err(ModelError::InvalidParameter(msg.to_string()));
        if self.n_estimators == 0 {
            return bad("n_estimators must be positive");
        }
        if !(self.learning_rate > 0.0) {
            return bad("learning_rate must be positive");
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return bad("subsample must be in (0, 1]");
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return bad("colsample_bytree must be in (0, 1]");
        }
        if self.lambda < 0.0 {
            return bad("lambda must be non-negative");
        }
        if self.num_leaves.is_some_and(|l| l < 2) {
            return bad("num_leaves must be at least 2");
        }
        Ok(())
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            max_leaves: self.num_leaves,
            lambda: self.lambda,
            min_child_weight: self.min_child_weight,
            min_child_samples: self.min_child_samples,
            min_split_gain: self.min_split_gain,
        }
    }
}

/// Optional overrides on top of a preset, as read from an experiment file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GbmOverrides {
    pub n_estimators: Option<usize>,
    pub learning_rate: Option<f64>,
    pub max_depth: Option<usize>,
    pub num_leaves: Option<usize>,
    pub lambda: Option<f64>,
    pub min_child_weight: Option<f64>,
    pub min_child_samples: Option<usize>,
    pub subsample: Option<f64>,
    pub colsample_bytree: Option<f64>,
    pub seed: Option<u64>,
}

impl GbmOverrides {
    pub fn apply(&self, mut base: GbmParams) -> GbmParams {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field { base.$field = v; })*
            };
        }
        set!(
            n_estimators,
            learning_rate,
            lambda,
            min_child_weight,
            min_child_samples,
            subsample,
            colsample_bytree,
            seed
        );
        if self.max_depth.is_some() {
            base.max_depth = self.max_depth;
        }
        if self.num_leaves.is_some() {
            base.num_leaves = self.num_leaves;
        }
        base
    }
}

/// Boosted regression trees. Missing inputs are routed by the default
/// direction each split learned.
#[derive(Debug, Clone)]
pub struct GradientBoosting {
    name: String,
    params: GbmParams,
    ensemble: Option<TreeEnsemble>,
}

impl GradientBoosting {
    pub fn new(name: impl Into<String>, params: GbmParams) -> Self {
        Self {
            name: name.into(),
            params,
            ensemble: None,
        }
    }

    pub fn params(&self) -> &GbmParams {
        &self.params
    }

    pub fn ensemble(&self) -> Option<&TreeEnsemble> {
        self.ensemble.as_ref()
    }
}

fn sample_sorted(rng: &mut rand::rngs::StdRng, n: usize, fraction: f64) -> Vec<usize> {
    let k = ((fraction * n as f64).round() as usize).clamp(1, n);
    if k == n {
        return (0..n).collect();
    }
    let mut picked = index::sample(rng, n, k).into_vec();
    picked.sort_unstable();
    picked
}

impl Regressor for GradientBoosting {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&mut self, x: &Matrix, y: &[f64]) -> Result<(), ModelError> {
        self.params.validate()?;
        check_target(&self.name, x, y)?;
        let n = x.n_rows();
        if n < 2 {
            return Err(ModelError::InsufficientData {
                model: self.name.clone(),
                needed: 2,
                got: n,
            });
        }
        if x.n_cols() == 0 {
            return Err(ModelError::InvalidParameter(format!(
                "{}: design matrix has no features",
                self.name
            )));
        }

        let mapper = BinMapper::fit(x, self.params.max_bins);
        let binned = mapper.transform(x);
        let tree_params = self.params.tree_params();
        let seeds = RngHierarchy::new(self.params.seed);

        let base_score = y.iter().sum::<f64>() / n as f64;
        let mut pred = vec![base_score; n];
        let mut grad = vec![0.0; n];
        let hess = vec![1.0; n];
        let mut trees = Vec::with_capacity(self.params.n_estimators);

        for round in 0..self.params.n_estimators {
            for i in 0..n {
                grad[i] = pred[i] - y[i];
            }
            let mut rng = seeds.rng_for("gbm", &self.name, round as u64);
            let rows: Vec<u32> = sample_sorted(&mut rng, n, self.params.subsample)
                .into_iter()
                .map(|r| r as u32)
                .collect();
            let features = sample_sorted(&mut rng, x.n_cols(), self.params.colsample_bytree);

            let tree = GrowContext {
                binned: &binned,
                mapper: &mapper,
                grad: &grad,
                hess: &hess,
                features: &features,
                params: &tree_params,
                learning_rate: self.params.learning_rate,
            }
            .grow(rows);
            for (i, p) in pred.iter_mut().enumerate() {
                *p += tree.predict_row(x.row(i));
            }
            trees.push(tree);
        }

        let train_mse = pred.iter().zip(y).map(|(p, t)| (p - t).powi(2)).sum::<f64>() / n as f64;
        debug!(model = %self.name, trees = trees.len(), rows = n, train_mse, "boosting finished");

        self.ensemble = Some(TreeEnsemble {
            base_score,
            trees,
            feature_names: x.names().to_vec(),
        });
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> Result<Vec<f64>, ModelError> {
        self.ensemble.as_ref().ok_or(ModelError::NotFitted)?.predict(x)
    }

    fn tolerates_missing(&self) -> bool {
        true
    }

    fn as_tree_ensemble(&self) -> Option<&TreeEnsemble> {
        self.ensemble.as_ref()
    }

    fn feature_importance(&self) -> Option<Vec<(String, f64)>> {
        let ens = self.ensemble.as_ref()?;
        Some(ens.feature_names.iter().cloned().zip(ens.gain_importance()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy(n: usize) -> (Matrix, Vec<f64>) {
        let a: Vec<f64> = (0..n).map(|i| (i % 10) as f64).collect();
        let b: Vec<f64> = (0..n).map(|i| ((i * 7) % 13) as f64).collect();
        let y = a.iter().zip(&b).map(|(a, b)| 2.0 * a + if *b > 6.0 { 5.0 } else { 0.0 }).collect();
        (Matrix::from_columns(vec!["a".into(), "b".into()], &[a, b]).unwrap(), y)
    }

    fn small(base: GbmParams) -> GbmParams {
        GbmParams {
            n_estimators: 60,
            learning_rate: 0.3,
            ..base
        }
    }

    #[test]
    fn presets_match_documented_defaults() {
        let xgb = GbmParams::xgboost();
        assert_eq!((xgb.n_estimators, xgb.max_depth, xgb.seed), (800, Some(6), 42));
        let lgbm = GbmParams::lightgbm();
        assert_eq!((lgbm.num_leaves, lgbm.max_depth), (Some(31), None));
        assert_eq!(lgbm.learning_rate, 0.03);
    }

    #[test]
    fn overrides_apply_only_set_fields() {
        let o: GbmOverrides = serde_json::from_str(r#"{"n_estimators": 10, "max_depth": 3}"#).unwrap();
        let p = o.apply(GbmParams::xgboost());
        assert_eq!(p.n_estimators, 10);
        assert_eq!(p.max_depth, Some(3));
        assert_eq!(p.learning_rate, 0.05);
    }

    #[test]
    fn learns_signal_and_is_deterministic() {
        let (x, y) = toy(200);
        let mut m1 = GradientBoosting::new("xgb", small(GbmParams::xgboost()));
        m1.fit(&x, &y).unwrap();
        let p1 = m1.predict(&x).unwrap();
        let mse = p1.iter().zip(&y).map(|(p, t)| (p - t).powi(2)).sum::<f64>() / 200.0;
        let var = {
            let mean = y.iter().sum::<f64>() / 200.0;
            y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 200.0
        };
        assert!(mse < 0.05 * var, "mse {mse} vs var {var}");

        let mut m2 = GradientBoosting::new("xgb", small(GbmParams::xgboost()));
        m2.fit(&x, &y).unwrap();
        assert_eq!(p1, m2.predict(&x).unwrap());
    }

    #[test]
    fn leafwise_preset_respects_leaf_budget() {
        let (x, y) = toy(200);
        let params = GbmParams {
            num_leaves: Some(4),
            min_child_samples: 5,
            ..small(GbmParams::lightgbm())
        };
        let mut model = GradientBoosting::new("lgbm", params);
        model.fit(&x, &y).unwrap();
        let ens = model.as_tree_ensemble().unwrap();
        assert!(ens.trees.iter().all(|t| t.leaf_count() <= 4));
    }

    #[test]
    fn tolerates_missing_inputs() {
        let (mut x, y) = toy(100);
        for i in (0..100).step_by(9) {
            x.set(i, 0, f64::NAN);
        }
        let mut model = GradientBoosting::new("xgb", small(GbmParams::xgboost()));
        model.fit(&x, &y).unwrap();
        assert!(model.predict(&x).unwrap().iter().all(|p| p.is_finite()));
        let imp = model.feature_importance().unwrap();
        assert!(imp.iter().all(|(_, g)| *g >= 0.0));
    }

    #[test]
    fn invalid_params_rejected() {
        let (x, y) = toy(20);
        let mut model = GradientBoosting::new(
            "xgb",
            GbmParams {
                subsample: 0.0,
                ..GbmParams::xgboost()
            },
        );
        assert!(matches!(model.fit(&x, &y), Err(ModelError::InvalidParameter(_))));
    }
}
