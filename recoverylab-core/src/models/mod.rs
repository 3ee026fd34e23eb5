//! Regression models for monthly demand.
//!
//! - `ols`: least squares with coefficient inference
//! - `arimax`: (seasonal) ARIMA with exogenous regressors, per region
//! - `tree` / `gbm`: histogram gradient boosting, XGBoost- and LightGBM-style
//! - `lstm`: recurrent regressor over monthly windows
//!
//! Tabular models implement `Regressor`; `Pipeline` puts a `Preprocessor` in
//! front of one so it can be fed panel rows directly.

pub mod arimax;
pub mod gbm;
pub mod lstm;
pub mod matrix;
pub mod ols;
pub mod pipeline;
pub mod preprocess;
pub mod spec;
pub mod tree;

pub use arimax::{select_order, ArimaOrder, ArimaxModel, ArimaxSpec, SeasonalOrder};
pub use gbm::{GbmOverrides, GbmParams, GradientBoosting};
pub use lstm::{build_windows, LstmParams, LstmRegressor, Window};
pub use matrix::Matrix;
pub use ols::{fit_ols, OlsFit, OlsRegressor};
pub use pipeline::Pipeline;
pub use preprocess::{complete_rows, Categorical, DesignSpec, Preprocessor};
pub use spec::ModelSpec;
pub use tree::{Node, Split, Tree, TreeEnsemble};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("feature layout differs from training: expected {expected} columns, got {got}")]
    FeatureMismatch { expected: usize, got: usize },

    #[error("{model}: need at least {needed} observations, got {got}")]
    InsufficientData {
        model: String,
        needed: usize,
        got: usize,
    },

    #[error("{model}: input contains missing values")]
    MissingValues { model: String },

    #[error("model not fitted")]
    NotFitted,

    #[error("linear algebra failure: {0}")]
    Numerical(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unknown column '{0}'")]
    UnknownColumn(String),
}

/// A tabular regressor.
pub trait Regressor: Send + Sync {
    fn name(&self) -> &str;

    fn fit(&mut self, x: &Matrix, y: &[f64]) -> Result<(), ModelError>;

    fn predict(&self, x: &Matrix) -> Result<Vec<f64>, ModelError>;

    /// Whether `fit`/`predict` accept `NaN` inputs.
    fn tolerates_missing(&self) -> bool {
        false
    }

    /// The fitted tree ensemble, for exact TreeSHAP.
    fn as_tree_ensemble(&self) -> Option<&TreeEnsemble> {
        None
    }

    /// The coefficient table of a linear model.
    fn ols_fit(&self) -> Option<&OlsFit> {
        None
    }

    /// Per-feature importance, when the model defines one.
    fn feature_importance(&self) -> Option<Vec<(String, f64)>> {
        None
    }
}

pub(crate) fn check_target(model: &str, x: &Matrix, y: &[f64]) -> Result<(), ModelError> {
    if x.n_rows() != y.len() {
        return Err(ModelError::DimensionMismatch {
            expected: x.n_rows(),
            got: y.len(),
        });
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::MissingValues {
            model: model.to_string(),
        });
    }
    Ok(())
}
