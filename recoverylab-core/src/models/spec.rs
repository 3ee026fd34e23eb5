//! Serializable model descriptions.

use serde::{Deserialize, Serialize};

use super::{
    ArimaOrder, ArimaxSpec, GbmOverrides, GbmParams, GradientBoosting, LstmParams, OlsRegressor,
    Regressor, SeasonalOrder,
};

fn default_exog() -> Vec<String> {
    vec![
        "log_gdp_lag1".into(),
        "policy_stringency_lag1".into(),
        "covid_cases_lag1".into(),
    ]
}

/// One model of an experiment.
///
/// ```toml
/// [[models]]
/// kind = "lgbm"
/// per_region = true
/// params = { n_estimators = 300 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    Ols,
    Arimax {
        #[serde(default)]
        order: ArimaOrder,
        #[serde(default = "default_exog")]
        exog: Vec<String>,
    },
    Sarimax {
        #[serde(default)]
        order: ArimaOrder,
        #[serde(default)]
        seasonal: SeasonalOrder,
        #[serde(default = "default_exog")]
        exog: Vec<String>,
    },
    Xgb {
        #[serde(default)]
        params: GbmOverrides,
    },
    Lgbm {
        #[serde(default)]
        params: GbmOverrides,
        /// One model per region instead of a global one.
        #[serde(default)]
        per_region: bool,
    },
    Lstm {
        #[serde(default)]
        params: LstmParams,
    },
}

impl ModelSpec {
    /// Name used in prediction columns (`yhat_{name}`) and reports.
    pub fn name(&self) -> &'static str {
        match self {
            ModelSpec::Ols => "ols",
            ModelSpec::Arimax { .. } => "arimax",
            ModelSpec::Sarimax { .. } => "sarimax",
            ModelSpec::Xgb { .. } => "xgb",
            ModelSpec::Lgbm { per_region: false, .. } => "lgbm",
            ModelSpec::Lgbm { per_region: true, .. } => "lgbm_region",
            ModelSpec::Lstm { .. } => "lstm",
        }
    }

    pub fn is_per_region(&self) -> bool {
        matches!(
            self,
            ModelSpec::Arimax { .. } | ModelSpec::Sarimax { .. } | ModelSpec::Lgbm { per_region: true, .. }
        )
    }

    pub fn gbm_params(&self) -> Option<GbmParams> {
        match self {
            ModelSpec::Xgb { params } => Some(params.apply(GbmParams::xgboost())),
            ModelSpec::Lgbm { params, .. } => Some(params.apply(GbmParams::lightgbm())),
            _ => None,
        }
    }

    /// A fresh tabular regressor, for the models that are one.
    pub fn build_regressor(&self) -> Option<Box<dyn Regressor>> {
        match self {
            ModelSpec::Ols => Some(Box::new(OlsRegressor::new())),
            ModelSpec::Xgb { .. } | ModelSpec::Lgbm { .. } => {
                let params = self.gbm_params()?;
                Some(Box::new(GradientBoosting::new(self.name(), params)))
            }
            _ => None,
        }
    }

    pub fn arimax(&self) -> Option<(ArimaxSpec, &[String])> {
        match self {
            ModelSpec::Arimax { order, exog } => Some((
                ArimaxSpec {
                    order: *order,
                    seasonal: None,
                    intercept: true,
                },
                exog,
            )),
            ModelSpec::Sarimax { order, seasonal, exog } => Some((
                ArimaxSpec {
                    order: *order,
                    seasonal: Some(*seasonal),
                    intercept: true,
                },
                exog,
            )),
            _ => None,
        }
    }
}
