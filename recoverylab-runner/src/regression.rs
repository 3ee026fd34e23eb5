//! Pooled panel regression with optional region fixed effects.
//!
//! Interpretation, not forecasting: the coefficient table says how the
//! target co-moves with each regressor once region levels are absorbed.

use serde::{Deserialize, Serialize};
use tracing::info;

use recoverylab_core::domain::{Panel, Region};
use recoverylab_core::models::{complete_rows, fit_ols, Matrix, ModelError, OlsFit};

use crate::metrics::nan_as_null;

/// One row of a coefficient table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub name: String,
    #[serde(with = "nan_as_null")]
    pub estimate: f64,
    #[serde(with = "nan_as_null")]
    pub std_error: f64,
    #[serde(with = "nan_as_null")]
    pub t_value: f64,
    #[serde(with = "nan_as_null")]
    pub p_value: f64,
}

/// Coefficient table plus fit statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTable {
    pub y: String,
    pub coefficients: Vec<Coefficient>,
    #[serde(with = "nan_as_null")]
    pub r_squared: f64,
    #[serde(with = "nan_as_null")]
    pub adj_r_squared: f64,
    #[serde(with = "nan_as_null")]
    pub aic: f64,
    #[serde(with = "nan_as_null")]
    pub bic: f64,
    pub n_obs: usize,
    /// Region absorbed into the intercept, when fixed effects are on.
    pub base_region: Option<Region>,
}

impl RegressionTable {
    pub fn from_fit(y: &str, fit: &OlsFit, base_region: Option<Region>) -> Self {
        Self {
            y: y.to_string(),
            coefficients: coefficient_table(fit),
            r_squared: fit.r_squared,
            adj_r_squared: fit.adj_r_squared,
            aic: fit.aic,
            bic: fit.bic,
            n_obs: fit.n_obs,
            base_region,
        }
    }

    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }
}

pub fn coefficient_table(fit: &OlsFit) -> Vec<Coefficient> {
    (0..fit.names.len())
        .map(|i| Coefficient {
            name: fit.names[i].clone(),
            estimate: fit.coefficients[i],
            std_error: fit.std_errors[i],
            t_value: fit.t_values[i],
            p_value: fit.p_values[i],
        })
        .collect()
}

/// Regress `y` on `x_vars` with an intercept, over the rows where all of
/// them are present. With `fixed_effects`, one dummy `region_{code}` per
/// region except the first (in sorted order) is added.
pub fn run_panel_regression(
    panel: &Panel,
    y: &str,
    x_vars: &[String],
    fixed_effects: bool,
) -> Result<RegressionTable, ModelError> {
    let mut required = vec![y.to_string()];
    required.extend(x_vars.iter().cloned());
    let all: Vec<usize> = (0..panel.len()).collect();
    let rows = complete_rows(panel, &all, &required)?;

    let mut names = x_vars.to_vec();
    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(x_vars.len());
    for name in x_vars {
        let values = panel
            .column(name)
            .ok_or_else(|| ModelError::UnknownColumn(name.clone()))?;
        columns.push(rows.iter().map(|&r| values[r]).collect());
    }

    let mut base_region = None;
    if fixed_effects {
        let mut regions: Vec<&Region> = rows.iter().map(|&r| &panel.key(r).region).collect();
        regions.sort();
        regions.dedup();
        if let Some((first, rest)) = regions.split_first() {
            base_region = Some((*first).clone());
            for region in rest {
                names.push(format!("region_{region}"));
                columns.push(
                    rows.iter()
                        .map(|&r| f64::from(u8::from(&panel.key(r).region == *region)))
                        .collect(),
                );
            }
        }
    }

    let target = panel
        .column(y)
        .ok_or_else(|| ModelError::UnknownColumn(y.to_string()))?;
    let y_values: Vec<f64> = rows.iter().map(|&r| target[r]).collect();
    let x = if columns.is_empty() {
        Matrix::zeros(rows.len(), Vec::new())
    } else {
        Matrix::from_columns(names, &columns)?
    };
    let fit = fit_ols(&x, &y_values, true)?;
    info!(
        y,
        n_obs = fit.n_obs,
        r_squared = fit.r_squared,
        fixed_effects,
        "panel regression fitted"
    );
    Ok(RegressionTable::from_fit(y, &fit, base_region))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recoverylab_core::domain::{DuplicatePolicy, Month, PanelKey};

    /// y = region level + 2x, exactly.
    fn panel() -> Panel {
        let mut rows = Vec::new();
        for (region, level) in [("DE", 1.0), ("FR", 5.0), ("IT", -2.0)] {
            for t in 0..12u32 {
                let x = f64::from((t * 7) % 5);
                let y = if region == "FR" && t == 3 { f64::NAN } else { level + 2.0 * x };
                let key = PanelKey::new(Region::parse(region).unwrap(), Month::new(2021, t + 1).unwrap());
                rows.push((key, vec![y, x]));
            }
        }
        Panel::from_rows(vec!["y".into(), "x".into()], rows, DuplicatePolicy::Reject).unwrap()
    }

    #[test]
    fn fixed_effects_recover_region_levels() {
        let table = run_panel_regression(&panel(), "y", &["x".into()], true).unwrap();
        assert_eq!(table.n_obs, 35, "the missing target row is dropped");
        assert_eq!(table.base_region.as_ref().map(Region::as_str), Some("DE"));
        let get = |n: &str| table.coefficient(n).unwrap().estimate;
        assert!((get("const") - 1.0).abs() < 1e-8);
        assert!((get("x") - 2.0).abs() < 1e-8);
        assert!((get("region_FR") - 4.0).abs() < 1e-8);
        assert!((get("region_IT") + 3.0).abs() < 1e-8);
        assert!(table.coefficient("region_DE").is_none());
    }

    #[test]
    fn pooled_regression_has_no_dummies() {
        let table = run_panel_regression(&panel(), "y", &["x".into()], false).unwrap();
        assert_eq!(table.coefficients.len(), 2);
        assert!(table.base_region.is_none());
        assert!(table.r_squared < 1.0);
    }

    #[test]
    fn unknown_regressor_is_an_error() {
        let err = run_panel_regression(&panel(), "y", &["gdp".into()], true).unwrap_err();
        assert!(matches!(err, ModelError::UnknownColumn(c) if c == "gdp"));
    }

    #[test]
    fn table_serializes_nan_as_null() {
        let mut table = run_panel_regression(&panel(), "y", &["x".into()], true).unwrap();
        table.coefficients[0].p_value = f64::NAN;
        let json = serde_json::to_string(&table).unwrap();
        let back: RegressionTable = serde_json::from_str(&json).unwrap();
        assert!(back.coefficients[0].p_value.is_nan());
        assert_eq!(back.coefficients.len(), table.coefficients.len());
    }
}
