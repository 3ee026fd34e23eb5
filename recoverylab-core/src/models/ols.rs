//! Ordinary least squares with coefficient inference.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::{check_target, Matrix, ModelError, Regressor};
use crate::stats::two_sided_p_value;

pub const INTERCEPT: &str = "const";

/// A fitted OLS model with its coefficient table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OlsFit {
    /// Regressor names, `const` first when an intercept was fitted.
    pub names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub t_values: Vec<f64>,
    pub p_values: Vec<f64>,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    /// Residual variance, SSR / (n - rank).
    pub sigma2: f64,
    pub ssr: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub n_obs: usize,
    pub rank: usize,
    pub intercept: bool,
}

impl OlsFit {
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.coefficients[i])
    }

    pub fn df_resid(&self) -> usize {
        self.n_obs - self.rank
    }

    /// Predictions for rows laid out like the training matrix (without the
    /// intercept column).
    pub fn predict(&self, x: &Matrix) -> Result<Vec<f64>, ModelError> {
        let offset = usize::from(self.intercept);
        x.check_layout(&self.names[offset..])?;
        let base = if self.intercept { self.coefficients[0] } else { 0.0 };
        Ok((0..x.n_rows())
            .map(|i| {
                x.row(i)
                    .iter()
                    .zip(&self.coefficients[offset..])
                    .fold(base, |acc, (v, b)| acc + v * b)
            })
            .collect())
    }
}

/// Fit `y ~ x` by least squares through an SVD pseudo-inverse, which also
/// covers rank-deficient designs such as a full set of dummies next to an
/// intercept.
pub fn fit_ols(x: &Matrix, y: &[f64], intercept: bool) -> Result<OlsFit, ModelError> {
    check_target("ols", x, y)?;
    if x.has_missing() {
        return Err(ModelError::MissingValues { model: "ols".into() });
    }

    let n = x.n_rows();
    let offset = usize::from(intercept);
    let k = x.n_cols() + offset;
    if n <= k {
        return Err(ModelError::InsufficientData {
            model: "ols".into(),
            needed: k + 1,
            got: n,
        });
    }

    let mut names = Vec::with_capacity(k);
    if intercept {
        names.push(INTERCEPT.to_string());
    }
    names.extend(x.names().iter().cloned());

    let design = DMatrix::from_fn(n, k, |i, j| {
        if intercept && j == 0 {
            1.0
        } else {
            x.get(i, j - offset)
        }
    });
    let target = DVector::from_column_slice(y);

    let svd = design.clone().svd(true, true);
    let tol = svd.singular_values.max() * n.max(k) as f64 * f64::EPSILON;
    let rank = svd.rank(tol);
    let beta = svd
        .solve(&target, tol)
        .map_err(|e| ModelError::Numerical(e.to_string()))?;

    let fitted = &design * &beta;
    let residuals = &target - &fitted;
    let ssr = residuals.norm_squared();
    let df_resid = (n - rank).max(1);
    let sigma2 = ssr / df_resid as f64;

    let xtx_pinv = (design.transpose() * &design)
        .pseudo_inverse(tol)
        .map_err(|e| ModelError::Numerical(e.to_string()))?;
    let std_errors: Vec<f64> = (0..k)
        .map(|j| (sigma2 * xtx_pinv[(j, j)]).max(0.0).sqrt())
        .collect();
    let coefficients: Vec<f64> = beta.iter().copied().collect();
    let t_values: Vec<f64> = coefficients
        .iter()
        .zip(&std_errors)
        .map(|(b, se)| if *se > 0.0 { b / se } else { f64::NAN })
        .collect();
    let p_values = t_values
        .iter()
        .map(|t| {
            if t.is_nan() {
                f64::NAN
            } else {
                two_sided_p_value(*t, df_resid as f64)
            }
        })
        .collect();

    let tss = if intercept {
        let mean = y.iter().sum::<f64>() / n as f64;
        y.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
    } else {
        y.iter().map(|v| v * v).sum::<f64>()
    };
    let r_squared = if tss > 0.0 { 1.0 - ssr / tss } else { f64::NAN };
    let adj_r_squared =
        1.0 - (n - offset) as f64 / df_resid as f64 * (1.0 - r_squared);

    let nf = n as f64;
    // Floored so an exact fit keeps finite AIC/BIC.
    let ml_variance = (ssr / nf).max(1e-12);
    let log_likelihood =
        -nf / 2.0 * ((2.0 * std::f64::consts::PI).ln() + ml_variance.ln() + 1.0);
    let params = rank as f64;
    let aic = -2.0 * log_likelihood + 2.0 * params;
    let bic = -2.0 * log_likelihood + params * nf.ln();

    Ok(OlsFit {
        names,
        coefficients,
        std_errors,
        t_values,
        p_values,
        r_squared,
        adj_r_squared,
        sigma2,
        ssr,
        log_likelihood,
        aic,
        bic,
        n_obs: n,
        rank,
        intercept,
    })
}

/// OLS with intercept as a `Regressor`.
#[derive(Debug, Clone, Default)]
pub struct OlsRegressor {
    fit: Option<OlsFit>,
}

impl OlsRegressor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fitted(&self) -> Option<&OlsFit> {
        self.fit.as_ref()
    }
}

impl Regressor for OlsRegressor {
    fn name(&self) -> &str {
        "ols"
    }

    fn fit(&mut self, x: &Matrix, y: &[f64]) -> Result<(), ModelError> {
        self.fit = Some(fit_ols(x, y, true)?);
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> Result<Vec<f64>, ModelError> {
        self.fit.as_ref().ok_or(ModelError::NotFitted)?.predict(x)
    }

    fn ols_fit(&self) -> Option<&OlsFit> {
        self.fit.as_ref()
    }

    fn feature_importance(&self) -> Option<Vec<(String, f64)>> {
        let fit = self.fit.as_ref()?;
        let offset = usize::from(fit.intercept);
        Some(
            fit.names[offset..]
                .iter()
                .zip(&fit.t_values[offset..])
                .map(|(n, t)| (n.clone(), t.abs()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn design(xs: &[f64]) -> Matrix {
        Matrix::from_columns(vec!["x".into()], &[xs.to_vec()]).unwrap()
    }

    #[test]
    fn exact_line_recovered() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y: Vec<f64> = xs.iter().map(|x| 2.0 + 3.0 * x).collect();
        let fit = fit_ols(&design(&xs), &y, true).unwrap();
        assert!((fit.coefficient("const").unwrap() - 2.0).abs() < 1e-9);
        assert!((fit.coefficient("x").unwrap() - 3.0).abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
        assert_eq!(fit.n_obs, 5);
    }

    #[test]
    fn exact_fit_keeps_information_criteria_finite() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = [4.0; 6];
        let fit = fit_ols(&design(&xs), &y, true).unwrap();
        assert!(fit.log_likelihood.is_finite());
        assert!(fit.aic.is_finite() && fit.bic.is_finite());
        let ceiling = -3.0 * ((2.0 * std::f64::consts::PI).ln() + 1e-12_f64.ln() + 1.0);
        assert!(fit.log_likelihood <= ceiling + 1e-9);
    }

    #[test]
    fn hand_computed_inference() {
        // y = [1, 3, 2, 5, 4] on x = 1..5: slope 0.8, intercept 0.6,
        // SSR 3.6, sigma2 1.2, se(slope) = sqrt(1.2 / 10).
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 3.0, 2.0, 5.0, 4.0];
        let fit = fit_ols(&design(&xs), &y, true).unwrap();
        assert!((fit.coefficients[1] - 0.8).abs() < 1e-9);
        assert!((fit.coefficients[0] - 0.6).abs() < 1e-9);
        assert!((fit.ssr - 3.6).abs() < 1e-9);
        assert!((fit.sigma2 - 1.2).abs() < 1e-9);
        assert!((fit.std_errors[1] - (0.12f64).sqrt()).abs() < 1e-9);
        assert!((fit.r_squared - 0.64).abs() < 1e-9);
        assert!((fit.adj_r_squared - 0.52).abs() < 1e-9);
        assert!(fit.p_values[1] > 0.05 && fit.p_values[1] < 0.2);
        assert_eq!(fit.df_resid(), 3);
    }

    #[test]
    fn rank_deficient_design_still_fits() {
        let a = vec![1.0, 1.0, 0.0, 0.0];
        let b = vec![0.0, 0.0, 1.0, 1.0];
        let x = Matrix::from_columns(vec!["a".into(), "b".into()], &[a, b]).unwrap();
        let y = [1.0, 1.2, 3.0, 3.2];
        let fit = fit_ols(&x, &y, true).unwrap();
        assert_eq!(fit.rank, 2);
        let pred = fit.predict(&x).unwrap();
        assert!((pred[0] - 1.1).abs() < 1e-9);
        assert!((pred[2] - 3.1).abs() < 1e-9);
    }

    #[test]
    fn too_few_rows_rejected() {
        let err = fit_ols(&design(&[1.0, 2.0]), &[1.0, 2.0], true).unwrap_err();
        assert!(matches!(err, ModelError::InsufficientData { needed: 3, .. }));
    }

    #[test]
    fn regressor_requires_fit_and_layout() {
        let mut model = OlsRegressor::new();
        assert!(matches!(model.predict(&design(&[1.0])), Err(ModelError::NotFitted)));
        model
            .fit(&design(&[1.0, 2.0, 3.0, 4.0]), &[1.0, 2.0, 3.1, 3.9])
            .unwrap();
        let other = Matrix::from_columns(vec!["z".into()], &[vec![1.0]]).unwrap();
        assert!(matches!(model.predict(&other), Err(ModelError::FeatureMismatch { .. })));
    }
}
