//! ARIMAX / SARIMAX by Hannan–Rissanen regression.
//!
//! The series and the exogenous regressors are differenced with
//! `(1 - B)^d (1 - B^s)^D`. On the differenced series `w`:
//!
//! ```text
//! w_t = c + Σ φ_i w_{t-i} + Σ Φ_i w_{t-si} + Σ θ_j e_{t-j} + Σ Θ_j e_{t-sj} + β'x_t + e_t
//! ```
//!
//! Stage one fits a long autoregression to estimate the innovations `e`;
//! stage two regresses `w` on its lags, the lagged innovations and `x` by OLS.
//! Seasonal and non-seasonal lags enter additively (no multiplicative cross
//! terms). Residuals are then rebuilt recursively from the fitted
//! coefficients and scored with the conditional Gaussian likelihood.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ols::{fit_ols, OlsFit};
use super::{Matrix, ModelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

impl Default for ArimaOrder {
    fn default() -> Self {
        Self { p: 1, d: 1, q: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonalOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    /// Season length in months.
    pub period: usize,
}

impl Default for SeasonalOrder {
    fn default() -> Self {
        Self {
            p: 1,
            d: 0,
            q: 0,
            period: 12,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArimaxSpec {
    #[serde(default)]
    pub order: ArimaOrder,
    #[serde(default)]
    pub seasonal: Option<SeasonalOrder>,
    /// Constant (drift, once differenced).
    #[serde(default = "default_true")]
    pub intercept: bool,
}

impl Default for ArimaxSpec {
    fn default() -> Self {
        Self {
            order: ArimaOrder::default(),
            seasonal: None,
            intercept: true,
        }
    }
}

impl ArimaxSpec {
    pub fn model_name(&self) -> &'static str {
        if self.seasonal.is_some() {
            "sarimax"
        } else {
            "arimax"
        }
    }

    /// e.g. `SARIMAX(1,1,1)(1,0,0,12)`.
    pub fn label(&self) -> String {
        let o = self.order;
        match self.seasonal {
            Some(s) => format!("SARIMAX({},{},{})({},{},{},{})", o.p, o.d, o.q, s.p, s.d, s.q, s.period),
            None => format!("ARIMAX({},{},{})", o.p, o.d, o.q),
        }
    }

    fn period(&self) -> usize {
        self.seasonal.map_or(0, |s| s.period)
    }

    /// Differencing polynomial coefficients, `c[0] = 1`.
    fn difference_polynomial(&self) -> Vec<f64> {
        let mut poly = vec![1.0];
        for _ in 0..self.order.d {
            poly = multiply(&poly, &[1.0, -1.0]);
        }
        if let Some(s) = self.seasonal {
            let mut factor = vec![0.0; s.period + 1];
            factor[0] = 1.0;
            factor[s.period] = -1.0;
            for _ in 0..s.d {
                poly = multiply(&poly, &factor);
            }
        }
        poly
    }

    fn lags(&self) -> (Vec<(String, usize)>, Vec<(String, usize)>) {
        let s = self.period();
        let mut ar: Vec<(String, usize)> = (1..=self.order.p).map(|i| (format!("ar.L{i}"), i)).collect();
        let mut ma: Vec<(String, usize)> = (1..=self.order.q).map(|i| (format!("ma.L{i}"), i)).collect();
        if let Some(so) = self.seasonal {
            ar.extend((1..=so.p).map(|i| (format!("ar.S.L{}", i * s), i * s)));
            ma.extend((1..=so.q).map(|i| (format!("ma.S.L{}", i * s), i * s)));
        }
        (ar, ma)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if let Some(s) = self.seasonal {
            if s.period < 2 {
                return Err(ModelError::InvalidParameter(format!(
                    "seasonal period must be at least 2, got {}",
                    s.period
                )));
            }
        }
        Ok(())
    }
}

fn multiply(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

fn difference(poly: &[f64], series: &[f64]) -> Vec<f64> {
    let m = poly.len() - 1;
    (m..series.len())
        .map(|t| poly.iter().enumerate().map(|(k, c)| c * series[t - k]).sum())
        .collect()
}

/// A fitted ARIMAX/SARIMAX model, holding its training history for
/// forecasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArimaxModel {
    spec: ArimaxSpec,
    exog_names: Vec<String>,
    ar_lags: Vec<usize>,
    ma_lags: Vec<usize>,
    stage2: OlsFit,
    sigma2: f64,
    log_likelihood: f64,
    aic: f64,
    bic: f64,
    n_eff: usize,
    poly: Vec<f64>,
    y: Vec<f64>,
    /// Differenced exogenous regressors, one vector per column.
    exog: Vec<Vec<f64>>,
    exog_raw: Vec<Vec<f64>>,
    w: Vec<f64>,
    resid: Vec<f64>,
}

impl ArimaxModel {
    /// Fit on a contiguous monthly series `y` with exogenous columns `exog`
    /// (one row per month, same length as `y`).
    pub fn fit(spec: &ArimaxSpec, y: &[f64], exog: &Matrix) -> Result<Self, ModelError> {
        Self::fit_from(spec, y, exog, 0)
    }

    /// As `fit`, with the conditional likelihood summed from differenced
    /// index `likelihood_start` (or the largest AR lag, if later). Models
    /// compared by AIC must share the start.
    fn fit_from(spec: &ArimaxSpec, y: &[f64], exog: &Matrix, likelihood_start: usize) -> Result<Self, ModelError> {
        spec.validate()?;
        let model = spec.model_name();
        if exog.n_rows() != y.len() {
            return Err(ModelError::DimensionMismatch {
                expected: y.len(),
                got: exog.n_rows(),
            });
        }
        if y.iter().any(|v| !v.is_finite()) || exog.has_missing() {
            return Err(ModelError::MissingValues { model: model.into() });
        }

        let poly = spec.difference_polynomial();
        let m = poly.len() - 1;
        let (ar, ma) = spec.lags();
        let max_ar = ar.iter().map(|l| l.1).max().unwrap_or(0);
        let max_ma = ma.iter().map(|l| l.1).max().unwrap_or(0);
        let k_exog = exog.n_cols();
        let n_params = usize::from(spec.intercept) + ar.len() + ma.len() + k_exog;

        let insufficient = |t0: usize| ModelError::InsufficientData {
            model: model.into(),
            needed: m + t0 + n_params + 3,
            got: y.len(),
        };
        if y.len() <= m {
            return Err(insufficient(max_ar.max(max_ma)));
        }

        let w = difference(&poly, y);
        let exog_raw: Vec<Vec<f64>> = (0..k_exog).map(|j| exog.column(j)).collect();
        let xw: Vec<Vec<f64>> = exog_raw.iter().map(|c| difference(&poly, c)).collect();
        let nw = w.len();

        // Stage one: long autoregression for the innovations.
        let mut innovations = vec![0.0; nw];
        let long = if max_ma > 0 {
            let long = (max_ar.max(max_ma) + 2).max(4).min(nw / 3);
            if long == 0 {
                return Err(insufficient(max_ma));
            }
            let mut names: Vec<String> = (1..=long).map(|l| format!("w.L{l}")).collect();
            names.extend(exog.names().iter().cloned());
            let rows: Vec<Vec<f64>> = (long..nw)
                .map(|t| {
                    let mut row: Vec<f64> = (1..=long).map(|l| w[t - l]).collect();
                    row.extend(xw.iter().map(|c| c[t]));
                    row
                })
                .collect();
            let design = Matrix::from_rows(names, rows)?;
            let fit = fit_ols(&design, &w[long..], true).map_err(|_| insufficient(long + max_ma))?;
            let fitted = fit.predict(&design)?;
            for (t, f) in (long..nw).zip(fitted) {
                innovations[t] = w[t] - f;
            }
            long
        } else {
            0
        };

        // Stage two: OLS on lags, lagged innovations and exog.
        let t0 = max_ar.max(long + max_ma);
        if nw < t0 + n_params + 3 {
            return Err(insufficient(t0));
        }
        let mut names: Vec<String> = ar.iter().chain(&ma).map(|l| l.0.clone()).collect();
        names.extend(exog.names().iter().cloned());
        let rows: Vec<Vec<f64>> = (t0..nw)
            .map(|t| {
                let mut row: Vec<f64> = ar.iter().map(|l| w[t - l.1]).collect();
                row.extend(ma.iter().map(|l| innovations[t - l.1]));
                row.extend(xw.iter().map(|c| c[t]));
                row
            })
            .collect();
        let design = Matrix::from_rows(names, rows)?;
        let stage2 = fit_ols(&design, &w[t0..], spec.intercept)?;

        let mut model_out = Self {
            spec: spec.clone(),
            exog_names: exog.names().to_vec(),
            ar_lags: ar.iter().map(|l| l.1).collect(),
            ma_lags: ma.iter().map(|l| l.1).collect(),
            stage2,
            sigma2: 0.0,
            log_likelihood: 0.0,
            aic: 0.0,
            bic: 0.0,
            n_eff: 0,
            poly,
            y: y.to_vec(),
            exog: xw,
            exog_raw,
            w,
            resid: Vec::new(),
        };

        // Conditional residuals from the fitted recursion.
        let mut resid = vec![0.0; nw];
        for t in max_ar..nw {
            let row: Vec<f64> = model_out.exog.iter().map(|c| c[t]).collect();
            let predicted = model_out.one_step(t, &model_out.w, &resid, &row);
            resid[t] = model_out.w[t] - predicted;
        }
        let start = max_ar.max(likelihood_start);
        if start >= nw {
            return Err(insufficient(start));
        }
        let n_eff = nw - start;
        let sigma2 = (resid[start..].iter().map(|e| e * e).sum::<f64>() / n_eff as f64).max(1e-12);
        let nf = n_eff as f64;
        let log_likelihood = -nf / 2.0 * ((2.0 * std::f64::consts::PI).ln() + sigma2.ln() + 1.0);
        let k = (n_params + 1) as f64;

        model_out.resid = resid;
        model_out.sigma2 = sigma2;
        model_out.log_likelihood = log_likelihood;
        model_out.aic = -2.0 * log_likelihood + 2.0 * k;
        model_out.bic = -2.0 * log_likelihood + k * nf.ln();
        model_out.n_eff = n_eff;
        debug!(model = %spec.label(), n_eff, aic = model_out.aic, "fitted");
        Ok(model_out)
    }

    /// Predicted `w_t` given lags of `w`, innovations and exog at `t`.
    fn one_step(&self, t: usize, w: &[f64], e: &[f64], x: &[f64]) -> f64 {
        let coef = &self.stage2.coefficients;
        let mut i = 0;
        let mut acc = 0.0;
        if self.spec.intercept {
            acc += coef[0];
            i = 1;
        }
        for &lag in &self.ar_lags {
            acc += coef[i] * w[t - lag];
            i += 1;
        }
        for &lag in &self.ma_lags {
            if lag <= t {
                acc += coef[i] * e[t - lag];
            }
            i += 1;
        }
        for v in x {
            acc += coef[i] * v;
            i += 1;
        }
        acc
    }

    /// Forecast `h` months past the end of the training series, in levels.
    /// `future_exog` supplies the exogenous regressors for those months.
    pub fn forecast(&self, future_exog: &Matrix, h: usize) -> Result<Vec<f64>, ModelError> {
        if future_exog.n_rows() != h {
            return Err(ModelError::DimensionMismatch {
                expected: h,
                got: future_exog.n_rows(),
            });
        }
        future_exog.check_layout(&self.exog_names)?;
        if future_exog.has_missing() {
            return Err(ModelError::MissingValues {
                model: self.spec.model_name().into(),
            });
        }

        let m = self.poly.len() - 1;
        let n = self.y.len();
        let future_x: Vec<Vec<f64>> = self
            .exog_raw
            .iter()
            .enumerate()
            .map(|(j, hist)| {
                let mut full = hist.clone();
                full.extend(future_exog.column(j));
                difference(&self.poly, &full)[n - m..].to_vec()
            })
            .collect();

        let mut w = self.w.clone();
        let mut e = self.resid.clone();
        let mut y = self.y.clone();
        for step in 0..h {
            let t = w.len();
            let row: Vec<f64> = future_x.iter().map(|c| c[step]).collect();
            let wt = self.one_step(t, &w, &e, &row);
            w.push(wt);
            e.push(0.0);
            let yt = wt
                - self.poly[1..]
                    .iter()
                    .enumerate()
                    .map(|(k, c)| c * y[y.len() - 1 - k])
                    .sum::<f64>();
            y.push(yt);
        }
        Ok(y[n..].to_vec())
    }

    pub fn spec(&self) -> &ArimaxSpec {
        &self.spec
    }

    pub fn exog_names(&self) -> &[String] {
        &self.exog_names
    }

    /// Stage-two coefficient table.
    pub fn summary(&self) -> &OlsFit {
        &self.stage2
    }

    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.stage2.coefficient(name)
    }

    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn aic(&self) -> f64 {
        self.aic
    }

    pub fn bic(&self) -> f64 {
        self.bic
    }

    /// Observations entering the likelihood.
    pub fn n_obs(&self) -> usize {
        self.n_eff
    }
}

/// Grid search over `p ∈ 0..=max_p`, `q ∈ 0..=max_q` (other orders taken
/// from `template`), keeping the lowest AIC. Orders that cannot be fitted are
/// skipped. Every candidate's likelihood starts after the longest AR lag in
/// the grid, so all AICs are over the same observations.
pub fn select_order(
    template: &ArimaxSpec,
    y: &[f64],
    exog: &Matrix,
    max_p: usize,
    max_q: usize,
) -> Result<ArimaxModel, ModelError> {
    let widest = ArimaxSpec {
        order: ArimaOrder { p: max_p, ..template.order },
        ..template.clone()
    };
    let start = widest.lags().0.iter().map(|l| l.1).max().unwrap_or(0);
    let mut best: Option<ArimaxModel> = None;
    let mut last_err = None;
    for p in 0..=max_p {
        for q in 0..=max_q {
            let spec = ArimaxSpec {
                order: ArimaOrder { p, q, ..template.order },
                ..template.clone()
            };
            match ArimaxModel::fit_from(&spec, y, exog, start) {
                Ok(model) => {
                    if best.as_ref().map_or(true, |b| model.aic() < b.aic()) {
                        best = Some(model);
                    }
                }
                Err(e) => {
                    debug!(order = %spec.label(), error = %e, "order skipped");
                    last_err = Some(e);
                }
            }
        }
    }
    best.ok_or_else(|| {
        last_err.unwrap_or(ModelError::InsufficientData {
            model: template.model_name().into(),
            needed: 1,
            got: y.len(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn no_exog(n: usize) -> Matrix {
        Matrix::zeros(n, Vec::new())
    }

    fn noise(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    fn spec(p: usize, d: usize, q: usize) -> ArimaxSpec {
        ArimaxSpec {
            order: ArimaOrder { p, d, q },
            seasonal: None,
            intercept: true,
        }
    }

    #[test]
    fn difference_polynomial_combines_factors() {
        let s = ArimaxSpec {
            order: ArimaOrder { p: 0, d: 1, q: 0 },
            seasonal: Some(SeasonalOrder { p: 0, d: 1, q: 0, period: 4 }),
            intercept: false,
        };
        assert_eq!(s.difference_polynomial(), vec![1.0, -1.0, 0.0, 0.0, -1.0, 1.0]);
        assert_eq!(s.label(), "SARIMAX(0,1,0)(0,1,0,4)");
    }

    #[test]
    fn ar1_with_exog_recovered() {
        let n = 400;
        let e = noise(n, 1);
        let x = noise(n, 2);
        let mut y = vec![0.0; n];
        for t in 1..n {
            y[t] = 0.6 * y[t - 1] + 2.0 * x[t] + 0.3 * e[t];
        }
        let exog = Matrix::from_columns(vec!["gdp".into()], &[x]).unwrap();
        let model = ArimaxModel::fit(&spec(1, 0, 0), &y, &exog).unwrap();
        assert!((model.coefficient("ar.L1").unwrap() - 0.6).abs() < 0.05);
        assert!((model.coefficient("gdp").unwrap() - 2.0).abs() < 0.05);
        assert!(model.aic() < model.bic());
    }

    #[test]
    fn ma1_estimated_by_two_stage_regression() {
        let n = 600;
        let e = noise(n, 3);
        let y: Vec<f64> = (0..n)
            .map(|t| e[t] + if t > 0 { 0.5 * e[t - 1] } else { 0.0 })
            .collect();
        let model = ArimaxModel::fit(&spec(0, 0, 1), &y, &no_exog(n)).unwrap();
        let theta = model.coefficient("ma.L1").unwrap();
        assert!((theta - 0.5).abs() < 0.15, "theta {theta}");
    }

    #[test]
    fn drift_forecast_continues_trend() {
        let y: Vec<f64> = (0..20).map(|t| 5.0 + 3.0 * t as f64).collect();
        let model = ArimaxModel::fit(&spec(0, 1, 0), &y, &no_exog(20)).unwrap();
        let f = model.forecast(&no_exog(3), 3).unwrap();
        for (got, want) in f.iter().zip([65.0, 68.0, 71.0]) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn seasonal_difference_repeats_pattern() {
        let pattern = [10.0, 20.0, 15.0, 5.0];
        let y: Vec<f64> = (0..24).map(|t| pattern[t % 4]).collect();
        let s = ArimaxSpec {
            order: ArimaOrder { p: 0, d: 0, q: 0 },
            seasonal: Some(SeasonalOrder { p: 0, d: 1, q: 0, period: 4 }),
            intercept: true,
        };
        let model = ArimaxModel::fit(&s, &y, &no_exog(24)).unwrap();
        let f = model.forecast(&no_exog(5), 5).unwrap();
        for (i, v) in f.iter().enumerate() {
            assert!((v - pattern[i % 4]).abs() < 1e-9);
        }
    }

    #[test]
    fn short_series_is_insufficient() {
        let y = [1.0, 2.0, 3.0, 4.0, 5.0];
        let err = ArimaxModel::fit(&spec(2, 1, 2), &y, &no_exog(5)).unwrap_err();
        assert!(matches!(err, ModelError::InsufficientData { .. }));
    }

    #[test]
    fn forecast_checks_exog_layout() {
        let n = 60;
        let x = noise(n, 4);
        let y: Vec<f64> = x.iter().map(|v| 1.0 + v).collect();
        let exog = Matrix::from_columns(vec!["gdp".into()], &[x]).unwrap();
        let model = ArimaxModel::fit(&spec(1, 0, 0), &y, &exog).unwrap();
        let wrong = Matrix::from_columns(vec!["cpi".into()], &[vec![0.0]]).unwrap();
        assert!(model.forecast(&wrong, 1).is_err());
        let right = Matrix::from_columns(vec!["gdp".into()], &[vec![0.5, -0.5]]).unwrap();
        let f = model.forecast(&right, 2).unwrap();
        assert!((f[0] - 1.5).abs() < 0.1 && (f[1] - 0.5).abs() < 0.1);
    }

    #[test]
    fn select_order_prefers_autoregression_on_ar_data() {
        let n = 300;
        let e = noise(n, 5);
        let mut y = vec![0.0; n];
        for t in 1..n {
            y[t] = 0.8 * y[t - 1] + e[t];
        }
        let model = select_order(&spec(0, 0, 0), &y, &no_exog(n), 2, 1).unwrap();
        assert!(model.spec().order.p >= 1);
    }

    #[test]
    fn select_order_scores_every_candidate_on_the_same_months() {
        let n = 120;
        let e = noise(n, 9);
        let mut y = vec![0.0; n];
        for t in 1..n {
            y[t] = 0.5 * y[t - 1] + e[t];
        }
        let exog = no_exog(n);
        let best = select_order(&spec(0, 0, 0), &y, &exog, 3, 0).unwrap();
        // Likelihood over t >= 3 whichever p won.
        assert_eq!(best.n_obs(), n - 3);
        let white = ArimaxModel::fit_from(&spec(0, 0, 0), &y, &exog, 3).unwrap();
        assert!(best.aic() <= white.aic());
        assert_eq!(ArimaxModel::fit(&spec(0, 0, 0), &y, &exog).unwrap().n_obs(), n);
    }
}
