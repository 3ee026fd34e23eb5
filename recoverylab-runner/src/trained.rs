//! Fitting one configured model on panel rows, and scoring it again.
//!
//! Global tabular models wrap a `Pipeline`. The LSTM consumes windows of
//! consecutive months. ARIMAX/SARIMAX and region-level boosting keep one fit
//! per region; regions that cannot be fitted are skipped and reported, never
//! fatal.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use recoverylab_core::domain::{Month, Panel, Region};
use recoverylab_core::models::{
    build_windows, complete_rows, ArimaxModel, ArimaxSpec, Categorical, DesignSpec, GbmParams,
    GradientBoosting, LstmParams, LstmRegressor, Matrix, ModelError, ModelSpec, Pipeline,
    Preprocessor, Window,
};
use recoverylab_core::rng::RngHierarchy;

/// Region-level models need this many training rows.
pub const MIN_REGION_TRAIN_ROWS: usize = 24;

/// A model or region that was left out, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFit {
    pub model: String,
    pub region: Option<Region>,
    pub reason: String,
}

/// What a model is trained on.
#[derive(Debug, Clone, Copy)]
pub struct FitContext<'a> {
    pub panel: &'a Panel,
    pub train: &'a [usize],
    /// Rows the model will be scored on; region-level models skip regions
    /// without any.
    pub eval: &'a [usize],
    pub target: &'a str,
    pub inputs: &'a [String],
    pub region_one_hot: bool,
    /// Master seed of per-region streams.
    pub seed: u64,
}

impl FitContext<'_> {
    fn design(&self, one_hot: bool) -> DesignSpec {
        DesignSpec {
            categorical: if one_hot { vec![Categorical::Region] } else { Vec::new() },
            numeric: self.inputs.to_vec(),
        }
    }
}

pub struct TrainedModel {
    name: String,
    fitted: Fitted,
}

pub enum Fitted {
    Tabular(Pipeline),
    Lstm(LstmFit),
    Arimax(Vec<RegionArimax>),
    RegionalBoosting(Vec<(Region, Pipeline)>),
}

pub struct LstmFit {
    pub pre: Preprocessor,
    pub model: LstmRegressor,
    pub window: usize,
}

/// One region's ARIMAX fit and the last month it saw.
pub struct RegionArimax {
    pub region: Region,
    pub last_month: Month,
    pub model: ArimaxModel,
}

/// Fit `spec`. Returns the regions that were skipped alongside the model; a
/// region-level model with no region left is an error.
pub fn fit_model(spec: &ModelSpec, ctx: &FitContext<'_>) -> Result<(TrainedModel, Vec<SkippedFit>), ModelError> {
    let name = spec.name();
    let (fitted, skipped) = match spec {
        ModelSpec::Ols | ModelSpec::Xgb { .. } | ModelSpec::Lgbm { per_region: false, .. } => {
            let regressor = spec
                .build_regressor()
                .ok_or_else(|| ModelError::InvalidParameter(format!("{name} is not a tabular model")))?;
            let pipeline = Pipeline::fit(&ctx.design(ctx.region_one_hot), regressor, ctx.panel, ctx.train, ctx.target)?;
            (Fitted::Tabular(pipeline), Vec::new())
        }
        ModelSpec::Lgbm { per_region: true, .. } => {
            let params = spec
                .gbm_params()
                .ok_or_else(|| ModelError::InvalidParameter(format!("{name} has no boosting parameters")))?;
            let (fits, skipped) = fit_regional_boosting(name, params, ctx)?;
            (Fitted::RegionalBoosting(fits), skipped)
        }
        ModelSpec::Arimax { .. } | ModelSpec::Sarimax { .. } => {
            let (arimax, exog) = spec
                .arimax()
                .ok_or_else(|| ModelError::InvalidParameter(format!("{name} has no ARIMA order")))?;
            let (fits, skipped) = fit_regional_arimax(name, &arimax, exog, ctx)?;
            (Fitted::Arimax(fits), skipped)
        }
        ModelSpec::Lstm { params } => (Fitted::Lstm(fit_lstm(*params, ctx)?), Vec::new()),
    };
    info!(model = name, skipped = skipped.len(), "model fitted");
    Ok((
        TrainedModel {
            name: name.to_string(),
            fitted,
        },
        skipped,
    ))
}

impl TrainedModel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fitted(&self) -> &Fitted {
        &self.fitted
    }

    /// Global tabular pipeline, if this is one.
    pub fn pipeline(&self) -> Option<&Pipeline> {
        match &self.fitted {
            Fitted::Tabular(p) => Some(p),
            _ => None,
        }
    }

    /// One prediction per row of `rows`; `NaN` where the model cannot
    /// score a row (missing inputs, region not fitted, no forecast path).
    pub fn predict(&self, panel: &Panel, rows: &[usize]) -> Result<Vec<f64>, ModelError> {
        match &self.fitted {
            Fitted::Tabular(pipeline) => pipeline.predict(panel, rows),
            Fitted::Lstm(fit) => predict_lstm(fit, panel, rows),
            Fitted::Arimax(fits) => predict_arimax(fits, panel, rows),
            Fitted::RegionalBoosting(fits) => {
                let mut out = vec![f64::NAN; rows.len()];
                for (region, pipeline) in fits {
                    let (pos, sub): (Vec<usize>, Vec<usize>) = rows
                        .iter()
                        .copied()
                        .enumerate()
                        .filter(|&(_, r)| &panel.key(r).region == region)
                        .unzip();
                    if sub.is_empty() {
                        continue;
                    }
                    for (i, p) in pos.into_iter().zip(pipeline.predict(panel, &sub)?) {
                        out[i] = p;
                    }
                }
                Ok(out)
            }
        }
    }
}

/// `(position in rows, panel row)` pairs per region.
fn rows_by_region<'p>(panel: &'p Panel, rows: &[usize]) -> HashMap<&'p Region, Vec<(usize, usize)>> {
    let mut out: HashMap<&Region, Vec<(usize, usize)>> = HashMap::new();
    for (i, &r) in rows.iter().enumerate() {
        out.entry(&panel.key(r).region).or_default().push((i, r));
    }
    out
}

// ─── Region-level boosting ───────────────────────────────────────────

fn fit_regional_boosting(
    name: &str,
    params: GbmParams,
    ctx: &FitContext<'_>,
) -> Result<(Vec<(Region, Pipeline)>, Vec<SkippedFit>), ModelError> {
    let train = rows_by_region(ctx.panel, ctx.train);
    let eval = rows_by_region(ctx.panel, ctx.eval);
    let design = ctx.design(false);
    let seeds = RngHierarchy::new(ctx.seed);

    let results: Vec<(Region, Result<Pipeline, String>)> = ctx
        .panel
        .regions()
        .into_par_iter()
        .map(|region| {
            let train_rows: Vec<usize> = train
                .get(&region)
                .map(|v| v.iter().map(|(_, r)| *r).collect())
                .unwrap_or_default();
            let has_eval = eval.get(&region).is_some_and(|v| !v.is_empty());
            if train_rows.len() < MIN_REGION_TRAIN_ROWS || !has_eval {
                let reason = format!(
                    "{} training rows (need {MIN_REGION_TRAIN_ROWS}), {} evaluation rows",
                    train_rows.len(),
                    eval.get(&region).map_or(0, Vec::len)
                );
                return (region, Err(reason));
            }
            let params = GbmParams {
                seed: seeds.sub_seed(name, region.as_str(), 0),
                ..params
            };
            let model = Box::new(GradientBoosting::new(name, params));
            let fit = Pipeline::fit(&design, model, ctx.panel, &train_rows, ctx.target).map_err(|e| e.to_string());
            (region, fit)
        })
        .collect();

    let mut fits = Vec::new();
    let mut skipped = Vec::new();
    for (region, result) in results {
        match result {
            Ok(pipeline) => fits.push((region, pipeline)),
            Err(reason) => {
                warn!(model = name, region = %region, %reason, "region skipped");
                skipped.push(SkippedFit {
                    model: name.to_string(),
                    region: Some(region),
                    reason,
                });
            }
        }
    }
    if fits.is_empty() {
        return Err(ModelError::InsufficientData {
            model: name.to_string(),
            needed: MIN_REGION_TRAIN_ROWS,
            got: 0,
        });
    }
    Ok((fits, skipped))
}

// ─── ARIMAX / SARIMAX ────────────────────────────────────────────────

/// The longest run of consecutive months ending at the region's last
/// training row where target and regressors are all present.
fn trailing_complete_run(panel: &Panel, train_rows: &[usize], complete: &[bool]) -> Vec<usize> {
    let Some(end) = train_rows.iter().rev().copied().find(|&r| complete[r]) else {
        return Vec::new();
    };
    let mut start = end;
    while start > 0 {
        let prev = start - 1;
        let contiguous = panel.key(prev).region == panel.key(start).region
            && panel.key(prev).month.succ() == panel.key(start).month;
        if !contiguous || !complete[prev] || !train_rows.contains(&prev) {
            break;
        }
        start = prev;
    }
    (start..=end).collect()
}

fn exog_matrix(panel: &Panel, exog: &[String], rows: &[usize]) -> Result<Matrix, ModelError> {
    if exog.is_empty() {
        return Ok(Matrix::zeros(rows.len(), Vec::new()));
    }
    let columns = exog
        .iter()
        .map(|c| {
            let values = panel.column(c).ok_or_else(|| ModelError::UnknownColumn(c.clone()))?;
            Ok(rows.iter().map(|&r| values[r]).collect())
        })
        .collect::<Result<Vec<Vec<f64>>, ModelError>>()?;
    Matrix::from_columns(exog.to_vec(), &columns)
}

fn fit_regional_arimax(
    name: &str,
    spec: &ArimaxSpec,
    exog: &[String],
    ctx: &FitContext<'_>,
) -> Result<(Vec<RegionArimax>, Vec<SkippedFit>), ModelError> {
    let exog: Vec<String> = exog
        .iter()
        .filter(|c| {
            let present = ctx.panel.has_column(c);
            if !present {
                warn!(model = name, column = %c, "exogenous column not in panel, dropped");
            }
            present
        })
        .cloned()
        .collect();
    let mut required = vec![ctx.target.to_string()];
    required.extend(exog.iter().cloned());
    let all: Vec<usize> = (0..ctx.panel.len()).collect();
    let mut complete = vec![false; ctx.panel.len()];
    for r in complete_rows(ctx.panel, &all, &required)? {
        complete[r] = true;
    }
    let train = rows_by_region(ctx.panel, ctx.train);
    let target = ctx
        .panel
        .column(ctx.target)
        .ok_or_else(|| ModelError::UnknownColumn(ctx.target.to_string()))?;

    let results: Vec<(Region, Result<RegionArimax, String>)> = ctx
        .panel
        .regions()
        .into_par_iter()
        .map(|region| {
            let train_rows: Vec<usize> = train
                .get(&region)
                .map(|v| v.iter().map(|(_, r)| *r).collect())
                .unwrap_or_default();
            let run = trailing_complete_run(ctx.panel, &train_rows, &complete);
            let Some(&last) = run.last() else {
                return (region, Err("no complete training months".to_string()));
            };
            let fit = exog_matrix(ctx.panel, &exog, &run).and_then(|x| {
                let y: Vec<f64> = run.iter().map(|&r| target[r]).collect();
                ArimaxModel::fit(spec, &y, &x)
            });
            match fit {
                Ok(model) => {
                    debug!(model = name, region = %region, months = run.len(), aic = model.aic(), "region fitted");
                    let fit = RegionArimax {
                        region: region.clone(),
                        last_month: ctx.panel.key(last).month,
                        model,
                    };
                    (region, Ok(fit))
                }
                Err(e) => (region, Err(e.to_string())),
            }
        })
        .collect();

    let mut fits = Vec::new();
    let mut skipped = Vec::new();
    for (region, result) in results {
        match result {
            Ok(fit) => fits.push(fit),
            Err(reason) => {
                warn!(model = name, region = %region, %reason, "region skipped");
                skipped.push(SkippedFit {
                    model: name.to_string(),
                    region: Some(region),
                    reason,
                });
            }
        }
    }
    if fits.is_empty() {
        return Err(ModelError::InsufficientData {
            model: name.to_string(),
            needed: 1,
            got: 0,
        });
    }
    Ok((fits, skipped))
}

/// Forecast each region forward from its last training month, up to the
/// latest requested month or the first month without complete regressors.
fn predict_arimax(fits: &[RegionArimax], panel: &Panel, rows: &[usize]) -> Result<Vec<f64>, ModelError> {
    let mut out = vec![f64::NAN; rows.len()];
    let requested = rows_by_region(panel, rows);
    for fit in fits {
        let Some(wanted) = requested.get(&fit.region) else {
            continue;
        };
        let Some(horizon_end) = wanted.iter().map(|(_, r)| panel.key(*r).month).max() else {
            continue;
        };
        let exog = fit.model.exog_names();
        let mut path = Vec::new();
        let mut month = fit.last_month.succ();
        while month <= horizon_end {
            let Some(row) = panel.row_of(&fit.region, month) else {
                break;
            };
            if exog.iter().any(|c| panel.column(c).map_or(true, |v| v[row].is_nan())) {
                break;
            }
            path.push(row);
            month = month.succ();
        }
        if path.is_empty() {
            continue;
        }
        let future = exog_matrix(panel, exog, &path)?;
        let forecast = fit.model.forecast(&future, path.len())?;
        let by_month: HashMap<Month, f64> = path
            .iter()
            .map(|&r| panel.key(r).month)
            .zip(forecast)
            .collect();
        for (i, r) in wanted {
            if let Some(v) = by_month.get(&panel.key(*r).month) {
                out[*i] = *v;
            }
        }
    }
    Ok(out)
}

// ─── LSTM ────────────────────────────────────────────────────────────

/// Design matrix holding only the rows the windows touch, with the windows
/// re-indexed into it. Also returns the panel row of each matrix row.
fn window_batch(
    pre: &Preprocessor,
    panel: &Panel,
    windows: &[Window],
) -> Result<(Matrix, Vec<Window>, Vec<usize>), ModelError> {
    let mut rows: Vec<usize> = windows.iter().flat_map(|w| w.rows.iter().copied()).collect();
    rows.sort_unstable();
    rows.dedup();
    let position: HashMap<usize, usize> = rows.iter().enumerate().map(|(i, &r)| (r, i)).collect();
    let remapped = windows
        .iter()
        .map(|w| Window {
            rows: w.rows.iter().map(|r| position[r]).collect(),
        })
        .collect();
    Ok((pre.transform(panel, &rows)?, remapped, rows))
}

/// Windows ending at one of `targets` whose rows all have complete inputs.
fn usable_windows(panel: &Panel, inputs: &[String], window: usize, targets: &[usize]) -> Result<Vec<Window>, ModelError> {
    let all: Vec<usize> = (0..panel.len()).collect();
    let mut complete = vec![false; panel.len()];
    for r in complete_rows(panel, &all, inputs)? {
        complete[r] = true;
    }
    let mut wanted = vec![false; panel.len()];
    for &r in targets {
        wanted[r] = true;
    }
    Ok(build_windows(panel.keys(), window)
        .into_iter()
        .filter(|w| wanted[w.target_row()] && w.rows.iter().all(|&r| complete[r]))
        .collect())
}

fn fit_lstm(params: LstmParams, ctx: &FitContext<'_>) -> Result<LstmFit, ModelError> {
    let target = ctx
        .panel
        .column(ctx.target)
        .ok_or_else(|| ModelError::UnknownColumn(ctx.target.to_string()))?;
    let targets: Vec<usize> = ctx.train.iter().copied().filter(|&r| target[r].is_finite()).collect();
    let windows = usable_windows(ctx.panel, ctx.inputs, params.window, &targets)?;

    let mut pre_rows: Vec<usize> = windows.iter().flat_map(|w| w.rows.iter().copied()).collect();
    pre_rows.sort_unstable();
    pre_rows.dedup();
    let pre = Preprocessor::fit(ctx.panel, &pre_rows, &ctx.design(ctx.region_one_hot))?;

    let (x, windows, rows) = window_batch(&pre, ctx.panel, &windows)?;
    let y: Vec<f64> = rows.iter().map(|&r| target[r]).collect();
    let mut model = LstmRegressor::new(params);
    model.fit(&x, &y, &windows)?;
    debug!(
        windows = windows.len(),
        epochs = model.loss_history().len(),
        "lstm trained"
    );
    Ok(LstmFit {
        pre,
        model,
        window: params.window,
    })
}

fn predict_lstm(fit: &LstmFit, panel: &Panel, rows: &[usize]) -> Result<Vec<f64>, ModelError> {
    let mut out = vec![f64::NAN; rows.len()];
    let windows = usable_windows(panel, &fit.pre.spec().numeric, fit.window, rows)?;
    if windows.is_empty() {
        return Ok(out);
    }
    let targets: Vec<usize> = windows.iter().map(Window::target_row).collect();
    let (x, windows, _) = window_batch(&fit.pre, panel, &windows)?;
    let preds: HashMap<usize, f64> = targets.into_iter().zip(fit.model.predict(&x, &windows)?).collect();
    for (i, r) in rows.iter().enumerate() {
        if let Some(p) = preds.get(r) {
            out[i] = *p;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use recoverylab_core::domain::{DuplicatePolicy, PanelKey};
    use recoverylab_core::models::{ArimaOrder, GbmOverrides};

    fn m(y: i32, mo: u32) -> Month {
        Month::new(y, mo).unwrap()
    }

    /// Three regions, 2019-01..2022-12. `y` follows `x` with a region level;
    /// IT only has 12 months.
    fn panel() -> Panel {
        let mut rows = Vec::new();
        for (region, level, months) in [("DE", 3.0, 48), ("FR", 1.0, 48), ("IT", 2.0, 12)] {
            for t in 0..months {
                let x = ((t as f64) * 0.7).sin() + t as f64 * 0.02;
                let y = level + 1.5 * x + 0.1 * ((t as f64) * 1.3).cos();
                let key = PanelKey::new(Region::parse(region).unwrap(), m(2019, 1).add_months(t));
                rows.push((key, vec![y, x]));
            }
        }
        Panel::from_rows(vec!["y".into(), "x".into()], rows, DuplicatePolicy::Reject).unwrap()
    }

    fn split(p: &Panel) -> (Vec<usize>, Vec<usize>) {
        (0..p.len()).partition(|&r| p.key(r).month <= m(2021, 12))
    }

    fn ctx<'a>(p: &'a Panel, train: &'a [usize], eval: &'a [usize], inputs: &'a [String]) -> FitContext<'a> {
        FitContext {
            panel: p,
            train,
            eval,
            target: "y",
            inputs,
            region_one_hot: true,
            seed: 42,
        }
    }

    #[test]
    fn global_ols_scores_every_holdout_row() {
        let p = panel();
        let (train, eval) = split(&p);
        let inputs = vec!["x".to_string()];
        let (model, skipped) = fit_model(&ModelSpec::Ols, &ctx(&p, &train, &eval, &inputs)).unwrap();
        assert!(skipped.is_empty());
        assert_eq!(model.name(), "ols");
        let preds = model.predict(&p, &eval).unwrap();
        assert_eq!(preds.len(), eval.len());
        for (&r, yhat) in eval.iter().zip(&preds) {
            assert!((yhat - p.value(r, "y")).abs() < 0.25);
        }
    }

    #[test]
    fn regional_boosting_skips_short_regions() {
        let p = panel();
        let (train, eval) = split(&p);
        let inputs = vec!["x".to_string()];
        let spec = ModelSpec::Lgbm {
            params: GbmOverrides {
                n_estimators: Some(20),
                min_child_samples: Some(3),
                ..GbmOverrides::default()
            },
            per_region: true,
        };
        let (model, skipped) = fit_model(&spec, &ctx(&p, &train, &eval, &inputs)).unwrap();
        assert_eq!(model.name(), "lgbm_region");
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].region.as_ref().map(Region::as_str), Some("IT"));
        let Fitted::RegionalBoosting(fits) = model.fitted() else {
            panic!("expected region-level fits");
        };
        assert_eq!(fits.len(), 2);
        let preds = model.predict(&p, &eval).unwrap();
        assert!(preds.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn arimax_forecasts_from_last_training_month() {
        let p = panel();
        let (train, eval) = split(&p);
        let inputs = vec!["x".to_string()];
        let spec = ModelSpec::Arimax {
            order: ArimaOrder { p: 1, d: 0, q: 0 },
            exog: vec!["x".into(), "absent".into()],
        };
        let (model, skipped) = fit_model(&spec, &ctx(&p, &train, &eval, &inputs)).unwrap();
        let Fitted::Arimax(fits) = model.fitted() else {
            panic!("expected ARIMAX fits");
        };
        assert!(fits.iter().any(|f| f.region.as_str() == "DE"));
        assert!(fits.iter().all(|f| f.last_month <= m(2021, 12)));
        assert!(skipped.iter().all(|s| s.region.is_some()));

        let preds = model.predict(&p, &eval).unwrap();
        let de_2022: Vec<f64> = eval
            .iter()
            .zip(&preds)
            .filter(|(r, _)| p.key(**r).region.as_str() == "DE")
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(de_2022.len(), 12);
        assert!(de_2022.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn arimax_stops_at_missing_regressor() {
        let mut p = panel();
        let gap = p.row_of(&Region::parse("DE").unwrap(), m(2022, 4)).unwrap();
        p.column_mut("x").unwrap()[gap] = f64::NAN;
        let (train, eval) = split(&p);
        let inputs = vec!["x".to_string()];
        let spec = ModelSpec::Arimax {
            order: ArimaOrder { p: 1, d: 0, q: 0 },
            exog: vec!["x".into()],
        };
        let (model, _) = fit_model(&spec, &ctx(&p, &train, &eval, &inputs)).unwrap();
        let preds = model.predict(&p, &eval).unwrap();
        for (&r, v) in eval.iter().zip(&preds) {
            let key = p.key(r);
            if key.region.as_str() == "DE" {
                assert_eq!(v.is_finite(), key.month < m(2022, 4), "{}", key.month);
            }
        }
    }

    #[test]
    fn lstm_predicts_only_complete_windows() {
        let mut p = panel();
        let hole = p.row_of(&Region::parse("FR").unwrap(), m(2022, 6)).unwrap();
        p.column_mut("x").unwrap()[hole] = f64::NAN;
        let (train, eval) = split(&p);
        let inputs = vec!["x".to_string()];
        let spec = ModelSpec::Lstm {
            params: LstmParams {
                hidden: 4,
                window: 3,
                epochs: 5,
                ..LstmParams::default()
            },
        };
        let (model, _) = fit_model(&spec, &ctx(&p, &train, &eval, &inputs)).unwrap();
        let preds = model.predict(&p, &eval).unwrap();
        for (&r, v) in eval.iter().zip(&preds) {
            let key = p.key(r);
            let touches_hole = key.region.as_str() == "FR" && key.month >= m(2022, 6) && key.month <= m(2022, 8);
            assert_eq!(v.is_finite(), !touches_hole, "{} {}", key.region, key.month);
        }
    }

    #[test]
    fn trailing_run_stops_at_gap() {
        let p = panel();
        let rows: Vec<usize> = (0..48).collect();
        let mut complete = vec![true; p.len()];
        complete[40] = false;
        let run = trailing_complete_run(&p, &rows[..46], &complete);
        assert_eq!(run, (41..46).collect::<Vec<_>>());
    }
}
