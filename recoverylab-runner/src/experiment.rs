//! Experiment runner: wires together data preparation, split, training,
//! scoring, SHAP and scenarios.
//!
//! Two entry points:
//! - `run_experiment()`: prepares the panel from the configured source, then
//!   runs. Used by the CLI.
//! - `run_on_panel()`: takes a prepared panel. Used by tests and by callers
//!   that build the panel themselves.

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use recoverylab_core::data::{clean_with_features, load_raw_dir, merge_sources, read_panel, DataError, SnapshotCache};
use recoverylab_core::domain::{Month, Panel, PanelError};
use recoverylab_core::explain::{compute_shap, ExplainError};
use recoverylab_core::features::FeatureError;
use recoverylab_core::models::ModelError;

use crate::config::{ConfigError, DesignConfig, ExperimentConfig};
use crate::metrics::ModelMetrics;
use crate::regression::{coefficient_table, run_panel_regression};
use crate::result::{
    build_leaderboard, ArimaRegionSummary, DataSummary, ExperimentResult, FeatureImportance, FoldScore,
    MetricsRow, ModelSummary, RegionMetricsRow, ScenarioImpact, ScenarioSummary, ShapSummary, SplitSummary,
    SCHEMA_VERSION,
};
use crate::scenario::{mean_pct_change, scenario_column, simulate_scenario};
use crate::split::{create_folds, temporal_split, SplitError, SplitSet, TemporalSplit};
use crate::trained::{fit_model, FitContext, Fitted, SkippedFit, TrainedModel};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("feature error: {0}")]
    Feature(#[from] FeatureError),
    #[error("split error: {0}")]
    Split(#[from] SplitError),
    #[error("panel error: {0}")]
    Panel(#[from] PanelError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("target column '{0}' not found in panel")]
    MissingTarget(String),
    #[error("no model could be fitted")]
    NoModels,
}

/// A run's result together with the fitted models, for scenarios and
/// further scoring in the same process.
pub struct ExperimentOutcome {
    pub result: ExperimentResult,
    pub models: Vec<TrainedModel>,
    pub panel: Panel,
}

// ─── Data preparation ───────────────────────────────────────────────

/// Load (or merge) the panel, then build features on its full history and
/// clean it, unless the configured panel is already prepared. Writes a snapshot when a snapshot
/// directory is configured.
pub fn prepare_panel(config: &ExperimentConfig) -> Result<(Panel, DataSummary), RunError> {
    let (panel, merge) = match (&config.data.raw_dir, &config.data.panel) {
        (Some(raw), _) => {
            let (base, joins) = load_raw_dir(raw)?;
            let (panel, report) = merge_sources(base, &joins, &config.data.merge)?;
            (panel, Some(report))
        }
        (None, Some(path)) => (read_panel(path)?, None),
        (None, None) => {
            return Err(ConfigError::Invalid("data needs raw_dir or panel".into()).into());
        }
    };
    info!(rows = panel.len(), regions = panel.regions().len(), "panel loaded");

    if config.data.prepared {
        let summary = DataSummary {
            merge,
            ..DataSummary::of(&panel)
        };
        return Ok((panel, summary));
    }

    let (features, derived, clean_report) = clean_with_features(&panel, &config.clean, &config.features)?;
    info!(
        rows = features.len(),
        dropped = clean_report.rows_in - clean_report.rows_out,
        columns = derived.len(),
        "panel cleaned, features built"
    );

    if let Some(dir) = &config.data.snapshot_dir {
        let meta = SnapshotCache::new(dir).write(&config.name, &features)?;
        info!(name = %meta.name, hash = %meta.content_hash, "snapshot written");
    }

    let summary = DataSummary {
        merge,
        clean: Some(clean_report),
        derived,
        ..DataSummary::of(&features)
    };
    Ok((features, summary))
}

// ─── Entry points ───────────────────────────────────────────────────

/// Run an experiment end to end.
pub fn run_experiment(config: &ExperimentConfig) -> Result<ExperimentOutcome, RunError> {
    config.validate()?;
    let (panel, data) = prepare_panel(config)?;
    run_on_panel(config, panel, data)
}

/// Configured inputs present in the panel. The target itself is never an
/// input.
pub fn resolve_inputs(panel: &Panel, design: &DesignConfig) -> Vec<String> {
    design
        .inputs
        .iter()
        .filter(|c| {
            if *c == &design.target {
                warn!(column = %c, "target listed as input, ignored");
                return false;
            }
            let present = panel.has_column(c);
            if !present {
                warn!(column = %c, "input column not in panel, ignored");
            }
            present
        })
        .cloned()
        .collect()
}

/// Train, score and explain every configured model on a prepared panel.
pub fn run_on_panel(config: &ExperimentConfig, panel: Panel, data: DataSummary) -> Result<ExperimentOutcome, RunError> {
    let started_at = Utc::now();
    let run_id = config.run_id()?;
    let target = config.design.target.as_str();
    if !panel.has_column(target) {
        return Err(RunError::MissingTarget(target.to_string()));
    }
    let inputs = resolve_inputs(&panel, &config.design);
    let split = temporal_split(&panel, config.split.train_end, config.split.valid_end)?;
    let holdout = split.holdout();
    info!(
        train = split.train.len(),
        valid = split.valid.len(),
        test = split.test.len(),
        inputs = inputs.len(),
        "split ready"
    );

    // ── Training ──
    let ctx = FitContext {
        panel: &panel,
        train: &split.train,
        eval: &holdout,
        target,
        inputs: &inputs,
        region_one_hot: config.design.region_one_hot,
        seed: config.seed,
    };
    let mut models = Vec::new();
    let mut skipped = Vec::new();
    for spec in &config.models {
        match fit_model(spec, &ctx) {
            Ok((model, region_skips)) => {
                skipped.extend(region_skips);
                models.push(model);
            }
            Err(e) => {
                warn!(model = spec.name(), error = %e, "model skipped");
                skipped.push(SkippedFit {
                    model: spec.name().to_string(),
                    region: None,
                    reason: e.to_string(),
                });
            }
        }
    }
    if models.is_empty() {
        return Err(RunError::NoModels);
    }

    // ── Scoring ──
    let all_rows: Vec<usize> = (0..panel.len()).collect();
    let actual = panel.require_column(target)?.to_vec();
    let mut predictions = panel.select_columns(&[target])?;
    let mut metrics = Vec::new();
    let mut region_metrics = Vec::new();
    for model in &models {
        let preds = model.predict(&panel, &all_rows)?;
        score(model.name(), &panel, &split, &actual, &preds, &mut metrics, &mut region_metrics);
        predictions.set_column(&format!("yhat_{}", model.name()), preds)?;
    }
    let leaderboard = build_leaderboard(&metrics, SplitSet::Valid);
    if let Some(best) = leaderboard.first() {
        info!(model = %best.model, rmse = best.metrics.rmse, "best validation model");
    }
    let summaries: Vec<ModelSummary> = models.iter().map(summarize).collect();

    // ── SHAP ──
    let mut shap = Vec::new();
    let mut shap_values = Vec::new();
    if config.explain.enabled {
        for model in &models {
            let Some(pipeline) = model.pipeline() else {
                continue;
            };
            if pipeline.model().as_tree_ensemble().is_none() && !config.explain.all_models {
                continue;
            }
            let result = pipeline
                .design_matrix(&panel, &holdout)
                .map_err(ExplainError::from)
                .and_then(|x| compute_shap(pipeline.model(), &x, &config.explain.shap));
            match result {
                Ok(values) => {
                    shap.push(ShapSummary {
                        model: model.name().to_string(),
                        method: values.method,
                        base_value: values.base_value,
                        rows: values.values.n_rows(),
                        importance: FeatureImportance::ranked(
                            values.global_importance(Some(config.explain.shap.max_display)),
                        ),
                    });
                    shap_values.push((model.name().to_string(), values));
                }
                Err(e) => {
                    warn!(model = model.name(), error = %e, "SHAP failed");
                    skipped.push(SkippedFit {
                        model: format!("shap:{}", model.name()),
                        region: None,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    // ── Walk-forward ──
    let walk_forward = match &config.split.walk_forward {
        Some(wf) => {
            let months: Vec<Month> = panel.months().into_iter().collect();
            let folds = create_folds(&months, wf)?;
            let mut scores = Vec::new();
            for fold in &folds {
                let (train, test) = fold.rows(&panel);
                let ctx = FitContext {
                    train: &train,
                    eval: &test,
                    ..ctx
                };
                for spec in &config.models {
                    let scored = fit_model(spec, &ctx).and_then(|(m, _)| m.predict(&panel, &test));
                    match scored {
                        Ok(preds) => {
                            let y: Vec<f64> = test.iter().map(|&r| actual[r]).collect();
                            scores.push(FoldScore {
                                fold_index: fold.fold_index,
                                train_end: fold.train_end,
                                test_start: fold.test_start,
                                test_end: fold.test_end,
                                model: spec.name().to_string(),
                                metrics: ModelMetrics::compute(&y, &preds),
                            });
                        }
                        Err(e) => warn!(fold = fold.fold_index, model = spec.name(), error = %e, "fold skipped"),
                    }
                }
            }
            info!(folds = folds.len(), scores = scores.len(), "walk-forward done");
            scores
        }
        None => Vec::new(),
    };

    // ── Panel regression ──
    let regression = match &config.regression {
        Some(rc) => Some(run_panel_regression(&panel, &rc.y, &rc.x, rc.fixed_effects)?),
        None => None,
    };

    // ── Scenarios ──
    let (scenarios, scenario_frame) = if config.scenarios.is_empty() {
        (Vec::new(), None)
    } else {
        let mut frame = predictions.take_rows(&holdout);
        let mut out = Vec::new();
        for sc in &config.scenarios {
            let shocked = simulate_scenario(&panel, &holdout, &models, &sc.name, sc.shock, sc.value);
            let mut impacts = Vec::new();
            for model in &models {
                let column = scenario_column(model.name(), &sc.name);
                let Some(values) = shocked.column(&column) else {
                    continue;
                };
                frame.set_column(&column, values.to_vec())?;
                for (region, pct) in mean_pct_change(&frame, &format!("yhat_{}", model.name()), &column)? {
                    impacts.push(ScenarioImpact {
                        model: model.name().to_string(),
                        region,
                        mean_pct_change: pct,
                    });
                }
            }
            out.push(ScenarioSummary {
                name: sc.name.clone(),
                shock: sc.shock,
                value: sc.value,
                shocked_columns: panel
                    .column_names()
                    .iter()
                    .filter(|c| sc.shock.matches(c))
                    .cloned()
                    .collect(),
                impacts,
            });
        }
        (out, Some(frame))
    };

    let result = ExperimentResult {
        schema_version: SCHEMA_VERSION,
        run_id,
        name: config.name.clone(),
        dataset_hash: panel.content_hash(),
        started_at,
        finished_at: Utc::now(),
        config: config.clone(),
        target: target.to_string(),
        inputs,
        data,
        split: SplitSummary::from(&split),
        metrics,
        region_metrics,
        leaderboard,
        summaries,
        shap,
        skipped,
        walk_forward,
        regression,
        scenarios,
        predictions,
        scenario_frame,
        shap_values,
    };
    info!(run_id = %result.run_id, models = models.len(), "experiment finished");
    Ok(ExperimentOutcome { result, models, panel })
}

// ─── Helpers ────────────────────────────────────────────────────────

fn score(
    model: &str,
    panel: &Panel,
    split: &TemporalSplit,
    actual: &[f64],
    preds: &[f64],
    metrics: &mut Vec<MetricsRow>,
    region_metrics: &mut Vec<RegionMetricsRow>,
) {
    let pick = |rows: &[usize]| -> (Vec<f64>, Vec<f64>) {
        rows.iter().map(|&r| (actual[r], preds[r])).unzip()
    };
    for set in SplitSet::ALL {
        let rows = split.rows(set);
        if rows.is_empty() {
            continue;
        }
        let (y, yhat) = pick(rows);
        metrics.push(MetricsRow {
            model: model.to_string(),
            split: set,
            metrics: ModelMetrics::compute(&y, &yhat),
        });
    }
    for (region, range) in panel.region_ranges() {
        for set in SplitSet::ALL {
            let rows: Vec<usize> = range.clone().filter(|&r| split.set_of(panel.key(r).month) == set).collect();
            if rows.is_empty() {
                continue;
            }
            let (y, yhat) = pick(&rows);
            region_metrics.push(RegionMetricsRow {
                model: model.to_string(),
                region: region.clone(),
                split: set,
                metrics: ModelMetrics::compute(&y, &yhat),
            });
        }
    }
}

fn summarize(model: &TrainedModel) -> ModelSummary {
    let name = model.name().to_string();
    match model.fitted() {
        Fitted::Tabular(pipeline) => match pipeline.model().ols_fit() {
            Some(fit) => ModelSummary::Linear {
                model: name,
                coefficients: coefficient_table(fit),
                r_squared: fit.r_squared,
                aic: fit.aic,
                n_obs: fit.n_obs,
            },
            None => ModelSummary::Boosting {
                model: name,
                importance: FeatureImportance::ranked(pipeline.model().feature_importance().unwrap_or_default()),
            },
        },
        Fitted::Arimax(fits) => ModelSummary::Arima {
            model: name,
            label: fits.first().map(|f| f.model.spec().label()).unwrap_or_default(),
            regions: fits
                .iter()
                .map(|f| ArimaRegionSummary {
                    region: f.region.clone(),
                    last_month: f.last_month,
                    n_obs: f.model.n_obs(),
                    aic: f.model.aic(),
                    bic: f.model.bic(),
                    sigma2: f.model.sigma2(),
                })
                .collect(),
        },
        Fitted::RegionalBoosting(fits) => {
            let mut gain: BTreeMap<String, f64> = BTreeMap::new();
            for (_, pipeline) in fits {
                for (feature, g) in pipeline.model().feature_importance().unwrap_or_default() {
                    *gain.entry(feature).or_default() += g;
                }
            }
            ModelSummary::RegionalBoosting {
                model: name,
                regions: fits.iter().map(|(r, _)| r.clone()).collect(),
                importance: FeatureImportance::ranked(gain.into_iter().collect()),
            }
        }
        Fitted::Lstm(fit) => {
            let losses = fit.model.loss_history();
            ModelSummary::Lstm {
                model: name,
                epochs: losses.len(),
                final_loss: losses.last().copied().unwrap_or(f64::NAN),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recoverylab_core::domain::{DuplicatePolicy, PanelKey, Region};

    const CONFIG: &str = r#"
        name = "unit"

        [data]
        panel = "unused.csv"
        prepared = true

        [design]
        target = "y"
        inputs = ["log_gdp", "stringency", "not_there", "y"]
        region_one_hot = true

        [split]
        train_end = "2021-12"
        valid_end = "2022-06"

        [[models]]
        kind = "ols"

        [[models]]
        kind = "xgb"
        params = { n_estimators = 20, max_depth = 3 }

        [regression]
        y = "y"
        x = ["log_gdp"]

        [[scenarios]]
        name = "gdp_up"
        shock = "gdp"
        value = 0.1
    "#;

    fn panel() -> Panel {
        let mut rows = Vec::new();
        for (region, level) in [("DE", 10.0), ("FR", 12.0), ("IT", 8.0)] {
            for t in 0..36_i64 {
                let month = Month::new(2020, 1).unwrap().add_months(t);
                let gdp = 1.0 + 0.02 * t as f64;
                let stringency = if t < 18 { 60.0 - 3.0 * t as f64 } else { 6.0 };
                let y = level + 3.0 * gdp - 0.05 * stringency + 0.01 * ((t * 7) % 5) as f64;
                rows.push((
                    PanelKey::new(Region::parse(region).unwrap(), month),
                    vec![gdp, stringency, y],
                ));
            }
        }
        Panel::from_rows(
            vec!["log_gdp".into(), "stringency".into(), "y".into()],
            rows,
            DuplicatePolicy::Reject,
        )
        .unwrap()
    }

    fn run() -> ExperimentOutcome {
        let config = ExperimentConfig::from_toml(CONFIG).unwrap();
        let p = panel();
        let data = DataSummary::of(&p);
        run_on_panel(&config, p, data).unwrap()
    }

    #[test]
    fn inputs_drop_missing_columns_and_target() {
        let config = ExperimentConfig::from_toml(CONFIG).unwrap();
        assert_eq!(resolve_inputs(&panel(), &config.design), vec!["log_gdp", "stringency"]);
    }

    #[test]
    fn run_scores_every_model_on_every_set() {
        let outcome = run();
        let r = &outcome.result;
        assert_eq!(outcome.models.len(), 2);
        assert_eq!(r.metrics.len(), 2 * 3);
        assert_eq!(r.region_metrics.len(), 2 * 3 * 3);
        assert_eq!(r.leaderboard.len(), 2);
        assert_eq!(r.split.train_rows, 3 * 24);
        assert_eq!(r.split.test_rows, 3 * 6);
        let ols = r.metrics_for("ols", SplitSet::Train).unwrap();
        assert!(ols.r2 > 0.9, "ols train r2 {}", ols.r2);
        assert!(r.predictions.has_column("yhat_ols"));
        assert!(r.predictions.has_column("yhat_xgb"));
        assert_eq!(r.predictions.len(), 3 * 36);
    }

    #[test]
    fn run_explains_trees_and_summarizes_models() {
        let r = run().result;
        assert_eq!(r.shap.len(), 1);
        assert_eq!(r.shap[0].model, "xgb");
        assert_eq!(r.shap[0].rows, 3 * 12);
        assert!(matches!(r.summaries[0], ModelSummary::Linear { .. }));
        assert!(matches!(r.summaries[1], ModelSummary::Boosting { .. }));
        let regression = r.regression.as_ref().unwrap();
        assert!(regression.coefficient("log_gdp").is_some());
    }

    #[test]
    fn gdp_scenario_raises_linear_predictions() {
        let r = run().result;
        let scenario = &r.scenarios[0];
        assert_eq!(scenario.shocked_columns, vec!["log_gdp"]);
        let ols: Vec<&ScenarioImpact> = scenario.impacts.iter().filter(|i| i.model == "ols").collect();
        assert_eq!(ols.len(), 3);
        assert!(ols.iter().all(|i| i.mean_pct_change > 0.0));
        let frame = r.scenario_frame.as_ref().unwrap();
        assert_eq!(frame.len(), 3 * 12);
        assert!(frame.has_column("yhat_ols_gdp_up"));
    }

    #[test]
    fn missing_target_is_an_error() {
        let config = ExperimentConfig::from_toml(&CONFIG.replace("target = \"y\"", "target = \"z\"")).unwrap();
        let p = panel();
        let data = DataSummary::of(&p);
        assert!(matches!(run_on_panel(&config, p, data), Err(RunError::MissingTarget(_))));
    }
}
