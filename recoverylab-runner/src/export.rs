//! Artifact export: JSON manifest, CSV tables and a Markdown report.
//!
//! A run directory holds:
//! - `manifest.json`: the full `ExperimentResult` (schema versioned)
//! - `predictions.csv`: region, month, split, actual and one `yhat_*` column per model
//! - `metrics.csv`, `region_metrics.csv`, `leaderboard.csv`
//! - `shap_importance.csv` and `shap_dependence.csv`
//! - `walk_forward.csv`, `scenarios.csv` when those ran
//! - `report.md`
//!
//! Manifests written by a newer schema are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use recoverylab_core::data::source::format_value;
use recoverylab_core::data::write_panel_csv;
use recoverylab_core::domain::Panel;
use recoverylab_core::explain::ShapMethod;

use crate::metrics::ModelMetrics;
use crate::result::{ExperimentResult, ModelSummary, SCHEMA_VERSION};
use crate::scenario::{RegionElasticity, ScenarioReport};

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(result: &ExperimentResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize ExperimentResult to JSON")
}

/// Deserialize an `ExperimentResult`, rejecting newer schema versions.
pub fn import_json(json: &str) -> Result<ExperimentResult> {
    let result: ExperimentResult =
        serde_json::from_str(json).context("failed to deserialize ExperimentResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV export ─────────────────────────────────────────────────────

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn metric_cells(m: &ModelMetrics) -> [String; 5] {
    [
        m.n.to_string(),
        format_value(m.rmse),
        format_value(m.mae),
        format_value(m.mape),
        format_value(m.r2),
    ]
}

const METRIC_COLUMNS: [&str; 5] = ["n", "rmse", "mae", "mape", "r2"];

/// Every panel row with its split, actual target and model predictions.
pub fn export_predictions_csv(result: &ExperimentResult) -> Result<String> {
    let panel = &result.predictions;
    let yhat: Vec<&String> = panel
        .column_names()
        .iter()
        .filter(|c| c.starts_with("yhat_"))
        .collect();
    let actual = panel
        .column(&result.target)
        .with_context(|| format!("predictions lack target column '{}'", result.target))?;

    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header = vec!["region", "month", "split", "actual"];
    header.extend(yhat.iter().map(|c| c.as_str()));
    wtr.write_record(&header)?;

    for (row, key) in panel.keys().iter().enumerate() {
        let mut record = vec![
            key.region.to_string(),
            key.month.to_string(),
            result.split_of(key.month).to_string(),
            format_value(actual[row]),
        ];
        record.extend(yhat.iter().map(|c| format_value(panel.value(row, c))));
        wtr.write_record(&record)?;
    }
    finish(wtr)
}

pub fn export_metrics_csv(result: &ExperimentResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header = vec!["model", "split"];
    header.extend(METRIC_COLUMNS);
    wtr.write_record(&header)?;
    for row in &result.metrics {
        let mut record = vec![row.model.clone(), row.split.to_string()];
        record.extend(metric_cells(&row.metrics));
        wtr.write_record(&record)?;
    }
    finish(wtr)
}

pub fn export_region_metrics_csv(result: &ExperimentResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header = vec!["model", "region", "split"];
    header.extend(METRIC_COLUMNS);
    wtr.write_record(&header)?;
    for row in &result.region_metrics {
        let mut record = vec![row.model.clone(), row.region.to_string(), row.split.to_string()];
        record.extend(metric_cells(&row.metrics));
        wtr.write_record(&record)?;
    }
    finish(wtr)
}

pub fn export_leaderboard_csv(result: &ExperimentResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header = vec!["rank", "model"];
    header.extend(METRIC_COLUMNS);
    wtr.write_record(&header)?;
    for entry in &result.leaderboard {
        let mut record = vec![entry.rank.to_string(), entry.model.clone()];
        record.extend(metric_cells(&entry.metrics));
        wtr.write_record(&record)?;
    }
    finish(wtr)
}

/// Mean |φ| per model and feature, largest first within a model.
pub fn export_shap_importance_csv(result: &ExperimentResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["model", "method", "rank", "feature", "mean_abs_shap"])?;
    for summary in &result.shap {
        let method = match summary.method {
            ShapMethod::Tree => "tree",
            ShapMethod::Permutation => "permutation",
        };
        for (i, f) in summary.importance.iter().enumerate() {
            wtr.write_record([
                summary.model.clone(),
                method.to_string(),
                (i + 1).to_string(),
                f.feature.clone(),
                format_value(f.value),
            ])?;
        }
    }
    finish(wtr)
}

/// `(feature value, φ)` pairs for every explained row, long format.
///
/// Only available right after a run: attribution matrices are not part of
/// the manifest.
pub fn export_shap_dependence_csv(result: &ExperimentResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["model", "feature", "value", "shap"])?;
    for (model, values) in &result.shap_values {
        for feature in values.feature_names() {
            for (x, phi) in values.dependence(feature)? {
                wtr.write_record([model.clone(), feature.clone(), format_value(x), format_value(phi)])?;
            }
        }
    }
    finish(wtr)
}

pub fn export_walk_forward_csv(result: &ExperimentResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header = vec!["fold", "train_end", "test_start", "test_end", "model"];
    header.extend(METRIC_COLUMNS);
    wtr.write_record(&header)?;
    for s in &result.walk_forward {
        let mut record = vec![
            s.fold_index.to_string(),
            s.train_end.to_string(),
            s.test_start.to_string(),
            s.test_end.to_string(),
            s.model.clone(),
        ];
        record.extend(metric_cells(&s.metrics));
        wtr.write_record(&record)?;
    }
    finish(wtr)
}

/// Mean percent change per scenario, model and region.
pub fn export_scenarios_csv(result: &ExperimentResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["scenario", "shock", "value", "model", "region", "mean_pct_change"])?;
    for s in &result.scenarios {
        for i in &s.impacts {
            wtr.write_record([
                s.name.clone(),
                s.shock.to_string(),
                format_value(s.value),
                i.model.clone(),
                i.region.to_string(),
                format_value(i.mean_pct_change),
            ])?;
        }
    }
    finish(wtr)
}

/// Optimistic/pessimistic impact and elasticity per region.
pub fn export_elasticity_csv(elasticity: &[RegionElasticity]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["region", "optimistic_pct", "pessimistic_pct", "elasticity", "class"])?;
    for e in elasticity {
        wtr.write_record([
            e.region.to_string(),
            format_value(e.optimistic_pct),
            format_value(e.pessimistic_pct),
            format_value(e.elasticity),
            e.class.as_str().to_string(),
        ])?;
    }
    finish(wtr)
}

/// A panel as CSV (scenario frames and the like).
pub fn export_panel_csv(panel: &Panel) -> Result<String> {
    let mut buf = Vec::new();
    write_panel_csv(panel, &mut buf).context("failed to write panel CSV")?;
    String::from_utf8(buf).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Directory name of a run: the first 12 hex digits of its id.
pub fn run_dir_name(result: &ExperimentResult) -> &str {
    result.run_id.get(..12).unwrap_or(&result.run_id)
}

/// Save the full artifact set under `{output_dir}/{run id}/` and return
/// that directory. Re-running the same config overwrites it.
pub fn save_artifacts(result: &ExperimentResult, output_dir: &Path) -> Result<PathBuf> {
    let run_dir = output_dir.join(run_dir_name(result));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let write = |name: &str, content: String| -> Result<()> {
        let path = run_dir.join(name);
        std::fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))
    };

    write("manifest.json", export_json(result)?)?;
    write("predictions.csv", export_predictions_csv(result)?)?;
    write("metrics.csv", export_metrics_csv(result)?)?;
    write("region_metrics.csv", export_region_metrics_csv(result)?)?;
    write("leaderboard.csv", export_leaderboard_csv(result)?)?;
    write("shap_importance.csv", export_shap_importance_csv(result)?)?;
    if !result.shap_values.is_empty() {
        write("shap_dependence.csv", export_shap_dependence_csv(result)?)?;
    }
    if !result.walk_forward.is_empty() {
        write("walk_forward.csv", export_walk_forward_csv(result)?)?;
    }
    if !result.scenarios.is_empty() {
        write("scenarios.csv", export_scenarios_csv(result)?)?;
    }
    if let Some(frame) = &result.scenario_frame {
        write("scenario_predictions.csv", export_panel_csv(frame)?)?;
    }
    write("report.md", generate_report(result))?;

    Ok(run_dir)
}

/// Load an `ExperimentResult` from an artifact directory's manifest.json.
pub fn load_artifacts(dir: &Path) -> Result<ExperimentResult> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}

// ─── Markdown reports ───────────────────────────────────────────────

fn f4(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.4}")
    } else {
        "n/a".into()
    }
}

fn f2(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.2}")
    } else {
        "n/a".into()
    }
}

/// Markdown report of a single run.
pub fn generate_report(result: &ExperimentResult) -> String {
    let mut md = String::with_capacity(4096);

    md.push_str(&format!("# Experiment Report: {}\n\n", result.name));

    md.push_str("## Metadata\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Run | {} |\n", run_dir_name(result)));
    md.push_str(&format!("| Target | {} |\n", result.target));
    md.push_str(&format!("| Rows | {} ({} regions) |\n", result.data.rows, result.data.regions));
    if let (Some(first), Some(last)) = (result.data.first_month, result.data.last_month) {
        md.push_str(&format!("| Period | {first} to {last} |\n"));
    }
    md.push_str(&format!(
        "| Split | train ≤ {} ({} rows), valid {} rows, test {} rows |\n",
        result.split.train_end, result.split.train_rows, result.split.valid_rows, result.split.test_rows
    ));
    md.push_str(&format!("| Inputs | {} |\n", result.inputs.join(", ")));
    md.push_str(&format!("| Dataset Hash | {} |\n", result.dataset_hash));
    md.push_str(&format!(
        "| Duration | {:.1}s |\n",
        (result.finished_at - result.started_at).num_milliseconds() as f64 / 1000.0
    ));
    md.push('\n');

    if let Some(clean) = &result.data.clean {
        md.push_str("## Data Preparation\n\n");
        md.push_str(&format!(
            "{} rows in, {} out ({} outside the period, {} without target); {} values interpolated, {} filled.\n",
            clean.rows_in,
            clean.rows_out,
            clean.dropped_out_of_range,
            clean.dropped_missing_target,
            clean.interpolated,
            clean.filled
        ));
        if !result.data.derived.is_empty() {
            md.push_str(&format!("\nDerived columns: {}.\n", result.data.derived.len()));
        }
        md.push('\n');
    }

    md.push_str("## Leaderboard (validation)\n\n");
    md.push_str("| Rank | Model | RMSE | MAE | MAPE % | R² | n |\n");
    md.push_str("| --- | --- | --- | --- | --- | --- | --- |\n");
    for e in &result.leaderboard {
        let m = &e.metrics;
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            e.rank,
            e.model,
            f4(m.rmse),
            f4(m.mae),
            f2(m.mape),
            f4(m.r2),
            m.n
        ));
    }
    md.push('\n');

    md.push_str("## Models\n\n");
    for summary in &result.summaries {
        md.push_str(&format!("### {}\n\n", summary.model()));
        match summary {
            ModelSummary::Linear {
                coefficients,
                r_squared,
                aic,
                n_obs,
                ..
            } => {
                md.push_str(&format!("R² {}, AIC {}, n = {n_obs}\n\n", f4(*r_squared), f2(*aic)));
                md.push_str("| Term | Estimate | Std. Error | p |\n| --- | --- | --- | --- |\n");
                for c in coefficients {
                    md.push_str(&format!(
                        "| {} | {} | {} | {} |\n",
                        c.name,
                        f4(c.estimate),
                        f4(c.std_error),
                        f4(c.p_value)
                    ));
                }
            }
            ModelSummary::Arima { label, regions, .. } => {
                md.push_str(&format!("{label}, {} regions\n\n", regions.len()));
                md.push_str("| Region | Last Month | n | AIC |\n| --- | --- | --- | --- |\n");
                for r in regions {
                    md.push_str(&format!("| {} | {} | {} | {} |\n", r.region, r.last_month, r.n_obs, f2(r.aic)));
                }
            }
            ModelSummary::Boosting { importance, .. } => {
                md.push_str("Top features by gain:\n\n");
                for f in importance.iter().take(10) {
                    md.push_str(&format!("- {}: {}\n", f.feature, f4(f.value)));
                }
            }
            ModelSummary::RegionalBoosting {
                regions, importance, ..
            } => {
                md.push_str(&format!("{} regions fitted. Top features by summed gain:\n\n", regions.len()));
                for f in importance.iter().take(10) {
                    md.push_str(&format!("- {}: {}\n", f.feature, f4(f.value)));
                }
            }
            ModelSummary::Lstm {
                epochs, final_loss, ..
            } => {
                md.push_str(&format!("{epochs} epochs, final training loss {}\n", f4(*final_loss)));
            }
        }
        md.push('\n');
    }

    if !result.shap.is_empty() {
        md.push_str("## SHAP Importance\n\n");
        for s in &result.shap {
            md.push_str(&format!(
                "### {} ({:?}, {} rows, base {})\n\n",
                s.model,
                s.method,
                s.rows,
                f4(s.base_value)
            ));
            md.push_str("| Feature | Mean abs(SHAP) |\n| --- | --- |\n");
            for f in &s.importance {
                md.push_str(&format!("| {} | {} |\n", f.feature, f4(f.value)));
            }
            md.push('\n');
        }
    }

    if let Some(reg) = &result.regression {
        md.push_str(&format!("## Panel Regression: {}\n\n", reg.y));
        md.push_str(&format!(
            "R² {}, adj. R² {}, n = {}{}\n\n",
            f4(reg.r_squared),
            f4(reg.adj_r_squared),
            reg.n_obs,
            reg.base_region
                .as_ref()
                .map(|r| format!(", base region {r}"))
                .unwrap_or_default()
        ));
        md.push_str("| Term | Estimate | Std. Error | t | p |\n| --- | --- | --- | --- | --- |\n");
        for c in &reg.coefficients {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                c.name,
                f4(c.estimate),
                f4(c.std_error),
                f2(c.t_value),
                f4(c.p_value)
            ));
        }
        md.push('\n');
    }

    if !result.walk_forward.is_empty() {
        md.push_str("## Walk-Forward\n\n");
        md.push_str("| Fold | Test Window | Model | RMSE | MAPE % |\n| --- | --- | --- | --- | --- |\n");
        for s in &result.walk_forward {
            md.push_str(&format!(
                "| {} | {} to {} | {} | {} | {} |\n",
                s.fold_index,
                s.test_start,
                s.test_end,
                s.model,
                f4(s.metrics.rmse),
                f2(s.metrics.mape)
            ));
        }
        md.push('\n');
    }

    if !result.scenarios.is_empty() {
        md.push_str("## Scenarios\n\n");
        for s in &result.scenarios {
            md.push_str(&format!(
                "### {} ({} {:+.1}%)\n\nShocked: {}\n\n",
                s.name,
                s.shock,
                s.value * 100.0,
                if s.shocked_columns.is_empty() {
                    "none".to_string()
                } else {
                    s.shocked_columns.join(", ")
                }
            ));
            md.push_str("| Model | Region | Mean % Change |\n| --- | --- | --- |\n");
            for i in &s.impacts {
                md.push_str(&format!("| {} | {} | {} |\n", i.model, i.region, f2(i.mean_pct_change)));
            }
            md.push('\n');
        }
    }

    if !result.skipped.is_empty() {
        md.push_str("## Skipped\n\n");
        for s in &result.skipped {
            match &s.region {
                Some(r) => md.push_str(&format!("- {} / {}: {}\n", s.model, r, s.reason)),
                None => md.push_str(&format!("- {}: {}\n", s.model, s.reason)),
            }
        }
        md.push('\n');
    }

    md
}

/// Markdown summary of a symmetric scenario run.
pub fn generate_scenario_report(report: &ScenarioReport) -> String {
    let mut md = String::with_capacity(1024);
    md.push_str(&format!(
        "# Scenario: {} ±{:.1}% ({})\n\n",
        report.shock,
        report.value * 100.0,
        report.model
    ));
    md.push_str("| Region | Optimistic % | Pessimistic % | Elasticity | Class |\n");
    md.push_str("| --- | --- | --- | --- | --- |\n");
    for e in &report.elasticity {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            e.region,
            f2(e.optimistic_pct),
            f2(e.pessimistic_pct),
            f2(e.elasticity),
            e.class.as_str()
        ));
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use recoverylab_core::domain::{DuplicatePolicy, Month, PanelKey, Region};

    use crate::config::ExperimentConfig;
    use crate::result::{
        build_leaderboard, DataSummary, FeatureImportance, MetricsRow, ShapSummary, SplitSummary,
    };
    use crate::split::SplitSet;

    fn m(y: i32, mo: u32) -> Month {
        Month::new(y, mo).unwrap()
    }

    fn sample_result() -> ExperimentResult {
        let config = ExperimentConfig::from_toml(
            r#"
            [data]
            panel = "hotel.csv"
            [split]
            train_end = "2021-06"
            [[models]]
            kind = "ols"
            "#,
        )
        .unwrap();
        let rows = (0..4)
            .map(|t| {
                let key = PanelKey::new(Region::parse("DE").unwrap(), m(2021, 5).add_months(t));
                (key, vec![10.0 + t as f64, 10.5 + t as f64])
            })
            .collect();
        let predictions = Panel::from_rows(
            vec!["y".into(), "yhat_ols".into()],
            rows,
            DuplicatePolicy::Reject,
        )
        .unwrap();
        let metrics = vec![
            MetricsRow {
                model: "ols".into(),
                split: SplitSet::Train,
                metrics: ModelMetrics::compute(&[10.0, 11.0], &[10.5, 11.5]),
            },
            MetricsRow {
                model: "ols".into(),
                split: SplitSet::Valid,
                metrics: ModelMetrics::compute(&[12.0, 13.0], &[12.5, 13.5]),
            },
        ];
        let now = Utc::now();
        ExperimentResult {
            schema_version: SCHEMA_VERSION,
            run_id: config.run_id().unwrap(),
            name: config.name.clone(),
            dataset_hash: predictions.content_hash(),
            started_at: now,
            finished_at: now,
            config,
            target: "y".into(),
            inputs: vec!["log_gdp_lag1".into()],
            data: DataSummary::of(&predictions),
            split: SplitSummary {
                train_end: m(2021, 6),
                valid_end: None,
                train_rows: 2,
                valid_rows: 2,
                test_rows: 0,
            },
            leaderboard: build_leaderboard(&metrics, SplitSet::Valid),
            metrics,
            region_metrics: Vec::new(),
            summaries: Vec::new(),
            shap: vec![ShapSummary {
                model: "ols".into(),
                method: ShapMethod::Permutation,
                base_value: 11.0,
                rows: 2,
                importance: FeatureImportance::ranked(vec![("log_gdp_lag1".into(), 0.4)]),
            }],
            skipped: Vec::new(),
            walk_forward: Vec::new(),
            regression: None,
            scenarios: Vec::new(),
            predictions,
            scenario_frame: None,
            shap_values: Vec::new(),
        }
    }

    #[test]
    fn json_roundtrip() {
        let original = sample_result();
        let restored = import_json(&export_json(&original).unwrap()).unwrap();
        assert_eq!(restored.run_id, original.run_id);
        assert_eq!(restored.config, original.config);
        assert_eq!(restored.metrics, original.metrics);
        assert_eq!(restored.dataset_hash, original.dataset_hash);
        // Prediction tables are exported as CSV, not in the manifest.
        assert!(restored.predictions.is_empty());
    }

    #[test]
    fn json_rejects_unknown_version() {
        let mut result = sample_result();
        result.schema_version = 99;
        let json = export_json(&result).unwrap();
        let msg = import_json(&json).unwrap_err().to_string();
        assert!(msg.contains("unsupported schema version 99"));
    }

    #[test]
    fn predictions_csv_labels_splits() {
        let csv = export_predictions_csv(&sample_result()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "region,month,split,actual,yhat_ols");
        assert_eq!(lines.len(), 5);
        assert!(lines[1].starts_with("DE,2021-05-01,train,10,10.5"));
        assert!(lines[3].contains(",valid,"));
    }

    #[test]
    fn metric_tables_have_all_columns() {
        let result = sample_result();
        let metrics = export_metrics_csv(&result).unwrap();
        assert_eq!(metrics.lines().next().unwrap(), "model,split,n,rmse,mae,mape,r2");
        assert_eq!(metrics.lines().count(), 3);
        let board = export_leaderboard_csv(&result).unwrap();
        assert!(board.lines().nth(1).unwrap().starts_with("1,ols,2,0.5,0.5"));
        let shap = export_shap_importance_csv(&result).unwrap();
        assert_eq!(shap.lines().nth(1).unwrap(), "ols,permutation,1,log_gdp_lag1,0.4");
    }

    #[test]
    fn report_has_sections() {
        let md = generate_report(&sample_result());
        assert!(md.contains("# Experiment Report: experiment"));
        assert!(md.contains("## Leaderboard (validation)"));
        assert!(md.contains("| 1 | ols |"));
        assert!(md.contains("## SHAP Importance"));
        assert!(!md.contains("## Scenarios"));
    }

    #[test]
    fn save_load_artifacts_roundtrip() {
        let result = sample_result();
        let dir = tempfile::tempdir().unwrap();
        let run_dir = save_artifacts(&result, dir.path()).unwrap();
        assert_eq!(run_dir.file_name().unwrap().to_str().unwrap(), &result.run_id[..12]);
        for name in [
            "manifest.json",
            "predictions.csv",
            "metrics.csv",
            "region_metrics.csv",
            "leaderboard.csv",
            "shap_importance.csv",
            "report.md",
        ] {
            assert!(run_dir.join(name).exists(), "{name} missing");
        }
        assert!(!run_dir.join("scenarios.csv").exists());
        let loaded = load_artifacts(&run_dir).unwrap();
        assert_eq!(loaded.leaderboard, result.leaderboard);
    }
}
