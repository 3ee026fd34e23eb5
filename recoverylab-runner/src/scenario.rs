//! Macro shock scenarios and demand elasticities.
//!
//! A scenario scales the model inputs of one macro driver, re-scores the
//! trained models on the shocked panel and compares against the baseline.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use recoverylab_core::domain::{Panel, PanelError, Region};

use crate::metrics::{nan_as_null, nan_last};
use crate::trained::TrainedModel;

/// Which macro driver a scenario moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShockType {
    None,
    Gdp,
    Turnover,
    Policy,
}

impl ShockType {
    /// Case-insensitive substring that selects the shocked columns.
    pub fn pattern(&self) -> Option<&'static str> {
        match self {
            ShockType::None => None,
            ShockType::Gdp => Some("log_gdp"),
            ShockType::Turnover => Some("turnover_index"),
            ShockType::Policy => Some("stringency"),
        }
    }

    pub fn matches(&self, column: &str) -> bool {
        self.pattern()
            .is_some_and(|p| column.to_ascii_lowercase().contains(p))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShockType::None => "none",
            ShockType::Gdp => "gdp",
            ShockType::Turnover => "turnover",
            ShockType::Policy => "policy",
        }
    }
}

impl FromStr for ShockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ShockType::None),
            "gdp" => Ok(ShockType::Gdp),
            "turnover" => Ok(ShockType::Turnover),
            "policy" => Ok(ShockType::Policy),
            other => Err(format!("unknown shock type '{other}' (expected none, gdp, turnover or policy)")),
        }
    }
}

impl std::fmt::Display for ShockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Copy of `panel` with every column matched by `shock` multiplied by
/// `1 + value`. Returns the shocked column names too.
pub fn apply_shock(panel: &Panel, shock: ShockType, value: f64) -> (Panel, Vec<String>) {
    let mut out = panel.clone();
    let columns: Vec<String> = panel
        .column_names()
        .iter()
        .filter(|c| shock.matches(c))
        .cloned()
        .collect();
    for name in &columns {
        if let Some(values) = out.column_mut(name) {
            values.iter_mut().for_each(|v| *v *= 1.0 + value);
        }
    }
    (out, columns)
}

/// Prediction column name of `model` under `scenario`.
pub fn scenario_column(model: &str, scenario: &str) -> String {
    format!("yhat_{model}_{scenario}")
}

/// Score every model on the shocked copy of `rows` of `panel`.
///
/// The result holds those rows with one `yhat_{model}_{name}` column per
/// model appended. A model that fails is logged and left out.
pub fn simulate_scenario(
    panel: &Panel,
    rows: &[usize],
    models: &[TrainedModel],
    name: &str,
    shock: ShockType,
    value: f64,
) -> Panel {
    info!(scenario = name, %shock, value, "running scenario");
    let (shocked, columns) = apply_shock(panel, shock, value);
    if columns.is_empty() && shock != ShockType::None {
        warn!(scenario = name, %shock, "no column matches the shock");
    }
    let mut frame = shocked.take_rows(rows);
    for model in models {
        match model.predict(&shocked, rows) {
            Ok(preds) => {
                let column = scenario_column(model.name(), name);
                if let Err(e) = frame.set_column(&column, preds) {
                    warn!(model = model.name(), scenario = name, error = %e, "scenario column rejected");
                }
            }
            Err(e) => warn!(model = model.name(), scenario = name, error = %e, "model failed during scenario"),
        }
    }
    frame
}

/// Mean percent deviation from baseline, per region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionImpact {
    pub region: Region,
    #[serde(with = "nan_as_null")]
    pub optimistic_pct: f64,
    #[serde(with = "nan_as_null")]
    pub pessimistic_pct: f64,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::NAN
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Per-row `(scenario − baseline) / baseline × 100`, averaged per region
/// over the rows where it is finite. Regions in panel order.
pub fn mean_pct_change(frame: &Panel, baseline: &str, scenario: &str) -> Result<Vec<(Region, f64)>, PanelError> {
    let base = frame.require_column(baseline)?;
    let scen = frame.require_column(scenario)?;
    Ok(frame
        .region_ranges()
        .into_iter()
        .map(|(region, range)| {
            let pct: Vec<f64> = range
                .map(|r| (scen[r] - base[r]) / base[r] * 100.0)
                .filter(|v| v.is_finite())
                .collect();
            (region, mean(&pct))
        })
        .collect())
}

/// Mean percent change of the optimistic and pessimistic columns against
/// baseline per region, sorted by optimistic impact (largest first).
pub fn calculate_impact(
    frame: &Panel,
    baseline: &str,
    optimistic: &str,
    pessimistic: &str,
) -> Result<Vec<RegionImpact>, PanelError> {
    let opt = mean_pct_change(frame, baseline, optimistic)?;
    let pes = mean_pct_change(frame, baseline, pessimistic)?;
    let mut out: Vec<RegionImpact> = opt
        .into_iter()
        .zip(pes)
        .map(|((region, optimistic_pct), (_, pessimistic_pct))| RegionImpact {
            region,
            optimistic_pct,
            pessimistic_pct,
        })
        .collect();
    out.sort_by(|a, b| nan_last(-a.optimistic_pct, -b.optimistic_pct));
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElasticityClass {
    High,
    Moderate,
    Low,
}

impl ElasticityClass {
    pub fn classify(elasticity: f64) -> Self {
        if elasticity >= 1.0 {
            ElasticityClass::High
        } else if elasticity >= 0.5 {
            ElasticityClass::Moderate
        } else {
            ElasticityClass::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ElasticityClass::High => "high",
            ElasticityClass::Moderate => "moderate",
            ElasticityClass::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionElasticity {
    pub region: Region,
    #[serde(with = "nan_as_null")]
    pub optimistic_pct: f64,
    #[serde(with = "nan_as_null")]
    pub pessimistic_pct: f64,
    #[serde(with = "nan_as_null")]
    pub elasticity: f64,
    pub class: ElasticityClass,
}

/// Default total swing between optimistic and pessimistic (±5%).
pub const DEFAULT_SHOCK_SIZE: f64 = 0.10;

/// `(optimistic% − pessimistic%) / (shock_size × 100)` per region.
pub fn calculate_elasticity(impact: &[RegionImpact], shock_size: f64) -> Vec<RegionElasticity> {
    impact
        .iter()
        .map(|i| {
            let elasticity = (i.optimistic_pct - i.pessimistic_pct) / (shock_size * 100.0);
            RegionElasticity {
                region: i.region.clone(),
                optimistic_pct: i.optimistic_pct,
                pessimistic_pct: i.pessimistic_pct,
                elasticity,
                class: ElasticityClass::classify(elasticity),
            }
        })
        .collect()
}

/// Outcome of a symmetric `±value` shock on one baseline model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub model: String,
    pub shock: ShockType,
    pub value: f64,
    pub shocked_columns: Vec<String>,
    pub impact: Vec<RegionImpact>,
    pub elasticity: Vec<RegionElasticity>,
}

/// Baseline, optimistic (`+value`) and pessimistic (`−value`) runs of
/// `model` on `rows`, summarised as per-region impact and elasticity.
/// `None` when the model cannot score the rows.
pub fn symmetric_scenario(
    panel: &Panel,
    rows: &[usize],
    model: &TrainedModel,
    shock: ShockType,
    value: f64,
) -> Option<ScenarioReport> {
    let models = std::slice::from_ref(model);
    let mut frame = simulate_scenario(panel, rows, models, "baseline", ShockType::None, 0.0);
    for (name, v) in [("optimistic", value), ("pessimistic", -value)] {
        let shocked = simulate_scenario(panel, rows, models, name, shock, v);
        let column = scenario_column(model.name(), name);
        let values = shocked.column(&column)?.to_vec();
        frame.set_column(&column, values).ok()?;
    }
    let impact = calculate_impact(
        &frame,
        &scenario_column(model.name(), "baseline"),
        &scenario_column(model.name(), "optimistic"),
        &scenario_column(model.name(), "pessimistic"),
    )
    .ok()?;
    let elasticity = calculate_elasticity(&impact, 2.0 * value.abs());
    let (_, shocked_columns) = apply_shock(panel, shock, value);
    Some(ScenarioReport {
        model: model.name().to_string(),
        shock,
        value,
        shocked_columns,
        impact,
        elasticity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use recoverylab_core::domain::{DuplicatePolicy, Month, PanelKey};
    use recoverylab_core::models::ModelSpec;

    use crate::trained::{fit_model, FitContext};

    fn key(region: &str, t: i64) -> PanelKey {
        PanelKey::new(Region::parse(region).unwrap(), Month::new(2020, 1).unwrap().add_months(t))
    }

    fn panel() -> Panel {
        let mut rows = Vec::new();
        for (region, slope) in [("DE", 2.0), ("FR", 0.5)] {
            for t in 0..30 {
                let gdp = 7.0 + 0.01 * t as f64;
                let y = 10.0 + slope * gdp + 0.001 * ((t * 13) % 7) as f64;
                rows.push((key(region, t), vec![y, gdp, 40.0]));
            }
        }
        Panel::from_rows(
            vec!["y".into(), "log_gdp_lag1".into(), "policy_stringency_lag1".into()],
            rows,
            DuplicatePolicy::Reject,
        )
        .unwrap()
    }

    #[test]
    fn shock_types_match_case_insensitively() {
        assert!(ShockType::Gdp.matches("LOG_GDP_lag1"));
        assert!(ShockType::Policy.matches("policy_stringency_lag3"));
        assert!(ShockType::Turnover.matches("turnover_index"));
        assert!(!ShockType::Gdp.matches("gdp"));
        assert!(!ShockType::None.matches("log_gdp"));
        assert_eq!("Policy".parse::<ShockType>().unwrap(), ShockType::Policy);
        assert!("fx".parse::<ShockType>().is_err());
    }

    #[test]
    fn apply_shock_scales_only_matched_columns() {
        let p = panel();
        let (shocked, columns) = apply_shock(&p, ShockType::Gdp, 0.05);
        assert_eq!(columns, vec!["log_gdp_lag1".to_string()]);
        assert!((shocked.value(0, "log_gdp_lag1") - p.value(0, "log_gdp_lag1") * 1.05).abs() < 1e-12);
        assert_eq!(shocked.column("y"), p.column("y"));
        let (same, none) = apply_shock(&p, ShockType::None, 0.5);
        assert!(none.is_empty());
        assert_eq!(same, p);
    }

    #[test]
    fn impact_is_sorted_by_optimistic_deviation() {
        let rows = vec![
            (key("DE", 0), vec![100.0, 110.0, 90.0]),
            (key("DE", 1), vec![200.0, 220.0, 180.0]),
            (key("FR", 0), vec![100.0, 130.0, 80.0]),
            (key("IT", 0), vec![100.0, 102.0, 99.0]),
        ];
        let frame = Panel::from_rows(
            vec!["base".into(), "opt".into(), "pes".into()],
            rows,
            DuplicatePolicy::Reject,
        )
        .unwrap();
        let impact = calculate_impact(&frame, "base", "opt", "pes").unwrap();
        let order: Vec<&str> = impact.iter().map(|i| i.region.as_str()).collect();
        assert_eq!(order, vec!["FR", "DE", "IT"]);
        assert!((impact[1].optimistic_pct - 10.0).abs() < 1e-12);
        assert!((impact[1].pessimistic_pct + 10.0).abs() < 1e-12);

        let elasticity = calculate_elasticity(&impact, DEFAULT_SHOCK_SIZE);
        assert!((elasticity[0].elasticity - 5.0).abs() < 1e-12);
        assert_eq!(elasticity[0].class, ElasticityClass::High);
        assert!((elasticity[1].elasticity - 2.0).abs() < 1e-12);
        assert!((elasticity[2].elasticity - 0.3).abs() < 1e-12);
        assert_eq!(elasticity[2].class, ElasticityClass::Low);
        assert_eq!(ElasticityClass::classify(0.5), ElasticityClass::Moderate);
    }

    #[test]
    fn missing_columns_are_errors() {
        let frame = panel();
        assert!(calculate_impact(&frame, "y", "yhat_ols_optimistic", "y").is_err());
    }

    #[test]
    fn scenarios_append_one_column_per_model() {
        let p = panel();
        let all: Vec<usize> = (0..p.len()).collect();
        let (train, eval): (Vec<usize>, Vec<usize>) =
            all.iter().copied().partition(|&r| p.key(r).month < Month::new(2021, 7).unwrap());
        let inputs = vec!["log_gdp_lag1".to_string()];
        let ctx = FitContext {
            panel: &p,
            train: &train,
            eval: &eval,
            target: "y",
            inputs: &inputs,
            region_one_hot: true,
            seed: 42,
        };
        let (ols, _) = fit_model(&ModelSpec::Ols, &ctx).unwrap();
        let models = vec![ols];

        let frame = simulate_scenario(&p, &eval, &models, "optimistic", ShockType::Gdp, 0.05);
        assert_eq!(frame.len(), eval.len());
        assert!(frame.has_column("yhat_ols_optimistic"));

        let report = symmetric_scenario(&p, &eval, &models[0], ShockType::Gdp, 0.05).unwrap();
        assert_eq!(report.shocked_columns, vec!["log_gdp_lag1".to_string()]);
        assert_eq!(report.impact.len(), 2);
        assert!(report.impact.iter().all(|i| i.optimistic_pct > 0.0 && i.pessimistic_pct < 0.0));
    }
}
