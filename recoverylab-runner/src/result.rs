//! Experiment result: everything a run reports, serializable as the
//! artifact manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use recoverylab_core::data::{CleanReport, MergeReport};
use recoverylab_core::domain::{Month, Panel, Region};
use recoverylab_core::explain::{ShapMethod, ShapValues};

use crate::config::{ExperimentConfig, RunId};
use crate::metrics::{nan_as_null, nan_last, ModelMetrics};
use crate::regression::{Coefficient, RegressionTable};
use crate::scenario::ShockType;
use crate::split::{SplitSet, TemporalSplit};
use crate::trained::SkippedFit;

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Complete result of one experiment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub name: String,
    /// BLAKE3 content hash of the modelling panel.
    pub dataset_hash: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: ExperimentConfig,
    pub target: String,
    /// Numeric inputs actually used (configured inputs present in the panel).
    pub inputs: Vec<String>,
    pub data: DataSummary,
    pub split: SplitSummary,
    pub metrics: Vec<MetricsRow>,
    pub region_metrics: Vec<RegionMetricsRow>,
    /// Ranked by validation RMSE.
    pub leaderboard: Vec<LeaderboardEntry>,
    pub summaries: Vec<ModelSummary>,
    pub shap: Vec<ShapSummary>,
    pub skipped: Vec<SkippedFit>,
    #[serde(default)]
    pub walk_forward: Vec<FoldScore>,
    #[serde(default)]
    pub regression: Option<RegressionTable>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioSummary>,

    /// Actual target and `yhat_{model}` per panel row.
    #[serde(skip)]
    pub predictions: Panel,
    /// Holdout rows with `yhat_{model}_{scenario}` columns.
    #[serde(skip)]
    pub scenario_frame: Option<Panel>,
    #[serde(skip)]
    pub shap_values: Vec<(String, ShapValues)>,
}

impl ExperimentResult {
    /// Which set a prediction row belongs to.
    pub fn split_of(&self, month: Month) -> SplitSet {
        if month <= self.split.train_end {
            SplitSet::Train
        } else if self.split.valid_end.map_or(true, |v| month <= v) {
            SplitSet::Valid
        } else {
            SplitSet::Test
        }
    }

    pub fn metrics_for(&self, model: &str, split: SplitSet) -> Option<&ModelMetrics> {
        self.metrics
            .iter()
            .find(|m| m.model == model && m.split == split)
            .map(|m| &m.metrics)
    }

    pub fn best_model(&self) -> Option<&LeaderboardEntry> {
        self.leaderboard.first()
    }
}

/// Where the panel came from and what preparation did to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSummary {
    pub rows: usize,
    pub regions: usize,
    pub first_month: Option<Month>,
    pub last_month: Option<Month>,
    pub merge: Option<MergeReport>,
    pub clean: Option<CleanReport>,
    /// Columns added by feature engineering.
    pub derived: Vec<String>,
}

impl DataSummary {
    pub fn of(panel: &Panel) -> Self {
        let range = panel.month_range();
        Self {
            rows: panel.len(),
            regions: panel.regions().len(),
            first_month: range.map(|r| r.0),
            last_month: range.map(|r| r.1),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub train_end: Month,
    pub valid_end: Option<Month>,
    pub train_rows: usize,
    pub valid_rows: usize,
    pub test_rows: usize,
}

impl From<&TemporalSplit> for SplitSummary {
    fn from(s: &TemporalSplit) -> Self {
        Self {
            train_end: s.train_end,
            valid_end: s.valid_end,
            train_rows: s.train.len(),
            valid_rows: s.valid.len(),
            test_rows: s.test.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub model: String,
    pub split: SplitSet,
    pub metrics: ModelMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMetricsRow {
    pub model: String,
    pub region: Region,
    pub split: SplitSet,
    pub metrics: ModelMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub model: String,
    pub metrics: ModelMetrics,
}

/// Rank models by RMSE on `split`, lowest first; models without a finite
/// RMSE go last.
pub fn build_leaderboard(rows: &[MetricsRow], split: SplitSet) -> Vec<LeaderboardEntry> {
    let mut scored: Vec<&MetricsRow> = rows.iter().filter(|r| r.split == split).collect();
    scored.sort_by(|a, b| nan_last(a.metrics.rmse, b.metrics.rmse).then_with(|| a.model.cmp(&b.model)));
    scored
        .into_iter()
        .enumerate()
        .map(|(i, r)| LeaderboardEntry {
            rank: i + 1,
            model: r.model.clone(),
            metrics: r.metrics,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    #[serde(with = "nan_as_null")]
    pub value: f64,
}

impl FeatureImportance {
    /// Sorted largest first.
    pub fn ranked(pairs: Vec<(String, f64)>) -> Vec<Self> {
        let mut out: Vec<Self> = pairs
            .into_iter()
            .map(|(feature, value)| Self { feature, value })
            .collect();
        out.sort_by(|a, b| nan_last(-a.value, -b.value));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArimaRegionSummary {
    pub region: Region,
    pub last_month: Month,
    pub n_obs: usize,
    #[serde(with = "nan_as_null")]
    pub aic: f64,
    #[serde(with = "nan_as_null")]
    pub bic: f64,
    #[serde(with = "nan_as_null")]
    pub sigma2: f64,
}

/// Fitted-model summary per model kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSummary {
    Linear {
        model: String,
        coefficients: Vec<Coefficient>,
        #[serde(with = "nan_as_null")]
        r_squared: f64,
        #[serde(with = "nan_as_null")]
        aic: f64,
        n_obs: usize,
    },
    Arima {
        model: String,
        label: String,
        regions: Vec<ArimaRegionSummary>,
    },
    Boosting {
        model: String,
        /// Total split gain per feature.
        importance: Vec<FeatureImportance>,
    },
    RegionalBoosting {
        model: String,
        regions: Vec<Region>,
        /// Gain summed over the region models.
        importance: Vec<FeatureImportance>,
    },
    Lstm {
        model: String,
        epochs: usize,
        #[serde(with = "nan_as_null")]
        final_loss: f64,
    },
}

impl ModelSummary {
    pub fn model(&self) -> &str {
        match self {
            ModelSummary::Linear { model, .. }
            | ModelSummary::Arima { model, .. }
            | ModelSummary::Boosting { model, .. }
            | ModelSummary::RegionalBoosting { model, .. }
            | ModelSummary::Lstm { model, .. } => model,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapSummary {
    pub model: String,
    pub method: ShapMethod,
    #[serde(with = "nan_as_null")]
    pub base_value: f64,
    pub rows: usize,
    /// Mean |φ| per feature, largest first.
    pub importance: Vec<FeatureImportance>,
}

/// Metrics of one model on one walk-forward fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldScore {
    pub fold_index: usize,
    pub train_end: Month,
    pub test_start: Month,
    pub test_end: Month,
    pub model: String,
    pub metrics: ModelMetrics,
}

/// Mean percent change of one model's holdout predictions under a
/// scenario, per region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub name: String,
    pub shock: ShockType,
    pub value: f64,
    pub shocked_columns: Vec<String>,
    pub impacts: Vec<ScenarioImpact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioImpact {
    pub model: String,
    pub region: Region,
    #[serde(with = "nan_as_null")]
    pub mean_pct_change: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(model: &str, split: SplitSet, rmse: f64) -> MetricsRow {
        MetricsRow {
            model: model.into(),
            split,
            metrics: ModelMetrics {
                n: 10,
                rmse,
                mae: rmse,
                mape: rmse,
                r2: 0.5,
            },
        }
    }

    #[test]
    fn leaderboard_ranks_by_validation_rmse_with_nan_last() {
        let rows = vec![
            row("xgb", SplitSet::Valid, 0.3),
            row("ols", SplitSet::Valid, f64::NAN),
            row("lgbm", SplitSet::Valid, 0.1),
            row("lgbm", SplitSet::Train, 0.01),
            row("arimax", SplitSet::Valid, 0.2),
        ];
        let board = build_leaderboard(&rows, SplitSet::Valid);
        let order: Vec<&str> = board.iter().map(|e| e.model.as_str()).collect();
        assert_eq!(order, vec!["lgbm", "arimax", "xgb", "ols"]);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[3].rank, 4);
    }

    #[test]
    fn importance_is_sorted_descending() {
        let ranked = FeatureImportance::ranked(vec![
            ("a".into(), 0.2),
            ("b".into(), f64::NAN),
            ("c".into(), 0.9),
        ]);
        let names: Vec<&str> = ranked.iter().map(|f| f.feature.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn summaries_are_tagged_by_kind() {
        let s = ModelSummary::Lstm {
            model: "lstm".into(),
            epochs: 12,
            final_loss: 0.01,
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["kind"], "lstm");
        assert_eq!(s.model(), "lstm");
    }
}
