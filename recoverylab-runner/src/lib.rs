//! RecoveryLab Runner: experiment orchestration on top of `recoverylab-core`.
//!
//! This crate provides:
//! - TOML experiment configuration with content-addressed run ids
//! - Temporal train/validation/test split and walk-forward folds
//! - Model training (global, per-region, ARIMAX, LSTM) and scoring
//! - Leaderboard, SHAP summaries and a pooled panel regression
//! - Shock scenarios and demand elasticities
//! - JSON/CSV/Markdown artifacts

pub mod config;
pub mod experiment;
pub mod export;
pub mod metrics;
pub mod regression;
pub mod result;
pub mod scenario;
pub mod split;
pub mod trained;

pub use config::{ConfigError, ExperimentConfig, RunId};
pub use experiment::{prepare_panel, run_experiment, run_on_panel, ExperimentOutcome, RunError};
pub use export::{generate_report, load_artifacts, save_artifacts};
pub use metrics::ModelMetrics;
pub use regression::{run_panel_regression, RegressionTable};
pub use result::{ExperimentResult, LeaderboardEntry, ModelSummary, SCHEMA_VERSION};
pub use scenario::{
    apply_shock, calculate_elasticity, calculate_impact, simulate_scenario, symmetric_scenario, ElasticityClass,
    RegionElasticity, RegionImpact, ScenarioReport, ShockType,
};
pub use split::{create_folds, temporal_split, FoldSpec, SplitError, SplitSet, TemporalSplit, WalkForwardConfig};
pub use trained::{fit_model, FitContext, SkippedFit, TrainedModel};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn experiment_result_is_send_sync() {
        assert_send::<ExperimentResult>();
        assert_sync::<ExperimentResult>();
    }

    #[test]
    fn trained_model_is_send_sync() {
        assert_send::<TrainedModel>();
        assert_sync::<TrainedModel>();
    }

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<ExperimentConfig>();
        assert_sync::<ExperimentConfig>();
        assert_send::<WalkForwardConfig>();
        assert_sync::<WalkForwardConfig>();
    }

    #[test]
    fn metrics_and_split_are_send_sync() {
        assert_send::<ModelMetrics>();
        assert_sync::<ModelMetrics>();
        assert_send::<TemporalSplit>();
        assert_sync::<TemporalSplit>();
    }

    #[test]
    fn scenario_types_are_send_sync() {
        assert_send::<ScenarioReport>();
        assert_sync::<ScenarioReport>();
        assert_send::<RegressionTable>();
        assert_sync::<RegressionTable>();
    }
}
