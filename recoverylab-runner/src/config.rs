//! Serializable experiment configuration.
//!
//! An experiment is one TOML file. Every section has defaults, so a minimal
//! file only names the input panel, the split and the models:
//!
//! ```toml
//! [data]
//! panel = "data/interim/hotel.csv"
//!
//! [split]
//! train_end = "2021-12"
//!
//! [[models]]
//! kind = "xgb"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use recoverylab_core::data::{CleanConfig, MergePlan};
use recoverylab_core::domain::Month;
use recoverylab_core::explain::ShapConfig;
use recoverylab_core::features::FeatureSpec;
use recoverylab_core::models::ModelSpec;
use recoverylab_core::rng::DEFAULT_SEED;

use crate::scenario::ShockType;
use crate::split::WalkForwardConfig;

/// Unique identifier for an experiment (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid experiment TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Where the panel comes from.
///
/// Exactly one of `raw_dir` (merge raw source files) and `panel` (a merged
/// CSV panel) must be given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    pub raw_dir: Option<PathBuf>,
    pub panel: Option<PathBuf>,
    /// The input already carries feature columns: skip cleaning and feature
    /// engineering.
    pub prepared: bool,
    pub merge: MergePlan,
    /// Write the feature panel as a Parquet snapshot here.
    pub snapshot_dir: Option<PathBuf>,
}

/// Model inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DesignConfig {
    pub target: String,
    /// Numeric feature columns. Columns absent from the panel are dropped
    /// with a warning.
    pub inputs: Vec<String>,
    /// One-hot encode the region for global models.
    pub region_one_hot: bool,
}

impl Default for DesignConfig {
    fn default() -> Self {
        let mut inputs = Vec::new();
        for column in ["log_gdp", "policy_stringency", "covid_cases", "log_nights_spent"] {
            for k in 1..=3 {
                inputs.push(format!("{column}_lag{k}"));
            }
        }
        Self {
            target: "log_nights_spent".into(),
            inputs,
            region_one_hot: true,
        }
    }
}

/// Temporal cut-offs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitConfig {
    /// Last training month, inclusive.
    pub train_end: Month,
    /// Last validation month, inclusive. Later rows form the test set.
    #[serde(default)]
    pub valid_end: Option<Month>,
    #[serde(default)]
    pub walk_forward: Option<WalkForwardConfig>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_end: Month::from_index(2021 * 12 + 11),
            valid_end: None,
            walk_forward: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    pub enabled: bool,
    /// Also explain non-tree models with the permutation fallback.
    pub all_models: bool,
    #[serde(flatten)]
    pub shap: ShapConfig,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            all_models: false,
            shap: ShapConfig::default(),
        }
    }
}

/// Pooled OLS of the target on selected regressors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegressionConfig {
    pub y: String,
    pub x: Vec<String>,
    /// Region fixed effects (first region dropped).
    #[serde(default = "default_true")]
    pub fixed_effects: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    pub name: String,
    pub shock: ShockType,
    /// Proportional change, e.g. 0.05 for +5%.
    pub value: f64,
}

/// Full experiment description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Master seed of the per-region model streams.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub clean: CleanConfig,
    #[serde(default)]
    pub features: FeatureSpec,
    #[serde(default)]
    pub design: DesignConfig,
    #[serde(default)]
    pub split: SplitConfig,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub explain: ExplainConfig,
    #[serde(default)]
    pub regression: Option<RegressionConfig>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioConfig>,
}

fn default_name() -> String {
    "experiment".into()
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

impl ExperimentConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        config.resolve_paths(path.parent().unwrap_or(Path::new(".")));
        Ok(config)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Relative data paths are taken relative to the config file.
    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.data.raw_dir,
            &mut self.data.panel,
            &mut self.data.snapshot_dir,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        match (&self.data.raw_dir, &self.data.panel) {
            (Some(_), Some(_)) => return invalid("[data] takes raw_dir or panel, not both".into()),
            (None, None) => return invalid("[data] needs raw_dir or panel".into()),
            _ => {}
        }
        if self.data.prepared && self.data.raw_dir.is_some() {
            return invalid("[data] prepared applies to a panel file, not a raw directory".into());
        }
        if self.design.target.trim().is_empty() {
            return invalid("[design] target must be named".into());
        }
        if self.models.is_empty() {
            return invalid("at least one [[models]] entry is required".into());
        }
        let mut names = HashSet::new();
        for model in &self.models {
            if !names.insert(model.name()) {
                return invalid(format!("model '{}' listed twice", model.name()));
            }
            if let Some(params) = model.gbm_params() {
                params
                    .validate()
                    .map_err(|e| ConfigError::Invalid(format!("{}: {e}", model.name())))?;
            }
        }

        let (from, to) = self.clean.years;
        if from > to {
            return invalid(format!("[clean] years {from}..{to} is empty"));
        }
        let train_end = self.split.train_end;
        if !self.data.prepared && !(from..=to).contains(&train_end.year()) {
            return invalid(format!(
                "[split] train_end {train_end} lies outside the period {from}-{to}"
            ));
        }
        if let Some(valid_end) = self.split.valid_end {
            if valid_end <= train_end {
                return invalid(format!(
                    "[split] valid_end {valid_end} must come after train_end {train_end}"
                ));
            }
        }
        if let Some(wf) = &self.split.walk_forward {
            wf.validate().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }

        let mut scenario_names = HashSet::new();
        for s in &self.scenarios {
            if s.name.is_empty() || !scenario_names.insert(s.name.as_str()) {
                return invalid(format!("scenario name '{}' is empty or repeated", s.name));
            }
            if !s.value.is_finite() || s.value <= -1.0 {
                return invalid(format!("scenario '{}': shock value {} out of range", s.name, s.value));
            }
        }
        if let Some(r) = &self.regression {
            if r.x.is_empty() {
                return invalid("[regression] needs at least one x variable".into());
            }
        }
        Ok(())
    }

    /// BLAKE3 hash of the canonical JSON form. Identical configs share
    /// artifacts.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    /// First 12 hex digits of the run id, used for directory names.
    pub fn short_id(&self) -> Result<String, ConfigError> {
        Ok(self.run_id()?[..12].to_string())
    }
}
