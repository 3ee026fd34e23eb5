//! Declarative feature set.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    apply, CovidPeriod, FeatureError, Lag, LogTransform, RecoveryIndex, RollingMean, Seasonal,
    SeasonalBand, Transform, YoyGrowth,
};
use crate::domain::Panel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingSpec {
    pub column: String,
    pub window: usize,
}

/// Which derived columns to build.
///
/// Order of application: logs, lags (which may lag a log column), year-on-year
/// growth, rolling means, recovery indices, calendar terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSpec {
    pub log: Vec<String>,
    pub lag_columns: Vec<String>,
    pub lags: Vec<usize>,
    pub yoy: Vec<String>,
    pub rolling: Vec<RollingSpec>,
    pub recovery: Vec<String>,
    pub baseline_year: i32,
    pub seasonal: bool,
    pub covid_period: bool,
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self {
            log: vec!["nights_spent".into(), "gdp".into()],
            lag_columns: vec![
                "gdp".into(),
                "turnover_index".into(),
                "covid_cases".into(),
                "unemployment_rate".into(),
                "policy_stringency".into(),
                "log_nights_spent".into(),
                "log_gdp".into(),
            ],
            lags: vec![1, 2, 3],
            yoy: Vec::new(),
            rolling: Vec::new(),
            recovery: Vec::new(),
            baseline_year: 2019,
            seasonal: false,
            covid_period: false,
        }
    }
}

impl FeatureSpec {
    /// Transforms for this spec, in application order.
    pub fn transforms(&self) -> Vec<Box<dyn Transform>> {
        let mut out: Vec<Box<dyn Transform>> = Vec::new();
        for c in &self.log {
            out.push(Box::new(LogTransform::new(c)));
        }
        for c in &self.lag_columns {
            for &k in &self.lags {
                out.push(Box::new(Lag::new(c, k)));
            }
        }
        for c in &self.yoy {
            out.push(Box::new(YoyGrowth::new(c)));
        }
        for r in &self.rolling {
            out.push(Box::new(RollingMean::new(&r.column, r.window)));
        }
        for c in &self.recovery {
            out.push(Box::new(RecoveryIndex::new(c, self.baseline_year)));
        }
        if self.seasonal {
            out.push(Box::new(Seasonal::new(SeasonalBand::Sin)));
            out.push(Box::new(Seasonal::new(SeasonalBand::Cos)));
        }
        if self.covid_period {
            out.push(Box::new(CovidPeriod::default()));
        }
        out
    }
}

/// Build the feature panel. Transforms whose input columns are absent from
/// the panel (and not produced by an earlier transform) are skipped with a
/// warning. Returns the panel and the names of the derived columns.
pub fn build_features(panel: &Panel, spec: &FeatureSpec) -> Result<(Panel, Vec<String>), FeatureError> {
    let mut available: Vec<String> = panel.column_names().to_vec();
    let mut kept: Vec<Box<dyn Transform>> = Vec::new();
    let mut skipped = 0usize;
    for t in spec.transforms() {
        if let Some(missing) = t.inputs().into_iter().find(|c| !available.iter().any(|a| a == c)) {
            warn!(feature = t.name(), missing, "skipping feature, input column absent");
            skipped += 1;
            continue;
        }
        available.push(t.name().to_string());
        kept.push(t);
    }
    let names: Vec<String> = kept.iter().map(|t| t.name().to_string()).collect();
    let out = apply(panel, &kept)?;
    info!(derived = names.len(), skipped, "built features");
    Ok((out, names))
}
