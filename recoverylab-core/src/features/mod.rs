//! Feature engineering on the panel.
//!
//! Every transform is a pure function of the panel: base columns in, one
//! derived column out. Transforms are applied in order, so a later transform
//! may read a column produced by an earlier one (`log_gdp` then
//! `log_gdp_lag1`).
//!
//! # Look-ahead contamination guard
//! No derived value at month t may depend on data from month t+1 or later.
//! `RecoveryIndex` is the one exception: it divides by a fixed baseline year.
//! Every other transform must pass the truncated-vs-full panel test.

pub mod calendar;
pub mod growth;
pub mod lag;
pub mod recovery;
pub mod rolling;
pub mod spec;

pub use calendar::{CovidPeriod, Seasonal, SeasonalBand};
pub use growth::{LogTransform, YoyGrowth};
pub use lag::{add_lags, Lag};
pub use recovery::RecoveryIndex;
pub use rolling::RollingMean;
pub use spec::{build_features, FeatureSpec, RollingSpec};

use thiserror::Error;
use tracing::debug;

use crate::domain::{Panel, PanelError};

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("transform '{transform}' needs missing column '{column}'")]
    MissingInput { transform: String, column: String },

    #[error("invalid parameter for '{transform}': {reason}")]
    InvalidParameter { transform: String, reason: String },

    #[error(transparent)]
    Panel(#[from] PanelError),
}

/// A derived panel column.
pub trait Transform: Send + Sync {
    /// Output column name (e.g. `gdp_lag1`).
    fn name(&self) -> &str;

    /// Columns the transform reads.
    fn inputs(&self) -> Vec<&str>;

    /// Compute the column; one value per panel row.
    fn compute(&self, panel: &Panel) -> Result<Vec<f64>, FeatureError>;
}

/// Apply transforms in order, adding (or replacing) one column each.
pub fn apply(panel: &Panel, transforms: &[Box<dyn Transform>]) -> Result<Panel, FeatureError> {
    let mut out = panel.clone();
    for t in transforms {
        for input in t.inputs() {
            if !out.has_column(input) {
                return Err(FeatureError::MissingInput {
                    transform: t.name().to_string(),
                    column: input.to_string(),
                });
            }
        }
        let values = t.compute(&out)?;
        out.set_column(t.name(), values)?;
        debug!(column = t.name(), "derived feature");
    }
    Ok(out)
}

pub(crate) fn input<'a>(
    panel: &'a Panel,
    transform: &str,
    column: &str,
) -> Result<&'a [f64], FeatureError> {
    panel.column(column).ok_or_else(|| FeatureError::MissingInput {
        transform: transform.to_string(),
        column: column.to_string(),
    })
}

/// `values` shifted by `k` calendar months within each region.
///
/// Row i gets the value at (region, month - k) when that row exists, `NaN`
/// otherwise. Negative `k` would look forward and is never used.
pub(crate) fn shift_months(panel: &Panel, values: &[f64], k: usize) -> Vec<f64> {
    let keys = panel.keys();
    let mut out = vec![f64::NAN; keys.len()];
    for (_, range) in panel.region_ranges() {
        let block = &keys[range.clone()];
        for i in range.clone() {
            let target = keys[i].month.add_months(-(k as i64));
            if let Ok(j) = block.binary_search_by(|key| key.month.cmp(&target)) {
                out[i] = values[range.start + j];
            }
        }
    }
    out
}
