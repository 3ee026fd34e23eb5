//! Cleaning and interpolation of the merged panel.
//!
//! Steps, in order:
//! 1. keep the configured year range
//! 2. drop rows whose target is missing
//! 3. linear interpolation of interior gaps, per region, in calendar time
//! 4. forward-fill then back-fill, per region
//!
//! No step reads values from another region.
//!
//! `clean_with_features` is the full preparation: interpolation runs on the
//! whole merged history, features are derived there, and only then are the
//! steps above applied. Lags, growth rates and recovery ratios at the start
//! of the study period therefore read the months before it.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::DataError;
use crate::domain::Panel;
use crate::features::{build_features, FeatureSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanConfig {
    /// Inclusive year range.
    pub years: (i32, i32),
    pub target: String,
    /// Columns forward/back-filled within each region.
    pub fill_columns: Vec<String>,
    /// Columns linearly interpolated between known months.
    pub interpolate: Vec<String>,
    /// Longest run of missing months that interpolation will bridge.
    pub max_gap: Option<usize>,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            years: (2020, 2022),
            target: "nights_spent".to_string(),
            fill_columns: vec![
                "policy_stringency".into(),
                "stringency".into(),
                "mobility_retail".into(),
                "mobility_work".into(),
            ],
            interpolate: vec!["gdp".into()],
            max_gap: Some(2),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanReport {
    pub rows_in: usize,
    pub dropped_out_of_range: usize,
    pub dropped_missing_target: usize,
    pub rows_out: usize,
    pub interpolated: usize,
    pub filled: usize,
}

pub fn clean_panel(panel: &Panel, config: &CleanConfig) -> Result<(Panel, CleanReport), DataError> {
    let mut report = CleanReport {
        rows_in: panel.len(),
        ..CleanReport::default()
    };
    let (from, to) = config.years;
    let in_range = panel.filter_rows(|_, k| (from..=to).contains(&k.month.year()));
    report.dropped_out_of_range = panel.len() - in_range.len();

    let target = in_range.require_column(&config.target)?.to_vec();
    let mut out = in_range.filter_rows(|row, _| !target[row].is_nan());
    report.dropped_missing_target = in_range.len() - out.len();

    report.interpolated = interpolate_panel(&mut out, config)?;
    for column in &config.fill_columns {
        if !out.has_column(column) {
            debug!(column = %column, "fill column absent");
            continue;
        }
        report.filled += fill_column(&mut out, column)?;
    }

    out.validate()?;
    report.rows_out = out.len();
    info!(
        rows_in = report.rows_in,
        rows_out = report.rows_out,
        dropped_missing_target = report.dropped_missing_target,
        interpolated = report.interpolated,
        filled = report.filled,
        "cleaned panel"
    );
    Ok((out, report))
}

/// Interpolate features on the merged history, derive features, then clean.
///
/// Back-fill stays after the year cut: run over the full history it would
/// carry study-period values into the months that lags read.
pub fn clean_with_features(
    panel: &Panel,
    config: &CleanConfig,
    spec: &FeatureSpec,
) -> Result<(Panel, Vec<String>, CleanReport), DataError> {
    let mut history = panel.clone();
    let bridged = interpolate_panel(&mut history, config)?;
    let (features, derived) = build_features(&history, spec)?;
    let (clean, mut report) = clean_panel(&features, config)?;
    report.interpolated += bridged;
    Ok((clean, derived, report))
}

/// Interpolate every configured column present in the panel.
pub fn interpolate_panel(panel: &mut Panel, config: &CleanConfig) -> Result<usize, DataError> {
    let mut filled = 0;
    for column in &config.interpolate {
        if !panel.has_column(column) {
            debug!(column = %column, "interpolation column absent");
            continue;
        }
        filled += interpolate_column(panel, column, config.max_gap)?;
    }
    Ok(filled)
}

/// Linear interpolation of interior gaps within each region.
///
/// Positions are calendar month indices, so a region missing whole rows is
/// interpolated by elapsed time. A gap spanning more than `max_gap` months
/// stays missing. Leading and trailing gaps are never extrapolated.
pub fn interpolate_column(
    panel: &mut Panel,
    column: &str,
    max_gap: Option<usize>,
) -> Result<usize, DataError> {
    let ranges = panel.region_ranges();
    let months: Vec<i64> = panel.keys().iter().map(|k| k.month.index()).collect();
    let mut values = panel.require_column(column)?.to_vec();
    let mut filled = 0;

    for (_, range) in ranges {
        let mut prev: Option<usize> = None;
        for i in range {
            if values[i].is_nan() {
                continue;
            }
            if let Some(p) = prev {
                let span = months[i] - months[p];
                let gap = (span - 1) as usize;
                if i > p + 1 && max_gap.map_or(true, |g| gap <= g) {
                    let (v0, v1) = (values[p], values[i]);
                    for j in p + 1..i {
                        let t = (months[j] - months[p]) as f64 / span as f64;
                        values[j] = v0 + (v1 - v0) * t;
                        filled += 1;
                    }
                }
            }
            prev = Some(i);
        }
    }

    panel.set_column(column, values)?;
    Ok(filled)
}

/// Forward-fill then back-fill within each region.
pub fn fill_column(panel: &mut Panel, column: &str) -> Result<usize, DataError> {
    let ranges = panel.region_ranges();
    let mut values = panel.require_column(column)?.to_vec();
    let mut filled = 0;

    for (_, range) in ranges {
        let mut last = f64::NAN;
        for i in range.clone() {
            if values[i].is_nan() {
                if !last.is_nan() {
                    values[i] = last;
                    filled += 1;
                }
            } else {
                last = values[i];
            }
        }
        let mut next = f64::NAN;
        for i in range.rev() {
            if values[i].is_nan() {
                if !next.is_nan() {
                    values[i] = next;
                    filled += 1;
                }
            } else {
                next = values[i];
            }
        }
    }

    panel.set_column(column, values)?;
    Ok(filled)
}
