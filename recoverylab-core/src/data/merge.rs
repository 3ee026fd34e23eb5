//! Merge harmonised sources into the monthly country panel.
//!
//! The Eurostat macro table is the base: it decides which (region, month)
//! rows exist. Every other source is left-joined onto it, regional sources on
//! (region, month) and region-less sources (FX rates) on month.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::DataError;
use super::source::SourceTable;
use crate::domain::{DuplicatePolicy, Month, Panel, Region};

/// Source column renames applied before joining.
pub const COLUMN_ALIASES: [(&str, &str); 2] = [
    ("cases_per_100k", "covid_cases"),
    ("StringencyIndex_Average", "policy_stringency"),
];

/// How to merge sources into a panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePlan {
    /// Inclusive month window applied after joining.
    pub window: Option<(Month, Month)>,
    /// Columns whose missing values become 0 after the join.
    #[serde(default)]
    pub fill_zero: Vec<String>,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for MergePlan {
    fn default() -> Self {
        Self {
            window: Month::new(2015, 1)
                .ok()
                .zip(Month::new(2025, 12).ok()),
            fill_zero: Vec::new(),
            duplicate_policy: DuplicatePolicy::KeepFirst,
        }
    }
}

/// Per-source join outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinReport {
    pub source: String,
    pub columns: Vec<String>,
    /// Panel rows that found a matching source record.
    pub matched_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub base_rows: usize,
    pub rows: usize,
    pub regions: usize,
    pub joins: Vec<JoinReport>,
}

/// Base source file stems under the raw directory, first present wins.
pub const BASE_SOURCES: [&str; 2] = ["eurostat", "eurostat_hotels"];

/// Optional joined sources: each entry lists alternative file stems.
pub const JOIN_SOURCES: [&[&str]; 3] = [
    &["covid", "covid_cases"],
    &["fx_rates", "exchange_rates"],
    &["policy_stringency"],
];

fn find_source(dir: &Path, stems: &[&str]) -> Option<(String, std::path::PathBuf)> {
    stems.iter().find_map(|stem| {
        let path = dir.join(format!("{stem}.csv"));
        path.exists().then(|| (stem.to_string(), path))
    })
}

/// Load the base and whichever joined sources exist in `dir`.
///
/// The base is required. Missing joined sources are skipped with a warning.
pub fn load_raw_dir(dir: &Path) -> Result<(SourceTable, Vec<SourceTable>), DataError> {
    let (name, path) = find_source(dir, &BASE_SOURCES)
        .ok_or_else(|| DataError::MissingSource(BASE_SOURCES.join(" | ")))?;
    let base = SourceTable::from_path(&name, &path)?;
    info!(source = %name, rows = base.records.len(), regions = base.region_count(), "loaded base");

    let mut joins = Vec::new();
    for stems in JOIN_SOURCES {
        match find_source(dir, stems) {
            Some((name, path)) => {
                let table = SourceTable::from_path(&name, &path)?;
                info!(source = %name, rows = table.records.len(), regional = table.regional, "loaded source");
                joins.push(table);
            }
            None => warn!(source = stems[0], "source not found, skipping"),
        }
    }
    Ok((base, joins))
}

/// Apply `COLUMN_ALIASES` to a table in place.
pub fn harmonize_columns(table: &mut SourceTable) {
    for (from, to) in COLUMN_ALIASES {
        if table.has_column(from) && !table.has_column(to) {
            table.rename_column(from, to);
        }
    }
}

/// Merge `base` and `joins` into a validated panel.
pub fn merge_sources(
    base: SourceTable,
    joins: &[SourceTable],
    plan: &MergePlan,
) -> Result<(Panel, MergeReport), DataError> {
    let mut base = base;
    harmonize_columns(&mut base);
    let base_name = base.name.clone();
    let mut panel = base.into_panel(plan.duplicate_policy)?;
    let base_rows = panel.len();
    info!(source = %base_name, rows = base_rows, "merge base loaded");

    let mut reports = Vec::with_capacity(joins.len());
    for source in joins {
        let mut source = source.clone();
        harmonize_columns(&mut source);
        reports.push(left_join(&mut panel, &source)?);
    }

    for column in &plan.fill_zero {
        match panel.column_mut(column) {
            Some(values) => values.iter_mut().filter(|v| v.is_nan()).for_each(|v| *v = 0.0),
            None => warn!(column = %column, "fill_zero column not in panel"),
        }
    }

    if let Some((start, end)) = plan.window {
        panel = panel.filter_rows(|_, k| k.month >= start && k.month <= end);
    }
    panel.validate()?;

    let report = MergeReport {
        base_rows,
        rows: panel.len(),
        regions: panel.regions().len(),
        joins: reports,
    };
    info!(rows = report.rows, regions = report.regions, "merged panel");
    Ok((panel, report))
}

/// Left-join one source onto the panel. First record per key wins.
fn left_join(panel: &mut Panel, source: &SourceTable) -> Result<JoinReport, DataError> {
    let mut lookup: HashMap<(Option<&Region>, Month), &[f64]> = HashMap::new();
    for rec in &source.records {
        let region = if source.regional { rec.region.as_ref() } else { None };
        lookup.entry((region, rec.month)).or_insert(&rec.values);
    }

    let n = panel.len();
    let mut matched = 0usize;
    let mut columns: Vec<Vec<f64>> = vec![vec![f64::NAN; n]; source.columns.len()];
    for (row, key) in panel.keys().iter().enumerate() {
        let region = if source.regional { Some(&key.region) } else { None };
        if let Some(values) = lookup.get(&(region, key.month)) {
            matched += 1;
            for (col, v) in columns.iter_mut().zip(values.iter()) {
                col[row] = *v;
            }
        }
    }

    let mut names = Vec::with_capacity(source.columns.len());
    for (name, values) in source.columns.iter().zip(columns) {
        let target = if panel.has_column(name) {
            let renamed = format!("{name}_{}", source.name);
            warn!(column = %name, renamed = %renamed, "column collision, base keeps the name");
            renamed
        } else {
            name.clone()
        };
        panel.set_column(&target, values)?;
        names.push(target);
    }

    info!(source = %source.name, matched, of = n, "joined source");
    Ok(JoinReport {
        source: source.name.clone(),
        columns: names,
        matched_rows: matched,
    })
}
