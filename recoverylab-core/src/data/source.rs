//! Long-format source tables.
//!
//! Every raw source ends up as a list of `(region?, month, values...)`
//! records before it is merged into the panel. A table without a region
//! column (exchange rates) is region-less and joins on month alone.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use super::error::DataError;
use crate::domain::{DuplicatePolicy, Month, Panel, PanelKey, Region};

/// Column names probed, in order, for the time axis.
pub const TIME_CANDIDATES: [&str; 3] = ["month", "time", "date"];

/// Column names probed, case-insensitively and in order, for the region.
pub const REGION_CANDIDATES: [&str; 5] = ["region", "iso3", "iso_code", "countrycode", "geo"];

/// One row of a source table.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub region: Option<Region>,
    pub month: Month,
    pub values: Vec<f64>,
}

/// A normalised long-format source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTable {
    pub name: String,
    pub columns: Vec<String>,
    pub records: Vec<SourceRecord>,
    /// Whether records carry a region.
    pub regional: bool,
}

/// Counters from loading a CSV, reported at debug level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub rows_read: usize,
    pub bad_month: usize,
    pub bad_region: usize,
    pub non_numeric_columns: Vec<String>,
    /// Cells of value columns that did not parse and were read as missing.
    pub unparseable_cells: usize,
}

impl SourceTable {
    pub fn new(name: &str, columns: Vec<String>, regional: bool) -> Self {
        Self {
            name: name.to_string(),
            columns,
            records: Vec::new(),
            regional,
        }
    }

    /// Load a long-format CSV, detecting the time and region columns.
    ///
    /// Unparseable months or regions drop the row (counted in the stats).
    /// A column is a value column when it has at least as many numeric cells
    /// as unparseable ones; the unparseable cells of a value column are
    /// missing.
    pub fn from_reader<R: Read>(name: &str, reader: R) -> Result<(Self, LoadStats), DataError> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| DataError::csv(name, e))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let time_idx = TIME_CANDIDATES
            .iter()
            .find_map(|c| headers.iter().position(|h| h.eq_ignore_ascii_case(c)))
            .ok_or_else(|| DataError::NoTimeColumn {
                table: name.to_string(),
                candidates: TIME_CANDIDATES.join(", "),
            })?;
        let region_idx = REGION_CANDIDATES
            .iter()
            .find_map(|c| headers.iter().position(|h| h.eq_ignore_ascii_case(c)));

        let rows: Vec<csv::StringRecord> = rdr
            .records()
            .collect::<Result<_, _>>()
            .map_err(|e| DataError::csv(name, e))?;

        let mut stats = LoadStats {
            rows_read: rows.len(),
            ..LoadStats::default()
        };

        let mut value_idx = Vec::new();
        for (i, header) in headers.iter().enumerate() {
            if i == time_idx || Some(i) == region_idx || is_key_like(header) {
                continue;
            }
            let (mut numeric, mut unparseable) = (0usize, 0usize);
            for cell in rows.iter().filter_map(|r| r.get(i)) {
                match parse_value(cell) {
                    Some(v) if !v.is_nan() => numeric += 1,
                    Some(_) => {}
                    None => unparseable += 1,
                }
            }
            if unparseable == 0 || (numeric > 0 && numeric >= unparseable) {
                value_idx.push(i);
                stats.unparseable_cells += unparseable;
            } else {
                stats.non_numeric_columns.push(header.clone());
            }
        }

        let columns: Vec<String> = value_idx.iter().map(|&i| headers[i].clone()).collect();
        let mut table = SourceTable::new(name, columns, region_idx.is_some());

        for row in &rows {
            let Ok(month) = Month::parse(row.get(time_idx).unwrap_or("")) else {
                stats.bad_month += 1;
                continue;
            };
            let region = match region_idx {
                Some(ri) => match Region::parse(row.get(ri).unwrap_or("")) {
                    Ok(r) => Some(r),
                    Err(_) => {
                        stats.bad_region += 1;
                        continue;
                    }
                },
                None => None,
            };
            let values = value_idx
                .iter()
                .map(|&i| row.get(i).and_then(parse_value).unwrap_or(f64::NAN))
                .collect();
            table.records.push(SourceRecord {
                region,
                month,
                values,
            });
        }

        debug!(
            table = name,
            rows = stats.rows_read,
            kept = table.records.len(),
            unparseable_cells = stats.unparseable_cells,
            bad_month = stats.bad_month,
            bad_region = stats.bad_region,
            "loaded source table"
        );
        Ok((table, stats))
    }

    /// Load from a file path.
    pub fn from_path(name: &str, path: &Path) -> Result<Self, DataError> {
        let file = fs::File::open(path).map_err(|e| DataError::io(path, e))?;
        let (table, stats) = Self::from_reader(name, file)?;
        if stats.bad_month > 0 {
            warn!(
                table = name,
                rows = stats.bad_month,
                "dropped rows with unparseable dates"
            );
        }
        if stats.unparseable_cells > 0 {
            warn!(
                table = name,
                cells = stats.unparseable_cells,
                "read unparseable value cells as missing"
            );
        }
        Ok(table)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(i) = self.column_index(from) {
            self.columns[i] = to.to_string();
        }
    }

    /// Keep only the named value columns.
    pub fn select(&self, names: &[&str]) -> Result<SourceTable, DataError> {
        let idx: Vec<usize> = names
            .iter()
            .map(|n| {
                self.column_index(n).ok_or_else(|| DataError::MissingColumn {
                    table: self.name.clone(),
                    column: n.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(SourceTable {
            name: self.name.clone(),
            columns: names.iter().map(|n| n.to_string()).collect(),
            records: self
                .records
                .iter()
                .map(|r| SourceRecord {
                    region: r.region.clone(),
                    month: r.month,
                    values: idx.iter().map(|&i| r.values[i]).collect(),
                })
                .collect(),
            regional: self.regional,
        })
    }

    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&SourceRecord) -> bool,
    {
        self.records.retain(keep);
    }

    /// Append `fallback` records whose key is not already present.
    ///
    /// Columns are matched by name; columns missing from `fallback` become
    /// `NaN`. Used for quarterly GDP with an annual fallback.
    pub fn coalesce(mut self, fallback: &SourceTable) -> SourceTable {
        let mut seen: std::collections::HashSet<(Option<Region>, Month)> = self
            .records
            .iter()
            .map(|r| (r.region.clone(), r.month))
            .collect();
        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| fallback.column_index(c))
            .collect();
        for rec in &fallback.records {
            if seen.insert((rec.region.clone(), rec.month)) {
                self.records.push(SourceRecord {
                    region: rec.region.clone(),
                    month: rec.month,
                    values: mapping
                        .iter()
                        .map(|m| m.map_or(f64::NAN, |i| rec.values[i]))
                        .collect(),
                });
            }
        }
        self
    }

    /// Number of distinct regions.
    pub fn region_count(&self) -> usize {
        self.records
            .iter()
            .filter_map(|r| r.region.as_ref())
            .collect::<std::collections::BTreeSet<_>>()
            .len()
    }

    /// Convert to a panel. Requires a regional table.
    pub fn into_panel(self, policy: DuplicatePolicy) -> Result<Panel, DataError> {
        if !self.regional {
            return Err(DataError::NotRegional { table: self.name });
        }
        let rows = self
            .records
            .into_iter()
            .filter_map(|r| r.region.map(|region| (PanelKey::new(region, r.month), r.values)))
            .collect();
        Ok(Panel::from_rows(self.columns, rows, policy)?)
    }

    /// Write as CSV: `region` (when regional), `month`, value columns.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), DataError> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header: Vec<&str> = Vec::new();
        if self.regional {
            header.push("region");
        }
        header.push("month");
        header.extend(self.columns.iter().map(String::as_str));
        wtr.write_record(&header)
            .map_err(|e| DataError::csv(&self.name, e))?;
        for rec in &self.records {
            let mut row: Vec<String> = Vec::with_capacity(header.len());
            if self.regional {
                row.push(rec.region.as_ref().map(|r| r.to_string()).unwrap_or_default());
            }
            row.push(rec.month.to_string());
            row.extend(rec.values.iter().map(|v| format_value(*v)));
            wtr.write_record(&row)
                .map_err(|e| DataError::csv(&self.name, e))?;
        }
        wtr.flush()
            .map_err(|e| DataError::io(self.name.as_str(), e))?;
        Ok(())
    }

    pub fn write_path(&self, path: &Path) -> Result<(), DataError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
        }
        let file = fs::File::create(path).map_err(|e| DataError::io(path, e))?;
        self.write_csv(file)
    }
}

/// Columns that identify rows rather than carry measurements.
fn is_key_like(header: &str) -> bool {
    let h = header.to_ascii_lowercase();
    TIME_CANDIDATES.contains(&h.as_str())
        || REGION_CANDIDATES.contains(&h.as_str())
        || h == "year"
}

/// Parse a numeric cell. Empty and NA-like cells are `NaN`, as are Eurostat
/// "not available" markers with a flag (`: c`, `:z`); flags after a number
/// (`123.4 p`) are ignored. `None` means non-numeric.
pub fn parse_value(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Some(f64::NAN);
    }
    match cell.to_ascii_lowercase().as_str() {
        "na" | "nan" | "null" | "none" | ":" | "-" => return Some(f64::NAN),
        _ => {}
    }
    if cell.starts_with(':') {
        return Some(f64::NAN);
    }
    let token = cell.split_whitespace().next().unwrap_or(cell);
    token.parse::<f64>().ok()
}

/// Format a value for CSV; `NaN` becomes an empty cell.
pub fn format_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}
