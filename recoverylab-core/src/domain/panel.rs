//! The panel dataset: one row per (region, month), numeric columns.
//!
//! Invariants (enforced by every constructor, checked by `validate`):
//! - keys are unique
//! - rows are sorted by region, then strictly increasing month
//! - every column holds exactly one value per row
//!
//! Missing values are `NaN`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use thiserror::Error;

use super::{Month, Region};

/// Row key of the panel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PanelKey {
    pub region: Region,
    pub month: Month,
}

impl PanelKey {
    pub fn new(region: Region, month: Month) -> Self {
        Self { region, month }
    }
}

/// What to do when two input rows share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the first row in input order.
    #[default]
    KeepFirst,
    /// Fail with `PanelError::DuplicateKey`.
    Reject,
}

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("duplicate panel key ({region}, {month})")]
    DuplicateKey { region: Region, month: Month },

    #[error("panel rows out of order at row {row}: ({region}, {month})")]
    Unsorted { row: usize, region: Region, month: Month },

    #[error("column '{column}' has {actual} values, panel has {expected} rows")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("row has {actual} values, expected {expected}")]
    RowWidth { expected: usize, actual: usize },

    #[error("missing column '{0}'")]
    MissingColumn(String),
}

/// Panel dataset keyed by (region, month).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    keys: Vec<PanelKey>,
    names: Vec<String>,
    data: Vec<Vec<f64>>,
}

impl Panel {
    /// Empty panel with the given columns.
    pub fn with_columns(names: Vec<String>) -> Self {
        let data = vec![Vec::new(); names.len()];
        Self {
            keys: Vec::new(),
            names,
            data,
        }
    }

    /// Build a panel from unordered rows.
    ///
    /// Rows are stably sorted by key; duplicates are resolved by `policy`
    /// (keep-first keeps the earliest row in input order).
    pub fn from_rows(
        names: Vec<String>,
        rows: Vec<(PanelKey, Vec<f64>)>,
        policy: DuplicatePolicy,
    ) -> Result<Self, PanelError> {
        let width = names.len();
        for (_, values) in &rows {
            if values.len() != width {
                return Err(PanelError::RowWidth {
                    expected: width,
                    actual: values.len(),
                });
            }
        }

        let mut rows = rows;
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let mut keys: Vec<PanelKey> = Vec::with_capacity(rows.len());
        let mut data = vec![Vec::with_capacity(rows.len()); width];
        for (key, values) in rows {
            if keys.last() == Some(&key) {
                match policy {
                    DuplicatePolicy::KeepFirst => continue,
                    DuplicatePolicy::Reject => {
                        return Err(PanelError::DuplicateKey {
                            region: key.region,
                            month: key.month,
                        })
                    }
                }
            }
            keys.push(key);
            for (col, v) in data.iter_mut().zip(values) {
                col.push(v);
            }
        }

        Ok(Self { keys, names, data })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[PanelKey] {
        &self.keys
    }

    pub fn key(&self, row: usize) -> &PanelKey {
        &self.keys[row]
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.column_index(name).map(|i| self.data[i].as_slice())
    }

    pub fn require_column(&self, name: &str) -> Result<&[f64], PanelError> {
        self.column(name)
            .ok_or_else(|| PanelError::MissingColumn(name.to_string()))
    }

    /// Value at (row, column), `NaN` when the column does not exist.
    pub fn value(&self, row: usize, name: &str) -> f64 {
        self.column(name).map(|c| c[row]).unwrap_or(f64::NAN)
    }

    /// Insert or replace a column.
    pub fn set_column(&mut self, name: &str, values: Vec<f64>) -> Result<(), PanelError> {
        if values.len() != self.len() {
            return Err(PanelError::LengthMismatch {
                column: name.to_string(),
                expected: self.len(),
                actual: values.len(),
            });
        }
        match self.column_index(name) {
            Some(i) => self.data[i] = values,
            None => {
                self.names.push(name.to_string());
                self.data.push(values);
            }
        }
        Ok(())
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut [f64]> {
        self.column_index(name).map(|i| self.data[i].as_mut_slice())
    }

    pub fn drop_column(&mut self, name: &str) -> Option<Vec<f64>> {
        let i = self.column_index(name)?;
        self.names.remove(i);
        Some(self.data.remove(i))
    }

    /// Keep only the named columns, in the given order.
    pub fn select_columns(&self, names: &[&str]) -> Result<Panel, PanelError> {
        let mut out = Panel {
            keys: self.keys.clone(),
            names: Vec::with_capacity(names.len()),
            data: Vec::with_capacity(names.len()),
        };
        for name in names {
            let col = self.require_column(name)?;
            out.names.push(name.to_string());
            out.data.push(col.to_vec());
        }
        Ok(out)
    }

    /// Keep rows for which `keep(row, key)` is true. Order is preserved,
    /// so the invariants carry over.
    pub fn filter_rows<F>(&self, mut keep: F) -> Panel
    where
        F: FnMut(usize, &PanelKey) -> bool,
    {
        let rows: Vec<usize> = (0..self.len())
            .filter(|&i| keep(i, &self.keys[i]))
            .collect();
        self.take_rows(&rows)
    }

    /// Panel of the given rows. `rows` must be ascending.
    pub fn take_rows(&self, rows: &[usize]) -> Panel {
        Panel {
            keys: rows.iter().map(|&i| self.keys[i].clone()).collect(),
            names: self.names.clone(),
            data: self
                .data
                .iter()
                .map(|col| rows.iter().map(|&i| col[i]).collect())
                .collect(),
        }
    }

    /// Contiguous row range of each region, in region order.
    pub fn region_ranges(&self) -> Vec<(Region, Range<usize>)> {
        let mut out: Vec<(Region, Range<usize>)> = Vec::new();
        let mut start = 0;
        for i in 1..=self.keys.len() {
            if i == self.keys.len() || self.keys[i].region != self.keys[start].region {
                out.push((self.keys[start].region.clone(), start..i));
                start = i;
            }
        }
        out
    }

    pub fn regions(&self) -> Vec<Region> {
        self.region_ranges().into_iter().map(|(r, _)| r).collect()
    }

    /// Distinct months across all regions, ascending.
    pub fn months(&self) -> BTreeSet<Month> {
        self.keys.iter().map(|k| k.month).collect()
    }

    pub fn month_range(&self) -> Option<(Month, Month)> {
        let months = self.months();
        Some((*months.iter().next()?, *months.iter().next_back()?))
    }

    /// Row index of a key (binary search).
    pub fn row_of(&self, region: &Region, month: Month) -> Option<usize> {
        self.keys
            .binary_search_by(|k| {
                k.region
                    .cmp(region)
                    .then_with(|| k.month.cmp(&month))
            })
            .ok()
    }

    /// Lookup map from key to row, for bulk joins.
    pub fn key_index(&self) -> HashMap<&PanelKey, usize> {
        self.keys.iter().enumerate().map(|(i, k)| (k, i)).collect()
    }

    /// Check all panel invariants.
    pub fn validate(&self) -> Result<(), PanelError> {
        for (name, col) in self.names.iter().zip(&self.data) {
            if col.len() != self.keys.len() {
                return Err(PanelError::LengthMismatch {
                    column: name.clone(),
                    expected: self.keys.len(),
                    actual: col.len(),
                });
            }
        }
        for (i, pair) in self.keys.windows(2).enumerate() {
            if pair[0] == pair[1] {
                return Err(PanelError::DuplicateKey {
                    region: pair[1].region.clone(),
                    month: pair[1].month,
                });
            }
            if pair[0] > pair[1] {
                return Err(PanelError::Unsorted {
                    row: i + 1,
                    region: pair[1].region.clone(),
                    month: pair[1].month,
                });
            }
        }
        Ok(())
    }

    /// BLAKE3 hash over keys, column names and values.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for key in &self.keys {
            hasher.update(key.region.as_str().as_bytes());
            hasher.update(&key.month.index().to_le_bytes());
        }
        for (name, col) in self.names.iter().zip(&self.data) {
            hasher.update(name.as_bytes());
            for v in col {
                hasher.update(&v.to_bits().to_le_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(r: &str, y: i32, m: u32) -> PanelKey {
        PanelKey::new(Region::parse(r).unwrap(), Month::new(y, m).unwrap())
    }

    fn sample() -> Panel {
        Panel::from_rows(
            vec!["x".into()],
            vec![
                (key("FR", 2020, 2), vec![4.0]),
                (key("DE", 2020, 1), vec![1.0]),
                (key("FR", 2020, 1), vec![3.0]),
                (key("DE", 2020, 2), vec![2.0]),
            ],
            DuplicatePolicy::Reject,
        )
        .unwrap()
    }

    #[test]
    fn from_rows_sorts_by_region_then_month() {
        let p = sample();
        assert_eq!(p.column("x").unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn keep_first_uses_input_order() {
        let p = Panel::from_rows(
            vec!["x".into()],
            vec![
                (key("DE", 2020, 1), vec![1.0]),
                (key("DE", 2020, 1), vec![9.0]),
            ],
            DuplicatePolicy::KeepFirst,
        )
        .unwrap();
        assert_eq!(p.len(), 1);
        assert_eq!(p.column("x").unwrap(), &[1.0]);
    }

    #[test]
    fn reject_policy_errors_on_duplicates() {
        let err = Panel::from_rows(
            vec!["x".into()],
            vec![
                (key("DE", 2020, 1), vec![1.0]),
                (key("DE", 2020, 1), vec![9.0]),
            ],
            DuplicatePolicy::Reject,
        )
        .unwrap_err();
        assert!(matches!(err, PanelError::DuplicateKey { .. }));
    }

    #[test]
    fn row_width_is_checked() {
        let err = Panel::from_rows(
            vec!["x".into(), "y".into()],
            vec![(key("DE", 2020, 1), vec![1.0])],
            DuplicatePolicy::KeepFirst,
        )
        .unwrap_err();
        assert!(matches!(err, PanelError::RowWidth { .. }));
    }

    #[test]
    fn region_ranges_are_contiguous() {
        let p = sample();
        let ranges = p.region_ranges();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].0.as_str(), "DE");
        assert_eq!(ranges[0].1, 0..2);
        assert_eq!(ranges[1].1, 2..4);
    }

    #[test]
    fn row_of_finds_keys() {
        let p = sample();
        let fr = Region::parse("FR").unwrap();
        assert_eq!(p.row_of(&fr, Month::new(2020, 2).unwrap()), Some(3));
        assert_eq!(p.row_of(&fr, Month::new(2020, 3).unwrap()), None);
    }

    #[test]
    fn set_column_checks_length() {
        let mut p = sample();
        assert!(p.set_column("y", vec![0.0; 3]).is_err());
        p.set_column("y", vec![0.0; 4]).unwrap();
        assert_eq!(p.column_names(), &["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn filter_rows_preserves_invariants() {
        let p = sample();
        let only_feb = p.filter_rows(|_, k| k.month.month() == 2);
        assert_eq!(only_feb.len(), 2);
        assert_eq!(only_feb.column("x").unwrap(), &[2.0, 4.0]);
        assert!(only_feb.validate().is_ok());
    }

    #[test]
    fn content_hash_changes_with_values() {
        let p = sample();
        let mut q = sample();
        q.column_mut("x").unwrap()[0] = 100.0;
        assert_eq!(p.content_hash(), sample().content_hash());
        assert_ne!(p.content_hash(), q.content_hash());
    }
}
