//! Coverage and correlation summaries printed after merge and clean.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::Panel;

/// Non-missing share per column for one calendar year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearCompleteness {
    pub year: i32,
    pub rows: usize,
    /// Shares in the order of the requested columns, rounded to 2 decimals.
    pub shares: Vec<f64>,
}

/// Non-missing share by year for the columns that exist in the panel.
///
/// Returns the columns actually summarised alongside the rows.
pub fn completeness_by_year(panel: &Panel, columns: &[&str]) -> (Vec<String>, Vec<YearCompleteness>) {
    let present: Vec<(&str, &[f64])> = columns
        .iter()
        .filter_map(|c| panel.column(c).map(|v| (*c, v)))
        .collect();

    let mut by_year: BTreeMap<i32, (usize, Vec<usize>)> = BTreeMap::new();
    for (row, key) in panel.keys().iter().enumerate() {
        let entry = by_year
            .entry(key.month.year())
            .or_insert_with(|| (0, vec![0; present.len()]));
        entry.0 += 1;
        for (count, (_, values)) in entry.1.iter_mut().zip(&present) {
            if !values[row].is_nan() {
                *count += 1;
            }
        }
    }

    let rows = by_year
        .into_iter()
        .map(|(year, (rows, counts))| YearCompleteness {
            year,
            rows,
            shares: counts
                .iter()
                .map(|&c| round2(c as f64 / rows as f64))
                .collect(),
        })
        .collect();
    (present.iter().map(|(c, _)| c.to_string()).collect(), rows)
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Pairwise Pearson correlations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    /// `values[i][j]`; `NaN` when fewer than two complete pairs exist or a
    /// column is constant over them.
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        Some(self.values[i][j])
    }
}

/// Correlations over complete pairs, optionally restricted to a year range.
pub fn correlation_matrix(
    panel: &Panel,
    columns: &[&str],
    years: Option<(i32, i32)>,
) -> CorrelationMatrix {
    let rows: Vec<usize> = panel
        .keys()
        .iter()
        .enumerate()
        .filter(|(_, k)| years.map_or(true, |(lo, hi)| (lo..=hi).contains(&k.month.year())))
        .map(|(i, _)| i)
        .collect();
    let present: Vec<(&str, &[f64])> = columns
        .iter()
        .filter_map(|c| panel.column(c).map(|v| (*c, v)))
        .collect();

    let k = present.len();
    let mut values = vec![vec![f64::NAN; k]; k];
    for i in 0..k {
        for j in i..k {
            let pairs = rows.iter().filter_map(|&r| {
                let (a, b) = (present[i].1[r], present[j].1[r]);
                (!a.is_nan() && !b.is_nan()).then_some((a, b))
            });
            let r = pearson(pairs);
            values[i][j] = r;
            values[j][i] = r;
        }
    }
    CorrelationMatrix {
        columns: present.iter().map(|(c, _)| c.to_string()).collect(),
        values,
    }
}

fn pearson(pairs: impl Iterator<Item = (f64, f64)>) -> f64 {
    let pairs: Vec<(f64, f64)> = pairs.collect();
    let n = pairs.len();
    if n < 2 {
        return f64::NAN;
    }
    let nf = n as f64;
    let ma = pairs.iter().map(|p| p.0).sum::<f64>() / nf;
    let mb = pairs.iter().map(|p| p.1).sum::<f64>() / nf;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (a, b) in &pairs {
        sab += (a - ma) * (b - mb);
        saa += (a - ma).powi(2);
        sbb += (b - mb).powi(2);
    }
    if saa == 0.0 || sbb == 0.0 {
        return f64::NAN;
    }
    sab / (saa * sbb).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DuplicatePolicy, Month, PanelKey, Region};

    fn panel() -> Panel {
        let de = Region::parse("DE").unwrap();
        let rows = vec![
            (PanelKey::new(de.clone(), Month::new(2019, 12).unwrap()), vec![1.0, f64::NAN]),
            (PanelKey::new(de.clone(), Month::new(2020, 1).unwrap()), vec![1.0, 2.0]),
            (PanelKey::new(de.clone(), Month::new(2020, 2).unwrap()), vec![2.0, 4.0]),
            (PanelKey::new(de, Month::new(2020, 3).unwrap()), vec![3.0, f64::NAN]),
        ];
        Panel::from_rows(vec!["a".into(), "b".into()], rows, DuplicatePolicy::Reject).unwrap()
    }

    #[test]
    fn completeness_counts_non_missing_per_year() {
        let (cols, rows) = completeness_by_year(&panel(), &["a", "b", "absent"]);
        assert_eq!(cols, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].year, 2019);
        assert_eq!(rows[0].shares, vec![1.0, 0.0]);
        assert_eq!(rows[1].shares, vec![1.0, 0.67]);
    }

    #[test]
    fn correlation_uses_complete_pairs_only() {
        let m = correlation_matrix(&panel(), &["a", "b"], Some((2020, 2022)));
        assert!((m.get("a", "b").unwrap() - 1.0).abs() < 1e-12);
        assert!((m.get("a", "a").unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn correlation_of_constant_column_is_nan() {
        let m = correlation_matrix(&panel(), &["a", "b"], Some((2019, 2019)));
        assert!(m.get("a", "b").unwrap().is_nan());
    }
}
