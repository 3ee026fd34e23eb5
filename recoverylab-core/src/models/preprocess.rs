//! Design matrix preprocessing: one-hot categoricals, min-max numerics.
//!
//! Output columns are the one-hot blocks (in `DesignSpec::categorical`
//! order) followed by the scaled numeric columns. Unknown categories encode to
//! all zeros. Scaled values outside the training range are not clipped.
//! Missing numeric values stay `NaN`.

use serde::{Deserialize, Serialize};

use super::{Matrix, ModelError};
use crate::domain::{Panel, PanelKey};

/// Categorical inputs derived from the panel key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Categorical {
    Region,
    /// Calendar month, `01`..`12`.
    CalendarMonth,
}

impl Categorical {
    pub fn name(&self) -> &'static str {
        match self {
            Categorical::Region => "region",
            Categorical::CalendarMonth => "calendar_month",
        }
    }

    fn level(&self, key: &PanelKey) -> String {
        match self {
            Categorical::Region => key.region.to_string(),
            Categorical::CalendarMonth => format!("{:02}", key.month.month()),
        }
    }
}

/// Which panel inputs feed a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignSpec {
    #[serde(default)]
    pub categorical: Vec<Categorical>,
    pub numeric: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    spec: DesignSpec,
    categories: Vec<Vec<String>>,
    ranges: Vec<(f64, f64)>,
    names: Vec<String>,
}

impl Preprocessor {
    /// Learn categories and numeric ranges from `rows` of the panel.
    pub fn fit(panel: &Panel, rows: &[usize], spec: &DesignSpec) -> Result<Self, ModelError> {
        let mut names = Vec::new();
        let mut categories = Vec::with_capacity(spec.categorical.len());
        for cat in &spec.categorical {
            let mut levels: Vec<String> = rows.iter().map(|&r| cat.level(panel.key(r))).collect();
            levels.sort();
            levels.dedup();
            names.extend(levels.iter().map(|l| format!("{}_{l}", cat.name())));
            categories.push(levels);
        }

        let mut ranges = Vec::with_capacity(spec.numeric.len());
        for col in &spec.numeric {
            let values = panel
                .column(col)
                .ok_or_else(|| ModelError::UnknownColumn(col.clone()))?;
            let (lo, hi) = rows
                .iter()
                .map(|&r| values[r])
                .filter(|v| !v.is_nan())
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            ranges.push(if lo.is_finite() { (lo, hi) } else { (0.0, 0.0) });
            names.push(col.clone());
        }

        Ok(Self {
            spec: spec.clone(),
            categories,
            ranges,
            names,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.names
    }

    pub fn spec(&self) -> &DesignSpec {
        &self.spec
    }

    /// Encode `rows` of `panel`.
    pub fn transform(&self, panel: &Panel, rows: &[usize]) -> Result<Matrix, ModelError> {
        let mut m = Matrix::zeros(rows.len(), self.names.clone());
        let mut offset = 0;
        for (cat, levels) in self.spec.categorical.iter().zip(&self.categories) {
            for (i, &r) in rows.iter().enumerate() {
                let level = cat.level(panel.key(r));
                if let Ok(pos) = levels.binary_search(&level) {
                    m.set(i, offset + pos, 1.0);
                }
            }
            offset += levels.len();
        }
        for (j, (col, &(lo, hi))) in self.spec.numeric.iter().zip(&self.ranges).enumerate() {
            let values = panel
                .column(col)
                .ok_or_else(|| ModelError::UnknownColumn(col.clone()))?;
            let span = hi - lo;
            for (i, &r) in rows.iter().enumerate() {
                let v = values[r];
                let scaled = if v.is_nan() {
                    f64::NAN
                } else if span > 0.0 {
                    (v - lo) / span
                } else {
                    0.0
                };
                m.set(i, offset + j, scaled);
            }
        }
        Ok(m)
    }

    /// Map a scaled value of numeric column `name` back to its original units.
    pub fn inverse_numeric(&self, name: &str, scaled: f64) -> Option<f64> {
        let j = self.spec.numeric.iter().position(|c| c == name)?;
        let (lo, hi) = self.ranges[j];
        Some(lo + scaled * (hi - lo))
    }
}

/// Rows among `candidates` where every listed column is present.
pub fn complete_rows(panel: &Panel, candidates: &[usize], columns: &[String]) -> Result<Vec<usize>, ModelError> {
    let cols = columns
        .iter()
        .map(|c| panel.column(c).ok_or_else(|| ModelError::UnknownColumn(c.clone())))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(candidates
        .iter()
        .copied()
        .filter(|&r| cols.iter().all(|c| !c[r].is_nan()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DuplicatePolicy, Month, Region};

    fn panel() -> Panel {
        let key = |r: &str, m: u32| PanelKey::new(Region::parse(r).unwrap(), Month::new(2020, m).unwrap());
        Panel::from_rows(
            vec!["gdp".into(), "flat".into()],
            vec![
                (key("DE", 1), vec![10.0, 5.0]),
                (key("DE", 2), vec![20.0, 5.0]),
                (key("FR", 1), vec![30.0, 5.0]),
                (key("IT", 1), vec![40.0, f64::NAN]),
            ],
            DuplicatePolicy::Reject,
        )
        .unwrap()
    }

    fn spec() -> DesignSpec {
        DesignSpec {
            categorical: vec![Categorical::Region],
            numeric: vec!["gdp".into(), "flat".into()],
        }
    }

    #[test]
    fn one_hot_then_scaled_numeric() {
        let p = panel();
        let pre = Preprocessor::fit(&p, &[0, 1, 2], &spec()).unwrap();
        assert_eq!(pre.feature_names(), &["region_DE", "region_FR", "gdp", "flat"]);
        let m = pre.transform(&p, &[0, 2]).unwrap();
        assert_eq!(m.row(0), &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(m.row(1), &[0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn unknown_category_is_all_zeros_and_range_not_clipped() {
        let p = panel();
        let pre = Preprocessor::fit(&p, &[0, 1, 2], &spec()).unwrap();
        let m = pre.transform(&p, &[3]).unwrap();
        assert_eq!(&m.row(0)[..2], &[0.0, 0.0]);
        assert!((m.get(0, 2) - 1.5).abs() < 1e-12);
        assert!(m.get(0, 3).is_nan());
        assert_eq!(pre.inverse_numeric("gdp", 0.5), Some(20.0));
    }

    #[test]
    fn complete_rows_filters_missing() {
        let p = panel();
        let rows = complete_rows(&p, &[0, 1, 2, 3], &["gdp".into(), "flat".into()]).unwrap();
        assert_eq!(rows, vec![0, 1, 2]);
        assert!(complete_rows(&p, &[0], &["absent".into()]).is_err());
    }
}
