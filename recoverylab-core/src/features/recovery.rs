//! Recovery index against a pre-pandemic baseline year.

use super::{input, FeatureError, Transform};
use crate::domain::{Month, Panel};

/// `{col}_recovery`: value divided by the same calendar month of
/// `baseline_year` in the same region. Missing when the baseline month is
/// absent, missing or zero.
#[derive(Debug, Clone)]
pub struct RecoveryIndex {
    column: String,
    baseline_year: i32,
    name: String,
}

impl RecoveryIndex {
    pub fn new(column: &str, baseline_year: i32) -> Self {
        Self {
            column: column.to_string(),
            baseline_year,
            name: format!("{column}_recovery"),
        }
    }
}

impl Transform for RecoveryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<&str> {
        vec![self.column.as_str()]
    }

    fn compute(&self, panel: &Panel) -> Result<Vec<f64>, FeatureError> {
        let values = input(panel, &self.name, &self.column)?;
        let out = panel
            .keys()
            .iter()
            .zip(values)
            .map(|(key, &v)| {
                let base = Month::new(self.baseline_year, key.month.month())
                    .ok()
                    .and_then(|m| panel.row_of(&key.region, m))
                    .map_or(f64::NAN, |row| values[row]);
                if base == 0.0 || base.is_nan() {
                    f64::NAN
                } else {
                    v / base
                }
            })
            .collect();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::*;

    #[test]
    fn ratio_to_same_month_of_baseline_year() {
        let p = panel(&[
            ("DE", 2019, 1, 200.0),
            ("DE", 2020, 1, 50.0),
            ("DE", 2020, 2, 60.0),
            ("FR", 2020, 1, 10.0),
        ]);
        let out = RecoveryIndex::new("x", 2019).compute(&p).unwrap();
        assert_series(&out, &[1.0, 0.25, f64::NAN, f64::NAN]);
    }
}
