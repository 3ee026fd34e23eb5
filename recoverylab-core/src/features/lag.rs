//! Calendar-exact lag: the value at the same region, `k` months earlier.
//!
//! A region missing month t-k gets a missing lag; lags are never back-filled,
//! so the first k months of every region are always missing.

use super::{apply, input, shift_months, FeatureError, Transform};
use crate::domain::Panel;

#[derive(Debug, Clone)]
pub struct Lag {
    column: String,
    k: usize,
    name: String,
}

impl Lag {
    pub fn new(column: &str, k: usize) -> Self {
        Self {
            column: column.to_string(),
            k,
            name: format!("{column}_lag{k}"),
        }
    }
}

/// One `{column}_lag{k}` column per entry of `lags`.
pub fn add_lags(panel: &Panel, column: &str, lags: &[usize]) -> Result<Panel, FeatureError> {
    let transforms: Vec<Box<dyn Transform>> = lags
        .iter()
        .map(|&k| Box::new(Lag::new(column, k)) as Box<dyn Transform>)
        .collect();
    apply(panel, &transforms)
}

impl Transform for Lag {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<&str> {
        vec![self.column.as_str()]
    }

    fn compute(&self, panel: &Panel) -> Result<Vec<f64>, FeatureError> {
        if self.k == 0 {
            return Err(FeatureError::InvalidParameter {
                transform: self.name.clone(),
                reason: "lag must be at least 1".into(),
            });
        }
        let values = input(panel, &self.name, &self.column)?;
        Ok(shift_months(panel, values, self.k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::*;

    const NAN: f64 = f64::NAN;

    #[test]
    fn names_follow_column_lag_k() {
        assert_eq!(Lag::new("gdp", 3).name(), "gdp_lag3");
    }

    #[test]
    fn first_k_months_of_each_region_are_missing() {
        let p = panel(&[
            ("DE", 2020, 1, 1.0),
            ("DE", 2020, 2, 2.0),
            ("DE", 2020, 3, 3.0),
            ("FR", 2020, 1, 10.0),
            ("FR", 2020, 2, 20.0),
        ]);
        let lag1 = Lag::new("x", 1).compute(&p).unwrap();
        assert_series(&lag1, &[NAN, 1.0, 2.0, NAN, 10.0]);
        let lag2 = Lag::new("x", 2).compute(&p).unwrap();
        assert_series(&lag2, &[NAN, NAN, 1.0, NAN, NAN]);
    }

    #[test]
    fn gaps_in_the_calendar_give_missing_lags() {
        let p = panel(&[("DE", 2020, 1, 1.0), ("DE", 2020, 3, 3.0), ("DE", 2020, 4, 4.0)]);
        let lag1 = Lag::new("x", 1).compute(&p).unwrap();
        assert_series(&lag1, &[NAN, NAN, 3.0]);
    }

    #[test]
    fn add_lags_appends_named_columns() {
        let p = panel(&[("DE", 2020, 1, 1.0), ("DE", 2020, 2, 2.0), ("DE", 2020, 3, 3.0)]);
        let out = add_lags(&p, "x", &[1, 2]).unwrap();
        assert_eq!(out.column_names(), &["x", "x_lag1", "x_lag2"]);
        assert_series(out.column("x_lag2").unwrap(), &[NAN, NAN, 1.0]);
    }

    #[test]
    fn zero_lag_is_rejected() {
        let p = panel(&[("DE", 2020, 1, 1.0)]);
        assert!(Lag::new("x", 0).compute(&p).is_err());
    }
}
