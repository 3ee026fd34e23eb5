//! Trailing rolling mean.
//!
//! `{col}_ma{w}` at month t averages months t-w+1 ..= t of the same region.
//! Every month of the window must be present and non-missing.

use super::{input, shift_months, FeatureError, Transform};
use crate::domain::Panel;

#[derive(Debug, Clone)]
pub struct RollingMean {
    column: String,
    window: usize,
    name: String,
}

impl RollingMean {
    pub fn new(column: &str, window: usize) -> Self {
        Self {
            column: column.to_string(),
            window,
            name: format!("{column}_ma{window}"),
        }
    }
}

impl Transform for RollingMean {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<&str> {
        vec![self.column.as_str()]
    }

    fn compute(&self, panel: &Panel) -> Result<Vec<f64>, FeatureError> {
        if self.window == 0 {
            return Err(FeatureError::InvalidParameter {
                transform: self.name.clone(),
                reason: "window must be at least 1".into(),
            });
        }
        let values = input(panel, &self.name, &self.column)?;
        let mut sum = values.to_vec();
        for k in 1..self.window {
            for (s, v) in sum.iter_mut().zip(shift_months(panel, values, k)) {
                *s += v;
            }
        }
        // NaN propagates through the sum, so one missing month voids the window
        Ok(sum.into_iter().map(|s| s / self.window as f64).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::*;

    const NAN: f64 = f64::NAN;

    #[test]
    fn trailing_window_includes_current_month() {
        let p = panel(&[
            ("DE", 2020, 1, 1.0),
            ("DE", 2020, 2, 2.0),
            ("DE", 2020, 3, 3.0),
            ("DE", 2020, 4, 4.0),
        ]);
        let out = RollingMean::new("x", 3).compute(&p).unwrap();
        assert_series(&out, &[NAN, NAN, 2.0, 3.0]);
    }

    #[test]
    fn window_with_absent_or_missing_month_is_missing() {
        let p = panel(&[
            ("DE", 2020, 1, 1.0),
            ("DE", 2020, 2, NAN),
            ("DE", 2020, 3, 3.0),
            ("DE", 2020, 5, 5.0),
            ("DE", 2020, 6, 6.0),
        ]);
        let out = RollingMean::new("x", 2).compute(&p).unwrap();
        assert_series(&out, &[NAN, NAN, NAN, NAN, 5.5]);
    }

    #[test]
    fn window_one_is_identity() {
        let p = panel(&[("DE", 2020, 1, 1.0), ("FR", 2020, 1, 2.0)]);
        let out = RollingMean::new("x", 1).compute(&p).unwrap();
        assert_series(&out, &[1.0, 2.0]);
    }
}
