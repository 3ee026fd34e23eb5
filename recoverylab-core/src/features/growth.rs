//! Log levels and year-on-year growth.

use super::{input, shift_months, FeatureError, Transform};
use crate::domain::Panel;

/// `log_{col}`: natural log for positive values, missing otherwise.
#[derive(Debug, Clone)]
pub struct LogTransform {
    column: String,
    name: String,
}

impl LogTransform {
    pub fn new(column: &str) -> Self {
        Self {
            column: column.to_string(),
            name: format!("log_{column}"),
        }
    }
}

impl Transform for LogTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<&str> {
        vec![self.column.as_str()]
    }

    fn compute(&self, panel: &Panel) -> Result<Vec<f64>, FeatureError> {
        let values = input(panel, &self.name, &self.column)?;
        Ok(values
            .iter()
            .map(|&v| if v > 0.0 { v.ln() } else { f64::NAN })
            .collect())
    }
}

/// `{col}_yoy`: percent change against the same month a year earlier.
#[derive(Debug, Clone)]
pub struct YoyGrowth {
    column: String,
    name: String,
}

impl YoyGrowth {
    pub fn new(column: &str) -> Self {
        Self {
            column: column.to_string(),
            name: format!("{column}_yoy"),
        }
    }
}

impl Transform for YoyGrowth {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<&str> {
        vec![self.column.as_str()]
    }

    fn compute(&self, panel: &Panel) -> Result<Vec<f64>, FeatureError> {
        let values = input(panel, &self.name, &self.column)?;
        let prior = shift_months(panel, values, 12);
        Ok(values
            .iter()
            .zip(&prior)
            .map(|(&v, &p)| {
                if p == 0.0 || p.is_nan() {
                    f64::NAN
                } else {
                    (v / p - 1.0) * 100.0
                }
            })
            .collect())
    }
}
