//! Calendar features: seasonal harmonics and the COVID period dummy.

use std::f64::consts::PI;

use super::{FeatureError, Transform};
use crate::domain::{Month, Panel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonalBand {
    Sin,
    Cos,
}

/// `month_sin` / `month_cos`: first annual harmonic of the calendar month.
#[derive(Debug, Clone)]
pub struct Seasonal {
    band: SeasonalBand,
}

impl Seasonal {
    pub fn new(band: SeasonalBand) -> Self {
        Self { band }
    }
}

impl Transform for Seasonal {
    fn name(&self) -> &str {
        match self.band {
            SeasonalBand::Sin => "month_sin",
            SeasonalBand::Cos => "month_cos",
        }
    }

    fn inputs(&self) -> Vec<&str> {
        Vec::new()
    }

    fn compute(&self, panel: &Panel) -> Result<Vec<f64>, FeatureError> {
        Ok(panel
            .keys()
            .iter()
            .map(|k| {
                let angle = 2.0 * PI * k.month.month0() as f64 / 12.0;
                match self.band {
                    SeasonalBand::Sin => angle.sin(),
                    SeasonalBand::Cos => angle.cos(),
                }
            })
            .collect())
    }
}

/// `covid_period`: 1 inside the restriction period, 0 outside.
#[derive(Debug, Clone)]
pub struct CovidPeriod {
    start: Month,
    end: Month,
}

impl CovidPeriod {
    pub fn new(start: Month, end: Month) -> Self {
        Self { start, end }
    }
}

impl Default for CovidPeriod {
    /// March 2020 through June 2022.
    fn default() -> Self {
        Self {
            start: Month::from_index(2020 * 12 + 2),
            end: Month::from_index(2022 * 12 + 5),
        }
    }
}

impl Transform for CovidPeriod {
    fn name(&self) -> &str {
        "covid_period"
    }

    fn inputs(&self) -> Vec<&str> {
        Vec::new()
    }

    fn compute(&self, panel: &Panel) -> Result<Vec<f64>, FeatureError> {
        Ok(panel
            .keys()
            .iter()
            .map(|k| {
                if k.month >= self.start && k.month <= self.end {
                    1.0
                } else {
                    0.0
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::*;

    #[test]
    fn seasonal_terms_cycle_over_the_year() {
        let p = panel(&[("DE", 2020, 1, 0.0), ("DE", 2020, 4, 0.0), ("DE", 2020, 7, 0.0)]);
        let sin = Seasonal::new(SeasonalBand::Sin).compute(&p).unwrap();
        let cos = Seasonal::new(SeasonalBand::Cos).compute(&p).unwrap();
        assert_series(&sin, &[0.0, 1.0, 0.0]);
        assert_series(&cos, &[1.0, 0.0, -1.0]);
    }

    #[test]
    fn covid_period_bounds_are_inclusive() {
        let p = panel(&[
            ("DE", 2020, 2, 0.0),
            ("DE", 2020, 3, 0.0),
            ("DE", 2022, 6, 0.0),
            ("DE", 2022, 7, 0.0),
        ]);
        let out = CovidPeriod::default().compute(&p).unwrap();
        assert_eq!(out, vec![0.0, 1.0, 1.0, 0.0]);
    }
}
