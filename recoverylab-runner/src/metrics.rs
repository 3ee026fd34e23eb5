//! Forecast accuracy metrics: pure functions, actuals and predictions in,
//! scalar out.
//!
//! Inputs of different or zero length give `NaN` instead of panicking.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Guards the MAPE denominator near zero.
pub const MAPE_EPSILON: f64 = 1e-9;

/// Accuracy of one model on one set of rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub n: usize,
    #[serde(with = "nan_as_null")]
    pub rmse: f64,
    #[serde(with = "nan_as_null")]
    pub mae: f64,
    #[serde(with = "nan_as_null")]
    pub mape: f64,
    #[serde(with = "nan_as_null")]
    pub r2: f64,
}

impl ModelMetrics {
    /// Metrics over the pairs where both actual and prediction are finite.
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Self {
        if actual.len() != predicted.len() {
            return Self::empty();
        }
        let (y, yhat): (Vec<f64>, Vec<f64>) = actual
            .iter()
            .zip(predicted)
            .filter(|(a, p)| a.is_finite() && p.is_finite())
            .map(|(a, p)| (*a, *p))
            .unzip();
        Self {
            n: y.len(),
            rmse: rmse(&y, &yhat),
            mae: mae(&y, &yhat),
            mape: mape(&y, &yhat),
            r2: r2(&y, &yhat),
        }
    }

    pub fn empty() -> Self {
        Self {
            n: 0,
            rmse: f64::NAN,
            mae: f64::NAN,
            mape: f64::NAN,
            r2: f64::NAN,
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

fn paired(actual: &[f64], predicted: &[f64]) -> bool {
    !actual.is_empty() && actual.len() == predicted.len()
}

/// Root mean squared error.
pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    if !paired(actual, predicted) {
        return f64::NAN;
    }
    let sse: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum();
    (sse / actual.len() as f64).sqrt()
}

/// Mean absolute error.
pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    if !paired(actual, predicted) {
        return f64::NAN;
    }
    let sae: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).abs()).sum();
    sae / actual.len() as f64
}

/// Mean absolute percentage error, in percent.
///
/// Each denominator is `|actual| + ε`, so an actual of zero contributes a
/// large but finite error.
pub fn mape(actual: &[f64], predicted: &[f64]) -> f64 {
    if !paired(actual, predicted) {
        return f64::NAN;
    }
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs() / (a.abs() + MAPE_EPSILON))
        .sum();
    100.0 * sum / actual.len() as f64
}

/// Coefficient of determination. A constant actual series gives `NaN`.
pub fn r2(actual: &[f64], predicted: &[f64]) -> f64 {
    if !paired(actual, predicted) {
        return f64::NAN;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return f64::NAN;
    }
    let ss_res: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum();
    1.0 - ss_res / ss_tot
}

/// Ascending order with `NaN` after every number.
pub fn nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => a.total_cmp(&b),
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
    }
}

/// Serialize `NaN` as JSON `null` and read `null` back as `NaN`.
pub mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }

    /// The same for vectors.
    pub mod vec {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(values.iter().map(|v| v.is_finite().then_some(*v)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
            let raw = Vec::<Option<f64>>::deserialize(deserializer)?;
            Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
        }
    }
}
