//! RecoveryLab Core: panel domain types, data preparation, models and SHAP.
//!
//! This crate contains the pipeline stages that operate on the
//! `(region, month)` panel:
//! - Domain types (regions, months, the panel itself)
//! - Raw source normalisation, merge, cleaning and interpolation
//! - Feature transforms with a no-look-ahead contract
//! - Regressors: OLS, ARIMAX/SARIMAX, histogram boosting, LSTM
//! - SHAP explainers (exact TreeSHAP, permutation fallback)
//! - Parquet snapshots of feature panels

pub mod data;
pub mod domain;
pub mod explain;
pub mod features;
pub mod models;
pub mod rng;
pub mod stats;
