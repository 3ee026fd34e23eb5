use std::path::PathBuf;
use thiserror::Error;

use super::schema::SchemaError;
use crate::domain::PanelError;
use crate::features::FeatureError;

/// Errors from loading, harmonising and persisting tabular data.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {context}: {source}")]
    Csv {
        context: String,
        #[source]
        source: csv::Error,
    },

    #[error("{table}: no time column (looked for {candidates})")]
    NoTimeColumn { table: String, candidates: String },

    #[error("{table}: missing column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("{table}: has no region column, cannot build a panel from it")]
    NotRegional { table: String },

    #[error("required source '{0}' is missing")]
    MissingSource(String),

    #[error("panel error: {0}")]
    Panel(#[from] PanelError),

    #[error("snapshot schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("feature build: {0}")]
    Feature(#[from] FeatureError),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("no cached snapshot named '{name}'")]
    NoSnapshot { name: String },

    #[error("validation error: {0}")]
    Validation(String),
}

impl DataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DataError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(context: impl Into<String>, source: csv::Error) -> Self {
        DataError::Csv {
            context: context.into(),
            source,
        }
    }
}
