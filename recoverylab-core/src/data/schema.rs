//! Parquet layout of panel snapshots.

use polars::prelude::*;

/// Key columns every panel snapshot carries.
pub const KEY_COLUMNS: [&str; 2] = ["region", "month"];

/// Expected Parquet schema of a panel snapshot.
pub struct PanelSchema;

impl PanelSchema {
    /// `region: String, month: Date`, then one `Float64` per value column.
    pub fn schema(columns: &[String]) -> Schema {
        let mut fields = vec![
            Field::new("region".into(), DataType::String),
            Field::new("month".into(), DataType::Date),
        ];
        fields.extend(
            columns
                .iter()
                .map(|c| Field::new(c.as_str().into(), DataType::Float64)),
        );
        Schema::from_iter(fields)
    }

    /// Value columns of a snapshot: everything that is not a key column.
    pub fn value_columns(df: &DataFrame) -> Vec<String> {
        df.get_column_names()
            .into_iter()
            .map(|n| n.to_string())
            .filter(|n| !KEY_COLUMNS.contains(&n.as_str()))
            .collect()
    }

    /// Check that `df` carries the key columns and a `Float64` for each of `columns`.
    pub fn validate(df: &DataFrame, columns: &[String]) -> Result<(), SchemaError> {
        let actual = df.schema();
        for field in Self::schema(columns).iter_fields() {
            let name = field.name().as_str();
            match actual.get(name) {
                None => return Err(SchemaError::MissingColumn(name.to_string())),
                Some(dtype) if dtype != field.dtype() => {
                    return Err(SchemaError::TypeMismatch {
                        column: name.to_string(),
                        expected: field.dtype().clone(),
                        actual: dtype.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("snapshot is missing column {0}")]
    MissingColumn(String),

    #[error("snapshot column {column} has type {actual:?}, expected {expected:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}
