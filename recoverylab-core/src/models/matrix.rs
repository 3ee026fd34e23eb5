//! Dense row-major design matrix with feature names.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use super::ModelError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    n_rows: usize,
    names: Vec<String>,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(n_rows: usize, names: Vec<String>) -> Self {
        let data = vec![0.0; n_rows * names.len()];
        Self {
            n_rows,
            names,
            data,
        }
    }

    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self, ModelError> {
        let n_cols = names.len();
        let mut data = Vec::with_capacity(rows.len() * n_cols);
        for row in &rows {
            if row.len() != n_cols {
                return Err(ModelError::DimensionMismatch {
                    expected: n_cols,
                    got: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            n_rows: rows.len(),
            names,
            data,
        })
    }

    /// Build from columns of equal length.
    pub fn from_columns(names: Vec<String>, columns: &[Vec<f64>]) -> Result<Self, ModelError> {
        if columns.len() != names.len() {
            return Err(ModelError::DimensionMismatch {
                expected: names.len(),
                got: columns.len(),
            });
        }
        let n_rows = columns.first().map_or(0, Vec::len);
        if let Some(bad) = columns.iter().find(|c| c.len() != n_rows) {
            return Err(ModelError::DimensionMismatch {
                expected: n_rows,
                got: bad.len(),
            });
        }
        let mut m = Self::zeros(n_rows, names);
        for (j, col) in columns.iter().enumerate() {
            for (i, v) in col.iter().enumerate() {
                m.set(i, j, *v);
            }
        }
        Ok(m)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let c = self.n_cols();
        &self.data[i * c..(i + 1) * c]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        let c = self.n_cols();
        &mut self.data[i * c..(i + 1) * c]
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n_cols() + j]
    }

    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        let c = self.n_cols();
        self.data[i * c + j] = v;
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.n_rows).map(|i| self.get(i, j)).collect()
    }

    pub fn take_rows(&self, rows: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(rows.len() * self.n_cols());
        for &i in rows {
            data.extend_from_slice(self.row(i));
        }
        Matrix {
            n_rows: rows.len(),
            names: self.names.clone(),
            data,
        }
    }

    pub fn has_missing(&self) -> bool {
        self.data.iter().any(|v| v.is_nan())
    }

    /// Check that `other` has the same feature layout.
    pub fn check_layout(&self, names: &[String]) -> Result<(), ModelError> {
        if self.names.as_slice() != names {
            return Err(ModelError::FeatureMismatch {
                expected: names.len(),
                got: self.n_cols(),
            });
        }
        Ok(())
    }

    pub fn to_dmatrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.n_rows, self.n_cols(), &self.data)
    }
}
