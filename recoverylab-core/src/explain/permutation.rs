//! Model-agnostic Shapley estimates by sampled feature permutations.
//!
//! For each sampled ordering (and its reverse), features are switched from
//! background values to the explained row one at a time; the change in the
//! background-averaged prediction is credited to the switched feature. Every
//! ordering telescopes from the mean background prediction to the row's
//! prediction, so attributions always add up exactly.

use rand::seq::SliceRandom;
use rayon::prelude::*;

use super::{ExplainError, ShapMethod, ShapValues};
use crate::models::{Matrix, Regressor};
use crate::rng::RngHierarchy;

pub struct PermutationShap<'a> {
    model: &'a dyn Regressor,
    background: Matrix,
    n_permutations: usize,
    seeds: RngHierarchy,
}

impl<'a> PermutationShap<'a> {
    pub fn new(
        model: &'a dyn Regressor,
        background: Matrix,
        n_permutations: usize,
        seeds: RngHierarchy,
    ) -> Result<Self, ExplainError> {
        if background.n_rows() == 0 {
            return Err(ExplainError::Empty("background".into()));
        }
        Ok(Self {
            model,
            background,
            n_permutations: n_permutations.max(1),
            seeds,
        })
    }

    /// Mean prediction over the background set.
    pub fn expected_value(&self) -> Result<f64, ExplainError> {
        let preds = self.model.predict(&self.background)?;
        Ok(preds.iter().sum::<f64>() / preds.len() as f64)
    }

    fn shap_row(&self, index: usize, row: &[f64]) -> Result<Vec<f64>, ExplainError> {
        let m = row.len();
        let nb = self.background.n_rows();
        let mut phi = vec![0.0; m];
        let mut rng = self.seeds.rng_for("shap", "permutation", index as u64);
        let mut order: Vec<usize> = (0..m).collect();

        for _ in 0..self.n_permutations {
            order.shuffle(&mut rng);
            let reversed: Vec<usize> = order.iter().rev().copied().collect();
            for ordering in [&order, &reversed] {
                let mut masked = Matrix::zeros((m + 1) * nb, self.background.names().to_vec());
                for k in 0..=m {
                    for b in 0..nb {
                        let target = masked.row_mut(k * nb + b);
                        target.copy_from_slice(self.background.row(b));
                        for &j in &ordering[..k] {
                            target[j] = row[j];
                        }
                    }
                }
                let preds = self.model.predict(&masked)?;
                let means: Vec<f64> = preds
                    .chunks(nb)
                    .map(|c| c.iter().sum::<f64>() / nb as f64)
                    .collect();
                for k in 0..m {
                    phi[ordering[k]] += means[k + 1] - means[k];
                }
            }
        }
        let scale = 1.0 / (2 * self.n_permutations) as f64;
        phi.iter_mut().for_each(|p| *p *= scale);
        Ok(phi)
    }

    pub fn shap_values(&self, x: &Matrix) -> Result<ShapValues, ExplainError> {
        x.check_layout(self.background.names())?;
        let rows = (0..x.n_rows())
            .into_par_iter()
            .map(|i| self.shap_row(i, x.row(i)))
            .collect::<Result<Vec<_>, _>>()?;
        let values = Matrix::from_rows(x.names().to_vec(), rows)?;
        Ok(ShapValues {
            method: ShapMethod::Permutation,
            base_value: self.expected_value()?,
            values,
            data: x.clone(),
        })
    }
}
