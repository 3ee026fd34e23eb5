//! Preprocessor + regressor, fed directly from panel rows.

use tracing::debug;

use super::{complete_rows, DesignSpec, Matrix, ModelError, Preprocessor, Regressor};
use crate::domain::Panel;

pub struct Pipeline {
    pre: Preprocessor,
    model: Box<dyn Regressor>,
}

impl Pipeline {
    /// Fit `model` on `rows` of `panel`. Rows with a missing target are
    /// dropped; rows with missing inputs are dropped too unless the model
    /// routes missing values itself.
    pub fn fit(
        design: &DesignSpec,
        mut model: Box<dyn Regressor>,
        panel: &Panel,
        rows: &[usize],
        target: &str,
    ) -> Result<Self, ModelError> {
        let mut required = vec![target.to_string()];
        if !model.tolerates_missing() {
            required.extend(design.numeric.iter().cloned());
        }
        let usable = complete_rows(panel, rows, &required)?;
        if usable.len() < rows.len() {
            debug!(
                model = model.name(),
                dropped = rows.len() - usable.len(),
                "rows with missing values left out of training"
            );
        }

        let pre = Preprocessor::fit(panel, &usable, design)?;
        let x = pre.transform(panel, &usable)?;
        let y_col = panel
            .column(target)
            .ok_or_else(|| ModelError::UnknownColumn(target.to_string()))?;
        let y: Vec<f64> = usable.iter().map(|&r| y_col[r]).collect();
        model.fit(&x, &y)?;
        Ok(Self { pre, model })
    }

    pub fn name(&self) -> &str {
        self.model.name()
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.pre
    }

    pub fn model(&self) -> &dyn Regressor {
        self.model.as_ref()
    }

    pub fn design_matrix(&self, panel: &Panel, rows: &[usize]) -> Result<Matrix, ModelError> {
        self.pre.transform(panel, rows)
    }

    /// One prediction per row; `NaN` where the model cannot score a row
    /// because of missing inputs.
    pub fn predict(&self, panel: &Panel, rows: &[usize]) -> Result<Vec<f64>, ModelError> {
        let x = self.pre.transform(panel, rows)?;
        if self.model.tolerates_missing() || !x.has_missing() {
            return self.model.predict(&x);
        }
        let scorable: Vec<usize> = (0..x.n_rows())
            .filter(|&i| x.row(i).iter().all(|v| !v.is_nan()))
            .collect();
        let mut out = vec![f64::NAN; rows.len()];
        if scorable.is_empty() {
            return Ok(out);
        }
        let preds = self.model.predict(&x.take_rows(&scorable))?;
        for (i, p) in scorable.into_iter().zip(preds) {
            out[i] = p;
        }
        Ok(out)
    }
}
