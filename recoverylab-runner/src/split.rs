//! Temporal train/validation/test split and walk-forward folds.
//!
//! Rows are assigned by calendar month only, so every region shares the same
//! cut-offs and no training row lies after a validation row.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use recoverylab_core::domain::{Month, Panel};

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("{set} set is empty (train_end {train_end})")]
    EmptySet { set: SplitSet, train_end: Month },

    #[error("valid_end {valid_end} is not after train_end {train_end}")]
    InvalidCutoff { train_end: Month, valid_end: Month },

    #[error("insufficient data: {months} months < minimum {needed}")]
    InsufficientData { months: usize, needed: usize },

    #[error("invalid walk-forward config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitSet {
    Train,
    Valid,
    Test,
}

impl SplitSet {
    pub const ALL: [SplitSet; 3] = [SplitSet::Train, SplitSet::Valid, SplitSet::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            SplitSet::Train => "train",
            SplitSet::Valid => "valid",
            SplitSet::Test => "test",
        }
    }
}

impl std::fmt::Display for SplitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row indices of each set, ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalSplit {
    pub train_end: Month,
    pub valid_end: Option<Month>,
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
    pub test: Vec<usize>,
}

impl TemporalSplit {
    pub fn set_of(&self, month: Month) -> SplitSet {
        if month <= self.train_end {
            SplitSet::Train
        } else if self.valid_end.map_or(true, |v| month <= v) {
            SplitSet::Valid
        } else {
            SplitSet::Test
        }
    }

    pub fn rows(&self, set: SplitSet) -> &[usize] {
        match set {
            SplitSet::Train => &self.train,
            SplitSet::Valid => &self.valid,
            SplitSet::Test => &self.test,
        }
    }

    /// Validation and test rows, ascending.
    pub fn holdout(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.valid.iter().chain(&self.test).copied().collect();
        rows.sort_unstable();
        rows
    }
}

/// Split by month: `≤ train_end` is training, `(train_end, valid_end]`
/// validation, the rest test. Without `valid_end` everything after
/// `train_end` is validation.
pub fn temporal_split(
    panel: &Panel,
    train_end: Month,
    valid_end: Option<Month>,
) -> Result<TemporalSplit, SplitError> {
    if let Some(v) = valid_end {
        if v <= train_end {
            return Err(SplitError::InvalidCutoff {
                train_end,
                valid_end: v,
            });
        }
    }
    let mut split = TemporalSplit {
        train_end,
        valid_end,
        train: Vec::new(),
        valid: Vec::new(),
        test: Vec::new(),
    };
    for (row, key) in panel.keys().iter().enumerate() {
        match split.set_of(key.month) {
            SplitSet::Train => split.train.push(row),
            SplitSet::Valid => split.valid.push(row),
            SplitSet::Test => split.test.push(row),
        }
    }
    for (set, rows) in [(SplitSet::Train, &split.train), (SplitSet::Valid, &split.valid)] {
        if rows.is_empty() {
            return Err(SplitError::EmptySet { set, train_end });
        }
    }
    Ok(split)
}

// ─── Walk-forward ────────────────────────────────────────────────────

/// Expanding-window folds over the panel's months.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WalkForwardConfig {
    pub n_folds: usize,
    /// Months in the first training window.
    pub min_train_months: usize,
    /// Months evaluated per fold.
    pub horizon: usize,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            n_folds: 3,
            min_train_months: 24,
            horizon: 6,
        }
    }
}

impl WalkForwardConfig {
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.n_folds == 0 || self.horizon == 0 || self.min_train_months == 0 {
            return Err(SplitError::InvalidConfig(
                "n_folds, min_train_months and horizon must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// One fold: train on months `≤ train_end`, evaluate `[test_start, test_end]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldSpec {
    pub fold_index: usize,
    pub train_end: Month,
    pub test_start: Month,
    pub test_end: Month,
}

impl FoldSpec {
    /// `(train rows, test rows)` of `panel`.
    pub fn rows(&self, panel: &Panel) -> (Vec<usize>, Vec<usize>) {
        let mut train = Vec::new();
        let mut test = Vec::new();
        for (row, key) in panel.keys().iter().enumerate() {
            if key.month <= self.train_end {
                train.push(row);
            } else if key.month >= self.test_start && key.month <= self.test_end {
                test.push(row);
            }
        }
        (train, test)
    }
}

/// Create expanding-window folds over the distinct, sorted `months`.
///
/// Folds are anchored at the end of the data: the last fold evaluates the
/// final `horizon` months, each earlier fold the `horizon` months before.
/// Every fold trains on all months before its test window, and the first
/// training window holds at least `min_train_months`. Fewer folds than
/// requested are created when the data are short.
pub fn create_folds(months: &[Month], config: &WalkForwardConfig) -> Result<Vec<FoldSpec>, SplitError> {
    config.validate()?;
    let total = months.len();
    let needed = config.min_train_months + config.horizon;
    if total < needed {
        return Err(SplitError::InsufficientData { months: total, needed });
    }
    let n = config.n_folds.min((total - config.min_train_months) / config.horizon);
    let first_test = total - n * config.horizon;

    Ok((0..n)
        .map(|i| {
            let start = first_test + i * config.horizon;
            FoldSpec {
                fold_index: i,
                train_end: months[start - 1],
                test_start: months[start],
                test_end: months[start + config.horizon - 1],
            }
        })
        .collect())
}
