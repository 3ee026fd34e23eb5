//! Exact path-dependent TreeSHAP for additive tree ensembles.
//!
//! For every leaf, the algorithm tracks the unique features on the path from
//! the root together with the fraction of "zero" (feature unknown, follow
//! covers) and "one" (feature known, follow `x`) paths that reach it, and the
//! permutation weights of each subset size. Attributions are exact Shapley
//! values of the conditional expectation defined by training covers, so
//! `expected_value + Σ φ = prediction`.

use rayon::prelude::*;

use super::{ExplainError, ShapMethod, ShapValues};
use crate::models::{Matrix, Tree, TreeEnsemble};

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero: f64,
    one: f64,
    weight: f64,
}

fn extend(path: &mut Vec<PathElement>, zero: f64, one: f64, feature: Option<usize>) {
    let l = path.len();
    path.push(PathElement {
        feature,
        zero,
        one,
        weight: if l == 0 { 1.0 } else { 0.0 },
    });
    let denom = (l + 1) as f64;
    for i in (0..l).rev() {
        path[i + 1].weight += one * path[i].weight * (i + 1) as f64 / denom;
        path[i].weight = zero * path[i].weight * (l - i) as f64 / denom;
    }
}

fn unwind(path: &mut Vec<PathElement>, index: usize) {
    let len = path.len();
    let lf = len as f64;
    let PathElement { zero, one, .. } = path[index];
    let mut next = path[len - 1].weight;
    for i in (0..len - 1).rev() {
        let rest = (len - 1 - i) as f64;
        if one != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next * lf / ((i + 1) as f64 * one);
            next = tmp - path[i].weight * zero * rest / lf;
        } else {
            path[i].weight = path[i].weight * lf / (zero * rest);
        }
    }
    for i in index..len - 1 {
        path[i].feature = path[i + 1].feature;
        path[i].zero = path[i + 1].zero;
        path[i].one = path[i + 1].one;
    }
    path.pop();
}

/// Total weight of the path with element `index` removed.
fn unwound_sum(path: &[PathElement], index: usize) -> f64 {
    let len = path.len();
    let lf = len as f64;
    let PathElement { zero, one, .. } = path[index];
    let mut next = path[len - 1].weight;
    let mut total = 0.0;
    for i in (0..len - 1).rev() {
        let rest = (len - 1 - i) as f64;
        if one != 0.0 {
            let tmp = next * lf / ((i + 1) as f64 * one);
            total += tmp;
            next = path[i].weight - tmp * zero * rest / lf;
        } else if zero != 0.0 {
            total += path[i].weight / zero * lf / rest;
        }
    }
    total
}

pub struct TreeShap<'a> {
    ensemble: &'a TreeEnsemble,
}

impl<'a> TreeShap<'a> {
    pub fn new(ensemble: &'a TreeEnsemble) -> Self {
        Self { ensemble }
    }

    pub fn expected_value(&self) -> f64 {
        self.ensemble.expected_value()
    }

    /// Attributions for one row.
    pub fn shap_row(&self, row: &[f64]) -> Vec<f64> {
        let mut phi = vec![0.0; self.ensemble.n_features()];
        for tree in &self.ensemble.trees {
            recurse(tree, row, 0, &[], 1.0, 1.0, None, &mut phi);
        }
        phi
    }

    pub fn shap_values(&self, x: &Matrix) -> Result<ShapValues, ExplainError> {
        x.check_layout(&self.ensemble.feature_names)?;
        let rows: Vec<Vec<f64>> = (0..x.n_rows())
            .into_par_iter()
            .map(|i| self.shap_row(x.row(i)))
            .collect();
        let values = Matrix::from_rows(x.names().to_vec(), rows)?;
        Ok(ShapValues {
            method: ShapMethod::Tree,
            base_value: self.expected_value(),
            values,
            data: x.clone(),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &Tree,
    row: &[f64],
    node: usize,
    parent_path: &[PathElement],
    zero: f64,
    one: f64,
    feature: Option<usize>,
    phi: &mut [f64],
) {
    let nodes = tree.nodes();
    let mut path = parent_path.to_vec();
    extend(&mut path, zero, one, feature);
    let n = &nodes[node];

    let Some(split) = &n.split else {
        for i in 1..path.len() {
            let w = unwound_sum(&path, i);
            let el = path[i];
            if let Some(f) = el.feature {
                phi[f] += w * (el.one - el.zero) * n.value;
            }
        }
        return;
    };

    let (hot, cold) = if split.goes_left(row[split.feature]) {
        (n.left, n.right)
    } else {
        (n.right, n.left)
    };
    let cover = n.cover;
    let hot_zero = nodes[hot].cover / cover;
    let cold_zero = nodes[cold].cover / cover;

    let mut incoming_zero = 1.0;
    let mut incoming_one = 1.0;
    if let Some(k) = path.iter().position(|e| e.feature == Some(split.feature)) {
        incoming_zero = path[k].zero;
        incoming_one = path[k].one;
        unwind(&mut path, k);
    }

    recurse(
        tree,
        row,
        hot,
        &path,
        hot_zero * incoming_zero,
        incoming_one,
        Some(split.feature),
        phi,
    );
    recurse(
        tree,
        row,
        cold,
        &path,
        cold_zero * incoming_zero,
        0.0,
        Some(split.feature),
        phi,
    );
}
