//! Single-layer LSTM regressor over monthly windows.
//!
//! A window is `window` consecutive months of one region; the network reads
//! the design rows in order and predicts the target of the last month from
//! the final hidden state through a linear head. Training is plain BPTT with
//! Adam, global-norm gradient clipping and early stopping once the epoch loss
//! stops improving. Targets are min-max scaled internally.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Matrix, ModelError};
use crate::domain::PanelKey;
use crate::rng::{RngHierarchy, DEFAULT_SEED};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LstmParams {
    /// Hidden state size
    pub hidden: usize,
    /// Months per input window
    pub window: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Global gradient norm cap
    pub clip_norm: f64,
    /// Epochs without improvement before stopping
    pub patience: usize,
    pub min_delta: f64,
    pub seed: u64,
}

impl Default for LstmParams {
    fn default() -> Self {
        Self {
            hidden: 16,
            window: 6,
            epochs: 60,
            batch_size: 32,
            learning_rate: 0.005,
            clip_norm: 1.0,
            patience: 8,
            min_delta: 1e-6,
            seed: DEFAULT_SEED,
        }
    }
}

/// Row indices of one input sequence, oldest first; the target is the last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub rows: Vec<usize>,
}

impl Window {
    pub fn target_row(&self) -> usize {
        self.rows[self.rows.len() - 1]
    }
}

/// Every run of `window` rows that share a region and cover consecutive
/// months. `keys` must be in panel order (region, then month).
pub fn build_windows(keys: &[PanelKey], window: usize) -> Vec<Window> {
    if window == 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut run_start = 0;
    for i in 0..keys.len() {
        if i > 0 {
            let prev = &keys[i - 1];
            let contiguous = prev.region == keys[i].region && prev.month.succ() == keys[i].month;
            if !contiguous {
                run_start = i;
            }
        }
        if i + 1 - run_start >= window {
            out.push(Window {
                rows: (i + 1 - window..=i).collect(),
            });
        }
    }
    out
}

/// Offsets of the gate weights, recurrent weights, biases and head inside
/// the flat parameter vector. Gate order: input, forget, cell, output.
#[derive(Debug, Clone, Copy)]
struct Layout {
    d: usize,
    h: usize,
}

impl Layout {
    fn w(&self) -> usize {
        0
    }
    fn u(&self) -> usize {
        4 * self.h * self.d
    }
    fn b(&self) -> usize {
        self.u() + 4 * self.h * self.h
    }
    fn v(&self) -> usize {
        self.b() + 4 * self.h
    }
    fn out(&self) -> usize {
        self.v() + self.h
    }
    fn len(&self) -> usize {
        self.out() + 1
    }
}

struct Step {
    x: Vec<f64>,
    h_prev: Vec<f64>,
    c_prev: Vec<f64>,
    /// Activated gates, `4h` values.
    gates: Vec<f64>,
    c: Vec<f64>,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

struct Network {
    layout: Layout,
    params: Vec<f64>,
}

impl Network {
    fn init(d: usize, h: usize, rng: &mut StdRng) -> Self {
        let layout = Layout { d, h };
        let limit = 1.0 / (h as f64).sqrt();
        let mut params: Vec<f64> = (0..layout.len()).map(|_| rng.gen_range(-limit..limit)).collect();
        for j in 0..4 * h {
            params[layout.b() + j] = if (h..2 * h).contains(&j) { 1.0 } else { 0.0 };
        }
        params[layout.out()] = 0.0;
        Self { layout, params }
    }

    fn forward(&self, x: &Matrix, rows: &[usize]) -> (f64, Vec<Step>) {
        let Layout { d, h } = self.layout;
        let p = &self.params;
        let mut hs = vec![0.0; h];
        let mut cs = vec![0.0; h];
        let mut steps = Vec::with_capacity(rows.len());
        for &r in rows {
            let xt = x.row(r);
            let mut gates = vec![0.0; 4 * h];
            for (g, gate) in gates.iter_mut().enumerate() {
                let mut z = p[self.layout.b() + g];
                let wrow = &p[self.layout.w() + g * d..self.layout.w() + (g + 1) * d];
                z += wrow.iter().zip(xt).map(|(a, b)| a * b).sum::<f64>();
                let urow = &p[self.layout.u() + g * h..self.layout.u() + (g + 1) * h];
                z += urow.iter().zip(&hs).map(|(a, b)| a * b).sum::<f64>();
                *gate = if (2 * h..3 * h).contains(&g) { z.tanh() } else { sigmoid(z) };
            }
            let mut c_new = vec![0.0; h];
            let mut h_new = vec![0.0; h];
            for j in 0..h {
                let (i, f, g, o) = (gates[j], gates[h + j], gates[2 * h + j], gates[3 * h + j]);
                c_new[j] = f * cs[j] + i * g;
                h_new[j] = o * c_new[j].tanh();
            }
            steps.push(Step {
                x: xt.to_vec(),
                h_prev: std::mem::replace(&mut hs, h_new),
                c_prev: std::mem::replace(&mut cs, c_new.clone()),
                gates,
                c: c_new,
            });
        }
        let v = &p[self.layout.v()..self.layout.v() + h];
        let y = p[self.layout.out()] + v.iter().zip(&hs).map(|(a, b)| a * b).sum::<f64>();
        (y, steps)
    }

    /// Accumulate gradients of `0.5 * (y - target)^2 * scale` into `grad`,
    /// where `dy` is already `(y - target) * scale`.
    fn backward(&self, steps: &[Step], dy: f64, grad: &mut [f64]) {
        let Layout { d, h } = self.layout;
        let p = &self.params;
        let Some(last) = steps.last() else { return };
        let h_last: Vec<f64> = (0..h)
            .map(|j| last.gates[3 * h + j] * last.c[j].tanh())
            .collect();

        for j in 0..h {
            grad[self.layout.v() + j] += dy * h_last[j];
        }
        grad[self.layout.out()] += dy;

        let mut dh: Vec<f64> = (0..h).map(|j| dy * p[self.layout.v() + j]).collect();
        let mut dc = vec![0.0; h];
        let mut dz = vec![0.0; 4 * h];
        for step in steps.iter().rev() {
            for j in 0..h {
                let (i, f, g, o) = (
                    step.gates[j],
                    step.gates[h + j],
                    step.gates[2 * h + j],
                    step.gates[3 * h + j],
                );
                let tc = step.c[j].tanh();
                let d_o = dh[j] * tc;
                dc[j] += dh[j] * o * (1.0 - tc * tc);
                let d_i = dc[j] * g;
                let d_g = dc[j] * i;
                let d_f = dc[j] * step.c_prev[j];
                dz[j] = d_i * i * (1.0 - i);
                dz[h + j] = d_f * f * (1.0 - f);
                dz[2 * h + j] = d_g * (1.0 - g * g);
                dz[3 * h + j] = d_o * o * (1.0 - o);
                dc[j] *= f;
            }
            for (gi, &dzg) in dz.iter().enumerate() {
                if dzg == 0.0 {
                    continue;
                }
                let w0 = self.layout.w() + gi * d;
                for (k, xv) in step.x.iter().enumerate() {
                    grad[w0 + k] += dzg * xv;
                }
                let u0 = self.layout.u() + gi * h;
                for (k, hv) in step.h_prev.iter().enumerate() {
                    grad[u0 + k] += dzg * hv;
                }
                grad[self.layout.b() + gi] += dzg;
            }
            for (k, dhk) in dh.iter_mut().enumerate() {
                *dhk = dz
                    .iter()
                    .enumerate()
                    .map(|(gi, dzg)| dzg * p[self.layout.u() + gi * h + k])
                    .sum();
            }
        }
    }
}

struct Adam {
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
}

impl Adam {
    const BETA1: f64 = 0.9;
    const BETA2: f64 = 0.999;
    const EPS: f64 = 1e-8;

    fn new(n: usize) -> Self {
        Self {
            m: vec![0.0; n],
            v: vec![0.0; n],
            t: 0,
        }
    }

    fn step(&mut self, params: &mut [f64], grad: &[f64], lr: f64) {
        self.t += 1;
        let bc1 = 1.0 - Self::BETA1.powi(self.t);
        let bc2 = 1.0 - Self::BETA2.powi(self.t);
        for (k, g) in grad.iter().enumerate() {
            self.m[k] = Self::BETA1 * self.m[k] + (1.0 - Self::BETA1) * g;
            self.v[k] = Self::BETA2 * self.v[k] + (1.0 - Self::BETA2) * g * g;
            params[k] -= lr * (self.m[k] / bc1) / ((self.v[k] / bc2).sqrt() + Self::EPS);
        }
    }
}

/// LSTM regressor. Unlike the tabular models it consumes windows of rows,
/// so it does not implement `Regressor`.
pub struct LstmRegressor {
    params: LstmParams,
    network: Option<Network>,
    feature_names: Vec<String>,
    target_range: (f64, f64),
    loss_history: Vec<f64>,
}

impl LstmRegressor {
    pub fn new(params: LstmParams) -> Self {
        Self {
            params,
            network: None,
            feature_names: Vec::new(),
            target_range: (0.0, 1.0),
            loss_history: Vec::new(),
        }
    }

    pub fn params(&self) -> &LstmParams {
        &self.params
    }

    /// Mean training loss per completed epoch (scaled target units).
    pub fn loss_history(&self) -> &[f64] {
        &self.loss_history
    }

    fn scale(&self, y: f64) -> f64 {
        let (lo, hi) = self.target_range;
        (y - lo) / (hi - lo)
    }

    fn unscale(&self, s: f64) -> f64 {
        let (lo, hi) = self.target_range;
        lo + s * (hi - lo)
    }

    /// Train on `windows` of `x`; `y` holds one target per row of `x`.
    pub fn fit(&mut self, x: &Matrix, y: &[f64], windows: &[Window]) -> Result<(), ModelError> {
        if x.n_rows() != y.len() {
            return Err(ModelError::DimensionMismatch {
                expected: x.n_rows(),
                got: y.len(),
            });
        }
        if self.params.hidden == 0 || self.params.batch_size == 0 || self.params.epochs == 0 {
            return Err(ModelError::InvalidParameter(
                "lstm hidden, batch_size and epochs must be positive".into(),
            ));
        }
        if windows.is_empty() {
            return Err(ModelError::InsufficientData {
                model: "lstm".into(),
                needed: self.params.window,
                got: x.n_rows(),
            });
        }
        if x.has_missing() || windows.iter().any(|w| !y[w.target_row()].is_finite()) {
            return Err(ModelError::MissingValues { model: "lstm".into() });
        }

        let targets: Vec<f64> = windows.iter().map(|w| y[w.target_row()]).collect();
        let lo = targets.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = targets.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        self.target_range = if hi > lo { (lo, hi) } else { (lo, lo + 1.0) };
        let scaled: Vec<f64> = targets.iter().map(|t| self.scale(*t)).collect();

        let seeds = RngHierarchy::new(self.params.seed);
        let mut network = Network::init(x.n_cols(), self.params.hidden, &mut seeds.rng_for("lstm", "init", 0));
        let mut adam = Adam::new(network.params.len());
        let mut grad = vec![0.0; network.params.len()];
        let mut order: Vec<usize> = (0..windows.len()).collect();

        self.loss_history.clear();
        let mut best = f64::INFINITY;
        let mut stale = 0;
        for epoch in 0..self.params.epochs {
            order.shuffle(&mut seeds.rng_for("lstm", "shuffle", epoch as u64));
            let mut epoch_loss = 0.0;
            for batch in order.chunks(self.params.batch_size) {
                grad.iter_mut().for_each(|g| *g = 0.0);
                let scale = 1.0 / batch.len() as f64;
                for &k in batch {
                    let (pred, steps) = network.forward(x, &windows[k].rows);
                    let err = pred - scaled[k];
                    epoch_loss += 0.5 * err * err;
                    network.backward(&steps, err * scale, &mut grad);
                }
                let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
                if norm > self.params.clip_norm {
                    let c = self.params.clip_norm / norm;
                    grad.iter_mut().for_each(|g| *g *= c);
                }
                adam.step(&mut network.params, &grad, self.params.learning_rate);
            }
            let loss = epoch_loss / windows.len() as f64;
            self.loss_history.push(loss);
            if loss < best - self.params.min_delta {
                best = loss;
                stale = 0;
            } else {
                stale += 1;
                if stale >= self.params.patience {
                    debug!(epoch, loss, "lstm early stop");
                    break;
                }
            }
        }
        if !best.is_finite() {
            return Err(ModelError::Numerical("lstm training diverged".into()));
        }

        self.feature_names = x.names().to_vec();
        self.network = Some(network);
        Ok(())
    }

    pub fn predict(&self, x: &Matrix, windows: &[Window]) -> Result<Vec<f64>, ModelError> {
        let network = self.network.as_ref().ok_or(ModelError::NotFitted)?;
        x.check_layout(&self.feature_names)?;
        if windows.iter().flat_map(|w| &w.rows).any(|&r| x.row(r).iter().any(|v| v.is_nan())) {
            return Err(ModelError::MissingValues { model: "lstm".into() });
        }
        Ok(windows
            .iter()
            .map(|w| self.unscale(network.forward(x, &w.rows).0))
            .collect())
    }
}
