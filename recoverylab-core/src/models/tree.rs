//! Histogram regression trees.
//!
//! Features are quantile-binned once per fit (at most `MAX_BINS` bins,
//! missing values in a dedicated bin). Trees grow best-first: the open leaf
//! with the largest gain is split next. With only a depth limit this yields
//! the same tree as level-wise growth; with a leaf limit it is LightGBM's
//! leaf-wise policy.
//!
//! A split sends `x <= threshold` left and missing values in the learned
//! default direction. Every node records its training cover, which TreeSHAP
//! needs to weight unseen branches.

use serde::{Deserialize, Serialize};

use super::{Matrix, ModelError};

pub const MAX_BINS: usize = 64;
pub const MISSING_BIN: u8 = u8::MAX;

/// Per-feature bin upper edges learned from training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinMapper {
    edges: Vec<Vec<f64>>,
}

impl BinMapper {
    pub fn fit(x: &Matrix, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, MISSING_BIN as usize);
        let edges = (0..x.n_cols())
            .map(|j| {
                let mut values: Vec<f64> = x.column(j).into_iter().filter(|v| !v.is_nan()).collect();
                values.sort_by(f64::total_cmp);
                let mut distinct = values.clone();
                distinct.dedup();
                if distinct.len() <= max_bins {
                    return distinct;
                }
                let n = values.len();
                let mut edges: Vec<f64> = (1..=max_bins)
                    .map(|i| values[(i * n).div_ceil(max_bins) - 1])
                    .collect();
                edges.dedup();
                edges
            })
            .collect();
        Self { edges }
    }

    pub fn n_features(&self) -> usize {
        self.edges.len()
    }

    pub fn n_bins(&self, feature: usize) -> usize {
        self.edges[feature].len()
    }

    pub fn bin(&self, feature: usize, value: f64) -> u8 {
        if value.is_nan() {
            return MISSING_BIN;
        }
        let edges = &self.edges[feature];
        let b = edges.partition_point(|e| *e < value);
        b.min(edges.len().saturating_sub(1)) as u8
    }

    /// Raw-value threshold equivalent to "bin <= `bin`".
    pub fn threshold(&self, feature: usize, bin: u8) -> f64 {
        self.edges[feature][bin as usize]
    }

    pub fn transform(&self, x: &Matrix) -> BinnedMatrix {
        let bins = (0..self.n_features())
            .map(|j| (0..x.n_rows()).map(|i| self.bin(j, x.get(i, j))).collect())
            .collect();
        BinnedMatrix { bins }
    }
}

/// Column-major bin indices.
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    bins: Vec<Vec<u8>>,
}

impl BinnedMatrix {
    #[inline]
    pub fn get(&self, feature: usize, row: usize) -> u8 {
        self.bins[feature][row]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub feature: usize,
    pub threshold: f64,
    pub default_left: bool,
    pub gain: f64,
}

impl Split {
    #[inline]
    pub fn goes_left(&self, x: f64) -> bool {
        if x.is_nan() {
            self.default_left
        } else {
            x <= self.threshold
        }
    }
}

/// A tree node. Leaves have `split == None`; `left`/`right` index into the
/// owning tree's node vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub split: Option<Split>,
    pub left: usize,
    pub right: usize,
    /// Leaf output, already scaled by the learning rate.
    pub value: f64,
    /// Training rows that reached this node.
    pub cover: f64,
}

impl Node {
    fn leaf(value: f64, cover: f64) -> Self {
        Self {
            split: None,
            left: 0,
            right: 0,
            value,
            cover,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.split.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Build from raw nodes (root first). Child indices must point forward.
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self, ModelError> {
        if nodes.is_empty() {
            return Err(ModelError::InvalidParameter("tree without nodes".into()));
        }
        for (i, n) in nodes.iter().enumerate() {
            if n.split.is_some() && (n.left <= i || n.right <= i || n.left >= nodes.len() || n.right >= nodes.len()) {
                return Err(ModelError::InvalidParameter(format!("node {i} has invalid children")));
            }
        }
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], i: usize) -> usize {
            match &nodes[i].split {
                None => 0,
                Some(_) => 1 + walk(nodes, nodes[i].left).max(walk(nodes, nodes[i].right)),
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut i = 0;
        loop {
            let node = &self.nodes[i];
            match &node.split {
                None => return node.value,
                Some(s) => i = if s.goes_left(row[s.feature]) { node.left } else { node.right },
            }
        }
    }

    /// Cover-weighted mean leaf value.
    pub fn expected_value(&self) -> f64 {
        let root = self.nodes[0].cover;
        if root <= 0.0 {
            return self.nodes[0].value;
        }
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.value * n.cover)
            .sum::<f64>()
            / root
    }
}

/// Additive tree ensemble: `base_score + Σ tree(x)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub base_score: f64,
    pub trees: Vec<Tree>,
    pub feature_names: Vec<String>,
}

impl TreeEnsemble {
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }

    pub fn predict(&self, x: &Matrix) -> Result<Vec<f64>, ModelError> {
        x.check_layout(&self.feature_names)?;
        Ok((0..x.n_rows()).map(|i| self.predict_row(x.row(i))).collect())
    }

    pub fn expected_value(&self) -> f64 {
        self.base_score + self.trees.iter().map(Tree::expected_value).sum::<f64>()
    }

    /// Total split gain per feature.
    pub fn gain_importance(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.n_features()];
        for tree in &self.trees {
            for s in tree.nodes.iter().filter_map(|n| n.split.as_ref()) {
                out[s.feature] += s.gain;
            }
        }
        out
    }
}

/// Growth limits and regularisation for one tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub max_leaves: Option<usize>,
    /// L2 penalty on leaf values.
    pub lambda: f64,
    pub min_child_weight: f64,
    pub min_child_samples: usize,
    pub min_split_gain: f64,
}

/// Gradients and the binned view a tree is grown on.
pub(crate) struct GrowContext<'a> {
    pub binned: &'a BinnedMatrix,
    pub mapper: &'a BinMapper,
    pub grad: &'a [f64],
    pub hess: &'a [f64],
    pub features: &'a [usize],
    pub params: &'a TreeParams,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    feature: usize,
    bin: u8,
    default_left: bool,
    gain: f64,
}

struct OpenLeaf {
    node: usize,
    rows: Vec<u32>,
    depth: usize,
    best: Option<Candidate>,
}

impl GrowContext<'_> {
    pub fn grow(&self, rows: Vec<u32>) -> Tree {
        let (g, h) = self.sums(&rows);
        let mut nodes = vec![Node::leaf(self.leaf_value(g, h), rows.len() as f64)];
        let mut open = vec![self.open_leaf(0, rows, 0)];
        let mut leaves = 1usize;

        while self.params.max_leaves.map_or(true, |m| leaves < m) {
            let Some(pos) = open
                .iter()
                .enumerate()
                .filter_map(|(i, o)| o.best.map(|b| (i, b.gain)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i)
            else {
                break;
            };
            let leaf = open.swap_remove(pos);
            let Some(best) = leaf.best else { break };

            let (left_rows, right_rows): (Vec<u32>, Vec<u32>) = leaf.rows.iter().partition(|&&r| {
                let b = self.binned.get(best.feature, r as usize);
                if b == MISSING_BIN {
                    best.default_left
                } else {
                    b <= best.bin
                }
            });

            let left = nodes.len();
            let right = left + 1;
            for child_rows in [&left_rows, &right_rows] {
                let (cg, ch) = self.sums(child_rows);
                nodes.push(Node::leaf(self.leaf_value(cg, ch), child_rows.len() as f64));
            }
            let parent = &mut nodes[leaf.node];
            parent.split = Some(Split {
                feature: best.feature,
                threshold: self.mapper.threshold(best.feature, best.bin),
                default_left: best.default_left,
                gain: best.gain,
            });
            parent.left = left;
            parent.right = right;
            leaves += 1;

            open.push(self.open_leaf(left, left_rows, leaf.depth + 1));
            open.push(self.open_leaf(right, right_rows, leaf.depth + 1));
        }
        Tree { nodes }
    }

    fn open_leaf(&self, node: usize, rows: Vec<u32>, depth: usize) -> OpenLeaf {
        let splittable = self.params.max_depth.map_or(true, |d| depth < d)
            && rows.len() >= 2 * self.params.min_child_samples.max(1);
        let best = if splittable { self.best_split(&rows) } else { None };
        OpenLeaf {
            node,
            rows,
            depth,
            best,
        }
    }

    fn sums(&self, rows: &[u32]) -> (f64, f64) {
        rows.iter().fold((0.0, 0.0), |(g, h), &r| {
            (g + self.grad[r as usize], h + self.hess[r as usize])
        })
    }

    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.params.lambda;
        if denom > 0.0 {
            -g / denom * self.learning_rate
        } else {
            0.0
        }
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.params.lambda;
        if denom > 0.0 {
            g * g / denom
        } else {
            0.0
        }
    }

    fn best_split(&self, rows: &[u32]) -> Option<Candidate> {
        let (g, h) = self.sums(rows);
        let n = rows.len();
        let parent_score = self.score(g, h);
        let p = self.params;
        let mut best: Option<Candidate> = None;

        for &f in self.features {
            let nb = self.mapper.n_bins(f);
            if nb < 2 {
                continue;
            }
            let mut hist = vec![(0.0f64, 0.0f64, 0usize); nb];
            let (mut mg, mut mh, mut mc) = (0.0, 0.0, 0usize);
            for &r in rows {
                let r = r as usize;
                let b = self.binned.get(f, r);
                if b == MISSING_BIN {
                    mg += self.grad[r];
                    mh += self.hess[r];
                    mc += 1;
                } else {
                    let e = &mut hist[b as usize];
                    e.0 += self.grad[r];
                    e.1 += self.hess[r];
                    e.2 += 1;
                }
            }

            let (mut lg, mut lh, mut lc) = (0.0, 0.0, 0usize);
            for (b, &(bg, bh, bc)) in hist.iter().enumerate().take(nb - 1) {
                lg += bg;
                lh += bh;
                lc += bc;
                let rc_present = n - mc - lc;
                let directions: &[bool] = if mc > 0 {
                    &[true, false]
                } else if lc >= rc_present {
                    &[true]
                } else {
                    &[false]
                };
                for &default_left in directions {
                    let (gl, hl, cl) = if default_left {
                        (lg + mg, lh + mh, lc + mc)
                    } else {
                        (lg, lh, lc)
                    };
                    let (gr, hr, cr) = (g - gl, h - hl, n - cl);
                    if cl == 0
                        || cr == 0
                        || cl < p.min_child_samples
                        || cr < p.min_child_samples
                        || hl < p.min_child_weight
                        || hr < p.min_child_weight
                    {
                        continue;
                    }
                    let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent_score);
                    if gain <= p.min_split_gain || gain <= 0.0 {
                        continue;
                    }
                    if best.map_or(true, |c| gain > c.gain) {
                        best = Some(Candidate {
                            feature: f,
                            bin: b as u8,
                            default_left,
                            gain,
                        });
                    }
                }
            }
        }
        best
    }
}
