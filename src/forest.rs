//! # Random Forest
//!
//! Bagged ensemble of CART decision trees for multi-class classification.
//!
//! - Each tree is fit on a bootstrap resample of the training rows
//! - Each split considers a random subset of `max_features` columns and
//!   picks the threshold minimising weighted Gini impurity
//! - Class weights are "balanced": `n_samples / (n_classes * class_count)`,
//!   computed once over the full label set and multiplied into every
//!   bootstrap weight
//! - Trees grow until leaves are pure (or `max_depth` is hit)
//! - Class probabilities are the mean of the per-tree leaf distributions
//!
//! Trees are fit in parallel. Each tree gets its own seed drawn up front from
//! the caller's generator, so a given seed always yields the same forest.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Hyperparameters for [`RandomForest::fit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    /// Columns considered per split; `None` means `sqrt(n_features)`.
    pub max_features: Option<usize>,
    pub max_depth: usize,
    pub min_samples_split: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_features: None,
            max_depth: 32,
            min_samples_split: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Node {
    Leaf {
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single fitted tree, stored as a flat node arena rooted at index 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn leaf_distribution(&self, row: &[f64]) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    /// Indices of `nodes` are internal; an out-of-range child means a corrupt artifact.
    fn is_well_formed(&self, n_features: usize, n_classes: usize) -> bool {
        !self.nodes.is_empty()
            && self.nodes.iter().enumerate().all(|(i, node)| match node {
                Node::Leaf { distribution } => distribution.len() == n_classes,
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    *feature < n_features
                        && *left > i
                        && *right > i
                        && *left < self.nodes.len()
                        && *right < self.nodes.len()
                }
            })
    }
}

/// Fitted ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    n_classes: usize,
    params: ForestParams,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit on `rows` (all the same width) with labels `0..n_classes`.
    ///
    /// Returns `None` when there are no rows.
    pub fn fit<R: Rng + ?Sized>(
        params: ForestParams,
        rows: &[Vec<f64>],
        labels: &[usize],
        n_classes: usize,
        rng: &mut R,
    ) -> Option<Self> {
        let n_features = rows.first()?.len();
        if n_classes == 0 || rows.len() != labels.len() {
            return None;
        }

        let class_weights = balanced_class_weights(labels, n_classes);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let max_features = params
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt() as usize)
            .clamp(1, n_features);

        let seeds: Vec<u64> = (0..params.n_estimators.max(1)).map(|_| rng.gen()).collect();
        let trees = seeds
            .into_par_iter()
            .map(|seed| {
                let mut tree_rng = StdRng::seed_from_u64(seed);
                let builder = TreeBuilder {
                    rows,
                    labels,
                    n_classes,
                    max_features,
                    params: &params,
                };
                builder.build(&class_weights, &mut tree_rng)
            })
            .collect();

        Some(Self {
            n_features,
            n_classes,
            params,
            trees,
        })
    }

    /// Mean leaf distribution across trees.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        let mut proba = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (p, d) in proba.iter_mut().zip(tree.leaf_distribution(row)) {
                *p += d;
            }
        }
        let n = self.trees.len().max(1) as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        proba
    }

    /// Most probable class; ties resolve to the lowest index.
    #[must_use]
    pub fn predict(&self, row: &[f64]) -> usize {
        argmax(&self.predict_proba(row)).0
    }

    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    #[must_use]
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Structural check for deserialized forests.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.trees.is_empty()
            && self
                .trees
                .iter()
                .all(|t| t.is_well_formed(self.n_features, self.n_classes))
    }
}

/// Index and value of the first maximum.
#[must_use]
pub fn argmax(values: &[f64]) -> (usize, f64) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best })
}

#[allow(clippy::cast_precision_loss)]
fn balanced_class_weights(labels: &[usize], n_classes: usize) -> Vec<f64> {
    let mut counts = vec![0usize; n_classes];
    for &label in labels {
        counts[label] += 1;
    }
    let present = counts.iter().filter(|&&c| c > 0).count().max(1) as f64;
    let n = labels.len() as f64;
    counts
        .iter()
        .map(|&c| if c == 0 { 0.0 } else { n / (present * c as f64) })
        .collect()
}

fn gini(class_weight: &[f64], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - class_weight.iter().map(|w| (w / total).powi(2)).sum::<f64>()
}

struct TreeBuilder<'a> {
    rows: &'a [Vec<f64>],
    labels: &'a [usize],
    n_classes: usize,
    max_features: usize,
    params: &'a ForestParams,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl TreeBuilder<'_> {
    fn build(&self, class_weights: &[f64], rng: &mut StdRng) -> DecisionTree {
        let n = self.rows.len();
        let mut weights = vec![0.0; n];
        for _ in 0..n {
            weights[rng.gen_range(0..n)] += 1.0;
        }
        for (w, &label) in weights.iter_mut().zip(self.labels) {
            *w *= class_weights[label];
        }
        let in_bag: Vec<usize> = (0..n).filter(|&i| weights[i] > 0.0).collect();

        let mut nodes = Vec::new();
        self.grow(&mut nodes, in_bag, &weights, 0, rng);
        DecisionTree { nodes }
    }

    /// Push the subtree for `samples` and return its root index.
    fn grow(
        &self,
        nodes: &mut Vec<Node>,
        samples: Vec<usize>,
        weights: &[f64],
        depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let mut class_weight = vec![0.0; self.n_classes];
        for &i in &samples {
            class_weight[self.labels[i]] += weights[i];
        }
        let total: f64 = class_weight.iter().sum();
        let pure = class_weight.iter().filter(|&&w| w > 0.0).count() <= 1;

        let idx = nodes.len();
        let make_leaf = |class_weight: Vec<f64>| Node::Leaf {
            distribution: if total > 0.0 {
                class_weight.iter().map(|w| w / total).collect()
            } else {
                class_weight
            },
        };

        if pure || depth >= self.params.max_depth || samples.len() < self.params.min_samples_split {
            nodes.push(make_leaf(class_weight));
            return idx;
        }

        let Some(split) = self.best_split(&samples, weights, total, gini(&class_weight, total), rng) else {
            nodes.push(make_leaf(class_weight));
            return idx;
        };

        // Reserve the slot so children get larger indices
        nodes.push(Node::Leaf {
            distribution: Vec::new(),
        });
        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| self.rows[i][split.feature] <= split.threshold);
        let left = self.grow(nodes, left_samples, weights, depth + 1, rng);
        let right = self.grow(nodes, right_samples, weights, depth + 1, rng);
        nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    /// Scan random columns for the lowest weighted child impurity. Keeps
    /// drawing past `max_features` while every column so far was constant.
    fn best_split(
        &self,
        samples: &[usize],
        weights: &[f64],
        total: f64,
        parent_impurity: f64,
        rng: &mut StdRng,
    ) -> Option<BestSplit> {
        let n_features = self.rows[samples[0]].len();
        let mut features: Vec<usize> = (0..n_features).collect();
        features.shuffle(rng);

        let mut best: Option<BestSplit> = None;
        let mut order = samples.to_vec();
        for (visited, &feature) in features.iter().enumerate() {
            if visited >= self.max_features && best.is_some() {
                break;
            }
            order.sort_by(|&a, &b| self.rows[a][feature].total_cmp(&self.rows[b][feature]));

            let mut left = vec![0.0; self.n_classes];
            let mut left_total = 0.0;
            let mut right = vec![0.0; self.n_classes];
            for &i in &order {
                right[self.labels[i]] += weights[i];
            }

            for pair in order.windows(2) {
                let (i, next) = (pair[0], pair[1]);
                left[self.labels[i]] += weights[i];
                right[self.labels[i]] -= weights[i];
                left_total += weights[i];

                let (v, v_next) = (self.rows[i][feature], self.rows[next][feature]);
                if v_next <= v {
                    continue;
                }
                let right_total = total - left_total;
                let impurity =
                    (left_total * gini(&left, left_total) + right_total * gini(&right, right_total)) / total;
                if impurity < parent_impurity - 1e-12
                    && best.as_ref().map_or(true, |b| impurity < b.impurity)
                {
                    let mut threshold = v + (v_next - v) / 2.0;
                    if threshold >= v_next {
                        threshold = v;
                    }
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        impurity,
                    });
                }
            }
        }
        best
    }
}
