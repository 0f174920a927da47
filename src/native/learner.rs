//! Leaf-wise tree learner over binned features.
//!
//! Each round the leaf with the largest split gain is split, until the tree
//! has `num_leaves` leaves or no leaf has a split satisfying the
//! constraints. Split candidates come from per-feature gradient histograms;
//! the histogram of the larger child is obtained by subtracting the smaller
//! child's from its parent's.

use crate::native::bin::{BinMapper, BinType, MissingType};
use crate::native::config::EngineConfig;
use crate::native::dataset::DatasetCore;
use crate::native::tree::{SplitOutputs, Tree};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::Arc;

const K_EPSILON: f64 = 1e-15;

/// Gradient statistics of one histogram bin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HistBin {
    /// Sum of gradients
    pub sum_gradient: f64,
    /// Sum of hessians
    pub sum_hessian: f64,
    /// Number of rows
    pub count: usize,
}

type FeatureHistogram = Vec<HistBin>;

/// Best split found for a leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitInfo {
    /// Feature index
    pub feature: usize,
    /// Last bin routed left, numerical splits only
    pub threshold_bin: u32,
    /// Bins routed left, categorical splits only
    pub left_bins: Vec<u32>,
    /// Where missing values go, numerical splits only
    pub default_left: bool,
    /// Gain over not splitting
    pub gain: f64,
    /// Left gradient sum
    pub left_sum_gradient: f64,
    /// Left hessian sum
    pub left_sum_hessian: f64,
    /// Left row count
    pub left_count: usize,
    /// Right gradient sum
    pub right_sum_gradient: f64,
    /// Right hessian sum
    pub right_sum_hessian: f64,
    /// Right row count
    pub right_count: usize,
    /// Left child output
    pub left_output: f64,
    /// Right child output
    pub right_output: f64,
}

/// Regularization and size limits of split finding.
#[derive(Debug, Clone)]
struct SplitParams {
    lambda_l1: f64,
    lambda_l2: f64,
    min_data_in_leaf: usize,
    min_sum_hessian_in_leaf: f64,
    min_gain_to_split: f64,
    max_cat_to_onehot: usize,
    max_cat_threshold: usize,
    cat_smooth: f64,
    cat_l2: f64,
    min_data_per_group: usize,
}

impl SplitParams {
    fn from_config(config: &EngineConfig) -> Self {
        SplitParams {
            lambda_l1: config.lambda_l1,
            lambda_l2: config.lambda_l2,
            min_data_in_leaf: config.min_data_in_leaf,
            min_sum_hessian_in_leaf: config.min_sum_hessian_in_leaf,
            min_gain_to_split: config.min_gain_to_split,
            max_cat_to_onehot: config.max_cat_to_onehot,
            max_cat_threshold: config.max_cat_threshold,
            cat_smooth: config.cat_smooth,
            cat_l2: config.cat_l2,
            min_data_per_group: config.min_data_per_group,
        }
    }
}

fn threshold_l1(s: f64, l1: f64) -> f64 {
    let reg = (s.abs() - l1).max(0.0);
    s.signum() * reg
}

/// Optimal output of a leaf.
pub fn leaf_output(sum_gradient: f64, sum_hessian: f64, l1: f64, l2: f64) -> f64 {
    -threshold_l1(sum_gradient, l1) / (sum_hessian + l2)
}

fn leaf_gain(sum_gradient: f64, sum_hessian: f64, l1: f64, l2: f64) -> f64 {
    let sg = threshold_l1(sum_gradient, l1);
    sg * sg / (sum_hessian + l2)
}

/// Rows and statistics of a leaf under construction.
struct LeafState {
    indices: Vec<usize>,
    sum_gradient: f64,
    sum_hessian: f64,
    depth: usize,
    histograms: Option<Vec<FeatureHistogram>>,
    best: Option<SplitInfo>,
}

/// Grows one tree per call.
pub struct SerialTreeLearner {
    data: Arc<DatasetCore>,
    params: SplitParams,
    num_leaves: usize,
    max_depth: i32,
    feature_fraction: f64,
    feature_fraction_bynode: f64,
    usable_features: Vec<usize>,
    tree_features: Vec<usize>,
    feature_rng: StdRng,
}

impl std::fmt::Debug for SerialTreeLearner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTreeLearner")
            .field("num_leaves", &self.num_leaves)
            .field("max_depth", &self.max_depth)
            .field("usable_features", &self.usable_features.len())
            .finish()
    }
}

impl SerialTreeLearner {
    /// Learner over `data`; features that cannot be split are skipped.
    pub fn new(config: &EngineConfig, data: Arc<DatasetCore>) -> Self {
        let usable_features: Vec<usize> = data
            .bin_mappers
            .iter()
            .enumerate()
            .filter(|(_, mapper)| !mapper.is_trivial())
            .map(|(feature, _)| feature)
            .collect();
        SerialTreeLearner {
            params: SplitParams::from_config(config),
            num_leaves: config.num_leaves,
            max_depth: config.max_depth,
            feature_fraction: config.feature_fraction,
            feature_fraction_bynode: config.feature_fraction_bynode,
            tree_features: usable_features.clone(),
            usable_features,
            feature_rng: StdRng::seed_from_u64(config.feature_fraction_seed),
            data,
        }
    }

    fn sample_features(&mut self, from: &[usize], fraction: f64) -> Vec<usize> {
        if fraction >= 1.0 || from.is_empty() {
            return from.to_vec();
        }
        let wanted = ((from.len() as f64 * fraction).round() as usize).clamp(1, from.len());
        let mut picked: Vec<usize> = sample(&mut self.feature_rng, from.len(), wanted)
            .into_iter()
            .map(|i| from[i])
            .collect();
        picked.sort_unstable();
        picked
    }

    /// Grow a tree on the rows in `bag` (all rows when `None`).
    ///
    /// The returned tree is unshrunk; a single-leaf tree means no split
    /// satisfied the constraints.
    pub fn train(&mut self, gradients: &[f64], hessians: &[f64], bag: Option<&[usize]>) -> Tree {
        let features = self.usable_features.clone();
        self.tree_features = self.sample_features(&features, self.feature_fraction);

        let indices: Vec<usize> = match bag {
            Some(bag) => bag.to_vec(),
            None => (0..self.data.num_data).collect(),
        };
        let sum_gradient: f64 = indices.iter().map(|&i| gradients[i]).sum();
        let sum_hessian: f64 = indices.iter().map(|&i| hessians[i]).sum();

        let mut tree = Tree::new(self.num_leaves);
        tree.set_root(
            leaf_output(sum_gradient, sum_hessian, self.params.lambda_l1, self.params.lambda_l2),
            indices.len() as i32,
            sum_hessian,
        );

        let mut root = LeafState {
            indices,
            sum_gradient,
            sum_hessian,
            depth: 0,
            histograms: None,
            best: None,
        };
        self.find_best_split(&mut root, gradients, hessians, None);
        let mut leaves = vec![root];

        while tree.can_grow() {
            let best_leaf = leaves
                .iter()
                .enumerate()
                .filter_map(|(i, leaf)| leaf.best.as_ref().map(|split| (i, split.gain)))
                .filter(|&(_, gain)| gain > 0.0)
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i);
            let Some(leaf_idx) = best_leaf else {
                break;
            };
            let (left, right) = self.apply_split(&mut tree, &mut leaves, leaf_idx);
            log::trace!(
                "Split leaf {} into {} / {} rows",
                leaf_idx,
                left.indices.len(),
                right.indices.len()
            );

            let parent_histograms = leaves[leaf_idx].histograms.take();
            let mut left = left;
            let mut right = right;
            // Build the smaller child directly, derive the larger one.
            if left.indices.len() <= right.indices.len() {
                self.find_best_split(&mut left, gradients, hessians, None);
                let sibling = left.histograms.as_ref();
                let derived = subtract_histograms(parent_histograms.as_ref(), sibling);
                self.find_best_split(&mut right, gradients, hessians, derived);
            } else {
                self.find_best_split(&mut right, gradients, hessians, None);
                let sibling = right.histograms.as_ref();
                let derived = subtract_histograms(parent_histograms.as_ref(), sibling);
                self.find_best_split(&mut left, gradients, hessians, derived);
            }
            leaves[leaf_idx] = left;
            leaves.push(right);
        }

        tree
    }

    fn apply_split(&self, tree: &mut Tree, leaves: &mut [LeafState], leaf_idx: usize) -> (LeafState, LeafState) {
        let next_leaf = leaves.len();
        let leaf = &mut leaves[leaf_idx];
        let split = match leaf.best.take() {
            Some(split) => split,
            None => unreachable!("leaf without a split was selected"),
        };
        let mapper = &self.data.bin_mappers[split.feature];
        let bins = self.data.bins.row(split.feature);
        let outputs = SplitOutputs {
            left_value: split.left_output,
            right_value: split.right_output,
            left_count: split.left_count as i32,
            right_count: split.right_count as i32,
            left_weight: split.left_sum_hessian,
            right_weight: split.right_sum_hessian,
            gain: split.gain as f32,
        };

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = match mapper.bin_type() {
            BinType::Numerical => {
                let has_missing_bin = mapper.missing_type() != MissingType::None;
                let missing_bin = mapper.missing_bin();
                let right_leaf = tree.split(
                    leaf_idx,
                    split.feature,
                    mapper.bin_to_value(split.threshold_bin),
                    mapper.missing_type(),
                    split.default_left,
                    outputs,
                );
                debug_assert_eq!(right_leaf, next_leaf);
                leaf.indices.iter().partition(|&&row| {
                    let bin = bins[row];
                    if has_missing_bin && bin == missing_bin {
                        split.default_left
                    } else {
                        bin <= split.threshold_bin
                    }
                })
            }
            BinType::Categorical => {
                let categories: Vec<i32> = split
                    .left_bins
                    .iter()
                    .filter_map(|&bin| mapper.bin_to_category(bin))
                    .collect();
                let right_leaf =
                    tree.split_categorical(leaf_idx, split.feature, &categories, MissingType::NaN, outputs);
                debug_assert_eq!(right_leaf, next_leaf);
                leaf.indices
                    .iter()
                    .partition(|&&row| split.left_bins.contains(&bins[row]))
            }
        };

        let depth = leaf.depth + 1;
        (
            LeafState {
                indices: left_indices,
                sum_gradient: split.left_sum_gradient,
                sum_hessian: split.left_sum_hessian,
                depth,
                histograms: None,
                best: None,
            },
            LeafState {
                indices: right_indices,
                sum_gradient: split.right_sum_gradient,
                sum_hessian: split.right_sum_hessian,
                depth,
                histograms: None,
                best: None,
            },
        )
    }

    fn find_best_split(
        &mut self,
        leaf: &mut LeafState,
        gradients: &[f64],
        hessians: &[f64],
        histograms: Option<Vec<FeatureHistogram>>,
    ) {
        let num_data = leaf.indices.len();
        let depth_exhausted = self.max_depth > 0 && leaf.depth >= self.max_depth as usize;
        if num_data < 2 * self.params.min_data_in_leaf.max(1) || depth_exhausted {
            leaf.histograms = None;
            leaf.best = None;
            return;
        }

        let histograms = match histograms {
            Some(histograms) => histograms,
            None => self.construct_histograms(&leaf.indices, gradients, hessians),
        };

        let tree_features = self.tree_features.clone();
        let node_features = self.sample_features(&tree_features, self.feature_fraction_bynode);
        let params = &self.params;
        let mappers = &self.data.bin_mappers;
        let (sum_gradient, sum_hessian) = (leaf.sum_gradient, leaf.sum_hessian);

        leaf.best = node_features
            .par_iter()
            .filter_map(|&feature| {
                let mapper = &mappers[feature];
                let histogram = &histograms[feature];
                let split = match mapper.bin_type() {
                    BinType::Numerical => {
                        find_numerical_split(params, mapper, histogram, sum_gradient, sum_hessian, num_data)
                    }
                    BinType::Categorical => {
                        find_categorical_split(params, mapper, histogram, sum_gradient, sum_hessian, num_data)
                    }
                };
                split.map(|mut split| {
                    split.feature = feature;
                    split
                })
            })
            // Ties go to the lower feature index.
            .reduce_with(|a, b| {
                if b.gain > a.gain || (b.gain == a.gain && b.feature < a.feature) {
                    b
                } else {
                    a
                }
            });
        leaf.histograms = Some(histograms);
    }

    fn construct_histograms(&self, indices: &[usize], gradients: &[f64], hessians: &[f64]) -> Vec<FeatureHistogram> {
        let data = &self.data;
        (0..data.num_features)
            .into_par_iter()
            .map(|feature| {
                let mapper = &data.bin_mappers[feature];
                let mut histogram = vec![HistBin::default(); mapper.num_bin()];
                if mapper.is_trivial() {
                    return histogram;
                }
                let bins = data.bins.row(feature);
                for &row in indices {
                    let entry = &mut histogram[bins[row] as usize];
                    entry.sum_gradient += gradients[row];
                    entry.sum_hessian += hessians[row];
                    entry.count += 1;
                }
                histogram
            })
            .collect()
    }
}

fn subtract_histograms(
    parent: Option<&Vec<FeatureHistogram>>,
    child: Option<&Vec<FeatureHistogram>>,
) -> Option<Vec<FeatureHistogram>> {
    let (parent, child) = (parent?, child?);
    Some(
        parent
            .iter()
            .zip(child)
            .map(|(p, c)| {
                p.iter()
                    .zip(c)
                    .map(|(p, c)| HistBin {
                        sum_gradient: p.sum_gradient - c.sum_gradient,
                        sum_hessian: p.sum_hessian - c.sum_hessian,
                        count: p.count - c.count,
                    })
                    .collect()
            })
            .collect(),
    )
}

#[allow(clippy::too_many_arguments)]
fn make_split(
    params: &SplitParams,
    l2: f64,
    gain: f64,
    left_sum_gradient: f64,
    left_sum_hessian: f64,
    left_count: usize,
    sum_gradient: f64,
    sum_hessian: f64,
    num_data: usize,
) -> SplitInfo {
    let right_sum_gradient = sum_gradient - left_sum_gradient;
    let right_sum_hessian = sum_hessian - left_sum_hessian;
    SplitInfo {
        feature: 0,
        threshold_bin: 0,
        left_bins: Vec::new(),
        default_left: false,
        gain,
        left_sum_gradient,
        left_sum_hessian,
        left_count,
        right_sum_gradient,
        right_sum_hessian,
        right_count: num_data - left_count,
        left_output: leaf_output(left_sum_gradient, left_sum_hessian, params.lambda_l1, l2),
        right_output: leaf_output(right_sum_gradient, right_sum_hessian, params.lambda_l1, l2),
    }
}

/// Threshold scan over a numerical histogram. Features with a missing bin
/// are scanned twice, once with missing values on each side.
fn find_numerical_split(
    params: &SplitParams,
    mapper: &BinMapper,
    histogram: &[HistBin],
    sum_gradient: f64,
    sum_hessian: f64,
    num_data: usize,
) -> Option<SplitInfo> {
    let (l1, l2) = (params.lambda_l1, params.lambda_l2);
    let min_gain_shift = leaf_gain(sum_gradient, sum_hessian, l1, l2) + params.min_gain_to_split;
    let value_bins = mapper.num_value_bins();
    let missing = if mapper.missing_type() == MissingType::None {
        None
    } else {
        Some(histogram[mapper.missing_bin() as usize])
    };
    let directions: &[bool] = if missing.is_some() { &[false, true] } else { &[false] };

    let mut best: Option<(f64, u32, bool, f64, f64, usize)> = None;
    for &default_left in directions {
        let mut left = match (default_left, missing) {
            (true, Some(bin)) => bin,
            _ => HistBin::default(),
        };
        // A threshold at the last value bin only separates the missing bin.
        let last_threshold = if missing.is_some() && !default_left {
            value_bins
        } else {
            value_bins.saturating_sub(1)
        };
        for t in 0..last_threshold {
            let bin = histogram[t];
            left.sum_gradient += bin.sum_gradient;
            left.sum_hessian += bin.sum_hessian;
            left.count += bin.count;

            if left.count < params.min_data_in_leaf || left.sum_hessian < params.min_sum_hessian_in_leaf {
                continue;
            }
            let right_count = num_data - left.count;
            let right_hessian = sum_hessian - left.sum_hessian;
            if right_count < params.min_data_in_leaf || right_hessian < params.min_sum_hessian_in_leaf {
                break;
            }
            let gain = leaf_gain(left.sum_gradient, left.sum_hessian, l1, l2)
                + leaf_gain(sum_gradient - left.sum_gradient, right_hessian, l1, l2);
            if gain <= min_gain_shift {
                continue;
            }
            if best.map_or(true, |b| gain > b.0) {
                best = Some((gain, t as u32, default_left, left.sum_gradient, left.sum_hessian, left.count));
            }
        }
    }

    best.map(|(gain, threshold_bin, default_left, lg, lh, lc)| {
        let mut split = make_split(params, l2, gain - min_gain_shift, lg, lh, lc, sum_gradient, sum_hessian, num_data);
        split.threshold_bin = threshold_bin;
        split.default_left = default_left;
        split
    })
}

/// Category-set search: one-vs-rest for few categories, otherwise a scan
/// over categories sorted by their smoothed gradient ratio.
fn find_categorical_split(
    params: &SplitParams,
    mapper: &BinMapper,
    histogram: &[HistBin],
    sum_gradient: f64,
    sum_hessian: f64,
    num_data: usize,
) -> Option<SplitInfo> {
    let l1 = params.lambda_l1;
    let used_bins = mapper.num_value_bins();
    let min_gain_shift = leaf_gain(sum_gradient, sum_hessian, l1, params.lambda_l2) + params.min_gain_to_split;
    let fits = |count: usize, hessian: f64| {
        count >= params.min_data_in_leaf && hessian >= params.min_sum_hessian_in_leaf
    };

    if mapper.num_bin() <= params.max_cat_to_onehot {
        let l2 = params.lambda_l2;
        let mut best: Option<(f64, usize)> = None;
        for (t, bin) in histogram.iter().enumerate().take(used_bins) {
            let other_count = num_data - bin.count;
            let other_hessian = sum_hessian - bin.sum_hessian;
            if !fits(bin.count, bin.sum_hessian) || !fits(other_count, other_hessian) {
                continue;
            }
            let gain = leaf_gain(bin.sum_gradient, bin.sum_hessian, l1, l2)
                + leaf_gain(sum_gradient - bin.sum_gradient, other_hessian, l1, l2);
            if gain > min_gain_shift && best.map_or(true, |b| gain > b.0) {
                best = Some((gain, t));
            }
        }
        return best.map(|(gain, t)| {
            let bin = histogram[t];
            let mut split = make_split(
                params,
                l2,
                gain - min_gain_shift,
                bin.sum_gradient,
                bin.sum_hessian,
                bin.count,
                sum_gradient,
                sum_hessian,
                num_data,
            );
            split.left_bins = vec![t as u32];
            split
        });
    }

    let l2 = params.lambda_l2 + params.cat_l2;
    let mut sorted: Vec<usize> = (0..used_bins)
        .filter(|&t| histogram[t].count as f64 >= params.cat_smooth)
        .collect();
    let ctr = |t: usize| histogram[t].sum_gradient / (histogram[t].sum_hessian + params.cat_smooth);
    sorted.sort_by(|&a, &b| ctr(a).total_cmp(&ctr(b)));
    let used = sorted.len();
    if used == 0 {
        return None;
    }
    let max_num_cat = params.max_cat_threshold.min((used + 1) / 2);

    let mut best: Option<(f64, usize, bool, f64, f64, usize)> = None;
    for reverse in [false, true] {
        let mut left = HistBin {
            sum_hessian: K_EPSILON,
            ..HistBin::default()
        };
        let mut group_count = 0usize;
        for i in 0..used.min(max_num_cat) {
            let t = if reverse { sorted[used - 1 - i] } else { sorted[i] };
            let bin = histogram[t];
            left.sum_gradient += bin.sum_gradient;
            left.sum_hessian += bin.sum_hessian;
            left.count += bin.count;
            group_count += bin.count;

            if !fits(left.count, left.sum_hessian) {
                continue;
            }
            let right_count = num_data - left.count;
            let right_hessian = sum_hessian - left.sum_hessian;
            if right_count < params.min_data_in_leaf
                || right_count < params.min_data_per_group
                || right_hessian < params.min_sum_hessian_in_leaf
            {
                break;
            }
            if group_count < params.min_data_per_group {
                continue;
            }
            group_count = 0;

            let gain = leaf_gain(left.sum_gradient, left.sum_hessian, l1, l2)
                + leaf_gain(sum_gradient - left.sum_gradient, right_hessian, l1, l2);
            if gain <= min_gain_shift {
                continue;
            }
            if best.map_or(true, |b| gain > b.0) {
                best = Some((gain, i, reverse, left.sum_gradient, left.sum_hessian, left.count));
            }
        }
    }

    best.map(|(gain, last, reverse, lg, lh, lc)| {
        let mut split = make_split(params, l2, gain - min_gain_shift, lg, lh, lc, sum_gradient, sum_hessian, num_data);
        split.left_bins = (0..=last)
            .map(|i| {
                let t = if reverse { sorted[used - 1 - i] } else { sorted[i] };
                t as u32
            })
            .collect();
        split
    })
}
