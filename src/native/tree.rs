//! Decision tree stored in LightGBM's flat array layout.
//!
//! Internal nodes are numbered `0..num_leaves-1`, leaves `0..num_leaves`.
//! A child pointer `>= 0` is an internal node; a negative pointer `!leaf`
//! refers to a leaf.

use crate::native::bin::MissingType;
use crate::native::is_zero;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const CATEGORICAL_MASK: i8 = 1;
const DEFAULT_LEFT_MASK: i8 = 2;

/// Path element for TreeSHAP.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathElement {
    /// Feature split on, `-1` for the root
    pub feature_index: i32,
    /// Fraction of zero paths (feature absent) flowing through
    pub zero_fraction: f64,
    /// Fraction of one paths (feature present) flowing through
    pub one_fraction: f64,
    /// Permutation weight
    pub pweight: f64,
}

/// Outcome of a split, shared by numerical and categorical splits.
#[derive(Debug, Clone, Copy)]
pub struct SplitOutputs {
    /// Output of the left child
    pub left_value: f64,
    /// Output of the right child
    pub right_value: f64,
    /// Rows routed left
    pub left_count: i32,
    /// Rows routed right
    pub right_count: i32,
    /// Hessian sum on the left
    pub left_weight: f64,
    /// Hessian sum on the right
    pub right_weight: f64,
    /// Loss reduction of the split
    pub gain: f32,
}

/// A single regression tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    max_leaves: usize,
    num_leaves: usize,
    num_cat: usize,
    shrinkage: f64,

    left_child: Vec<i32>,
    right_child: Vec<i32>,
    split_feature: Vec<i32>,
    split_gain: Vec<f32>,
    threshold: Vec<f64>,
    decision_type: Vec<i8>,

    leaf_parent: Vec<i32>,
    leaf_value: Vec<f64>,
    leaf_weight: Vec<f64>,
    leaf_count: Vec<i32>,
    leaf_depth: Vec<i32>,

    internal_value: Vec<f64>,
    internal_weight: Vec<f64>,
    internal_count: Vec<i32>,

    cat_boundaries: Vec<i32>,
    cat_threshold: Vec<u32>,
}

impl Tree {
    /// Create a single-leaf tree that can grow up to `max_leaves` leaves.
    pub fn new(max_leaves: usize) -> Self {
        let max_leaves = max_leaves.max(1);
        let internal = max_leaves - 1;
        Tree {
            max_leaves,
            num_leaves: 1,
            num_cat: 0,
            shrinkage: 1.0,
            left_child: vec![0; internal],
            right_child: vec![0; internal],
            split_feature: vec![0; internal],
            split_gain: vec![0.0; internal],
            threshold: vec![0.0; internal],
            decision_type: vec![0; internal],
            leaf_parent: vec![-1; max_leaves],
            leaf_value: vec![0.0; max_leaves],
            leaf_weight: vec![0.0; max_leaves],
            leaf_count: vec![0; max_leaves],
            leaf_depth: vec![0; max_leaves],
            internal_value: vec![0.0; internal],
            internal_weight: vec![0.0; internal],
            internal_count: vec![0; internal],
            cat_boundaries: vec![0],
            cat_threshold: Vec::new(),
        }
    }

    /// Record the statistics of the root before any split.
    pub fn set_root(&mut self, value: f64, count: i32, weight: f64) {
        self.leaf_value[0] = value;
        self.leaf_count[0] = count;
        self.leaf_weight[0] = weight;
    }

    /// Split `leaf` on a numerical threshold.
    ///
    /// Rows with `value <= threshold` go left; missing values (per
    /// `missing_type`) follow `default_left`. Returns the index of the new
    /// right leaf; the left leaf keeps index `leaf`.
    pub fn split(
        &mut self,
        leaf: usize,
        feature: usize,
        threshold: f64,
        missing_type: MissingType,
        default_left: bool,
        outputs: SplitOutputs,
    ) -> usize {
        let node = self.split_general(leaf, feature, outputs);
        let mut decision = 0;
        if default_left {
            decision |= DEFAULT_LEFT_MASK;
        }
        decision |= (missing_type as i8) << 2;
        self.decision_type[node] = decision;
        self.threshold[node] = threshold;
        self.num_leaves += 1;
        self.num_leaves - 1
    }

    /// Split `leaf` on a category set.
    ///
    /// `categories` are the raw category values routed left; everything
    /// else, including negative and NaN values, goes right.
    pub fn split_categorical(
        &mut self,
        leaf: usize,
        feature: usize,
        categories: &[i32],
        missing_type: MissingType,
        outputs: SplitOutputs,
    ) -> usize {
        let node = self.split_general(leaf, feature, outputs);
        self.decision_type[node] = CATEGORICAL_MASK | ((missing_type as i8) << 2);
        self.threshold[node] = self.num_cat as f64;
        self.num_cat += 1;

        let bitset = construct_bitset(categories);
        let last = self.cat_boundaries.last().copied().unwrap_or(0);
        self.cat_boundaries.push(last + bitset.len() as i32);
        self.cat_threshold.extend(bitset);

        self.num_leaves += 1;
        self.num_leaves - 1
    }

    fn split_general(&mut self, leaf: usize, feature: usize, outputs: SplitOutputs) -> usize {
        let new_node = self.num_leaves - 1;
        let right_leaf = self.num_leaves;

        let parent = self.leaf_parent[leaf];
        if parent >= 0 {
            let parent = parent as usize;
            if self.left_child[parent] == !(leaf as i32) {
                self.left_child[parent] = new_node as i32;
            } else {
                self.right_child[parent] = new_node as i32;
            }
        }

        self.split_feature[new_node] = feature as i32;
        self.split_gain[new_node] = outputs.gain;
        self.left_child[new_node] = !(leaf as i32);
        self.right_child[new_node] = !(right_leaf as i32);

        self.leaf_parent[leaf] = new_node as i32;
        self.leaf_parent[right_leaf] = new_node as i32;

        self.internal_value[new_node] = self.leaf_value[leaf];
        self.internal_weight[new_node] = self.leaf_weight[leaf];
        self.internal_count[new_node] = outputs.left_count + outputs.right_count;

        self.leaf_value[leaf] = finite_or_zero(outputs.left_value);
        self.leaf_weight[leaf] = outputs.left_weight;
        self.leaf_count[leaf] = outputs.left_count;
        self.leaf_value[right_leaf] = finite_or_zero(outputs.right_value);
        self.leaf_weight[right_leaf] = outputs.right_weight;
        self.leaf_count[right_leaf] = outputs.right_count;

        self.leaf_depth[right_leaf] = self.leaf_depth[leaf] + 1;
        self.leaf_depth[leaf] += 1;

        new_node
    }

    /// Number of leaves.
    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    /// Whether more leaves can be added.
    pub fn can_grow(&self) -> bool {
        self.num_leaves < self.max_leaves
    }

    /// Current shrinkage factor.
    pub fn shrinkage(&self) -> f64 {
        self.shrinkage
    }

    /// Output of leaf `leaf`.
    pub fn leaf_output(&self, leaf: usize) -> f64 {
        self.leaf_value[leaf]
    }

    /// Overwrite the output of leaf `leaf`.
    pub fn set_leaf_output(&mut self, leaf: usize, value: f64) {
        self.leaf_value[leaf] = finite_or_zero(value);
    }

    /// Depth of leaf `leaf`, the root leaf being at depth 0.
    pub fn leaf_depth(&self, leaf: usize) -> i32 {
        self.leaf_depth[leaf]
    }

    /// Scale every output by `rate`.
    pub fn apply_shrinkage(&mut self, rate: f64) {
        for value in &mut self.leaf_value[..self.num_leaves] {
            *value *= rate;
        }
        for value in &mut self.internal_value[..self.num_leaves - 1] {
            *value *= rate;
        }
        self.shrinkage *= rate;
    }

    /// Add `bias` to every output; used to fold the initial score into the
    /// first tree.
    pub fn add_bias(&mut self, bias: f64) {
        for value in &mut self.leaf_value[..self.num_leaves] {
            *value += bias;
        }
        for value in &mut self.internal_value[..self.num_leaves - 1] {
            *value += bias;
        }
        self.shrinkage = 1.0;
    }

    /// Collapse to a single leaf with output `value`.
    pub fn as_constant_tree(&mut self, value: f64) {
        self.num_leaves = 1;
        self.num_cat = 0;
        self.shrinkage = 1.0;
        self.leaf_value[0] = value;
        self.cat_boundaries.truncate(1);
        self.cat_threshold.clear();
    }

    /// Features split on, with the gain of each split.
    pub fn splits(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        (0..self.num_leaves - 1).map(move |node| {
            (
                self.split_feature[node] as usize,
                self.split_gain[node] as f64,
            )
        })
    }

    /// Largest feature index used by a split, if any.
    pub fn max_split_feature(&self) -> Option<usize> {
        self.splits().map(|(feature, _)| feature).max()
    }

    fn decision(&self, value: f64, node: usize) -> i32 {
        if self.decision_type[node] & CATEGORICAL_MASK != 0 {
            self.categorical_decision(value, node)
        } else {
            self.numerical_decision(value, node)
        }
    }

    fn numerical_decision(&self, value: f64, node: usize) -> i32 {
        let decision = self.decision_type[node];
        let missing_type = MissingType::from_bits(decision >> 2);
        let value = if value.is_nan() && missing_type != MissingType::NaN {
            0.0
        } else {
            value
        };
        let is_missing = match missing_type {
            MissingType::Zero => is_zero(value),
            MissingType::NaN => value.is_nan(),
            MissingType::None => false,
        };
        if is_missing {
            if decision & DEFAULT_LEFT_MASK != 0 {
                self.left_child[node]
            } else {
                self.right_child[node]
            }
        } else if value <= self.threshold[node] {
            self.left_child[node]
        } else {
            self.right_child[node]
        }
    }

    fn categorical_decision(&self, value: f64, node: usize) -> i32 {
        if value.is_nan() || value < 0.0 {
            return self.right_child[node];
        }
        let category = value as i32;
        let cat_idx = self.threshold[node] as usize;
        let start = self.cat_boundaries[cat_idx] as usize;
        let end = self.cat_boundaries[cat_idx + 1] as usize;
        if find_in_bitset(&self.cat_threshold[start..end], category) {
            self.left_child[node]
        } else {
            self.right_child[node]
        }
    }

    /// Leaf reached by `features`.
    pub fn leaf_index(&self, features: &[f64]) -> usize {
        if self.num_leaves <= 1 {
            return 0;
        }
        let mut node = 0i32;
        while node >= 0 {
            let idx = node as usize;
            let value = features
                .get(self.split_feature[idx] as usize)
                .copied()
                .unwrap_or(0.0);
            node = self.decision(value, idx);
        }
        (!node) as usize
    }

    /// Output for `features`.
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.leaf_value[self.leaf_index(features)]
    }

    fn data_count(&self, node: i32) -> f64 {
        if node >= 0 {
            self.internal_count[node as usize] as f64
        } else {
            self.leaf_count[(!node) as usize] as f64
        }
    }

    /// Mean output over the training rows, weighted by leaf counts.
    pub fn expected_value(&self) -> f64 {
        if self.num_leaves == 1 {
            return self.leaf_output(0);
        }
        let total = self.internal_count[0] as f64;
        if total <= 0.0 {
            return 0.0;
        }
        (0..self.num_leaves)
            .map(|leaf| self.leaf_count[leaf] as f64 / total * self.leaf_output(leaf))
            .sum()
    }

    fn max_depth(&self) -> usize {
        self.leaf_depth[..self.num_leaves]
            .iter()
            .copied()
            .max()
            .unwrap_or(0)
            .max(0) as usize
    }

    fn recompute_leaf_depths(&mut self, node: i32, depth: i32) {
        if node < 0 {
            self.leaf_depth[(!node) as usize] = depth;
        } else {
            let idx = node as usize;
            self.recompute_leaf_depths(self.left_child[idx], depth + 1);
            self.recompute_leaf_depths(self.right_child[idx], depth + 1);
        }
    }

    /// Add the SHAP contributions of this tree for `features` to `output`.
    ///
    /// `output` has one slot per feature plus a trailing slot receiving the
    /// expected value.
    pub fn predict_contrib(&self, features: &[f64], output: &mut [f64]) {
        let num_features = output.len() - 1;
        output[num_features] += self.expected_value();
        if self.num_leaves > 1 {
            let max_path_len = self.max_depth() + 2;
            let mut path = vec![PathElement::default(); max_path_len * (max_path_len + 1) / 2];
            self.tree_shap(features, output, 0, 0, &mut path, 0, 1.0, 1.0, -1);
        }
    }

    /// Recursive TreeSHAP (Lundberg et al.). The unique path of a call lives
    /// at `path[offset..=offset + unique_depth]`; children copy it further
    /// down the buffer so siblings see it unchanged.
    #[allow(clippy::too_many_arguments)]
    fn tree_shap(
        &self,
        features: &[f64],
        phi: &mut [f64],
        node: i32,
        mut unique_depth: usize,
        path: &mut [PathElement],
        parent_offset: usize,
        parent_zero_fraction: f64,
        parent_one_fraction: f64,
        parent_feature_index: i32,
    ) {
        let offset = parent_offset + unique_depth;
        if unique_depth > 0 {
            path.copy_within(parent_offset..parent_offset + unique_depth, offset);
        }
        let unique_path = &mut path[offset..];
        extend_path(
            unique_path,
            unique_depth,
            parent_zero_fraction,
            parent_one_fraction,
            parent_feature_index,
        );

        if node < 0 {
            let leaf_value = self.leaf_value[(!node) as usize];
            for i in 1..=unique_depth {
                let w = unwound_path_sum(unique_path, unique_depth, i);
                let el = unique_path[i];
                phi[el.feature_index as usize] += w * (el.one_fraction - el.zero_fraction) * leaf_value;
            }
            return;
        }

        let idx = node as usize;
        let split_feature = self.split_feature[idx];
        let value = features.get(split_feature as usize).copied().unwrap_or(0.0);
        let hot = self.decision(value, idx);
        let cold = if hot == self.left_child[idx] {
            self.right_child[idx]
        } else {
            self.left_child[idx]
        };
        let w = self.data_count(node);
        let hot_zero_fraction = self.data_count(hot) / w;
        let cold_zero_fraction = self.data_count(cold) / w;
        let mut incoming_zero_fraction = 1.0;
        let mut incoming_one_fraction = 1.0;

        // Undo an earlier split on the same feature so it can be redone here.
        let previous = (0..=unique_depth).find(|&i| unique_path[i].feature_index == split_feature);
        if let Some(path_index) = previous {
            incoming_zero_fraction = unique_path[path_index].zero_fraction;
            incoming_one_fraction = unique_path[path_index].one_fraction;
            unwind_path(unique_path, unique_depth, path_index);
            unique_depth -= 1;
        }

        self.tree_shap(
            features,
            phi,
            hot,
            unique_depth + 1,
            path,
            offset,
            hot_zero_fraction * incoming_zero_fraction,
            incoming_one_fraction,
            split_feature,
        );
        self.tree_shap(
            features,
            phi,
            cold,
            unique_depth + 1,
            path,
            offset,
            cold_zero_fraction * incoming_zero_fraction,
            0.0,
            split_feature,
        );
    }

    /// Parse a `Tree=k` block of a model file (without the `Tree=` line).
    pub fn from_block(block: &str) -> Result<Self> {
        let mut fields: HashMap<&str, &str> = HashMap::new();
        for line in block.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(key.trim(), value.trim());
            }
        }

        let num_leaves: usize = parse_scalar(&fields, "num_leaves")?;
        let num_cat: usize = match fields.get("num_cat") {
            Some(v) => v.parse().with_context(|| format!("Invalid num_cat: {}", v))?,
            None => 0,
        };
        let shrinkage: f64 = match fields.get("shrinkage") {
            Some(v) => v.parse().with_context(|| format!("Invalid shrinkage: {}", v))?,
            None => 1.0,
        };
        if num_leaves == 0 {
            bail!("Tree should have at least one leaf");
        }
        if fields.get("is_linear").map(|v| *v != "0").unwrap_or(false) {
            bail!("Linear trees are not supported");
        }

        let mut tree = Tree::new(num_leaves);
        tree.num_leaves = num_leaves;
        tree.num_cat = num_cat;
        tree.shrinkage = shrinkage;

        let leaf_value: Vec<f64> = parse_array(&fields, "leaf_value", num_leaves)?;
        tree.leaf_value.copy_from_slice(&leaf_value);
        if num_leaves == 1 {
            return Ok(tree);
        }

        let internal = num_leaves - 1;
        tree.left_child = parse_array(&fields, "left_child", internal)?;
        tree.right_child = parse_array(&fields, "right_child", internal)?;
        tree.split_feature = parse_array(&fields, "split_feature", internal)?;
        tree.threshold = parse_array(&fields, "threshold", internal)?;
        tree.decision_type = parse_array(&fields, "decision_type", internal)?;
        tree.split_gain = parse_optional(&fields, "split_gain", internal, 0.0)?;
        tree.leaf_weight = parse_optional(&fields, "leaf_weight", num_leaves, 0.0)?;
        tree.leaf_count = parse_optional(&fields, "leaf_count", num_leaves, 0)?;
        tree.internal_value = parse_optional(&fields, "internal_value", internal, 0.0)?;
        tree.internal_weight = parse_optional(&fields, "internal_weight", internal, 0.0)?;
        tree.internal_count = parse_optional(&fields, "internal_count", internal, 0)?;

        if num_cat > 0 {
            tree.cat_boundaries = parse_array(&fields, "cat_boundaries", num_cat + 1)?;
            let total = tree.cat_boundaries[num_cat].max(0) as usize;
            tree.cat_threshold = parse_array(&fields, "cat_threshold", total)?;
        }

        for node in 0..internal {
            for child in [tree.left_child[node], tree.right_child[node]] {
                let in_range = if child >= 0 {
                    (child as usize) < internal
                } else {
                    ((!child) as usize) < num_leaves
                };
                if !in_range {
                    bail!("Child index {} of node {} is out of range", child, node);
                }
            }
            if tree.decision_type[node] & CATEGORICAL_MASK != 0
                && tree.threshold[node] as usize >= num_cat
            {
                bail!("Categorical split {} refers to a missing category set", node);
            }
        }
        for node in 0..internal {
            for child in [tree.left_child[node], tree.right_child[node]] {
                if child < 0 {
                    tree.leaf_parent[(!child) as usize] = node as i32;
                }
            }
        }
        tree.recompute_leaf_depths(0, 0);
        Ok(tree)
    }
}

impl fmt::Display for Tree {
    /// The body of a `Tree=k` block.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let internal = self.num_leaves - 1;
        writeln!(f, "num_leaves={}", self.num_leaves)?;
        writeln!(f, "num_cat={}", self.num_cat)?;
        writeln!(f, "split_feature={}", array_to_string(&self.split_feature[..internal]))?;
        writeln!(f, "split_gain={}", array_to_string(&self.split_gain[..internal]))?;
        let thresholds: Vec<f64> = self.threshold[..internal].iter().map(|&t| avoid_inf(t)).collect();
        writeln!(f, "threshold={}", array_to_string(&thresholds))?;
        writeln!(f, "decision_type={}", array_to_string(&self.decision_type[..internal]))?;
        writeln!(f, "left_child={}", array_to_string(&self.left_child[..internal]))?;
        writeln!(f, "right_child={}", array_to_string(&self.right_child[..internal]))?;
        writeln!(f, "leaf_value={}", array_to_string(&self.leaf_value[..self.num_leaves]))?;
        writeln!(f, "leaf_weight={}", array_to_string(&self.leaf_weight[..self.num_leaves]))?;
        writeln!(f, "leaf_count={}", array_to_string(&self.leaf_count[..self.num_leaves]))?;
        writeln!(f, "internal_value={}", array_to_string(&self.internal_value[..internal]))?;
        writeln!(f, "internal_weight={}", array_to_string(&self.internal_weight[..internal]))?;
        writeln!(f, "internal_count={}", array_to_string(&self.internal_count[..internal]))?;
        if self.num_cat > 0 {
            writeln!(f, "cat_boundaries={}", array_to_string(&self.cat_boundaries))?;
            writeln!(f, "cat_threshold={}", array_to_string(&self.cat_threshold))?;
        }
        writeln!(f, "is_linear=0")?;
        writeln!(f, "shrinkage={}", self.shrinkage)?;
        writeln!(f)
    }
}

fn extend_path(
    unique_path: &mut [PathElement],
    unique_depth: usize,
    zero_fraction: f64,
    one_fraction: f64,
    feature_index: i32,
) {
    unique_path[unique_depth] = PathElement {
        feature_index,
        zero_fraction,
        one_fraction,
        pweight: if unique_depth == 0 { 1.0 } else { 0.0 },
    };
    for i in (0..unique_depth).rev() {
        unique_path[i + 1].pweight +=
            one_fraction * unique_path[i].pweight * (i + 1) as f64 / (unique_depth + 1) as f64;
        unique_path[i].pweight = zero_fraction * unique_path[i].pweight * (unique_depth - i) as f64
            / (unique_depth + 1) as f64;
    }
}

fn unwind_path(unique_path: &mut [PathElement], unique_depth: usize, path_index: usize) {
    let one_fraction = unique_path[path_index].one_fraction;
    let zero_fraction = unique_path[path_index].zero_fraction;
    let mut next_one_portion = unique_path[unique_depth].pweight;

    for i in (0..unique_depth).rev() {
        if one_fraction != 0.0 {
            let tmp = unique_path[i].pweight;
            unique_path[i].pweight =
                next_one_portion * (unique_depth + 1) as f64 / ((i + 1) as f64 * one_fraction);
            next_one_portion = tmp
                - unique_path[i].pweight * zero_fraction * (unique_depth - i) as f64
                    / (unique_depth + 1) as f64;
        } else {
            unique_path[i].pweight = (unique_path[i].pweight * (unique_depth + 1) as f64)
                / (zero_fraction * (unique_depth - i) as f64);
        }
    }

    for i in path_index..unique_depth {
        unique_path[i].feature_index = unique_path[i + 1].feature_index;
        unique_path[i].zero_fraction = unique_path[i + 1].zero_fraction;
        unique_path[i].one_fraction = unique_path[i + 1].one_fraction;
    }
}

fn unwound_path_sum(unique_path: &[PathElement], unique_depth: usize, path_index: usize) -> f64 {
    let one_fraction = unique_path[path_index].one_fraction;
    let zero_fraction = unique_path[path_index].zero_fraction;
    let mut next_one_portion = unique_path[unique_depth].pweight;
    let mut total = 0.0;

    for i in (0..unique_depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * (unique_depth + 1) as f64 / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = unique_path[i].pweight
                - tmp * zero_fraction * ((unique_depth - i) as f64 / (unique_depth + 1) as f64);
        } else {
            total += (unique_path[i].pweight / zero_fraction)
                / ((unique_depth - i) as f64 / (unique_depth + 1) as f64);
        }
    }
    total
}

/// Bitset with bit `c` set for every category `c`.
fn construct_bitset(categories: &[i32]) -> Vec<u32> {
    let max = categories.iter().copied().filter(|&c| c >= 0).max().unwrap_or(0) as usize;
    let mut bitset = vec![0u32; max / 32 + 1];
    for &category in categories.iter().filter(|&&c| c >= 0) {
        let category = category as usize;
        bitset[category / 32] |= 1 << (category % 32);
    }
    bitset
}

fn find_in_bitset(bitset: &[u32], value: i32) -> bool {
    let value = value as usize;
    let word = value / 32;
    word < bitset.len() && (bitset[word] >> (value % 32)) & 1 == 1
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value
    }
}

fn avoid_inf(value: f64) -> f64 {
    if value.is_infinite() {
        if value > 0.0 {
            1e300
        } else {
            -1e300
        }
    } else {
        value
    }
}

/// Space-separated values; `f64` values use the shortest representation
/// that parses back to the same number.
fn array_to_string<T: fmt::Display>(arr: &[T]) -> String {
    arr.iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_scalar<T>(fields: &HashMap<&str, &str>, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let value = fields
        .get(key)
        .ok_or_else(|| anyhow!("Tree model string format error, should contain {} field", key))?;
    value
        .parse()
        .map_err(|e| anyhow!("Invalid {} value {}: {}", key, value, e))
}

fn parse_array<T>(fields: &HashMap<&str, &str>, key: &str, expected: usize) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let value = fields
        .get(key)
        .ok_or_else(|| anyhow!("Tree model string format error, should contain {} field", key))?;
    let values = value
        .split_whitespace()
        .map(|item| item.parse::<T>().map_err(|e| anyhow!("Invalid {} entry {}: {}", key, item, e)))
        .collect::<Result<Vec<T>>>()?;
    if values.len() != expected {
        bail!("Tree field {} has {} entries, expected {}", key, values.len(), expected);
    }
    Ok(values)
}

fn parse_optional<T>(fields: &HashMap<&str, &str>, key: &str, expected: usize, default: T) -> Result<Vec<T>>
where
    T: FromStr + Clone,
    T::Err: fmt::Display,
{
    if fields.contains_key(key) {
        parse_array(fields, key, expected)
    } else {
        Ok(vec![default; expected])
    }
}
