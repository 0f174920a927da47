//! Training objectives: gradients, initial score and output transform.

use crate::native::config::{ConstraintKinds, EngineConfig, StepwiseProxy};
use crate::native::dataset::DatasetCore;
use crate::native::EPSILON;
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::fmt;

/// A differentiable training loss.
pub trait ObjectiveFunction: Send + Sync + fmt::Debug {
    /// Name written to the model's `objective=` line.
    fn name(&self) -> &'static str;

    /// Fill first and second order gradients for the current raw scores.
    fn get_gradients(&mut self, scores: &[f64], gradients: &mut [f64], hessians: &mut [f64]);

    /// Raw score every row starts from.
    fn boost_from_score(&self) -> f64;

    /// The `objective=` line value.
    fn to_model_string(&self) -> String {
        self.name().to_string()
    }
}

/// Build the objective named in `config` over the dataset's labels.
pub fn create_objective(config: &EngineConfig, data: &DatasetCore) -> Result<Box<dyn ObjectiveFunction>> {
    let labels = data.labels()?;
    let weights = data.weights.as_deref();
    match config.objective.as_str() {
        "binary" => Ok(Box::new(BinaryLogloss::new(config, labels, weights)?)),
        "cross_entropy" | "xentropy" => Ok(Box::new(CrossEntropy::new(labels, weights)?)),
        "constrained_cross_entropy" => {
            let groups = match &data.constraint_groups {
                Some(groups) => groups.as_slice(),
                None => bail!("Field constraint_group must be set for objective constrained_cross_entropy"),
            };
            Ok(Box::new(ConstrainedCrossEntropy::new(config, labels, weights, groups)?))
        }
        other => bail!("Unknown objective type name: {}", other),
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Log-odds of a weighted mean label, clamped away from 0 and 1.
fn log_odds(mean: f64) -> f64 {
    let pavg = mean.clamp(EPSILON, 1.0 - EPSILON);
    (pavg / (1.0 - pavg)).ln()
}

/// Log loss over 0/1 labels.
#[derive(Debug)]
pub struct BinaryLogloss {
    is_positive: Vec<bool>,
    weights: Option<Vec<f64>>,
    label_weights: [f64; 2],
    sigmoid: f64,
}

impl BinaryLogloss {
    /// Check labels and derive the class weights of `is_unbalance` and
    /// `scale_pos_weight`.
    pub fn new(config: &EngineConfig, labels: &[f32], weights: Option<&[f32]>) -> Result<Self> {
        if config.sigmoid <= 0.0 {
            bail!("Sigmoid parameter {} should be greater than zero", config.sigmoid);
        }
        if config.is_unbalance && (config.scale_pos_weight - 1.0).abs() > f64::EPSILON {
            bail!("Cannot set is_unbalance and scale_pos_weight at the same time");
        }
        let mut is_positive = Vec::with_capacity(labels.len());
        for (i, &label) in labels.iter().enumerate() {
            if label != 0.0 && label != 1.0 {
                bail!("[binary]: label [#{}] should be 0 or 1, got {}", i, label);
            }
            is_positive.push(label == 1.0);
        }
        let num_pos = is_positive.iter().filter(|p| **p).count();
        let num_neg = is_positive.len() - num_pos;
        if num_pos == 0 || num_neg == 0 {
            log::warn!("Contains only one class");
        }
        log::info!("Number of positive: {}, number of negative: {}", num_pos, num_neg);

        let mut label_weights = [1.0, 1.0];
        if config.is_unbalance && num_pos > 0 && num_neg > 0 {
            if num_pos > num_neg {
                label_weights[0] = num_pos as f64 / num_neg as f64;
            } else {
                label_weights[1] = num_neg as f64 / num_pos as f64;
            }
        }
        label_weights[1] *= config.scale_pos_weight;

        Ok(BinaryLogloss {
            is_positive,
            weights: weights.map(|w| w.iter().map(|&v| v as f64).collect()),
            label_weights,
            sigmoid: config.sigmoid,
        })
    }
}

impl ObjectiveFunction for BinaryLogloss {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn get_gradients(&mut self, scores: &[f64], gradients: &mut [f64], hessians: &mut [f64]) {
        for i in 0..scores.len() {
            let (label, label_weight) = if self.is_positive[i] {
                (1.0, self.label_weights[1])
            } else {
                (-1.0, self.label_weights[0])
            };
            let response = -label * self.sigmoid / (1.0 + (label * self.sigmoid * scores[i]).exp());
            let abs_response = response.abs();
            let weight = label_weight * self.weights.as_ref().map_or(1.0, |w| w[i]);
            gradients[i] = response * weight;
            hessians[i] = abs_response * (self.sigmoid - abs_response) * weight;
        }
    }

    fn boost_from_score(&self) -> f64 {
        let (sum_positive, sum_weight) = match &self.weights {
            Some(weights) => self
                .is_positive
                .iter()
                .zip(weights)
                .fold((0.0, 0.0), |(sp, sw), (&p, &w)| (if p { sp + w } else { sp }, sw + w)),
            None => (
                self.is_positive.iter().filter(|p| **p).count() as f64,
                self.is_positive.len() as f64,
            ),
        };
        let pavg = if sum_weight > 0.0 { sum_positive / sum_weight } else { 0.0 };
        let init_score = log_odds(pavg) / self.sigmoid;
        log::info!("[binary:BoostFromScore]: pavg={:.6} -> initscore={:.6}", pavg, init_score);
        init_score
    }

    fn to_model_string(&self) -> String {
        format!("binary sigmoid:{}", self.sigmoid)
    }
}

fn check_probability_labels(name: &str, labels: &[f32]) -> Result<()> {
    for (i, &label) in labels.iter().enumerate() {
        if !(0.0..=1.0).contains(&label) {
            bail!("[{}]: does not tolerate label [#{}] outside [0, 1]", name, i);
        }
    }
    Ok(())
}

/// Cross-entropy against probability labels in `[0, 1]`.
#[derive(Debug)]
pub struct CrossEntropy {
    labels: Vec<f64>,
    weights: Option<Vec<f64>>,
}

impl CrossEntropy {
    /// Check that labels are probabilities.
    pub fn new(labels: &[f32], weights: Option<&[f32]>) -> Result<Self> {
        check_probability_labels("cross_entropy", labels)?;
        if let Some(weights) = weights {
            if weights.iter().map(|&w| w as f64).sum::<f64>() <= 0.0 {
                bail!("[cross_entropy]: sum of weights is zero");
            }
        }
        Ok(CrossEntropy {
            labels: labels.iter().map(|&l| l as f64).collect(),
            weights: weights.map(|w| w.iter().map(|&v| v as f64).collect()),
        })
    }
}

fn cross_entropy_gradients(
    labels: &[f64],
    weights: Option<&[f64]>,
    scores: &[f64],
    gradients: &mut [f64],
    hessians: &mut [f64],
) {
    for i in 0..scores.len() {
        let z = sigmoid(scores[i]);
        let weight = weights.map_or(1.0, |w| w[i]);
        gradients[i] = (z - labels[i]) * weight;
        hessians[i] = z * (1.0 - z) * weight;
    }
}

fn cross_entropy_init(name: &str, labels: &[f64], weights: Option<&[f64]>) -> f64 {
    let (sum_label, sum_weight) = match weights {
        Some(weights) => labels
            .iter()
            .zip(weights)
            .fold((0.0, 0.0), |(sl, sw), (&l, &w)| (sl + l * w, sw + w)),
        None => (labels.iter().sum::<f64>(), labels.len() as f64),
    };
    let pavg = if sum_weight > 0.0 { sum_label / sum_weight } else { 0.0 };
    let init_score = log_odds(pavg);
    log::info!("[{}:BoostFromScore]: pavg={:.6} -> initscore={:.6}", name, pavg, init_score);
    init_score
}

impl ObjectiveFunction for CrossEntropy {
    fn name(&self) -> &'static str {
        "cross_entropy"
    }

    fn get_gradients(&mut self, scores: &[f64], gradients: &mut [f64], hessians: &mut [f64]) {
        cross_entropy_gradients(&self.labels, self.weights.as_deref(), scores, gradients, hessians);
    }

    fn boost_from_score(&self) -> f64 {
        cross_entropy_init(self.name(), &self.labels, self.weights.as_deref())
    }
}

impl StepwiseProxy {
    /// Derivative of the proxy loss at margin `x`.
    fn derivative(&self, x: f64) -> f64 {
        match self {
            StepwiseProxy::CrossEntropy => sigmoid(x),
            StepwiseProxy::Quadratic => (1.0 + x).max(0.0),
            StepwiseProxy::Hinge => {
                if x > -1.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Row counts of one protected group.
#[derive(Debug, Clone, Copy, Default)]
struct GroupCounts {
    negatives: usize,
    positives: usize,
}

/// Which rate a Lagrange multiplier constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Constraint {
    GroupFpr(usize),
    GroupFnr(usize),
    GlobalFpr,
    GlobalFnr,
}

/// Cross-entropy with Lagrangian fairness constraints.
///
/// For every protected group `g` the objective adds
/// `FPR_g - FPR - fpr_slack <= 0` and/or `FNR_g - FNR - fnr_slack <= 0`,
/// optionally with global targets `FPR <= target_fpr`, `FNR <= target_fnr`.
/// Error rates are replaced by a differentiable proxy for the gradients;
/// the multipliers ascend on the rates measured at `score_threshold` before
/// every round of gradients.
#[derive(Debug)]
pub struct ConstrainedCrossEntropy {
    labels: Vec<f64>,
    weights: Option<Vec<f64>>,
    group_of_row: Vec<usize>,
    groups: Vec<GroupCounts>,
    num_negatives: usize,
    num_positives: usize,
    constraints: Vec<Constraint>,
    multipliers: Vec<f64>,
    fpr_slack: f64,
    fnr_slack: f64,
    target_fpr: f64,
    target_fnr: f64,
    multiplier_learning_rate: f64,
    proxy: StepwiseProxy,
    raw_threshold: f64,
}

impl ConstrainedCrossEntropy {
    /// Index the groups and set the initial multipliers.
    pub fn new(
        config: &EngineConfig,
        labels: &[f32],
        weights: Option<&[f32]>,
        constraint_groups: &[i32],
    ) -> Result<Self> {
        check_probability_labels("constrained_cross_entropy", labels)?;
        if !(config.score_threshold > 0.0 && config.score_threshold < 1.0) {
            bail!("score_threshold should be in (0, 1), got {}", config.score_threshold);
        }

        let mut group_ids: BTreeMap<i32, usize> = BTreeMap::new();
        for &group in constraint_groups {
            let next = group_ids.len();
            group_ids.entry(group).or_insert(next);
        }
        // Dense indices in sorted group order.
        for (position, index) in group_ids.values_mut().enumerate() {
            *index = position;
        }
        let group_of_row: Vec<usize> = constraint_groups.iter().map(|g| group_ids[g]).collect();

        let mut groups = vec![GroupCounts::default(); group_ids.len()];
        for (row, &group) in group_of_row.iter().enumerate() {
            if labels[row] > 0.5 {
                groups[group].positives += 1;
            } else {
                groups[group].negatives += 1;
            }
        }
        let num_positives = groups.iter().map(|g| g.positives).sum();
        let num_negatives = groups.iter().map(|g| g.negatives).sum();

        let constraints = build_constraints(config.constraint_type, config.global_constraint_type, groups.len());
        let multipliers = if config.init_multipliers.is_empty() {
            vec![0.0; constraints.len()]
        } else if config.init_multipliers.len() == constraints.len() {
            config.init_multipliers.iter().map(|&m| m.max(0.0)).collect()
        } else {
            bail!(
                "init_multipliers has {} values, the objective has {} constraints",
                config.init_multipliers.len(),
                constraints.len()
            );
        };
        log::info!(
            "[constrained_cross_entropy]: {} groups, {} constraints",
            groups.len(),
            constraints.len()
        );

        Ok(ConstrainedCrossEntropy {
            labels: labels.iter().map(|&l| l as f64).collect(),
            weights: weights.map(|w| w.iter().map(|&v| v as f64).collect()),
            group_of_row,
            groups,
            num_negatives,
            num_positives,
            constraints,
            multipliers,
            fpr_slack: config.constraint_fpr_threshold,
            fnr_slack: config.constraint_fnr_threshold,
            target_fpr: config.global_target_fpr,
            target_fnr: config.global_target_fnr,
            multiplier_learning_rate: config.multiplier_learning_rate,
            proxy: config.constraint_stepwise_proxy,
            raw_threshold: log_odds(config.score_threshold),
        })
    }

    /// Current Lagrange multipliers.
    pub fn multipliers(&self) -> &[f64] {
        &self.multipliers
    }

    fn violations(&self, scores: &[f64]) -> Vec<f64> {
        let mut false_positives = vec![0usize; self.groups.len()];
        let mut false_negatives = vec![0usize; self.groups.len()];
        for (row, &score) in scores.iter().enumerate() {
            let predicted_positive = score > self.raw_threshold;
            let group = self.group_of_row[row];
            if self.labels[row] > 0.5 {
                if !predicted_positive {
                    false_negatives[group] += 1;
                }
            } else if predicted_positive {
                false_positives[group] += 1;
            }
        }
        let rate = |count: usize, total: usize| if total > 0 { count as f64 / total as f64 } else { 0.0 };
        let fpr = rate(false_positives.iter().sum(), self.num_negatives);
        let fnr = rate(false_negatives.iter().sum(), self.num_positives);

        self.constraints
            .iter()
            .map(|constraint| match *constraint {
                Constraint::GroupFpr(g) => {
                    rate(false_positives[g], self.groups[g].negatives) - fpr - self.fpr_slack
                }
                Constraint::GroupFnr(g) => {
                    rate(false_negatives[g], self.groups[g].positives) - fnr - self.fnr_slack
                }
                Constraint::GlobalFpr => fpr - self.target_fpr,
                Constraint::GlobalFnr => fnr - self.target_fnr,
            })
            .collect()
    }

    fn update_multipliers(&mut self, scores: &[f64]) {
        let violations = self.violations(scores);
        for (multiplier, violation) in self.multipliers.iter_mut().zip(violations) {
            *multiplier = (*multiplier + self.multiplier_learning_rate * violation).max(0.0);
        }
        log::debug!("[constrained_cross_entropy]: multipliers {:?}", self.multipliers);
    }
}

fn build_constraints(group: ConstraintKinds, global: ConstraintKinds, num_groups: usize) -> Vec<Constraint> {
    let mut constraints = Vec::new();
    if group.fpr {
        constraints.extend((0..num_groups).map(Constraint::GroupFpr));
    }
    if group.fnr {
        constraints.extend((0..num_groups).map(Constraint::GroupFnr));
    }
    if global.fpr {
        constraints.push(Constraint::GlobalFpr);
    }
    if global.fnr {
        constraints.push(Constraint::GlobalFnr);
    }
    constraints
}

impl ObjectiveFunction for ConstrainedCrossEntropy {
    fn name(&self) -> &'static str {
        "constrained_cross_entropy"
    }

    fn get_gradients(&mut self, scores: &[f64], gradients: &mut [f64], hessians: &mut [f64]) {
        self.update_multipliers(scores);
        cross_entropy_gradients(&self.labels, self.weights.as_deref(), scores, gradients, hessians);

        // Per-row coefficient of the proxy derivative, split by label.
        let num_groups = self.groups.len();
        let mut negative_coef = vec![0.0; num_groups];
        let mut positive_coef = vec![0.0; num_groups];
        let mut negative_shared = 0.0;
        let mut positive_shared = 0.0;
        let per = |total: usize| if total > 0 { 1.0 / total as f64 } else { 0.0 };
        for (constraint, &lambda) in self.constraints.iter().zip(&self.multipliers) {
            match *constraint {
                Constraint::GroupFpr(g) => {
                    negative_coef[g] += lambda * per(self.groups[g].negatives);
                    negative_shared -= lambda * per(self.num_negatives);
                }
                Constraint::GroupFnr(g) => {
                    positive_coef[g] += lambda * per(self.groups[g].positives);
                    positive_shared -= lambda * per(self.num_positives);
                }
                Constraint::GlobalFpr => negative_shared += lambda * per(self.num_negatives),
                Constraint::GlobalFnr => positive_shared += lambda * per(self.num_positives),
            }
        }

        let scale = scores.len() as f64;
        for row in 0..scores.len() {
            let group = self.group_of_row[row];
            let extra = if self.labels[row] > 0.5 {
                // d/ds proxy(-s) = -proxy'(-s)
                -(positive_coef[group] + positive_shared) * self.proxy.derivative(-scores[row])
            } else {
                (negative_coef[group] + negative_shared) * self.proxy.derivative(scores[row])
            };
            gradients[row] += scale * extra;
        }
    }

    fn boost_from_score(&self) -> f64 {
        cross_entropy_init(self.name(), &self.labels, self.weights.as_deref())
    }
}

/// Maps raw scores to the model's output space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputTransform {
    /// `1 / (1 + exp(-param * x))`
    Sigmoid(f64),
    /// Softmax over the class scores
    Softmax,
    /// Raw score
    Identity,
}

impl OutputTransform {
    /// Transform for an `objective=` line such as `binary sigmoid:1`.
    pub fn from_objective_line(line: &str) -> Self {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().unwrap_or("");
        let sigmoid = tokens
            .filter_map(|token| token.strip_prefix("sigmoid:"))
            .find_map(|value| value.parse::<f64>().ok())
            .unwrap_or(1.0);
        match name {
            "binary" | "multiclassova" => OutputTransform::Sigmoid(sigmoid),
            "cross_entropy" | "xentropy" | "constrained_cross_entropy" => OutputTransform::Sigmoid(1.0),
            "multiclass" | "softmax" => OutputTransform::Softmax,
            _ => OutputTransform::Identity,
        }
    }

    /// Apply in place to the scores of one row.
    pub fn apply(&self, scores: &mut [f64]) {
        match *self {
            OutputTransform::Sigmoid(param) => {
                for score in scores.iter_mut() {
                    *score = sigmoid(param * *score);
                }
            }
            OutputTransform::Softmax => {
                let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let mut sum = 0.0;
                for score in scores.iter_mut() {
                    *score = (*score - max).exp();
                    sum += *score;
                }
                for score in scores.iter_mut() {
                    *score /= sum;
                }
            }
            OutputTransform::Identity => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(params: &str) -> EngineConfig {
        EngineConfig::from_param_string(params).unwrap()
    }

    #[test]
    fn test_binary_gradients() {
        let mut objective = BinaryLogloss::new(&config(""), &[0.0, 1.0], None).unwrap();
        let mut g = [0.0; 2];
        let mut h = [0.0; 2];
        objective.get_gradients(&[0.0, 0.0], &mut g, &mut h);
        assert_relative_eq!(g[0], 0.5);
        assert_relative_eq!(g[1], -0.5);
        assert_relative_eq!(h[0], 0.25);
        assert_relative_eq!(objective.boost_from_score(), 0.0, epsilon = 1e-12);
        assert_eq!(objective.to_model_string(), "binary sigmoid:1");
    }

    #[test]
    fn test_binary_rejects_soft_labels() {
        assert!(BinaryLogloss::new(&config(""), &[0.0, 0.3], None).is_err());
    }

    #[test]
    fn test_unbalance_weights_minority() {
        let labels = [0.0, 0.0, 0.0, 1.0];
        let mut objective = BinaryLogloss::new(&config("is_unbalance=true"), &labels, None).unwrap();
        let mut g = [0.0; 4];
        let mut h = [0.0; 4];
        objective.get_gradients(&[0.0; 4], &mut g, &mut h);
        assert_relative_eq!(g[3], -1.5);
        assert_relative_eq!(g[0], 0.5);
    }

    #[test]
    fn test_cross_entropy() {
        let mut objective = CrossEntropy::new(&[0.25, 0.75], None).unwrap();
        let mut g = [0.0; 2];
        let mut h = [0.0; 2];
        objective.get_gradients(&[0.0, 0.0], &mut g, &mut h);
        assert_relative_eq!(g[0], 0.25);
        assert_relative_eq!(g[1], -0.25);
        assert!(CrossEntropy::new(&[1.5], None).is_err());
    }

    #[test]
    fn test_constrained_multipliers_grow_on_violation() {
        // Group 1 negatives are all predicted positive, group 0 none.
        let labels = [0.0, 0.0, 0.0, 0.0, 1.0, 1.0];
        let groups = [0, 0, 1, 1, 0, 1];
        let mut objective = ConstrainedCrossEntropy::new(
            &config("objective=constrained_cross_entropy multiplier_learning_rate=1"),
            &labels,
            None,
            &groups,
        )
        .unwrap();
        let scores = [-2.0, -2.0, 2.0, 2.0, 2.0, 2.0];
        let mut g = [0.0; 6];
        let mut h = [0.0; 6];
        objective.get_gradients(&scores, &mut g, &mut h);
        assert_eq!(objective.multipliers().len(), 2);
        assert_relative_eq!(objective.multipliers()[0], 0.0);
        assert_relative_eq!(objective.multipliers()[1], 0.5);
        // The constraint pushes group 1 negatives further down than plain cross-entropy.
        assert!(g[2] > sigmoid(2.0));
        assert_relative_eq!(h[2], sigmoid(2.0) * (1.0 - sigmoid(2.0)));
    }

    #[test]
    fn test_constrained_checks_multiplier_count() {
        let result = ConstrainedCrossEntropy::new(
            &config("init_multipliers=1,2,3"),
            &[0.0, 1.0],
            None,
            &[0, 1],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_output_transform() {
        let mut scores = [0.0];
        OutputTransform::from_objective_line("binary sigmoid:1").apply(&mut scores);
        assert_relative_eq!(scores[0], 0.5);
        let mut scores = [1.0, 1.0];
        OutputTransform::from_objective_line("multiclass num_class:2").apply(&mut scores);
        assert_relative_eq!(scores[0], 0.5);
        assert_eq!(OutputTransform::from_objective_line("regression"), OutputTransform::Identity);
    }
}
