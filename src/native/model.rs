//! Tree ensembles and their text format.

use crate::native::objective::OutputTransform;
use crate::native::tree::Tree;
use crate::native::{C_API_FEATURE_IMPORTANCE_GAIN, C_API_FEATURE_IMPORTANCE_SPLIT};
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::ops::Range;
use std::path::Path;

const MODEL_VERSION: &str = "v4";

/// A trained ensemble: trees plus the header of the model file.
#[derive(Debug, Clone)]
pub struct Model {
    /// Trees, `num_tree_per_iteration` per iteration
    pub trees: Vec<Tree>,
    /// Number of classes the model scores
    pub num_class: usize,
    /// Trees added per boosting iteration
    pub num_tree_per_iteration: usize,
    /// Index of the last feature column
    pub max_feature_idx: usize,
    /// Value of the `objective=` line
    pub objective: String,
    /// Raw score to output mapping
    pub transform: OutputTransform,
    /// Whether tree outputs are averaged rather than summed (random forest)
    pub average_output: bool,
    /// One name per feature column
    pub feature_names: Vec<String>,
    /// Value range or categories of each feature
    pub feature_infos: Vec<String>,
    /// Contents of the `parameters:` section
    pub parameters: String,
}

impl Model {
    /// Empty single-class model over `num_features` columns.
    pub fn new(
        num_features: usize,
        feature_names: Vec<String>,
        feature_infos: Vec<String>,
        objective: String,
        average_output: bool,
        parameters: String,
    ) -> Self {
        Model {
            trees: Vec::new(),
            num_class: 1,
            num_tree_per_iteration: 1,
            max_feature_idx: num_features.saturating_sub(1),
            transform: OutputTransform::from_objective_line(&objective),
            objective,
            average_output,
            feature_names,
            feature_infos,
            parameters,
        }
    }

    /// Number of feature columns a row must have.
    pub fn num_features(&self) -> usize {
        self.max_feature_idx + 1
    }

    /// Number of complete boosting iterations.
    pub fn num_iterations(&self) -> usize {
        self.trees.len() / self.num_tree_per_iteration
    }

    /// Outputs of one prediction of `predict_type` for `num_features` columns.
    pub fn num_predict_outputs(&self, predict_type: i32, start_iteration: i32, num_iteration: i32) -> usize {
        match predict_type {
            crate::native::C_API_PREDICT_LEAF_INDEX => self.tree_range(start_iteration, num_iteration).len(),
            crate::native::C_API_PREDICT_CONTRIB => self.num_class * (self.num_features() + 1),
            _ => self.num_class,
        }
    }

    /// Trees of iterations `[start, start + num)`; `num <= 0` means up to the end.
    fn tree_range(&self, start_iteration: i32, num_iteration: i32) -> Range<usize> {
        let total = self.num_iterations();
        let start = (start_iteration.max(0) as usize).min(total);
        let end = if num_iteration <= 0 {
            total
        } else {
            (start + num_iteration as usize).min(total)
        };
        start * self.num_tree_per_iteration..end * self.num_tree_per_iteration
    }

    fn average_scale(&self, range: &Range<usize>) -> Option<f64> {
        let iterations = range.len() / self.num_tree_per_iteration;
        (self.average_output && iterations > 0).then(|| 1.0 / iterations as f64)
    }

    /// Raw score per class.
    pub fn predict_raw(&self, row: &[f64], start_iteration: i32, num_iteration: i32) -> Vec<f64> {
        let range = self.tree_range(start_iteration, num_iteration);
        let mut scores = vec![0.0; self.num_class];
        for (i, tree) in self.trees[range.clone()].iter().enumerate() {
            scores[i % self.num_tree_per_iteration] += tree.predict(row);
        }
        if let Some(scale) = self.average_scale(&range) {
            scores.iter_mut().for_each(|s| *s *= scale);
        }
        scores
    }

    /// Transformed score per class.
    pub fn predict(&self, row: &[f64], start_iteration: i32, num_iteration: i32) -> Vec<f64> {
        let mut scores = self.predict_raw(row, start_iteration, num_iteration);
        self.transform.apply(&mut scores);
        scores
    }

    /// Leaf reached in each tree.
    pub fn predict_leaf_index(&self, row: &[f64], start_iteration: i32, num_iteration: i32) -> Vec<f64> {
        let range = self.tree_range(start_iteration, num_iteration);
        self.trees[range].iter().map(|tree| tree.leaf_index(row) as f64).collect()
    }

    /// SHAP values: for each class, one value per feature then the expected value.
    pub fn predict_contrib(&self, row: &[f64], start_iteration: i32, num_iteration: i32) -> Vec<f64> {
        let range = self.tree_range(start_iteration, num_iteration);
        let width = self.num_features() + 1;
        let mut output = vec![0.0; self.num_class * width];
        for (i, tree) in self.trees[range.clone()].iter().enumerate() {
            let class = i % self.num_tree_per_iteration;
            tree.predict_contrib(row, &mut output[class * width..(class + 1) * width]);
        }
        if let Some(scale) = self.average_scale(&range) {
            output.iter_mut().for_each(|v| *v *= scale);
        }
        output
    }

    /// Split counts or total gains per feature over the first `num_iteration`
    /// iterations (`<= 0` for all).
    pub fn feature_importance(&self, num_iteration: i32, importance_type: i32) -> Result<Vec<f64>> {
        let mut importance = vec![0.0; self.num_features()];
        for tree in &self.trees[self.tree_range(0, num_iteration)] {
            for (feature, gain) in tree.splits() {
                importance[feature] += match importance_type {
                    C_API_FEATURE_IMPORTANCE_SPLIT => 1.0,
                    C_API_FEATURE_IMPORTANCE_GAIN => gain,
                    other => bail!("Unknown importance type {}", other),
                };
            }
        }
        Ok(importance)
    }

    /// Model text for iterations `[start_iteration, start_iteration + num_iteration)`.
    pub fn save_to_string(&self, start_iteration: i32, num_iteration: i32, importance_type: i32) -> String {
        let range = self.tree_range(start_iteration, num_iteration);
        let tree_blocks: Vec<String> = self.trees[range.clone()]
            .iter()
            .enumerate()
            .map(|(i, tree)| format!("Tree={}\n{}\n", i, tree))
            .collect();

        let mut out = String::new();
        let _ = writeln!(out, "tree");
        let _ = writeln!(out, "version={}", MODEL_VERSION);
        let _ = writeln!(out, "num_class={}", self.num_class);
        let _ = writeln!(out, "num_tree_per_iteration={}", self.num_tree_per_iteration);
        let _ = writeln!(out, "label_index=0");
        let _ = writeln!(out, "max_feature_idx={}", self.max_feature_idx);
        let _ = writeln!(out, "objective={}", self.objective);
        if self.average_output {
            let _ = writeln!(out, "average_output");
        }
        let _ = writeln!(out, "feature_names={}", self.feature_names.join(" "));
        let _ = writeln!(out, "feature_infos={}", self.feature_infos.join(" "));
        let sizes: Vec<String> = tree_blocks.iter().map(|b| b.len().to_string()).collect();
        let _ = writeln!(out, "tree_sizes={}", sizes.join(" "));
        let _ = writeln!(out);
        for block in &tree_blocks {
            out.push_str(block);
        }
        let _ = writeln!(out, "end of trees");

        let _ = writeln!(out);
        let _ = writeln!(out, "feature_importances:");
        let importance_iterations = (range.end / self.num_tree_per_iteration) as i32;
        let importance = self
            .feature_importance(importance_iterations, importance_type)
            .or_else(|_| self.feature_importance(importance_iterations, C_API_FEATURE_IMPORTANCE_SPLIT))
            .unwrap_or_default();
        let mut pairs: Vec<(f64, &str)> = importance
            .iter()
            .zip(&self.feature_names)
            .filter(|(value, _)| **value > 0.0)
            .map(|(value, name)| (*value, name.as_str()))
            .collect();
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));
        for (value, name) in pairs {
            if importance_type == C_API_FEATURE_IMPORTANCE_SPLIT {
                let _ = writeln!(out, "{}={}", name, value as u64);
            } else {
                let _ = writeln!(out, "{}={}", name, value);
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "parameters:");
        out.push_str(&self.parameters);
        let _ = writeln!(out, "end of parameters");
        let _ = writeln!(out);
        let _ = writeln!(out, "pandas_categorical:null");
        out
    }

    /// Write [`Model::save_to_string`] output to `path`.
    pub fn save_to_file(
        &self,
        path: &Path,
        start_iteration: i32,
        num_iteration: i32,
        importance_type: i32,
    ) -> Result<()> {
        std::fs::write(path, self.save_to_string(start_iteration, num_iteration, importance_type))
            .with_context(|| format!("Cannot write model to {}", path.display()))
    }

    /// Read a model file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not open {}", path.display()))?;
        Self::load_from_string(&text)
    }

    /// Parse model text.
    pub fn load_from_string(text: &str) -> Result<Self> {
        let mut header: HashMap<&str, &str> = HashMap::new();
        let mut average_output = false;
        let mut lines = text.lines().peekable();

        while let Some(line) = lines.peek() {
            let line = line.trim();
            if line.starts_with("Tree=") || line == "end of trees" {
                break;
            }
            if line == "average_output" {
                average_output = true;
            } else if let Some((key, value)) = line.split_once('=') {
                header.insert(key.trim(), value.trim());
            }
            lines.next();
        }

        let num_class: usize = header_value(&header, "num_class")?;
        let num_tree_per_iteration: usize = match header.get("num_tree_per_iteration") {
            Some(_) => header_value(&header, "num_tree_per_iteration")?,
            None => num_class,
        };
        let max_feature_idx: usize = header_value(&header, "max_feature_idx")?;
        if num_class == 0 || num_tree_per_iteration == 0 {
            bail!("Model file has no classes");
        }
        let feature_names: Vec<String> = match header.get("feature_names") {
            Some(names) => names.split_whitespace().map(str::to_string).collect(),
            None => bail!("Model file doesn't contain feature_names"),
        };
        if feature_names.len() != max_feature_idx + 1 {
            bail!(
                "Wrong size of feature_names: {} names for {} features",
                feature_names.len(),
                max_feature_idx + 1
            );
        }
        let feature_infos = header
            .get("feature_infos")
            .map(|infos| infos.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let objective = header.get("objective").copied().unwrap_or("").to_string();

        let mut trees = Vec::new();
        let mut block = String::new();
        let mut in_tree = false;
        let mut parameters = String::new();
        let mut in_parameters = false;
        for line in lines {
            let trimmed = line.trim();
            if trimmed.starts_with("Tree=") || trimmed == "end of trees" {
                if in_tree {
                    trees.push(
                        Tree::from_block(&block)
                            .with_context(|| format!("Invalid tree at index {}", trees.len()))?,
                    );
                    block.clear();
                }
                in_tree = trimmed != "end of trees";
            } else if in_tree {
                block.push_str(trimmed);
                block.push('\n');
            } else if trimmed == "parameters:" {
                in_parameters = true;
            } else if trimmed == "end of parameters" {
                in_parameters = false;
            } else if in_parameters {
                parameters.push_str(trimmed);
                parameters.push('\n');
            }
        }
        if in_tree {
            bail!("Model file doesn't contain end of trees");
        }
        if trees.len() % num_tree_per_iteration != 0 {
            bail!(
                "Model has {} trees, not a multiple of {} trees per iteration",
                trees.len(),
                num_tree_per_iteration
            );
        }
        if let Some(feature) = trees.iter().filter_map(Tree::max_split_feature).max() {
            if feature > max_feature_idx {
                bail!("Tree splits on feature {} but max_feature_idx is {}", feature, max_feature_idx);
            }
        }

        log::debug!(
            "Loaded model with {} trees, {} classes and {} features",
            trees.len(),
            num_class,
            max_feature_idx + 1
        );
        Ok(Model {
            trees,
            num_class,
            num_tree_per_iteration,
            max_feature_idx,
            transform: OutputTransform::from_objective_line(&objective),
            objective,
            average_output,
            feature_names,
            feature_infos,
            parameters,
        })
    }
}

fn header_value<T: std::str::FromStr>(header: &HashMap<&str, &str>, key: &str) -> Result<T> {
    match header.get(key) {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid {} in model file: {}", key, value)),
        None => bail!("Model file doesn't specify {}", key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn stump(feature: usize, threshold: f64, left: f64, right: f64) -> Tree {
        let mut tree = Tree::new(2);
        tree.set_root(0.0, 10, 2.5);
        let outputs = crate::native::tree::SplitOutputs {
            left_value: left,
            right_value: right,
            left_count: 5,
            right_count: 5,
            left_weight: 1.25,
            right_weight: 1.25,
            gain: 3.0,
        };
        tree.split(0, feature, threshold, crate::native::bin::MissingType::None, false, outputs);
        tree
    }

    fn model() -> Model {
        let mut model = Model::new(
            2,
            vec!["a".to_string(), "b".to_string()],
            vec!["[0:1]".to_string(), "[0:1]".to_string()],
            "binary sigmoid:1".to_string(),
            false,
            "[objective: binary]\n".to_string(),
        );
        model.trees.push(stump(0, 0.5, -1.0, 1.0));
        model.trees.push(stump(1, 0.5, -0.5, 0.5));
        model
    }

    #[test]
    fn test_predict_types() {
        let model = model();
        assert_relative_eq!(model.predict_raw(&[1.0, 0.0], 0, -1)[0], 0.5);
        assert_relative_eq!(model.predict_raw(&[1.0, 0.0], 1, 1)[0], -0.5);
        assert_relative_eq!(model.predict(&[0.0, 0.0], 0, -1)[0], 1.0 / (1.0 + 1.5f64.exp()));
        assert_eq!(model.predict_leaf_index(&[1.0, 0.0], 0, -1), vec![1.0, 0.0]);

        let contrib = model.predict_contrib(&[1.0, 0.0], 0, -1);
        assert_eq!(contrib.len(), 3);
        assert_relative_eq!(contrib.iter().sum::<f64>(), 0.5, epsilon = 1e-12);
        assert!(contrib[0] > 0.0 && contrib[1] < 0.0);
    }

    #[test]
    fn test_text_round_trip() {
        let model = model();
        let text = model.save_to_string(0, -1, C_API_FEATURE_IMPORTANCE_GAIN);
        assert!(text.starts_with("tree\nversion=v4\nnum_class=1\n"));
        assert!(text.contains("feature_importances:\na=3\nb=3\n"));
        assert!(text.contains("parameters:\n[objective: binary]\nend of parameters"));

        let loaded = Model::load_from_string(&text).unwrap();
        assert_eq!(loaded.trees.len(), 2);
        assert_eq!(loaded.feature_names, model.feature_names);
        assert_eq!(loaded.save_to_string(0, -1, C_API_FEATURE_IMPORTANCE_GAIN), text);
        for row in [[0.0, 0.0], [1.0, 0.0], [0.2, 0.9]] {
            assert_eq!(loaded.predict(&row, 0, -1), model.predict(&row, 0, -1));
        }
    }

    #[test]
    fn test_save_iteration_window() {
        let text = model().save_to_string(1, 1, C_API_FEATURE_IMPORTANCE_SPLIT);
        let loaded = Model::load_from_string(&text).unwrap();
        assert_eq!(loaded.num_iterations(), 1);
        assert!(text.contains("Tree=0\n"));
        assert!(!text.contains("Tree=1\n"));
    }

    #[test]
    fn test_average_output() {
        let mut model = model();
        model.average_output = true;
        let text = model.save_to_string(0, -1, 0);
        assert!(text.contains("\naverage_output\n"));
        let loaded = Model::load_from_string(&text).unwrap();
        assert_relative_eq!(loaded.predict_raw(&[1.0, 1.0], 0, -1)[0], 0.75);
    }

    #[test]
    fn test_feature_importance() {
        let model = model();
        assert_eq!(model.feature_importance(-1, 0).unwrap(), vec![1.0, 1.0]);
        assert_eq!(model.feature_importance(1, 1).unwrap(), vec![3.0, 0.0]);
        assert!(model.feature_importance(-1, 7).is_err());
    }

    #[test]
    fn test_malformed_models_rejected() {
        assert!(Model::load_from_string("").is_err());
        assert!(Model::load_from_string("tree\nnum_class=1\nmax_feature_idx=1\n").is_err());
        let text = model().save_to_string(0, -1, 0);
        assert!(Model::load_from_string(&text.replace("max_feature_idx=1", "max_feature_idx=0")).is_err());
        assert!(Model::load_from_string(&text.replace("end of trees", "")).is_err());
    }

    #[test]
    fn test_multiclass_softmax() {
        let mut model = model();
        model.num_class = 2;
        model.num_tree_per_iteration = 2;
        model.objective = "multiclass num_class:2".to_string();
        model.transform = OutputTransform::from_objective_line(&model.objective);
        let p = model.predict(&[1.0, 1.0], 0, -1);
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(p[0] > p[1]);
    }
}
