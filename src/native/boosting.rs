//! Boosting drivers: GBDT, random forest, GOSS and DART.

use crate::native::config::{BoostingType, EngineConfig};
use crate::native::dataset::{DatasetCore, EngineDataset};
use crate::native::learner::SerialTreeLearner;
use crate::native::model::Model;
use crate::native::objective::{create_objective, ObjectiveFunction};
use crate::native::tree::Tree;
use crate::native::EPSILON;
use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::sync::Arc;

/// Booster behind a `BoosterHandle`: a model plus, when created from a
/// dataset, the state needed to keep training it.
pub struct Booster {
    model: Arc<Model>,
    training: Option<TrainingState>,
}

impl std::fmt::Debug for Booster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Booster")
            .field("num_trees", &self.model.trees.len())
            .field("training", &self.training.is_some())
            .finish()
    }
}

impl Booster {
    /// Prepare training on `data` with a LightGBM parameter string.
    pub fn new(data: &EngineDataset, params: &str) -> Result<Self> {
        let config = EngineConfig::from_param_string(params)?;
        let core = data.core();
        let objective = create_objective(&config, &core)?;
        let model = Model::new(
            core.num_features,
            core.feature_names.clone(),
            core.feature_infos(),
            objective.to_model_string(),
            config.boosting == BoostingType::RandomForest,
            config.to_parameter_block(),
        );
        let training = TrainingState::new(config, core, objective)?;
        Ok(Booster {
            model: Arc::new(model),
            training: Some(training),
        })
    }

    /// Booster for prediction only, from model text.
    pub fn from_model_string(model_str: &str) -> Result<Self> {
        let model = Model::load_from_string(model_str)?;
        Ok(Booster {
            model: Arc::new(model),
            training: None,
        })
    }

    /// Grow one more iteration; `true` means training cannot continue.
    pub fn update_one_iter(&mut self) -> Result<bool> {
        let state = self
            .training
            .as_mut()
            .ok_or_else(|| anyhow!("Cannot update a booster that was loaded from a model"))?;
        let model = Arc::make_mut(&mut self.model);
        let pool = Arc::clone(&state.pool);
        pool.install(|| state.train_one_iter(model))
    }

    /// Iterations trained so far, or stored in the loaded model.
    pub fn current_iteration(&self) -> usize {
        match &self.training {
            Some(state) => state.iter,
            None => self.model.num_iterations(),
        }
    }

    /// Snapshot of the model for prediction and saving.
    pub fn model(&self) -> Arc<Model> {
        Arc::clone(&self.model)
    }
}

struct TrainingState {
    config: EngineConfig,
    data: Arc<DatasetCore>,
    objective: Box<dyn ObjectiveFunction>,
    learner: SerialTreeLearner,
    pool: Arc<rayon::ThreadPool>,
    scores: Vec<f64>,
    gradients: Vec<f64>,
    hessians: Vec<f64>,
    bag: Option<Vec<usize>>,
    bagging_rng: StdRng,
    drop_rng: StdRng,
    iter: usize,
    init_score: f64,
    shrinkage_rate: f64,
    tree_weights: Vec<f64>,
    sum_weight: f64,
    drop_index: Vec<usize>,
}

impl TrainingState {
    fn new(config: EngineConfig, data: Arc<DatasetCore>, objective: Box<dyn ObjectiveFunction>) -> Result<Self> {
        let num_threads = config.effective_num_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| anyhow!("Cannot create a pool of {} threads: {}", num_threads, e))?;
        log::info!(
            "Training {} booster with objective {} on {} rows, {} features, {} threads",
            config.boosting.name(),
            objective.name(),
            data.num_data,
            data.num_features,
            num_threads
        );

        let num_data = data.num_data;
        let shrinkage_rate = match config.boosting {
            BoostingType::RandomForest => 1.0,
            _ => config.learning_rate,
        };
        Ok(TrainingState {
            learner: SerialTreeLearner::new(&config, Arc::clone(&data)),
            bagging_rng: StdRng::seed_from_u64(config.bagging_seed),
            drop_rng: StdRng::seed_from_u64(config.drop_seed),
            config,
            data,
            objective,
            pool: Arc::new(pool),
            scores: vec![0.0; num_data],
            gradients: vec![0.0; num_data],
            hessians: vec![0.0; num_data],
            bag: None,
            iter: 0,
            init_score: 0.0,
            shrinkage_rate,
            tree_weights: Vec::new(),
            sum_weight: 0.0,
            drop_index: Vec::new(),
        })
    }

    fn train_one_iter(&mut self, model: &mut Model) -> Result<bool> {
        match self.config.boosting {
            BoostingType::RandomForest => Ok(self.train_rf_iter(model)),
            _ => Ok(self.train_gbdt_iter(model)),
        }
    }

    fn train_gbdt_iter(&mut self, model: &mut Model) -> bool {
        let mut init_score = 0.0;
        if model.trees.is_empty() && self.config.boost_from_average {
            init_score = self.objective.boost_from_score();
            if init_score.abs() > EPSILON {
                self.scores.iter_mut().for_each(|s| *s += init_score);
            }
        }
        if self.config.boosting == BoostingType::Dart {
            self.drop_trees(model);
        }

        self.objective
            .get_gradients(&self.scores, &mut self.gradients, &mut self.hessians);
        let bag = self.sample_rows();
        let mut tree = self.learner.train(&self.gradients, &self.hessians, bag.as_deref());

        if tree.num_leaves() > 1 {
            tree.apply_shrinkage(self.shrinkage_rate);
            add_tree_scores(&tree, &self.data, &mut self.scores);
            if init_score.abs() > EPSILON {
                tree.add_bias(init_score);
            }
            model.trees.push(tree);
            if self.config.boosting == BoostingType::Dart {
                self.normalize(model);
                if !self.config.uniform_drop {
                    self.tree_weights.push(self.shrinkage_rate);
                    self.sum_weight += self.shrinkage_rate;
                }
            }
            self.iter += 1;
            log::debug!("Finished iteration {} with {} leaves", self.iter, model.trees[model.trees.len() - 1].num_leaves());
            return false;
        }

        if self.config.boosting == BoostingType::Dart {
            self.restore_dropped(model);
        }
        if model.trees.is_empty() {
            let output = self.objective.boost_from_score();
            tree.as_constant_tree(output);
            model.trees.push(tree);
        }
        log::warn!("Stopped training because there are no more leaves that meet the split requirements");
        true
    }

    fn train_rf_iter(&mut self, model: &mut Model) -> bool {
        if self.iter == 0 && model.trees.is_empty() {
            if self.config.boost_from_average {
                self.init_score = self.objective.boost_from_score();
            }
            // Every forest tree fits the gradients at the initial score.
            let init_scores = vec![self.init_score; self.data.num_data];
            self.objective
                .get_gradients(&init_scores, &mut self.gradients, &mut self.hessians);
        }

        let bag = self.sample_rows();
        let mut tree = self.learner.train(&self.gradients, &self.hessians, bag.as_deref());
        if tree.num_leaves() > 1 {
            if self.init_score.abs() > EPSILON {
                tree.add_bias(self.init_score);
            }
            model.trees.push(tree);
            self.iter += 1;
            return false;
        }
        if model.trees.is_empty() {
            tree.as_constant_tree(self.init_score);
            model.trees.push(tree);
        }
        log::warn!("Stopped training because there are no more leaves that meet the split requirements");
        true
    }

    /// Rows used for the next tree, `None` meaning all rows.
    fn sample_rows(&mut self) -> Option<Vec<usize>> {
        if self.config.boosting == BoostingType::Goss {
            return self.goss_sample();
        }
        if !self.config.bagging_enabled() {
            return None;
        }
        if self.bag.is_none() || self.iter % self.config.bagging_freq == 0 {
            let num_data = self.data.num_data;
            let bag_count = ((num_data as f64 * self.config.bagging_fraction) as usize).max(1);
            let mut bag = sample(&mut self.bagging_rng, num_data, bag_count).into_vec();
            bag.sort_unstable();
            log::debug!("Re-bagging, using {} data to train", bag_count);
            self.bag = Some(bag);
        }
        self.bag.clone()
    }

    /// Keep the rows with the largest `|g * h|` and a random share of the
    /// rest, whose gradients are scaled up to stay unbiased.
    fn goss_sample(&mut self) -> Option<Vec<usize>> {
        if (self.iter as f64) < (1.0 / self.config.learning_rate).floor() {
            return None;
        }
        let num_data = self.data.num_data;
        let top_k = ((num_data as f64 * self.config.top_rate) as usize).max(1);
        let other_k = ((num_data as f64 * self.config.other_rate) as usize).max(1);
        if top_k + other_k >= num_data {
            return None;
        }

        let importance: Vec<f64> = self
            .gradients
            .iter()
            .zip(&self.hessians)
            .map(|(g, h)| (g * h).abs())
            .collect();
        let mut order: Vec<usize> = (0..num_data).collect();
        order.select_nth_unstable_by(top_k - 1, |&a, &b| importance[b].total_cmp(&importance[a]));
        let (top, rest) = order.split_at(top_k);

        let multiply = (num_data - top_k) as f64 / other_k as f64;
        let mut bag: Vec<usize> = top.to_vec();
        for index in sample(&mut self.bagging_rng, rest.len(), other_k) {
            let row = rest[index];
            self.gradients[row] *= multiply;
            self.hessians[row] *= multiply;
            bag.push(row);
        }
        bag.sort_unstable();
        Some(bag)
    }

    fn drop_trees(&mut self, model: &mut Model) {
        self.drop_index.clear();
        let is_skip = self.drop_rng.gen::<f64>() < self.config.skip_drop;
        if !is_skip && self.iter > 0 {
            let max_drop = self.config.max_drop;
            let mut drop_rate = self.config.drop_rate;
            if !self.config.uniform_drop {
                let inv_average_weight = self.tree_weights.len() as f64 / self.sum_weight;
                if max_drop > 0 {
                    drop_rate = drop_rate.min(max_drop as f64 * inv_average_weight / self.sum_weight);
                }
                for i in 0..self.iter {
                    if self.drop_rng.gen::<f64>() < drop_rate * self.tree_weights[i] * inv_average_weight {
                        self.drop_index.push(i);
                        if max_drop > 0 && self.drop_index.len() >= max_drop as usize {
                            break;
                        }
                    }
                }
            } else {
                if max_drop > 0 {
                    drop_rate = drop_rate.min(max_drop as f64 / self.iter as f64);
                }
                for i in 0..self.iter {
                    if self.drop_rng.gen::<f64>() < drop_rate {
                        self.drop_index.push(i);
                        if max_drop > 0 && self.drop_index.len() >= max_drop as usize {
                            break;
                        }
                    }
                }
            }
        }

        for &i in &self.drop_index {
            let tree = &mut model.trees[i];
            tree.apply_shrinkage(-1.0);
            add_tree_scores(tree, &self.data, &mut self.scores);
        }

        let k = self.drop_index.len() as f64;
        let lr = self.config.learning_rate;
        self.shrinkage_rate = if !self.config.xgboost_dart_mode {
            lr / (1.0 + k)
        } else if self.drop_index.is_empty() {
            lr
        } else {
            lr / (lr + k)
        };
        if !self.drop_index.is_empty() {
            log::debug!("Dropped {} trees", self.drop_index.len());
        }
    }

    /// Rescale the dropped trees so the new tree and the dropped ones share
    /// their former weight.
    fn normalize(&mut self, model: &mut Model) {
        let k = self.drop_index.len() as f64;
        let lr = self.config.learning_rate;
        for &i in &self.drop_index {
            let tree = &mut model.trees[i];
            // The tree is currently negated.
            if !self.config.xgboost_dart_mode {
                tree.apply_shrinkage(-k / (k + 1.0));
            } else {
                tree.apply_shrinkage(-k / (lr + k));
            }
            add_tree_scores(tree, &self.data, &mut self.scores);
            if !self.config.uniform_drop {
                let denominator = if self.config.xgboost_dart_mode { k + lr } else { k + 1.0 };
                self.sum_weight -= self.tree_weights[i] / denominator;
                self.tree_weights[i] *= k / denominator;
            }
        }
    }

    fn restore_dropped(&mut self, model: &mut Model) {
        for &i in &self.drop_index {
            let tree = &mut model.trees[i];
            tree.apply_shrinkage(-1.0);
            add_tree_scores(tree, &self.data, &mut self.scores);
        }
        self.drop_index.clear();
    }
}

/// Add a tree's output for every training row to `scores`.
fn add_tree_scores(tree: &Tree, data: &DatasetCore, scores: &mut [f64]) {
    scores.par_iter_mut().enumerate().for_each(|(row, score)| {
        let values = data.raw.row(row);
        *score += match values.as_slice() {
            Some(values) => tree.predict(values),
            None => tree.predict(&values.to_vec()),
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::dataset::FieldData;
    use ndarray::Array2;

    fn separable(n: usize) -> EngineDataset {
        let raw = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 } else { (i * 7 % 11) as f64 });
        let config = EngineConfig::from_param_string("min_data_in_bin=1").unwrap();
        let mut dataset = EngineDataset::from_matrix(raw, &config, None).unwrap();
        let labels = (0..n).map(|i| if i >= n / 2 { 1.0 } else { 0.0 }).collect();
        dataset.set_field("label", FieldData::Float32(labels)).unwrap();
        dataset
    }

    fn train(dataset: &EngineDataset, params: &str, iterations: usize) -> Booster {
        let mut booster = Booster::new(dataset, params).unwrap();
        for _ in 0..iterations {
            if booster.update_one_iter().unwrap() {
                break;
            }
        }
        booster
    }

    fn probability(booster: &Booster, row: &[f64]) -> f64 {
        booster.model().predict(row, 0, -1)[0]
    }

    #[test]
    fn test_gbdt_separates_classes() {
        let dataset = separable(200);
        let booster = train(&dataset, "objective=binary num_threads=2 min_data_in_leaf=5", 20);
        assert_eq!(booster.current_iteration(), 20);
        assert!(probability(&booster, &[10.0, 0.0]) < 0.2);
        assert!(probability(&booster, &[190.0, 0.0]) > 0.8);
    }

    #[test]
    fn test_first_iteration_without_split_keeps_constant_tree() {
        let dataset = separable(10);
        let mut booster = Booster::new(&dataset, "objective=binary min_data_in_leaf=20").unwrap();
        assert!(booster.update_one_iter().unwrap());
        assert_eq!(booster.current_iteration(), 0);
        assert_eq!(booster.model().trees.len(), 1);
        assert!((probability(&booster, &[1.0, 1.0]) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_other_boosting_types_train() {
        let dataset = separable(200);
        for params in [
            "boosting=goss learning_rate=0.5 min_data_in_leaf=5",
            "boosting=dart drop_seed=7 min_data_in_leaf=5 skip_drop=0",
            "boosting=dart xgboost_dart_mode=true uniform_drop=true min_data_in_leaf=5",
            "boosting=rf bagging_freq=1 bagging_fraction=0.7 min_data_in_leaf=5",
            "bagging_freq=2 bagging_fraction=0.5 feature_fraction=0.5 min_data_in_leaf=5",
        ] {
            let booster = train(&dataset, params, 10);
            assert!(booster.current_iteration() > 0, "{}", params);
            assert!(probability(&booster, &[10.0, 0.0]) < probability(&booster, &[190.0, 0.0]), "{}", params);
        }
    }

    #[test]
    fn test_rf_averages_trees() {
        let dataset = separable(200);
        let booster = train(&dataset, "boosting=rf bagging_freq=1 bagging_fraction=0.5 min_data_in_leaf=5", 5);
        let model = booster.model();
        assert!(model.average_output);
        let p = probability(&booster, &[190.0, 0.0]);
        assert!(p > 0.5 && p < 1.0);
    }

    #[test]
    fn test_training_is_deterministic() {
        let dataset = separable(200);
        let params = "bagging_freq=1 bagging_fraction=0.5 feature_fraction=0.5 seed=3 min_data_in_leaf=5";
        let a = train(&dataset, params, 5).model().save_to_string(0, -1, 0);
        let b = train(&dataset, params, 5).model().save_to_string(0, -1, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_loaded_booster_cannot_train() {
        let dataset = separable(100);
        let text = train(&dataset, "min_data_in_leaf=5", 3).model().save_to_string(0, -1, 0);
        let mut loaded = Booster::from_model_string(&text).unwrap();
        assert_eq!(loaded.current_iteration(), 3);
        assert!(loaded.update_one_iter().is_err());
    }

    #[test]
    fn test_unknown_objective_rejected() {
        let dataset = separable(20);
        assert!(Booster::new(&dataset, "objective=lambdarank").is_err());
    }
}
