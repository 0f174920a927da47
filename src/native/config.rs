//! Engine parameters parsed from the `"key=value key=value"` string form.

use anyhow::{anyhow, bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Boosting variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostingType {
    /// Gradient boosted decision trees
    Gbdt,
    /// Random forest: bagged, unshrunk, averaged trees
    RandomForest,
    /// Dropouts meet multiple additive regression trees
    Dart,
    /// Gradient-based one-side sampling
    Goss,
}

impl BoostingType {
    /// Name written to model files.
    pub fn name(&self) -> &'static str {
        match self {
            BoostingType::Gbdt => "gbdt",
            BoostingType::RandomForest => "rf",
            BoostingType::Dart => "dart",
            BoostingType::Goss => "goss",
        }
    }
}

impl FromStr for BoostingType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gbdt" | "gbrt" => Ok(BoostingType::Gbdt),
            "rf" | "random_forest" => Ok(BoostingType::RandomForest),
            "dart" => Ok(BoostingType::Dart),
            "goss" => Ok(BoostingType::Goss),
            other => bail!("Unknown boosting type {}", other),
        }
    }
}

/// Which group-wise or global error rates a fairness constraint covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConstraintKinds {
    /// False positive rate
    pub fpr: bool,
    /// False negative rate
    pub fnr: bool,
}

impl FromStr for ConstraintKinds {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut kinds = ConstraintKinds::default();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.to_ascii_uppercase().as_str() {
                "FPR" => kinds.fpr = true,
                "FNR" => kinds.fnr = true,
                other => bail!("Unknown constraint type {}", other),
            }
        }
        Ok(kinds)
    }
}

/// Differentiable stand-in for the step function counting errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepwiseProxy {
    /// `log(1 + e^x)`
    CrossEntropy,
    /// `max(0, 1 + x)^2 / 2`
    Quadratic,
    /// `max(0, 1 + x)`
    Hinge,
}

impl FromStr for StepwiseProxy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cross_entropy" | "xentropy" => Ok(StepwiseProxy::CrossEntropy),
            "quadratic" => Ok(StepwiseProxy::Quadratic),
            "hinge" => Ok(StepwiseProxy::Hinge),
            other => bail!("Unknown stepwise proxy {}", other),
        }
    }
}

/// Every knob the engine reads.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Objective name as given
    pub objective: String,
    /// Boosting variant
    pub boosting: BoostingType,
    /// Boosting rounds
    pub num_iterations: usize,
    /// Shrinkage applied to each new tree
    pub learning_rate: f64,
    /// Maximum leaves per tree
    pub num_leaves: usize,
    /// Worker threads; resolved from `num_cpus` when not positive
    pub num_threads: usize,
    /// Master seed; derives the other seeds when set
    pub seed: Option<u64>,
    /// Depth limit, `<= 0` for none
    pub max_depth: i32,
    /// Minimum rows in a leaf
    pub min_data_in_leaf: usize,
    /// Minimum hessian sum in a leaf
    pub min_sum_hessian_in_leaf: f64,
    /// Row fraction drawn per bagging round
    pub bagging_fraction: f64,
    /// Re-bag every this many iterations, `0` disables
    pub bagging_freq: usize,
    /// Bagging seed
    pub bagging_seed: u64,
    /// Feature fraction per tree
    pub feature_fraction: f64,
    /// Feature fraction per node
    pub feature_fraction_bynode: f64,
    /// Feature sampling seed
    pub feature_fraction_seed: u64,
    /// L1 regularization
    pub lambda_l1: f64,
    /// L2 regularization
    pub lambda_l2: f64,
    /// Minimum gain to split
    pub min_gain_to_split: f64,
    /// DART drop rate
    pub drop_rate: f64,
    /// DART maximum dropped trees, `<= 0` for none
    pub max_drop: i32,
    /// DART probability of skipping the drop
    pub skip_drop: f64,
    /// DART with XGBoost normalization
    pub xgboost_dart_mode: bool,
    /// DART drops uniformly instead of by weight
    pub uniform_drop: bool,
    /// DART seed
    pub drop_seed: u64,
    /// GOSS large-gradient retain rate
    pub top_rate: f64,
    /// GOSS small-gradient sample rate
    pub other_rate: f64,
    /// Minimum rows per categorical group
    pub min_data_per_group: usize,
    /// Maximum categories on one side of a split
    pub max_cat_threshold: usize,
    /// L2 regularization of categorical splits
    pub cat_l2: f64,
    /// Smoothing of categorical gradient ratios
    pub cat_smooth: f64,
    /// One-vs-rest below this many categories
    pub max_cat_to_onehot: usize,
    /// Engine verbosity
    pub verbosity: i32,
    /// Maximum bins per feature
    pub max_bin: usize,
    /// Minimum rows per bin
    pub min_data_in_bin: usize,
    /// Rows sampled to build bin mappers
    pub bin_construct_sample_cnt: usize,
    /// Bin sampling seed
    pub data_random_seed: u64,
    /// Route NaN through a learned default direction
    pub use_missing: bool,
    /// Treat zeros as missing
    pub zero_as_missing: bool,
    /// Categorical feature indices
    pub categorical_features: Vec<usize>,
    /// Reweight classes by their frequency
    pub is_unbalance: bool,
    /// Positive class weight
    pub scale_pos_weight: f64,
    /// Sigmoid slope of the binary objective
    pub sigmoid: f64,
    /// Start from the label average
    pub boost_from_average: bool,
    /// Group-wise constraints of the constrained objective
    pub constraint_type: ConstraintKinds,
    /// Allowed group FPR excess
    pub constraint_fpr_threshold: f64,
    /// Allowed group FNR excess
    pub constraint_fnr_threshold: f64,
    /// Global constraints of the constrained objective
    pub global_constraint_type: ConstraintKinds,
    /// Global FPR target
    pub global_target_fpr: f64,
    /// Global FNR target
    pub global_target_fnr: f64,
    /// Lagrange multiplier step size
    pub multiplier_learning_rate: f64,
    /// Initial Lagrange multipliers, empty for zeros
    pub init_multipliers: Vec<f64>,
    /// Proxy loss for the step-wise constraint terms
    pub constraint_stepwise_proxy: StepwiseProxy,
    /// Decision threshold for constraint rates
    pub score_threshold: f64,
    /// Parameters as given, canonical names, for the model file
    pub raw: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            objective: "binary".to_string(),
            boosting: BoostingType::Gbdt,
            num_iterations: 100,
            learning_rate: 0.1,
            num_leaves: 31,
            num_threads: 0,
            seed: None,
            max_depth: -1,
            min_data_in_leaf: 20,
            min_sum_hessian_in_leaf: 1e-3,
            bagging_fraction: 1.0,
            bagging_freq: 0,
            bagging_seed: 3,
            feature_fraction: 1.0,
            feature_fraction_bynode: 1.0,
            feature_fraction_seed: 2,
            lambda_l1: 0.0,
            lambda_l2: 0.0,
            min_gain_to_split: 0.0,
            drop_rate: 0.1,
            max_drop: 50,
            skip_drop: 0.5,
            xgboost_dart_mode: false,
            uniform_drop: false,
            drop_seed: 4,
            top_rate: 0.2,
            other_rate: 0.1,
            min_data_per_group: 100,
            max_cat_threshold: 32,
            cat_l2: 10.0,
            cat_smooth: 10.0,
            max_cat_to_onehot: 4,
            verbosity: 1,
            max_bin: 255,
            min_data_in_bin: 3,
            bin_construct_sample_cnt: 200_000,
            data_random_seed: 1,
            use_missing: true,
            zero_as_missing: false,
            categorical_features: Vec::new(),
            is_unbalance: false,
            scale_pos_weight: 1.0,
            sigmoid: 1.0,
            boost_from_average: true,
            constraint_type: ConstraintKinds {
                fpr: true,
                fnr: false,
            },
            constraint_fpr_threshold: 0.0,
            constraint_fnr_threshold: 0.0,
            global_constraint_type: ConstraintKinds::default(),
            global_target_fpr: 1.0,
            global_target_fnr: 1.0,
            multiplier_learning_rate: 0.1,
            init_multipliers: Vec::new(),
            constraint_stepwise_proxy: StepwiseProxy::CrossEntropy,
            score_threshold: 0.5,
            raw: BTreeMap::new(),
        }
    }
}

/// Map an alias to its canonical parameter name.
fn canonical_name(key: &str) -> &str {
    match key {
        "objective_type" | "app" | "application" | "loss" => "objective",
        "boosting_type" | "boost" => "boosting",
        "num_iteration" | "n_iter" | "num_tree" | "num_trees" | "num_round" | "num_rounds"
        | "nrounds" | "num_boost_round" | "n_estimators" | "max_iter" => "num_iterations",
        "shrinkage_rate" | "eta" => "learning_rate",
        "num_leaf" | "max_leaves" | "max_leaf" | "max_leaf_nodes" => "num_leaves",
        "num_thread" | "nthread" | "nthreads" | "n_jobs" => "num_threads",
        "random_seed" | "random_state" => "seed",
        "min_data_per_leaf" | "min_data" | "min_child_samples" | "min_samples_leaf" => {
            "min_data_in_leaf"
        }
        "min_sum_hessian_per_leaf" | "min_sum_hessian" | "min_hessian" | "min_child_weight" => {
            "min_sum_hessian_in_leaf"
        }
        "sub_row" | "subsample" | "bagging" => "bagging_fraction",
        "subsample_freq" => "bagging_freq",
        "bagging_fraction_seed" => "bagging_seed",
        "sub_feature" | "colsample_bytree" => "feature_fraction",
        "sub_feature_bynode" | "colsample_bynode" => "feature_fraction_bynode",
        "reg_alpha" | "l1_regularization" => "lambda_l1",
        "reg_lambda" | "lambda" | "l2_regularization" => "lambda_l2",
        "min_split_gain" => "min_gain_to_split",
        "rate_drop" => "drop_rate",
        "verbose" => "verbosity",
        "subsample_for_bin" => "bin_construct_sample_cnt",
        "data_seed" => "data_random_seed",
        "is_enable_bundle" | "bundle" => "enable_bundle",
        "unbalance" | "unbalanced_sets" => "is_unbalance",
        "cat_feature" | "categorical_column" | "cat_column" | "categorical_features" => {
            "categorical_feature"
        }
        "constraint_fpr_tolerance" | "constraint_fpr_slack" => "constraint_fpr_threshold",
        "constraint_fnr_tolerance" | "constraint_fnr_slack" => "constraint_fnr_threshold",
        "lagrangian_learning_rate" | "lagrangian_multiplier_learning_rate" => {
            "multiplier_learning_rate"
        }
        "lagrangian_multipliers" | "init_lagrangian_multipliers" => "init_multipliers",
        other => other,
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| anyhow!("Parameter {} should be of type {}, got \"{}\": {}", key, std::any::type_name::<T>(), value, e))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "+" => Ok(true),
        "false" | "0" | "-" => Ok(false),
        _ => bail!("Parameter {} should be of type bool, got \"{}\"", key, value),
    }
}

fn parse_list<T>(key: &str, value: &str) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse_value(key, item))
        .collect()
}

/// Split a parameter string into canonical `key -> value` pairs.
///
/// Tokens are separated by whitespace; empty values are dropped. Later
/// occurrences of a key win, except that a canonical name beats an alias.
pub fn parse_param_string(params: &str) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    let mut canonical_seen = BTreeMap::new();
    for token in params.split_whitespace() {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| anyhow!("Unknown token {} in parameter string", token))?;
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            bail!("Empty parameter name in token {}", token);
        }
        if value.is_empty() {
            continue;
        }
        let canonical = canonical_name(key);
        let is_canonical = canonical == key;
        if !is_canonical && canonical_seen.get(canonical).copied().unwrap_or(false) {
            continue;
        }
        canonical_seen.insert(canonical.to_string(), is_canonical);
        map.insert(canonical.to_string(), value.to_string());
    }
    Ok(map)
}

impl EngineConfig {
    /// Parse a LightGBM-style parameter string.
    pub fn from_param_string(params: &str) -> Result<Self> {
        let raw = parse_param_string(params)?;
        let mut config = EngineConfig::default();

        for (key, value) in &raw {
            let key = key.as_str();
            let value = value.as_str();
            match key {
                "objective" => config.objective = value.to_string(),
                "boosting" => config.boosting = value.parse()?,
                "num_iterations" => config.num_iterations = parse_value(key, value)?,
                "learning_rate" => config.learning_rate = parse_value(key, value)?,
                "num_leaves" => config.num_leaves = parse_value(key, value)?,
                "num_threads" => {
                    let threads: i64 = parse_value(key, value)?;
                    config.num_threads = threads.max(0) as usize;
                }
                "seed" => config.seed = Some(parse_value(key, value)?),
                "max_depth" => config.max_depth = parse_value(key, value)?,
                "min_data_in_leaf" => config.min_data_in_leaf = parse_value(key, value)?,
                "min_sum_hessian_in_leaf" => {
                    config.min_sum_hessian_in_leaf = parse_value(key, value)?
                }
                "bagging_fraction" => config.bagging_fraction = parse_value(key, value)?,
                "bagging_freq" => config.bagging_freq = parse_value(key, value)?,
                "bagging_seed" => config.bagging_seed = parse_value(key, value)?,
                "feature_fraction" => config.feature_fraction = parse_value(key, value)?,
                "feature_fraction_bynode" => {
                    config.feature_fraction_bynode = parse_value(key, value)?
                }
                "feature_fraction_seed" => config.feature_fraction_seed = parse_value(key, value)?,
                "lambda_l1" => config.lambda_l1 = parse_value(key, value)?,
                "lambda_l2" => config.lambda_l2 = parse_value(key, value)?,
                "min_gain_to_split" => config.min_gain_to_split = parse_value(key, value)?,
                "drop_rate" => config.drop_rate = parse_value(key, value)?,
                "max_drop" => config.max_drop = parse_value(key, value)?,
                "skip_drop" => config.skip_drop = parse_value(key, value)?,
                "xgboost_dart_mode" => config.xgboost_dart_mode = parse_bool(key, value)?,
                "uniform_drop" => config.uniform_drop = parse_bool(key, value)?,
                "drop_seed" => config.drop_seed = parse_value(key, value)?,
                "top_rate" => config.top_rate = parse_value(key, value)?,
                "other_rate" => config.other_rate = parse_value(key, value)?,
                "min_data_per_group" => config.min_data_per_group = parse_value(key, value)?,
                "max_cat_threshold" => config.max_cat_threshold = parse_value(key, value)?,
                "cat_l2" => config.cat_l2 = parse_value(key, value)?,
                "cat_smooth" => config.cat_smooth = parse_value(key, value)?,
                "max_cat_to_onehot" => config.max_cat_to_onehot = parse_value(key, value)?,
                "verbosity" => config.verbosity = parse_value(key, value)?,
                "max_bin" => config.max_bin = parse_value(key, value)?,
                "min_data_in_bin" => config.min_data_in_bin = parse_value(key, value)?,
                "bin_construct_sample_cnt" => {
                    config.bin_construct_sample_cnt = parse_value(key, value)?
                }
                "data_random_seed" => config.data_random_seed = parse_value(key, value)?,
                "use_missing" => config.use_missing = parse_bool(key, value)?,
                "zero_as_missing" => config.zero_as_missing = parse_bool(key, value)?,
                "enable_bundle" => {
                    parse_bool(key, value)?;
                }
                "categorical_feature" => {
                    config.categorical_features = parse_list(key, value)
                        .context("categorical_feature must be a list of column indices")?
                }
                "is_unbalance" => config.is_unbalance = parse_bool(key, value)?,
                "scale_pos_weight" => config.scale_pos_weight = parse_value(key, value)?,
                "sigmoid" => config.sigmoid = parse_value(key, value)?,
                "boost_from_average" => config.boost_from_average = parse_bool(key, value)?,
                "constraint_type" => config.constraint_type = value.parse()?,
                "constraint_fpr_threshold" => {
                    config.constraint_fpr_threshold = parse_value(key, value)?
                }
                "constraint_fnr_threshold" => {
                    config.constraint_fnr_threshold = parse_value(key, value)?
                }
                "global_constraint_type" => config.global_constraint_type = value.parse()?,
                "global_target_fpr" => config.global_target_fpr = parse_value(key, value)?,
                "global_target_fnr" => config.global_target_fnr = parse_value(key, value)?,
                "multiplier_learning_rate" => {
                    config.multiplier_learning_rate = parse_value(key, value)?
                }
                "init_multipliers" => config.init_multipliers = parse_list(key, value)?,
                "constraint_stepwise_proxy" => {
                    config.constraint_stepwise_proxy = value.parse()?
                }
                "score_threshold" => config.score_threshold = parse_value(key, value)?,
                // Read by the column mapper and the recall objective only.
                "constraint_group_column" | "objective_stepwise_proxy" | "predict_disable_shape_check" => {}
                other => log::warn!("Unknown parameter: {}", other),
            }
        }

        if let Some(seed) = config.seed {
            config.derive_seeds(seed, &raw);
        }
        config.raw = raw;
        config.check()?;
        Ok(config)
    }

    /// Derive every component seed from the master `seed`, unless set
    /// explicitly.
    fn derive_seeds(&mut self, seed: u64, raw: &BTreeMap<String, String>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut next = |current: u64, key: &str| {
            let drawn = rng.gen_range(0..i16::MAX as u64);
            if raw.contains_key(key) {
                current
            } else {
                drawn
            }
        };
        self.data_random_seed = next(self.data_random_seed, "data_random_seed");
        self.bagging_seed = next(self.bagging_seed, "bagging_seed");
        self.drop_seed = next(self.drop_seed, "drop_seed");
        self.feature_fraction_seed = next(self.feature_fraction_seed, "feature_fraction_seed");
    }

    /// Reject inconsistent settings.
    fn check(&self) -> Result<()> {
        if self.num_leaves < 2 {
            bail!("num_leaves should be greater than 1, got {}", self.num_leaves);
        }
        if !(self.learning_rate > 0.0) {
            bail!("learning_rate should be positive, got {}", self.learning_rate);
        }
        if self.max_bin < 2 {
            bail!("max_bin should be at least 2, got {}", self.max_bin);
        }
        if !(self.bagging_fraction > 0.0 && self.bagging_fraction <= 1.0) {
            bail!("bagging_fraction should be in (0, 1], got {}", self.bagging_fraction);
        }
        if !(self.feature_fraction > 0.0 && self.feature_fraction <= 1.0) {
            bail!("feature_fraction should be in (0, 1], got {}", self.feature_fraction);
        }
        if self.boosting == BoostingType::Goss && self.top_rate + self.other_rate > 1.0 {
            bail!("Cannot use GOSS with top_rate + other_rate > 1");
        }
        if self.boosting == BoostingType::RandomForest && !self.rf_sampling_enabled() {
            bail!("Check failed: RF mode requires bagging (bagging_freq > 0 and 0 < bagging_fraction < 1) or feature_fraction < 1");
        }
        Ok(())
    }

    /// Whether row bagging is active.
    pub fn bagging_enabled(&self) -> bool {
        self.bagging_freq > 0 && self.bagging_fraction < 1.0
    }

    fn rf_sampling_enabled(&self) -> bool {
        self.bagging_enabled() || self.feature_fraction < 1.0
    }

    /// Number of worker threads, resolving `0` to the machine's CPU count.
    pub fn effective_num_threads(&self) -> usize {
        if self.num_threads == 0 {
            num_cpus::get()
        } else {
            self.num_threads
        }
    }

    /// Whether the objective carries fairness constraints.
    pub fn is_constrained(&self) -> bool {
        self.objective.starts_with("constrained_")
    }

    /// The parameter block written at the end of a model file.
    pub fn to_parameter_block(&self) -> String {
        let mut block = String::new();
        for (key, value) in &self.raw {
            block.push_str(&format!("[{}: {}]\n", key, value));
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_param_string("").unwrap();
        assert_eq!(config.objective, "binary");
        assert_eq!(config.boosting, BoostingType::Gbdt);
        assert_eq!(config.num_leaves, 31);
    }

    #[test]
    fn test_aliases_and_empty_values() {
        let config = EngineConfig::from_param_string(
            "application=cross_entropy boosting_type=dart n_estimators=7 soft_label= categorical_feature=1,3",
        )
        .unwrap();
        assert_eq!(config.objective, "cross_entropy");
        assert_eq!(config.boosting, BoostingType::Dart);
        assert_eq!(config.num_iterations, 7);
        assert_eq!(config.categorical_features, vec![1, 3]);
    }

    #[test]
    fn test_canonical_name_wins() {
        let map = parse_param_string("objective=binary loss=cross_entropy").unwrap();
        assert_eq!(map["objective"], "binary");
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(EngineConfig::from_param_string("num_leaves=abc").is_err());
        assert!(EngineConfig::from_param_string("num_leaves=1").is_err());
        assert!(EngineConfig::from_param_string("boosting=xgb").is_err());
        assert!(EngineConfig::from_param_string("garbage").is_err());
    }

    #[test]
    fn test_rf_requires_sampling() {
        assert!(EngineConfig::from_param_string("boosting=rf").is_err());
        assert!(EngineConfig::from_param_string("boosting=rf bagging_freq=1 bagging_fraction=0.5").is_ok());
    }

    #[test]
    fn test_seed_derivation_is_deterministic() {
        let a = EngineConfig::from_param_string("seed=42").unwrap();
        let b = EngineConfig::from_param_string("seed=42").unwrap();
        assert_eq!(a.bagging_seed, b.bagging_seed);
        let explicit = EngineConfig::from_param_string("seed=42 bagging_seed=9").unwrap();
        assert_eq!(explicit.bagging_seed, 9);
    }

    #[test]
    fn test_constraint_kinds() {
        let kinds: ConstraintKinds = "FPR,FNR".parse().unwrap();
        assert!(kinds.fpr && kinds.fnr);
        assert!("TPR".parse::<ConstraintKinds>().is_err());
    }
}
