//! Provider constants: file names, chunk sizes and user-facing messages.

/// Number of instances stored per chunk of the training buffers.
/// Each features chunk therefore holds `num_features * DEFAULT_TRAIN_DATA_CHUNK_INSTANCES_SIZE` values.
pub const DEFAULT_TRAIN_DATA_CHUNK_INSTANCES_SIZE: usize = 200_000;

/// Well-known model file name inside a model directory.
pub const MODEL_BINARY_RESOURCE_FILE_NAME: &str = "LightGBM_model.txt";

/// Schema file name written next to a saved model.
pub const MODEL_SCHEMA_FILE_NAME: &str = "schema.json";

/// Binary classification is one output class in the native engine.
pub const BINARY_LGBM_NUM_CLASSES: i32 = 1;

/// Parameters used for the scoring fast-config handles.
pub const LIGHTGBM_PREDICTION_PARAMETERS: &str = "num_threads=1";

/// Environment variable selecting the libc flavour of the native library.
pub const LIBC_ENV_VAR: &str = "FDZ_OPENML_JAVA_LIBC";

/// Prefix for referring to a column by name in parameter values.
pub const COL_NAME_PREFIX: &str = "name:";

/// Prefix of every fairness-constrained objective.
pub const CONSTRAINED_OBJECTIVE_PREFIX: &str = "constrained_";

/// Aliases under which the native engine accepts the objective.
pub const OBJECTIVE_ALIASES: [&str; 5] = ["objective", "objective_type", "app", "application", "loss"];

/// Objective used when none is given and no soft label is configured.
pub const DEFAULT_OBJECTIVE: &str = "binary";

/// Objective used when none is given and a soft label is configured.
pub const DEFAULT_SOFT_LABEL_OBJECTIVE: &str = "cross_entropy";

/// Error raised when a loaded model has more than one native class.
pub const ERROR_MSG_CANNOT_LOAD_NON_BINARY_LIGHTGBM_MODEL: &str =
    "Cannot load a non-binary LightGBM model.";

/// Error raised when the schema carries string fields.
pub const ERROR_MSG_SCHEMA_HAS_STRING_FIELDS: &str = "Schema has string fields.";

/// Error raised when the target is missing or not a two-valued categorical.
pub const ERROR_MSG_NON_BINARY_TARGET: &str = "Target field must be binary.";

/// Prefix of every missing-model-file error.
pub const ERROR_MSG_PREFIX_CANNOT_FIND_MODEL_FILE: &str = "Cannot find model file";

/// Error raised when the model's feature count differs from the schema.
pub const ERROR_MSG_SCHEMA_WITH_WRONG_PREDICTIVE_FIELDS_SIZE: &str =
    "Received schema with wrong number of predictive fields.";

/// Error raised when the model's feature names differ from the schema.
pub const ERROR_MSG_SCHEMA_WITH_WRONG_PREDICTIVE_FIELD_NAMES: &str =
    "Received schema with wrong predictive field names.";

/// Error raised for `boosting_type=rf` without bagging.
pub const ERROR_MSG_RANDOM_FOREST_REQUIRES_BAGGING: &str =
    "Random Forest Boosting type requires bagging. Please see bagging parameters.";

/// Error raised when the training dataset has no instances.
pub const ERROR_MSG_EMPTY_TRAIN_DATASET: &str = "Received empty train dataset";

/// Parameter names the provider reads itself.
pub mod param_names {
    /// Boosting type (`gbdt`, `rf`, `dart`, `goss`)
    pub const BOOSTING_TYPE: &str = "boosting_type";
    /// Number of boosting iterations
    pub const NUM_ITERATIONS: &str = "num_iterations";
    /// Bagging fraction
    pub const BAGGING_FRACTION: &str = "bagging_fraction";
    /// Bagging frequency
    pub const BAGGING_FREQUENCY: &str = "bagging_freq";
    /// Column used as soft label instead of the target
    pub const SOFT_LABEL: &str = "soft_label";
    /// Column holding the fairness constraint group
    pub const CONSTRAINT_GROUP_COLUMN: &str = "constraint_group_column";
    /// Categorical feature index list
    pub const CATEGORICAL_FEATURE: &str = "categorical_feature";
    /// Random seed
    pub const SEED: &str = "seed";
    /// Objective
    pub const OBJECTIVE: &str = "objective";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_validity() {
        assert!(DEFAULT_TRAIN_DATA_CHUNK_INSTANCES_SIZE > 0);
        assert_eq!(BINARY_LGBM_NUM_CLASSES, 1);
        assert!(OBJECTIVE_ALIASES.contains(&"application"));
        assert!(ERROR_MSG_PREFIX_CANNOT_FIND_MODEL_FILE.starts_with("Cannot"));
    }
}
