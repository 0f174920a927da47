//! Entry point of the provider: training, loading and the checks guarding both.

use super::model::BinaryClassificationModel;
use crate::config::{check_params, Params, ParamValidationError};
use crate::core::constants::{
    param_names, ERROR_MSG_CANNOT_LOAD_NON_BINARY_LIGHTGBM_MODEL, ERROR_MSG_NON_BINARY_TARGET,
    ERROR_MSG_PREFIX_CANNOT_FIND_MODEL_FILE, ERROR_MSG_RANDOM_FOREST_REQUIRES_BAGGING,
    ERROR_MSG_SCHEMA_HAS_STRING_FIELDS, ERROR_MSG_SCHEMA_WITH_WRONG_PREDICTIVE_FIELDS_SIZE,
    ERROR_MSG_SCHEMA_WITH_WRONG_PREDICTIVE_FIELD_NAMES, MODEL_BINARY_RESOURCE_FILE_NAME,
    MODEL_SCHEMA_FILE_NAME,
};
use crate::core::error::{ProviderError, Result};
use crate::core::{init_logging, normalize_feature_name};
use crate::infrastructure::{load_native_library, Infrastructure};
use crate::schema::{Dataset, DatasetSchema, ValueSchema};
use crate::train;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TEMP_MODEL_FILE_PREFIX: &str = "pulse_lightgbm_model_";

/// Trains LightGBM binary classifiers and loads persisted ones.
#[derive(Debug, Clone)]
pub struct ModelCreator {
    infrastructure: Infrastructure,
}

impl ModelCreator {
    /// Initialize logging and the native engine. Both happen once per process.
    pub fn new() -> Result<Self> {
        init_logging();
        let infrastructure = load_native_library()?;
        Ok(ModelCreator { infrastructure })
    }

    /// Host the native engine was resolved for.
    pub fn infrastructure(&self) -> &Infrastructure {
        &self.infrastructure
    }

    /// Train a model on `dataset` and load it back for scoring.
    ///
    /// `seed` is used unless `params` already sets one. The intermediate
    /// model file is removed afterwards.
    pub fn fit(&self, dataset: &dyn Dataset, seed: u64, params: &Params) -> Result<BinaryClassificationModel> {
        let mut params = params.clone();
        params
            .entry(param_names::SEED.to_string())
            .or_insert_with(|| seed.to_string());

        let model_file = tempfile::Builder::new()
            .prefix(TEMP_MODEL_FILE_PREFIX)
            .tempfile()
            .map_err(|e| {
                log::error!("Could not create temporary file.");
                ProviderError::from(e)
            })?
            .into_temp_path();

        let result = train::fit(dataset, &params, &model_file)
            .and_then(|summary| {
                log::info!(
                    "Trained {} of {} iterations on {} instances.",
                    summary.num_iterations_trained,
                    summary.num_iterations_requested,
                    summary.num_instances
                );
                self.load_model(&model_file, Arc::clone(dataset.schema()))
            })
            .map_err(|e| {
                log::error!("Could not train the model.");
                e
            });

        if let Err(e) = model_file.close() {
            log::error!("Could not delete temporary model file: {}", e);
        }
        result
    }

    /// Load a model file, or the model file inside a directory, for `schema`.
    pub fn load_model(&self, model_path: &Path, schema: Arc<DatasetSchema>) -> Result<BinaryClassificationModel> {
        let model_file = resolve_model_file(model_path);
        if !model_file.is_file() {
            log::error!("{} {}.", ERROR_MSG_PREFIX_CANNOT_FIND_MODEL_FILE, model_file.display());
            return Err(crate::model_loading_error!(
                "{} {}.",
                ERROR_MSG_PREFIX_CANNOT_FIND_MODEL_FILE,
                model_file.display()
            ));
        }
        log::info!("Loading LightGBM model from {}", model_file.display());

        let model = BinaryClassificationModel::load(&model_file, schema)?;
        crate::ensure!(
            model.is_binary(),
            ProviderError::model_loading(ERROR_MSG_CANNOT_LOAD_NON_BINARY_LIGHTGBM_MODEL)
        );
        if model.num_features() != model.schema().predictive_fields().len() {
            return Err(ProviderError::model_loading(ERROR_MSG_SCHEMA_WITH_WRONG_PREDICTIVE_FIELDS_SIZE));
        }
        if !schema_matches_feature_names(model.schema(), model.feature_names()) {
            return Err(ProviderError::model_loading(ERROR_MSG_SCHEMA_WITH_WRONG_PREDICTIVE_FIELD_NAMES));
        }
        Ok(model)
    }

    /// Problems that would make [`fit`](Self::fit) fail or persist nowhere.
    pub fn validate_for_fit(
        &self,
        path_to_persist: &Path,
        schema: &DatasetSchema,
        params: &Params,
    ) -> Vec<ParamValidationError> {
        let mut errors = validate_persist_path(path_to_persist);
        errors.extend(validate_schema(schema));
        errors.extend(check_params(params));
        if params.get(param_names::BOOSTING_TYPE).map(|v| v.trim()) == Some("rf") && bagging_disabled(params) {
            log::warn!("RF requires bagging. Set bagging fraction < 1 and bagging frequency > 0.");
            errors.push(ParamValidationError::new(ERROR_MSG_RANDOM_FOREST_REQUIRES_BAGGING));
        }
        errors
    }

    /// Problems that would make [`load_model`](Self::load_model) fail.
    pub fn validate_for_load(
        &self,
        model_path: &Path,
        schema: &DatasetSchema,
        _params: &Params,
    ) -> Vec<ParamValidationError> {
        let mut errors = validate_schema(schema);
        if !model_path.exists() {
            log::error!(
                "{} in filesystem ({}).",
                ERROR_MSG_PREFIX_CANNOT_FIND_MODEL_FILE,
                model_path.display()
            );
            errors.push(ParamValidationError::new(format!(
                "{} in filesystem.",
                ERROR_MSG_PREFIX_CANNOT_FIND_MODEL_FILE
            )));
            return errors;
        }
        if model_path.is_dir() && !model_path.join(MODEL_BINARY_RESOURCE_FILE_NAME).exists() {
            log::error!(
                "Error loading model from directory ({}). File {} not found.",
                model_path.display(),
                MODEL_BINARY_RESOURCE_FILE_NAME
            );
            errors.push(ParamValidationError::new(format!(
                "{} {} inside folder.",
                ERROR_MSG_PREFIX_CANNOT_FIND_MODEL_FILE, MODEL_BINARY_RESOURCE_FILE_NAME
            )));
        }
        errors
    }

    /// Schema stored as JSON next to a model: `schema.json` inside a
    /// directory, or the given file itself.
    pub fn load_schema(&self, model_path: &Path) -> Result<DatasetSchema> {
        let path = if model_path.is_dir() {
            model_path.join(MODEL_SCHEMA_FILE_NAME)
        } else {
            model_path.to_path_buf()
        };
        DatasetSchema::from_json_file(&path).map_err(|e| {
            log::error!("Could not read schema from {}: {}", path.display(), e);
            ProviderError::model_loading(format!("Could not read schema from {}: {}", path.display(), e))
        })
    }
}

fn resolve_model_file(model_path: &Path) -> PathBuf {
    if model_path.is_dir() {
        model_path.join(MODEL_BINARY_RESOURCE_FILE_NAME)
    } else {
        model_path.to_path_buf()
    }
}

fn validate_persist_path(path: &Path) -> Vec<ParamValidationError> {
    if path.exists() {
        if !path.is_dir() {
            return vec![ParamValidationError::new(format!(
                "Path to persist the model is not a directory: {}.",
                path.display()
            ))];
        }
        let read_only = std::fs::metadata(path)
            .map(|meta| meta.permissions().readonly())
            .unwrap_or(true);
        if read_only {
            return vec![ParamValidationError::new(format!(
                "Path to persist the model is not writable: {}.",
                path.display()
            ))];
        }
        return Vec::new();
    }
    match std::fs::create_dir_all(path) {
        Ok(()) => Vec::new(),
        Err(e) => vec![ParamValidationError::new(format!(
            "Cannot create the directory to persist the model {}: {}.",
            path.display(),
            e
        ))],
    }
}

fn validate_schema(schema: &DatasetSchema) -> Vec<ParamValidationError> {
    let mut errors = Vec::new();
    match schema.target_field() {
        None => errors.push(ParamValidationError::new("The schema must have a target field.")),
        Some(field) if !matches!(field.value_schema, ValueSchema::Categorical { .. }) => {
            errors.push(ParamValidationError::new(format!(
                "The target field '{}' must be categorical, got {}.",
                field.name,
                field.value_schema.kind_name()
            )))
        }
        Some(_) => {}
    }
    if schema.has_string_fields() {
        errors.push(ParamValidationError::new(ERROR_MSG_SCHEMA_HAS_STRING_FIELDS));
    }
    if schema.num_target_classes() != Some(2) {
        errors.push(ParamValidationError::new(ERROR_MSG_NON_BINARY_TARGET));
    }
    errors
}

fn bagging_disabled(params: &Params) -> bool {
    const EPSILON: f64 = 1e-60;
    let read = |name: &str, default: f64| {
        params
            .get(name)
            .and_then(|value| value.trim().parse::<f64>().ok())
            .unwrap_or(default)
    };
    let frequency = read(param_names::BAGGING_FREQUENCY, 0.0);
    let fraction = read(param_names::BAGGING_FRACTION, 1.0);
    frequency.abs() < EPSILON || (1.0 - fraction).abs() < EPSILON
}

/// Compare schema names (whitespace as `_`) with the model's, position by
/// position, logging every mismatch.
fn schema_matches_feature_names(schema: &DatasetSchema, feature_names: &[String]) -> bool {
    let schema_names: Vec<String> = schema
        .predictive_field_names()
        .iter()
        .map(|name| normalize_feature_name(name))
        .collect();

    let mut is_match = schema_names.len() == feature_names.len();
    for (index, (schema_name, model_name)) in schema_names.iter().zip(feature_names).enumerate() {
        if schema_name != model_name {
            log::error!(
                "Schema with wrong predictive field name at index {}: '{}' Expected: '{}'",
                index,
                schema_name,
                model_name
            );
            is_match = false;
        }
    }
    if !is_match {
        log::error!(
            "Schema with wrong predictive field names: '{}' - Expected: '{}'",
            schema_names.join(", "),
            feature_names.join(", ")
        );
    }
    is_match
}
