//! Training orchestration: dataset in, model file out.

use super::copier::copy_train_data;
use super::params::{
    constraint_group_column_index, int_param, is_fairness_constrained, num_actual_features,
    soft_label_column_index, soft_label_field_name, train_params_string,
};
use crate::bindings::{TrainBooster, TrainData};
use crate::config::Params;
use crate::core::constants::{param_names, DEFAULT_TRAIN_DATA_CHUNK_INSTANCES_SIZE};
use crate::core::error::{ProviderError, Result};
use crate::native::C_API_FEATURE_IMPORTANCE_GAIN;
use crate::schema::Dataset;
use std::path::Path;

const DEFAULT_NUM_ITERATIONS: i64 = 100;

/// What a training run produced.
///
/// `num_iterations_trained` counts recorded boosting iterations. When the
/// engine finishes on the very first iteration it still writes one constant
/// tree, so the model reloaded from the file reports one iteration while
/// this summary reports zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingSummary {
    /// Iterations asked for
    pub num_iterations_requested: usize,
    /// Iterations recorded before training finished
    pub num_iterations_trained: usize,
    /// Instances copied to the engine
    pub num_instances: usize,
    /// Width of a feature row
    pub num_features: usize,
    /// Feature columns carrying data (the soft-label slot is zeroed)
    pub num_informative_features: usize,
}

/// Train a model on `dataset` and save it to `output_model_path`.
pub fn fit(dataset: &dyn Dataset, params: &Params, output_model_path: &Path) -> Result<TrainingSummary> {
    fit_with_chunk_size(
        dataset,
        params,
        output_model_path,
        DEFAULT_TRAIN_DATA_CHUNK_INSTANCES_SIZE,
    )
}

/// [`fit`] with an explicit number of instances per buffer chunk.
///
/// The chunk size changes memory layout only; the trained model is the same
/// for every value.
pub fn fit_with_chunk_size(
    dataset: &dyn Dataset,
    params: &Params,
    output_model_path: &Path,
    instances_per_chunk: usize,
) -> Result<TrainingSummary> {
    let schema = dataset.schema();
    if schema.target_index().is_none() {
        return Err(ProviderError::schema("training requires a target field"));
    }

    let soft_label_index = match soft_label_field_name(params) {
        Some(name) => Some(soft_label_column_index(params, schema).ok_or_else(|| {
            ProviderError::invalid_parameter(
                param_names::SOFT_LABEL,
                name,
                "no such predictive field",
            )
        })?),
        None => None,
    };
    let fairness_constrained = is_fairness_constrained(params);
    let constraint_group_index = if fairness_constrained {
        constraint_group_column_index(params, schema)
    } else {
        None
    };
    if fairness_constrained && constraint_group_index.is_none() {
        log::warn!("Fairness-constrained objective without a usable constraint group column.");
    }
    let feature_names = schema.predictive_field_names();
    let num_features = feature_names.len();
    let train_params = train_params_string(params, schema);
    let num_iterations = int_param(params, param_names::NUM_ITERATIONS, DEFAULT_NUM_ITERATIONS).max(0) as usize;
    log::debug!("LightGBM model train params: {}", train_params);

    let mut train_data = TrainData::new(num_features, instances_per_chunk, constraint_group_index.is_some())?;
    let mut booster = TrainBooster::new();

    copy_train_data(dataset, &mut train_data, constraint_group_index, soft_label_index)?;
    let num_instances = train_data.num_instances();

    log::info!("Initializing LightGBM in-memory structure and setting feature names.");
    train_data.init_dataset_handle(&train_params)?;
    train_data.release_features();

    let labels = train_data.coalesce_labels();
    train_data.set_field_f32("label", &labels)?;
    train_data.release_labels();

    if let Some(groups) = train_data.coalesce_constraint_groups() {
        train_data.set_field_i32("constraint_group", &groups)?;
        train_data.release_constraint_groups();
    }
    train_data.set_feature_names(&feature_names)?;
    log::info!("Created LightGBM dataset.");

    booster.init_booster_handle(train_data.dataset_handle(), &train_params)?;
    train_booster(&mut booster, num_iterations)?;
    let num_iterations_trained = booster.current_iteration()?;

    log::debug!("Saving trained model to disk at {}.", output_model_path.display());
    booster.save_model(output_model_path, C_API_FEATURE_IMPORTANCE_GAIN)?;
    log::info!("Saved model to disk");

    booster.close();
    train_data.close();

    Ok(TrainingSummary {
        num_iterations_requested: num_iterations,
        num_iterations_trained,
        num_instances,
        num_features,
        num_informative_features: num_actual_features(schema, params),
    })
}

fn train_booster(booster: &mut TrainBooster, num_iterations: usize) -> Result<()> {
    log::info!("Training LightGBM model.");
    for iteration in 0..num_iterations {
        log::debug!(
            "Starting model training iteration #{}/{}.",
            iteration + 1,
            num_iterations
        );
        if booster.update_one_iter()? {
            log::info!("LightGBM backend signalled the end of the model train.");
            break;
        }
    }
    log::info!("Finished model training.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_params, params_with_overrides};
    use crate::schema::{DatasetSchema, FieldSchema, InMemoryDataset};
    use std::sync::Arc;

    fn dataset(rows: usize) -> InMemoryDataset {
        let schema = DatasetSchema::new(
            vec![
                FieldSchema::numeric("amount", 0),
                FieldSchema::categorical("group", 1, ["a", "b"]),
                FieldSchema::categorical("label", 2, ["0", "1"]),
            ],
            Some(2),
        )
        .unwrap();
        let instances = (0..rows)
            .map(|i| {
                let label = if i % 3 == 0 { 1.0 } else { 0.0 };
                vec![i as f64 + 10.0 * label, (i % 2) as f64, label].into()
            })
            .collect();
        InMemoryDataset::new(Arc::new(schema), instances).unwrap()
    }

    #[test]
    fn test_fit_writes_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.txt");
        let params = params_with_overrides([("num_iterations", "5"), ("min_data_in_leaf", "5")]);
        let summary = fit_with_chunk_size(&dataset(90), &params, &path, 16).unwrap();
        assert_eq!(summary.num_iterations_requested, 5);
        assert_eq!(summary.num_iterations_trained, 5);
        assert_eq!(summary.num_instances, 90);
        assert_eq!(summary.num_features, 2);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("feature_names=amount group"));
        assert!(text.contains("objective=binary"));
    }

    #[test]
    fn test_unknown_soft_label_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let params = params_with_overrides([("soft_label", "nope")]);
        let err = fit(&dataset(10), &params, &dir.path().join("m.txt")).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidParameter { .. }));
    }

    #[test]
    fn test_constrained_without_group_fails_in_engine() {
        let dir = tempfile::tempdir().unwrap();
        let params = params_with_overrides([("objective", "constrained_cross_entropy")]);
        let err = fit(&dataset(10), &params, &dir.path().join("m.txt")).unwrap_err();
        assert!(matches!(err, ProviderError::Native { .. }));
        assert!(err.to_string().contains("constraint_group"));
    }

    #[test]
    fn test_first_iteration_finish_keeps_constant_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.txt");
        let params = params_with_overrides([("num_iterations", "10"), ("min_data_in_leaf", "100")]);
        let summary = fit(&dataset(30), &params, &path).unwrap();
        assert_eq!(summary.num_iterations_trained, 0);

        let resources = crate::bindings::ScoringResources::from_model_file(&path).unwrap();
        assert_eq!(resources.num_iterations(), 1);
    }

    #[test]
    fn test_fit_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let err = fit(&dataset(0), &default_params(), &dir.path().join("m.txt")).unwrap_err();
        assert!(matches!(err, ProviderError::EmptyDataset { .. }));
    }
}
