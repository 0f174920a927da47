//! Streams a dataset's instances into the training buffers.

use crate::bindings::TrainData;
use crate::core::constants::ERROR_MSG_EMPTY_TRAIN_DATASET;
use crate::core::error::{ProviderError, Result};
use crate::schema::{Dataset, Instance};

use super::params::remap_index_excluding_label;
pub use super::params::categorical_feature_indices_without_label;

/// Copy every instance of `dataset` into `train_data`, in one pass.
///
/// The label comes from the soft-label column when one is configured and
/// from the target otherwise. Every non-target field becomes a feature in
/// schema order; the soft-label column keeps its slot but is written as
/// `0.0` so it cannot leak into the trees.
pub fn copy_train_data(
    dataset: &dyn Dataset,
    train_data: &mut TrainData,
    constraint_group_index: Option<usize>,
    soft_label_index: Option<usize>,
) -> Result<()> {
    let schema = dataset.schema();
    let num_fields = schema.num_fields();
    let hard_label_index = schema
        .target_index()
        .ok_or_else(|| ProviderError::schema("training requires a target field"))?;
    let label_index = soft_label_index.unwrap_or(hard_label_index);

    if constraint_group_index.is_some() != train_data.is_fairness_constrained() {
        return Err(ProviderError::internal(
            "constraint group column and fairness-constrained buffers disagree",
        ));
    }

    if train_data.num_features() + 1 != num_fields {
        return Err(ProviderError::internal(format!(
            "training buffers hold {} features, schema has {} predictive fields",
            train_data.num_features(),
            num_fields - 1
        )));
    }
    let mut row = vec![0.0; train_data.num_features()];
    for instance in dataset.instances() {
        if instance.num_values() != num_fields {
            return Err(ProviderError::schema(format!(
                "instance {} has {} values, schema has {} fields",
                train_data.num_instances(),
                instance.num_values(),
                num_fields
            )));
        }
        train_data.add_label_value(instance.value(label_index) as f32);
        if let Some(group_index) = constraint_group_index {
            train_data.add_constraint_group_value(instance.value(group_index) as i32)?;
        }
        for field in (0..num_fields).filter(|&field| field != hard_label_index) {
            let column = remap_index_excluding_label(field, hard_label_index);
            row[column] = if field == label_index {
                0.0
            } else {
                instance.value(field)
            };
        }
        for &value in &row {
            train_data.add_feature_value(value);
        }
    }

    let num_instances = train_data.num_instances();
    debug_assert_eq!(
        train_data.features().get_add_count(),
        num_instances * train_data.num_features()
    );
    log::debug!(
        "Copied train data of size {} into {} chunks.",
        num_instances,
        train_data.features().get_chunks_count()
    );

    if num_instances == 0 {
        log::error!("{}!", ERROR_MSG_EMPTY_TRAIN_DATASET);
        return Err(ProviderError::empty_dataset(format!(
            "{} for LightGBM!",
            ERROR_MSG_EMPTY_TRAIN_DATASET
        )));
    }
    Ok(())
}
