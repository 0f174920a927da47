//! Loaded binary classifier and its TreeSHAP explainer.

use crate::bindings::ScoringResources;
use crate::core::constants::{BINARY_LGBM_NUM_CLASSES, MODEL_BINARY_RESOURCE_FILE_NAME};
use crate::core::error::{ProviderError, Result};
use crate::schema::{DatasetSchema, Instance};
use crate::train::remap_index_excluding_label;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A LightGBM binary classifier ready to score instances of its schema.
///
/// Scoring reuses one set of native buffers; concurrent callers are
/// serialized on an internal lock.
#[derive(Debug)]
pub struct BinaryClassificationModel {
    schema: Arc<DatasetSchema>,
    resources: Mutex<ScoringResources>,
    num_iterations: usize,
    num_features: usize,
    num_classes: usize,
    feature_names: Vec<String>,
}

impl BinaryClassificationModel {
    /// Load the model file at `model_path` for instances of `schema`.
    pub(crate) fn load(model_path: &Path, schema: Arc<DatasetSchema>) -> Result<Self> {
        let resources = ScoringResources::from_model_file(model_path)?;
        Ok(BinaryClassificationModel {
            schema,
            num_iterations: resources.num_iterations(),
            num_features: resources.num_features(),
            num_classes: resources.num_classes(),
            feature_names: resources.feature_names().to_vec(),
            resources: Mutex::new(resources),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ScoringResources> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Predictive values of `instance` in feature order, target dropped.
    fn feature_row<I: Instance + ?Sized>(&self, instance: &I) -> Result<Vec<f64>> {
        let num_fields = self.schema.num_fields();
        if instance.num_values() != num_fields {
            return Err(ProviderError::schema(format!(
                "instance has {} values, schema has {} fields",
                instance.num_values(),
                num_fields
            )));
        }
        let target = self.schema.target_index();
        let mut row = vec![0.0; self.num_features];
        for field in 0..num_fields {
            let column = match target {
                Some(label) if label == field => continue,
                Some(label) => remap_index_excluding_label(field, label),
                None => field,
            };
            let slot = row.get_mut(column).ok_or_else(|| {
                ProviderError::schema(format!(
                    "instance has more predictive values than the model's {} features",
                    self.num_features
                ))
            })?;
            *slot = instance.value(field);
        }
        Ok(row)
    }

    /// Probabilities of class 0 and class 1.
    pub fn class_distribution<I: Instance + ?Sized>(&self, instance: &I) -> Result<[f64; 2]> {
        let row = self.feature_row(instance)?;
        let score = {
            let mut resources = self.lock();
            resources.set_instance(&row)?;
            resources.predict_normal()?[0]
        };
        log::trace!("Prediction: {}", score);
        Ok([1.0 - score, score])
    }

    /// Most likely class; ties go to class 1.
    pub fn classify<I: Instance + ?Sized>(&self, instance: &I) -> Result<usize> {
        let distribution = self.class_distribution(instance)?;
        Ok(if distribution[0] > 0.5 { 0 } else { 1 })
    }

    /// Per-feature TreeSHAP contributions to the raw score, in feature order.
    pub fn feature_contributions<I: Instance + ?Sized>(&self, instance: &I) -> Result<Vec<f64>> {
        let row = self.feature_row(instance)?;
        let mut resources = self.lock();
        resources.set_instance(&row)?;
        let contributions = resources.predict_contributions()?;
        Ok(contributions[..self.num_features].to_vec())
    }

    /// Write the model into `dir` under its well-known file name.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MODEL_BINARY_RESOURCE_FILE_NAME);
        log::info!("Saving model to disk.");
        log::debug!("Saving model to disk @ {}.", path.display());
        let resources = self.lock();
        resources.save_model(&path).map_err(|e| {
            log::error!("Failed to save model to disk: {}", e);
            e
        })
    }

    /// Schema the model scores.
    pub fn schema(&self) -> &Arc<DatasetSchema> {
        &self.schema
    }

    /// Boosting iterations in the model.
    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    /// Feature columns the model expects.
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Native class count; `1` for binary models.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Feature names as stored in the model file.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Whether the engine sees the model as a single-output binary model.
    pub fn is_binary(&self) -> bool {
        self.num_classes == BINARY_LGBM_NUM_CLASSES as usize
    }

    /// Release the native resources. Later scoring calls fail; idempotent.
    pub fn close(&self) {
        self.lock().close();
    }
}

/// TreeSHAP explanations of a loaded model.
#[derive(Debug, Clone)]
pub struct FeatureContributionExplainer {
    model: Arc<BinaryClassificationModel>,
}

impl FeatureContributionExplainer {
    /// Explain `model`.
    pub fn new(model: Arc<BinaryClassificationModel>) -> Self {
        FeatureContributionExplainer { model }
    }

    /// See [`BinaryClassificationModel::feature_contributions`].
    pub fn feature_contributions<I: Instance + ?Sized>(&self, instance: &I) -> Result<Vec<f64>> {
        self.model.feature_contributions(instance)
    }

    /// The explained model.
    pub fn model(&self) -> &Arc<BinaryClassificationModel> {
        &self.model
    }
}
