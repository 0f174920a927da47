//! Instances and the single-pass dataset contract.

use crate::core::error::{ProviderError, Result};
use crate::schema::DatasetSchema;
use std::sync::Arc;

/// One row of numeric-encoded values aligned with the schema's field order.
///
/// Categorical values are indices into the field's sorted nominal set.
pub trait Instance {
    /// Value of the field at `field_index`.
    fn value(&self, field_index: usize) -> f64;

    /// Number of values; `value` is defined for every index below it.
    fn num_values(&self) -> usize;
}

/// Instance backed by a dense vector.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseInstance {
    values: Vec<f64>,
}

impl DenseInstance {
    /// Wrap a vector of values.
    pub fn new(values: Vec<f64>) -> Self {
        DenseInstance { values }
    }

    /// All values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the instance has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<f64>> for DenseInstance {
    fn from(values: Vec<f64>) -> Self {
        DenseInstance::new(values)
    }
}

impl Instance for DenseInstance {
    fn value(&self, field_index: usize) -> f64 {
        self.values[field_index]
    }

    fn num_values(&self) -> usize {
        self.values.len()
    }
}

impl Instance for [f64] {
    fn value(&self, field_index: usize) -> f64 {
        self[field_index]
    }

    fn num_values(&self) -> usize {
        self.len()
    }
}

impl Instance for Vec<f64> {
    fn value(&self, field_index: usize) -> f64 {
        self[field_index]
    }

    fn num_values(&self) -> usize {
        self.len()
    }
}

/// A schema plus a stream of instances.
///
/// Each call to [`instances`](Dataset::instances) starts a new traversal;
/// training performs exactly one traversal.
pub trait Dataset {
    /// Schema shared by every instance.
    fn schema(&self) -> &Arc<DatasetSchema>;

    /// Iterate over the instances once.
    fn instances(&self) -> Box<dyn Iterator<Item = DenseInstance> + '_>;
}

/// Dataset held entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    schema: Arc<DatasetSchema>,
    instances: Vec<DenseInstance>,
}

impl InMemoryDataset {
    /// Create a dataset, checking every instance has one value per field.
    pub fn new(schema: Arc<DatasetSchema>, instances: Vec<DenseInstance>) -> Result<Self> {
        let width = schema.num_fields();
        if let Some((row, instance)) = instances
            .iter()
            .enumerate()
            .find(|(_, instance)| instance.len() != width)
        {
            return Err(ProviderError::schema(format!(
                "instance {} has {} values, schema has {} fields",
                row,
                instance.len(),
                width
            )));
        }
        Ok(InMemoryDataset { schema, instances })
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the dataset has no instances.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instance at `index`.
    pub fn instance(&self, index: usize) -> Option<&DenseInstance> {
        self.instances.get(index)
    }

    /// All instances.
    pub fn as_slice(&self) -> &[DenseInstance] {
        &self.instances
    }

    /// Same rows with their columns reordered by `permutation`, under a new
    /// schema. `permutation[i]` is the old column placed at new position `i`.
    pub fn reorder_columns(&self, schema: Arc<DatasetSchema>, permutation: &[usize]) -> Result<Self> {
        let instances = self
            .instances
            .iter()
            .map(|instance| {
                DenseInstance::new(permutation.iter().map(|&old| instance.value(old)).collect())
            })
            .collect();
        Self::new(schema, instances)
    }
}

impl Dataset for InMemoryDataset {
    fn schema(&self) -> &Arc<DatasetSchema> {
        &self.schema
    }

    fn instances(&self) -> Box<dyn Iterator<Item = DenseInstance> + '_> {
        Box::new(self.instances.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;

    fn schema() -> Arc<DatasetSchema> {
        Arc::new(
            DatasetSchema::new(
                vec![
                    FieldSchema::numeric("x", 0),
                    FieldSchema::categorical("y", 1, ["0", "1"]),
                ],
                Some(1),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_in_memory_dataset() {
        let dataset = InMemoryDataset::new(
            schema(),
            vec![vec![1.0, 0.0].into(), vec![2.0, 1.0].into()],
        )
        .unwrap();
        assert_eq!(dataset.len(), 2);
        let values: Vec<f64> = dataset.instances().map(|i| i.value(0)).collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_wrong_width_rejected() {
        let result = InMemoryDataset::new(schema(), vec![vec![1.0].into()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_slice_instance() {
        let row = [3.0, 4.0];
        assert_eq!(row[..].value(1), 4.0);
    }
}
