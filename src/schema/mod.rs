//! Dataset schema, instances and the dataset iteration contract.
//!
//! A [`DatasetSchema`] is an ordered list of [`FieldSchema`]s plus an optional
//! target index. It is built once by the caller and shared through an
//! [`Arc`](std::sync::Arc) between the dataset, the trainer and the scorer.

pub mod dataset;

#[cfg(feature = "csv")]
pub mod csv;

pub use dataset::{Dataset, DenseInstance, InMemoryDataset, Instance};

use crate::core::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Kind of values a field holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueSchema {
    /// Real-valued field
    Numeric,
    /// Field whose values are indices into a sorted set of nominal values
    Categorical {
        /// Nominal values, sorted
        nominal_values: BTreeSet<String>,
    },
    /// Free text; not supported by the native engine
    String,
}

impl ValueSchema {
    /// Build a categorical value schema from any list of nominal values.
    pub fn categorical<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ValueSchema::Categorical {
            nominal_values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether this is a categorical schema.
    pub fn is_categorical(&self) -> bool {
        matches!(self, ValueSchema::Categorical { .. })
    }

    /// Kind name used in log messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ValueSchema::Numeric => "numeric",
            ValueSchema::Categorical { .. } => "categorical",
            ValueSchema::String => "string",
        }
    }
}

/// One field of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name
    pub name: String,
    /// Position in the schema
    pub index: usize,
    /// Value kind
    pub value_schema: ValueSchema,
}

impl FieldSchema {
    /// Create a field.
    pub fn new<S: Into<String>>(name: S, index: usize, value_schema: ValueSchema) -> Self {
        FieldSchema {
            name: name.into(),
            index,
            value_schema,
        }
    }

    /// Create a numeric field.
    pub fn numeric<S: Into<String>>(name: S, index: usize) -> Self {
        Self::new(name, index, ValueSchema::Numeric)
    }

    /// Create a categorical field.
    pub fn categorical<S, I, V>(name: S, index: usize, values: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self::new(name, index, ValueSchema::categorical(values))
    }

    /// Create a string field.
    pub fn string<S: Into<String>>(name: S, index: usize) -> Self {
        Self::new(name, index, ValueSchema::String)
    }
}

/// Ordered list of fields with an optional target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaDef", into = "SchemaDef")]
pub struct DatasetSchema {
    target_index: Option<usize>,
    fields: Vec<FieldSchema>,
}

#[derive(Serialize, Deserialize)]
struct SchemaDef {
    #[serde(default)]
    target_index: Option<usize>,
    fields: Vec<FieldSchema>,
}

impl TryFrom<SchemaDef> for DatasetSchema {
    type Error = ProviderError;

    fn try_from(def: SchemaDef) -> Result<Self> {
        DatasetSchema::new(def.fields, def.target_index)
    }
}

impl From<DatasetSchema> for SchemaDef {
    fn from(schema: DatasetSchema) -> Self {
        SchemaDef {
            target_index: schema.target_index,
            fields: schema.fields,
        }
    }
}

impl DatasetSchema {
    /// Create a schema, checking that field indices are exactly `0..N-1` in
    /// order and that the target index points at a field.
    pub fn new(fields: Vec<FieldSchema>, target_index: Option<usize>) -> Result<Self> {
        for (position, field) in fields.iter().enumerate() {
            if field.index != position {
                return Err(ProviderError::schema(format!(
                    "field '{}' has index {} but sits at position {}",
                    field.name, field.index, position
                )));
            }
        }
        if let Some(target) = target_index {
            if target >= fields.len() {
                return Err(ProviderError::schema(format!(
                    "target index {} out of range for {} fields",
                    target,
                    fields.len()
                )));
            }
        }
        Ok(DatasetSchema {
            target_index,
            fields,
        })
    }

    /// Read a schema stored as JSON.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the schema as pretty JSON.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// All fields, in order.
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    /// Number of fields, target included.
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Target field index.
    pub fn target_index(&self) -> Option<usize> {
        self.target_index
    }

    /// Target field.
    pub fn target_field(&self) -> Option<&FieldSchema> {
        self.target_index.map(|idx| &self.fields[idx])
    }

    /// Every field except the target, in order.
    pub fn predictive_fields(&self) -> Vec<&FieldSchema> {
        self.fields
            .iter()
            .filter(|field| Some(field.index) != self.target_index)
            .collect()
    }

    /// Names of the predictive fields, in order.
    pub fn predictive_field_names(&self) -> Vec<String> {
        self.predictive_fields()
            .into_iter()
            .map(|field| field.name.clone())
            .collect()
    }

    /// Whether any field holds free text.
    pub fn has_string_fields(&self) -> bool {
        self.fields
            .iter()
            .any(|field| matches!(field.value_schema, ValueSchema::String))
    }

    /// Number of target classes, if the target is categorical.
    pub fn num_target_classes(&self) -> Option<usize> {
        match &self.target_field()?.value_schema {
            ValueSchema::Categorical { nominal_values } => Some(nominal_values.len()),
            _ => None,
        }
    }

    /// Copy of this schema with the target moved to another index.
    pub fn with_target_index(&self, target_index: Option<usize>) -> Result<Self> {
        Self::new(self.fields.clone(), target_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> DatasetSchema {
        DatasetSchema::new(
            vec![
                FieldSchema::numeric("amount", 0),
                FieldSchema::categorical("merchant", 1, ["A", "B"]),
                FieldSchema::categorical("label", 2, ["0", "1"]),
            ],
            Some(2),
        )
        .unwrap()
    }

    #[test]
    fn test_predictive_fields_exclude_target() {
        let schema = schema();
        assert_eq!(schema.predictive_field_names(), vec!["amount", "merchant"]);
        assert_eq!(schema.num_target_classes(), Some(2));
        assert!(!schema.has_string_fields());
    }

    #[test]
    fn test_non_contiguous_indices_rejected() {
        let result = DatasetSchema::new(
            vec![FieldSchema::numeric("a", 0), FieldSchema::numeric("b", 2)],
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_target_out_of_range_rejected() {
        let result = DatasetSchema::new(vec![FieldSchema::numeric("a", 0)], Some(1));
        assert!(result.is_err());
    }

    #[test]
    fn test_nominal_values_are_sorted() {
        let field = FieldSchema::categorical("c", 0, ["b", "a", "c"]);
        match field.value_schema {
            ValueSchema::Categorical { nominal_values } => {
                let values: Vec<_> = nominal_values.into_iter().collect();
                assert_eq!(values, vec!["a", "b", "c"]);
            }
            _ => panic!("expected categorical"),
        }
    }

    #[test]
    fn test_json_round_trip_validates() {
        let schema = schema();
        let json = serde_json::to_string(&schema).unwrap();
        let decoded: DatasetSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, schema);

        let bad = r#"{"target_index": 3, "fields": [{"name": "a", "index": 0, "value_schema": {"type": "numeric"}}]}"#;
        assert!(serde_json::from_str::<DatasetSchema>(bad).is_err());
    }
}
