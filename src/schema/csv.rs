//! CSV loading against a known schema.

use crate::core::error::{ProviderError, Result};
use crate::schema::{DatasetSchema, DenseInstance, InMemoryDataset, ValueSchema};
use ::csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Load a headed CSV file into an [`InMemoryDataset`].
///
/// Columns are matched to schema fields by name. Categorical cells are
/// encoded as their position in the sorted nominal set, numeric cells are
/// parsed as `f64` and empty numeric cells become NaN. At most
/// `max_instances` rows are read when given.
pub fn load_csv_dataset<P: AsRef<Path>>(
    path: P,
    schema: Arc<DatasetSchema>,
    max_instances: Option<usize>,
) -> Result<InMemoryDataset> {
    let file = File::open(path.as_ref())?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(::csv::Trim::All)
        .from_reader(file);

    let headers = reader.headers()?.clone();
    let columns = resolve_columns(&headers, &schema)?;

    let mut instances = Vec::new();
    for record in reader.records() {
        if max_instances.is_some_and(|max| instances.len() >= max) {
            break;
        }
        let record = record?;
        instances.push(encode_record(&record, &columns, &schema, instances.len())?);
    }

    log::debug!(
        "Loaded {} instances from {}",
        instances.len(),
        path.as_ref().display()
    );
    InMemoryDataset::new(schema, instances)
}

fn resolve_columns(headers: &StringRecord, schema: &DatasetSchema) -> Result<Vec<usize>> {
    schema
        .fields()
        .iter()
        .map(|field| {
            headers
                .iter()
                .position(|header| header == field.name)
                .ok_or_else(|| {
                    ProviderError::schema(format!("CSV has no column named '{}'", field.name))
                })
        })
        .collect()
}

fn encode_record(
    record: &StringRecord,
    columns: &[usize],
    schema: &DatasetSchema,
    row: usize,
) -> Result<DenseInstance> {
    let mut values = Vec::with_capacity(columns.len());
    for (field, &column) in schema.fields().iter().zip(columns) {
        let cell = record.get(column).unwrap_or("");
        let value = match &field.value_schema {
            ValueSchema::Numeric if cell.is_empty() => f64::NAN,
            ValueSchema::Numeric => cell.parse::<f64>().map_err(|e| {
                ProviderError::schema(format!(
                    "row {}: field '{}' value '{}' is not numeric: {}",
                    row, field.name, cell, e
                ))
            })?,
            ValueSchema::Categorical { nominal_values } => nominal_values
                .iter()
                .position(|nominal| nominal == cell)
                .map(|position| position as f64)
                .ok_or_else(|| {
                    ProviderError::schema(format!(
                        "row {}: field '{}' value '{}' is not a nominal value",
                        row, field.name, cell
                    ))
                })?,
            ValueSchema::String => {
                return Err(ProviderError::schema(format!(
                    "field '{}' is a string field and cannot be encoded",
                    field.name
                )))
            }
        };
        values.push(value);
    }
    Ok(DenseInstance::new(values))
}
