//! Common test utilities for the provider integration tests.
#![allow(dead_code)]

use lightgbm_provider::config::{params_with_overrides, Params};
use lightgbm_provider::schema::{DatasetSchema, DenseInstance, FieldSchema, InMemoryDataset};
use rand::prelude::*;
use std::sync::Arc;

/// Where the target column sits in a generated schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelPosition {
    Start,
    Middle,
    End,
}

pub const ALL_LABEL_POSITIONS: [LabelPosition; 3] =
    [LabelPosition::Start, LabelPosition::Middle, LabelPosition::End];

/// Predictive fields of the generated fraud dataset, in order.
pub fn predictive_fields() -> Vec<(String, Option<Vec<&'static str>>)> {
    vec![
        ("amount".to_string(), None),
        ("merchant".to_string(), Some(vec!["A", "B", "C"])),
        ("hour".to_string(), None),
        ("card type".to_string(), Some(vec!["credit", "debit"])),
    ]
}

fn label_index(position: LabelPosition, num_fields: usize) -> usize {
    match position {
        LabelPosition::Start => 0,
        LabelPosition::Middle => num_fields / 2,
        LabelPosition::End => num_fields - 1,
    }
}

/// Fraud-like schema with the binary target at `position`.
pub fn fraud_schema(position: LabelPosition) -> Arc<DatasetSchema> {
    let predictive = predictive_fields();
    let num_fields = predictive.len() + 1;
    let target = label_index(position, num_fields);

    let mut fields = Vec::with_capacity(num_fields);
    let mut predictive = predictive.into_iter();
    for index in 0..num_fields {
        if index == target {
            fields.push(FieldSchema::categorical("fraud", index, ["false", "true"]));
            continue;
        }
        let (name, nominal) = predictive.next().expect("enough predictive fields");
        fields.push(match nominal {
            Some(values) => FieldSchema::categorical(name, index, values),
            None => FieldSchema::numeric(name, index),
        });
    }
    Arc::new(DatasetSchema::new(fields, Some(target)).expect("valid schema"))
}

/// `(predictive values, label)` rows; fraud is driven by a large amount at
/// merchant `C` or late hours.
pub fn fraud_rows(num_rows: usize, seed: u64) -> Vec<(Vec<f64>, f64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..num_rows)
        .map(|_| {
            let amount: f64 = rng.gen_range(1.0..1000.0);
            let merchant = rng.gen_range(0..3) as f64;
            let hour = rng.gen_range(0..24) as f64;
            let card = rng.gen_range(0..2) as f64;
            let risky = (amount > 600.0 && merchant == 2.0) || hour >= 22.0;
            let noise = rng.gen_bool(0.05);
            let label = if risky != noise { 1.0 } else { 0.0 };
            (vec![amount, merchant, hour, card], label)
        })
        .collect()
}

/// Lay out predictive values and the label according to `schema`.
pub fn to_instance(schema: &DatasetSchema, predictive: &[f64], label: f64) -> DenseInstance {
    let target = schema.target_index().expect("schema has a target");
    let mut values = Vec::with_capacity(predictive.len() + 1);
    let mut predictive = predictive.iter();
    for index in 0..schema.num_fields() {
        if index == target {
            values.push(label);
        } else {
            values.push(*predictive.next().expect("enough predictive values"));
        }
    }
    DenseInstance::new(values)
}

/// Generated fraud dataset with the target at `position`.
pub fn fraud_dataset(position: LabelPosition, num_rows: usize, seed: u64) -> InMemoryDataset {
    let schema = fraud_schema(position);
    let instances = fraud_rows(num_rows, seed)
        .iter()
        .map(|(predictive, label)| to_instance(&schema, predictive, *label))
        .collect();
    InMemoryDataset::new(schema, instances).expect("valid dataset")
}

/// Small, fast training parameters.
pub fn quick_params() -> Params {
    params_with_overrides([
        ("num_iterations", "20"),
        ("num_leaves", "8"),
        ("min_data_in_leaf", "10"),
        ("num_threads", "1"),
    ])
}
