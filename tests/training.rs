//! Training pipeline integration tests: chunking, label placement, failures.

use approx::assert_relative_eq;
use lightgbm_provider::config::params_with_overrides;
use lightgbm_provider::provider::ModelCreator;
use lightgbm_provider::schema::{Dataset, DatasetSchema, FieldSchema, InMemoryDataset, Instance};
use lightgbm_provider::train::{fit, fit_with_chunk_size};
use lightgbm_provider::ProviderError;
use std::sync::Arc;

mod common;
use common::*;

fn distributions(creator: &ModelCreator, dir: &std::path::Path, dataset: &InMemoryDataset) -> Vec<[f64; 2]> {
    let model = creator
        .load_model(dir, Arc::clone(dataset.schema()))
        .expect("model loads");
    dataset
        .as_slice()
        .iter()
        .map(|instance| model.class_distribution(instance).expect("scores"))
        .collect()
}

#[test]
fn test_chunk_size_does_not_change_the_model() {
    let creator = ModelCreator::new().unwrap();
    let dataset = fraud_dataset(LabelPosition::End, 500, 7);
    let params = quick_params();

    let mut results = Vec::new();
    for chunk in [15, 250, dataset.len()] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LightGBM_model.txt");
        let summary = fit_with_chunk_size(&dataset, &params, &path, chunk).unwrap();
        assert_eq!(summary.num_instances, 500);
        results.push(distributions(&creator, dir.path(), &dataset));
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
}

#[test]
fn test_label_position_does_not_change_scores() {
    let creator = ModelCreator::new().unwrap();
    let params = quick_params();

    let mut results = Vec::new();
    for position in ALL_LABEL_POSITIONS {
        let dataset = fraud_dataset(position, 400, 11);
        let dir = tempfile::tempdir().unwrap();
        fit(&dataset, &params, &dir.path().join("LightGBM_model.txt")).unwrap();
        results.push(distributions(&creator, dir.path(), &dataset));
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
}

#[test]
fn test_empty_dataset_is_rejected() {
    let creator = ModelCreator::new().unwrap();
    let schema = fraud_schema(LabelPosition::Middle);
    let dataset = InMemoryDataset::new(schema, Vec::new()).unwrap();
    let err = creator.fit(&dataset, 0, &quick_params()).unwrap_err();
    assert!(matches!(err, ProviderError::EmptyDataset { .. }));
}

#[test]
fn test_few_instances_train_fewer_iterations() {
    let dataset = fraud_dataset(LabelPosition::End, 30, 3);
    let params = params_with_overrides([("num_iterations", "50"), ("min_data_in_leaf", "100")]);
    let dir = tempfile::tempdir().unwrap();
    let summary = fit(&dataset, &params, &dir.path().join("m.txt")).unwrap();
    assert_eq!(summary.num_iterations_requested, 50);
    assert!(summary.num_iterations_trained < 50);
}

#[test]
fn test_soft_label_training() {
    let schema = Arc::new(
        DatasetSchema::new(
            vec![
                FieldSchema::numeric("amount", 0),
                FieldSchema::numeric("risk", 1),
                FieldSchema::categorical("fraud", 2, ["false", "true"]),
            ],
            Some(2),
        )
        .unwrap(),
    );
    let instances = (0..300)
        .map(|i| {
            let amount = i as f64;
            let risk = amount / 300.0;
            vec![amount, risk, if risk > 0.5 { 1.0 } else { 0.0 }].into()
        })
        .collect();
    let dataset = InMemoryDataset::new(Arc::clone(&schema), instances).unwrap();

    let creator = ModelCreator::new().unwrap();
    let mut params = quick_params();
    params.insert("soft_label".to_string(), "risk".to_string());
    let model = creator.fit(&dataset, 1, &params).unwrap();

    assert_eq!(model.num_features(), 2);
    let low = model.class_distribution(&[10.0, 0.9, 0.0][..]).unwrap()[1];
    let high = model.class_distribution(&[290.0, 0.1, 0.0][..]).unwrap()[1];
    assert!(high > low);
    // The soft-label column is zeroed during training and never used to split.
    let contributions = model.feature_contributions(&[290.0, 0.1, 0.0][..]).unwrap();
    assert_relative_eq!(contributions[1], 0.0);
}

#[test]
fn test_constrained_objective_training() {
    let dataset = fraud_dataset(LabelPosition::End, 400, 5);
    let mut params = quick_params();
    params.insert("objective".to_string(), "constrained_cross_entropy".to_string());
    params.insert("constraint_group_column".to_string(), "name:merchant".to_string());
    params.insert("constraint_type".to_string(), "FPR".to_string());

    let creator = ModelCreator::new().unwrap();
    let model = creator.fit(&dataset, 3, &params).unwrap();
    assert!(model.num_iterations() > 0);
    for instance in dataset.instances().take(20) {
        let [p0, p1] = model.class_distribution(&instance).unwrap();
        assert_relative_eq!(p0 + p1, 1.0, epsilon = 1e-12);
        assert!(instance.value(0).is_finite());
    }
}
