//! Scoring, persistence and schema gate integration tests.

use approx::assert_relative_eq;
use lightgbm_provider::core::constants::{
    ERROR_MSG_CANNOT_LOAD_NON_BINARY_LIGHTGBM_MODEL, ERROR_MSG_SCHEMA_WITH_WRONG_PREDICTIVE_FIELDS_SIZE,
    ERROR_MSG_SCHEMA_WITH_WRONG_PREDICTIVE_FIELD_NAMES, MODEL_BINARY_RESOURCE_FILE_NAME,
};
use lightgbm_provider::provider::{FeatureContributionExplainer, ModelCreator};
use lightgbm_provider::schema::{Dataset, DatasetSchema, FieldSchema, InMemoryDataset, Instance};
use lightgbm_provider::ProviderError;
use rand::prelude::*;
use std::sync::Arc;
use std::thread;

mod common;
use common::*;

#[test]
fn test_distribution_sums_to_one() {
    let creator = ModelCreator::new().unwrap();
    let dataset = fraud_dataset(LabelPosition::Middle, 300, 21);
    let model = creator.fit(&dataset, 0, &quick_params()).unwrap();
    for instance in dataset.as_slice() {
        let [p0, p1] = model.class_distribution(instance).unwrap();
        assert_relative_eq!(p0 + p1, 1.0, epsilon = 1e-12);
        assert!((0.0..=1.0).contains(&p1));
        let expected = if p0 > 0.5 { 0 } else { 1 };
        assert_eq!(model.classify(instance).unwrap(), expected);
    }
}

#[test]
fn test_save_and_load_round_trip() {
    let creator = ModelCreator::new().unwrap();
    let dataset = fraud_dataset(LabelPosition::End, 300, 4);
    let model = creator.fit(&dataset, 0, &quick_params()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    model.save(dir.path()).unwrap();
    assert!(dir.path().join(MODEL_BINARY_RESOURCE_FILE_NAME).is_file());
    dataset.schema().to_json_file(dir.path().join("schema.json")).unwrap();

    let schema = Arc::new(creator.load_schema(dir.path()).unwrap());
    assert_eq!(schema.as_ref(), dataset.schema().as_ref());
    let reloaded = creator.load_model(dir.path(), schema).unwrap();
    assert_eq!(reloaded.num_iterations(), model.num_iterations());
    assert_eq!(reloaded.feature_names(), model.feature_names());
    assert_eq!(reloaded.feature_names()[3], "card_type");
    for instance in dataset.as_slice() {
        assert_eq!(
            reloaded.class_distribution(instance).unwrap(),
            model.class_distribution(instance).unwrap()
        );
    }
}

#[test]
fn test_schema_mismatch_is_rejected() {
    let creator = ModelCreator::new().unwrap();
    let dataset = fraud_dataset(LabelPosition::End, 200, 8);
    let model = creator.fit(&dataset, 0, &quick_params()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    model.save(dir.path()).unwrap();

    let fewer = Arc::new(
        DatasetSchema::new(
            vec![
                FieldSchema::numeric("amount", 0),
                FieldSchema::categorical("fraud", 1, ["false", "true"]),
            ],
            Some(1),
        )
        .unwrap(),
    );
    let err = creator.load_model(dir.path(), fewer).unwrap_err();
    assert!(matches!(err, ProviderError::ModelLoading { .. }));
    assert!(err.to_string().contains(ERROR_MSG_SCHEMA_WITH_WRONG_PREDICTIVE_FIELDS_SIZE));

    let renamed = Arc::new(
        DatasetSchema::new(
            vec![
                FieldSchema::numeric("hour", 0),
                FieldSchema::categorical("merchant", 1, ["A", "B", "C"]),
                FieldSchema::numeric("amount", 2),
                FieldSchema::categorical("card type", 3, ["credit", "debit"]),
                FieldSchema::categorical("fraud", 4, ["false", "true"]),
            ],
            Some(4),
        )
        .unwrap(),
    );
    let err = creator.load_model(dir.path(), renamed).unwrap_err();
    assert!(err.to_string().contains(ERROR_MSG_SCHEMA_WITH_WRONG_PREDICTIVE_FIELD_NAMES));

    let missing = creator
        .load_model(&dir.path().join("absent"), Arc::clone(dataset.schema()))
        .unwrap_err();
    assert!(missing.to_string().contains("Cannot find model file"));
}

#[test]
fn test_wrong_feature_order_scores_but_diverges() {
    let creator = ModelCreator::new().unwrap();
    let dataset = fraud_dataset(LabelPosition::End, 500, 13);
    let model = creator.fit(&dataset, 0, &quick_params()).unwrap();
    let schema = dataset.schema();

    let mut diverging = 0;
    let rows = fraud_rows(200, 99);
    for (predictive, label) in &rows {
        let right = to_instance(schema, predictive, *label);
        let swapped = vec![predictive[2], predictive[1], predictive[0], predictive[3]];
        let wrong = to_instance(schema, &swapped, *label);
        let expected = model.class_distribution(&right).unwrap()[1];
        let actual = model.class_distribution(&wrong).unwrap()[1];
        if (expected - actual).abs() > 1e-6 {
            diverging += 1;
        }
    }
    assert!(diverging > rows.len() / 10, "only {} scores diverged", diverging);
}

#[test]
fn test_amount_drives_the_score() {
    let schema = Arc::new(
        DatasetSchema::new(
            vec![
                FieldSchema::numeric("amount", 0),
                FieldSchema::categorical("merchant", 1, ["A", "B"]),
                FieldSchema::categorical("label", 2, ["0", "1"]),
            ],
            Some(2),
        )
        .unwrap(),
    );
    let mut rng = StdRng::seed_from_u64(2024);
    let instances: Vec<_> = (0..1000)
        .map(|i| {
            let label = (i % 2) as f64;
            let amount = if label == 1.0 {
                rng.gen_range(500.0..1000.0)
            } else {
                rng.gen_range(0.0..600.0)
            };
            vec![amount, rng.gen_range(0..2) as f64, label].into()
        })
        .collect();
    let dataset = InMemoryDataset::new(Arc::clone(&schema), instances).unwrap();

    let creator = ModelCreator::new().unwrap();
    let model = creator.fit(&dataset, 0, &quick_params()).unwrap();

    let (mut positive, mut negative) = (Vec::new(), Vec::new());
    for instance in dataset.as_slice() {
        let score = model.class_distribution(instance).unwrap()[1];
        if instance.values()[2] == 1.0 {
            positive.push(score);
        } else {
            negative.push(score);
        }
    }
    let mean = |scores: &[f64]| scores.iter().sum::<f64>() / scores.len() as f64;
    assert!(mean(&positive) > mean(&negative));
}

#[test]
fn test_contributions_follow_the_label() {
    let creator = ModelCreator::new().unwrap();
    for position in ALL_LABEL_POSITIONS {
        let dataset = fraud_dataset(position, 600, 31);
        let model = Arc::new(creator.fit(&dataset, 0, &quick_params()).unwrap());
        let explainer = FeatureContributionExplainer::new(Arc::clone(&model));
        let schema = dataset.schema();

        // Late hour is the strongest fraud signal.
        let late = to_instance(schema, &[100.0, 0.0, 23.0, 0.0], 0.0);
        let early = to_instance(schema, &[100.0, 0.0, 3.0, 0.0], 0.0);
        let late_contributions = explainer.feature_contributions(&late).unwrap();
        let early_contributions = explainer.feature_contributions(&early).unwrap();
        assert_eq!(late_contributions.len(), model.num_features());
        assert!(late_contributions[2] > 0.0, "{:?}", position);
        assert!(early_contributions[2] < late_contributions[2], "{:?}", position);
    }
}

#[test]
fn test_non_ascii_feature_names() {
    let schema = Arc::new(
        DatasetSchema::new(
            vec![
                FieldSchema::numeric("montante em €", 0),
                FieldSchema::numeric("número", 1),
                FieldSchema::categorical("fraude", 2, ["não", "sim"]),
            ],
            Some(2),
        )
        .unwrap(),
    );
    let instances = (0..200)
        .map(|i| vec![i as f64, (i % 7) as f64, if i >= 100 { 1.0 } else { 0.0 }].into())
        .collect();
    let dataset = InMemoryDataset::new(Arc::clone(&schema), instances).unwrap();

    let creator = ModelCreator::new().unwrap();
    let model = creator.fit(&dataset, 0, &quick_params()).unwrap();
    assert_eq!(model.feature_names(), ["montante_em_€", "número"]);

    let dir = tempfile::tempdir().unwrap();
    model.save(dir.path()).unwrap();
    let reloaded = creator.load_model(dir.path(), schema).unwrap();
    assert_eq!(reloaded.feature_names(), model.feature_names());
}

#[test]
fn test_closed_model_fails_to_score() {
    let creator = ModelCreator::new().unwrap();
    let dataset = fraud_dataset(LabelPosition::Start, 100, 2);
    let model = creator.fit(&dataset, 0, &quick_params()).unwrap();
    let instance = &dataset.as_slice()[0];
    assert!(model.class_distribution(instance).is_ok());
    model.close();
    model.close();
    assert!(model.class_distribution(instance).is_err());
}

#[test]
fn test_non_binary_model_is_rejected() {
    let creator = ModelCreator::new().unwrap();
    let dataset = fraud_dataset(LabelPosition::End, 200, 17);
    let model = creator.fit(&dataset, 0, &quick_params()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    model.save(dir.path()).unwrap();

    let path = dir.path().join(MODEL_BINARY_RESOURCE_FILE_NAME);
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("num_class=1\n"));
    std::fs::write(&path, text.replacen("num_class=1\n", "num_class=2\n", 1)).unwrap();

    let err = creator.load_model(dir.path(), Arc::clone(dataset.schema())).unwrap_err();
    assert!(matches!(err, ProviderError::ModelLoading { .. }));
    assert!(err.to_string().contains(ERROR_MSG_CANNOT_LOAD_NON_BINARY_LIGHTGBM_MODEL));
}

#[test]
fn test_concurrent_scoring_matches_sequential() {
    let creator = ModelCreator::new().unwrap();
    let dataset = Arc::new(fraud_dataset(LabelPosition::Middle, 300, 23));
    let model = Arc::new(creator.fit(&*dataset, 0, &quick_params()).unwrap());
    let baseline: Vec<[f64; 2]> = dataset
        .as_slice()
        .iter()
        .map(|instance| model.class_distribution(instance).unwrap())
        .collect();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let model = Arc::clone(&model);
            let dataset = Arc::clone(&dataset);
            thread::spawn(move || {
                dataset
                    .as_slice()
                    .iter()
                    .map(|instance| model.class_distribution(instance).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), baseline);
    }
}

/// Instance whose values cannot be read.
struct Unreadable;

impl Instance for Unreadable {
    fn value(&self, _field_index: usize) -> f64 {
        panic!("unreadable instance");
    }

    fn num_values(&self) -> usize {
        5
    }
}

#[test]
fn test_bad_instances_do_not_disable_the_model() {
    let creator = ModelCreator::new().unwrap();
    let dataset = fraud_dataset(LabelPosition::End, 200, 29);
    let model = Arc::new(creator.fit(&dataset, 0, &quick_params()).unwrap());
    let valid = &dataset.as_slice()[0];
    let expected = model.class_distribution(valid).unwrap();

    let short = model.class_distribution(&[1.0, 2.0][..]).unwrap_err();
    assert!(matches!(short, ProviderError::Schema { .. }));
    assert!(model.feature_contributions(&[1.0, 2.0][..]).is_err());

    let panicking = Arc::clone(&model);
    let outcome = thread::spawn(move || panicking.class_distribution(&Unreadable)).join();
    assert!(outcome.is_err());

    assert_eq!(model.class_distribution(valid).unwrap(), expected);
    assert_eq!(model.feature_contributions(valid).unwrap().len(), model.num_features());
}
