//! Validation gate, parameter file and platform detection tests.

use lightgbm_provider::config::{default_params, load_params_from_file, params_with_overrides};
use lightgbm_provider::core::constants::{
    ERROR_MSG_NON_BINARY_TARGET, ERROR_MSG_RANDOM_FOREST_REQUIRES_BAGGING, ERROR_MSG_SCHEMA_HAS_STRING_FIELDS,
    MODEL_BINARY_RESOURCE_FILE_NAME,
};
use lightgbm_provider::provider::ModelCreator;
use lightgbm_provider::schema::{DatasetSchema, FieldSchema};
use lightgbm_provider::train::train_params_string;
use lightgbm_provider::{CpuArchitecture, Infrastructure, LibcImplementation};
use std::path::Path;

mod common;
use common::*;

fn messages(errors: &[lightgbm_provider::ParamValidationError]) -> Vec<String> {
    errors.iter().map(|e| e.to_string()).collect()
}

#[test]
fn test_valid_fit_request_has_no_errors() {
    let creator = ModelCreator::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let schema = fraud_schema(LabelPosition::Middle);
    let errors = creator.validate_for_fit(dir.path(), &schema, &default_params());
    assert!(errors.is_empty(), "{:?}", messages(&errors));
}

#[test]
fn test_random_forest_requires_bagging() {
    let creator = ModelCreator::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let schema = fraud_schema(LabelPosition::End);

    let no_bagging = params_with_overrides([("boosting_type", "rf")]);
    let errors = messages(&creator.validate_for_fit(dir.path(), &schema, &no_bagging));
    assert!(errors.iter().any(|m| m.contains(ERROR_MSG_RANDOM_FOREST_REQUIRES_BAGGING)));

    let bagging = params_with_overrides([
        ("boosting_type", "rf"),
        ("bagging_fraction", "0.5"),
        ("bagging_freq", "1"),
    ]);
    let errors = creator.validate_for_fit(dir.path(), &schema, &bagging);
    assert!(errors.is_empty(), "{:?}", messages(&errors));
}

#[test]
fn test_invalid_schemas_are_reported() {
    let creator = ModelCreator::new().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let with_string = DatasetSchema::new(
        vec![
            FieldSchema::string("comment", 0),
            FieldSchema::categorical("fraud", 1, ["false", "true"]),
        ],
        Some(1),
    )
    .unwrap();
    let errors = messages(&creator.validate_for_fit(dir.path(), &with_string, &default_params()));
    assert!(errors.iter().any(|m| m.contains(ERROR_MSG_SCHEMA_HAS_STRING_FIELDS)));

    let three_classes = DatasetSchema::new(
        vec![
            FieldSchema::numeric("amount", 0),
            FieldSchema::categorical("fraud", 1, ["no", "maybe", "yes"]),
        ],
        Some(1),
    )
    .unwrap();
    let errors = messages(&creator.validate_for_fit(dir.path(), &three_classes, &default_params()));
    assert!(errors.iter().any(|m| m.contains(ERROR_MSG_NON_BINARY_TARGET)));

    let no_target = DatasetSchema::new(vec![FieldSchema::numeric("amount", 0)], None).unwrap();
    let errors = creator.validate_for_fit(dir.path(), &no_target, &default_params());
    assert!(!errors.is_empty());
}

#[test]
fn test_out_of_range_params_are_reported() {
    let creator = ModelCreator::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let schema = fraud_schema(LabelPosition::Start);
    let params = params_with_overrides([("num_iterations", "-3"), ("boosting_type", "xgboost")]);
    let errors = creator.validate_for_fit(dir.path(), &schema, &params);
    assert!(errors.len() >= 2, "{:?}", messages(&errors));
}

#[test]
fn test_persist_path_must_be_a_directory() {
    let creator = ModelCreator::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not_a_dir");
    std::fs::write(&file, "x").unwrap();
    let schema = fraud_schema(LabelPosition::End);
    assert!(!creator.validate_for_fit(&file, &schema, &default_params()).is_empty());

    let nested = dir.path().join("a").join("b");
    assert!(creator.validate_for_fit(&nested, &schema, &default_params()).is_empty());
    assert!(nested.is_dir());
}

#[test]
fn test_validate_for_load() {
    let creator = ModelCreator::new().unwrap();
    let schema = fraud_schema(LabelPosition::End);
    let dir = tempfile::tempdir().unwrap();

    let missing = messages(&creator.validate_for_load(&dir.path().join("nope"), &schema, &default_params()));
    assert_eq!(missing, ["Cannot find model file in filesystem."]);

    let empty_dir = messages(&creator.validate_for_load(dir.path(), &schema, &default_params()));
    assert_eq!(
        empty_dir,
        [format!("Cannot find model file {} inside folder.", MODEL_BINARY_RESOURCE_FILE_NAME)]
    );

    let dataset = fraud_dataset(LabelPosition::End, 100, 1);
    let model = creator.fit(&dataset, 0, &quick_params()).unwrap();
    model.save(dir.path()).unwrap();
    assert!(creator.validate_for_load(dir.path(), &schema, &default_params()).is_empty());
}

#[test]
fn test_load_schema_from_directory() {
    let creator = ModelCreator::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let schema = fraud_schema(LabelPosition::Middle);
    schema.to_json_file(dir.path().join("schema.json")).unwrap();
    assert_eq!(creator.load_schema(dir.path()).unwrap(), *schema);
    assert!(creator.load_schema(Path::new("/nonexistent/schema.json")).is_err());
}

#[test]
fn test_params_file_feeds_training() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("params.toml");
    std::fs::write(&path, "num_iterations = 7\nnum_leaves = 4\nboosting_type = \"gbdt\"\n").unwrap();
    let params = load_params_from_file(&path).unwrap();
    assert_eq!(params["num_iterations"], "7");

    let schema = fraud_schema(LabelPosition::Start);
    let line = train_params_string(&params, &schema);
    assert!(line.contains("num_iterations=7"));
    assert!(line.contains("objective=binary"));
    // merchant and card type, indices shifted past the leading label
    assert!(line.contains("categorical_feature=1,3"));
}

#[test]
fn test_infrastructure() {
    assert_eq!("arm64".parse::<CpuArchitecture>().unwrap(), CpuArchitecture::Aarch64);
    assert_eq!("x86_64".parse::<CpuArchitecture>().unwrap(), CpuArchitecture::Amd64);
    assert!("sparc".parse::<CpuArchitecture>().is_err());

    let musl = Infrastructure::new(CpuArchitecture::Amd64, LibcImplementation::Musl);
    assert_eq!(musl.native_libs_folder().unwrap(), "amd64/musl/");
    assert_eq!(musl.to_string(), "AMD64 with musl");
    let arm_musl = Infrastructure::new(CpuArchitecture::Aarch64, LibcImplementation::Musl);
    assert!(arm_musl.native_libs_folder().is_err());

    let creator = ModelCreator::new().unwrap();
    assert!(creator.infrastructure().native_libs_folder().is_ok());
}
