//! Training parameters for the LightGBM binary classifier.
//!
//! Parameters travel as a string-to-string map ([`Params`]) until they are
//! flattened into the native `"key=value key=value"` form. This module owns
//! the catalog of recognized parameters with their defaults and ranges
//! ([`validation`]) and loading parameter maps from JSON or TOML files.

pub mod validation;

pub use validation::{
    check_params, ParamKind, ParamSpec, ParamValidationError, BOOSTING_TYPES,
    LIGHTGBM_BINARY_CLASSIFIER_PARAMS,
};

use crate::core::error::{ProviderError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Training parameter map, name to string value.
pub type Params = BTreeMap<String, String>;

/// Every catalog parameter that has a default, at its default value.
pub fn default_params() -> Params {
    LIGHTGBM_BINARY_CLASSIFIER_PARAMS
        .iter()
        .filter_map(|spec| {
            spec.default
                .map(|value| (spec.name.to_string(), value.to_string()))
        })
        .collect()
}

/// Defaults overridden by the given entries.
pub fn params_with_overrides<I, K, V>(overrides: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut params = default_params();
    for (key, value) in overrides {
        params.insert(key.into(), value.into());
    }
    params
}

/// Load a flat parameter table from a `.json` or `.toml` file.
///
/// Numbers and booleans are converted to their string form.
pub fn load_params_from_file<P: AsRef<Path>>(path: P) -> Result<Params> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let table: BTreeMap<String, serde_json::Value> = serde_json::from_str(&content)?;
            table
                .into_iter()
                .map(|(key, value)| {
                    let text = match value {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Number(n) => n.to_string(),
                        serde_json::Value::Bool(b) => b.to_string(),
                        other => {
                            return Err(ProviderError::invalid_parameter(
                                key,
                                other.to_string(),
                                "expected a scalar value",
                            ))
                        }
                    };
                    Ok((key, text))
                })
                .collect()
        }
        Some("toml") => {
            let table: BTreeMap<String, toml::Value> = toml::from_str(&content)?;
            table
                .into_iter()
                .map(|(key, value)| {
                    let text = match value {
                        toml::Value::String(s) => s,
                        toml::Value::Integer(i) => i.to_string(),
                        toml::Value::Float(f) => f.to_string(),
                        toml::Value::Boolean(b) => b.to_string(),
                        other => {
                            return Err(ProviderError::invalid_parameter(
                                key,
                                other.to_string(),
                                "expected a scalar value",
                            ))
                        }
                    };
                    Ok((key, text))
                })
                .collect()
        }
        _ => Err(ProviderError::serialization(
            "Unsupported parameter file format. Use .json or .toml",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_params() {
        let params = default_params();
        assert_eq!(params.get("boosting_type").map(String::as_str), Some("gbdt"));
        assert_eq!(params.get("num_iterations").map(String::as_str), Some("100"));
        assert_eq!(params.get("soft_label").map(String::as_str), Some(""));
    }

    #[test]
    fn test_overrides() {
        let params = params_with_overrides([("num_iterations", "7")]);
        assert_eq!(params["num_iterations"], "7");
        assert_eq!(params["learning_rate"], "0.1");
    }

    #[test]
    fn test_load_json_params() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"num_iterations": 10, "boosting_type": "rf", "is_unbalance": true}}"#).unwrap();
        let params = load_params_from_file(file.path()).unwrap();
        assert_eq!(params["num_iterations"], "10");
        assert_eq!(params["boosting_type"], "rf");
        assert_eq!(params["is_unbalance"], "true");
    }

    #[test]
    fn test_load_toml_params() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "learning_rate = 0.05").unwrap();
        writeln!(file, "num_leaves = 15").unwrap();
        let params = load_params_from_file(file.path()).unwrap();
        assert_eq!(params["learning_rate"], "0.05");
        assert_eq!(params["num_leaves"], "15");
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(load_params_from_file(file.path()).is_err());
    }
}
