//! Parameter catalog and validation for the binary classifier.
//!
//! Validation collects every problem instead of stopping at the first one,
//! so callers can present the complete list at once.

use crate::config::Params;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Boosting types accepted by the native engine.
pub const BOOSTING_TYPES: &[&str] = &["gbdt", "rf", "dart", "goss"];

const CONSTRAINT_TYPES: &[&str] = &["FPR", "FNR", "FPR,FNR"];
const OBJECTIVES: &[&str] = &[
    "binary",
    "cross_entropy",
    "xentropy",
    "constrained_cross_entropy",
];
const STEPWISE_PROXIES: &[&str] = &["cross_entropy", "quadratic", "hinge"];
const OBJECTIVE_PROXIES: &[&str] = &["cross_entropy", "quadratic", "hinge", ""];

/// One validation problem, reported to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamValidationError {
    /// Human-readable message
    pub message: String,
}

impl ParamValidationError {
    /// Create a validation error.
    pub fn new<S: Into<String>>(message: S) -> Self {
        ParamValidationError {
            message: message.into(),
        }
    }
}

impl fmt::Display for ParamValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Accepted values of a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    /// Integer in `[min, max]`
    Int {
        /// Inclusive lower bound
        min: i64,
        /// Inclusive upper bound
        max: i64,
    },
    /// Float in `[min, max]`
    Float {
        /// Inclusive lower bound
        min: f64,
        /// Inclusive upper bound
        max: f64,
    },
    /// One of a fixed set of strings
    Choice(&'static [&'static str]),
    /// `true` or `false`
    Bool,
    /// Free text
    Text,
}

/// Declaration of one recognized parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    /// Parameter name
    pub name: &'static str,
    /// Accepted values
    pub kind: ParamKind,
    /// Default value, if the parameter has one
    pub default: Option<&'static str>,
    /// Whether the parameter must be present
    pub mandatory: bool,
}

const fn spec(name: &'static str, kind: ParamKind, default: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        default: Some(default),
        mandatory: false,
    }
}

const fn mandatory(name: &'static str, kind: ParamKind, default: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        default: Some(default),
        mandatory: true,
    }
}

const fn optional(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        default: None,
        mandatory: false,
    }
}

const INT_MAX: i64 = i32::MAX as i64;

/// Parameters recognized for the LightGBM binary classifier, including the
/// fairness-constrained variant.
pub const LIGHTGBM_BINARY_CLASSIFIER_PARAMS: &[ParamSpec] = &[
    // Core parameters
    mandatory("boosting_type", ParamKind::Choice(BOOSTING_TYPES), "gbdt"),
    mandatory("num_iterations", ParamKind::Int { min: 0, max: INT_MAX }, "100"),
    spec("learning_rate", ParamKind::Float { min: 1e-99, max: f32::MAX as f64 }, "0.1"),
    spec("num_leaves", ParamKind::Int { min: 1, max: 131_072 }, "31"),
    spec("seed", ParamKind::Int { min: 0, max: INT_MAX }, "0"),
    optional("objective", ParamKind::Choice(OBJECTIVES)),
    optional("num_threads", ParamKind::Int { min: i32::MIN as i64, max: INT_MAX }),
    // Learning control
    spec("max_depth", ParamKind::Int { min: -1, max: INT_MAX }, "-1"),
    spec("min_data_in_leaf", ParamKind::Int { min: 0, max: INT_MAX }, "20"),
    spec("min_sum_hessian_in_leaf", ParamKind::Float { min: 0.0, max: f64::MAX }, "1e-3"),
    spec("bagging_fraction", ParamKind::Float { min: 1e-20, max: 1.0 }, "1.0"),
    spec("bagging_freq", ParamKind::Int { min: 0, max: INT_MAX }, "0"),
    spec("feature_fraction", ParamKind::Float { min: 1e-4, max: 1.0 }, "1.0"),
    spec("feature_fraction_bynode", ParamKind::Float { min: 1e-4, max: 1.0 }, "1.0"),
    spec("lambda_l1", ParamKind::Float { min: 0.0, max: f64::MAX }, "0.0"),
    spec("lambda_l2", ParamKind::Float { min: 0.0, max: f64::MAX }, "0.0"),
    spec("min_gain_to_split", ParamKind::Float { min: 0.0, max: f64::MAX }, "0.0"),
    // DART
    spec("drop_rate", ParamKind::Float { min: 0.0, max: 1.0 }, "0.1"),
    spec("max_drop", ParamKind::Int { min: -1, max: INT_MAX }, "50"),
    spec("skip_drop", ParamKind::Float { min: 0.0, max: 1.0 }, "0.5"),
    spec("xgboost_dart_mode", ParamKind::Bool, "false"),
    spec("uniform_drop", ParamKind::Bool, "false"),
    // GOSS
    spec("top_rate", ParamKind::Float { min: 0.0, max: 1.0 }, "0.2"),
    spec("other_rate", ParamKind::Float { min: 0.0, max: 1.0 }, "0.1"),
    // Categorical handling
    spec("min_data_per_group", ParamKind::Int { min: 1, max: INT_MAX }, "100"),
    spec("max_cat_threshold", ParamKind::Int { min: 1, max: INT_MAX }, "32"),
    spec("cat_l2", ParamKind::Float { min: 0.0, max: f64::MAX }, "10.0"),
    spec("cat_smooth", ParamKind::Float { min: 0.0, max: f64::MAX }, "10.0"),
    spec("max_cat_to_onehot", ParamKind::Int { min: 1, max: INT_MAX }, "4"),
    spec("verbosity", ParamKind::Int { min: i32::MIN as i64, max: INT_MAX }, "1"),
    // Dataset
    spec("max_bin", ParamKind::Int { min: 2, max: INT_MAX }, "255"),
    spec("min_data_in_bin", ParamKind::Int { min: 1, max: INT_MAX }, "3"),
    spec("bin_construct_sample_cnt", ParamKind::Int { min: 1, max: INT_MAX }, "200000"),
    spec("enable_bundle", ParamKind::Bool, "true"),
    spec("zero_as_missing", ParamKind::Bool, "false"),
    mandatory("is_unbalance", ParamKind::Bool, "false"),
    optional("scale_pos_weight", ParamKind::Float { min: 0.0, max: f64::MAX }),
    // Soft labels
    spec("soft_label", ParamKind::Text, ""),
    // Fairness constraints
    spec("constraint_group_column", ParamKind::Text, ""),
    spec("constraint_type", ParamKind::Choice(CONSTRAINT_TYPES), "FPR"),
    spec("constraint_fpr_threshold", ParamKind::Float { min: 0.0, max: 1.0 }, "0.0"),
    spec("constraint_fnr_threshold", ParamKind::Float { min: 0.0, max: 1.0 }, "0.0"),
    spec("multiplier_learning_rate", ParamKind::Float { min: 1e-99, max: f64::MAX }, "0.1"),
    spec("init_multipliers", ParamKind::Text, ""),
    spec("constraint_stepwise_proxy", ParamKind::Choice(STEPWISE_PROXIES), "cross_entropy"),
    spec("objective_stepwise_proxy", ParamKind::Choice(OBJECTIVE_PROXIES), ""),
    spec("global_constraint_type", ParamKind::Choice(CONSTRAINT_TYPES), "FPR,FNR"),
    spec("global_target_fpr", ParamKind::Float { min: 0.0, max: 1.0 }, "0.05"),
    spec("global_target_fnr", ParamKind::Float { min: 0.0, max: 1.0 }, "0.5"),
];

/// Find the catalog entry for a parameter.
pub fn find_spec(name: &str) -> Option<&'static ParamSpec> {
    LIGHTGBM_BINARY_CLASSIFIER_PARAMS
        .iter()
        .find(|spec| spec.name == name)
}

/// Check a parameter map against the catalog.
///
/// Missing mandatory parameters and unparsable or out-of-range values are
/// errors. Names outside the catalog are passed through to the engine with a
/// warning.
pub fn check_params(params: &Params) -> Vec<ParamValidationError> {
    let mut errors = Vec::new();

    for spec in LIGHTGBM_BINARY_CLASSIFIER_PARAMS.iter().filter(|s| s.mandatory) {
        if !params.contains_key(spec.name) {
            errors.push(ParamValidationError::new(format!(
                "Missing mandatory parameter '{}'.",
                spec.name
            )));
        }
    }

    for (name, value) in params {
        match find_spec(name) {
            Some(spec) => {
                if let Some(error) = check_value(spec, value) {
                    errors.push(error);
                }
            }
            None => log::warn!("Unknown parameter {}={} is passed to the engine as-is", name, value),
        }
    }

    errors
}

fn check_value(spec: &ParamSpec, value: &str) -> Option<ParamValidationError> {
    let value = value.trim();
    let problem = match spec.kind {
        ParamKind::Int { min, max } => match value.parse::<i64>() {
            Ok(v) if v < min || v > max => Some(format!("must be within [{}, {}]", min, max)),
            Ok(_) => None,
            Err(_) => Some("must be an integer".to_string()),
        },
        ParamKind::Float { min, max } => match value.parse::<f64>() {
            Ok(v) if !(min..=max).contains(&v) => {
                Some(format!("must be within [{:e}, {:e}]", min, max))
            }
            Ok(_) => None,
            Err(_) => Some("must be a number".to_string()),
        },
        ParamKind::Choice(choices) => {
            if choices.contains(&value) {
                None
            } else {
                Some(format!("must be one of {:?}", choices))
            }
        }
        ParamKind::Bool => match value {
            "true" | "false" => None,
            _ => Some("must be 'true' or 'false'".to_string()),
        },
        ParamKind::Text => None,
    };

    problem.map(|reason| {
        ParamValidationError::new(format!(
            "Invalid value '{}' for parameter '{}': {}.",
            value, spec.name, reason
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_params;

    #[test]
    fn test_defaults_are_valid() {
        assert!(check_params(&default_params()).is_empty());
    }

    #[test]
    fn test_all_errors_collected() {
        let mut params = default_params();
        params.insert("num_leaves".into(), "0".into());
        params.insert("bagging_fraction".into(), "abc".into());
        params.insert("boosting_type".into(), "xgb".into());
        params.remove("is_unbalance");

        let errors = check_params(&params);
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.message.contains("is_unbalance")));
        assert!(errors.iter().any(|e| e.message.contains("num_leaves")));
    }

    #[test]
    fn test_unknown_params_are_accepted() {
        let mut params = default_params();
        params.insert("some_engine_knob".into(), "3".into());
        assert!(check_params(&params).is_empty());
    }

    #[test]
    fn test_find_spec() {
        assert!(find_spec("max_bin").is_some());
        assert!(find_spec("nope").is_none());
    }
}
