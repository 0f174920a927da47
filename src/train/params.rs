//! Translation of provider parameters and schema into the engine's
//! parameter string and feature layout.
//!
//! Feature indices seen by the engine skip the target field, so every index
//! taken from the schema goes through [`remap_index_excluding_label`].

use crate::config::Params;
use crate::core::constants::{
    param_names, COL_NAME_PREFIX, CONSTRAINED_OBJECTIVE_PREFIX, DEFAULT_OBJECTIVE,
    DEFAULT_SOFT_LABEL_OBJECTIVE, OBJECTIVE_ALIASES,
};
use crate::schema::{DatasetSchema, ValueSchema};
use std::collections::BTreeMap;

/// Index of a field once the target column is removed.
pub fn remap_index_excluding_label(original_index: usize, label_index: usize) -> usize {
    if original_index > label_index {
        original_index - 1
    } else {
        original_index
    }
}

/// Objective set under any of its aliases.
///
/// Aliases are tried in the engine's order, so `objective` wins over `loss`.
pub fn objective_from_params(params: &Params) -> Option<String> {
    OBJECTIVE_ALIASES
        .iter()
        .find_map(|alias| params.get(*alias))
        .map(|value| value.trim().to_string())
}

/// Name of the soft-label column; empty values mean none.
pub fn soft_label_field_name(params: &Params) -> Option<String> {
    params
        .get(param_names::SOFT_LABEL)
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Whether training replaces the target with a soft label.
pub fn uses_soft_label(params: &Params) -> bool {
    soft_label_field_name(params).is_some()
}

/// Case-insensitive lookup of a predictive field's schema index.
pub fn column_index(name: &str, schema: &DatasetSchema) -> Option<usize> {
    let found = schema
        .predictive_fields()
        .into_iter()
        .find(|field| field.name.eq_ignore_ascii_case(name))
        .map(|field| field.index);
    if found.is_none() {
        log::error!("Column {} was not found in the dataset.", name);
    }
    found
}

fn field_index_without_label(name: &str, schema: &DatasetSchema) -> Option<usize> {
    let index = column_index(name, schema)?;
    Some(match schema.target_index() {
        Some(label) => remap_index_excluding_label(index, label),
        None => index,
    })
}

/// Schema index of the soft-label column.
pub fn soft_label_column_index(params: &Params, schema: &DatasetSchema) -> Option<usize> {
    column_index(&soft_label_field_name(params)?, schema)
}

/// Engine feature index of the soft-label column.
pub fn soft_label_field_index_without_label(params: &Params, schema: &DatasetSchema) -> Option<usize> {
    field_index_without_label(&soft_label_field_name(params)?, schema)
}

/// Whether the objective is a fairness-constrained one.
pub fn is_fairness_constrained(params: &Params) -> bool {
    objective_from_params(params)
        .is_some_and(|objective| objective.starts_with(CONSTRAINED_OBJECTIVE_PREFIX))
}

/// Schema index of the constraint group column.
///
/// Accepts a bare column name or `name:<column>`. A column that does not
/// exist or is not categorical is logged and ignored.
pub fn constraint_group_column_index(params: &Params, schema: &DatasetSchema) -> Option<usize> {
    let raw = params.get(param_names::CONSTRAINT_GROUP_COLUMN)?.trim();
    if raw.is_empty() {
        return None;
    }
    let column = raw.strip_prefix(COL_NAME_PREFIX).unwrap_or(raw);

    let field = schema
        .predictive_fields()
        .into_iter()
        .find(|field| field.name.eq_ignore_ascii_case(column));
    let Some(field) = field else {
        log::error!(
            "The parameter {}={} is invalid; no such column was found.",
            param_names::CONSTRAINT_GROUP_COLUMN,
            column
        );
        return None;
    };
    if !matches!(field.value_schema, ValueSchema::Categorical { .. }) {
        log::error!(
            "The parameter {}={} is invalid; expected a column in categorical format, got {} format.",
            param_names::CONSTRAINT_GROUP_COLUMN,
            column,
            field.value_schema.kind_name()
        );
        return None;
    }
    Some(field.index)
}

/// Engine feature index of the constraint group column.
pub fn constraint_group_column_index_without_label(
    params: &Params,
    schema: &DatasetSchema,
) -> Option<usize> {
    let index = constraint_group_column_index(params, schema)?;
    Some(match schema.target_index() {
        Some(label) => remap_index_excluding_label(index, label),
        None => index,
    })
}

/// Engine indices of every categorical predictive field.
pub fn categorical_feature_indices_without_label(schema: &DatasetSchema) -> Vec<usize> {
    let label = schema.target_index();
    schema
        .predictive_fields()
        .into_iter()
        .filter(|field| field.value_schema.is_categorical())
        .map(|field| match label {
            Some(label) => remap_index_excluding_label(field.index, label),
            None => field.index,
        })
        .collect()
}

/// Flatten the caller's parameters into the engine's `key=value` string.
///
/// Adds the categorical feature list, a default objective and the remapped
/// constraint group column; `soft_label` is consumed here and never reaches
/// the engine. Keys come out sorted.
pub fn train_params_string(params: &Params, schema: &DatasetSchema) -> String {
    let mut engine_params: BTreeMap<String, String> = BTreeMap::new();

    let categorical = categorical_feature_indices_without_label(schema)
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",");
    engine_params.insert(param_names::CATEGORICAL_FEATURE.to_string(), categorical);

    if objective_from_params(params).is_none() {
        let objective = if uses_soft_label(params) {
            DEFAULT_SOFT_LABEL_OBJECTIVE
        } else {
            DEFAULT_OBJECTIVE
        };
        engine_params.insert(param_names::OBJECTIVE.to_string(), objective.to_string());
    }

    if let Some(index) = constraint_group_column_index_without_label(params, schema) {
        engine_params.insert(
            param_names::CONSTRAINT_GROUP_COLUMN.to_string(),
            index.to_string(),
        );
    }

    for (key, value) in params {
        if key == param_names::SOFT_LABEL {
            continue;
        }
        engine_params
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }

    engine_params
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Predictive fields used as features, without the soft label.
pub fn num_actual_features(schema: &DatasetSchema, params: &Params) -> usize {
    actual_feature_names(schema, params).len()
}

/// Names of the predictive fields used as features, without the soft label.
pub fn actual_feature_names(schema: &DatasetSchema, params: &Params) -> Vec<String> {
    let soft_label = soft_label_field_name(params);
    schema
        .predictive_fields()
        .into_iter()
        .filter(|field| soft_label.as_deref() != Some(field.name.as_str()))
        .map(|field| field.name.clone())
        .collect()
}

/// Integer parameter with a fallback when absent or unparsable.
pub fn int_param(params: &Params, name: &str, default: i64) -> i64 {
    params
        .get(name)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;

    fn schema() -> DatasetSchema {
        DatasetSchema::new(
            vec![
                FieldSchema::numeric("amount", 0),
                FieldSchema::categorical("label", 1, ["0", "1"]),
                FieldSchema::categorical("merchant", 2, ["A", "B", "C"]),
                FieldSchema::categorical("Group", 3, ["x", "y"]),
                FieldSchema::numeric("score", 4),
            ],
            Some(1),
        )
        .unwrap()
    }

    fn params(entries: &[(&str, &str)]) -> Params {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_remap_index() {
        assert_eq!(remap_index_excluding_label(0, 1), 0);
        assert_eq!(remap_index_excluding_label(2, 1), 1);
        assert_eq!(remap_index_excluding_label(1, 1), 1);
    }

    #[test]
    fn test_objective_aliases() {
        assert_eq!(objective_from_params(&params(&[])), None);
        assert_eq!(
            objective_from_params(&params(&[("application", "cross_entropy")])).as_deref(),
            Some("cross_entropy")
        );
        assert!(is_fairness_constrained(&params(&[("loss", "constrained_cross_entropy")])));
        assert!(!is_fairness_constrained(&params(&[("objective", "binary")])));
    }

    #[test]
    fn test_soft_label_name_trimmed() {
        assert_eq!(soft_label_field_name(&params(&[("soft_label", "  ")])), None);
        assert_eq!(
            soft_label_field_name(&params(&[("soft_label", " score ")])).as_deref(),
            Some("score")
        );
        let p = params(&[("soft_label", "score")]);
        assert_eq!(soft_label_column_index(&p, &schema()), Some(4));
        assert_eq!(soft_label_field_index_without_label(&p, &schema()), Some(3));
    }

    #[test]
    fn test_constraint_group_forms() {
        let schema = schema();
        for value in ["group", "name:Group", " name:GROUP "] {
            let p = params(&[("constraint_group_column", value)]);
            assert_eq!(constraint_group_column_index(&p, &schema), Some(3), "{}", value);
            assert_eq!(constraint_group_column_index_without_label(&p, &schema), Some(2));
        }
    }

    #[test]
    fn test_constraint_group_invalid_is_none() {
        let schema = schema();
        assert_eq!(
            constraint_group_column_index(&params(&[("constraint_group_column", "missing")]), &schema),
            None
        );
        assert_eq!(
            constraint_group_column_index(&params(&[("constraint_group_column", "amount")]), &schema),
            None
        );
        assert_eq!(
            constraint_group_column_index(&params(&[("constraint_group_column", "label")]), &schema),
            None
        );
    }

    #[test]
    fn test_train_params_string() {
        let p = params(&[
            ("num_iterations", "10"),
            ("soft_label", ""),
            ("categorical_feature", "9"),
            ("constraint_group_column", "name:group"),
        ]);
        assert_eq!(
            train_params_string(&p, &schema()),
            "categorical_feature=1,2 constraint_group_column=2 num_iterations=10 objective=binary"
        );
    }

    #[test]
    fn test_soft_label_default_objective() {
        let p = params(&[("soft_label", "score")]);
        let s = train_params_string(&p, &schema());
        assert!(s.contains("objective=cross_entropy"));
        assert!(!s.contains("soft_label"));

        let p = params(&[("soft_label", "score"), ("app", "binary")]);
        let s = train_params_string(&p, &schema());
        assert!(s.contains("app=binary"));
        assert!(!s.contains("objective="));
    }

    #[test]
    fn test_actual_features() {
        let schema = schema();
        assert_eq!(num_actual_features(&schema, &params(&[])), 4);
        let p = params(&[("soft_label", "score")]);
        assert_eq!(actual_feature_names(&schema, &p), vec!["amount", "merchant", "Group"]);
        assert_eq!(num_actual_features(&schema, &p), 3);
    }

    #[test]
    fn test_int_param() {
        let p = params(&[("num_iterations", " 12 "), ("bad", "x")]);
        assert_eq!(int_param(&p, "num_iterations", 100), 12);
        assert_eq!(int_param(&p, "bad", 5), 5);
        assert_eq!(int_param(&p, "missing", 7), 7);
    }
}
