//! Binned training dataset owned by the engine.

use crate::core::normalize_feature_name;
use crate::native::bin::{BinMapper, BinType};
use crate::native::config::EngineConfig;
use anyhow::{bail, Result};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::Arc;

/// Typed contents of a dataset field.
#[derive(Debug, Clone)]
pub enum FieldData {
    /// `f32` elements
    Float32(Vec<f32>),
    /// `f64` elements
    Float64(Vec<f64>),
    /// `i32` elements
    Int32(Vec<i32>),
}

impl FieldData {
    fn len(&self) -> usize {
        match self {
            FieldData::Float32(v) => v.len(),
            FieldData::Float64(v) => v.len(),
            FieldData::Int32(v) => v.len(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            FieldData::Float32(_) => "float32",
            FieldData::Float64(_) => "float64",
            FieldData::Int32(_) => "int32",
        }
    }
}

/// Immutable dataset contents shared with the boosters trained on it.
#[derive(Debug, Clone)]
pub struct DatasetCore {
    /// Number of rows
    pub num_data: usize,
    /// Number of feature columns
    pub num_features: usize,
    /// One mapper per feature column
    pub bin_mappers: Arc<Vec<BinMapper>>,
    /// Bin indices, one row per feature
    pub bins: Array2<u32>,
    /// Raw values, one row per instance
    pub raw: Array2<f64>,
    /// Labels, set through the `label` field
    pub labels: Option<Vec<f32>>,
    /// Instance weights, set through the `weight` field
    pub weights: Option<Vec<f32>>,
    /// Protected group per instance, set through the `constraint_group` field
    pub constraint_groups: Option<Vec<i32>>,
    /// Feature names
    pub feature_names: Vec<String>,
}

impl DatasetCore {
    /// Whether feature `feature` is categorical.
    pub fn is_categorical(&self, feature: usize) -> bool {
        self.bin_mappers[feature].bin_type() == BinType::Categorical
    }

    /// Labels; fails if they were never set.
    pub fn labels(&self) -> Result<&[f32]> {
        match &self.labels {
            Some(labels) => Ok(labels),
            None => bail!("Label should be set before training"),
        }
    }

    /// The `feature_infos` entries of a model file.
    pub fn feature_infos(&self) -> Vec<String> {
        self.bin_mappers.iter().map(BinMapper::feature_info).collect()
    }
}

/// Dataset behind a `DatasetHandle`.
#[derive(Debug, Clone)]
pub struct EngineDataset {
    core: Arc<DatasetCore>,
}

impl EngineDataset {
    /// Bin a dense matrix (`num_data x num_features`).
    ///
    /// Bin mappers come from `reference` when given, otherwise they are
    /// constructed from up to `bin_construct_sample_cnt` sampled rows, one
    /// feature per rayon task.
    pub fn from_matrix(
        raw: Array2<f64>,
        config: &EngineConfig,
        reference: Option<&EngineDataset>,
    ) -> Result<Self> {
        let (num_data, num_features) = raw.dim();
        if num_data == 0 {
            bail!("Cannot construct a dataset with 0 rows");
        }
        if num_features == 0 {
            bail!("Cannot construct a dataset with 0 features");
        }

        let bin_mappers = match reference {
            Some(reference) => {
                if reference.num_features() != num_features {
                    bail!(
                        "Reference dataset has {} features, data has {}",
                        reference.num_features(),
                        num_features
                    );
                }
                Arc::clone(&reference.core.bin_mappers)
            }
            None => Arc::new(construct_bin_mappers(&raw, config)),
        };

        let columns: Vec<Vec<u32>> = (0..num_features)
            .into_par_iter()
            .map(|feature| {
                let mapper = &bin_mappers[feature];
                raw.column(feature)
                    .iter()
                    .map(|&value| mapper.value_to_bin(value))
                    .collect()
            })
            .collect();
        let bins = Array2::from_shape_vec((num_features, num_data), columns.concat())?;

        let usable = bin_mappers.iter().filter(|m| !m.is_trivial()).count();
        if usable == 0 {
            log::warn!("There are no meaningful features which satisfy the provided configuration");
        }
        log::debug!(
            "Constructed dataset with {} rows, {} features ({} usable)",
            num_data,
            num_features,
            usable
        );

        let feature_names = (0..num_features).map(|i| format!("Column_{}", i)).collect();
        Ok(EngineDataset {
            core: Arc::new(DatasetCore {
                num_data,
                num_features,
                bin_mappers,
                bins,
                raw,
                labels: None,
                weights: None,
                constraint_groups: None,
                feature_names,
            }),
        })
    }

    /// Number of rows.
    pub fn num_data(&self) -> usize {
        self.core.num_data
    }

    /// Number of feature columns.
    pub fn num_features(&self) -> usize {
        self.core.num_features
    }

    /// Shared contents, for boosters.
    pub fn core(&self) -> Arc<DatasetCore> {
        Arc::clone(&self.core)
    }

    /// Set `label`, `weight` or `constraint_group`.
    pub fn set_field(&mut self, name: &str, data: FieldData) -> Result<()> {
        if data.len() != self.num_data() {
            bail!(
                "Length of {} ({}) is not same with #data ({})",
                name,
                data.len(),
                self.num_data()
            );
        }
        let core = Arc::make_mut(&mut self.core);
        match (name, data) {
            ("label", FieldData::Float32(values)) => core.labels = Some(values),
            ("weight", FieldData::Float32(values)) => {
                if values.iter().any(|w| *w < 0.0 || w.is_nan()) {
                    bail!("Weights should be non-negative");
                }
                core.weights = Some(values)
            }
            ("constraint_group", FieldData::Int32(values)) => core.constraint_groups = Some(values),
            ("label" | "weight" | "constraint_group", other) => {
                bail!("Type of {} field should be {}, got {}", name, expected_type(name), other.type_name())
            }
            _ => bail!("Unknown field name: {}", name),
        }
        Ok(())
    }

    /// Replace the default `Column_i` names.
    ///
    /// Whitespace inside a name becomes `_`; JSON special characters are
    /// rejected.
    pub fn set_feature_names(&mut self, names: &[String]) -> Result<()> {
        if names.len() != self.num_features() {
            bail!(
                "Length of feature_names ({}) is not same with #features ({})",
                names.len(),
                self.num_features()
            );
        }
        let mut replaced_whitespace = false;
        let mut normalized = Vec::with_capacity(names.len());
        for name in names {
            if name.chars().any(|c| matches!(c, '"' | ',' | ':' | '[' | ']' | '{' | '}')) {
                bail!("Do not support special JSON characters in feature name: {}", name);
            }
            let clean = normalize_feature_name(name);
            replaced_whitespace |= clean != *name;
            normalized.push(clean);
        }
        if replaced_whitespace {
            log::warn!("Found whitespace in feature_names, replace with underlines");
        }
        Arc::make_mut(&mut self.core).feature_names = normalized;
        Ok(())
    }
}

fn expected_type(field: &str) -> &'static str {
    match field {
        "constraint_group" => "int32",
        _ => "float32",
    }
}

fn construct_bin_mappers(raw: &Array2<f64>, config: &EngineConfig) -> Vec<BinMapper> {
    let (num_data, num_features) = raw.dim();
    let sample: Vec<usize> = if num_data > config.bin_construct_sample_cnt {
        let mut rng = StdRng::seed_from_u64(config.data_random_seed);
        let mut indices =
            rand::seq::index::sample(&mut rng, num_data, config.bin_construct_sample_cnt).into_vec();
        indices.sort_unstable();
        indices
    } else {
        (0..num_data).collect()
    };

    for &feature in &config.categorical_features {
        if feature >= num_features {
            log::warn!("Categorical feature index {} is out of range, ignored", feature);
        }
    }

    (0..num_features)
        .into_par_iter()
        .map(|feature| {
            let column = raw.column(feature);
            let values: Vec<f64> = sample.iter().map(|&row| column[row]).collect();
            if config.categorical_features.contains(&feature) {
                BinMapper::categorical(&values, config.max_bin)
            } else {
                BinMapper::numerical(
                    &values,
                    config.max_bin,
                    config.min_data_in_bin,
                    config.use_missing,
                    config.zero_as_missing,
                )
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn dataset() -> EngineDataset {
        let raw = array![[1.0, 0.0], [2.0, 1.0], [3.0, 1.0], [4.0, 2.0]];
        let config = EngineConfig::from_param_string("categorical_feature=1 min_data_in_bin=1").unwrap();
        EngineDataset::from_matrix(raw, &config, None).unwrap()
    }

    #[test]
    fn test_bins_and_categories() {
        let dataset = dataset();
        let core = dataset.core();
        assert_eq!(core.num_data, 4);
        assert!(core.is_categorical(1));
        assert!(!core.is_categorical(0));
        assert_eq!(core.bins.dim(), (2, 4));
        assert_eq!(core.feature_names, vec!["Column_0", "Column_1"]);
    }

    #[test]
    fn test_set_fields() {
        let mut dataset = dataset();
        assert!(dataset.set_field("label", FieldData::Float32(vec![0.0, 1.0, 1.0, 0.0])).is_ok());
        assert!(dataset.set_field("label", FieldData::Float32(vec![0.0])).is_err());
        assert!(dataset.set_field("label", FieldData::Int32(vec![0, 1, 1, 0])).is_err());
        assert!(dataset.set_field("constraint_group", FieldData::Int32(vec![0, 1, 1, 0])).is_ok());
        assert!(dataset.set_field("group_id", FieldData::Int32(vec![0, 1, 1, 0])).is_err());
        assert_eq!(dataset.core().labels().unwrap().len(), 4);
    }

    #[test]
    fn test_feature_names_normalized() {
        let mut dataset = dataset();
        dataset
            .set_feature_names(&["my field".to_string(), "ação".to_string()])
            .unwrap();
        assert_eq!(dataset.core().feature_names, vec!["my_field", "ação"]);
        assert!(dataset
            .set_feature_names(&["a,b".to_string(), "c".to_string()])
            .is_err());
        assert!(dataset.set_feature_names(&["a".to_string()]).is_err());
    }

    #[test]
    fn test_shared_core_is_not_mutated() {
        let mut dataset = dataset();
        let shared = dataset.core();
        dataset.set_field("label", FieldData::Float32(vec![1.0; 4])).unwrap();
        assert!(shared.labels.is_none());
    }
}
