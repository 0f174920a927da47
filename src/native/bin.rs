//! Feature discretization into histogram bins.

use crate::native::is_zero;
use std::collections::HashMap;

/// How missing values of a feature are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum MissingType {
    /// No missing values; NaN is read as zero
    None = 0,
    /// Zero and NaN are missing
    Zero = 1,
    /// NaN is missing
    NaN = 2,
}

impl MissingType {
    /// Decode the two missing-type bits of a decision type.
    pub fn from_bits(bits: i8) -> Self {
        match bits & 0x03 {
            1 => MissingType::Zero,
            2 => MissingType::NaN,
            _ => MissingType::None,
        }
    }
}

/// Numerical or categorical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinType {
    /// Ordered values, split by threshold
    Numerical,
    /// Unordered integer categories, split by category set
    Categorical,
}

/// Maps raw feature values to bin indices.
///
/// Numerical features are cut at `bin_upper_bounds`; when the feature has
/// missing values they get the last bin. Categorical features get one bin
/// per category seen during construction, most frequent first, plus a final
/// bin for negative, NaN and unseen categories.
#[derive(Debug, Clone)]
pub struct BinMapper {
    bin_type: BinType,
    missing_type: MissingType,
    num_bin: usize,
    bin_upper_bounds: Vec<f64>,
    bin_to_category: Vec<i32>,
    category_to_bin: HashMap<i32, u32>,
    min_value: f64,
    max_value: f64,
}

impl BinMapper {
    /// Construct a numerical mapper from sampled values.
    ///
    /// `zero_as_missing` routes zeros together with NaN to the missing bin.
    pub fn numerical(
        values: &[f64],
        max_bin: usize,
        min_data_in_bin: usize,
        use_missing: bool,
        zero_as_missing: bool,
    ) -> Self {
        let has_nan = values.iter().any(|v| v.is_nan());
        let missing_type = if !use_missing {
            MissingType::None
        } else if zero_as_missing {
            MissingType::Zero
        } else if has_nan {
            MissingType::NaN
        } else {
            MissingType::None
        };

        let mut present: Vec<f64> = match missing_type {
            MissingType::NaN => values.iter().copied().filter(|v| !v.is_nan()).collect(),
            MissingType::Zero => values
                .iter()
                .copied()
                .filter(|&v| !v.is_nan() && !is_zero(v))
                .collect(),
            MissingType::None => values
                .iter()
                .map(|&v| if v.is_nan() { 0.0 } else { v })
                .collect(),
        };
        present.sort_by(|a, b| a.total_cmp(b));

        let mut distinct: Vec<(f64, usize)> = Vec::new();
        for value in present {
            match distinct.last_mut() {
                Some((last, count)) if *last == value => *count += 1,
                _ => distinct.push((value, 1)),
            }
        }

        let value_bins = if missing_type == MissingType::None {
            max_bin
        } else {
            max_bin.saturating_sub(1).max(1)
        };
        let mut bin_upper_bounds = greedy_upper_bounds(&distinct, value_bins, min_data_in_bin);
        if bin_upper_bounds.is_empty() {
            bin_upper_bounds.push(f64::INFINITY);
        }

        let num_bin = bin_upper_bounds.len()
            + if missing_type == MissingType::None { 0 } else { 1 };
        let (min_value, max_value) = match (distinct.first(), distinct.last()) {
            (Some(first), Some(last)) => (first.0, last.0),
            _ => (0.0, 0.0),
        };

        BinMapper {
            bin_type: BinType::Numerical,
            missing_type,
            num_bin,
            bin_upper_bounds,
            bin_to_category: Vec::new(),
            category_to_bin: HashMap::new(),
            min_value,
            max_value,
        }
    }

    /// Construct a categorical mapper from sampled values.
    pub fn categorical(values: &[f64], max_bin: usize) -> Self {
        let mut counts: HashMap<i32, usize> = HashMap::new();
        for &value in values {
            if value.is_nan() || value < 0.0 {
                continue;
            }
            *counts.entry(value as i32).or_insert(0) += 1;
        }

        let mut categories: Vec<(i32, usize)> = counts.into_iter().collect();
        categories.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        categories.truncate(max_bin.saturating_sub(1).max(1));

        let bin_to_category: Vec<i32> = categories.iter().map(|&(category, _)| category).collect();
        let category_to_bin = bin_to_category
            .iter()
            .enumerate()
            .map(|(bin, &category)| (category, bin as u32))
            .collect();

        BinMapper {
            bin_type: BinType::Categorical,
            missing_type: MissingType::NaN,
            num_bin: bin_to_category.len() + 1,
            bin_upper_bounds: Vec::new(),
            bin_to_category,
            category_to_bin,
            min_value: 0.0,
            max_value: 0.0,
        }
    }

    /// Bin of a raw value.
    pub fn value_to_bin(&self, value: f64) -> u32 {
        match self.bin_type {
            BinType::Numerical => {
                let missing_bin = (self.num_bin - 1) as u32;
                match self.missing_type {
                    MissingType::NaN if value.is_nan() => return missing_bin,
                    MissingType::Zero if value.is_nan() || is_zero(value) => return missing_bin,
                    _ => {}
                }
                let value = if value.is_nan() { 0.0 } else { value };
                let idx = self.bin_upper_bounds.partition_point(|&bound| bound < value);
                idx.min(self.bin_upper_bounds.len() - 1) as u32
            }
            BinType::Categorical => {
                if value.is_nan() || value < 0.0 {
                    return self.missing_bin();
                }
                self.category_to_bin
                    .get(&(value as i32))
                    .copied()
                    .unwrap_or_else(|| self.missing_bin())
            }
        }
    }

    /// Bin that collects missing values, if the mapper has one.
    pub fn missing_bin(&self) -> u32 {
        (self.num_bin - 1) as u32
    }

    /// Number of bins that hold ordinary values.
    pub fn num_value_bins(&self) -> usize {
        match (self.bin_type, self.missing_type) {
            (BinType::Numerical, MissingType::None) => self.num_bin,
            _ => self.num_bin - 1,
        }
    }

    /// Upper bound of a numerical bin; the split threshold for `bin`.
    pub fn bin_to_value(&self, bin: u32) -> f64 {
        self.bin_upper_bounds[bin as usize]
    }

    /// Category held by a categorical bin.
    pub fn bin_to_category(&self, bin: u32) -> Option<i32> {
        self.bin_to_category.get(bin as usize).copied()
    }

    /// Total number of bins.
    pub fn num_bin(&self) -> usize {
        self.num_bin
    }

    /// Numerical or categorical.
    pub fn bin_type(&self) -> BinType {
        self.bin_type
    }

    /// Missing value representation.
    pub fn missing_type(&self) -> MissingType {
        self.missing_type
    }

    /// A feature with a single bin can never be split.
    pub fn is_trivial(&self) -> bool {
        match self.bin_type {
            BinType::Numerical => self.num_bin <= 1,
            BinType::Categorical => self.bin_to_category.is_empty(),
        }
    }

    /// Text stored in the model's `feature_infos` header line.
    pub fn feature_info(&self) -> String {
        if self.is_trivial() {
            return "none".to_string();
        }
        match self.bin_type {
            BinType::Numerical => format!("[{}:{}]", self.min_value, self.max_value),
            BinType::Categorical => {
                let mut categories = self.bin_to_category.clone();
                categories.sort_unstable();
                categories
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(":")
            }
        }
    }
}

/// Upper bounds from sorted `(value, count)` pairs, each bin holding about
/// `total / max_bin` values and at least `min_data_in_bin`. Bounds sit
/// halfway between neighbouring distinct values; the last is `+inf`.
fn greedy_upper_bounds(distinct: &[(f64, usize)], max_bin: usize, min_data_in_bin: usize) -> Vec<f64> {
    if distinct.is_empty() {
        return Vec::new();
    }
    let total: usize = distinct.iter().map(|&(_, c)| c).sum();
    let mut bounds = Vec::new();

    if distinct.len() <= max_bin {
        let mut acc = 0usize;
        for window in distinct.windows(2) {
            acc += window[0].1;
            if acc >= min_data_in_bin.max(1) {
                bounds.push((window[0].0 + window[1].0) / 2.0);
                acc = 0;
            }
        }
    } else {
        let mean_bin_size = (total as f64 / max_bin as f64).max(min_data_in_bin.max(1) as f64);
        let mut acc = 0usize;
        for window in distinct.windows(2) {
            acc += window[0].1;
            if acc as f64 >= mean_bin_size && bounds.len() + 1 < max_bin {
                bounds.push((window[0].0 + window[1].0) / 2.0);
                acc = 0;
            }
        }
    }
    bounds.push(f64::INFINITY);
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numerical_bins() {
        let values: Vec<f64> = (0..100).map(|v| v as f64).collect();
        let mapper = BinMapper::numerical(&values, 10, 3, true, false);
        assert_eq!(mapper.missing_type(), MissingType::None);
        assert!(mapper.num_bin() <= 10);
        assert_eq!(mapper.value_to_bin(-5.0), 0);
        assert_eq!(mapper.value_to_bin(1e9) as usize, mapper.num_bin() - 1);
        // Thresholds are consistent with raw comparisons.
        for v in &values {
            let bin = mapper.value_to_bin(*v);
            assert!(*v <= mapper.bin_to_value(bin));
        }
    }

    #[test]
    fn test_nan_gets_missing_bin() {
        let values = vec![1.0, 2.0, f64::NAN, 3.0];
        let mapper = BinMapper::numerical(&values, 255, 1, true, false);
        assert_eq!(mapper.missing_type(), MissingType::NaN);
        assert_eq!(mapper.value_to_bin(f64::NAN), mapper.missing_bin());
        assert_eq!(mapper.num_value_bins(), 3);
    }

    #[test]
    fn test_zero_as_missing() {
        let values = vec![0.0, 1.0, 2.0, f64::NAN];
        let mapper = BinMapper::numerical(&values, 255, 1, true, true);
        assert_eq!(mapper.missing_type(), MissingType::Zero);
        assert_eq!(mapper.value_to_bin(0.0), mapper.missing_bin());
        assert_eq!(mapper.value_to_bin(f64::NAN), mapper.missing_bin());
    }

    #[test]
    fn test_constant_feature_is_trivial() {
        let mapper = BinMapper::numerical(&[5.0; 10], 255, 3, true, false);
        assert!(mapper.is_trivial());
        assert_eq!(mapper.feature_info(), "none");
    }

    #[test]
    fn test_categorical_bins() {
        let values = vec![2.0, 2.0, 2.0, 0.0, 0.0, 7.0, -1.0, f64::NAN];
        let mapper = BinMapper::categorical(&values, 255);
        assert_eq!(mapper.num_bin(), 4);
        assert_eq!(mapper.value_to_bin(2.0), 0);
        assert_eq!(mapper.value_to_bin(0.0), 1);
        assert_eq!(mapper.value_to_bin(7.0), 2);
        assert_eq!(mapper.value_to_bin(-1.0), mapper.missing_bin());
        assert_eq!(mapper.value_to_bin(99.0), mapper.missing_bin());
        assert_eq!(mapper.bin_to_category(0), Some(2));
        assert_eq!(mapper.feature_info(), "0:2:7");
    }
}
