use super::{check_call, to_c_string, NativeHandle, OutHandle};
use crate::core::error::{ProviderError, Result};
use crate::core::memory::ChunkedArray;
use crate::native::{self, C_API_DTYPE_FLOAT32, C_API_DTYPE_FLOAT64, C_API_DTYPE_INT32};
use std::ffi::c_void;
use std::os::raw::{c_char, c_int};
use std::ptr;

/// Training buffers and the native dataset built from them.
///
/// Features are stored row-major, `num_features` values per instance, so
/// every features chunk holds `instances_per_chunk` whole rows and can be
/// handed to the engine as one matrix.
#[derive(Debug)]
pub struct TrainData {
    features: ChunkedArray<f64>,
    labels: ChunkedArray<f32>,
    constraint_groups: Option<ChunkedArray<i32>>,
    num_features: usize,
    out: OutHandle,
    dataset: NativeHandle,
}

impl TrainData {
    /// Allocate the first chunk of every buffer.
    pub fn new(num_features: usize, instances_per_chunk: usize, fairness_constrained: bool) -> Result<Self> {
        if num_features == 0 {
            return Err(ProviderError::schema("dataset has no predictive fields"));
        }
        Ok(TrainData {
            features: ChunkedArray::new(num_features * instances_per_chunk)?,
            labels: ChunkedArray::new(instances_per_chunk)?,
            constraint_groups: if fairness_constrained {
                Some(ChunkedArray::new(instances_per_chunk)?)
            } else {
                None
            },
            num_features,
            out: OutHandle::new(),
            dataset: NativeHandle::null("dataset", native::LGBM_DatasetFree),
        })
    }

    /// Number of feature columns.
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Number of instances added so far.
    pub fn num_instances(&self) -> usize {
        self.labels.get_add_count()
    }

    /// Feature values buffer.
    pub fn features(&self) -> &ChunkedArray<f64> {
        &self.features
    }

    /// Append the next feature value of the current instance.
    pub fn add_feature_value(&mut self, value: f64) {
        self.features.add(value);
    }

    /// Append the label of an instance.
    pub fn add_label_value(&mut self, value: f32) {
        self.labels.add(value);
    }

    /// Append the constraint group of an instance.
    pub fn add_constraint_group_value(&mut self, value: i32) -> Result<()> {
        match &mut self.constraint_groups {
            Some(groups) => {
                groups.add(value);
                Ok(())
            }
            None => Err(ProviderError::internal(
                "constraint groups are only collected for fairness-constrained training",
            )),
        }
    }

    /// Whether constraint groups are collected.
    pub fn is_fairness_constrained(&self) -> bool {
        self.constraint_groups.is_some()
    }

    /// Labels in instance order.
    pub fn coalesce_labels(&self) -> Vec<f32> {
        self.labels.coalesce()
    }

    /// Constraint groups in instance order, if collected.
    pub fn coalesce_constraint_groups(&self) -> Option<Vec<i32>> {
        self.constraint_groups.as_ref().map(ChunkedArray::coalesce)
    }

    /// Create the native dataset from the feature chunks, one matrix per chunk.
    pub fn init_dataset_handle(&mut self, params: &str) -> Result<()> {
        let rows = self.features.rows_per_chunk(self.num_features)?;
        let chunks: Vec<*const c_void> = self
            .features
            .data_as_ptrs()
            .into_iter()
            .map(|p| p as *const c_void)
            .collect();
        let params = to_c_string(params, "parameters")?;
        log::debug!(
            "Creating native dataset from {} chunks of {:?} rows",
            chunks.len(),
            rows
        );

        let status = unsafe {
            native::LGBM_DatasetCreateFromMats(
                chunks.len() as i32,
                chunks.as_ptr(),
                C_API_DTYPE_FLOAT64,
                rows.as_ptr(),
                self.num_features as i32,
                1,
                params.as_ptr(),
                ptr::null_mut(),
                self.out.acquire_output_pointer(),
            )
        };
        check_call(status, "LGBM_DatasetCreateFromMats")?;
        let handle = self.out.materialize("LGBM_DatasetCreateFromMats")?;
        self.dataset.set(handle);
        Ok(())
    }

    /// Native dataset handle; null before [`init_dataset_handle`](Self::init_dataset_handle).
    pub fn dataset_handle(&self) -> *mut c_void {
        self.dataset.get()
    }

    fn require_dataset(&self, operation: &str) -> Result<*mut c_void> {
        if self.dataset.is_null() {
            return Err(ProviderError::native(operation, "dataset handle was not created"));
        }
        Ok(self.dataset.get())
    }

    /// Set a `float32` field such as `label`.
    pub fn set_field_f32(&mut self, name: &str, values: &[f32]) -> Result<()> {
        self.set_field(name, values.as_ptr() as *const c_void, values.len(), C_API_DTYPE_FLOAT32)
    }

    /// Set an `int32` field such as `constraint_group`.
    pub fn set_field_i32(&mut self, name: &str, values: &[i32]) -> Result<()> {
        self.set_field(name, values.as_ptr() as *const c_void, values.len(), C_API_DTYPE_INT32)
    }

    fn set_field(&mut self, name: &str, data: *const c_void, len: usize, dtype: c_int) -> Result<()> {
        let handle = self.require_dataset("LGBM_DatasetSetField")?;
        let c_name = to_c_string(name, "field name")?;
        let status = unsafe { native::LGBM_DatasetSetField(handle, c_name.as_ptr(), data, len as c_int, dtype) };
        check_call(status, "LGBM_DatasetSetField")
    }

    /// Name the dataset's feature columns.
    pub fn set_feature_names(&mut self, names: &[String]) -> Result<()> {
        let handle = self.require_dataset("LGBM_DatasetSetFeatureNames")?;
        let c_names = names
            .iter()
            .map(|name| to_c_string(name, "feature name"))
            .collect::<Result<Vec<_>>>()?;
        let ptrs: Vec<*const c_char> = c_names.iter().map(|name| name.as_ptr()).collect();
        let status = unsafe { native::LGBM_DatasetSetFeatureNames(handle, ptrs.as_ptr(), ptrs.len() as c_int) };
        check_call(status, "LGBM_DatasetSetFeatureNames")
    }

    /// Free the feature chunks. Idempotent.
    pub fn release_features(&mut self) {
        self.features.release();
    }

    /// Free the label chunks. Idempotent.
    pub fn release_labels(&mut self) {
        self.labels.release();
    }

    /// Free the constraint group chunks. Idempotent.
    pub fn release_constraint_groups(&mut self) {
        if let Some(groups) = &mut self.constraint_groups {
            groups.release();
        }
    }

    /// Free every buffer and the native dataset. Idempotent.
    pub fn close(&mut self) {
        self.release_features();
        self.release_labels();
        self.release_constraint_groups();
        self.dataset.release();
    }
}

impl Drop for TrainData {
    fn drop(&mut self) {
        self.close();
    }
}
