use super::{check_call, to_c_string, NativeHandle, OutHandle};
use crate::core::error::{ProviderError, Result};
use crate::native;
use std::ffi::c_void;
use std::os::raw::c_int;
use std::path::Path;

/// Booster being trained, owned until closed.
#[derive(Debug)]
pub struct TrainBooster {
    out: OutHandle,
    booster: NativeHandle,
}

impl TrainBooster {
    /// No booster created yet.
    pub fn new() -> Self {
        TrainBooster {
            out: OutHandle::new(),
            booster: NativeHandle::null("booster", native::LGBM_BoosterFree),
        }
    }

    /// Create the native booster over a native dataset.
    pub fn init_booster_handle(&mut self, dataset: *mut c_void, params: &str) -> Result<()> {
        let params = to_c_string(params, "parameters")?;
        let status =
            unsafe { native::LGBM_BoosterCreate(dataset, params.as_ptr(), self.out.acquire_output_pointer()) };
        check_call(status, "LGBM_BoosterCreate")?;
        let handle = self.out.materialize("LGBM_BoosterCreate")?;
        self.booster.set(handle);
        Ok(())
    }

    fn handle(&self, operation: &str) -> Result<*mut c_void> {
        if self.booster.is_null() {
            return Err(ProviderError::native(operation, "booster handle was not created"));
        }
        Ok(self.booster.get())
    }

    /// Train one more iteration; `true` when the engine cannot grow more trees.
    pub fn update_one_iter(&mut self) -> Result<bool> {
        let handle = self.handle("LGBM_BoosterUpdateOneIter")?;
        let mut finished: c_int = 0;
        let status = unsafe { native::LGBM_BoosterUpdateOneIter(handle, &mut finished) };
        check_call(status, "LGBM_BoosterUpdateOneIter")?;
        Ok(finished == 1)
    }

    /// Iterations trained so far.
    pub fn current_iteration(&self) -> Result<usize> {
        let handle = self.handle("LGBM_BoosterGetCurrentIteration")?;
        let mut iteration: c_int = 0;
        let status = unsafe { native::LGBM_BoosterGetCurrentIteration(handle, &mut iteration) };
        check_call(status, "LGBM_BoosterGetCurrentIteration")?;
        Ok(iteration.max(0) as usize)
    }

    /// Save every iteration to `path` with feature importances of `importance_type`.
    pub fn save_model(&self, path: &Path, importance_type: c_int) -> Result<()> {
        let handle = self.handle("LGBM_BoosterSaveModel")?;
        let filename = to_c_string(&path.to_string_lossy(), "model path")?;
        let status = unsafe { native::LGBM_BoosterSaveModel(handle, 0, -1, importance_type, filename.as_ptr()) };
        check_call(status, "LGBM_BoosterSaveModel")
    }

    /// Free the booster. Idempotent.
    pub fn close(&mut self) {
        self.booster.release();
    }
}

impl Default for TrainBooster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::TrainData;
    use crate::native::{C_API_FEATURE_IMPORTANCE_GAIN, C_API_FEATURE_IMPORTANCE_SPLIT};

    fn dataset(rows: usize) -> TrainData {
        let mut data = TrainData::new(1, 64, false).unwrap();
        for i in 0..rows {
            data.add_feature_value(i as f64);
            data.add_label_value(if i * 2 >= rows { 1.0 } else { 0.0 });
        }
        data.init_dataset_handle("min_data_in_bin=1").unwrap();
        let labels = data.coalesce_labels();
        data.set_field_f32("label", &labels).unwrap();
        data
    }

    #[test]
    fn test_train_and_save() {
        let data = dataset(100);
        let mut booster = TrainBooster::new();
        booster
            .init_booster_handle(data.dataset_handle(), "min_data_in_leaf=5 num_threads=1")
            .unwrap();
        for _ in 0..3 {
            assert!(!booster.update_one_iter().unwrap());
        }
        assert_eq!(booster.current_iteration().unwrap(), 3);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.txt");
        booster.save_model(&path, C_API_FEATURE_IMPORTANCE_GAIN).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Tree=2"));
        booster.save_model(&path, C_API_FEATURE_IMPORTANCE_SPLIT).unwrap();
        booster.close();
        booster.close();
        assert!(booster.update_one_iter().is_err());
    }

    #[test]
    fn test_finished_when_no_split_possible() {
        let data = dataset(10);
        let mut booster = TrainBooster::new();
        booster
            .init_booster_handle(data.dataset_handle(), "min_data_in_leaf=50")
            .unwrap();
        assert!(booster.update_one_iter().unwrap());
        assert_eq!(booster.current_iteration().unwrap(), 0);
    }

    #[test]
    fn test_bad_objective_is_native_error() {
        let data = dataset(20);
        let mut booster = TrainBooster::new();
        let err = booster
            .init_booster_handle(data.dataset_handle(), "objective=regression_l1")
            .unwrap_err();
        assert_eq!(err.category(), "native");
        assert!(err.to_string().contains("Unknown objective"));
    }
}
