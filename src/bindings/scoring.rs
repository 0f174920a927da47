use super::{check_call, last_native_error, to_c_string, NativeHandle, OutHandle};
use crate::core::constants::LIGHTGBM_PREDICTION_PARAMETERS;
use crate::core::error::{ProviderError, Result};
use crate::native::{
    self, C_API_DTYPE_FLOAT64, C_API_FEATURE_IMPORTANCE_GAIN, C_API_PREDICT_CONTRIB, C_API_PREDICT_NORMAL,
};
use std::ffi::c_void;
use std::os::raw::{c_char, c_int};
use std::path::Path;

/// A loaded booster with two single-row prediction configurations and the
/// buffers they read and write.
///
/// Not thread safe by itself; the scoring model serializes access.
#[derive(Debug)]
pub struct ScoringResources {
    booster: NativeHandle,
    normal_config: NativeHandle,
    contrib_config: NativeHandle,
    instance: Vec<f64>,
    scores: Vec<f64>,
    contributions: Vec<f64>,
    num_iterations: usize,
    num_features: usize,
    num_classes: usize,
    feature_names: Vec<String>,
}

fn loading_error(operation: &str) -> ProviderError {
    let message = format!("{} failed: {}", operation, last_native_error());
    log::error!("{}", message);
    ProviderError::model_loading(message)
}

impl ScoringResources {
    /// Load a model file and prepare prediction.
    ///
    /// Whatever was created before a failure is freed before the error is
    /// returned.
    pub fn from_model_file(path: &Path) -> Result<Self> {
        let mut resources = ScoringResources {
            booster: NativeHandle::null("booster", native::LGBM_BoosterFree),
            normal_config: NativeHandle::null("fast config", native::LGBM_FastConfigFree),
            contrib_config: NativeHandle::null("fast config", native::LGBM_FastConfigFree),
            instance: Vec::new(),
            scores: Vec::new(),
            contributions: Vec::new(),
            num_iterations: 0,
            num_features: 0,
            num_classes: 0,
            feature_names: Vec::new(),
        };

        let filename = to_c_string(&path.to_string_lossy(), "model path")?;
        let mut out = OutHandle::new();
        let mut num_iterations: c_int = 0;
        let status = unsafe {
            native::LGBM_BoosterCreateFromModelfile(
                filename.as_ptr(),
                &mut num_iterations,
                out.acquire_output_pointer(),
            )
        };
        if status != 0 {
            return Err(loading_error("LGBM_BoosterCreateFromModelfile"));
        }
        resources.booster.set(out.materialize("LGBM_BoosterCreateFromModelfile")?);
        resources.num_iterations = num_iterations.max(0) as usize;

        let booster = resources.booster.get();
        let mut value: c_int = 0;
        if unsafe { native::LGBM_BoosterGetNumFeature(booster, &mut value) } != 0 {
            return Err(loading_error("LGBM_BoosterGetNumFeature"));
        }
        resources.num_features = value.max(0) as usize;
        if unsafe { native::LGBM_BoosterGetNumClasses(booster, &mut value) } != 0 {
            return Err(loading_error("LGBM_BoosterGetNumClasses"));
        }
        resources.num_classes = value.max(1) as usize;
        resources.feature_names = read_feature_names(booster)?;

        resources.normal_config.set(fast_init(booster, C_API_PREDICT_NORMAL, resources.num_features)?);
        resources.contrib_config.set(fast_init(booster, C_API_PREDICT_CONTRIB, resources.num_features)?);

        resources.instance = vec![0.0; resources.num_features];
        resources.scores = vec![0.0; resources.num_classes];
        resources.contributions = vec![0.0; resources.num_classes * (resources.num_features + 1)];
        log::debug!(
            "Loaded model {} with {} iterations and {} features",
            path.display(),
            resources.num_iterations,
            resources.num_features
        );
        Ok(resources)
    }

    /// Iterations in the model.
    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    /// Feature columns the model expects.
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Native class count (`1` for binary models).
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Feature names stored in the model.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Copy one feature row into the input buffer.
    pub fn set_instance(&mut self, row: &[f64]) -> Result<()> {
        if row.len() != self.instance.len() {
            return Err(ProviderError::schema(format!(
                "feature row has {} values, model expects {}",
                row.len(),
                self.instance.len()
            )));
        }
        self.instance.copy_from_slice(row);
        Ok(())
    }

    /// Scores for the current input row, one per class.
    pub fn predict_normal(&mut self) -> Result<&[f64]> {
        let config = self.normal_config.get();
        predict_fast(config, &self.instance, &mut self.scores)?;
        Ok(&self.scores)
    }

    /// Contributions for the current instance: per class, one value per
    /// feature followed by the expected value.
    pub fn predict_contributions(&mut self) -> Result<&[f64]> {
        let config = self.contrib_config.get();
        predict_fast(config, &self.instance, &mut self.contributions)?;
        Ok(&self.contributions)
    }

    /// Write the loaded model to `path` with gain feature importances.
    pub fn save_model(&self, path: &Path) -> Result<()> {
        if self.booster.is_null() {
            return Err(ProviderError::native("LGBM_BoosterSaveModel", "scoring resources are closed"));
        }
        let filename = to_c_string(&path.to_string_lossy(), "model path")?;
        let status = unsafe {
            native::LGBM_BoosterSaveModel(
                self.booster.get(),
                0,
                -1,
                C_API_FEATURE_IMPORTANCE_GAIN,
                filename.as_ptr(),
            )
        };
        check_call(status, "LGBM_BoosterSaveModel")
    }

    /// Free the fast configurations and the booster. Idempotent.
    pub fn close(&mut self) {
        self.normal_config.release();
        self.contrib_config.release();
        self.booster.release();
    }
}

impl Drop for ScoringResources {
    fn drop(&mut self) {
        self.close();
    }
}

fn fast_init(booster: *mut c_void, predict_type: c_int, num_features: usize) -> Result<*mut c_void> {
    let params = to_c_string(LIGHTGBM_PREDICTION_PARAMETERS, "prediction parameters")?;
    let mut out = OutHandle::new();
    let status = unsafe {
        native::LGBM_BoosterPredictForMatSingleRowFastInit(
            booster,
            predict_type,
            0,
            -1,
            C_API_DTYPE_FLOAT64,
            num_features as i32,
            params.as_ptr(),
            out.acquire_output_pointer(),
        )
    };
    if status != 0 {
        return Err(loading_error("LGBM_BoosterPredictForMatSingleRowFastInit"));
    }
    out.materialize("LGBM_BoosterPredictForMatSingleRowFastInit")
}

fn predict_fast(config: *mut c_void, instance: &[f64], output: &mut [f64]) -> Result<()> {
    crate::ensure!(
        !config.is_null(),
        crate::native_error!("LGBM_BoosterPredictForMatSingleRowFast", "scoring resources are closed")
    );
    let mut out_len: i64 = 0;
    let status = unsafe {
        native::LGBM_BoosterPredictForMatSingleRowFast(
            config,
            instance.as_ptr() as *const c_void,
            &mut out_len,
            output.as_mut_ptr(),
        )
    };
    check_call(status, "LGBM_BoosterPredictForMatSingleRowFast")?;
    if out_len as usize != output.len() {
        return Err(ProviderError::internal(format!(
            "prediction wrote {} values, expected {}",
            out_len,
            output.len()
        )));
    }
    Ok(())
}

/// Query the names twice: once for their count and size, once to copy them.
fn read_feature_names(booster: *mut c_void) -> Result<Vec<String>> {
    let mut count: c_int = 0;
    let mut buffer_len: usize = 0;
    let status = unsafe {
        native::LGBM_BoosterGetFeatureNames(booster, 0, &mut count, 0, &mut buffer_len, std::ptr::null_mut())
    };
    if status != 0 {
        return Err(loading_error("LGBM_BoosterGetFeatureNames"));
    }

    let count = count.max(0) as usize;
    let mut buffers: Vec<Vec<u8>> = vec![vec![0u8; buffer_len]; count];
    let mut ptrs: Vec<*mut c_char> = buffers.iter_mut().map(|b| b.as_mut_ptr() as *mut c_char).collect();
    let mut written: c_int = 0;
    let mut needed: usize = 0;
    let status = unsafe {
        native::LGBM_BoosterGetFeatureNames(
            booster,
            count as c_int,
            &mut written,
            buffer_len,
            &mut needed,
            ptrs.as_mut_ptr(),
        )
    };
    if status != 0 {
        return Err(loading_error("LGBM_BoosterGetFeatureNames"));
    }

    Ok(buffers
        .iter()
        .map(|buffer| {
            let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
            String::from_utf8_lossy(&buffer[..end]).into_owned()
        })
        .collect())
}
