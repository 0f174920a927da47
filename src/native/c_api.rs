//! `LGBM_*` entry points.
//!
//! Each function returns `0` on success and `-1` on failure, after storing
//! the failure message for [`LGBM_GetLastError`]. Panics are caught at the
//! boundary and reported the same way.

#![allow(non_snake_case)]

use crate::native::boosting::Booster;
use crate::native::config::EngineConfig;
use crate::native::dataset::{EngineDataset, FieldData};
use crate::native::model::Model;
use crate::native::{
    last_error_ptr, set_last_error, BoosterHandle, DatasetHandle, FastConfigHandle, C_API_DTYPE_FLOAT32,
    C_API_DTYPE_FLOAT64, C_API_DTYPE_INT32, C_API_PREDICT_CONTRIB, C_API_PREDICT_LEAF_INDEX,
    C_API_PREDICT_NORMAL, C_API_PREDICT_RAW_SCORE,
};
use anyhow::{anyhow, bail, Result};
use ndarray::Array2;
use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

static_assertions::assert_eq_size!(DatasetHandle, usize);
static_assertions::assert_eq_size!(BoosterHandle, usize);
static_assertions::assert_eq_size!(c_int, i32);
static_assertions::assert_impl_all!(Booster: Send);
static_assertions::assert_impl_all!(Model: Send, Sync);

/// Single-row prediction settings bound to a model snapshot.
struct FastConfig {
    model: Arc<Model>,
    predict_type: i32,
    start_iteration: i32,
    num_iteration: i32,
    data_type: i32,
    ncol: usize,
    row: Vec<f64>,
}

fn api_call(name: &str, f: impl FnOnce() -> Result<()>) -> c_int {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => 0,
        Ok(Err(error)) => {
            log::debug!("{} failed: {:#}", name, error);
            set_last_error(&format!("{:#}", error));
            -1
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            set_last_error(&format!("{} panicked: {}", name, reason));
            -1
        }
    }
}

unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    if ptr.is_null() {
        bail!("{} is null", what);
    }
    // SAFETY: the caller passes a NUL-terminated string that outlives the call.
    let s = unsafe { CStr::from_ptr(ptr) };
    s.to_str().map_err(|_| anyhow!("{} is not valid UTF-8", what))
}

unsafe fn write_out<T>(ptr: *mut T, value: T, what: &str) -> Result<()> {
    if ptr.is_null() {
        bail!("Output pointer {} is null", what);
    }
    // SAFETY: non-null out-parameter provided by the caller.
    unsafe { ptr.write(value) };
    Ok(())
}

unsafe fn handle_mut<'a, T>(handle: *mut c_void, what: &str) -> Result<&'a mut T> {
    if handle.is_null() {
        bail!("{} handle is null", what);
    }
    // SAFETY: handles are only created by `Box::into_raw` in this module.
    Ok(unsafe { &mut *(handle as *mut T) })
}

fn into_handle<T>(value: T) -> *mut c_void {
    Box::into_raw(Box::new(value)) as *mut c_void
}

unsafe fn free_handle<T>(handle: *mut c_void) {
    if !handle.is_null() {
        // SAFETY: the handle was produced by `into_handle::<T>` and is freed once.
        drop(unsafe { Box::from_raw(handle as *mut T) });
    }
}

/// Append `nrow x ncol` values of `data_type` at `data` to `out`, row-major.
unsafe fn read_matrix(
    data: *const c_void,
    data_type: c_int,
    nrow: usize,
    ncol: usize,
    is_row_major: bool,
    out: &mut Vec<f64>,
) -> Result<()> {
    if data.is_null() {
        bail!("Matrix data is null");
    }
    let len = nrow * ncol;
    let values: Vec<f64> = match data_type {
        C_API_DTYPE_FLOAT32 => {
            // SAFETY: the caller guarantees `len` elements of the stated type.
            let slice = unsafe { std::slice::from_raw_parts(data as *const f32, len) };
            slice.iter().map(|&v| f64::from(v)).collect()
        }
        C_API_DTYPE_FLOAT64 => {
            // SAFETY: as above.
            let slice = unsafe { std::slice::from_raw_parts(data as *const f64, len) };
            slice.to_vec()
        }
        other => bail!("Unknown data type {} for a feature matrix", other),
    };
    if is_row_major {
        out.extend_from_slice(&values);
    } else {
        for row in 0..nrow {
            out.extend((0..ncol).map(|col| values[col * nrow + row]));
        }
    }
    Ok(())
}

/// Message of the last failed call on this thread.
#[no_mangle]
pub extern "C" fn LGBM_GetLastError() -> *const c_char {
    last_error_ptr()
}

/// Create a dataset from `nmat` dense matrices stacked by rows.
///
/// # Safety
/// `data` and `nrow` point to `nmat` entries; each matrix holds
/// `nrow[i] * ncol` elements of `data_type`. `parameters` is a C string,
/// `reference` is null or a dataset handle, `out` is writable.
#[no_mangle]
pub unsafe extern "C" fn LGBM_DatasetCreateFromMats(
    nmat: i32,
    data: *const *const c_void,
    data_type: c_int,
    nrow: *const i32,
    ncol: i32,
    is_row_major: c_int,
    parameters: *const c_char,
    reference: DatasetHandle,
    out: *mut DatasetHandle,
) -> c_int {
    api_call("LGBM_DatasetCreateFromMats", || {
        if nmat <= 0 || data.is_null() || nrow.is_null() {
            bail!("Cannot create a dataset from {} matrices", nmat);
        }
        if ncol <= 0 {
            bail!("Number of columns should be positive, got {}", ncol);
        }
        let config = EngineConfig::from_param_string(unsafe { c_str(parameters, "parameters")? })?;
        let ncol = ncol as usize;
        let (mats, rows) = unsafe {
            (
                std::slice::from_raw_parts(data, nmat as usize),
                std::slice::from_raw_parts(nrow, nmat as usize),
            )
        };
        let total_rows: usize = rows.iter().map(|&r| r.max(0) as usize).sum();
        let mut values = Vec::with_capacity(total_rows * ncol);
        for (&mat, &rows) in mats.iter().zip(rows) {
            if rows < 0 {
                bail!("Number of rows should be non-negative, got {}", rows);
            }
            unsafe { read_matrix(mat, data_type, rows as usize, ncol, is_row_major != 0, &mut values)? };
        }
        let raw = Array2::from_shape_vec((total_rows, ncol), values)?;
        let reference = if reference.is_null() {
            None
        } else {
            Some(&*unsafe { handle_mut::<EngineDataset>(reference, "Reference dataset")? })
        };
        let dataset = EngineDataset::from_matrix(raw, &config, reference)?;
        unsafe { write_out(out, into_handle(dataset), "out")? };
        Ok(())
    })
}

/// Set the `label`, `weight` or `constraint_group` field.
///
/// # Safety
/// `handle` is a dataset handle, `field_name` a C string and `field_data`
/// holds `num_element` elements of `data_type`.
#[no_mangle]
pub unsafe extern "C" fn LGBM_DatasetSetField(
    handle: DatasetHandle,
    field_name: *const c_char,
    field_data: *const c_void,
    num_element: c_int,
    data_type: c_int,
) -> c_int {
    api_call("LGBM_DatasetSetField", || {
        let dataset = unsafe { handle_mut::<EngineDataset>(handle, "Dataset")? };
        let name = unsafe { c_str(field_name, "field_name")? };
        if field_data.is_null() || num_element < 0 {
            bail!("Invalid data for field {}", name);
        }
        let len = num_element as usize;
        let data = match data_type {
            C_API_DTYPE_FLOAT32 => FieldData::Float32(
                unsafe { std::slice::from_raw_parts(field_data as *const f32, len) }.to_vec(),
            ),
            C_API_DTYPE_FLOAT64 => FieldData::Float64(
                unsafe { std::slice::from_raw_parts(field_data as *const f64, len) }.to_vec(),
            ),
            C_API_DTYPE_INT32 => FieldData::Int32(
                unsafe { std::slice::from_raw_parts(field_data as *const i32, len) }.to_vec(),
            ),
            other => bail!("Unknown data type {} for field {}", other, name),
        };
        dataset.set_field(name, data)
    })
}

/// Replace the dataset's feature names.
///
/// # Safety
/// `handle` is a dataset handle; `feature_names` holds
/// `num_feature_names` C strings.
#[no_mangle]
pub unsafe extern "C" fn LGBM_DatasetSetFeatureNames(
    handle: DatasetHandle,
    feature_names: *const *const c_char,
    num_feature_names: c_int,
) -> c_int {
    api_call("LGBM_DatasetSetFeatureNames", || {
        let dataset = unsafe { handle_mut::<EngineDataset>(handle, "Dataset")? };
        if feature_names.is_null() || num_feature_names < 0 {
            bail!("Feature names are null");
        }
        let ptrs = unsafe { std::slice::from_raw_parts(feature_names, num_feature_names as usize) };
        let names = ptrs
            .iter()
            .map(|&ptr| unsafe { c_str(ptr, "feature name") }.map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        dataset.set_feature_names(&names)
    })
}

/// Number of rows.
///
/// # Safety
/// `handle` is a dataset handle and `out` is writable.
#[no_mangle]
pub unsafe extern "C" fn LGBM_DatasetGetNumData(handle: DatasetHandle, out: *mut c_int) -> c_int {
    api_call("LGBM_DatasetGetNumData", || {
        let dataset = unsafe { handle_mut::<EngineDataset>(handle, "Dataset")? };
        unsafe { write_out(out, dataset.num_data() as c_int, "out") }
    })
}

/// Number of feature columns.
///
/// # Safety
/// `handle` is a dataset handle and `out` is writable.
#[no_mangle]
pub unsafe extern "C" fn LGBM_DatasetGetNumFeature(handle: DatasetHandle, out: *mut c_int) -> c_int {
    api_call("LGBM_DatasetGetNumFeature", || {
        let dataset = unsafe { handle_mut::<EngineDataset>(handle, "Dataset")? };
        unsafe { write_out(out, dataset.num_features() as c_int, "out") }
    })
}

/// Free a dataset. Boosters created from it keep their own reference.
///
/// # Safety
/// `handle` is null or a dataset handle not freed before.
#[no_mangle]
pub unsafe extern "C" fn LGBM_DatasetFree(handle: DatasetHandle) -> c_int {
    api_call("LGBM_DatasetFree", || {
        unsafe { free_handle::<EngineDataset>(handle) };
        Ok(())
    })
}

/// Create a booster training on `train_data`.
///
/// # Safety
/// `train_data` is a dataset handle, `parameters` a C string and `out`
/// writable.
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterCreate(
    train_data: DatasetHandle,
    parameters: *const c_char,
    out: *mut BoosterHandle,
) -> c_int {
    api_call("LGBM_BoosterCreate", || {
        let dataset = unsafe { handle_mut::<EngineDataset>(train_data, "Dataset")? };
        let params = unsafe { c_str(parameters, "parameters")? };
        let booster = Booster::new(dataset, params)?;
        unsafe { write_out(out, into_handle(booster), "out") }
    })
}

/// Grow one iteration; `is_finished` is set to `1` when no tree could be added.
///
/// # Safety
/// `handle` is a booster handle and `is_finished` writable.
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterUpdateOneIter(handle: BoosterHandle, is_finished: *mut c_int) -> c_int {
    api_call("LGBM_BoosterUpdateOneIter", || {
        let booster = unsafe { handle_mut::<Booster>(handle, "Booster")? };
        let finished = booster.update_one_iter()?;
        unsafe { write_out(is_finished, c_int::from(finished), "is_finished") }
    })
}

/// Number of completed iterations.
///
/// # Safety
/// `handle` is a booster handle and `out_iteration` writable.
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterGetCurrentIteration(
    handle: BoosterHandle,
    out_iteration: *mut c_int,
) -> c_int {
    api_call("LGBM_BoosterGetCurrentIteration", || {
        let booster = unsafe { handle_mut::<Booster>(handle, "Booster")? };
        unsafe { write_out(out_iteration, booster.current_iteration() as c_int, "out_iteration") }
    })
}

/// Write the model text to `filename`.
///
/// # Safety
/// `handle` is a booster handle and `filename` a C string.
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterSaveModel(
    handle: BoosterHandle,
    start_iteration: c_int,
    num_iteration: c_int,
    feature_importance_type: c_int,
    filename: *const c_char,
) -> c_int {
    api_call("LGBM_BoosterSaveModel", || {
        let booster = unsafe { handle_mut::<Booster>(handle, "Booster")? };
        let filename = unsafe { c_str(filename, "filename")? };
        booster
            .model()
            .save_to_file(Path::new(filename), start_iteration, num_iteration, feature_importance_type)
    })
}

/// Copy the model text into `out_str`, truncated to `buffer_len` bytes
/// including the terminating NUL. `out_len` receives the full size needed.
///
/// # Safety
/// `handle` is a booster handle, `out_len` writable and `out_str` null or
/// `buffer_len` bytes long.
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterSaveModelToString(
    handle: BoosterHandle,
    start_iteration: c_int,
    num_iteration: c_int,
    feature_importance_type: c_int,
    buffer_len: i64,
    out_len: *mut i64,
    out_str: *mut c_char,
) -> c_int {
    api_call("LGBM_BoosterSaveModelToString", || {
        let booster = unsafe { handle_mut::<Booster>(handle, "Booster")? };
        let text = booster
            .model()
            .save_to_string(start_iteration, num_iteration, feature_importance_type);
        unsafe { write_out(out_len, text.len() as i64 + 1, "out_len")? };
        if !out_str.is_null() && buffer_len > 0 {
            unsafe { copy_c_string(&text, out_str, buffer_len as usize) };
        }
        Ok(())
    })
}

/// Copy `text` and a NUL into `dst`, truncated to `capacity` bytes.
unsafe fn copy_c_string(text: &str, dst: *mut c_char, capacity: usize) {
    let len = text.len().min(capacity - 1);
    // SAFETY: `dst` holds `capacity > len` bytes.
    unsafe {
        std::ptr::copy_nonoverlapping(text.as_ptr() as *const c_char, dst, len);
        *dst.add(len) = 0;
    }
}

/// Load a booster from a model file.
///
/// # Safety
/// `filename` is a C string; `out_num_iterations` and `out` are writable.
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterCreateFromModelfile(
    filename: *const c_char,
    out_num_iterations: *mut c_int,
    out: *mut BoosterHandle,
) -> c_int {
    api_call("LGBM_BoosterCreateFromModelfile", || {
        let filename = unsafe { c_str(filename, "filename")? };
        let text = std::fs::read_to_string(filename)
            .map_err(|e| anyhow!("Could not open {}: {}", filename, e))?;
        let booster = Booster::from_model_string(&text)?;
        unsafe { write_out(out_num_iterations, booster.current_iteration() as c_int, "out_num_iterations")? };
        unsafe { write_out(out, into_handle(booster), "out") }
    })
}

/// Load a booster from model text.
///
/// # Safety
/// `model_str` is a C string; `out_num_iterations` and `out` are writable.
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterLoadModelFromString(
    model_str: *const c_char,
    out_num_iterations: *mut c_int,
    out: *mut BoosterHandle,
) -> c_int {
    api_call("LGBM_BoosterLoadModelFromString", || {
        let text = unsafe { c_str(model_str, "model_str")? };
        let booster = Booster::from_model_string(text)?;
        unsafe { write_out(out_num_iterations, booster.current_iteration() as c_int, "out_num_iterations")? };
        unsafe { write_out(out, into_handle(booster), "out") }
    })
}

/// Number of features the model expects.
///
/// # Safety
/// `handle` is a booster handle and `out_len` writable.
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterGetNumFeature(handle: BoosterHandle, out_len: *mut c_int) -> c_int {
    api_call("LGBM_BoosterGetNumFeature", || {
        let booster = unsafe { handle_mut::<Booster>(handle, "Booster")? };
        unsafe { write_out(out_len, booster.model().num_features() as c_int, "out_len") }
    })
}

/// Number of classes the model scores.
///
/// # Safety
/// `handle` is a booster handle and `out_len` writable.
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterGetNumClasses(handle: BoosterHandle, out_len: *mut c_int) -> c_int {
    api_call("LGBM_BoosterGetNumClasses", || {
        let booster = unsafe { handle_mut::<Booster>(handle, "Booster")? };
        unsafe { write_out(out_len, booster.model().num_class as c_int, "out_len") }
    })
}

/// Copy up to `len` feature names, each truncated to `buffer_len` bytes.
/// `out_len` receives the number of names, `out_buffer_len` the buffer size
/// the longest name needs.
///
/// # Safety
/// `handle` is a booster handle; `out_strs` holds `len` buffers of
/// `buffer_len` bytes; `out_len` and `out_buffer_len` are writable.
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterGetFeatureNames(
    handle: BoosterHandle,
    len: c_int,
    out_len: *mut c_int,
    buffer_len: usize,
    out_buffer_len: *mut usize,
    out_strs: *mut *mut c_char,
) -> c_int {
    api_call("LGBM_BoosterGetFeatureNames", || {
        let booster = unsafe { handle_mut::<Booster>(handle, "Booster")? };
        let model = booster.model();
        let names = &model.feature_names;
        unsafe { write_out(out_len, names.len() as c_int, "out_len")? };
        let needed = names.iter().map(|n| n.len() + 1).max().unwrap_or(1);
        unsafe { write_out(out_buffer_len, needed, "out_buffer_len")? };
        if out_strs.is_null() || buffer_len == 0 {
            return Ok(());
        }
        let count = names.len().min(len.max(0) as usize);
        for (i, name) in names.iter().take(count).enumerate() {
            let dst = unsafe { *out_strs.add(i) };
            if !dst.is_null() {
                unsafe { copy_c_string(name, dst, buffer_len) };
            }
        }
        Ok(())
    })
}

/// Split counts or gains per feature.
///
/// # Safety
/// `handle` is a booster handle and `out_results` holds one `f64` per feature.
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterFeatureImportance(
    handle: BoosterHandle,
    num_iteration: c_int,
    importance_type: c_int,
    out_results: *mut f64,
) -> c_int {
    api_call("LGBM_BoosterFeatureImportance", || {
        let booster = unsafe { handle_mut::<Booster>(handle, "Booster")? };
        let importance = booster.model().feature_importance(num_iteration, importance_type)?;
        if out_results.is_null() {
            bail!("Output pointer out_results is null");
        }
        unsafe { std::ptr::copy_nonoverlapping(importance.as_ptr(), out_results, importance.len()) };
        Ok(())
    })
}

/// Bind a model snapshot and prediction settings for repeated single-row calls.
///
/// # Safety
/// `handle` is a booster handle, `parameter` a C string and
/// `out_fast_config` writable.
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterPredictForMatSingleRowFastInit(
    handle: BoosterHandle,
    predict_type: c_int,
    start_iteration: c_int,
    num_iteration: c_int,
    data_type: c_int,
    ncol: i32,
    parameter: *const c_char,
    out_fast_config: *mut FastConfigHandle,
) -> c_int {
    api_call("LGBM_BoosterPredictForMatSingleRowFastInit", || {
        let booster = unsafe { handle_mut::<Booster>(handle, "Booster")? };
        EngineConfig::from_param_string(unsafe { c_str(parameter, "parameter")? })?;
        if !matches!(
            predict_type,
            C_API_PREDICT_NORMAL | C_API_PREDICT_RAW_SCORE | C_API_PREDICT_LEAF_INDEX | C_API_PREDICT_CONTRIB
        ) {
            bail!("Unknown predict type {}", predict_type);
        }
        if !matches!(data_type, C_API_DTYPE_FLOAT32 | C_API_DTYPE_FLOAT64) {
            bail!("Unknown data type {} for prediction", data_type);
        }
        let model = booster.model();
        if ncol < 0 || ncol as usize != model.num_features() {
            bail!(
                "The number of features in data ({}) is not the same as it was in training data ({})",
                ncol,
                model.num_features()
            );
        }
        let config = FastConfig {
            model,
            predict_type,
            start_iteration,
            num_iteration,
            data_type,
            ncol: ncol as usize,
            row: vec![0.0; ncol as usize],
        };
        unsafe { write_out(out_fast_config, into_handle(config), "out_fast_config") }
    })
}

/// Predict one row with a fast configuration.
///
/// # Safety
/// `fast_config` is a fast-config handle, `data` holds `ncol` elements of the
/// configured type, `out_len` is writable and `out_result` holds the
/// prediction's outputs (one per class, `ncol + 1` per class for
/// contributions, one per tree for leaf indices).
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterPredictForMatSingleRowFast(
    fast_config: FastConfigHandle,
    data: *const c_void,
    out_len: *mut i64,
    out_result: *mut f64,
) -> c_int {
    api_call("LGBM_BoosterPredictForMatSingleRowFast", || {
        let config = unsafe { handle_mut::<FastConfig>(fast_config, "FastConfig")? };
        if data.is_null() || out_result.is_null() {
            bail!("Prediction input or output is null");
        }
        match config.data_type {
            C_API_DTYPE_FLOAT32 => {
                let values = unsafe { std::slice::from_raw_parts(data as *const f32, config.ncol) };
                for (dst, &v) in config.row.iter_mut().zip(values) {
                    *dst = f64::from(v);
                }
            }
            _ => {
                let values = unsafe { std::slice::from_raw_parts(data as *const f64, config.ncol) };
                config.row.copy_from_slice(values);
            }
        }

        let (model, start, num) = (&config.model, config.start_iteration, config.num_iteration);
        let result = match config.predict_type {
            C_API_PREDICT_RAW_SCORE => model.predict_raw(&config.row, start, num),
            C_API_PREDICT_LEAF_INDEX => model.predict_leaf_index(&config.row, start, num),
            C_API_PREDICT_CONTRIB => model.predict_contrib(&config.row, start, num),
            _ => model.predict(&config.row, start, num),
        };
        unsafe {
            std::ptr::copy_nonoverlapping(result.as_ptr(), out_result, result.len());
            write_out(out_len, result.len() as i64, "out_len")
        }
    })
}

/// Free a fast configuration.
///
/// # Safety
/// `fast_config` is null or a fast-config handle not freed before.
#[no_mangle]
pub unsafe extern "C" fn LGBM_FastConfigFree(fast_config: FastConfigHandle) -> c_int {
    api_call("LGBM_FastConfigFree", || {
        unsafe { free_handle::<FastConfig>(fast_config) };
        Ok(())
    })
}

/// Free a booster. Fast configurations created from it stay valid.
///
/// # Safety
/// `handle` is null or a booster handle not freed before.
#[no_mangle]
pub unsafe extern "C" fn LGBM_BoosterFree(handle: BoosterHandle) -> c_int {
    api_call("LGBM_BoosterFree", || {
        unsafe { free_handle::<Booster>(handle) };
        Ok(())
    })
}
