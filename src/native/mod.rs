//! In-process gradient-boosting engine behind a LightGBM-compatible C ABI.
//!
//! The engine owns datasets, boosters and fast prediction configurations and
//! hands them out as opaque `*mut c_void` handles through the `LGBM_*`
//! functions in [`c_api`]. Every entry point returns `0` on success and `-1`
//! on failure; the failure message is kept per thread and read back with
//! [`c_api::LGBM_GetLastError`].
//!
//! Internally the engine follows the LightGBM design: quantile bin mappers,
//! histogram-based split finding, leaf-wise tree growth and the text model
//! format (`version=v4`).

pub mod bin;
pub mod boosting;
pub mod c_api;
pub mod config;
pub mod dataset;
pub mod learner;
pub mod model;
pub mod objective;
pub mod tree;

pub use c_api::*;

use std::cell::RefCell;
use std::ffi::CString;

/// Row or column element is a `f32`.
pub const C_API_DTYPE_FLOAT32: i32 = 0;
/// Row or column element is a `f64`.
pub const C_API_DTYPE_FLOAT64: i32 = 1;
/// Field element is an `i32`.
pub const C_API_DTYPE_INT32: i32 = 2;
/// Field element is an `i64`.
pub const C_API_DTYPE_INT64: i32 = 3;

/// Transformed score (probability for binary objectives).
pub const C_API_PREDICT_NORMAL: i32 = 0;
/// Raw margin before the output transform.
pub const C_API_PREDICT_RAW_SCORE: i32 = 1;
/// Index of the leaf reached in every tree.
pub const C_API_PREDICT_LEAF_INDEX: i32 = 2;
/// TreeSHAP feature contributions followed by the expected value.
pub const C_API_PREDICT_CONTRIB: i32 = 3;

/// Feature importance counted as number of splits.
pub const C_API_FEATURE_IMPORTANCE_SPLIT: i32 = 0;
/// Feature importance counted as total split gain.
pub const C_API_FEATURE_IMPORTANCE_GAIN: i32 = 1;

/// Opaque dataset handle.
pub type DatasetHandle = *mut std::ffi::c_void;
/// Opaque booster handle.
pub type BoosterHandle = *mut std::ffi::c_void;
/// Opaque single-row prediction configuration handle.
pub type FastConfigHandle = *mut std::ffi::c_void;

/// Values whose absolute value is at most this are treated as zero.
pub(crate) const ZERO_THRESHOLD: f64 = 1e-35;
/// Small positive value guarding divisions in the engine.
pub(crate) const EPSILON: f64 = 1e-15;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

/// Record the message returned by the next `LGBM_GetLastError` on this thread.
pub(crate) fn set_last_error(message: &str) {
    let sanitized = message.replace('\0', " ");
    let message = CString::new(sanitized).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

/// Pointer to the thread's last error message; valid until the next failure
/// on the same thread.
pub(crate) fn last_error_ptr() -> *const std::os::raw::c_char {
    LAST_ERROR.with(|slot| slot.borrow().as_ptr())
}

/// Whether a value counts as zero for missing-value handling.
#[inline]
pub(crate) fn is_zero(value: f64) -> bool {
    value.abs() <= ZERO_THRESHOLD
}
