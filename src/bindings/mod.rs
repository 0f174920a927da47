//! Owned wrappers over the native engine's opaque handles.
//!
//! A native create call writes the new handle into an out-parameter slot
//! ([`OutHandle`]); the value is then moved into a [`NativeHandle`] that
//! frees it exactly once, on `close` or on drop. Every native status code is
//! checked with [`check_call`], which turns the engine's last error into a
//! [`ProviderError::Native`].

mod booster;
mod scoring;
mod train_data;

pub use booster::TrainBooster;
pub use scoring::ScoringResources;
pub use train_data::TrainData;

use crate::core::error::{ProviderError, Result};
use crate::native;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_int;
use std::ptr;

/// Native free function for one kind of handle.
pub type FreeFn = unsafe extern "C" fn(*mut c_void) -> c_int;

/// Message of the last failed native call on this thread.
pub fn last_native_error() -> String {
    let message = unsafe { CStr::from_ptr(native::LGBM_GetLastError()) };
    message.to_string_lossy().into_owned()
}

/// Turn a native status code into a result, logging failures.
pub fn check_call(status: c_int, operation: &str) -> Result<()> {
    if status == 0 {
        return Ok(());
    }
    let message = last_native_error();
    log::error!("{} failed: {}", operation, message);
    Err(ProviderError::native(operation, message))
}

/// C string for a parameter string or path handed to the engine.
pub fn to_c_string(value: &str, what: &str) -> Result<CString> {
    CString::new(value).map_err(|_| ProviderError::invalid_parameter(what, value, "contains a NUL byte"))
}

/// Slot the engine writes a newly created handle into.
#[derive(Debug)]
pub struct OutHandle {
    slot: Box<*mut c_void>,
}

impl OutHandle {
    /// Empty slot.
    pub fn new() -> Self {
        OutHandle {
            slot: Box::new(ptr::null_mut()),
        }
    }

    /// Address to pass as the `out` argument of a native create call.
    pub fn acquire_output_pointer(&mut self) -> *mut *mut c_void {
        &mut *self.slot
    }

    /// Move the written handle out, leaving the slot empty.
    pub fn materialize(&mut self, operation: &str) -> Result<*mut c_void> {
        let handle = std::mem::replace(&mut *self.slot, ptr::null_mut());
        if handle.is_null() {
            return Err(ProviderError::native(operation, "engine returned a null handle"));
        }
        Ok(handle)
    }
}

impl Default for OutHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle freed with `free` exactly once.
pub struct NativeHandle {
    ptr: *mut c_void,
    free: FreeFn,
    kind: &'static str,
}

// SAFETY: the engine's handle targets (datasets, boosters, fast configs) are
// `Send`; access is serialized by the owning wrapper.
unsafe impl Send for NativeHandle {}

impl NativeHandle {
    /// Not-yet-created handle of `kind`.
    pub fn null(kind: &'static str, free: FreeFn) -> Self {
        NativeHandle {
            ptr: ptr::null_mut(),
            free,
            kind,
        }
    }

    /// Raw handle value.
    pub fn get(&self) -> *mut c_void {
        self.ptr
    }

    /// Whether no handle is held.
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Take ownership of `ptr`, freeing any handle held before.
    pub fn set(&mut self, ptr: *mut c_void) {
        self.release();
        self.ptr = ptr;
    }

    /// Free the handle if one is held. Failures are logged, not returned.
    pub fn release(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        let status = unsafe { (self.free)(self.ptr) };
        if status != 0 {
            log::error!("Failed to free {} handle: {}", self.kind, last_native_error());
        }
        self.ptr = ptr::null_mut();
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeHandle")
            .field("kind", &self.kind)
            .field("ptr", &self.ptr)
            .finish()
    }
}
