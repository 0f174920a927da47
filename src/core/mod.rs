//! Core infrastructure for the LightGBM provider.
//!
//! - [`constants`]: file names, chunk sizes and user-facing messages
//! - [`error`]: the [`ProviderError`] taxonomy
//! - [`memory`]: the [`ChunkedArray`] used to stream training data
//!
//! ```rust
//! use lightgbm_provider::core::{memory::ChunkedArray, DEFAULT_TRAIN_DATA_CHUNK_INSTANCES_SIZE};
//!
//! let mut labels: ChunkedArray<f32> = ChunkedArray::new(DEFAULT_TRAIN_DATA_CHUNK_INSTANCES_SIZE)?;
//! labels.add(1.0);
//! assert_eq!(labels.get_add_count(), 1);
//! # Ok::<(), lightgbm_provider::core::ProviderError>(())
//! ```

pub mod constants;
pub mod error;
pub mod memory;

pub use constants::*;
pub use error::{ProviderError, Result};
pub use memory::ChunkedArray;

use std::sync::Once;

/// Version of the provider crate.
pub const PROVIDER_VERSION: &str = env!("CARGO_PKG_VERSION");

static LOGGING_INIT: Once = Once::new();

/// Install `env_logger` as the `log` backend, once per process.
///
/// Respects `RUST_LOG`; does nothing if the host already installed a logger.
pub fn init_logging() {
    LOGGING_INIT.call_once(|| {
        if env_logger::try_init().is_ok() {
            log::debug!("LightGBM provider {} logging initialized", PROVIDER_VERSION);
        }
    });
}

/// Replace every whitespace character with `_`, as the native engine does
/// for feature names.
pub fn normalize_feature_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}
