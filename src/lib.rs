//! # LightGBM provider
//!
//! Trains and scores LightGBM binary classifiers for a host scoring
//! platform through one normalized interface.
//!
//! The gradient-boosting engine lives in [`native`] and is reached only
//! through its C ABI (`LGBM_*` functions, opaque handles, `0`/`-1` status
//! codes). [`bindings`] owns those handles so that every exit path frees
//! them, [`train`] streams an in-memory [`schema::Dataset`] into the engine's
//! chunked buffers, and [`provider`] is the surface a host talks to.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lightgbm_provider::config::params_with_overrides;
//! use lightgbm_provider::schema::{DatasetSchema, FieldSchema, InMemoryDataset};
//! use lightgbm_provider::ModelCreator;
//! use std::sync::Arc;
//!
//! # fn main() -> lightgbm_provider::Result<()> {
//! let schema = Arc::new(DatasetSchema::new(
//!     vec![
//!         FieldSchema::numeric("amount", 0),
//!         FieldSchema::categorical("merchant", 1, ["A", "B"]),
//!         FieldSchema::categorical("fraud", 2, ["false", "true"]),
//!     ],
//!     Some(2),
//! )?);
//! let dataset = InMemoryDataset::new(
//!     Arc::clone(&schema),
//!     vec![vec![10.0, 0.0, 0.0].into(), vec![900.0, 1.0, 1.0].into()],
//! )?;
//!
//! let creator = ModelCreator::new()?;
//! let params = params_with_overrides([("num_iterations", "50")]);
//! let model = creator.fit(&dataset, 42, &params)?;
//!
//! let [_, p_fraud] = model.class_distribution(&[500.0, 1.0, 0.0][..])?;
//! println!("fraud probability: {}", p_fraud);
//! model.save(std::path::Path::new("/tmp/model"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! Every module logs through the [`log`] facade. [`ModelCreator::new`]
//! installs `env_logger` once, honoring `RUST_LOG`, unless the host already
//! set a logger.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_debug_implementations, rust_2018_idioms, non_upper_case_globals)]

// Error taxonomy, constants and chunked buffers
pub mod core;

// Dataset schema and instances
pub mod schema;

// Parameter catalog and validation
pub mod config;

// Gradient-boosting engine behind a C ABI
pub mod native;

// Owned wrappers over native handles
pub mod bindings;

// Dataset-to-engine training pipeline
pub mod train;

// Model creator, scoring model and explainer
pub mod provider;

// Host platform detection
pub mod infrastructure;

pub use crate::core::error::{ProviderError, Result};
pub use crate::core::memory::ChunkedArray;
pub use config::{default_params, params_with_overrides, ParamValidationError, Params};
pub use infrastructure::{CpuArchitecture, Infrastructure, LibcImplementation};
pub use provider::{BinaryClassificationModel, FeatureContributionExplainer, ModelCreator};
pub use schema::{Dataset, DatasetSchema, DenseInstance, FieldSchema, InMemoryDataset, Instance, ValueSchema};
pub use train::TrainingSummary;

/// Version of the provider crate.
pub const VERSION: &str = crate::core::PROVIDER_VERSION;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_reexports() {
        let params: Params = default_params();
        assert!(params.contains_key("boosting_type"));
        let _chunks: ChunkedArray<f64> = ChunkedArray::new(4).unwrap();
    }
}
