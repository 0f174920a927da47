//! Training pipeline.
//!
//! [`trainer::fit`] streams a [`Dataset`](crate::schema::Dataset) into chunked
//! buffers ([`copier`]), builds the native dataset and booster with the
//! parameter string assembled by [`params`], runs the boosting loop and saves
//! the model file.

pub mod copier;
pub mod params;
pub mod trainer;

pub use copier::copy_train_data;
pub use params::{remap_index_excluding_label, train_params_string};
pub use trainer::{fit, fit_with_chunk_size, TrainingSummary};
