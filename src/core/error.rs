//! Error handling and error types for the LightGBM provider.
//!
//! Operational calls (`fit`, `load_model`, `class_distribution`) fail fast with
//! a [`ProviderError`]. Validation-style calls collect
//! [`ParamValidationError`](crate::config::ParamValidationError)s instead.

use std::io;
use thiserror::Error;

/// Main error type for the provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// A native engine call returned its error sentinel
    #[error("Native engine error in {operation}: {message}")]
    Native {
        /// `LGBM_*` function that failed
        operation: String,
        /// Engine's last error message
        message: String,
    },

    /// A persisted model could not be loaded or is incompatible with the schema
    #[error("Model loading error: {message}")]
    ModelLoading {
        /// Human-readable detail
        message: String,
    },

    /// Training failed for a reason other than a native call
    #[error("Training error: {message}")]
    Training {
        /// Human-readable detail
        message: String,
    },

    /// The training dataset had no instances
    #[error("Empty dataset: {message}")]
    EmptyDataset {
        /// Human-readable detail
        message: String,
    },

    /// Malformed schema or instance
    #[error("Schema error: {message}")]
    Schema {
        /// Human-readable detail
        message: String,
    },

    /// Invalid input parameters
    #[error("Invalid parameter: {parameter} = {value}, {reason}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Rejected value
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// Host CPU architecture or C library has no native variant
    #[error("Unsupported platform: {message}")]
    UnsupportedPlatform {
        /// Human-readable detail
        message: String,
    },

    /// File I/O errors
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: io::Error,
    },

    /// JSON / TOML decoding errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable detail
        message: String,
    },

    /// CSV parsing errors
    #[cfg(feature = "csv")]
    #[error("CSV parsing error: {source}")]
    Csv {
        /// Underlying CSV error
        #[from]
        source: csv::Error,
    },

    /// Internal errors (should not occur in normal usage)
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable detail
        message: String,
    },
}

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    /// Create a native engine error for the named operation.
    pub fn native<S: Into<String>, M: Into<String>>(operation: S, message: M) -> Self {
        ProviderError::Native {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a model loading error
    pub fn model_loading<S: Into<String>>(message: S) -> Self {
        ProviderError::ModelLoading {
            message: message.into(),
        }
    }

    /// Create a training error
    pub fn training<S: Into<String>>(message: S) -> Self {
        ProviderError::Training {
            message: message.into(),
        }
    }

    /// Create an empty dataset error
    pub fn empty_dataset<S: Into<String>>(message: S) -> Self {
        ProviderError::EmptyDataset {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema<S: Into<String>>(message: S) -> Self {
        ProviderError::Schema {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter<P: Into<String>, V: Into<String>, R: Into<String>>(
        parameter: P,
        value: V,
        reason: R,
    ) -> Self {
        ProviderError::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an unsupported platform error
    pub fn unsupported_platform<S: Into<String>>(message: S) -> Self {
        ProviderError::UnsupportedPlatform {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        ProviderError::Serialization {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        ProviderError::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller may retry the operation with different input.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ProviderError::Native { .. } => false,
            ProviderError::ModelLoading { .. } => true,
            ProviderError::Training { .. } => true,
            ProviderError::EmptyDataset { .. } => true,
            ProviderError::Schema { .. } => true,
            ProviderError::InvalidParameter { .. } => true,
            ProviderError::UnsupportedPlatform { .. } => false,
            ProviderError::Io { .. } => false,
            ProviderError::Serialization { .. } => false,
            #[cfg(feature = "csv")]
            ProviderError::Csv { .. } => false,
            ProviderError::Internal { .. } => false,
        }
    }

    /// Get error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            ProviderError::Native { .. } => "native",
            ProviderError::ModelLoading { .. } => "model_loading",
            ProviderError::Training { .. } => "training",
            ProviderError::EmptyDataset { .. } => "empty_dataset",
            ProviderError::Schema { .. } => "schema",
            ProviderError::InvalidParameter { .. } => "invalid_parameter",
            ProviderError::UnsupportedPlatform { .. } => "unsupported_platform",
            ProviderError::Io { .. } => "io",
            ProviderError::Serialization { .. } => "serialization",
            #[cfg(feature = "csv")]
            ProviderError::Csv { .. } => "csv",
            ProviderError::Internal { .. } => "internal",
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ProviderError {
    fn from(err: toml::de::Error) -> Self {
        ProviderError::serialization(err.to_string())
    }
}

/// Build a [`ProviderError::Native`] with a formatted message.
#[macro_export]
macro_rules! native_error {
    ($op:expr, $msg:expr) => {
        $crate::core::error::ProviderError::native($op, $msg)
    };
    ($op:expr, $fmt:expr, $($arg:tt)*) => {
        $crate::core::error::ProviderError::native($op, format!($fmt, $($arg)*))
    };
}

/// Build a [`ProviderError::ModelLoading`] with a formatted message.
#[macro_export]
macro_rules! model_loading_error {
    ($msg:expr) => {
        $crate::core::error::ProviderError::model_loading($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::ProviderError::model_loading(format!($fmt, $($arg)*))
    };
}

/// Return early with the given error when a condition does not hold.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            return Err($err.into());
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ProviderError::model_loading("bad model");
        assert_eq!(err.category(), "model_loading");
        assert!(err.is_recoverable());

        let err = ProviderError::native("LGBM_BoosterCreate", "boom");
        assert_eq!(err.category(), "native");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_macros() {
        let err = native_error!("LGBM_DatasetSetField", "field {} unknown", "foo");
        assert_eq!(
            err.to_string(),
            "Native engine error in LGBM_DatasetSetField: field foo unknown"
        );

        let err = model_loading_error!("Cannot find model file");
        assert!(matches!(err, ProviderError::ModelLoading { .. }));
    }

    #[test]
    fn test_ensure_macro() {
        fn check(value: usize) -> Result<usize> {
            ensure!(value > 0, ProviderError::internal("zero"));
            Ok(value)
        }
        assert!(check(1).is_ok());
        assert!(check(0).is_err());
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: ProviderError = io_err.into();
        assert_eq!(err.category(), "io");
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::invalid_parameter("num_leaves", "1", "must be at least 2");
        assert_eq!(
            err.to_string(),
            "Invalid parameter: num_leaves = 1, must be at least 2"
        );
    }
}
