//! The provider surface a host platform talks to.
//!
//! [`ModelCreator`] trains and loads models and validates requests before
//! either happens. [`BinaryClassificationModel`] scores single instances and
//! [`FeatureContributionExplainer`] explains them with TreeSHAP.

pub mod creator;
pub mod model;

pub use creator::ModelCreator;
pub use model::{BinaryClassificationModel, FeatureContributionExplainer};
