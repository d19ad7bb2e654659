//! Image classification service: accepts an uploaded image, scores it with a
//! pretrained binary classifier, stores the labelled result and returns it.

pub mod app;
pub mod classifier;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handlers;
pub mod models;
pub mod pipeline;
pub mod policy;
pub mod preprocess;
pub mod store;
mod timer;

#[cfg(test)]
mod fake_backend;

pub use classifier::{Classifier, ModelSource, OnnxClassifier};
pub use error::{PredictError, StartupError};
pub use models::{Label, PredictionRecord, UploadedImage};
pub use pipeline::{PredictionPipeline, UploadLimits};
pub use policy::DecisionPolicy;
pub use store::{InMemoryStore, ResultStore};
