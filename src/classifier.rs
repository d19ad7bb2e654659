use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::info;
use ndarray::Array4;
use tempfile::Builder;
use tract_onnx::prelude::*;

use crate::error::{InferenceError, ModelLoadError};
use crate::preprocess::{CHANNELS, INPUT_SIZE};

/// Scores a preprocessed image. Implementations are shared read-only across
/// request threads.
pub trait Classifier: Send + Sync {
    /// Returns a probability-like score in `[0, 1]`.
    fn infer(&self, input: &Array4<f32>) -> Result<f32, InferenceError>;
}

/// Where the serialized model graph lives.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    Path(PathBuf),
    Url(String),
}

impl FromStr for ModelSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("model source is empty".to_owned());
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            Ok(ModelSource::Url(s.to_owned()))
        } else {
            Ok(ModelSource::Path(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Path(path) => write!(f, "{}", path.display()),
            ModelSource::Url(url) => f.write_str(url),
        }
    }
}

/// ONNX model run with tract. Input is NHWC `[1, 224, 224, 3]` f32.
pub struct OnnxClassifier {
    model: TypedRunnableModel<TypedModel>,
}

impl OnnxClassifier {
    /// Loads from a local path or downloads from a URL first.
    pub async fn load(source: &ModelSource) -> Result<Self, ModelLoadError> {
        match source {
            ModelSource::Path(path) => Self::from_path(path),
            ModelSource::Url(url) => {
                let bytes = fetch_model(url).await?;

                let mut file = Builder::new()
                    .prefix("model")
                    .suffix(".onnx")
                    .tempfile()?;
                file.write_all(&bytes)?;
                file.flush()?;

                Self::from_path(file.path())
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ModelLoadError> {
        info!("Loading ONNX model from {}", path.display());

        let side = INPUT_SIZE as usize;
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| {
                model.with_input_fact(0, f32::fact([1, side, side, CHANNELS]).into())
            })
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| ModelLoadError::Graph(e.into()))?;

        info!("Model loaded");
        Ok(OnnxClassifier { model })
    }
}

async fn fetch_model(url: &str) -> Result<Vec<u8>, ModelLoadError> {
    info!("Downloading model from {}", url);

    let download = |source: reqwest::Error| ModelLoadError::Download {
        url: url.to_owned(),
        source,
    };

    let resp = reqwest::get(url)
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(download)?;
    let bytes = resp.bytes().await.map_err(download)?;

    Ok(bytes.to_vec())
}

impl Classifier for OnnxClassifier {
    fn infer(&self, input: &Array4<f32>) -> Result<f32, InferenceError> {
        let tensor: Tensor = input.clone().into();

        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .map_err(|e| InferenceError::Runtime(e.into()))?;

        let first = outputs.first().ok_or(InferenceError::EmptyOutput)?;
        let view = first
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::Runtime(e.into()))?;

        view.iter().next().copied().ok_or(InferenceError::EmptyOutput)
    }
}
