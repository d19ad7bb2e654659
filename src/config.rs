use std::str::FromStr;
use std::time::Duration;

use structopt::StructOpt;

use crate::classifier::ModelSource;
use crate::credentials::CredentialSource;
use crate::error::StartupError;
use crate::pipeline::UploadLimits;
use crate::policy::DecisionPolicy;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoreBackend {
    Memory,
    Firestore,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "firestore" => Ok(StoreBackend::Firestore),
            other => Err(format!("unknown store '{}', expected memory or firestore", other)),
        }
    }
}

/// Service settings. Every flag falls back to an environment variable.
#[derive(Debug, StructOpt)]
#[structopt(name = "lesion-classifier", about = "Skin lesion image classification service")]
pub struct Settings {
    #[structopt(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[structopt(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Largest accepted multipart body, in bytes
    #[structopt(long, env = "MAX_UPLOAD_BYTES", default_value = "1000000")]
    pub max_upload_bytes: usize,

    /// Local path or http(s) URL of the ONNX model
    #[structopt(long, env = "MODEL_SOURCE", default_value = "model.onnx")]
    pub model_source: ModelSource,

    /// Scores above this value are labelled Cancer
    #[structopt(long, env = "CLASSIFICATION_THRESHOLD", default_value = "0.58")]
    pub threshold: f32,

    /// Comma separated file extensions
    #[structopt(long, env = "ACCEPTED_EXTENSIONS", default_value = "png")]
    pub accepted_extensions: String,

    /// memory or firestore
    #[structopt(long = "store", env = "RESULT_STORE", default_value = "memory")]
    pub store: StoreBackend,

    #[structopt(long, env = "FIRESTORE_COLLECTION", default_value = "predictions")]
    pub collection: String,

    #[structopt(
        long,
        env = "FIRESTORE_URL",
        default_value = "https://firestore.googleapis.com/v1"
    )]
    pub firestore_url: String,

    /// env, metadata, file:<path> or secret-manager:<resource>
    #[structopt(long, env = "CREDENTIALS_SOURCE", default_value = "env")]
    pub credentials: CredentialSource,

    #[structopt(long, env = "STORE_TIMEOUT_SECS", default_value = "10")]
    pub store_timeout_secs: u64,

    /// Comma separated allowed origins, `*` for any
    #[structopt(long, env = "CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,
}

impl Settings {
    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn extensions(&self) -> Vec<String> {
        split_list(&self.accepted_extensions)
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect()
    }

    pub fn origins(&self) -> Vec<String> {
        split_list(&self.cors_origins)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn policy(&self) -> DecisionPolicy {
        DecisionPolicy::new(self.threshold)
    }

    pub fn limits(&self) -> UploadLimits {
        UploadLimits {
            max_bytes: self.max_upload_bytes,
            accepted_extensions: self.extensions(),
        }
    }

    /// Rejects values that would make every request fail.
    pub fn validate(&self) -> Result<(), StartupError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(StartupError::Config(format!(
                "threshold {} is outside [0, 1]",
                self.threshold
            )));
        }
        if self.max_upload_bytes == 0 {
            return Err(StartupError::Config("max upload size must be positive".into()));
        }
        if self.extensions().is_empty() {
            return Err(StartupError::Config("no accepted file extensions".into()));
        }
        if self.store_timeout_secs == 0 {
            return Err(StartupError::Config("store timeout must be positive".into()));
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
