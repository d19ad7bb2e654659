//! Error types for the prediction service.
//!
//! `PredictError` is the only error that reaches a client. Everything that goes
//! wrong after validation is wrapped in a `PipelineFault`, logged, and reported
//! with one generic message.

use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::FailResponse;

/// Message returned for every failure after validation.
pub const PREDICTION_FAILED_MESSAGE: &str = "Terjadi kesalahan dalam melakukan prediksi";

/// Errors returned to the HTTP caller.
#[derive(Error, Debug)]
pub enum PredictError {
    /// Missing upload, bad extension or malformed multipart body.
    #[error("{0}")]
    InvalidInput(String),

    /// Upload exceeds the configured byte limit.
    #[error("Payload content length greater than maximum allowed: {limit}")]
    PayloadTooLarge { limit: usize },

    /// Decode, inference or store failure.
    #[error("{}", PREDICTION_FAILED_MESSAGE)]
    PredictionFailed(#[from] PipelineFault),
}

/// Formats an error followed by each of its sources, `: ` separated.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

impl PredictError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        PredictError::InvalidInput(message.into())
    }
}

impl ResponseError for PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PredictError::InvalidInput(_) | PredictError::PredictionFailed(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(FailResponse::new(self.to_string()))
    }
}

/// Internal cause behind `PredictError::PredictionFailed`.
#[derive(Error, Debug)]
pub enum PipelineFault {
    #[error("decode")]
    Decode(#[from] DecodeError),

    #[error("inference")]
    Inference(#[from] InferenceError),

    #[error("store write")]
    Store(#[from] StoreError),

    #[error("store write timed out after {0:?}")]
    StoreTimeout(Duration),

    #[error("blocking task did not complete")]
    Blocking(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The upload could not be turned into an RGB image.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image decode")]
    Image(#[from] image::ImageError),

    #[error("tensor shape")]
    Shape(#[from] ndarray::ShapeError),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model run")]
    Runtime(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("model produced no output values")]
    EmptyOutput,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable(#[from] reqwest::Error),

    #[error("store rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("store credentials")]
    Credentials(#[from] CredentialError),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("read credentials file")]
    Io(#[from] std::io::Error),

    #[error("parse credentials")]
    Parse(#[from] serde_json::Error),

    #[error("secret request")]
    Http(#[from] reqwest::Error),

    #[error("secret payload is not valid base64")]
    Base64(#[from] base64::DecodeError),

    #[error("secret source returned status {0}")]
    Status(u16),
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("download model from {url}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("write downloaded model")]
    Io(#[from] std::io::Error),

    #[error("build model graph")]
    Graph(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Fatal errors raised before the server starts accepting requests.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("model load")]
    Model(#[from] ModelLoadError),

    #[error("credential load")]
    Credentials(#[from] CredentialError),

    #[error("store client")]
    Store(#[from] StoreError),
}
