//! Request pipeline: validate, preprocess, infer, classify, persist.
//!
//! Validation failures are reported with a specific message. Anything that
//! fails afterwards is logged with its cause chain and collapsed into
//! `PredictError::PredictionFailed`. A record is returned only after the store
//! confirmed the write.

use std::sync::Arc;
use std::time::Duration;

use actix_rt::{task, time};
use actix_web::web::Bytes;
use log::{error, info, warn};

use crate::classifier::Classifier;
use crate::error::{error_chain, PipelineFault, PredictError};
use crate::models::{PredictionRecord, UploadedImage};
use crate::policy::DecisionPolicy;
use crate::preprocess::preprocess;
use crate::store::ResultStore;
use crate::timer::Timer;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1_000_000;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_bytes: usize,
    /// Lowercase extensions without the leading dot.
    pub accepted_extensions: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        UploadLimits {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            accepted_extensions: vec!["png".to_owned()],
        }
    }
}

pub struct PredictionPipeline {
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn ResultStore>,
    policy: DecisionPolicy,
    limits: UploadLimits,
    store_timeout: Duration,
}

impl PredictionPipeline {
    pub fn new(classifier: Arc<dyn Classifier>, store: Arc<dyn ResultStore>) -> Self {
        PredictionPipeline {
            classifier,
            store,
            policy: DecisionPolicy::default(),
            limits: UploadLimits::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: DecisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Checks presence, size and extension, in that order.
    pub fn validate<'a>(
        &self,
        upload: Option<&'a UploadedImage>,
    ) -> Result<&'a UploadedImage, PredictError> {
        let upload = match upload {
            Some(upload) if upload.size() > 0 => upload,
            _ => return Err(PredictError::invalid_input("File is required")),
        };

        if upload.size() > self.limits.max_bytes {
            return Err(PredictError::PayloadTooLarge {
                limit: self.limits.max_bytes,
            });
        }

        let accepted = upload
            .extension()
            .map(|ext| self.limits.accepted_extensions.iter().any(|a| *a == ext))
            .unwrap_or(false);
        if !accepted {
            return Err(PredictError::invalid_input("Unsupported file format"));
        }

        Ok(upload)
    }

    pub async fn handle(
        &self,
        upload: Option<UploadedImage>,
    ) -> Result<PredictionRecord, PredictError> {
        let upload = self.validate(upload.as_ref()).map_err(|e| {
            warn!("Rejected upload: {}", e);
            e
        })?;

        self.run(upload.data.clone()).await.map_err(|fault| {
            error!("Prediction failed: {}", error_chain(&fault));
            PredictError::from(fault)
        })
    }

    async fn run(&self, data: Bytes) -> Result<PredictionRecord, PipelineFault> {
        let score = self.score(data).await?;

        let (label, _) = self.policy.classify(score);
        let record = PredictionRecord::new(label);

        self.persist(&record).await?;

        info!("Stored prediction {} ({}, score {:.4})", record.id, label, score);
        Ok(record)
    }

    /// Decode and inference are CPU bound and run on the blocking pool.
    async fn score(&self, data: Bytes) -> Result<f32, PipelineFault> {
        let classifier = Arc::clone(&self.classifier);

        task::spawn_blocking(move || -> Result<f32, PipelineFault> {
            let t = Timer::start("Preprocessing image");
            let tensor = preprocess(&data)?;
            t.stop();

            let t = Timer::start("Running model");
            let score = classifier.infer(&tensor)?;
            t.stop();

            Ok(score)
        })
        .await
        .map_err(|e| PipelineFault::Blocking(Box::new(e)))?
    }

    async fn persist(&self, record: &PredictionRecord) -> Result<(), PipelineFault> {
        let t = Timer::start("Writing record");

        time::timeout(self.store_timeout, self.store.save(record))
            .await
            .map_err(|_| PipelineFault::StoreTimeout(self.store_timeout))??;

        t.stop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InferenceError, StoreError};
    use crate::models::Label;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
    use ndarray::Array4;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedScore {
        score: Option<f32>,
        calls: AtomicUsize,
    }

    impl FixedScore {
        fn new(score: f32) -> Arc<Self> {
            Arc::new(FixedScore {
                score: Some(score),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(FixedScore {
                score: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Classifier for FixedScore {
        fn infer(&self, input: &Array4<f32>) -> Result<f32, InferenceError> {
            assert_eq!(input.shape(), &[1, 224, 224, 3]);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.score.ok_or(InferenceError::EmptyOutput)
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl ResultStore for BrokenStore {
        async fn save(&self, _record: &PredictionRecord) -> Result<(), StoreError> {
            Err(StoreError::Rejected {
                status: 403,
                body: "PERMISSION_DENIED".into(),
            })
        }
    }

    struct SlowStore;

    #[async_trait]
    impl ResultStore for SlowStore {
        async fn save(&self, _record: &PredictionRecord) -> Result<(), StoreError> {
            time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(224, 224, Rgb([200, 120, 90]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    fn png_upload() -> UploadedImage {
        UploadedImage::new(png_bytes(), Some("lesion.png".into()))
    }

    fn pipeline(classifier: Arc<FixedScore>, store: Arc<InMemoryStore>) -> PredictionPipeline {
        PredictionPipeline::new(classifier, store)
    }

    #[actix_rt::test]
    async fn high_score_is_cancer_and_persisted() {
        let model = FixedScore::new(0.9);
        let store = Arc::new(InMemoryStore::new());

        let record = pipeline(model.clone(), store.clone())
            .handle(Some(png_upload()))
            .await
            .unwrap();

        assert_eq!(record.result, Label::Cancer);
        assert_eq!(record.suggestion, "Segera periksa ke dokter!");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&record.id), Some(record));
        assert_eq!(model.calls(), 1);
    }

    #[actix_rt::test]
    async fn low_score_is_non_cancer() {
        let store = Arc::new(InMemoryStore::new());

        let record = pipeline(FixedScore::new(0.1), store.clone())
            .handle(Some(png_upload()))
            .await
            .unwrap();

        assert_eq!(record.result, Label::NonCancer);
        assert_eq!(record.suggestion, "Penyakit kanker tidak terdeteksi.");
        assert_eq!(store.len(), 1);
    }

    #[actix_rt::test]
    async fn configured_threshold_is_used() {
        let store = Arc::new(InMemoryStore::new());

        let record = pipeline(FixedScore::new(0.7), store)
            .with_policy(DecisionPolicy::new(0.8))
            .handle(Some(png_upload()))
            .await
            .unwrap();

        assert_eq!(record.result, Label::NonCancer);
    }

    #[actix_rt::test]
    async fn missing_upload_is_invalid_input() {
        let model = FixedScore::new(0.9);
        let store = Arc::new(InMemoryStore::new());

        let err = pipeline(model.clone(), store.clone())
            .handle(None)
            .await
            .unwrap_err();

        assert!(matches!(err, PredictError::InvalidInput(ref m) if m == "File is required"));
        assert_eq!(model.calls(), 0);
        assert!(store.is_empty());
    }

    #[actix_rt::test]
    async fn empty_upload_is_invalid_input() {
        let store = Arc::new(InMemoryStore::new());
        let upload = UploadedImage::new(Vec::<u8>::new(), Some("lesion.png".into()));

        let err = pipeline(FixedScore::new(0.9), store)
            .handle(Some(upload))
            .await
            .unwrap_err();

        assert!(matches!(err, PredictError::InvalidInput(_)));
    }

    #[actix_rt::test]
    async fn oversized_upload_never_reaches_model() {
        let model = FixedScore::new(0.9);
        let store = Arc::new(InMemoryStore::new());
        let limits = UploadLimits {
            max_bytes: 100,
            ..UploadLimits::default()
        };

        let err = pipeline(model.clone(), store.clone())
            .with_limits(limits)
            .handle(Some(png_upload()))
            .await
            .unwrap_err();

        assert!(matches!(err, PredictError::PayloadTooLarge { limit: 100 }));
        assert_eq!(model.calls(), 0);
        assert!(store.is_empty());
    }

    #[actix_rt::test]
    async fn size_is_checked_before_format() {
        let limits = UploadLimits {
            max_bytes: 4,
            ..UploadLimits::default()
        };
        let upload = UploadedImage::new(vec![0u8; 5], Some("notes.txt".into()));

        let err = pipeline(FixedScore::new(0.9), Arc::new(InMemoryStore::new()))
            .with_limits(limits)
            .handle(Some(upload))
            .await
            .unwrap_err();

        assert!(matches!(err, PredictError::PayloadTooLarge { .. }));
    }

    #[actix_rt::test]
    async fn unsupported_extension_is_rejected() {
        let model = FixedScore::new(0.9);
        let upload = UploadedImage::new(png_bytes(), Some("lesion.jpg".into()));

        let err = pipeline(model.clone(), Arc::new(InMemoryStore::new()))
            .handle(Some(upload))
            .await
            .unwrap_err();

        assert!(matches!(err, PredictError::InvalidInput(ref m) if m == "Unsupported file format"));
        assert_eq!(model.calls(), 0);
    }

    #[actix_rt::test]
    async fn extension_match_ignores_case() {
        let upload = UploadedImage::new(png_bytes(), Some("LESION.PNG".into()));

        let record = pipeline(FixedScore::new(0.9), Arc::new(InMemoryStore::new()))
            .handle(Some(upload))
            .await;

        assert!(record.is_ok());
    }

    #[actix_rt::test]
    async fn undecodable_bytes_fail_without_writes() {
        let model = FixedScore::new(0.9);
        let store = Arc::new(InMemoryStore::new());
        let upload = UploadedImage::new(&b"just some text"[..], Some("notes.png".into()));

        let err = pipeline(model.clone(), store.clone())
            .handle(Some(upload))
            .await
            .unwrap_err();

        assert!(matches!(err, PredictError::PredictionFailed(PipelineFault::Decode(_))));
        assert_eq!(model.calls(), 0);
        assert!(store.is_empty());
    }

    #[actix_rt::test]
    async fn inference_failure_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());

        let err = pipeline(FixedScore::failing(), store.clone())
            .handle(Some(png_upload()))
            .await
            .unwrap_err();

        assert!(matches!(err, PredictError::PredictionFailed(PipelineFault::Inference(_))));
        assert!(store.is_empty());
    }

    #[actix_rt::test]
    async fn store_failure_is_prediction_failure() {
        let err = PredictionPipeline::new(FixedScore::new(0.9), Arc::new(BrokenStore))
            .handle(Some(png_upload()))
            .await
            .unwrap_err();

        assert!(matches!(err, PredictError::PredictionFailed(PipelineFault::Store(_))));
    }

    #[actix_rt::test]
    async fn slow_store_times_out() {
        let err = PredictionPipeline::new(FixedScore::new(0.9), Arc::new(SlowStore))
            .with_store_timeout(Duration::from_millis(50))
            .handle(Some(png_upload()))
            .await
            .unwrap_err();

        assert!(matches!(err, PredictError::PredictionFailed(PipelineFault::StoreTimeout(_))));
    }
}
