use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use log::warn;

use crate::error::PredictError;
use crate::models::{PredictionResponse, UploadedImage};
use crate::pipeline::PredictionPipeline;

/// Multipart field names that may carry the image.
pub const FILE_FIELDS: [&str; 2] = ["image", "file"];

pub async fn predict(
    req: HttpRequest,
    payload: web::Payload,
    pipeline: web::Data<PredictionPipeline>,
) -> Result<HttpResponse, PredictError> {
    let multipart = Multipart::new(req.headers(), payload);
    let upload = read_upload(multipart, pipeline.limits().max_bytes).await?;

    let record = pipeline.handle(upload).await?;

    Ok(HttpResponse::Created().json(PredictionResponse::success(record)))
}

/// Reads the first image field from the body.
///
/// The byte count across all fields is checked after every chunk, so an
/// oversized body is rejected before it is fully buffered. Other fields are
/// drained and dropped.
async fn read_upload(
    mut payload: Multipart,
    max_bytes: usize,
) -> Result<Option<UploadedImage>, PredictError> {
    let mut upload: Option<UploadedImage> = None;
    let mut total = 0usize;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(malformed)?;

        let disposition = field.content_disposition();
        let wanted = upload.is_none()
            && disposition
                .get_name()
                .map(|name| FILE_FIELDS.contains(&name))
                .unwrap_or(false);
        let filename = disposition.get_filename().map(str::to_owned);

        if wanted {
            let data = read_field(&mut field, &mut total, max_bytes).await?;
            upload = Some(UploadedImage::new(data, filename));
        } else {
            drain_field(&mut field, &mut total, max_bytes).await?;
        }
    }

    Ok(upload)
}

async fn read_field(
    field: &mut Field,
    total: &mut usize,
    max_bytes: usize,
) -> Result<Vec<u8>, PredictError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(malformed)?;
        count(total, chunk.len(), max_bytes)?;
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn drain_field(
    field: &mut Field,
    total: &mut usize,
    max_bytes: usize,
) -> Result<(), PredictError> {
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(malformed)?;
        count(total, chunk.len(), max_bytes)?;
    }
    Ok(())
}

fn count(total: &mut usize, len: usize, max_bytes: usize) -> Result<(), PredictError> {
    *total += len;
    if *total > max_bytes {
        warn!("Upload exceeds {} bytes, rejecting", max_bytes);
        return Err(PredictError::PayloadTooLarge { limit: max_bytes });
    }
    Ok(())
}

fn malformed(err: MultipartError) -> PredictError {
    warn!("Malformed multipart body: {}", err);
    PredictError::invalid_input("File is required")
}
