use image::imageops::{self, FilterType};
use ndarray::Array4;

use crate::error::DecodeError;

/// Spatial size the model expects.
pub const INPUT_SIZE: u32 = 224;
pub const CHANNELS: usize = 3;

/// Decodes `data` and builds an NHWC tensor of shape `[1, 224, 224, 3]` with
/// every channel scaled to `[0, 1]`.
///
/// Any decodable image is accepted; grayscale and alpha inputs are converted
/// to RGB first. The image is stretched to the input size with bilinear
/// filtering, so the aspect ratio is not preserved.
pub fn preprocess(data: &[u8]) -> Result<Array4<f32>, DecodeError> {
    let rgb = image::load_from_memory(data)?.to_rgb8();

    let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let values: Vec<f32> = resized
        .into_raw()
        .into_iter()
        .map(|x| x as f32 / 255f32)
        .collect();

    let side = INPUT_SIZE as usize;
    Ok(Array4::from_shape_vec((1, side, side, CHANNELS), values)?)
}
