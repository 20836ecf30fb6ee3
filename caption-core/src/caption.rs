use image::RgbImage;
use tracing::debug;

use crate::{CaptionError, ModelBundle, GENERATION_MAX_LENGTH};

/// One uploaded file, alive for a single request.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedImage {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Decodes the payload whatever its format or channel layout and converts it
    /// to 8-bit RGB.
    pub fn decode(&self) -> Result<RgbImage, CaptionError> {
        match image::load_from_memory(&self.bytes) {
            Ok(image) => Ok(image.to_rgb8()),
            Err(err) => {
                debug!(filename = %self.filename, "rejecting upload: {err}");
                Err(CaptionError::InvalidImage)
            }
        }
    }
}

/// Preprocesses, generates and decodes a caption with an already loaded bundle.
///
/// Blocks for the whole generation; call it from a blocking context.
pub fn generate_caption(bundle: &ModelBundle, image: &RgbImage) -> Result<String, CaptionError> {
    let pixel_values = bundle
        .processor()
        .preprocess(image, bundle.device())
        .map_err(|err| CaptionError::inference(format!("{err:#}")))?;
    let token_ids = bundle
        .model()
        .generate(&pixel_values, GENERATION_MAX_LENGTH)
        .map_err(|err| CaptionError::inference(format!("{err:#}")))?;
    debug!(tokens = token_ids.len(), "generated caption tokens");
    bundle
        .processor()
        .decode(&token_ids)
        .map_err(|err| CaptionError::inference(format!("{err:#}")))
}
