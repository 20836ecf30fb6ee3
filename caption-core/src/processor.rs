use anyhow::{Error, Result};
use candle_core::{DType, Device, Tensor};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use tokenizers::Tokenizer;

// Normalization constants the BLIP vision tower was trained with (OpenAI CLIP).
const IMAGE_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const IMAGE_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

/// Turns pixels into model input and token ids back into text.
pub struct Processor {
    image_size: u32,
    tokenizer: Tokenizer,
}

impl Processor {
    pub fn new(image_size: u32, tokenizer: Tokenizer) -> Self {
        Self {
            image_size,
            tokenizer,
        }
    }

    /// Resizes, rescales and normalizes `image` into a `(1, 3, size, size)` f32
    /// tensor placed on `device`.
    pub fn preprocess(&self, image: &RgbImage, device: &Device) -> Result<Tensor> {
        let size = self.image_size as usize;
        let resized = DynamicImage::ImageRgb8(image.clone())
            .resize_exact(self.image_size, self.image_size, FilterType::CatmullRom)
            .to_rgb8();
        let data = Tensor::from_vec(resized.into_raw(), (size, size, 3), &Device::Cpu)?
            .permute((2, 0, 1))?;
        let mean = Tensor::new(&IMAGE_MEAN, &Device::Cpu)?.reshape((3, 1, 1))?;
        let std = Tensor::new(&IMAGE_STD, &Device::Cpu)?.reshape((3, 1, 1))?;
        let pixel_values = (data.to_dtype(DType::F32)? / 255.)?
            .broadcast_sub(&mean)?
            .broadcast_div(&std)?
            .unsqueeze(0)?;
        Ok(pixel_values.to_device(device)?)
    }

    /// Decodes one generated sequence, dropping special tokens.
    pub fn decode(&self, token_ids: &[u32]) -> Result<String> {
        self.tokenizer.decode(token_ids, true).map_err(Error::msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::tiny_tokenizer;
    use image::Rgb;

    #[test]
    fn preprocess_produces_normalized_batch() {
        let processor = Processor::new(8, tiny_tokenizer());
        let image = RgbImage::from_pixel(3, 5, Rgb([255, 255, 255]));

        let pixel_values = processor.preprocess(&image, &Device::Cpu).unwrap();
        assert_eq!(pixel_values.dims(), &[1, 3, 8, 8]);

        let red = pixel_values
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()[0];
        let expected = (1.0 - IMAGE_MEAN[0]) / IMAGE_STD[0];
        assert!((red - expected).abs() < 1e-4, "{red} vs {expected}");
    }

    #[test]
    fn decode_skips_special_tokens() {
        let processor = Processor::new(8, tiny_tokenizer());
        let caption = processor.decode(&[2, 3, 4, 5, 1, 0]).unwrap();
        assert_eq!(caption, "a red square");
    }
}
