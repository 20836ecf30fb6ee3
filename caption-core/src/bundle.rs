use candle_core::{Device, Tensor};

use crate::Processor;

/// Longest token sequence (BOS included) a single caption may grow to.
pub const GENERATION_MAX_LENGTH: usize = 50;

pub trait CaptionModel: Send + Sync {
    /// Generates one token sequence for a `(1, 3, H, W)` batch. The returned ids may
    /// include special tokens; at most `max_length` ids are returned.
    fn generate(&self, pixel_values: &Tensor, max_length: usize) -> anyhow::Result<Vec<u32>>;
}

/// The loaded (processor, model, device) triple shared by every request.
pub struct ModelBundle {
    model_identifier: String,
    processor: Processor,
    model: Box<dyn CaptionModel>,
    device: Device,
}

impl ModelBundle {
    pub fn new(
        model_identifier: impl Into<String>,
        processor: Processor,
        model: Box<dyn CaptionModel>,
        device: Device,
    ) -> Self {
        Self {
            model_identifier: model_identifier.into(),
            processor,
            model,
            device,
        }
    }

    pub fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    pub fn model(&self) -> &dyn CaptionModel {
        self.model.as_ref()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl std::fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBundle")
            .field("model_identifier", &self.model_identifier)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}
