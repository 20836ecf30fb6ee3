use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::{blip, blip_text};
use hf_hub::api::tokio::{Api, ApiError};
use tokenizers::Tokenizer;
use tracing::debug;

use crate::{
    BlipVariant, CaptionModel, Loader, ModelBundle, ModelConfig, ModelLoadError, Processor,
};

const BOS_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;

// Only used to seed the processor; without a temperature it always takes the argmax.
const GREEDY_SEED: u64 = 1337;

fn blip_base_config() -> blip::Config {
    let text_config = blip_text::Config {
        vocab_size: 30524,
        hidden_size: 768,
        encoder_hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 768,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        max_position_embeddings: 512,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-12,
        is_decoder: true,
    };
    let vision_config = blip::VisionConfig {
        hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 512,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        image_size: 384,
        patch_size: 16,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-5,
    };

    blip::Config {
        text_config,
        vision_config,
        projection_dim: 512,
        image_text_hidden_size: 256,
    }
}

impl BlipVariant {
    fn config(self) -> blip::Config {
        match self {
            Self::Base => blip_base_config(),
            Self::Large => blip::Config::image_captioning_large(),
        }
    }
}

pub struct BlipModel {
    model: blip::BlipForConditionalGeneration,
    device: Device,
}

impl CaptionModel for BlipModel {
    fn generate(&self, pixel_values: &Tensor, max_length: usize) -> Result<Vec<u32>> {
        // The text decoder keeps a KV cache, so every generation works on its own
        // handle. Weights are shared between clones.
        let mut model = self.model.clone();
        model.text_decoder().reset_kv_cache();

        let image_embeds = pixel_values.apply(model.vision_model())?;
        let mut logits_processor = LogitsProcessor::new(GREEDY_SEED, None, None);
        let mut token_ids = vec![BOS_TOKEN_ID];

        for index in 0..max_length.saturating_sub(1) {
            let context_size = if index > 0 { 1 } else { token_ids.len() };
            let start_pos = token_ids.len().saturating_sub(context_size);
            let input_ids = Tensor::new(&token_ids[start_pos..], &self.device)?.unsqueeze(0)?;
            let logits = model
                .text_decoder()
                .forward(&input_ids, &image_embeds)
                .context("text decoder forward pass failed")?;
            let logits = logits.squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;
            let token = logits_processor.sample(&logits)?;
            if token == SEP_TOKEN_ID {
                break;
            }
            token_ids.push(token);
        }
        debug!(tokens = token_ids.len(), "blip generation finished");

        Ok(token_ids)
    }
}

/// Fetches BLIP captioning checkpoints from the Hugging Face hub.
///
/// Weights are memory-mapped straight into inference tensors; nothing is tracked
/// for gradients and there are no training-only layers to switch off.
pub struct BlipLoader {
    api: Api,
}

impl BlipLoader {
    pub fn new(api: Api) -> Self {
        Self { api }
    }
}

impl Loader for BlipLoader {
    async fn load(&self, config: &ModelConfig) -> Result<ModelBundle, ModelLoadError> {
        let model_id = config.model_identifier.clone();
        let variant = BlipVariant::from_name(&model_id)
            .ok_or_else(|| ModelLoadError::Unsupported(model_id.clone()))?;
        debug!(model = %model_id, ?variant, "detected model variant");

        let repo = self.api.model(model_id.clone());
        let hub_error = |file: &'static str| {
            let model = model_id.clone();
            move |source: ApiError| ModelLoadError::Hub {
                model,
                file,
                source,
            }
        };
        let tokenizer_file = repo
            .get("tokenizer.json")
            .await
            .map_err(hub_error("tokenizer.json"))?;
        let model_file = repo
            .get("model.safetensors")
            .await
            .map_err(hub_error("model.safetensors"))?;

        let compute_device = config.compute_device;
        let image_size = variant.config().vision_config.image_size as u32;

        // Building the weights is CPU heavy, keep it off the async workers.
        tokio::task::spawn_blocking(move || -> Result<ModelBundle, ModelLoadError> {
            let device = compute_device
                .to_device()
                .map_err(|source| ModelLoadError::Device {
                    device: compute_device,
                    source,
                })?;
            let tokenizer = Tokenizer::from_file(&tokenizer_file)
                .map_err(|err| ModelLoadError::Tokenizer(err.to_string()))?;
            let vb = unsafe {
                VarBuilder::from_mmaped_safetensors(&[model_file], DType::F32, &device)?
            };
            let model = blip::BlipForConditionalGeneration::new(&variant.config(), vb)?;

            Ok(ModelBundle::new(
                model_id,
                Processor::new(image_size, tokenizer),
                Box::new(BlipModel {
                    model,
                    device: device.clone(),
                }),
                device,
            ))
        })
        .await?
    }
}
