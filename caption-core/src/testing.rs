//! Weightless stand-ins for the real loader, for tests that exercise the service
//! end to end without touching the network.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

use crate::{CaptionModel, Loader, ModelBundle, ModelConfig, ModelLoadError, Processor};

const TINY_TOKENIZER: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    {"id": 0, "content": "[PAD]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 1, "content": "[SEP]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 2, "content": "[DEC]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 6, "content": "[UNK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
  ],
  "normalizer": null,
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {"[PAD]": 0, "[SEP]": 1, "[DEC]": 2, "a": 3, "red": 4, "square": 5, "[UNK]": 6},
    "unk_token": "[UNK]"
  }
}"#;

/// Image side length used by the fake bundles.
pub const TINY_IMAGE_SIZE: u32 = 8;

/// A word-level tokenizer that knows exactly "a red square" plus the BLIP specials.
pub fn tiny_tokenizer() -> Tokenizer {
    Tokenizer::from_str(TINY_TOKENIZER).expect("tiny tokenizer definition is valid")
}

/// Always "generates" `[DEC] a red square [SEP]`.
pub struct StaticCaptioner;

impl CaptionModel for StaticCaptioner {
    fn generate(&self, pixel_values: &Tensor, max_length: usize) -> anyhow::Result<Vec<u32>> {
        let (batch, channels, _, _) = pixel_values.dims4()?;
        if batch != 1 || channels != 3 {
            bail!("expected a single RGB image, got {:?}", pixel_values.dims());
        }
        let mut ids = vec![2, 3, 4, 5, 1];
        ids.truncate(max_length);
        Ok(ids)
    }
}

pub struct FailingModel;

impl CaptionModel for FailingModel {
    fn generate(&self, _pixel_values: &Tensor, _max_length: usize) -> anyhow::Result<Vec<u32>> {
        bail!("decoder exploded")
    }
}

pub fn static_bundle(model_identifier: &str) -> ModelBundle {
    ModelBundle::new(
        model_identifier,
        Processor::new(TINY_IMAGE_SIZE, tiny_tokenizer()),
        Box::new(StaticCaptioner),
        Device::Cpu,
    )
}

/// Counts how many loads were started; each one takes `delay`.
pub struct CountingLoader {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl CountingLoader {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            delay,
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Loader for CountingLoader {
    async fn load(&self, config: &ModelConfig) -> Result<ModelBundle, ModelLoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(static_bundle(&config.model_identifier))
    }
}

/// Fails the first `failures` loads as if the checkpoint were unreachable.
pub struct FlakyLoader {
    remaining_failures: AtomicUsize,
}

impl FlakyLoader {
    pub fn failing_times(failures: usize) -> Self {
        Self {
            remaining_failures: AtomicUsize::new(failures),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_times(usize::MAX)
    }
}

impl Loader for FlakyLoader {
    async fn load(&self, config: &ModelConfig) -> Result<ModelBundle, ModelLoadError> {
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ModelLoadError::Weights(candle_core::Error::msg(format!(
                "checkpoint source for {} unreachable",
                config.model_identifier
            ))));
        }
        Ok(static_bundle(&config.model_identifier))
    }
}

/// Loads a bundle whose model always fails to generate.
pub struct BrokenModelLoader;

impl Loader for BrokenModelLoader {
    async fn load(&self, config: &ModelConfig) -> Result<ModelBundle, ModelLoadError> {
        Ok(ModelBundle::new(
            config.model_identifier.clone(),
            Processor::new(TINY_IMAGE_SIZE, tiny_tokenizer()),
            Box::new(FailingModel),
            Device::Cpu,
        ))
    }
}
