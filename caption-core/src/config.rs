use crate::{ComputeDevice, DeviceMap};

/// Checkpoint used when no override is given.
pub const DEFAULT_MODEL_ID: &str = "Salesforce/blip-image-captioning-base";

/// Environment variable that overrides the checkpoint name.
pub const MODEL_ENV_VAR: &str = "BLIP_MODEL_NAME";

/// Resolved once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub model_identifier: String,
    pub compute_device: ComputeDevice,
}

impl ModelConfig {
    pub fn new(model_identifier: impl Into<String>, device_map: DeviceMap) -> Self {
        let model_identifier = model_identifier.into();
        let model_identifier = if model_identifier.trim().is_empty() {
            DEFAULT_MODEL_ID.to_string()
        } else {
            model_identifier.trim().to_string()
        };
        Self {
            model_identifier,
            compute_device: ComputeDevice::probe(device_map),
        }
    }

    /// Reads [`MODEL_ENV_VAR`], falling back to [`DEFAULT_MODEL_ID`].
    pub fn from_env(device_map: DeviceMap) -> Self {
        let model_identifier = std::env::var(MODEL_ENV_VAR).unwrap_or_default();
        Self::new(model_identifier, device_map)
    }
}

/// BLIP captioning architectures, told apart by their checkpoint name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlipVariant {
    Base,
    Large,
}

impl BlipVariant {
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        if !name_upper.contains("BLIP") {
            None
        } else if name_upper.contains("LARGE") {
            Some(Self::Large)
        } else {
            Some(Self::Base) // Default to Base if no size is found
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_identifier_falls_back_to_default() {
        let config = ModelConfig::new("  ", DeviceMap::ForceCpu);
        assert_eq!(config.model_identifier, DEFAULT_MODEL_ID);
        assert_eq!(config.compute_device, ComputeDevice::Cpu);
    }

    #[test]
    fn explicit_identifier_is_kept() {
        let config = ModelConfig::new("Salesforce/blip-image-captioning-large", DeviceMap::ForceCpu);
        assert_eq!(config.model_identifier, "Salesforce/blip-image-captioning-large");
    }

    #[test]
    fn env_override_is_read() {
        std::env::set_var(MODEL_ENV_VAR, "someone/blip-finetune");
        let config = ModelConfig::from_env(DeviceMap::ForceCpu);
        std::env::remove_var(MODEL_ENV_VAR);
        assert_eq!(config.model_identifier, "someone/blip-finetune");
    }

    #[test]
    fn variant_detection() {
        assert_eq!(BlipVariant::from_name(DEFAULT_MODEL_ID), Some(BlipVariant::Base));
        assert_eq!(
            BlipVariant::from_name("Salesforce/blip-image-captioning-large"),
            Some(BlipVariant::Large)
        );
        assert_eq!(BlipVariant::from_name("openai/clip-vit-large-patch14"), None);
    }
}
