use thiserror::Error;

/// Failure to produce a [`ModelBundle`](crate::ModelBundle).
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("unsupported model: {0}")]
    Unsupported(String),
    #[error("failed to set up device {device}: {source}")]
    Device {
        device: crate::ComputeDevice,
        source: candle_core::Error,
    },
    #[error("failed to fetch {file} for {model}: {source}")]
    Hub {
        model: String,
        file: &'static str,
        source: hf_hub::api::tokio::ApiError,
    },
    #[error("failed to load tokenizer: {0}")]
    Tokenizer(String),
    #[error("failed to load model weights: {0}")]
    Weights(#[from] candle_core::Error),
    #[error("model load task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Everything that can go wrong while captioning one upload.
///
/// The first three variants are caused by the request and are the caller's to fix;
/// [`CaptionError::Inference`] covers everything from obtaining the model onward.
#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("No image uploaded.")]
    MissingImage,
    #[error("No image selected.")]
    EmptySelection,
    #[error("Invalid image file.")]
    InvalidImage,
    #[error("Failed to generate caption: {0}")]
    Inference(String),
}

impl CaptionError {
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Inference(_))
    }

    pub fn inference(err: impl std::fmt::Display) -> Self {
        Self::Inference(err.to_string())
    }
}

impl From<ModelLoadError> for CaptionError {
    fn from(err: ModelLoadError) -> Self {
        Self::inference(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_are_fixed() {
        assert_eq!(CaptionError::MissingImage.to_string(), "No image uploaded.");
        assert_eq!(CaptionError::EmptySelection.to_string(), "No image selected.");
        assert_eq!(CaptionError::InvalidImage.to_string(), "Invalid image file.");
        assert!(CaptionError::InvalidImage.is_client_error());
    }

    #[test]
    fn load_failures_surface_as_inference_errors() {
        let err: CaptionError = ModelLoadError::Unsupported("foo/bar".to_string()).into();
        assert!(!err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Failed to generate caption: unsupported model: foo/bar"
        );
    }
}
