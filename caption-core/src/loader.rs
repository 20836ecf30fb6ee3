use std::future::Future;

use crate::{ModelBundle, ModelConfig, ModelLoadError};

/// Builds a [`ModelBundle`] for a resolved configuration. Loading is allowed to be
/// slow (downloads, weight materialization); callers go through
/// [`ModelProvider`](crate::ModelProvider) so it happens once.
pub trait Loader: Send + Sync + 'static {
    fn load(
        &self,
        config: &ModelConfig,
    ) -> impl Future<Output = Result<ModelBundle, ModelLoadError>> + Send;
}
