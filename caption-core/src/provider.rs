use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{Loader, ModelBundle, ModelConfig, ModelLoadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Unloaded,
    Ready,
}

/// Owns the process-wide [`ModelBundle`].
///
/// The bundle is built on first use behind a single-flight guard: concurrent callers
/// wait for the in-flight load and then share its result. A failed load leaves the
/// provider unloaded so the next caller retries; a successful one is never replaced.
pub struct ModelProvider<L> {
    config: ModelConfig,
    loader: L,
    bundle: OnceCell<Arc<ModelBundle>>,
}

impl<L: Loader> ModelProvider<L> {
    pub fn new(config: ModelConfig, loader: L) -> Self {
        Self {
            config,
            loader,
            bundle: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn state(&self) -> BundleState {
        if self.bundle.initialized() {
            BundleState::Ready
        } else {
            BundleState::Unloaded
        }
    }

    /// Returns the shared bundle, loading it first if needed.
    ///
    /// The load runs on its own task, so a caller that gives up (a dropped request)
    /// does not abort it and later callers wait for it instead of starting another.
    pub async fn get_bundle(self: &Arc<Self>) -> Result<Arc<ModelBundle>, ModelLoadError> {
        if let Some(bundle) = self.bundle.get() {
            return Ok(Arc::clone(bundle));
        }
        let provider = Arc::clone(self);
        tokio::spawn(async move { provider.init_bundle().await }).await?
    }

    async fn init_bundle(&self) -> Result<Arc<ModelBundle>, ModelLoadError> {
        let bundle = self
            .bundle
            .get_or_try_init(|| async {
                info!(
                    model = %self.config.model_identifier,
                    device = %self.config.compute_device,
                    "loading model"
                );
                let start = Instant::now();
                let bundle = self.loader.load(&self.config).await?;
                info!(
                    model = %self.config.model_identifier,
                    elapsed = ?start.elapsed(),
                    "model ready"
                );
                Ok::<_, ModelLoadError>(Arc::new(bundle))
            })
            .await?;
        Ok(Arc::clone(bundle))
    }

    /// Starts loading in the background so the first request does not pay for it.
    /// Failures are logged and otherwise ignored; the next [`get_bundle`] retries.
    ///
    /// [`get_bundle`]: ModelProvider::get_bundle
    pub fn warm_up(self: &Arc<Self>) -> JoinHandle<()> {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = provider.get_bundle().await {
                error!(
                    model = %provider.config.model_identifier,
                    "model warmup failed: {err}"
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{static_bundle, CountingLoader, FlakyLoader};
    use crate::DeviceMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Builds the bundle on the blocking pool, like the hub loader, and records how
    /// many builds overlap.
    #[derive(Default)]
    struct BlockingLoader {
        started: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl Loader for BlockingLoader {
        async fn load(&self, config: &ModelConfig) -> Result<ModelBundle, ModelLoadError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let in_flight = Arc::clone(&self.in_flight);
            let max_in_flight = Arc::clone(&self.max_in_flight);
            let model_identifier = config.model_identifier.clone();
            let bundle = tokio::task::spawn_blocking(move || {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(300));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                static_bundle(&model_identifier)
            })
            .await?;
            Ok(bundle)
        }
    }

    fn config() -> ModelConfig {
        ModelConfig::new("test/blip-tiny", DeviceMap::ForceCpu)
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn concurrent_cold_callers_share_one_load() {
        let loader = CountingLoader::new(Duration::from_millis(50));
        let calls = loader.calls();
        let provider = Arc::new(ModelProvider::new(config(), loader));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move { provider.get_bundle().await.unwrap() })
            })
            .collect();

        let mut bundles = Vec::new();
        for handle in handles {
            bundles.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(bundles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(provider.state(), BundleState::Ready);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn abandoned_first_caller_does_not_restart_the_load() {
        let loader = BlockingLoader::default();
        let started = Arc::clone(&loader.started);
        let max_in_flight = Arc::clone(&loader.max_in_flight);
        let provider = Arc::new(ModelProvider::new(config(), loader));

        let first = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.get_bundle().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        let bundle = provider.get_bundle().await.unwrap();
        assert_eq!(bundle.model_identifier(), "test/blip-tiny");
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(provider.state(), BundleState::Ready);
    }

    #[test_log::test(tokio::test)]
    async fn failed_load_is_retried() {
        let provider = Arc::new(ModelProvider::new(config(), FlakyLoader::failing_times(1)));
        assert_eq!(provider.state(), BundleState::Unloaded);

        let err = provider.get_bundle().await.unwrap_err();
        assert!(matches!(err, ModelLoadError::Weights(_)));
        assert_eq!(provider.state(), BundleState::Unloaded);

        let bundle = provider.get_bundle().await.unwrap();
        assert_eq!(bundle.model_identifier(), "test/blip-tiny");
        assert_eq!(provider.state(), BundleState::Ready);
    }

    #[test_log::test(tokio::test)]
    async fn warm_up_races_with_requests() {
        let loader = CountingLoader::new(Duration::from_millis(20));
        let calls = loader.calls();
        let provider = Arc::new(ModelProvider::new(config(), loader));

        let warm_up = provider.warm_up();
        let bundle = provider.get_bundle().await.unwrap();
        warm_up.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&bundle, &provider.get_bundle().await.unwrap()));
    }

    #[test_log::test(tokio::test)]
    async fn warm_up_failure_is_swallowed() {
        let provider = Arc::new(ModelProvider::new(config(), FlakyLoader::failing_times(1)));

        provider.warm_up().await.unwrap();
        assert_eq!(provider.state(), BundleState::Unloaded);

        assert!(provider.get_bundle().await.is_ok());
    }
}
