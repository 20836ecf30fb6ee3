use std::sync::Arc;

use anyhow::{Context, Result};
use caption_core::{BlipLoader, DeviceMap, ModelConfig, ModelProvider};
use clap::Parser;
use hf_hub::api::tokio::Api;
use tokio::{self, net::TcpListener};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Image captioning server")]
struct Args {
    /// Use CPU instead of GPU
    #[arg(long)]
    cpu: bool,

    /// Checkpoint to caption with [default: $BLIP_MODEL_NAME or Salesforce/blip-image-captioning-base]
    #[arg(long)]
    model: Option<String>,

    /// Load the model before accepting connections instead of warming it up in the background
    #[arg(long)]
    eager: bool,

    /// Host address to bind the server to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the server to
    #[arg(long, env = "PORT", default_value_t = 5000)]
    port: u16,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, env = "CAPTION_DEBUG")]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            // load filters from the `RUST_LOG` environment variable.
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let device_map = if args.cpu {
        DeviceMap::ForceCpu
    } else {
        DeviceMap::default()
    };
    let config = match args.model {
        Some(model) => ModelConfig::new(model, device_map),
        None => ModelConfig::from_env(device_map),
    };
    let loader = BlipLoader::new(Api::new().context("failed to create hf hub API")?);
    let provider = Arc::new(ModelProvider::new(config, loader));
    info!(
        model = %provider.config().model_identifier,
        device = %provider.config().compute_device,
        accelerated = provider.config().compute_device.is_accelerator(),
        eager = args.eager,
        "resolved model configuration"
    );

    if args.eager {
        provider
            .get_bundle()
            .await
            .context("failed to load model at startup")?;
    } else {
        provider.warm_up();
    }

    let app = caption_server::router(provider);

    // --- Start the server ---
    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!("started server on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
