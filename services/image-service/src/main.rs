use anyhow::{Context, Result};
use image_service::config::{Config, StorageBackend};
use image_service::{
    create_router, start_api_server, AppState, CloudinaryStore, ObjectStore, Pipeline,
    PublishClient, RateLimiter, RemoveBgClient, S3Store,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting image service"
    );

    // Initialize metrics
    if config.service.metrics_port == 0 {
        warn!("Metrics exporter disabled");
    } else {
        init_metrics(config.service.metrics_port)?;
    }

    // Initialize components
    let store: Arc<dyn ObjectStore> = match config.storage.backend {
        StorageBackend::Cloudinary => {
            let cloudinary = config
                .storage
                .cloudinary
                .as_ref()
                .context("Missing Cloudinary configuration")?;
            Arc::new(CloudinaryStore::new(cloudinary).context("Failed to initialize Cloudinary store")?)
        }
        StorageBackend::S3 => {
            let s3 = config
                .storage
                .s3
                .as_ref()
                .context("Missing S3 configuration")?;
            Arc::new(
                S3Store::new(s3)
                    .await
                    .context("Failed to initialize S3 store")?,
            )
        }
    };

    let publisher = Arc::new(PublishClient::new(
        store,
        config.storage.folder.clone(),
        config.storage_timeout(),
    ));

    let remover = Arc::new(
        RemoveBgClient::new(&config.removal)
            .context("Failed to initialize background removal client")?,
    );

    let pipeline = Arc::new(Pipeline::new(remover, publisher, config.upload.max_file_size));

    let api_state = AppState {
        pipeline,
        max_file_size: config.upload.max_file_size,
    };
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_window(),
        config.api.rate_limit_max,
    ));
    let router = create_router(api_state, &config.api, limiter);

    info!(
        backend = ?config.storage.backend,
        folder = %config.storage.folder,
        max_file_size = config.upload.max_file_size,
        "Image service started successfully"
    );

    start_api_server(router, &config.api, shutdown_signal()).await?;

    info!("Image service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Shutting down image service");
}
