//! Libras rendering worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use librend_media::ensure_dir;
use librend_queue::{QueueConfig, ResultQueue, SegmentQueue};
use librend_worker::keepalive::KeepAliveTarget;
use librend_worker::{
    metrics, ProcessBackend, ProtocolClient, RenderExecutor, RenderSessionController,
    RenderSettings, WorkerConfig,
};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("librend=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting librend-worker");

    let config = WorkerConfig::from_env();
    let queue_config = QueueConfig::from_env();
    info!("Worker config: {:?}", config);
    if let Err(e) = config.validate() {
        error!("Invalid worker configuration: {}", e);
        std::process::exit(1);
    }

    if let Some(port) = config.metrics_port {
        match metrics::init_metrics(port) {
            Ok(()) => info!("Metrics exporter listening on port {}", port),
            Err(e) => warn!("Failed to start metrics exporter: {}", e),
        }
    }

    for dir in [&config.storage_dir, &config.screens_dir] {
        if let Err(e) = ensure_dir(dir).await {
            error!("Failed to create {}: {}", dir.display(), e);
            std::process::exit(1);
        }
    }

    let segments = match SegmentQueue::connect(queue_config.clone()).await {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("Failed to connect segment queue: {}", e);
            std::process::exit(1);
        }
    };

    let results = match ResultQueue::connect(&queue_config).await {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("Failed to connect result queue: {}", e);
            std::process::exit(1);
        }
    };

    match (segments.len().await, results.len().await) {
        (Ok(pending), Ok(published)) => info!(
            segment_stream = %queue_config.segment_stream,
            pending,
            result_stream = %results.stream(),
            published,
            "Connected to broker"
        ),
        (Err(e), _) | (_, Err(e)) => warn!("Could not read stream lengths: {}", e),
    }

    let backend = ProcessBackend::new(
        config.display.clone(),
        config.synthesis.clone(),
        config.capture.clone(),
    );
    let controller = RenderSessionController::new(
        backend,
        Arc::clone(&results),
        ProtocolClient::new(config.protocol.clone()),
        RenderSettings {
            storage_dir: config.storage_dir.clone(),
            screens_dir: config.screens_dir.clone(),
            synthesis_timeout: config.synthesis_timeout,
        },
    );

    let keepalive_targets = vec![
        segments.clone() as Arc<dyn KeepAliveTarget>,
        results as Arc<dyn KeepAliveTarget>,
    ];
    let mut executor = RenderExecutor::new(segments, controller, config.requeue_backoff)
        .with_keepalive(keepalive_targets, config.keepalive_interval);

    // Setup signal handler
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = executor.run(shutdown_rx).await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
