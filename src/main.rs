use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use video_pipeline::app_state::AppState;
use video_pipeline::config::AppConfig;
use video_pipeline::routes;
use video_pipeline::services::{
    catalog::CatalogClient,
    consumer::{Consumer, ConsumerSettings},
    extractor::FrameExtractor,
    processor::Processor,
    queue::JobQueue,
    storage::S3Store,
};

const QUEUE_DEPTH_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing video processing worker");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!(endpoint = %config.storage_endpoint, bucket = %config.storage_bucket, "Initializing artifact store");
    let store = S3Store::new(
        &config.storage_bucket,
        &config.storage_endpoint,
        &config.storage_region,
        &config.storage_access_key,
        &config.storage_secret_key,
    )
    .expect("Failed to initialize artifact store");

    tracing::info!(queue = %config.queue_name, group = %config.consumer_group, "Connecting to Redis job queue");
    let queue = JobQueue::new(&config.redis_url, &config.queue_name, &config.consumer_group)
        .expect("Failed to initialize job queue");
    queue.init().await.expect("Failed to create consumer group");
    let queue = Arc::new(queue);

    let catalog = CatalogClient::new(&config.api_base_url, config.api_timeout())
        .expect("Failed to initialize catalog client");

    let extractor = FrameExtractor::new(config.ffmpeg_argv());
    let program = extractor
        .program()
        .expect("FFMPEG_COMMAND must name the frame extraction tool");
    match which::which(program) {
        Ok(path) => tracing::info!(path = %path.display(), "Frame extraction tool found"),
        Err(e) => tracing::warn!(program, error = %e, "Frame extraction tool not found on PATH"),
    }

    let processor = Processor::new(Arc::new(store), extractor, &config.work_dir);
    let consumer = Arc::new(Consumer::new(
        queue.clone(),
        Arc::new(processor),
        Arc::new(catalog),
        ConsumerSettings::from_config(&config),
    ));

    let shutdown = CancellationToken::new();
    let consumer_task = tokio::spawn(Arc::clone(&consumer).run(shutdown.clone()));
    tokio::spawn(report_queue_depth(queue.clone(), shutdown.clone()));

    let state = AppState::new(queue, consumer);
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .with_state(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Worker listening on {}", config.bind_addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .expect("Server error");

    if let Err(e) = consumer_task.await {
        tracing::error!(error = %e, "Consumer task failed");
    }

    tracing::info!("Worker shutdown complete");
}

async fn report_queue_depth(queue: Arc<JobQueue>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(QUEUE_DEPTH_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => match queue.depth().await {
                Ok(depth) => metrics::gauge!("video_queue_depth").set(depth as f64),
                Err(e) => tracing::debug!(error = %e, "Failed to read queue depth"),
            },
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Received shutdown signal");
}
