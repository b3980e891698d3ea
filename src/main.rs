use metrics_exporter_prometheus::PrometheusBuilder;
use pod_publish_engine::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        collaborators::{AssetStore, PlatformRegistry},
        engine::Engine,
        image_gen::ImageApiClient,
        orchestrator::{Collaborators, FanOutOrchestrator},
        prompts::PromptApiClient,
        storage::{MemoryAssetStore, R2Client},
        storefront::StorefrontClient,
    },
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing pod-publish-engine server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("jobs_submitted_total", "Total jobs submitted");
    metrics::describe_counter!("jobs_completed_total", "Total jobs completed");
    metrics::describe_counter!("jobs_failed_total", "Total jobs that failed permanently");
    metrics::describe_counter!("jobs_retried_total", "Total failed attempts re-queued with backoff");
    metrics::describe_histogram!("job_run_seconds", "Run time of completed jobs");
    metrics::describe_gauge!("jobs_pending", "Jobs waiting in the priority queue");
    metrics::describe_gauge!("jobs_running", "Jobs currently executing");
    metrics::describe_counter!(
        "platform_publish_total",
        "Storefront publish attempts by platform and outcome"
    );
    metrics::describe_counter!(
        "circuit_breaker_open_total",
        "Times a dependency's circuit breaker opened"
    );

    // External collaborators
    tracing::info!("Initializing image and prompt clients");
    let images = ImageApiClient::new(config.image_api_url.clone(), config.image_api_token.clone())
        .expect("Failed to initialize image API client");
    let prompts = PromptApiClient::new(config.prompt_api_url.clone(), config.prompt_api_token.clone())
        .expect("Failed to initialize prompt API client");

    let assets: Arc<dyn AssetStore> = match config.r2_settings() {
        Some(r2) => {
            tracing::info!(bucket = r2.bucket, "Initializing R2 storage client");
            Arc::new(
                R2Client::new(r2.bucket, r2.endpoint, r2.access_key, r2.secret_key, r2.public_url)
                    .expect("Failed to initialize R2 client"),
            )
        }
        None => {
            tracing::warn!("R2 not configured, designs are kept in memory");
            Arc::new(MemoryAssetStore::new())
        }
    };

    let mut platforms = PlatformRegistry::new();
    for settings in config.storefront_settings() {
        tracing::info!(platform = %settings.name, product_types = ?settings.product_types, "Registering storefront");
        let client = StorefrontClient::new(settings).expect("Failed to initialize storefront client");
        platforms.register(Arc::new(client));
    }
    if platforms.is_empty() {
        tracing::warn!("No storefronts configured, jobs will only generate and store designs");
    }

    let orchestrator = Arc::new(FanOutOrchestrator::new(
        config.orchestrator_config(),
        Collaborators {
            prompts: Arc::new(prompts),
            images: Arc::new(images),
            assets,
            platforms,
        },
    ));

    // Job engine, restored from the last snapshot when persistence is on
    let engine = Engine::new(config.engine_config(), orchestrator)
        .await
        .expect("Failed to initialize job engine");
    engine.start();

    let state = AppState::new(engine.clone());
    let app = routes::build_router(state, Some(prometheus_handle));

    tracing::info!("Starting pod-publish-engine on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    if let Err(e) = engine.shutdown().await {
        tracing::error!(error = %e, "Failed to write final engine snapshot");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
