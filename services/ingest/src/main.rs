use anyhow::{Context, Result};
use artifact_ingest::config::{IngestConfig, SERVICE_NAME};
use artifact_ingest::{create_router, AppState, IngestionService};
use artifact_storage::namespace::Namespace;
use artifact_storage::object_store::S3ObjectStore;
use artifact_storage::telemetry::{init_metrics, init_tracing, serve};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = IngestConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    init_tracing(&config.service);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        mount_root = %config.namespace.mount_root.display(),
        bucket = ?config.s3.bucket,
        max_artifact_bytes = config.namespace.max_artifact_bytes,
        "Starting {SERVICE_NAME}"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Process-scoped resources, shared by every request
    let namespace = Arc::new(Namespace::new(config.namespace.mount_root.clone()));
    let object_store = Arc::new(S3ObjectStore::new(&config.s3).await);

    // Requests retry the layout if this fails
    if let Err(e) = namespace.ensure_layout().await {
        warn!(error = %e, "Namespace not ready at startup");
    }

    let service = IngestionService::new(
        namespace,
        object_store,
        config.s3.bucket.clone(),
        config.namespace.max_artifact_bytes,
    );

    let state = AppState {
        service: Arc::new(service),
        service_name: config.service.name.clone(),
        request_timeout: config.api.request_timeout(),
    };

    let router = create_router(state, &config.api);
    serve(router, &config.api.bind_address()).await?;

    info!("Ingest service stopped");
    Ok(())
}
