use anyhow::{Context, Result};
use artifact_processor::config::{ProcessorConfig, SERVICE_NAME};
use artifact_processor::{create_router, AppState, Archive, ProcessingService};
use artifact_storage::namespace::Namespace;
use artifact_storage::object_store::S3ObjectStore;
use artifact_storage::telemetry::{init_metrics, init_tracing, serve};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = ProcessorConfig::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        mount_root = %config.namespace.mount_root.display(),
        archive_bucket = ?config.archive_bucket(),
        "Starting {SERVICE_NAME}"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let namespace = Arc::new(Namespace::new(config.namespace.mount_root.clone()));
    if let Err(e) = namespace.ensure_layout().await {
        warn!(error = %e, "Namespace not ready at startup");
    }

    // The archive client only exists when it will be used
    let archive = match config.archive_bucket() {
        Some(bucket) => Some(Archive {
            store: Arc::new(S3ObjectStore::new(&config.s3).await),
            bucket: bucket.to_string(),
        }),
        None => {
            if config.archive.enabled {
                warn!("Archiving enabled but no bucket configured, results will not be archived");
            }
            None
        }
    };

    let state = AppState {
        service: Arc::new(ProcessingService::new(namespace, archive)),
        service_name: config.service.name.clone(),
        request_timeout: config.api.request_timeout(),
    };

    let router = create_router(state, &config.api);
    serve(router, &config.api.bind_address()).await?;

    info!("Processor service stopped");
    Ok(())
}
