//! Configuration management for the ingestion service.
//!
//! Values are layered from defaults, optional files and environment
//! variables prefixed with `INGEST__` (e.g. `INGEST__API__PORT`).
//! `EFS_MOUNT_PATH` and `S3_BUCKET_NAME` are honoured as overrides.

use artifact_storage::config::{layered, ApiConfig, NamespaceConfig, S3Config, ServiceConfig};
use config::ConfigError;
use serde::Deserialize;

pub const SERVICE_NAME: &str = "ingest-service";

/// Main configuration for the ingestion service.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub service: ServiceConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub namespace: NamespaceConfig,

    /// Origin object store; `s3.bucket` is required for key-based ingestion
    #[serde(default)]
    pub s3: S3Config,
}

impl IngestConfig {
    /// Load configuration from files and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        layered(SERVICE_NAME, "INGEST")?.build()?.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.namespace.mount_root.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "namespace.mount_root".to_string(),
            ));
        }

        if self.namespace.max_artifact_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "namespace.max_artifact_bytes".to_string(),
                message: "Maximum artifact size must be greater than 0".to_string(),
            });
        }

        if self.api.request_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.request_timeout_secs".to_string(),
                message: "Request timeout must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
