//! Configuration management for the processing service.
//!
//! Environment variables use the `PROCESSOR__` prefix, e.g.
//! `PROCESSOR__ARCHIVE__ENABLED=true`. `EFS_MOUNT_PATH`, `S3_BUCKET_NAME` and
//! `ENABLE_S3_ARCHIVE` are honoured as overrides.

use artifact_storage::config::{layered, ApiConfig, NamespaceConfig, S3Config, ServiceConfig};
use config::ConfigError;
use serde::Deserialize;

pub const SERVICE_NAME: &str = "processor-service";

/// Main configuration for the processing service.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    pub service: ServiceConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub namespace: NamespaceConfig,

    /// Archive object store
    #[serde(default)]
    pub s3: S3Config,

    #[serde(default)]
    pub archive: ArchiveConfig,
}

/// Result archiving configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchiveConfig {
    /// Mirror result records to `s3.bucket`
    #[serde(default)]
    pub enabled: bool,
}

impl ProcessorConfig {
    /// Load configuration from files and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let archive_override = std::env::var("ENABLE_S3_ARCHIVE")
            .ok()
            .map(|value| archive_flag(&value));

        layered(SERVICE_NAME, "PROCESSOR")?
            .set_override_option("archive.enabled", archive_override)?
            .build()?
            .try_deserialize()
    }

    /// Bucket to archive into, when archiving is on and a bucket is set
    pub fn archive_bucket(&self) -> Option<&str> {
        if self.archive.enabled {
            self.s3.bucket.as_deref().filter(|bucket| !bucket.is_empty())
        } else {
            None
        }
    }
}

/// `ENABLE_S3_ARCHIVE` is on only for a case-insensitive `true`
fn archive_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}
