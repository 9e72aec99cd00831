use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format ("json" or "pretty")
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Shared namespace configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NamespaceConfig {
    /// Mount root of the shared namespace
    #[serde(default = "default_mount_root")]
    pub mount_root: PathBuf,
    /// Largest artifact accepted for ingestion, in bytes
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,
}

/// Object store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Origin/archive bucket name
    pub bucket: Option<String>,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Execution budget for a single request in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Largest accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_mount_root() -> PathBuf {
    PathBuf::from("/mnt/efs")
}

fn default_max_artifact_bytes() -> u64 {
    1024 * 1024 * 1024 // 1GiB
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> u64 {
    // JSON string escaping can inflate an inline payload well past its raw size
    2 * default_max_artifact_bytes()
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            mount_root: default_mount_root(),
            max_artifact_bytes: default_max_artifact_bytes(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: None,
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ApiConfig {
    /// Get the request budget as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Body limit clamped to the platform's address space
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_body_bytes).unwrap_or(usize::MAX)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Start a layered configuration for `service`.
///
/// Sources, lowest precedence first:
/// 1. built-in defaults
/// 2. `config/{service}` and `/etc/artifact/{service}` files, if present
/// 3. environment variables with the given prefix, e.g.
///    `INGEST__NAMESPACE__MOUNT_ROOT -> namespace.mount_root`
/// 4. the deployment variables `EFS_MOUNT_PATH` and `S3_BUCKET_NAME`
///
/// Callers may add their own overrides before building.
pub fn layered(
    service: &str,
    env_prefix: &str,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("service.name", service)?
        .set_default("service.log_level", default_log_level())?
        .set_default("service.metrics_port", i64::from(default_metrics_port()))?
        .add_source(File::with_name(&format!("config/{service}")).required(false))
        .add_source(File::with_name(&format!("/etc/artifact/{service}")).required(false))
        .add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("namespace.mount_root", std::env::var("EFS_MOUNT_PATH").ok())?
        .set_override_option("s3.bucket", std::env::var("S3_BUCKET_NAME").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let namespace = NamespaceConfig::default();
        assert_eq!(namespace.mount_root, PathBuf::from("/mnt/efs"));
        assert_eq!(namespace.max_artifact_bytes, 1 << 30);

        let api = ApiConfig::default();
        assert_eq!(api.request_timeout(), Duration::from_secs(30));
        assert_eq!(api.bind_address(), "0.0.0.0:8080");
        assert!(api.max_body_bytes > namespace.max_artifact_bytes);
    }

    #[test]
    fn test_layered_defaults_deserialize() {
        #[derive(Debug, Deserialize)]
        struct Sample {
            service: ServiceConfig,
            #[serde(default)]
            s3: S3Config,
        }

        let sample: Sample = layered("sample-service", "ARTIFACT_SAMPLE_UNUSED")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(sample.service.name, "sample-service");
        assert_eq!(sample.service.log_format, "json");
        assert_eq!(sample.s3.region, "us-east-1");
    }
}
