//! Ingestion: publish artifacts into the shared namespace exactly once.

use crate::request::{inline_bytes, ObjectCreated};
use artifact_storage::identity::{fresh_id, replay_id, IdentityIndex};
use artifact_storage::namespace::{self, ArtifactPath, KeyError, Namespace, NamespaceError};
use artifact_storage::namespace::{PublishMode, PublishOutcome};
use artifact_storage::object_store::{ObjectStore, ObjectStoreError};
use bytes::Bytes;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Successful ingestion result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub file_id: String,
    /// Absolute path of the published artifact
    pub efs_path: String,
    /// Key the caller supplied (object key or inline filename)
    pub s3_key: String,
    pub size_bytes: u64,
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("object store bucket is not configured")]
    MissingBucket,

    #[error("object not found: {key}")]
    ObjectNotFound { key: String },

    #[error("access denied to object: {key}")]
    AccessDenied { key: String },

    #[error("artifact of {actual} bytes exceeds maximum of {max} bytes")]
    TooLarge {
        actual: u64,
        max: u64,
        key: Option<String>,
    },

    #[error("failed to initialize namespace")]
    Mount(#[source] NamespaceError),

    #[error("failed to publish artifact")]
    Publish(#[source] NamespaceError),

    #[error("object store request failed")]
    ObjectStore(#[source] ObjectStoreError),
}

impl IngestionError {
    fn from_store(err: ObjectStoreError, key: &str) -> Self {
        match err {
            ObjectStoreError::NotFound { .. } => Self::ObjectNotFound {
                key: key.to_string(),
            },
            ObjectStoreError::AccessDenied { .. } => Self::AccessDenied {
                key: key.to_string(),
            },
            ObjectStoreError::TooLarge { size, limit, .. } => {
                counter!("ingest.rejected").increment(1);
                Self::TooLarge {
                    actual: size,
                    max: limit,
                    key: Some(key.to_string()),
                }
            }
            other => Self::ObjectStore(other),
        }
    }

    /// A key whose target is occupied by something other than a file is the
    /// caller's mistake; every other filesystem failure is ours
    fn from_namespace(err: NamespaceError, key: &str) -> Self {
        match err {
            NamespaceError::NotAFile { .. } => Self::InvalidRequest(format!(
                "Key '{key}' resolves to a directory, not a file"
            )),
            other => Self::Publish(other),
        }
    }

    /// Stable wire code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::InvalidKey(_) => "INVALID_REQUEST",
            Self::MissingBucket => "CONFIGURATION_ERROR",
            Self::ObjectNotFound { .. } => "S3_NOT_FOUND",
            Self::AccessDenied { .. } => "S3_ACCESS_DENIED",
            Self::TooLarge { .. } => "FILE_TOO_LARGE",
            Self::Mount(_) => "MOUNT_FAILED",
            Self::Publish(_) | Self::ObjectStore(_) => "INTERNAL_ERROR",
        }
    }
}

/// Publishes artifacts from the origin store, inline payloads and
/// object-created notifications
pub struct IngestionService {
    namespace: Arc<Namespace>,
    object_store: Arc<dyn ObjectStore>,
    bucket: Option<String>,
    max_artifact_bytes: u64,
}

impl IngestionService {
    pub fn new(
        namespace: Arc<Namespace>,
        object_store: Arc<dyn ObjectStore>,
        bucket: Option<String>,
        max_artifact_bytes: u64,
    ) -> Self {
        Self {
            namespace,
            object_store,
            bucket,
            max_artifact_bytes,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn max_artifact_bytes(&self) -> u64 {
        self.max_artifact_bytes
    }

    /// Fetch `key` from the configured bucket and publish it
    #[instrument(skip(self))]
    pub async fn ingest_from_store(&self, key: &str) -> Result<IngestReceipt, IngestionError> {
        let bucket = self.bucket.as_deref().ok_or(IngestionError::MissingBucket)?;
        let artifact = self.prepare(key).await?;

        if let Some(receipt) = self.replay(&artifact, key).await? {
            return Ok(receipt);
        }

        let data = self.fetch(bucket, key).await?;
        self.publish(&artifact, key, data).await
    }

    /// Publish an inline payload under `filename`
    #[instrument(skip(self, data))]
    pub async fn ingest_inline(
        &self,
        data: &Value,
        filename: &str,
    ) -> Result<IngestReceipt, IngestionError> {
        let bytes = Bytes::from(inline_bytes(data)?);
        self.check_size(bytes.len() as u64, None)?;

        let artifact = self.prepare(filename).await?;
        if let Some(receipt) = self.replay(&artifact, filename).await? {
            return Ok(receipt);
        }

        self.publish(&artifact, filename, bytes).await
    }

    /// Publish the object named by an object-created notification
    #[instrument(skip(self), fields(bucket = %event.bucket, key = %event.key))]
    pub async fn ingest_notification(
        &self,
        event: &ObjectCreated,
    ) -> Result<IngestReceipt, IngestionError> {
        self.check_size(event.size, Some(&event.key))?;

        let artifact = self.prepare(&event.key).await?;
        if let Some(receipt) = self.replay(&artifact, &event.key).await? {
            return Ok(receipt);
        }

        let data = self.fetch(&event.bucket, &event.key).await?;
        self.publish(&artifact, &event.key, data).await
    }

    /// Make sure the namespace is usable, then derive the target path
    async fn prepare(&self, key: &str) -> Result<ArtifactPath, IngestionError> {
        self.namespace
            .ensure_layout()
            .await
            .map_err(IngestionError::Mount)?;
        Ok(self.namespace.resolve(key)?)
    }

    fn check_size(&self, actual: u64, key: Option<&str>) -> Result<(), IngestionError> {
        if actual > self.max_artifact_bytes {
            counter!("ingest.rejected").increment(1);
            return Err(IngestionError::TooLarge {
                actual,
                max: self.max_artifact_bytes,
                key: key.map(str::to_string),
            });
        }
        Ok(())
    }

    async fn fetch(&self, bucket: &str, key: &str) -> Result<Bytes, IngestionError> {
        let data = self
            .object_store
            .get_object(bucket, key, self.max_artifact_bytes)
            .await
            .map_err(|e| IngestionError::from_store(e, key))?;

        // Notifications may under-report; the fetched size is authoritative
        self.check_size(data.len() as u64, Some(key))?;
        Ok(data)
    }

    /// Receipt for an artifact that is already present, if it is
    async fn replay(
        &self,
        artifact: &ArtifactPath,
        key: &str,
    ) -> Result<Option<IngestReceipt>, IngestionError> {
        let existing = namespace::existing_size(artifact.absolute())
            .await
            .map_err(|e| IngestionError::from_namespace(e, key))?;

        Ok(match existing {
            Some(size) => Some(self.replay_receipt(artifact, key, size).await),
            None => None,
        })
    }

    async fn replay_receipt(&self, artifact: &ArtifactPath, key: &str, size: u64) -> IngestReceipt {
        let index = IdentityIndex::new(&self.namespace);
        let file_id = match index.identity_for(artifact).await {
            Ok(Some(file_id)) => file_id,
            Ok(None) => replay_id(artifact.absolute()),
            Err(e) => {
                warn!(error = %e, "Identity lookup failed, deriving identifier from path");
                replay_id(artifact.absolute())
            }
        };

        counter!("ingest.replayed").increment(1);
        info!(
            file_id = %file_id,
            efs_path = %artifact.display(),
            size_bytes = size,
            status = "exists",
            "Artifact already present, returning existing file"
        );

        IngestReceipt {
            file_id,
            efs_path: artifact.display(),
            s3_key: key.to_string(),
            size_bytes: size,
        }
    }

    async fn publish(
        &self,
        artifact: &ArtifactPath,
        key: &str,
        data: Bytes,
    ) -> Result<IngestReceipt, IngestionError> {
        let file_id = fresh_id();

        let outcome = namespace::publish(artifact.absolute(), &data, PublishMode::CreateOnly)
            .await
            .map_err(|e| IngestionError::from_namespace(e, key))?;

        let size = match outcome {
            PublishOutcome::Published { size } => size,
            // Another publisher landed between the replay check and our write
            PublishOutcome::AlreadyPresent { size } => {
                return Ok(self.replay_receipt(artifact, key, size).await);
            }
        };

        if let Err(e) = IdentityIndex::new(&self.namespace)
            .record(&file_id, artifact)
            .await
        {
            warn!(file_id = %file_id, error = %e, "Failed to record artifact identity");
        }

        counter!("ingest.published").increment(1);
        counter!("ingest.bytes").increment(size);
        info!(
            file_id = %file_id,
            efs_path = %artifact.display(),
            size_bytes = size,
            status = "success",
            "Artifact published"
        );
        debug!(category = artifact.category().dir_name(), "Publish complete");

        Ok(IngestReceipt {
            file_id,
            efs_path: artifact.display(),
            s3_key: key.to_string(),
            size_bytes: size,
        })
    }
}

/// Render a byte count the way size limits are reported, e.g. `1GB`
pub fn human_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 3] = [(1 << 30, "GB"), (1 << 20, "MB"), (1 << 10, "KB")];

    for (unit, suffix) in UNITS {
        if bytes >= unit && bytes % unit == 0 {
            return format!("{}{suffix}", bytes / unit);
        }
    }
    format!("{bytes}B")
}
