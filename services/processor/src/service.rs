//! Processing: read a published artifact, digest it and record the result.

use artifact_storage::digest::{summarize, ArtifactDigest};
use artifact_storage::identity::IdentityIndex;
use artifact_storage::namespace::{self, ArtifactPath, KeyError, Namespace, NamespaceError};
use artifact_storage::namespace::PublishMode;
use artifact_storage::object_store::ObjectStore;
use bytes::Bytes;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

pub const RESULT_CONTENT_TYPE: &str = "application/json";

/// Digest of one artifact as recorded under `outputs/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub file_id: String,
    #[serde(flatten)]
    pub digest: ArtifactDigest,
    /// Observational only; excluded from determinism guarantees
    pub processing_duration_ms: u64,
    pub status: String,
}

/// Successful processing response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub file_id: String,
    /// Path of the result record in the namespace
    pub efs_path: String,
    pub duration_ms: u64,
    pub result: ResultRecord,
    /// Archive key, present only when archiving succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("artifact {file_id} not found at {path}")]
    NotFound { file_id: String, path: String },

    #[error("failed to read artifact")]
    Read(#[source] NamespaceError),

    #[error("failed to encode result record")]
    Encode(#[source] serde_json::Error),

    #[error("failed to write result record")]
    Write(#[source] NamespaceError),
}

impl ProcessingError {
    /// Stable wire code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::InvalidKey(_) => "INVALID_REQUEST",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Read(_) | Self::Encode(_) | Self::Write(_) => "INTERNAL_ERROR",
        }
    }
}

/// Best-effort mirror of result records in the object store
pub struct Archive {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
}

pub struct ProcessingService {
    namespace: Arc<Namespace>,
    archive: Option<Archive>,
}

impl ProcessingService {
    pub fn new(namespace: Arc<Namespace>, archive: Option<Archive>) -> Self {
        Self { namespace, archive }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Digest the artifact named by `file_id` and record the result.
    ///
    /// `model` labels the request; it does not influence path lookup.
    #[instrument(skip(self))]
    pub async fn process(
        &self,
        file_id: &str,
        model: &str,
    ) -> Result<ProcessOutcome, ProcessingError> {
        let started = Instant::now();

        let artifact = self.locate(file_id).await?;
        let content = self.load(&artifact).await?;

        let digest_started = Instant::now();
        let digest = summarize(&content);
        let record = ResultRecord {
            file_id: file_id.to_string(),
            digest,
            processing_duration_ms: digest_started.elapsed().as_millis() as u64,
            status: "success".to_string(),
        };

        let result_name = result_file_name(file_id);
        let output_path = self.namespace.output_path(&result_name);
        let body = Bytes::from(serde_json::to_vec_pretty(&record).map_err(ProcessingError::Encode)?);

        namespace::publish(&output_path, &body, PublishMode::Replace)
            .await
            .map_err(ProcessingError::Write)?;
        debug!(path = %output_path.display(), "Result record written");

        let s3_key = self.archive(file_id, &result_name, body).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        counter!("process.completed").increment(1);
        histogram!("process.duration_ms").record(duration_ms as f64);
        info!(
            file_id,
            model,
            file_size = record.digest.file_size,
            duration_ms,
            archived = s3_key.is_some(),
            "Processing complete"
        );

        Ok(ProcessOutcome {
            file_id: file_id.to_string(),
            efs_path: output_path.to_string_lossy().into_owned(),
            duration_ms,
            result: record,
            s3_key,
        })
    }

    /// Resolve the read path for `file_id`: the key itself first, then the
    /// identifier index.
    async fn locate(&self, file_id: &str) -> Result<ArtifactPath, ProcessingError> {
        let derived = self.namespace.resolve(file_id)?;

        // Anything other than a regular file at the derived path is no artifact
        match namespace::existing_size(derived.absolute()).await {
            Ok(Some(_)) => return Ok(derived),
            Ok(None) | Err(NamespaceError::NotAFile { .. }) => {}
            Err(e) => return Err(ProcessingError::Read(e)),
        }

        match IdentityIndex::new(&self.namespace).locate(file_id).await {
            Ok(Some(indexed)) => {
                debug!(path = %indexed.display(), "Resolved identifier through index");
                Ok(indexed)
            }
            Ok(None) => Err(self.not_found(file_id, &derived)),
            Err(e) => Err(ProcessingError::Read(e)),
        }
    }

    async fn load(&self, artifact: &ArtifactPath) -> Result<Bytes, ProcessingError> {
        match namespace::read(artifact.absolute()).await {
            Ok(Some(content)) => {
                info!(
                    size_bytes = content.len(),
                    path = %artifact.display(),
                    "Loaded artifact from namespace"
                );
                Ok(content)
            }
            // Present at lookup, so a vanished file is a read failure
            Ok(None) => Err(ProcessingError::Read(NamespaceError::Read {
                path: artifact.absolute().to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "artifact removed after lookup"),
            })),
            Err(e) => Err(ProcessingError::Read(e)),
        }
    }

    fn not_found(&self, file_id: &str, artifact: &ArtifactPath) -> ProcessingError {
        counter!("process.not_found").increment(1);
        ProcessingError::NotFound {
            file_id: file_id.to_string(),
            path: artifact.display(),
        }
    }

    /// Mirror the record to the archive; failures only drop the key
    async fn archive(&self, file_id: &str, result_name: &str, body: Bytes) -> Option<String> {
        let archive = self.archive.as_ref()?;
        let key = format!("outputs/{result_name}");

        match archive
            .store
            .put_object(&archive.bucket, &key, body, RESULT_CONTENT_TYPE)
            .await
        {
            Ok(()) => {
                info!(bucket = %archive.bucket, s3_key = %key, "Archived result record");
                Some(key)
            }
            Err(e) => {
                counter!("process.archive.failed").increment(1);
                error!(
                    code = "S3_ARCHIVE_FAILED",
                    file_id,
                    s3_key = %key,
                    error = %e,
                    "Failed to archive result record"
                );
                None
            }
        }
    }
}

/// `<fileId>.result` with the identifier percent-encoded, so that distinct
/// identifiers never share a record and keys never escape `outputs/`
pub fn result_file_name(file_id: &str) -> String {
    format!("{}.result", urlencoding::encode(file_id))
}
